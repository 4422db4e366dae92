//! Watch circuit and bandwidth events.
//!
//! ```sh
//! cargo run --example events
//! ```

use std::sync::Arc;
use tor_ctrl::{EventHandler, EventType, Result, TorClient};

struct Printer;

impl EventHandler for Printer {
    fn circuit_status(&self, status: &str, circ_id: &str, path: &str) {
        if path.is_empty() {
            println!("circuit {} is {}", circ_id, status);
        } else {
            println!("circuit {} is {} via {}", circ_id, status, path);
        }
    }

    fn bandwidth_used(&self, bytes_read: u64, bytes_written: u64) {
        println!("bandwidth: {} in / {} out", bytes_read, bytes_written);
    }

    fn message(&self, severity: &str, message: &str) {
        println!("[{}] {}", severity, message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let client = TorClient::connect_default().await?;
    client.auto_authenticate().await?;

    client.connection().set_event_handler(Some(Arc::new(Printer)));
    client
        .set_events(&[EventType::Circ, EventType::Bw, EventType::Notice])
        .await?;

    println!("watching events; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(tor_ctrl::TorCtlError::Io)?;

    client.quit().await
}
