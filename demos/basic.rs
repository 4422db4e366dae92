//! Connect, authenticate, and query a few basics.
//!
//! Run with a local Tor instance whose control port is enabled:
//!
//! ```sh
//! cargo run --example basic
//! ```

use tor_ctrl::{Result, TorClient};

#[tokio::main]
async fn main() -> Result<()> {
    let client = TorClient::connect_default().await?;
    client.auto_authenticate().await?;

    let version = client.get_info("version").await?;
    println!("connected to {}", version);

    let info = client
        .get_info_multi(&["traffic/read", "traffic/written"])
        .await?;
    for (key, value) in &info {
        println!("{} = {}", key, value);
    }

    for entry in client.get_conf(&["SocksPort"]).await? {
        match entry.value {
            Some(value) => println!("{} is {}", entry.key, value),
            None => println!("{} is at its default", entry.key),
        }
    }

    client.new_identity().await?;
    println!("requested new circuits");

    client.quit().await
}
