//! Asynchronous events: the known-event registry and the dispatcher
//! that fans incoming 6xx replies out to listeners.

use crate::protocol::Reply;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Event types that can be subscribed to with SETEVENTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Circuit status changed.
    Circ,
    /// Stream status changed.
    Stream,
    /// OR connection status changed.
    OrConn,
    /// Bandwidth used in the last second.
    Bw,
    /// Debug log message.
    Debug,
    /// Info log message.
    Info,
    /// Notice log message.
    Notice,
    /// Warning log message.
    Warn,
    /// Error log message.
    Error,
    /// New descriptors available.
    NewDesc,
    /// New address mapping.
    AddrMap,
    /// Our descriptor changed.
    DescChanged,
    /// General status event.
    StatusGeneral,
    /// Client status event.
    StatusClient,
    /// Server status event.
    StatusServer,
    /// Guard node set changed.
    Guard,
    /// Network status changed.
    Ns,
    /// Stream bandwidth.
    StreamBw,
    /// Clients seen (bridge only).
    ClientsSeen,
    /// New consensus arrived.
    NewConsensus,
    /// Build timeout set.
    BuildTimeoutSet,
    /// Signal received.
    Signal,
    /// Configuration changed.
    ConfChanged,
    /// Minor circuit status change.
    CircMinor,
    /// Pluggable transport launched.
    TransportLaunched,
    /// Connection bandwidth.
    ConnBw,
    /// Circuit bandwidth.
    CircBw,
    /// Cell stats.
    CellStats,
    /// Hidden service descriptor event.
    HsDesc,
    /// Hidden service descriptor content.
    HsDescContent,
    /// Network liveness changed.
    NetworkLiveness,
}

impl EventType {
    /// The event name as sent in SETEVENTS and in event replies.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Circ => "CIRC",
            EventType::Stream => "STREAM",
            EventType::OrConn => "ORCONN",
            EventType::Bw => "BW",
            EventType::Debug => "DEBUG",
            EventType::Info => "INFO",
            EventType::Notice => "NOTICE",
            EventType::Warn => "WARN",
            EventType::Error => "ERR",
            EventType::NewDesc => "NEWDESC",
            EventType::AddrMap => "ADDRMAP",
            EventType::DescChanged => "DESCCHANGED",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Guard => "GUARD",
            EventType::Ns => "NS",
            EventType::StreamBw => "STREAM_BW",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::NewConsensus => "NEWCONSENSUS",
            EventType::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventType::Signal => "SIGNAL",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::CircMinor => "CIRC_MINOR",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventType::ConnBw => "CONN_BW",
            EventType::CircBw => "CIRC_BW",
            EventType::CellStats => "CELL_STATS",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
        }
    }
}

impl FromStr for EventType {
    type Err = crate::error::TorCtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CIRC" => Ok(EventType::Circ),
            "STREAM" => Ok(EventType::Stream),
            "ORCONN" => Ok(EventType::OrConn),
            "BW" => Ok(EventType::Bw),
            "DEBUG" => Ok(EventType::Debug),
            "INFO" => Ok(EventType::Info),
            "NOTICE" => Ok(EventType::Notice),
            "WARN" => Ok(EventType::Warn),
            "ERR" => Ok(EventType::Error),
            "NEWDESC" => Ok(EventType::NewDesc),
            "ADDRMAP" => Ok(EventType::AddrMap),
            "DESCCHANGED" => Ok(EventType::DescChanged),
            "STATUS_GENERAL" => Ok(EventType::StatusGeneral),
            "STATUS_CLIENT" => Ok(EventType::StatusClient),
            "STATUS_SERVER" => Ok(EventType::StatusServer),
            "GUARD" => Ok(EventType::Guard),
            "NS" => Ok(EventType::Ns),
            "STREAM_BW" => Ok(EventType::StreamBw),
            "CLIENTS_SEEN" => Ok(EventType::ClientsSeen),
            "NEWCONSENSUS" => Ok(EventType::NewConsensus),
            "BUILDTIMEOUT_SET" => Ok(EventType::BuildTimeoutSet),
            "SIGNAL" => Ok(EventType::Signal),
            "CONF_CHANGED" => Ok(EventType::ConfChanged),
            "CIRC_MINOR" => Ok(EventType::CircMinor),
            "TRANSPORT_LAUNCHED" => Ok(EventType::TransportLaunched),
            "CONN_BW" => Ok(EventType::ConnBw),
            "CIRC_BW" => Ok(EventType::CircBw),
            "CELL_STATS" => Ok(EventType::CellStats),
            "HS_DESC" => Ok(EventType::HsDesc),
            "HS_DESC_CONTENT" => Ok(EventType::HsDescContent),
            "NETWORK_LIVENESS" => Ok(EventType::NetworkLiveness),
            other => Err(crate::error::TorCtlError::InvalidArgument(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed entry points for the recognized event kinds.
///
/// All methods default to no-ops; implement the ones you care about.
/// Calls happen synchronously on the reader task, so implementations
/// must not block.
#[allow(unused_variables)]
pub trait EventHandler: Send + Sync {
    /// A CIRC event. `path` is empty for LAUNCHED circuits and when
    /// the event carries no path.
    fn circuit_status(&self, status: &str, circ_id: &str, path: &str) {}

    /// A STREAM event. `target` is the stream's address:port.
    fn stream_status(&self, status: &str, stream_id: &str, target: &str) {}

    /// An ORCONN event.
    fn or_conn_status(&self, status: &str, or_name: &str) {}

    /// A BW event: bytes read and written in the last second.
    fn bandwidth_used(&self, bytes_read: u64, bytes_written: u64) {}

    /// A NEWDESC event: the servers with new descriptors.
    fn new_descriptors(&self, server_ids: &[String]) {}

    /// A log event (DEBUG, INFO, NOTICE, WARN or ERR).
    fn message(&self, severity: &str, message: &str) {}

    /// Any event without a typed entry point above.
    fn unrecognized(&self, event: &str, args: &str) {}
}

/// A listener receiving every event as `(event_name, raw_args)`.
pub type RawEventListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Routes event replies to raw listeners and the typed handler.
///
/// With neither registered, events are silently discarded.
#[derive(Default)]
pub struct Dispatcher {
    raw_listeners: RwLock<Vec<RawEventListener>>,
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl Dispatcher {
    /// Register a raw listener.
    pub fn add_raw_listener(&self, listener: RawEventListener) {
        self.raw_listeners.write().unwrap().push(listener);
    }

    /// Remove a previously registered raw listener (by identity).
    pub fn remove_raw_listener(&self, listener: &RawEventListener) {
        self.raw_listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Install or clear the typed handler.
    pub fn set_handler(&self, handler: Option<Arc<dyn EventHandler>>) {
        *self.handler.write().unwrap() = handler;
    }

    /// Deliver one event reply. Each line is decomposed into an
    /// upper-cased event name and its raw arguments; raw listeners
    /// always receive the full arguments, and the typed handler gets
    /// the per-kind decoding. Listener panics are contained and
    /// reported via `on_failure`, never propagated to the caller.
    pub fn dispatch(&self, reply: &Reply, mut on_failure: impl FnMut(&str)) {
        let listeners = self.raw_listeners.read().unwrap().clone();
        let handler = self.handler.read().unwrap().clone();
        if listeners.is_empty() && handler.is_none() {
            return;
        }

        for line in &reply.lines {
            let (name, rest) = match line.message.split_once(' ') {
                Some((name, rest)) => (name, rest),
                None => (line.message.as_str(), ""),
            };
            let name = name.to_uppercase();

            for listener in &listeners {
                let outcome = catch_unwind(AssertUnwindSafe(|| listener(&name, rest)));
                if outcome.is_err() {
                    warn!(event = %name, "raw event listener panicked");
                    on_failure(&format!("!! raw listener panicked on {}", name));
                }
            }

            if let Some(handler) = &handler {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| decode_event(handler.as_ref(), &name, rest)));
                if outcome.is_err() {
                    warn!(event = %name, "event handler panicked");
                    on_failure(&format!("!! event handler panicked on {}", name));
                }
            }
        }
    }
}

/// Decode one event's arguments and invoke the matching typed entry
/// point. Token positions missing from short argument lists are
/// delivered as empty strings.
fn decode_event(handler: &dyn EventHandler, name: &str, rest: &str) {
    let token = |tokens: &[&str], i: usize| tokens.get(i).copied().unwrap_or("").to_string();

    match name {
        "CIRC" => {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            let circ_id = token(&tokens, 0);
            let status = token(&tokens, 1);
            // LAUNCHED circuits have no path yet.
            let path = if status == "LAUNCHED" || tokens.len() < 3 {
                String::new()
            } else {
                token(&tokens, 2)
            };
            handler.circuit_status(&status, &circ_id, &path);
        }
        "STREAM" => {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            handler.stream_status(&token(&tokens, 1), &token(&tokens, 0), &token(&tokens, 3));
        }
        "ORCONN" => {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            handler.or_conn_status(&token(&tokens, 1), &token(&tokens, 0));
        }
        "BW" => {
            let mut tokens = rest.split_whitespace();
            let read = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
            let written = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
            handler.bandwidth_used(read, written);
        }
        "NEWDESC" => {
            let ids: Vec<String> = rest.split_whitespace().map(String::from).collect();
            handler.new_descriptors(&ids);
        }
        "DEBUG" | "INFO" | "NOTICE" | "WARN" | "ERR" => {
            handler.message(name, rest);
        }
        _ => handler.unrecognized(name, rest),
    }
}
