//! Core types shared across the library.

use std::fmt;
use std::str::FromStr;

/// A circuit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitId(pub u64);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CircuitId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CircuitId(s.parse()?))
    }
}

/// A stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StreamId(s.parse()?))
    }
}

/// A signal deliverable via the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload configuration items.
    Reload,
    /// Controlled shutdown.
    Shutdown,
    /// Dump stats.
    Dump,
    /// Switch all open logs to loglevel debug.
    Debug,
    /// Immediate shutdown.
    Halt,
    /// Switch to clean circuits.
    NewNym,
    /// Forget client-side cached IPs.
    ClearDnsCache,
    /// Dump an unscheduled heartbeat message.
    Heartbeat,
    /// Become dormant.
    Dormant,
    /// Stop being dormant.
    Active,
}

impl Signal {
    /// The signal name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Dormant => "DORMANT",
            Signal::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry from a GETCONF reply: a key with an optional value.
/// A key without a value means the option is set to its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// The configuration key.
    pub key: String,
    /// The value, if one was reported.
    pub value: Option<String>,
}

impl ConfigEntry {
    /// Parse a `key=value` or bare-key reply line.
    pub fn parse(line: &str) -> Self {
        match line.split_once('=') {
            Some((key, value)) => ConfigEntry {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => ConfigEntry {
                key: line.to_string(),
                value: None,
            },
        }
    }
}

/// An onion service created with ADD_ONION.
#[derive(Debug, Clone)]
pub struct OnionServiceInfo {
    /// The service ID (the `.onion` address without its suffix).
    pub service_id: String,
    /// The private key, unless generation was suppressed or an
    /// existing key was supplied.
    pub private_key: Option<String>,
}

impl OnionServiceInfo {
    /// The full `.onion` hostname for this service.
    pub fn onion_address(&self) -> String {
        format!("{}.onion", self.service_id)
    }
}
