//! Reply builders and canned fixtures for testing controller code
//! without a running Tor daemon.
//!
//! Enabled with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tor-ctrl = { version = "0.1", features = ["test-utils"] }
//! ```

/// Builds correctly framed control-port reply text.
#[derive(Debug, Clone, Default)]
pub struct ReplyBuilder {
    lines: Vec<String>,
}

impl ReplyBuilder {
    /// Start an empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain `250 OK` reply.
    pub fn ok() -> Self {
        ReplyBuilder {
            lines: vec!["250 OK".to_string()],
        }
    }

    /// A single-line error reply.
    pub fn error(code: u16, message: &str) -> Self {
        ReplyBuilder {
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// A single-line event reply.
    pub fn event(payload: &str) -> Self {
        ReplyBuilder {
            lines: vec![format!("650 {}", payload)],
        }
    }

    /// Append a mid-reply line (`250-<text>`).
    pub fn mid_line(mut self, text: &str) -> Self {
        self.lines.push(format!("250-{}", text));
        self
    }

    /// Append a data line (`250+<text>`) followed by a dot-stuffed
    /// body and its terminating dot.
    pub fn data_line(mut self, text: &str, body: &str) -> Self {
        self.lines.push(format!("250+{}", text));
        for line in body.split('\n') {
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Append the terminal `250 OK` line.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// The CRLF-joined wire text.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\r\n", l)).collect()
    }
}

/// Canned wire text for common exchanges.
pub mod fixtures {
    /// A PROTOCOLINFO reply advertising cookie authentication.
    pub fn protocolinfo_reply() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL,COOKIE,SAFECOOKIE COOKIEFILE=\"/run/tor/control.authcookie\"\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// A GETINFO version reply.
    pub fn version_reply() -> &'static str {
        "250-version=Tor 0.4.7.13\r\n250 OK\r\n"
    }

    /// An ADD_ONION reply with a generated key.
    pub fn add_onion_reply() -> &'static str {
        "250-ServiceID=exampleonionaddr\r\n\
         250-PrivateKey=ED25519-V3:abcdef\r\n\
         250 OK\r\n"
    }

    /// A BW event.
    pub fn bandwidth_event() -> &'static str {
        "650 BW 1024 2048\r\n"
    }

    /// A CIRC event for a built circuit.
    pub fn circuit_built_event() -> &'static str {
        "650 CIRC 12345 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~relay\r\n"
    }

    /// An error reply for an unknown option.
    pub fn unknown_option_reply() -> &'static str {
        "552 Unrecognized option\r\n"
    }
}
