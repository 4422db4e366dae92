//! High-level client: one method per control-protocol verb.
//!
//! [`TorClient`] formats command arguments, runs them through the
//! [`ControlConnection`] engine, and decomposes the replies. It also
//! tracks the connection's authentication state: before AUTHENTICATE
//! succeeds, only PROTOCOLINFO, AUTHCHALLENGE and QUIT are accepted,
//! and anything else is rejected before any bytes are sent.

use crate::auth::{
    compute_client_hash, generate_client_nonce, parse_authchallenge, read_cookie_file,
    verify_server_hash, AuthMethod, ProtocolInfo,
};
use crate::connection::ControlConnection;
use crate::error::{Result, TorCtlError};
use crate::events::EventType;
use crate::protocol::{quote, Reply};
use crate::types::{CircuitId, ConfigEntry, OnionServiceInfo, Signal, StreamId};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// A client for a Tor control port.
///
/// Cloning yields another handle to the same connection; commands may
/// be issued concurrently from any number of tasks.
#[derive(Clone)]
pub struct TorClient {
    conn: ControlConnection,
    authenticated: Arc<AtomicBool>,
}

impl TorClient {
    /// Connect to a control port over TCP.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }

    /// Connect to the default control port, 127.0.0.1:9051.
    pub async fn connect_default() -> Result<Self> {
        Self::connect("127.0.0.1:9051").await
    }

    /// Wrap an already-established duplex stream (Unix socket,
    /// in-memory pipe, anything bidirectional).
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        TorClient {
            conn: ControlConnection::new(stream),
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying protocol engine, for event listeners, the debug
    /// tap, and raw command access.
    pub fn connection(&self) -> &ControlConnection {
        &self.conn
    }

    /// Reject commands that are not valid before authentication.
    fn require_auth(&self) -> Result<()> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TorCtlError::InvalidArgument(
                "command not valid before AUTHENTICATE".to_string(),
            ))
        }
    }

    // ==================== Authentication ====================

    /// Authenticate with raw material (password hash secret, cookie
    /// contents, or nothing for the NULL method). The bytes are sent
    /// hex-encoded; an empty slice sends AUTHENTICATE with no
    /// argument.
    pub async fn authenticate(&self, auth: &[u8]) -> Result<()> {
        let cmd = format!("AUTHENTICATE {}\r\n", hex::encode(auth));
        match self.conn.exec(&cmd, None).await {
            Ok(_) => {
                self.authenticated.store(true, Ordering::SeqCst);
                debug!("authentication successful");
                Ok(())
            }
            Err(TorCtlError::Server { message, .. }) => {
                Err(TorCtlError::AuthenticationFailed(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate with a configured control password.
    pub async fn authenticate_password(&self, password: &str) -> Result<()> {
        let cmd = format!("AUTHENTICATE {}\r\n", quote(password));
        match self.conn.exec(&cmd, None).await {
            Ok(_) => {
                self.authenticated.store(true, Ordering::SeqCst);
                debug!("authentication successful");
                Ok(())
            }
            Err(TorCtlError::Server { message, .. }) => {
                Err(TorCtlError::AuthenticationFailed(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate with the contents of Tor's cookie file.
    pub async fn authenticate_cookie_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let cookie = read_cookie_file(path.as_ref())?;
        self.authenticate(&cookie).await
    }

    /// Authenticate with SAFECOOKIE: an AUTHCHALLENGE round trip with
    /// mutual HMAC verification, so the cookie itself never crosses
    /// the control connection.
    pub async fn authenticate_safecookie(&self, cookie_path: impl AsRef<Path>) -> Result<()> {
        let cookie = read_cookie_file(cookie_path.as_ref())?;
        let client_nonce = generate_client_nonce();

        let (server_hash, server_nonce) = self.auth_challenge(&client_nonce).await?;
        if !verify_server_hash(&cookie, &client_nonce, &server_nonce, &server_hash) {
            return Err(TorCtlError::AuthenticationFailed(
                "server hash verification failed".to_string(),
            ));
        }

        let client_hash = compute_client_hash(&cookie, &client_nonce, &server_nonce);
        self.authenticate(&client_hash).await
    }

    /// Authenticate with the best method PROTOCOLINFO advertises:
    /// NULL, then SAFECOOKIE, then COOKIE.
    pub async fn auto_authenticate(&self) -> Result<()> {
        let info = self.protocol_info().await?;

        if info.supports(AuthMethod::Null) {
            return self.authenticate(&[]).await;
        }
        let cookie_file = info.cookie_file.as_deref();
        if info.supports(AuthMethod::SafeCookie) {
            if let Some(path) = cookie_file {
                return self.authenticate_safecookie(path).await;
            }
        }
        if info.supports(AuthMethod::Cookie) {
            if let Some(path) = cookie_file {
                return self.authenticate_cookie_file(path).await;
            }
        }
        Err(TorCtlError::AuthenticationFailed(
            "no usable authentication method advertised".to_string(),
        ))
    }

    /// Run PROTOCOLINFO. Valid before authentication.
    pub async fn protocol_info(&self) -> Result<ProtocolInfo> {
        let reply = self.conn.exec("PROTOCOLINFO 1\r\n", None).await?;
        let lines: Vec<String> = reply.lines.iter().map(|l| l.message.clone()).collect();
        ProtocolInfo::parse(&lines)
    }

    /// Run AUTHCHALLENGE with a client nonce; returns the server hash
    /// and server nonce. Valid before authentication.
    pub async fn auth_challenge(&self, client_nonce: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let cmd = format!("AUTHCHALLENGE SAFECOOKIE {}\r\n", hex::encode(client_nonce));
        let reply = self.conn.exec(&cmd, None).await?;
        parse_authchallenge(reply.first_message())
    }

    // ==================== Configuration ====================

    /// Change configuration values. A pair with a `None` value resets
    /// that key to its default.
    pub async fn set_conf(&self, pairs: &[(&str, Option<&str>)]) -> Result<()> {
        self.require_auth()?;
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = String::from("SETCONF");
        for (key, value) in pairs {
            match value {
                Some(value) => {
                    cmd.push(' ');
                    cmd.push_str(key);
                    cmd.push('=');
                    cmd.push_str(&quote(value));
                }
                None => {
                    cmd.push(' ');
                    cmd.push_str(key);
                }
            }
        }
        cmd.push_str("\r\n");
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Reset configuration keys to their default values.
    pub async fn reset_conf(&self, keys: &[&str]) -> Result<()> {
        self.require_auth()?;
        if keys.is_empty() {
            return Ok(());
        }
        let cmd = format!("RESETCONF {}\r\n", keys.join(" "));
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Fetch configuration values. Keys configured multiple times
    /// yield multiple entries, in order.
    pub async fn get_conf(&self, keys: &[&str]) -> Result<Vec<ConfigEntry>> {
        self.require_auth()?;
        let cmd = format!("GETCONF {}\r\n", keys.join(" "));
        let reply = self.conn.exec(&cmd, None).await?;
        Ok(reply
            .lines
            .iter()
            .map(|line| ConfigEntry::parse(&line.message))
            .collect())
    }

    /// Load a complete configuration text, as though Tor had re-read
    /// its torrc.
    pub async fn load_conf(&self, config_text: &str) -> Result<()> {
        self.require_auth()?;
        self.conn.exec("LOADCONF\r\n", Some(config_text)).await?;
        Ok(())
    }

    /// Write the current configuration to disk. `force` saves even if
    /// the file would override it.
    pub async fn save_conf(&self, force: bool) -> Result<()> {
        self.require_auth()?;
        let cmd = if force { "SAVECONF FORCE\r\n" } else { "SAVECONF\r\n" };
        self.conn.exec(cmd, None).await?;
        Ok(())
    }

    // ==================== Events and signals ====================

    /// Subscribe to the given event types; events not listed are
    /// turned off.
    pub async fn set_events(&self, events: &[EventType]) -> Result<()> {
        self.require_auth()?;
        let mut cmd = String::from("SETEVENTS");
        for event in events {
            cmd.push(' ');
            cmd.push_str(event.as_str());
        }
        cmd.push_str("\r\n");
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Subscribe to events by name. Every name is validated against
    /// the known event set; an unknown name fails with
    /// [`TorCtlError::InvalidArgument`] before anything is sent.
    pub async fn set_events_by_name(&self, names: &[&str]) -> Result<()> {
        let events = names
            .iter()
            .map(|name| EventType::from_str(name))
            .collect::<Result<Vec<_>>>()?;
        self.set_events(&events).await
    }

    /// Send a signal.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("SIGNAL {}\r\n", signal.as_str());
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Request a new identity (clean circuits).
    pub async fn new_identity(&self) -> Result<()> {
        self.signal(Signal::NewNym).await
    }

    /// Send a shutdown signal without waiting for a reply; the daemon
    /// may close the connection before answering.
    pub async fn shutdown_tor(&self, signal: Signal) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("SIGNAL {}\r\n", signal.as_str());
        self.conn.send_fire_and_forget(&cmd).await
    }

    // ==================== Queries ====================

    /// Look up a single GETINFO key.
    pub async fn get_info(&self, key: &str) -> Result<String> {
        let mut values = self.get_info_multi(&[key]).await?;
        values
            .remove(key)
            .ok_or_else(|| TorCtlError::Parse(format!("key {:?} missing from GETINFO reply", key)))
    }

    /// Look up several GETINFO keys at once. Values delivered as data
    /// blocks are preferred over inline `key=value` text.
    pub async fn get_info_multi(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        self.require_auth()?;
        let cmd = format!("GETINFO {}\r\n", keys.join(" "));
        let reply = self.conn.exec(&cmd, None).await?;

        let mut values = HashMap::new();
        for line in &reply.lines {
            let Some((key, inline)) = line.message.split_once('=') else {
                continue;
            };
            let value = match &line.data {
                Some(data) => data.clone(),
                None => inline.to_string(),
            };
            values.insert(key.to_string(), value);
        }
        Ok(values)
    }

    /// Map addresses: future connections to each `from` address are
    /// redirected to its `to` address. Returns the mappings the
    /// daemon actually installed.
    pub async fn map_address(&self, pairs: &[(&str, &str)]) -> Result<HashMap<String, String>> {
        self.require_auth()?;
        let mut cmd = String::from("MAPADDRESS");
        for (from, to) in pairs {
            cmd.push(' ');
            cmd.push_str(from);
            cmd.push('=');
            cmd.push_str(&quote(to));
        }
        cmd.push_str("\r\n");
        let reply = self.conn.exec(&cmd, None).await?;

        let mut mappings = HashMap::new();
        for line in &reply.lines {
            if let Some((from, to)) = line.message.split_once('=') {
                mappings.insert(from.to_string(), to.to_string());
            }
        }
        Ok(mappings)
    }

    /// Resolve a hostname (or, with `reverse`, an address) through
    /// Tor. Answers arrive as ADDRMAP events.
    pub async fn resolve(&self, hostname: &str, reverse: bool) -> Result<()> {
        self.require_auth()?;
        let cmd = if reverse {
            format!("RESOLVE mode=reverse {}\r\n", hostname)
        } else {
            format!("RESOLVE {}\r\n", hostname)
        };
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Enable protocol features for this connection.
    pub async fn use_feature(&self, keys: &[&str]) -> Result<()> {
        self.require_auth()?;
        if keys.is_empty() {
            return Ok(());
        }
        let cmd = format!("USEFEATURE {}\r\n", keys.join(" "));
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    // ==================== Circuits and streams ====================

    /// Build a new circuit (no `circuit_id`) or extend an existing one
    /// through the given relays. Returns the circuit's ID.
    pub async fn extend_circuit(
        &self,
        circuit_id: Option<CircuitId>,
        path: &[&str],
    ) -> Result<CircuitId> {
        self.require_auth()?;
        let id = circuit_id.map(|c| c.to_string()).unwrap_or_else(|| "0".to_string());
        let cmd = format!("EXTENDCIRCUIT {} {}\r\n", id, path.join(","));
        let reply = self.conn.exec(&cmd, None).await?;

        // Reply: "EXTENDED <circuit id>"
        let message = reply.first_message();
        message
            .strip_prefix("EXTENDED ")
            .and_then(|id| id.trim().parse().ok())
            .map(CircuitId)
            .ok_or_else(|| {
                TorCtlError::Parse(format!("unexpected EXTENDCIRCUIT reply: {:?}", message))
            })
    }

    /// Change a circuit's purpose.
    pub async fn set_circuit_purpose(&self, circuit_id: CircuitId, purpose: &str) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("SETCIRCUITPURPOSE {} purpose={}\r\n", circuit_id, purpose);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Attach a stream to a circuit. Circuit 0 returns the stream to
    /// Tor's own attachment logic.
    pub async fn attach_stream(&self, stream_id: StreamId, circuit_id: CircuitId) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("ATTACHSTREAM {} {}\r\n", stream_id, circuit_id);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Change the destination of an unattached stream.
    pub async fn redirect_stream(&self, stream_id: StreamId, address: &str) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("REDIRECTSTREAM {} {}\r\n", stream_id, address);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Close a stream. `reason` is a RELAY_END reason code.
    pub async fn close_stream(&self, stream_id: StreamId, reason: u8) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("CLOSESTREAM {} {}\r\n", stream_id, reason);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Close a circuit. With `if_unused`, only when it carries no
    /// streams.
    pub async fn close_circuit(&self, circuit_id: CircuitId, if_unused: bool) -> Result<()> {
        self.require_auth()?;
        let suffix = if if_unused { " IFUNUSED" } else { "" };
        let cmd = format!("CLOSECIRCUIT {}{}\r\n", circuit_id, suffix);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Upload a router descriptor to the daemon. Returns the first
    /// reply line's message.
    pub async fn post_descriptor(
        &self,
        purpose: Option<&str>,
        cache: Option<bool>,
        descriptor: &str,
    ) -> Result<String> {
        self.require_auth()?;
        let mut cmd = String::from("POSTDESCRIPTOR");
        if let Some(purpose) = purpose {
            cmd.push_str(" purpose=");
            cmd.push_str(purpose);
        }
        if let Some(cache) = cache {
            cmd.push_str(if cache { " cache=yes" } else { " cache=no" });
        }
        cmd.push_str("\r\n");
        let reply = self.conn.exec(&cmd, Some(descriptor)).await?;
        Ok(reply.first_message().to_string())
    }

    /// Discard the current guard nodes.
    pub async fn drop_guards(&self) -> Result<()> {
        self.require_auth()?;
        self.conn.exec("DROPGUARDS\r\n", None).await?;
        Ok(())
    }

    // ==================== Ownership ====================

    /// Make the daemon exit when this control connection closes.
    pub async fn take_ownership(&self) -> Result<()> {
        self.require_auth()?;
        self.conn.exec("TAKEOWNERSHIP\r\n", None).await?;
        Ok(())
    }

    /// Undo a previous TAKEOWNERSHIP.
    pub async fn drop_ownership(&self) -> Result<()> {
        self.require_auth()?;
        self.conn.exec("DROPOWNERSHIP\r\n", None).await?;
        Ok(())
    }

    // ==================== Onion services ====================

    /// Fetch a hidden-service descriptor, optionally from specific
    /// directory servers. Results arrive as HS_DESC / HS_DESC_CONTENT
    /// events.
    pub async fn hs_fetch(&self, address: &str, servers: &[&str]) -> Result<()> {
        self.require_auth()?;
        let mut cmd = format!("HSFETCH {}", address);
        for server in servers {
            if !server.is_empty() {
                cmd.push_str(" SERVER=");
                cmd.push_str(server);
            }
        }
        cmd.push_str("\r\n");
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    /// Upload a hidden-service descriptor.
    pub async fn hs_post(
        &self,
        servers: &[&str],
        hs_address: Option<&str>,
        descriptor: &str,
    ) -> Result<()> {
        self.require_auth()?;
        let mut cmd = String::from("HSPOST");
        for server in servers {
            if !server.is_empty() {
                cmd.push_str(" SERVER=");
                cmd.push_str(server);
            }
        }
        if let Some(address) = hs_address {
            if !address.is_empty() {
                cmd.push_str(" HSADDRESS=");
                cmd.push_str(address);
            }
        }
        cmd.push_str("\r\n");
        self.conn.exec(&cmd, Some(descriptor)).await?;
        Ok(())
    }

    /// Create an ephemeral onion service.
    ///
    /// `key_spec` is `NEW:BEST`, `NEW:<algorithm>` or
    /// `<type>:<private key>`; each port maps a virtual port to an
    /// optional local target.
    pub async fn add_onion(
        &self,
        key_spec: &str,
        ports: &[(u16, Option<&str>)],
        flags: &[&str],
    ) -> Result<OnionServiceInfo> {
        self.require_auth()?;
        if !key_spec.contains(':') {
            return Err(TorCtlError::InvalidArgument(
                "onion key spec must be of the form type:material".to_string(),
            ));
        }
        if ports.is_empty() {
            return Err(TorCtlError::InvalidArgument(
                "at least one port mapping is required".to_string(),
            ));
        }

        let mut cmd = format!("ADD_ONION {}", key_spec);
        if !flags.is_empty() {
            cmd.push_str(" Flags=");
            cmd.push_str(&flags.join(","));
        }
        for (virt_port, target) in ports {
            match target {
                Some(target) => cmd.push_str(&format!(" Port={},{}", virt_port, target)),
                None => cmd.push_str(&format!(" Port={}", virt_port)),
            }
        }
        cmd.push_str("\r\n");
        let reply = self.conn.exec(&cmd, None).await?;

        let mut service_id = None;
        let mut private_key = None;
        for line in &reply.lines {
            if let Some(id) = line.message.strip_prefix("ServiceID=") {
                service_id = Some(id.to_string());
            } else if let Some(key) = line.message.strip_prefix("PrivateKey=") {
                private_key = Some(key.to_string());
            }
        }

        let service_id = service_id.ok_or_else(|| {
            TorCtlError::Parse("ADD_ONION reply carried no ServiceID".to_string())
        })?;
        debug!(service_id = %service_id, "onion service created");
        Ok(OnionServiceInfo {
            service_id,
            private_key,
        })
    }

    /// Remove an onion service created on this connection (or a
    /// detached one). `service_id` excludes the `.onion` suffix.
    pub async fn del_onion(&self, service_id: &str) -> Result<()> {
        self.require_auth()?;
        let cmd = format!("DEL_ONION {}\r\n", service_id);
        self.conn.exec(&cmd, None).await?;
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Close the control connection politely. Valid before
    /// authentication; errors from the closing handshake are ignored.
    pub async fn quit(&self) -> Result<()> {
        let _ = self.conn.exec("QUIT\r\n", None).await;
        self.conn.shutdown().await;
        Ok(())
    }

    /// Run a raw, pre-formatted command. The caller is responsible
    /// for the trailing CRLF.
    pub async fn raw_command(&self, command: &str, body: Option<&str>) -> Result<Reply> {
        self.conn.exec(command, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unauthenticated_client() -> TorClient {
        let (client, _daemon) = tokio::io::duplex(64);
        // Keep the daemon half alive so commands fail on state, not IO.
        std::mem::forget(_daemon);
        TorClient::new(client)
    }

    #[tokio::test]
    async fn commands_require_authentication() {
        let client = unauthenticated_client();
        assert!(matches!(
            client.signal(Signal::NewNym).await,
            Err(TorCtlError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.get_info("version").await,
            Err(TorCtlError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.set_conf(&[("SocksPort", Some("9050"))]).await,
            Err(TorCtlError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn set_events_rejects_unknown_names_before_sending() {
        let client = unauthenticated_client();
        client.authenticated.store(true, Ordering::SeqCst);
        let err = client
            .set_events_by_name(&["CIRC", "NOT_A_REAL_EVENT"])
            .await
            .unwrap_err();
        assert!(matches!(err, TorCtlError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn add_onion_validates_arguments_before_sending() {
        let client = unauthenticated_client();
        client.authenticated.store(true, Ordering::SeqCst);

        let err = client
            .add_onion("no-colon", &[(80, None)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TorCtlError::InvalidArgument(_)));

        let err = client.add_onion("NEW:BEST", &[], &[]).await.unwrap_err();
        assert!(matches!(err, TorCtlError::InvalidArgument(_)));
    }
}
