//! Authentication helpers: PROTOCOLINFO parsing and the SAFECOOKIE
//! challenge/response computation.
//!
//! The control protocol supports NULL, HASHEDPASSWORD, COOKIE and
//! SAFECOOKIE authentication. The client sends the raw material with
//! AUTHENTICATE; everything here is the preparation around that.

use crate::error::{Result, TorCtlError};
use crate::protocol::parse_key_value_pairs;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

/// Authentication methods a Tor instance can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication.
    Cookie,
    /// HMAC-based cookie authentication.
    SafeCookie,
}

impl AuthMethod {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "NULL" => Some(AuthMethod::Null),
            "HASHEDPASSWORD" => Some(AuthMethod::HashedPassword),
            "COOKIE" => Some(AuthMethod::Cookie),
            "SAFECOOKIE" => Some(AuthMethod::SafeCookie),
            _ => None,
        }
    }
}

/// Parsed PROTOCOLINFO reply.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    /// Protocol version (currently always 1).
    pub protocol_version: u32,
    /// Tor version string, if reported.
    pub tor_version: Option<String>,
    /// Advertised authentication methods.
    pub auth_methods: Vec<AuthMethod>,
    /// Path to the authentication cookie, if cookie auth is available.
    pub cookie_file: Option<String>,
}

impl ProtocolInfo {
    /// Parse the message lines of a PROTOCOLINFO reply.
    pub fn parse(lines: &[String]) -> Result<Self> {
        let mut info = ProtocolInfo {
            protocol_version: 1,
            tor_version: None,
            auth_methods: Vec::new(),
            cookie_file: None,
        };

        for line in lines {
            if let Some(rest) = line.strip_prefix("PROTOCOLINFO ") {
                info.protocol_version = rest.trim().parse().unwrap_or(1);
            } else if let Some(rest) = line.strip_prefix("AUTH ") {
                let kv = parse_key_value_pairs(rest);
                if let Some(methods) = kv.get("METHODS") {
                    info.auth_methods
                        .extend(methods.split(',').filter_map(AuthMethod::parse));
                }
                info.cookie_file = kv.get("COOKIEFILE").cloned();
            } else if let Some(rest) = line.strip_prefix("VERSION ") {
                let kv = parse_key_value_pairs(rest);
                info.tor_version = kv.get("Tor").cloned();
            }
        }

        Ok(info)
    }

    /// Whether a given method is advertised.
    pub fn supports(&self, method: AuthMethod) -> bool {
        self.auth_methods.contains(&method)
    }
}

/// Read a 32-byte authentication cookie.
pub fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        TorCtlError::AuthenticationFailed(format!(
            "cannot read cookie file {}: {}",
            path.display(),
            e
        ))
    })?;
    if data.len() != 32 {
        return Err(TorCtlError::AuthenticationFailed(format!(
            "cookie file {} has length {}, expected 32",
            path.display(),
            data.len()
        )));
    }
    Ok(data)
}

/// Generate a 32-byte client nonce for AUTHCHALLENGE.
pub fn generate_client_nonce() -> [u8; 32] {
    use rand::Rng;
    let mut nonce = [0u8; 32];
    rand::rng().fill(&mut nonce);
    nonce
}

fn safecookie_hmac(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// The hash Tor sends back in the AUTHCHALLENGE reply.
pub fn compute_server_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    safecookie_hmac(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// The hash the client sends in the final AUTHENTICATE.
pub fn compute_client_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    safecookie_hmac(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Check the server hash from AUTHCHALLENGE in constant time.
pub fn verify_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    claimed: &[u8],
) -> bool {
    let expected = compute_server_hash(cookie, client_nonce, server_nonce);
    if claimed.len() != expected.len() {
        return false;
    }
    expected
        .iter()
        .zip(claimed)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Extract SERVERHASH and SERVERNONCE from an AUTHCHALLENGE reply line.
pub fn parse_authchallenge(message: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    // Format: AUTHCHALLENGE SERVERHASH=<hex> SERVERNONCE=<hex>
    let kv = parse_key_value_pairs(message);

    let decode = |key: &str| -> Result<Vec<u8>> {
        let hex_value = kv
            .get(key)
            .ok_or_else(|| TorCtlError::Parse(format!("AUTHCHALLENGE reply missing {}", key)))?;
        let bytes = hex::decode(hex_value)
            .map_err(|e| TorCtlError::Parse(format!("bad {} hex: {}", key, e)))?;
        if bytes.len() != 32 {
            return Err(TorCtlError::Parse(format!(
                "{} has length {}, expected 32",
                key,
                bytes.len()
            )));
        }
        Ok(bytes)
    };

    Ok((decode("SERVERHASH")?, decode("SERVERNONCE")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocolinfo_parsing() {
        let lines = vec![
            "PROTOCOLINFO 1".to_string(),
            "AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"/run/tor/control.authcookie\"".to_string(),
            "VERSION Tor=\"0.4.8.12\"".to_string(),
            "OK".to_string(),
        ];
        let info = ProtocolInfo::parse(&lines).unwrap();
        assert_eq!(info.protocol_version, 1);
        assert_eq!(info.tor_version.as_deref(), Some("0.4.8.12"));
        assert!(info.supports(AuthMethod::Cookie));
        assert!(info.supports(AuthMethod::SafeCookie));
        assert!(!info.supports(AuthMethod::Null));
        assert_eq!(
            info.cookie_file.as_deref(),
            Some("/run/tor/control.authcookie")
        );
    }

    #[test]
    fn protocolinfo_without_cookie() {
        let lines = vec!["PROTOCOLINFO 1".to_string(), "AUTH METHODS=NULL".to_string()];
        let info = ProtocolInfo::parse(&lines).unwrap();
        assert!(info.supports(AuthMethod::Null));
        assert_eq!(info.cookie_file, None);
        assert_eq!(info.tor_version, None);
    }

    #[test]
    fn nonces_differ() {
        assert_ne!(generate_client_nonce(), generate_client_nonce());
    }

    #[test]
    fn hash_directions_differ_and_verify() {
        let cookie = [0u8; 32];
        let client_nonce = [1u8; 32];
        let server_nonce = [2u8; 32];

        let server = compute_server_hash(&cookie, &client_nonce, &server_nonce);
        let client = compute_client_hash(&cookie, &client_nonce, &server_nonce);
        assert_ne!(server, client);

        assert!(verify_server_hash(&cookie, &client_nonce, &server_nonce, &server));
        assert!(!verify_server_hash(&cookie, &client_nonce, &server_nonce, &client));
        assert!(!verify_server_hash(&cookie, &client_nonce, &server_nonce, &server[..16]));
    }

    #[test]
    fn authchallenge_parsing() {
        let hash = "aa".repeat(32);
        let nonce = "bb".repeat(32);
        let line = format!("AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}", hash, nonce);
        let (server_hash, server_nonce) = parse_authchallenge(&line).unwrap();
        assert_eq!(server_hash, vec![0xaa; 32]);
        assert_eq!(server_nonce, vec![0xbb; 32]);

        assert!(parse_authchallenge("AUTHCHALLENGE SERVERHASH=aabb").is_err());
        let short = format!("AUTHCHALLENGE SERVERHASH=aabb SERVERNONCE={}", nonce);
        assert!(parse_authchallenge(&short).is_err());
    }
}
