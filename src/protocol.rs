//! Wire-level protocol: reply framing, quoting, and data blocks.
//!
//! A reply is one or more lines of the form `DDD C message`, where
//! `DDD` is a 3-digit status code and `C` is `-` (more lines follow),
//! `+` (a dot-terminated data block follows) or space (final line).
//! Commands are CRLF-terminated lines, optionally followed by a
//! dot-stuffed data block.

use crate::error::{Result, TorCtlError};
use std::collections::HashMap;

/// One parsed line of a control-port reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// The divider character: '-' mid-reply, '+' data follows, ' ' end.
    pub divider: char,
    /// The text after the divider, with line terminators stripped.
    pub message: String,
    /// Decoded data block, present only on '+' lines.
    pub data: Option<String>,
}

impl ReplyLine {
    /// Parse a reply line (without its CRLF terminator).
    pub fn parse(line: &str) -> Result<Self> {
        if line.len() < 4 {
            return Err(TorCtlError::Protocol(format!(
                "reply line too short: {:?}",
                line
            )));
        }

        let bytes = line.as_bytes();
        if !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(TorCtlError::Protocol(format!(
                "non-numeric status code in: {:?}",
                line
            )));
        }
        let code = bytes[..3]
            .iter()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));

        let divider = bytes[3] as char;
        if !matches!(divider, ' ' | '-' | '+') {
            return Err(TorCtlError::Protocol(format!(
                "invalid divider {:?} in: {:?}",
                divider, line
            )));
        }

        Ok(ReplyLine {
            code,
            divider,
            message: line[4..].to_string(),
            data: None,
        })
    }

    /// Whether this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.divider == ' '
    }

    /// Whether a data block follows this line.
    pub fn is_data(&self) -> bool {
        self.divider == '+'
    }

    /// Whether this line's status code is in the success class (2xx).
    pub fn is_success(&self) -> bool {
        self.code / 100 == 2
    }
}

/// A complete reply: one or more lines, the last with a space divider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The reply lines, in wire order. Never empty.
    pub lines: Vec<ReplyLine>,
}

impl Reply {
    /// Wrap parsed lines into a reply.
    pub fn new(lines: Vec<ReplyLine>) -> Result<Self> {
        if lines.is_empty() {
            return Err(TorCtlError::Protocol("empty reply".to_string()));
        }
        Ok(Reply { lines })
    }

    /// The status code of the first line, which categorizes the reply.
    pub fn code(&self) -> u16 {
        self.lines[0].code
    }

    /// Whether this reply is an asynchronous event (status class 6xx).
    pub fn is_event(&self) -> bool {
        self.code() / 100 == 6
    }

    /// The first line's message.
    pub fn first_message(&self) -> &str {
        &self.lines[0].message
    }

    /// Fail with the first non-success line, if any.
    pub fn into_result(self) -> Result<Self> {
        for line in &self.lines {
            if !line.is_success() {
                return Err(TorCtlError::Server {
                    code: line.code,
                    message: line.message.clone(),
                });
            }
        }
        Ok(self)
    }
}

/// Quote a string argument: wrap in double quotes and backslash-escape
/// `\`, `"`, CR and LF. No other characters are escaped.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '\\' | '"' | '\r' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Encode a command body as a dot-stuffed data block, including the
/// terminating `.` line. Lines starting with `.` gain an extra dot;
/// every line is CRLF-terminated on the wire.
pub fn encode_data_block(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 8);
    for line in body.split('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        if line.ends_with('\r') {
            out.push('\n');
        } else {
            out.push_str("\r\n");
        }
    }
    out.push_str(".\r\n");
    out
}

/// Parse space-separated `key=value` pairs, where values may be quoted
/// strings with backslash escapes.
pub fn parse_key_value_pairs(text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut remaining = text;

    loop {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        // Bare words (no '=') are skipped, not treated as keys.
        let key_end = match remaining.find(['=', ' ']) {
            Some(i) if remaining.as_bytes()[i] == b'=' => i,
            Some(i) => {
                remaining = &remaining[i..];
                continue;
            }
            None => break,
        };
        let key = remaining[..key_end].to_string();
        remaining = &remaining[key_end + 1..];

        let (value, rest) = if remaining.starts_with('"') {
            parse_quoted_string(remaining)
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            (remaining[..end].to_string(), &remaining[end..])
        };

        result.insert(key, value);
        remaining = rest;
    }

    result
}

/// Parse a leading quoted string, unescaping backslash sequences.
/// Returns the decoded value and the unconsumed remainder.
fn parse_quoted_string(s: &str) -> (String, &str) {
    if !s.starts_with('"') {
        return (String::new(), s);
    }

    let mut result = String::new();
    let mut chars = s[1..].chars();
    let mut consumed = 1;

    while let Some(c) = chars.next() {
        consumed += c.len_utf8();
        if c == '"' {
            break;
        } else if c == '\\' {
            if let Some(next) = chars.next() {
                consumed += next.len_utf8();
                match next {
                    'n' => result.push('\n'),
                    'r' => result.push('\r'),
                    't' => result.push('\t'),
                    _ => result.push(next),
                }
            }
        } else {
            result.push(c);
        }
    }

    (result, &s[consumed..])
}
