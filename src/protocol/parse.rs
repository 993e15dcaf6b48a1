//! Parsers for the structured replies of the TCP and DNS commands.
//!
//! Every parser is total over its input: malformed replies yield a
//! `Garbage`/`None` classification or an [`Error::Protocol`], never a panic.

// ============================================================================
// Imports
// ============================================================================

use std::net::Ipv4Addr;

use tracing::warn;

use super::reply::ReplyBlock;
use super::transaction::is_error_line;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest pending count the device documents for one connection.
pub const MAX_DOCUMENTED_PENDING: usize = 2920;

// ============================================================================
// DNS
// ============================================================================

/// Classified reply to `AT+CDNSGIP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsReply {
    /// The name resolved.
    Resolved {
        /// First address.
        primary: Ipv4Addr,
        /// Second address, when the device returned one.
        secondary: Option<Ipv4Addr>,
    },
    /// The device reported a well-formed failure. Not worth resending.
    Failed {
        /// Failure as reported.
        reason: String,
    },
    /// Nothing recognisable arrived. Worth resending.
    Garbage,
}

/// Classifies a name resolution reply.
///
/// | Reply | Result |
/// |-------|--------|
/// | `+CDNSGIP: 1,"name","ip1"[,"ip2"]` | `Resolved` |
/// | `+CDNSGIP: 0,8` | `Failed("DNS COMMON ERROR")` |
/// | `+CDNSGIP: 0,3` | `Failed("NETWORK ERROR")` |
/// | `ERROR` / `+CME ERROR: ..` | `Failed` |
/// | anything else | `Garbage` |
#[must_use]
pub fn parse_dns_reply(reply: &ReplyBlock) -> DnsReply {
    for line in reply.lines() {
        let text = line.text();
        let text = text.trim();

        if let Some(fields) = fields(text, "+CDNSGIP:") {
            match fields.as_slice() {
                ["1", _name, primary, rest @ ..] if rest.len() <= 1 => {
                    let secondary = rest.first().and_then(|ip| ip.parse().ok());
                    return match primary.parse() {
                        Ok(primary) => DnsReply::Resolved { primary, secondary },
                        Err(_) => DnsReply::Garbage,
                    };
                }
                ["0", code, ..] => {
                    let reason = match *code {
                        "8" => "DNS COMMON ERROR".to_string(),
                        "3" => "NETWORK ERROR".to_string(),
                        code => format!("DNS error code {code}"),
                    };
                    return DnsReply::Failed { reason };
                }
                _ => continue,
            }
        }

        if is_error_line(line) {
            return DnsReply::Failed {
                reason: text.to_string(),
            };
        }
    }
    DnsReply::Garbage
}

/// DNS servers reported by `AT+CDNSCFG?`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsConfig {
    /// `PrimaryDns:` value.
    pub primary: Option<String>,
    /// `SecondaryDns:` value.
    pub secondary: Option<String>,
}

/// Parses the `PrimaryDns:` / `SecondaryDns:` lines of a DNS config query.
#[must_use]
pub fn parse_dns_config(reply: &ReplyBlock) -> DnsConfig {
    let mut config = DnsConfig::default();
    for line in reply.lines() {
        let text = line.text();
        let Some((key, value)) = text.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "PrimaryDns" => config.primary = Some(value.to_string()),
            "SecondaryDns" => config.secondary = Some(value.to_string()),
            _ => {}
        }
    }
    config
}

// ============================================================================
// Connect
// ============================================================================

/// Classified reply to `AT+CIPSTART`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectReply {
    /// `CONNECT OK`
    Connected,
    /// `ALREADY CONNECT`
    AlreadyConnected,
    /// `CONNECT FAIL` or an error result.
    Failed {
        /// The failing line.
        reason: String,
    },
    /// Nothing recognisable arrived.
    Garbage,
}

/// Classifies a connect reply; the first classifying line wins.
#[must_use]
pub fn classify_connect(reply: &ReplyBlock) -> ConnectReply {
    for line in reply.lines() {
        if line.contains("CONNECT OK") {
            return ConnectReply::Connected;
        }
        if line.contains("ALREADY CONNECT") {
            return ConnectReply::AlreadyConnected;
        }
        if line.contains("CONNECT FAIL") || is_error_line(line) {
            return ConnectReply::Failed {
                reason: line.text().trim().to_string(),
            };
        }
    }
    ConnectReply::Garbage
}

// ============================================================================
// Send
// ============================================================================

/// Parses the chunk size from `+CIPSEND: <size>`.
///
/// Returns `None` when the reply carries no usable size.
#[must_use]
pub fn parse_send_size(reply: &ReplyBlock) -> Option<usize> {
    reply.lines().iter().find_map(|line| {
        let text = line.text();
        fields(text.trim(), "+CIPSEND:")?
            .last()?
            .parse::<usize>()
            .ok()
            .filter(|&size| size > 0)
    })
}

// ============================================================================
// Receive
// ============================================================================

/// Parses the byte count from `+CIPRXGET: 4,<count>`.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if no count line is present.
pub fn parse_pending_count(reply: &ReplyBlock) -> Result<usize> {
    let count = reply
        .lines()
        .iter()
        .find_map(|line| {
            let text = line.text();
            match fields(text.trim(), "+CIPRXGET:")?.as_slice() {
                ["4", count, ..] => count.parse::<usize>().ok(),
                _ => None,
            }
        })
        .ok_or_else(|| Error::protocol(format!("no pending count in {:?}", reply.render())))?;

    if count > MAX_DOCUMENTED_PENDING {
        warn!(
            count,
            max = MAX_DOCUMENTED_PENDING,
            "Device reports more pending bytes than documented"
        );
    }
    Ok(count)
}

/// Extracts the payload of a `+CIPRXGET: 2,<req>,<cnf>` reply.
///
/// Payload lines follow the header; each line gets its stripped terminator
/// back, and the result is cut to the confirmed length. The block must end
/// with `OK`.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the header or the `OK` marker is missing,
/// or if fewer bytes than confirmed arrived.
pub fn parse_fetch(reply: &ReplyBlock) -> Result<Vec<u8>> {
    let lines = reply.lines();

    let (header, confirmed) = lines
        .iter()
        .enumerate()
        .find_map(|(index, line)| {
            let text = line.text();
            match fields(text.trim(), "+CIPRXGET:")?.as_slice() {
                ["2", _requested, confirmed, ..] => {
                    confirmed.parse::<usize>().ok().map(|confirmed| (index, confirmed))
                }
                _ => None,
            }
        })
        .ok_or_else(|| Error::protocol(format!("missing +CIPRXGET header in {:?}", reply.render())))?;

    let mut payload = Vec::with_capacity(confirmed.min(MAX_DOCUMENTED_PENDING));
    let mut rest = lines[header + 1..].iter();

    while payload.len() < confirmed {
        let Some(line) = rest.next() else {
            return Err(Error::protocol(format!(
                "short fetch: {} of {confirmed} bytes",
                payload.len()
            )));
        };
        payload.extend_from_slice(line.as_bytes());
        payload.extend_from_slice(line.terminator().as_bytes());
    }
    payload.truncate(confirmed);

    let terminated = rest
        .find(|line| !line.is_blank())
        .is_some_and(|line| line.text().trim() == "OK");
    if !terminated {
        return Err(Error::protocol(format!(
            "missing OK after fetch in {:?}",
            reply.render()
        )));
    }
    Ok(payload)
}

// ============================================================================
// Helpers
// ============================================================================

/// Splits the comma-separated fields after `prefix`, trimming spaces and quotes.
fn fields<'a>(line: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let rest = line.strip_prefix(prefix)?;
    Some(
        rest.split(',')
            .map(|field| field.trim().trim_matches('"'))
            .collect(),
    )
}

// ============================================================================
// Addresses
// ============================================================================

/// Maps a well-known service name to its port.
#[must_use]
pub fn service_port(service: &str) -> Option<u16> {
    match service {
        "ssh" => Some(22),
        "telnet" => Some(23),
        "smtp" => Some(25),
        "dns" => Some(53),
        "http" => Some(80),
        "ntp" => Some(123),
        "https" => Some(443),
        _ => None,
    }
}

/// Splits `host:port` where the port is a number or a service name.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if the address has no single `:`
/// separator, an empty host, or an unknown port.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = || Error::invalid_address(address);

    let (host, port) = address.split_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.contains(':') {
        return Err(invalid());
    }

    let port = port
        .parse::<u16>()
        .ok()
        .or_else(|| service_port(port))
        .ok_or_else(invalid)?;
    Ok((host.to_string(), port))
}

// ============================================================================
// Tests
// ============================================================================
