//! IP session state reported by `AT+CIPSTATUS`.
//!
//! # Token Table
//!
//! | `STATE:` token | State |
//! |----------------|-------|
//! | `IP INITIAL` | [`ConnectionState::Initial`] |
//! | `IP START` | [`ConnectionState::Start`] |
//! | `IP CONFIG` | [`ConnectionState::Config`] |
//! | `IP GPRSACT` | [`ConnectionState::GprsActive`] |
//! | `IP STATUS` | [`ConnectionState::Status`] |
//! | `TCP CONNECTING`, `UDP CONNECTING`, `SERVER LISTENING`, `IP PROCESSING` | [`ConnectionState::Processing`] |
//! | `CONNECT OK` | [`ConnectionState::ConnectOk`] |
//! | `TCP CLOSING`, `UDP CLOSING` | [`ConnectionState::Closing`] |
//! | `TCP CLOSED`, `UDP CLOSED` | [`ConnectionState::Closed`] |
//! | `PDP DEACT` | [`ConnectionState::PdpDeactivated`] |
//! | anything else | [`ConnectionState::Unknown`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionState
// ============================================================================

/// Decoded IP session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No `STATE:` line, or an unrecognised token.
    #[default]
    Unknown,
    /// `IP INITIAL`
    Initial,
    /// `IP START`
    Start,
    /// `IP CONFIG`
    Config,
    /// `IP GPRSACT`
    GprsActive,
    /// `IP STATUS`: bearer up, local address assigned.
    Status,
    /// A connection or listener is being set up.
    Processing,
    /// `CONNECT OK`
    ConnectOk,
    /// A connection is closing.
    Closing,
    /// A connection closed; the bearer is still up.
    Closed,
    /// `PDP DEACT`
    PdpDeactivated,
}

impl ConnectionState {
    /// Maps a raw `STATE:` token.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "IP INITIAL" => Self::Initial,
            "IP START" => Self::Start,
            "IP CONFIG" => Self::Config,
            "IP GPRSACT" => Self::GprsActive,
            "IP STATUS" => Self::Status,
            "TCP CONNECTING" | "UDP CONNECTING" | "SERVER LISTENING" | "IP PROCESSING" => {
                Self::Processing
            }
            "CONNECT OK" => Self::ConnectOk,
            "TCP CLOSING" | "UDP CLOSING" => Self::Closing,
            "TCP CLOSED" | "UDP CLOSED" => Self::Closed,
            "PDP DEACT" => Self::PdpDeactivated,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` if the bearer is up and no connection is active,
    /// so bring-up can be skipped.
    #[inline]
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Status | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Initial => "IP INITIAL",
            Self::Start => "IP START",
            Self::Config => "IP CONFIG",
            Self::GprsActive => "IP GPRSACT",
            Self::Status => "IP STATUS",
            Self::Processing => "processing",
            Self::ConnectOk => "CONNECT OK",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::PdpDeactivated => "PDP DEACT",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Decodes the state from reply lines; the first `STATE:` line wins.
///
/// Total: any input, including none, yields a state.
#[must_use]
pub fn parse_state<I, S>(lines: I) -> ConnectionState
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .find_map(|line| {
            line.as_ref()
                .trim()
                .strip_prefix("STATE:")
                .map(ConnectionState::from_token)
        })
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_token_table() {
        let cases = [
            ("IP INITIAL", ConnectionState::Initial),
            ("IP START", ConnectionState::Start),
            ("IP CONFIG", ConnectionState::Config),
            ("IP GPRSACT", ConnectionState::GprsActive),
            ("IP STATUS", ConnectionState::Status),
            ("TCP CONNECTING", ConnectionState::Processing),
            ("UDP CONNECTING", ConnectionState::Processing),
            ("SERVER LISTENING", ConnectionState::Processing),
            ("IP PROCESSING", ConnectionState::Processing),
            ("CONNECT OK", ConnectionState::ConnectOk),
            ("TCP CLOSING", ConnectionState::Closing),
            ("UDP CLOSING", ConnectionState::Closing),
            ("TCP CLOSED", ConnectionState::Closed),
            ("UDP CLOSED", ConnectionState::Closed),
            ("PDP DEACT", ConnectionState::PdpDeactivated),
        ];
        for (token, expected) in cases {
            let line = format!("STATE: {token}");
            assert_eq!(parse_state([line.as_str()]), expected, "token {token}");
        }
    }

    #[test]
    fn test_first_state_line_wins() {
        let lines = ["OK", "", "STATE: IP STATUS", "STATE: PDP DEACT"];
        assert_eq!(parse_state(lines), ConnectionState::Status);
    }

    #[test]
    fn test_unrecognised_and_missing() {
        assert_eq!(parse_state(["STATE: IP WHATEVER"]), ConnectionState::Unknown);
        assert_eq!(parse_state(["OK"]), ConnectionState::Unknown);
        assert_eq!(parse_state(Vec::<String>::new()), ConnectionState::Unknown);
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert_eq!(parse_state(["  STATE:IP STATUS \r"]), ConnectionState::Status);
    }

    #[test]
    fn test_ready_states() {
        assert!(ConnectionState::Status.is_ready());
        assert!(ConnectionState::Closed.is_ready());
        assert!(!ConnectionState::ConnectOk.is_ready());
        assert!(!ConnectionState::Initial.is_ready());
        assert!(!ConnectionState::Unknown.is_ready());
    }

    proptest! {
        #[test]
        fn prop_parse_state_is_total(lines in proptest::collection::vec(".*", 0..8)) {
            let _ = parse_state(&lines);
        }

        #[test]
        fn prop_unknown_tokens_map_to_unknown(token in "[a-z]{1,12}") {
            let line = format!("STATE: {token}");
            prop_assert_eq!(parse_state([line]), ConnectionState::Unknown);
        }
    }
}
