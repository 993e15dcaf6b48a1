//! Transactions: what gets written and how its reply is framed.
//!
//! A [`Transaction`] is one write followed by one framed read. The
//! [`Framing`] decides when the reply block is complete; the deadline
//! always bounds it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use super::reply::Line;

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for a command reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Data-ready prompt sent before raw payload bytes.
pub const DATA_PROMPT: u8 = b'>';

/// Final result codes of ordinary commands.
const STANDARD_TERMINALS: [&str; 3] = ["OK", "ERROR", "+CME ERROR:"];

// ============================================================================
// Framing
// ============================================================================

/// Rule that closes a reply block before its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Collect every line until the deadline.
    Deadline,

    /// Stop at a terminal line.
    ///
    /// A line is terminal when, trimmed, it equals a token, or starts with a
    /// token that ends in `:`. `max_lines` additionally caps the number of
    /// non-blank lines scanned.
    Terminal {
        /// Terminal tokens.
        tokens: Vec<String>,
        /// Maximum non-blank lines before giving up.
        max_lines: Option<usize>,
    },

    /// Stop at the first line containing any needle.
    Until(Vec<String>),

    /// Stop at the unterminated prompt byte, or at an error result.
    Prompt(u8),
}

impl Framing {
    /// `OK` / `ERROR` / `+CME ERROR:` terminated reply.
    #[must_use]
    pub fn standard() -> Self {
        Self::terminal(STANDARD_TERMINALS)
    }

    /// Reply terminated by one of `tokens`.
    #[must_use]
    pub fn terminal<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Terminal {
            tokens: tokens.into_iter().map(Into::into).collect(),
            max_lines: None,
        }
    }

    /// Reply complete once any of `needles` appears.
    #[must_use]
    pub fn until<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Until(needles.into_iter().map(Into::into).collect())
    }

    /// Reply complete on the `>` data prompt.
    #[inline]
    #[must_use]
    pub const fn prompt() -> Self {
        Self::Prompt(DATA_PROMPT)
    }

    /// Caps a terminal framing at `max` non-blank lines.
    ///
    /// Has no effect on other framings.
    #[must_use]
    pub fn with_max_lines(self, max: usize) -> Self {
        match self {
            Self::Terminal { tokens, .. } => Self::Terminal {
                tokens,
                max_lines: Some(max),
            },
            other => other,
        }
    }

    /// Returns the prompt byte the decoder must watch for, if any.
    #[inline]
    #[must_use]
    pub fn prompt_byte(&self) -> Option<u8> {
        match self {
            Self::Prompt(byte) => Some(*byte),
            _ => None,
        }
    }
}

/// Returns `true` if `line` is a terminal line for `tokens`.
#[must_use]
pub fn is_terminal_line<S: AsRef<str>>(line: &Line, tokens: &[S]) -> bool {
    let text = line.text();
    let trimmed = text.trim();
    tokens.iter().any(|token| {
        let token = token.as_ref();
        trimmed == token || (token.ends_with(':') && trimmed.starts_with(token))
    })
}

/// Returns `true` if `line` is an error result code.
#[must_use]
pub fn is_error_line(line: &Line) -> bool {
    is_terminal_line(line, &["ERROR", "+CME ERROR:", "+CMS ERROR:"])
}

// ============================================================================
// Payload
// ============================================================================

/// Bytes written at the start of a transaction.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    /// A command line; the carriage return is appended on the wire.
    Command(String),
    /// Raw bytes written verbatim, bypassing line framing.
    Raw(Vec<u8>),
}

impl Payload {
    /// Returns the bytes to write.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Command(text) => {
                let mut bytes = Vec::with_capacity(text.len() + 1);
                bytes.extend_from_slice(text.as_bytes());
                bytes.push(b'\r');
                bytes
            }
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(text) => f.debug_tuple("Command").field(text).finish(),
            Self::Raw(bytes) => write!(f, "Raw({} bytes)", bytes.len()),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(text) => f.write_str(text),
            Self::Raw(bytes) => write!(f, "<{} raw bytes>", bytes.len()),
        }
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// One write and one framed read.
///
/// # Example
///
/// ```ignore
/// let transaction = Transaction::command(Command::IpStatus)
///     .timeout(Duration::from_secs(2))
///     .framing(Framing::until(["STATE:"]))
///     .expect(["STATE: IP STATUS"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// What to write.
    pub payload: Payload,
    /// Deadline for the reply, measured from the end of the write.
    pub timeout: Duration,
    /// Substrings used to classify the reply.
    pub matchers: Vec<String>,
    /// Early-completion rule.
    pub framing: Framing,
}

impl Transaction {
    /// Creates a command transaction with deadline framing.
    #[must_use]
    pub fn command(command: impl fmt::Display) -> Self {
        Self::new(Payload::Command(command.to_string()))
    }

    /// Creates a raw-bytes transaction with deadline framing.
    #[must_use]
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Payload::Raw(bytes.into()))
    }

    fn new(payload: Payload) -> Self {
        Self {
            payload,
            timeout: DEFAULT_REPLY_TIMEOUT,
            matchers: Vec::new(),
            framing: Framing::Deadline,
        }
    }

    /// Sets the reply deadline.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the matchers used to classify the reply.
    #[must_use]
    pub fn expect<I, S>(mut self, matchers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matchers = matchers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the framing rule.
    #[inline]
    #[must_use]
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Returns a short label for logs and errors.
    #[inline]
    #[must_use]
    pub fn label(&self) -> String {
        self.payload.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_command_payload_appends_carriage_return() {
        let transaction = Transaction::command(Command::Attention);
        assert_eq!(transaction.payload.to_bytes(), b"AT\r");
    }

    #[test]
    fn test_raw_payload_is_verbatim() {
        let transaction = Transaction::raw(vec![0x00, b'\r', 0xFF]);
        assert_eq!(transaction.payload.to_bytes(), vec![0x00, b'\r', 0xFF]);
        assert_eq!(transaction.label(), "<3 raw bytes>");
    }

    #[test]
    fn test_builder_defaults() {
        let transaction = Transaction::command("AT");
        assert_eq!(transaction.timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(transaction.framing, Framing::Deadline);
        assert!(transaction.matchers.is_empty());
    }

    #[test]
    fn test_terminal_line_rules() {
        let tokens = ["OK", "+CME ERROR:"];
        assert!(is_terminal_line(&Line::from("OK"), &tokens));
        assert!(is_terminal_line(&Line::from("  OK "), &tokens));
        assert!(is_terminal_line(&Line::from("+CME ERROR: 3"), &tokens));
        assert!(!is_terminal_line(&Line::from("OKAY"), &tokens));
        assert!(!is_terminal_line(&Line::from("CONNECT OK"), &tokens));
    }

    #[test]
    fn test_error_line() {
        assert!(is_error_line(&Line::from("ERROR")));
        assert!(is_error_line(&Line::from("+CME ERROR: operation not allowed")));
        assert!(!is_error_line(&Line::from("OK")));
    }

    #[test]
    fn test_with_max_lines() {
        let framing = Framing::terminal(["SEND OK"]).with_max_lines(5);
        assert_eq!(
            framing,
            Framing::Terminal {
                tokens: vec!["SEND OK".into()],
                max_lines: Some(5)
            }
        );
        assert_eq!(Framing::prompt().with_max_lines(5), Framing::Prompt(b'>'));
        assert_eq!(Framing::prompt().prompt_byte(), Some(b'>'));
    }
}
