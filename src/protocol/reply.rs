//! Reply lines, reply blocks and transaction outcomes.
//!
//! A [`ReplyBlock`] is the group of lines the device returned for one
//! transaction. Lines keep their raw bytes so payloads and diagnostic output
//! with non-printable characters survive untouched.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::io;

use crate::error::{Error, Result};

// ============================================================================
// Terminator
// ============================================================================

/// How a line was terminated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminator {
    /// `\r\n`
    #[default]
    CrLf,
    /// Bare `\n`
    Lf,
    /// No terminator (prompt, or bytes left at end of stream).
    None,
}

impl Terminator {
    /// Returns the bytes this terminator stands for.
    #[inline]
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::CrLf => b"\r\n",
            Self::Lf => b"\n",
            Self::None => b"",
        }
    }
}

// ============================================================================
// Line
// ============================================================================

/// One line received from the device, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    bytes: Vec<u8>,
    terminator: Terminator,
}

impl Line {
    /// Creates a `\r\n` terminated line.
    #[inline]
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_terminator(bytes, Terminator::CrLf)
    }

    /// Creates a line with an explicit terminator.
    #[inline]
    #[must_use]
    pub fn with_terminator(bytes: impl Into<Vec<u8>>, terminator: Terminator) -> Self {
        Self {
            bytes: bytes.into(),
            terminator,
        }
    }

    /// Creates the pseudo-line recorded for an unterminated data prompt.
    #[inline]
    #[must_use]
    pub fn prompt(byte: u8) -> Self {
        Self::with_terminator(vec![byte], Terminator::None)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the terminator the line arrived with.
    #[inline]
    #[must_use]
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Returns the line as text, replacing invalid UTF-8.
    #[inline]
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Returns `true` if the line holds only whitespace.
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }

    /// Case-sensitive substring test.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        find_bytes(&self.bytes, needle.as_bytes()).is_some()
    }

    /// Renders the line for logs, escaping non-printable bytes.
    #[inline]
    #[must_use]
    pub fn render(&self) -> String {
        render_bytes(&self.bytes)
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

// ============================================================================
// ReplyBlock
// ============================================================================

/// Lines collected for one transaction.
///
/// Blank lines are kept so payload bytes can be rebuilt exactly; the text
/// views ([`text_lines`](Self::text_lines), [`Display`](fmt::Display)) skip them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyBlock {
    lines: Vec<Line>,
}

impl ReplyBlock {
    /// Creates an empty block.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line.
    #[inline]
    pub fn push(&mut self, line: Line) {
        self.lines.push(line);
    }

    /// Returns all lines, blank ones included.
    #[inline]
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Returns `true` if nothing but blank lines arrived.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(Line::is_blank)
    }

    /// Returns `true` if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    /// Returns the index of the matcher found first, scanning lines in order.
    ///
    /// Within one line, matchers are tried in the order given.
    #[must_use]
    pub fn find_first<S: AsRef<str>>(&self, matchers: &[S]) -> Option<usize> {
        self.lines.iter().find_map(|line| {
            matchers
                .iter()
                .position(|matcher| line.contains(matcher.as_ref()))
        })
    }

    /// Returns the first line starting with `prefix`, ignoring leading whitespace.
    #[must_use]
    pub fn line_with_prefix(&self, prefix: &str) -> Option<&Line> {
        self.lines
            .iter()
            .find(|line| line.text().trim_start().starts_with(prefix))
    }

    /// Returns the non-blank lines as text.
    #[must_use]
    pub fn text_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|line| !line.is_blank())
            .map(|line| line.text().into_owned())
            .collect()
    }

    /// Renders the block for logs and error messages.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .filter(|line| !line.is_blank())
            .map(Line::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<Line> for ReplyBlock {
    fn from_iter<I: IntoIterator<Item = Line>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ReplyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text_lines().join("\n"))
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Classification of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The matcher at this index was found in the reply.
    Matched(usize),
    /// No matcher was found (this includes an empty, timed-out reply).
    NoMatch,
    /// The channel failed while writing or reading.
    IoError(String),
}

impl Outcome {
    /// Returns the matched index, if any.
    #[inline]
    #[must_use]
    pub fn matched(&self) -> Option<usize> {
        match self {
            Self::Matched(index) => Some(*index),
            _ => None,
        }
    }

    /// Returns `true` if the matcher at `index` was found.
    #[inline]
    #[must_use]
    pub fn is(&self, index: usize) -> bool {
        self.matched() == Some(index)
    }
}

// ============================================================================
// Exchange
// ============================================================================

/// A reply block together with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Lines received for the transaction.
    pub reply: ReplyBlock,
    /// How the reply matched.
    pub outcome: Outcome,
}

impl Exchange {
    /// Creates an exchange for a channel failure.
    #[inline]
    #[must_use]
    pub fn io_error(message: impl Into<String>) -> Self {
        Self {
            reply: ReplyBlock::new(),
            outcome: Outcome::IoError(message.into()),
        }
    }

    /// Turns a channel failure into [`Error::Io`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the outcome is [`Outcome::IoError`].
    pub fn check_io(&self) -> Result<()> {
        match &self.outcome {
            Outcome::IoError(message) => Err(Error::Io(io::Error::other(message.clone()))),
            Outcome::Matched(_) | Outcome::NoMatch => Ok(()),
        }
    }

    /// Returns the reply if the first matcher was found.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the channel failed
    /// - [`Error::Rejected`] carrying the reply text otherwise
    pub fn require(self, command: &str) -> Result<ReplyBlock> {
        self.check_io()?;
        if self.outcome.is(0) {
            return Ok(self.reply);
        }
        let reason = if self.reply.is_empty() {
            "no reply".to_string()
        } else {
            self.reply.to_string()
        };
        Err(Error::rejected(command, reason))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Renders bytes as text, printing non-printable bytes as `[0xNN]`.
#[must_use]
pub fn render_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if byte == b' ' || byte.is_ascii_graphic() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("[0x{byte:X}]"));
        }
    }
    out
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn block(lines: &[&str]) -> ReplyBlock {
        lines.iter().map(|&line| Line::from(line)).collect()
    }

    #[test]
    fn test_find_first_uses_document_order() {
        let reply = block(&["", "ERROR", "OK"]);
        assert_eq!(reply.find_first(&["OK", "ERROR"]), Some(1));

        let reply = block(&["OK", "ERROR"]);
        assert_eq!(reply.find_first(&["OK", "ERROR"]), Some(0));
    }

    #[test]
    fn test_find_first_no_match() {
        let reply = block(&["GARBAGE"]);
        assert_eq!(reply.find_first(&["PONG"]), None);
        assert_eq!(ReplyBlock::new().find_first(&["OK"]), None);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let reply = block(&["ok"]);
        assert!(!reply.contains("OK"));
    }

    #[test]
    fn test_text_lines_skip_blanks() {
        let reply = block(&["", "PONG", "  "]);
        assert_eq!(reply.text_lines(), vec!["PONG".to_string()]);
        assert_eq!(reply.to_string(), "PONG");
        assert_eq!(reply.lines().len(), 3);
    }

    #[test]
    fn test_is_empty_ignores_blank_lines() {
        assert!(block(&["", ""]).is_empty());
        assert!(!block(&["", "OK"]).is_empty());
    }

    #[test]
    fn test_render_bytes_escapes_non_printable() {
        assert_eq!(render_bytes(b"OK\r\n"), "OK[0xD][0xA]");
        assert_eq!(render_bytes(&[0x00, b'A', 0xFF]), "[0x0]A[0xFF]");
    }

    #[test]
    fn test_line_keeps_raw_bytes() {
        let line = Line::with_terminator(vec![0xDE, 0xAD], Terminator::Lf);
        assert_eq!(line.as_bytes(), &[0xDE, 0xAD]);
        assert_eq!(line.terminator().as_bytes(), b"\n");
        assert_eq!(line.render(), "[0xDE][0xAD]");
    }

    #[test]
    fn test_line_with_prefix_trims_leading_space() {
        let reply = block(&["OK", "  STATE: IP STATUS"]);
        let line = reply.line_with_prefix("STATE:").expect("line");
        assert!(line.contains("IP STATUS"));
    }

    #[test]
    fn test_outcome_helpers() {
        assert_eq!(Outcome::Matched(2).matched(), Some(2));
        assert!(Outcome::Matched(0).is(0));
        assert!(!Outcome::NoMatch.is(0));
        assert_eq!(Exchange::io_error("gone").outcome, Outcome::IoError("gone".into()));
    }

    #[test]
    fn test_require() {
        let matched = Exchange {
            reply: block(&["OK"]),
            outcome: Outcome::Matched(0),
        };
        assert!(matched.require("AT").is_ok());

        let rejected = Exchange {
            reply: block(&["ERROR"]),
            outcome: Outcome::NoMatch,
        };
        assert!(matches!(
            rejected.require("AT"),
            Err(Error::Rejected { ref reason, .. }) if reason == "ERROR"
        ));

        let silent = Exchange {
            reply: ReplyBlock::new(),
            outcome: Outcome::NoMatch,
        };
        assert!(matches!(
            silent.require("AT"),
            Err(Error::Rejected { ref reason, .. }) if reason == "no reply"
        ));

        assert!(matches!(Exchange::io_error("gone").require("AT"), Err(Error::Io(_))));
    }
}
