//! Reply framing for the transaction in flight.
//!
//! A [`PendingReply`] accumulates frames until its [`Framing`] rule says the
//! block is complete. The deadline is enforced by the event loop, which
//! closes the block with whatever has arrived.

// ============================================================================
// Imports
// ============================================================================

use tokio::time::Instant;

use super::codec::Frame;
use crate::protocol::transaction::{is_error_line, is_terminal_line};
use crate::protocol::{Framing, Line, ReplyBlock, Terminator};

// ============================================================================
// PendingReply
// ============================================================================

/// Reply block under construction.
#[derive(Debug)]
pub struct PendingReply {
    framing: Framing,
    deadline: Instant,
    block: ReplyBlock,
    counted: usize,
}

impl PendingReply {
    /// Starts a block that closes at `deadline` at the latest.
    #[must_use]
    pub fn new(framing: Framing, deadline: Instant) -> Self {
        Self {
            framing,
            deadline,
            block: ReplyBlock::new(),
            counted: 0,
        }
    }

    /// Returns the deadline.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the lines received so far.
    #[inline]
    #[must_use]
    pub fn block(&self) -> &ReplyBlock {
        &self.block
    }

    /// Adds a frame; returns `true` once the block is complete.
    pub fn push(&mut self, frame: Frame) -> bool {
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Prompt(byte) => Line::prompt(byte),
        };

        if !line.is_blank() {
            self.counted += 1;
        }
        let complete = self.completes(&line);
        self.block.push(line);
        complete
    }

    /// Consumes the pending reply, returning its block.
    #[inline]
    #[must_use]
    pub fn into_block(self) -> ReplyBlock {
        self.block
    }

    fn completes(&self, line: &Line) -> bool {
        match &self.framing {
            Framing::Deadline => false,
            Framing::Terminal { tokens, max_lines } => {
                is_terminal_line(line, tokens)
                    || max_lines.is_some_and(|max| self.counted >= max)
            }
            Framing::Until(needles) => needles.iter().any(|needle| line.contains(needle)),
            Framing::Prompt(byte) => {
                let is_prompt =
                    line.terminator() == Terminator::None && line.as_bytes() == [*byte];
                is_prompt || is_error_line(line)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(framing: Framing) -> PendingReply {
        PendingReply::new(framing, Instant::now())
    }

    fn frame(text: &str) -> Frame {
        Frame::Line(Line::from(text))
    }

    #[test]
    fn test_deadline_never_completes_early() {
        let mut reply = pending(Framing::Deadline);
        assert!(!reply.push(frame("OK")));
        assert!(!reply.push(frame("ERROR")));
        assert_eq!(reply.into_block().lines().len(), 2);
    }

    #[test]
    fn test_standard_terminal() {
        let mut reply = pending(Framing::standard());
        assert!(!reply.push(frame("")));
        assert!(!reply.push(frame("+CSQ: 20,0")));
        assert!(reply.push(frame("OK")));
    }

    #[test]
    fn test_cme_error_terminates() {
        let mut reply = pending(Framing::standard());
        assert!(reply.push(frame("+CME ERROR: SIM not inserted")));
    }

    #[test]
    fn test_max_lines_ignores_blanks() {
        let mut reply = pending(Framing::terminal(["SEND OK", "SEND FAIL"]).with_max_lines(2));
        assert!(!reply.push(frame("")));
        assert!(!reply.push(frame("noise")));
        assert!(!reply.push(frame("")));
        assert!(reply.push(frame("more noise")));
    }

    #[test]
    fn test_until_matches_substring() {
        let mut reply = pending(Framing::until(["+CDNSGIP:", "ERROR"]));
        assert!(!reply.push(frame("OK")));
        assert!(reply.push(frame("+CDNSGIP: 1,\"a\",\"1.2.3.4\"")));
    }

    #[test]
    fn test_prompt_framing() {
        let mut reply = pending(Framing::prompt());
        assert!(!reply.push(frame("")));
        assert!(!reply.push(frame(">")));
        assert!(reply.push(Frame::Prompt(b'>')));
        assert!(reply.block().contains(">"));

        let mut reply = pending(Framing::prompt());
        assert!(reply.push(frame("ERROR")));
    }
}
