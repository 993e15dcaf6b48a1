//! Line decoder for the modem byte stream.
//!
//! Splits incoming bytes on `\n`, stripping a preceding `\r`. Line contents
//! are kept as raw bytes. When a data prompt is expected, an unterminated
//! prompt byte at the head of the buffer is emitted as its own frame.

// ============================================================================
// Imports
// ============================================================================

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::protocol::{Line, Terminator};

// ============================================================================
// Constants
// ============================================================================

/// Longest line buffered before it is forced out unterminated.
pub const MAX_LINE: usize = 8192;

// ============================================================================
// Frame
// ============================================================================

/// One decoded unit from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A terminated line (or the unterminated tail at end of stream).
    Line(Line),
    /// An unterminated data prompt.
    Prompt(u8),
}

// ============================================================================
// ReplyCodec
// ============================================================================

/// Decoder producing [`Frame`]s.
#[derive(Debug, Default)]
pub struct ReplyCodec {
    prompt: Option<u8>,
}

impl ReplyCodec {
    /// Creates a decoder that is not watching for a prompt.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prompt byte to recognise, or clears it.
    #[inline]
    pub fn set_prompt(&mut self, prompt: Option<u8>) {
        self.prompt = prompt;
    }

    /// Returns the prompt byte being watched for.
    #[inline]
    #[must_use]
    pub fn prompt(&self) -> Option<u8> {
        self.prompt
    }

    fn take_prompt(&mut self, src: &mut BytesMut) -> Option<Frame> {
        let prompt = self.prompt?;

        if src.first() != Some(&prompt) || src.contains(&b'\n') {
            return None;
        }

        let mut consumed = 1;
        if src.get(consumed) == Some(&b' ') {
            consumed += 1;
        }
        src.advance(consumed);
        self.prompt = None;
        Some(Frame::Prompt(prompt))
    }
}

impl Decoder for ReplyCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(newline) = src.iter().position(|&b| b == b'\n') {
            let mut raw = src.split_to(newline + 1);
            raw.truncate(newline);

            let terminator = if raw.last() == Some(&b'\r') {
                raw.truncate(raw.len() - 1);
                Terminator::CrLf
            } else {
                Terminator::Lf
            };
            return Ok(Some(Frame::Line(Line::with_terminator(
                raw.to_vec(),
                terminator,
            ))));
        }

        if let Some(frame) = self.take_prompt(src) {
            return Ok(Some(frame));
        }

        if src.len() >= MAX_LINE {
            let raw = src.split_to(MAX_LINE);
            return Ok(Some(Frame::Line(Line::with_terminator(
                raw.to_vec(),
                Terminator::None,
            ))));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let raw = src.split_to(src.len());
        Ok(Some(Frame::Line(Line::with_terminator(
            raw.to_vec(),
            Terminator::None,
        ))))
    }
}

// ============================================================================
// Tests
// ============================================================================
