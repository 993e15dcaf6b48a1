//! Chunked writes through `AT+CIPSEND`.
//!
//! Each chunk is announced with its exact length, written raw after the
//! `>` prompt and acknowledged with `SEND OK` within a bounded number of
//! lines. The chunk size is asked once per session.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::parse::parse_send_size;
use crate::protocol::{Command, DATA_PROMPT, Framing, Transaction};

use super::core::{Socket, SocketState};

// ============================================================================
// Socket - Write
// ============================================================================

impl Socket {
    /// Writes all of `data`, returning the number of bytes acknowledged.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the session is not open or the peer closed it
    /// - [`Error::Config`] if no chunk size was reported and the default is zero
    /// - [`Error::FlowControl`] if the device did not offer the data prompt
    /// - [`Error::SendFailed`] if a chunk was not acknowledged
    ///
    /// The last two carry the bytes acknowledged before the failing chunk.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != SocketState::Open || self.is_remote_closed() {
            return Err(Error::SessionClosed);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.negotiate_chunk_size().await?;
        let mut flushed = 0;
        for chunk in data.chunks(chunk_size) {
            self.send_chunk(chunk, flushed).await?;
            flushed += chunk.len();
            trace!(flushed, total = data.len(), "Chunk acknowledged");
        }

        debug!(bytes = flushed, chunks = data.len().div_ceil(chunk_size), "Write complete");
        Ok(flushed)
    }

    /// Asks `AT+CIPSEND?` once; falls back to the configured default.
    async fn negotiate_chunk_size(&mut self) -> Result<usize> {
        if let Some(size) = self.chunk_size {
            return Ok(size);
        }

        let exchange = self
            .exchange(
                Transaction::command(Command::SendSizeQuery)
                    .timeout(self.options.read_timeout())
                    .framing(Framing::standard()),
            )
            .await?;
        let size = parse_send_size(&exchange.reply).unwrap_or_else(|| {
            debug!(
                reply = %exchange.reply,
                fallback = self.options.default_chunk_size,
                "No chunk size reported"
            );
            self.options.default_chunk_size
        });

        if size == 0 {
            return Err(Error::config("socket.default_chunk_size must be non-zero"));
        }

        self.chunk_size = Some(size);
        Ok(size)
    }

    async fn send_chunk(&self, chunk: &[u8], flushed: usize) -> Result<()> {
        let command = Command::Send { len: chunk.len() };
        let label = command.to_string();

        let prompt = self
            .exchange(
                Transaction::command(command)
                    .timeout(self.options.prompt_timeout())
                    .framing(Framing::prompt())
                    .expect([char::from(DATA_PROMPT).to_string()]),
            )
            .await?;
        if !prompt.outcome.is(0) {
            return Err(Error::FlowControl {
                command: label,
                reply: prompt.reply.to_string(),
                flushed,
            });
        }

        let ack = self
            .exchange(
                Transaction::raw(chunk)
                    .timeout(self.options.ack_timeout())
                    .framing(
                        Framing::terminal(["SEND OK", "SEND FAIL"])
                            .with_max_lines(self.options.send_ack_lines),
                    )
                    .expect(["SEND OK"]),
            )
            .await?;
        if !ack.outcome.is(0) {
            return Err(Error::SendFailed {
                flushed,
                reply: ack.reply.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
