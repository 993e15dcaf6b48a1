//! Polling reads through `AT+CIPRXGET`.
//!
//! The device buffers received data in manual mode. A read first asks how
//! many bytes are waiting (`AT+CIPRXGET=4`) and only fetches
//! (`AT+CIPRXGET=2,<n>`) when there are some.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::parse::{parse_fetch, parse_pending_count};
use crate::protocol::{Command, Framing, Transaction};

use super::core::{ReadOutcome, Socket, SocketState};

// ============================================================================
// Socket - Read
// ============================================================================

impl Socket {
    /// Reads up to `max_bytes` received bytes.
    ///
    /// [`ReadOutcome::NoData`] means the session is open and nothing is
    /// waiting; it never changes the session state. Once the peer has
    /// closed the connection, buffered data is still returned and the
    /// session is closed when the buffer is empty.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the session is not open, or the peer
    ///   closed it and nothing is left to read
    /// - [`Error::Protocol`] if a reply is missing its markers
    pub async fn read(&mut self, max_bytes: usize) -> Result<ReadOutcome> {
        if self.state != SocketState::Open {
            return Err(Error::SessionClosed);
        }
        if max_bytes == 0 {
            return Ok(ReadOutcome::Data(Vec::new()));
        }

        let pending = match self.pending().await {
            Ok(pending) => pending,
            Err(_) if self.is_remote_closed() => 0,
            Err(e) => return Err(e),
        };

        if pending == 0 {
            if self.is_remote_closed() {
                self.release();
                info!(remote = %self.remote, "Peer closed the connection");
                return Err(Error::SessionClosed);
            }
            return Ok(ReadOutcome::NoData);
        }

        let len = max_bytes.min(pending).min(self.options.fetch_size);
        let exchange = self
            .exchange(
                Transaction::command(Command::Fetch { len })
                    .timeout(self.options.read_timeout())
                    .framing(Framing::standard()),
            )
            .await?;
        let data = parse_fetch(&exchange.reply)?;
        debug!(requested = len, received = data.len(), pending, "Fetched");

        if data.is_empty() {
            return Ok(ReadOutcome::NoData);
        }
        Ok(ReadOutcome::Data(data))
    }

    async fn pending(&self) -> Result<usize> {
        let exchange = self
            .exchange(
                Transaction::command(Command::PendingQuery)
                    .timeout(self.options.read_timeout())
                    .framing(Framing::standard()),
            )
            .await?;
        parse_pending_count(&exchange.reply)
    }
}

// ============================================================================
// Tests
// ============================================================================
