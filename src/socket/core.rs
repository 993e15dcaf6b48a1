//! Core Socket struct, lifecycle and accessors.

use std::fmt;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::modem::SocketOptions;
use crate::protocol::{Command, Exchange, Framing, Transaction};
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Indication the device sends when the peer closes the connection.
pub(crate) const CLOSED_INDICATION: &str = "CLOSED";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Lifecycle of a TCP session.
///
/// ```text
/// Closed ──► Connecting ──► Open ──► Closing ──► Closed
///                │                                  ▲
///                └────────────── failure ───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketState {
    /// No session.
    #[default]
    Closed,
    /// Resolving and connecting.
    Connecting,
    /// Ready for reads and writes.
    Open,
    /// Disconnect in progress.
    Closing,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received from the peer.
    Data(Vec<u8>),
    /// The session is open but nothing is waiting right now.
    NoData,
}

impl ReadOutcome {
    /// Returns `true` for [`ReadOutcome::NoData`].
    #[inline]
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }

    /// Returns the bytes read; empty for [`ReadOutcome::NoData`].
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Data(bytes) => bytes,
            Self::NoData => Vec::new(),
        }
    }
}

// ============================================================================
// Socket
// ============================================================================

/// A TCP session carried over the modem's command channel.
///
/// Only one session exists per modem at a time. Dropping an open socket
/// releases its indication but leaves the device-side connection to the
/// next `AT+CIPCLOSE` or `AT+CIPSHUT`; prefer [`close`](Self::close).
///
/// # Cancellation
///
/// Every wait on a reply also watches the socket's cancellation token.
/// Once it fires, pending and later connects, reads and writes return
/// [`Error::Cancelled`](crate::Error::Cancelled); [`close`](Self::close)
/// still runs.
pub struct Socket {
    pub(crate) connection: Connection,
    pub(crate) options: SocketOptions,
    pub(crate) host: String,
    pub(crate) remote: SocketAddrV4,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) state: SocketState,
    pub(crate) remote_closed: Arc<AtomicBool>,
    pub(crate) cancel: CancellationToken,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("host", &self.host)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Socket - Accessors
// ============================================================================

impl Socket {
    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Returns `true` while reads and writes are allowed.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Returns the resolved remote address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddrV4 {
        self.remote
    }

    /// Returns the host as given to connect.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the negotiated chunk size, once the first write happened.
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    /// Returns `true` once the peer has closed the connection.
    ///
    /// Data received before the close can still be read.
    #[inline]
    #[must_use]
    pub fn is_remote_closed(&self) -> bool {
        self.remote_closed.load(Ordering::SeqCst)
    }

    /// Returns the token that cancels this socket's waits.
    ///
    /// Clone it into another task to interrupt a blocked read or write.
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

// ============================================================================
// Socket - Close
// ============================================================================

impl Socket {
    /// Closes the session.
    ///
    /// The session is released whatever the device answers. Closing a
    /// closed socket does nothing.
    pub async fn close(&mut self) {
        if self.state == SocketState::Closed {
            return;
        }
        self.state = SocketState::Closing;

        let reply = self
            .connection
            .execute(
                Transaction::command(Command::CloseTcp)
                    .timeout(CLOSE_TIMEOUT)
                    .framing(Framing::terminal(["CLOSE OK", "ERROR"]))
                    .expect(["CLOSE OK"]),
            )
            .await;
        match reply {
            Ok(exchange) if exchange.outcome.is(0) => debug!(remote = %self.remote, "Close acknowledged"),
            Ok(exchange) => debug!(reply = %exchange.reply, "Close not acknowledged"),
            Err(e) => debug!(error = %e, "Close not sent"),
        }

        self.release();
        info!(remote = %self.remote, "Socket closed");
    }

    /// Marks the session closed and drops the close indication.
    pub(crate) fn release(&mut self) {
        self.connection.cancel_indication(CLOSED_INDICATION);
        self.state = SocketState::Closed;
    }

    /// Runs a transaction, turning channel failures and cancellation into errors.
    pub(crate) async fn exchange(&self, transaction: Transaction) -> Result<Exchange> {
        let exchange = self
            .connection
            .execute_with_cancel(transaction, &self.cancel)
            .await?;
        exchange.check_io()?;
        Ok(exchange)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.state != SocketState::Closed {
            warn!(remote = %self.remote, state = %self.state, "Socket dropped without close");
            self.connection.cancel_indication(CLOSED_INDICATION);
        }
    }
}

#[cfg(test)]
impl Socket {
    /// An open session to 203.0.113.5:80 with default options.
    pub(crate) fn open_for_test(connection: Connection) -> Self {
        let remote_closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&remote_closed);
        let registered = connection
            .register_indication(CLOSED_INDICATION, move |_| flag.store(true, Ordering::SeqCst));
        assert!(registered.is_ok());
        Self {
            connection,
            options: SocketOptions::default(),
            host: "203.0.113.5".into(),
            remote: SocketAddrV4::new(std::net::Ipv4Addr::new(203, 0, 113, 5), 80),
            chunk_size: None,
            state: SocketState::Open,
            remote_closed,
            cancel: CancellationToken::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::{FakeModem, Input, Response};

    fn close_ok(input: &Input) -> Response {
        match input.command() {
            Some("AT+CIPCLOSE") => Response::lines(&["CLOSE OK"]),
            _ => Response::silent(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_session() {
        let (connection, fake) = FakeModem::spawn(close_ok);
        let mut socket = Socket::open_for_test(connection.clone());

        socket.close().await;

        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(fake.commands(), vec!["AT+CIPCLOSE"]);
        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_twice_is_noop() {
        let (connection, fake) = FakeModem::spawn(close_ok);
        let mut socket = Socket::open_for_test(connection);

        socket.close().await;
        socket.close().await;

        assert_eq!(fake.commands(), vec!["AT+CIPCLOSE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_released_when_device_refuses() {
        let (connection, _fake) = FakeModem::spawn(|_| Response::lines(&["ERROR"]));
        let mut socket = Socket::open_for_test(connection);

        socket.close().await;

        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_indication_sets_flag() {
        let (connection, fake) = FakeModem::spawn(|_| Response::silent());
        let socket = Socket::open_for_test(connection.clone());

        fake.push_line("CLOSED");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(socket.is_remote_closed());
        assert!(socket.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_indication() {
        let (connection, _fake) = FakeModem::spawn(|_| Response::silent());
        let socket = Socket::open_for_test(connection.clone());

        drop(socket);

        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_socket_still_closes() {
        let (connection, fake) = FakeModem::spawn(close_ok);
        let mut socket = Socket::open_for_test(connection);
        socket.cancel_token().cancel();

        let err = socket.read(16).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());

        socket.close().await;
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(fake.commands(), vec!["AT+CIPCLOSE"]);
    }

    #[test]
    fn test_read_outcome() {
        assert!(ReadOutcome::NoData.is_no_data());
        assert!(ReadOutcome::NoData.into_bytes().is_empty());
        assert_eq!(ReadOutcome::Data(b"hi".to_vec()).into_bytes(), b"hi");
    }
}
