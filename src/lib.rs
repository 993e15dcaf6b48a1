//! atlink - TCP over the AT command channel of SIMCom cellular modems.
//!
//! This library turns the single, half-duplex, line-oriented serial channel
//! of a SIM7000-family modem into a usable network transport: it frames
//! replies that carry no length prefix, runs bring-up chat scripts with
//! retry and abort semantics, and layers a TCP socket on top.
//!
//! # Architecture
//!
//! One spawned task owns the serial stream:
//!
//! - **Callers** submit transactions (one command, one framed reply)
//! - **Event loop** writes them one at a time and frames each reply
//! - **Indications** (unsolicited lines such as `CLOSED`) are routed by
//!   prefix to handlers instead of the pending reply
//!
//! Key design principles:
//!
//! - Exactly one reader of the device; no second reader ever races it
//! - Every wait has a deadline; cancellation is distinct from timeout
//! - Device misbehavior yields classified errors carrying the literal reply
//!
//! # Quick Start
//!
//! ```no_run
//! use atlink::{Modem, ReadOutcome, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let modem = Modem::builder()
//!         .serial_port("/dev/ttyS0")
//!         .apn("internet")
//!         .open()
//!         .await?;
//!
//!     let mut socket = modem.connect("example.com:http").await?;
//!     socket.write(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").await?;
//!
//!     if let ReadOutcome::Data(bytes) = socket.read(1460).await? {
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!
//!     socket.close().await;
//!     modem.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`chat`] | Chat scripts: [`ChatScript`], [`CommandStep`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`modem`] | [`Modem`], [`ModemBuilder`], [`Settings`] |
//! | [`protocol`] | Commands, transactions, reply blocks, state parsing |
//! | [`socket`] | TCP sessions: [`Socket`] |
//! | [`transport`] | Event loop and indication routing |

// ============================================================================
// Modules
// ============================================================================

/// Chat scripts with retries and abort terms.
pub mod chat;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Modem bring-up, configuration and teardown.
///
/// Use [`Modem::builder()`] to open a device.
pub mod modem;

/// AT command vocabulary and reply grammar.
pub mod protocol;

/// TCP sessions over the command channel.
pub mod socket;

/// Serial transport: event loop, framing, indications.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Chat scripts
pub use chat::{ChatScript, CommandStep};

// Error types
pub use error::{Error, Result};

// Modem types
pub use modem::{Modem, ModemBuilder, Settings, SocketOptions};

// Protocol types
pub use protocol::{
    Command, ConnectionState, Exchange, Framing, Line, Outcome, ReplyBlock, Transaction,
    parse_state,
};

// Socket types
pub use socket::{ReadOutcome, Socket, SocketState};

// Transport types
pub use transport::{Connection, Indication};
