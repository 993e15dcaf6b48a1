//! TCP sessions over the command channel.
//!
//! A [`Socket`] is built entirely from command transactions: name
//! resolution, `AT+CIPSTART`, chunked `AT+CIPSEND` writes, polled
//! `AT+CIPRXGET` reads and `AT+CIPCLOSE`.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Socket struct, states, accessors, close |
//! | `connect` | Name resolution and connection setup |
//! | `write` | Chunked, acknowledged writes |
//! | `read` | Pending-count polling and fetches |
//!
//! # Example
//!
//! ```ignore
//! let mut socket = modem.connect("203.0.113.5:80").await?;
//!
//! socket.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//!
//! match socket.read(1460).await? {
//!     ReadOutcome::Data(bytes) => println!("{} bytes", bytes.len()),
//!     ReadOutcome::NoData => println!("nothing yet"),
//! }
//!
//! socket.close().await;
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod connect;
mod core;
mod read;
mod write;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{ReadOutcome, Socket, SocketState};
