//! Modem command channel transport.
//!
//! This module owns the byte stream to the modem and turns it into
//! transactions and indications.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌──────────────────┐
//! │  Callers         │   Transaction / reply   │  Event loop      │
//! │  (Modem, Socket, │◄───────────────────────►│  ReplyCodec      │◄──── serial bytes
//! │   ChatScript)    │                         │  PendingReply    │────► serial bytes
//! │                  │◄─────── indications ────│  Indications     │
//! └──────────────────┘                         └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Byte stream to lines and prompts |
//! | `framer` | Reply block completion rules |
//! | `indication` | Prefix routing of unsolicited lines |
//! | `connection` | Event loop and public channel handle |

// ============================================================================
// Submodules
// ============================================================================

/// Line and prompt decoder.
pub mod codec;

/// Command channel and event loop.
pub mod connection;

/// Reply block under construction.
pub mod framer;

/// Unsolicited indication routing.
pub mod indication;

/// Scripted fake modem for tests.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Frame, ReplyCodec};
pub use connection::Connection;
pub use indication::{Indication, IndicationHandler};
