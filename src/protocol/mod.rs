//! AT protocol types.
//!
//! This module defines what is written to the modem and how its replies are
//! read back, independent of the transport that carries them.
//!
//! # Wire Format
//!
//! | Direction | Form |
//! |-----------|------|
//! | Host → Modem | Command text terminated by a single `\r` |
//! | Host → Modem | Raw payload bytes after a `>` prompt |
//! | Modem → Host | Lines terminated by `\r\n` (sometimes bare `\n`) |
//! | Modem → Host | Unterminated `> ` data prompt |
//! | Modem → Host | Unsolicited lines identified by prefix, at any time |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Typed AT commands |
//! | `transaction` | Write plus framed read, framing rules |
//! | `reply` | Lines, reply blocks, outcomes |
//! | `state` | `AT+CIPSTATUS` state decoding |
//! | `parse` | DNS, connect, send and receive reply parsers |

// ============================================================================
// Submodules
// ============================================================================

/// Typed AT commands.
pub mod command;

/// Reply parsers for DNS and TCP commands.
pub mod parse;

/// Reply lines and blocks.
pub mod reply;

/// IP session state.
pub mod state;

/// Transactions and framing rules.
pub mod transaction;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use parse::{ConnectReply, DnsConfig, DnsReply};
pub use reply::{Exchange, Line, Outcome, ReplyBlock, Terminator, render_bytes};
pub use state::{ConnectionState, parse_state};
pub use transaction::{DATA_PROMPT, Framing, Payload, Transaction};
