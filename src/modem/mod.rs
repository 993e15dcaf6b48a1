//! Modem lifecycle.
//!
//! This module opens the serial device, brings the cellular bearer up and
//! hands out TCP sockets.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Modem`] | Open device with an active command channel |
//! | [`ModemBuilder`] | Fluent configuration builder |
//! | [`Settings`] | Serial, APN, DNS and timing configuration |
//! | [`SocketOptions`] | Socket layer tuning |
//!
//! # Example
//!
//! ```no_run
//! use atlink::{Modem, Result};
//!
//! # async fn example() -> Result<()> {
//! let modem = Modem::builder()
//!     .serial_port("/dev/ttyS0")
//!     .apn("internet")
//!     .open()
//!     .await?;
//!
//! println!("{}", modem.current_state().await?);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for modem configuration.
pub mod builder;

/// Core modem implementation.
pub mod core;

/// Module filesystem upload.
pub mod fs;

/// Built-in bring-up script.
pub mod script;

/// Modem and socket settings.
pub mod settings;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ModemBuilder;
pub use core::Modem;
pub use fs::MAX_FILE_SIZE;
pub use script::{BRING_UP_ABORTS, bring_up_script};
pub use settings::{Settings, SocketOptions};
