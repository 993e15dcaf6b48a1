//! Error types for atlink.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use atlink::{Modem, Result};
//!
//! async fn example(modem: &Modem) -> Result<()> {
//!     let mut socket = modem.connect("example.com:80").await?;
//!     socket.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     socket.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Channel | [`Error::Serial`], [`Error::Io`], [`Error::ConnectionClosed`] |
//! | Transaction | [`Error::Timeout`], [`Error::Cancelled`], [`Error::Protocol`], [`Error::Rejected`], [`Error::RetriesExhausted`] |
//! | Chat script | [`Error::Aborted`], [`Error::UnexpectedReply`], [`Error::Script`] |
//! | Indications | [`Error::IndicationInUse`] |
//! | Socket | [`Error::SessionClosed`], [`Error::InvalidAddress`], [`Error::FlowControl`], [`Error::SendFailed`], [`Error::PayloadTooLarge`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Variants that originate from the device carry the literal reply text so
/// failures can be diagnosed after the fact.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when modem settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The serial device could not be opened.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The reader task has stopped and the channel can no longer be used.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Transaction Errors
    // ========================================================================
    /// Operation timeout.
    ///
    /// Returned when a wait exceeds its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The caller cancelled the operation while it was waiting.
    #[error("Cancelled: {operation}")]
    Cancelled {
        /// Description of the operation that was cancelled.
        operation: String,
    },

    /// Reply did not follow the grammar of the command that produced it.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The device explicitly rejected a command.
    ///
    /// Never retried: resending cannot fix a semantic rejection.
    #[error("Device rejected {command}: {reason}")]
    Rejected {
        /// Command that was rejected.
        command: String,
        /// Reason reported by the device.
        reason: String,
    },

    /// A bounded resend loop gave up.
    #[error("{command} failed after {attempts} attempts, last reply: {last_reply:?}")]
    RetriesExhausted {
        /// Command that was resent.
        command: String,
        /// Number of attempts made.
        attempts: usize,
        /// Last reply observed, rendered as text.
        last_reply: String,
    },

    // ========================================================================
    // Chat Script Errors
    // ========================================================================
    /// An abort term appeared in a reply.
    #[error("Step {step} ({command}) aborted on {term:?}: {reply:?}")]
    Aborted {
        /// Zero-based index of the step.
        step: usize,
        /// Command of the step.
        command: String,
        /// Abort term that matched.
        term: String,
        /// Reply containing the abort term.
        reply: String,
    },

    /// A step never produced its expected reply.
    #[error("Step {step} ({command}) expected {expected:?}, got {reply:?}")]
    UnexpectedReply {
        /// Zero-based index of the step.
        step: usize,
        /// Command of the step.
        command: String,
        /// Substring the step was waiting for.
        expected: String,
        /// Last reply received.
        reply: String,
    },

    /// A chat script failed; carries everything the device said until then.
    #[error("Chat script failed: {source}")]
    Script {
        /// Reply lines of every executed step, in order.
        transcript: Vec<String>,
        /// The failure that stopped the script.
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // Indication Errors
    // ========================================================================
    /// A handler is already registered for this prefix.
    #[error("Indication prefix already registered: {prefix}")]
    IndicationInUse {
        /// The contested prefix.
        prefix: String,
    },

    // ========================================================================
    // Socket Errors
    // ========================================================================
    /// Operation on a socket that is not open.
    #[error("Session closed")]
    SessionClosed,

    /// Address could not be parsed into host and port.
    #[error("Invalid address: {address}")]
    InvalidAddress {
        /// The address as given.
        address: String,
    },

    /// The device did not offer the data prompt.
    #[error("Device not ready to accept data for {command} after {flushed} bytes: {reply:?}")]
    FlowControl {
        /// Size-announcing command.
        command: String,
        /// Reply received instead of the prompt.
        reply: String,
        /// Bytes acknowledged before this chunk.
        flushed: usize,
    },

    /// A chunk was rejected or never acknowledged.
    #[error("Send failed after {flushed} bytes: {reply:?}")]
    SendFailed {
        /// Bytes acknowledged before the failing chunk.
        flushed: usize,
        /// Lines observed after the chunk was written.
        reply: String,
    },

    /// Payload exceeds a fixed device buffer.
    #[error("Payload of {size} bytes exceeds device limit of {max} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Maximum the device accepts.
        max: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a device rejection error.
    #[inline]
    pub fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a retry exhaustion error.
    #[inline]
    pub fn retries_exhausted(
        command: impl Into<String>,
        attempts: usize,
        last_reply: impl Into<String>,
    ) -> Self {
        Self::RetriesExhausted {
            command: command.into(),
            attempts,
            last_reply: last_reply.into(),
        }
    }

    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    /// Wraps a script failure together with its transcript.
    #[inline]
    pub fn script(transcript: Vec<String>, source: Error) -> Self {
        Self::Script {
            transcript,
            source: Box::new(source),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the underlying failure, looking through [`Error::Script`].
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Script { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the transcript of a failed chat script, if any.
    #[must_use]
    pub fn transcript(&self) -> Option<&[String]> {
        match self {
            Self::Script { transcript, .. } => Some(transcript),
            _ => None,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Returns `true` if the caller cancelled the operation.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled { .. })
    }

    /// Returns `true` if this is a channel error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Serial(_) | Self::Io(_) | Self::ConnectionClosed
        )
    }

    /// Returns `true` if the socket session is no longer usable.
    #[inline]
    #[must_use]
    pub fn is_session_closed(&self) -> bool {
        matches!(self.root(), Self::SessionClosed)
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::Timeout { .. } | Self::RetriesExhausted { .. } | Self::FlowControl { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
