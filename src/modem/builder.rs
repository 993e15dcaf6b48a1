//! Builder pattern for modem configuration.
//!
//! Provides a fluent API for configuring and opening [`Modem`] instances.
//!
//! # Example
//!
//! ```no_run
//! use atlink::Modem;
//!
//! # async fn example() -> atlink::Result<()> {
//! let modem = Modem::builder()
//!     .serial_port("/dev/ttyUSB2")
//!     .apn("iot.example")
//!     .dns("8.8.8.8", Some("1.1.1.1"))
//!     .open()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatScript;
use crate::error::{Error, Result};
use crate::transport::Connection;

use super::core::Modem;
use super::settings::{Settings, SocketOptions};

// ============================================================================
// ModemBuilder
// ============================================================================

/// Builder for configuring a [`Modem`] instance.
///
/// Use [`Modem::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ModemBuilder {
    /// Accumulated settings.
    settings: Settings,

    /// Token handed to the modem.
    cancel: CancellationToken,
}

// ============================================================================
// ModemBuilder Implementation
// ============================================================================

impl ModemBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all settings, e.g. with ones loaded from JSON.
    #[inline]
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the serial device path.
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyS0")
    #[inline]
    #[must_use]
    pub fn serial_port(mut self, path: impl Into<String>) -> Self {
        self.settings.serial_port = path.into();
        self
    }

    /// Sets the serial line speed.
    #[inline]
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Sets the access point name.
    #[inline]
    #[must_use]
    pub fn apn(mut self, apn: impl Into<String>) -> Self {
        self.settings.apn = apn.into();
        self
    }

    /// Sets the APN credentials.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.username = username.into();
        self.settings.password = password.into();
        self
    }

    /// Sets the SIM PIN.
    #[inline]
    #[must_use]
    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.settings.pin = Some(pin.into());
        self
    }

    /// Sets the DNS servers applied after bring-up.
    #[inline]
    #[must_use]
    pub fn dns(mut self, primary: impl Into<String>, secondary: Option<&str>) -> Self {
        self.settings = self.settings.with_dns(primary, secondary);
        self
    }

    /// Sets the delay before each bring-up step.
    #[inline]
    #[must_use]
    pub fn step_delay_ms(mut self, delay_ms: u64) -> Self {
        self.settings.step_delay_ms = Some(delay_ms);
        self
    }

    /// Replaces the built-in bring-up script.
    #[inline]
    #[must_use]
    pub fn chat_script(mut self, script: ChatScript) -> Self {
        self.settings.chat_script = Some(script);
        self
    }

    /// Sets the socket layer tuning.
    #[inline]
    #[must_use]
    pub fn socket(mut self, socket: SocketOptions) -> Self {
        self.settings.socket = socket;
        self
    }

    /// Sets the token that stops the modem, its bring-up included.
    #[inline]
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Opens the serial device, brings the bearer up and returns the modem.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the settings are invalid
    /// - [`Error::Serial`] if the device cannot be opened
    /// - [`Error::Script`] if bring-up failed
    pub async fn open(self) -> Result<Modem> {
        self.validate_serial_port()?;
        self.validate_settings()?;

        let settings = &self.settings;
        let stream = tokio_serial::new(&settings.serial_port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        info!(
            port = %settings.serial_port,
            baud_rate = settings.baud_rate,
            "Serial port opened"
        );

        self.open_with_stream(stream).await
    }

    /// Brings up a modem reachable over an already open stream.
    ///
    /// The serial port settings are ignored. The stream is closed again if
    /// bring-up fails.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the settings are invalid
    /// - [`Error::Script`] if bring-up failed
    /// - [`Error::Cancelled`] if the token fired first
    pub async fn open_with_stream<S>(self, stream: S) -> Result<Modem>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.validate_settings()?;

        let modem = Modem::with_cancel(Connection::spawn(stream), self.settings, self.cancel);
        if let Err(e) = modem.prepare().await {
            warn!(error = %e, "Modem bring-up failed");
            modem.connection().shutdown();
            return Err(e);
        }

        debug!(?modem, "Modem ready");
        Ok(modem)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ModemBuilder {
    /// Validates the serial device path.
    fn validate_serial_port(&self) -> Result<()> {
        if self.settings.serial_port.trim().is_empty() {
            return Err(Error::config(
                "Serial port is required. Use .serial_port() to set it.\n\
                 Example: Modem::builder().serial_port(\"/dev/ttyS0\")",
            ));
        }
        Ok(())
    }

    /// Validates everything else.
    fn validate_settings(&self) -> Result<()> {
        self.settings.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================
