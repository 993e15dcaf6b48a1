//! Modem and socket configuration.
//!
//! [`Settings`] is a plain value passed to the modem at open time. It can be
//! built in code with the `with_*` methods or loaded from JSON; missing JSON
//! fields take their defaults.
//!
//! # Example
//!
//! ```ignore
//! use atlink::Settings;
//!
//! let settings = Settings::new()
//!     .with_serial_port("/dev/ttyUSB2")
//!     .with_apn("iot.example")
//!     .with_dns("8.8.8.8", Some("1.1.1.1"));
//!
//! settings.validate()?;
//! ```
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `serial_port` | `/dev/ttyS0` |
//! | `baud_rate` | 115200 |
//! | `apn` | `internet` |
//! | `command_timeout_ms` | 1000 |
//! | `socket.max_resends` | 10 |
//! | `socket.default_chunk_size` | 1460 |

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::ChatScript;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Longest APN, username or password the device accepts.
pub const MAX_CREDENTIAL_LEN: usize = 50;

/// Chunk size used when the device does not report one.
pub const DEFAULT_CHUNK_SIZE: usize = 1460;

const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS0";
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_APN: &str = "internet";

// ============================================================================
// SocketOptions
// ============================================================================

/// Tuning of the TCP socket layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// Attempts for connect and name resolution when the reply is garbage.
    pub max_resends: usize,
    /// Chunk size when `AT+CIPSEND?` gives no usable answer.
    pub default_chunk_size: usize,
    /// Non-blank lines scanned for the send acknowledgement.
    pub send_ack_lines: usize,
    /// Reply window of one connect attempt.
    pub connect_timeout_ms: u64,
    /// Reply window of one name resolution attempt.
    pub dns_timeout_ms: u64,
    /// Wait for the `>` data prompt.
    pub prompt_timeout_ms: u64,
    /// Wait for `SEND OK` after a chunk.
    pub ack_timeout_ms: u64,
    /// Reply window of the pending-count query and the fetch.
    pub read_timeout_ms: u64,
    /// Largest fetch per read.
    pub fetch_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            max_resends: 10,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            send_ack_lines: 5,
            connect_timeout_ms: 2000,
            dns_timeout_ms: 5000,
            prompt_timeout_ms: 1000,
            ack_timeout_ms: 5000,
            read_timeout_ms: 1000,
            fetch_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SocketOptions {
    #[inline]
    #[must_use]
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub(crate) fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub(crate) fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub(crate) fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub(crate) fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Checks the values the socket layer divides or loops by.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero resend count, chunk size, fetch
    /// size or acknowledgement scan.
    pub fn validate(&self) -> Result<()> {
        if self.max_resends == 0 {
            return Err(Error::config("socket.max_resends must be at least 1"));
        }
        if self.default_chunk_size == 0 || self.fetch_size == 0 {
            return Err(Error::config(
                "socket.default_chunk_size and socket.fetch_size must be non-zero",
            ));
        }
        if self.send_ack_lines == 0 {
            return Err(Error::config("socket.send_ack_lines must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Everything needed to open and bring up a modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial device path.
    pub serial_port: String,
    /// Serial line speed, 8N1.
    pub baud_rate: u32,

    /// Access point name.
    pub apn: String,
    /// APN username, may be empty.
    pub username: String,
    /// APN password, may be empty.
    pub password: String,
    /// SIM PIN, entered during bring-up when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    /// Primary DNS server applied after bring-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_primary: Option<String>,
    /// Secondary DNS server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_secondary: Option<String>,

    /// Reply window of single modem-level commands.
    pub command_timeout_ms: u64,
    /// Delay before each bring-up step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_delay_ms: Option<u64>,
    /// Replaces the built-in bring-up script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_script: Option<ChatScript>,

    /// Socket layer tuning.
    pub socket: SocketOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            apn: DEFAULT_APN.to_string(),
            username: String::new(),
            password: String::new(),
            pin: None,
            dns_primary: None,
            dns_secondary: None,
            command_timeout_ms: 1000,
            step_delay_ms: None,
            chat_script: None,
            socket: SocketOptions::default(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Settings {
    /// Creates settings with the defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not valid settings JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] if its content is not valid settings JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Settings {
    /// Sets the serial device path.
    #[inline]
    #[must_use]
    pub fn with_serial_port(mut self, path: impl Into<String>) -> Self {
        self.serial_port = path.into();
        self
    }

    /// Sets the serial line speed.
    #[inline]
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the access point name.
    #[inline]
    #[must_use]
    pub fn with_apn(mut self, apn: impl Into<String>) -> Self {
        self.apn = apn.into();
        self
    }

    /// Sets the APN credentials.
    #[inline]
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the SIM PIN.
    #[inline]
    #[must_use]
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    /// Sets the DNS servers.
    #[inline]
    #[must_use]
    pub fn with_dns(mut self, primary: impl Into<String>, secondary: Option<&str>) -> Self {
        self.dns_primary = Some(primary.into());
        self.dns_secondary = secondary.map(str::to_string);
        self
    }

    /// Sets the reply window of modem-level commands.
    #[inline]
    #[must_use]
    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = timeout_ms;
        self
    }

    /// Sets the delay before each bring-up step.
    #[inline]
    #[must_use]
    pub fn with_step_delay_ms(mut self, delay_ms: u64) -> Self {
        self.step_delay_ms = Some(delay_ms);
        self
    }

    /// Replaces the built-in bring-up script.
    #[inline]
    #[must_use]
    pub fn with_chat_script(mut self, script: ChatScript) -> Self {
        self.chat_script = Some(script);
        self
    }

    /// Sets the socket layer tuning.
    #[inline]
    #[must_use]
    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Settings {
    /// Returns the reply window of modem-level commands.
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.serial_port.trim().is_empty() {
            return Err(Error::config("serial_port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(Error::config("baud_rate must be non-zero"));
        }

        for (name, value) in [
            ("apn", &self.apn),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.len() > MAX_CREDENTIAL_LEN {
                return Err(Error::config(format!(
                    "{name} is {} characters, the device accepts at most {MAX_CREDENTIAL_LEN}",
                    value.len()
                )));
            }
            if value.contains('"') {
                return Err(Error::config(format!("{name} must not contain '\"'")));
            }
        }
        if self.apn.is_empty() {
            return Err(Error::config("apn must not be empty"));
        }

        if self.dns_secondary.is_some() && self.dns_primary.is_none() {
            return Err(Error::config(
                "dns_secondary requires dns_primary to be set",
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(Error::config("command_timeout_ms must be non-zero"));
        }

        self.socket.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::new();
        assert_eq!(settings.serial_port, "/dev/ttyS0");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.apn, "internet");
        assert_eq!(settings.socket.max_resends, 10);
        assert_eq!(settings.socket.default_chunk_size, 1460);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let settings = Settings::new()
            .with_serial_port("/dev/ttyUSB2")
            .with_apn("iot.example")
            .with_credentials("user", "secret")
            .with_pin("1234")
            .with_dns("8.8.8.8", Some("1.1.1.1"));

        assert_eq!(settings.serial_port, "/dev/ttyUSB2");
        assert_eq!(settings.username, "user");
        assert_eq!(settings.pin.as_deref(), Some("1234"));
        assert_eq!(settings.dns_secondary.as_deref(), Some("1.1.1.1"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_long_apn_rejected() {
        let settings = Settings::new().with_apn("a".repeat(MAX_CREDENTIAL_LEN + 1));
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, Error::Config { ref message } if message.contains("apn")));
    }

    #[test]
    fn test_long_password_rejected() {
        let settings = Settings::new().with_credentials("user", "p".repeat(51));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_serial_port_rejected() {
        assert!(Settings::new().with_serial_port("").validate().is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let socket = SocketOptions {
            default_chunk_size: 0,
            ..SocketOptions::default()
        };
        assert!(Settings::new().with_socket(socket).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            Settings::from_json_str(r#"{"apn": "iot.example", "socket": {"max_resends": 3}}"#)
                .expect("parse");

        assert_eq!(settings.apn, "iot.example");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.socket.max_resends, 3);
        assert_eq!(settings.socket.default_chunk_size, 1460);
    }

    #[test]
    fn test_json_with_custom_script() {
        let json = r#"{
            "chat_script": {
                "aborts": ["ERROR"],
                "steps": [{"command": "AT", "expect": "OK", "retries": 3}]
            }
        }"#;
        let settings = Settings::from_json_str(json).expect("parse");
        let script = settings.chat_script.expect("script");
        assert_eq!(script.steps.len(), 1);
        assert_eq!(script.steps[0].retries, 3);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Settings::from_json_str("{not json"),
            Err(Error::Json(_))
        ));
    }
}
