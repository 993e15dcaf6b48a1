//! AT command definitions.
//!
//! Commands render to the exact text written to the device, without the
//! trailing carriage return (the transport appends it).
//!
//! # Command Groups
//!
//! | Group | Commands |
//! |-------|----------|
//! | Basic | `AT`, `ATE0`, `AT+CFUN`, `AT+CSQ`, `AT+CPIN` |
//! | Bearer | `AT+CSTT`, `AT+CIICR`, `AT+CIFSR`, `AT+CIPSTATUS` |
//! | DNS | `AT+CDNSCFG`, `AT+CDNSGIP` |
//! | TCP | `AT+CIPSTART`, `AT+CIPSEND`, `AT+CIPRXGET`, `AT+CIPCLOSE`, `AT+CIPSHUT` |
//! | Filesystem | `AT+CFSINIT`, `AT+CFSWFILE`, `AT+CFSTERM` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::Ipv4Addr;

// ============================================================================
// Command
// ============================================================================

/// A command understood by SIMCom SIM7000-family modems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AT` attention check.
    Attention,
    /// `ATE0` disables command echo.
    EchoOff,
    /// `AT+CFUN=1,1` full functionality with reset.
    Reset,
    /// `AT+CSQ` signal quality.
    SignalQuality,
    /// `AT+CPIN?` SIM status.
    PinStatus,
    /// `AT+CPIN="<pin>"` unlocks the SIM.
    PinEnter {
        /// SIM PIN.
        pin: String,
    },

    /// `AT+CSTT?` current APN.
    ApnQuery,
    /// `AT+CSTT=...` sets APN and optional credentials.
    ApnSet {
        /// Access point name.
        apn: String,
        /// Username, may be empty.
        username: String,
        /// Password, may be empty.
        password: String,
    },
    /// `AT+CIICR` brings up the wireless connection.
    BringUp,
    /// `AT+CIFSR` local IP address.
    LocalAddress,
    /// `AT+CIPSTATUS` IP session state.
    IpStatus,

    /// `AT+CDNSCFG?` configured DNS servers.
    DnsConfigQuery,
    /// `AT+CDNSCFG=<primary>[,<secondary>]`.
    DnsConfigSet {
        /// Primary server.
        primary: String,
        /// Optional secondary server.
        secondary: Option<String>,
    },
    /// `AT+CDNSGIP="<host>"` resolves a host name.
    Resolve {
        /// Host name to resolve.
        host: String,
    },

    /// `AT+CIPRXGET=1` switches to manual receive mode.
    ManualReceive,
    /// `AT+CIPSTART="TCP","<ip>",<port>`.
    StartTcp {
        /// Remote address.
        ip: Ipv4Addr,
        /// Remote port.
        port: u16,
    },
    /// `AT+CIPSEND?` maximum bytes per send.
    SendSizeQuery,
    /// `AT+CIPSEND=<len>` announces a chunk.
    Send {
        /// Chunk length in bytes.
        len: usize,
    },
    /// `AT+CIPRXGET=4` bytes waiting to be read.
    PendingQuery,
    /// `AT+CIPRXGET=2,<len>` fetches received bytes.
    Fetch {
        /// Maximum bytes to fetch.
        len: usize,
    },
    /// `AT+CIPCLOSE` closes the TCP connection.
    CloseTcp,
    /// `AT+CIPSHUT` deactivates the bearer.
    Shutdown,

    /// `AT+CFSINIT` opens the filesystem buffer.
    FsInit,
    /// `AT+CFSWFILE=3,"<name>",0,<len>,<timeout_ms>` writes a file.
    FsWrite {
        /// File name in the customer directory.
        name: String,
        /// Number of bytes that will follow.
        len: usize,
        /// Input timeout on the device side.
        timeout_ms: u64,
    },
    /// `AT+CFSTERM` releases the filesystem buffer.
    FsTerm,

    /// Any other command, written verbatim.
    Raw(String),
}

impl Command {
    /// Creates a raw command.
    #[inline]
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::raw(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::Raw(text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attention => f.write_str("AT"),
            Self::EchoOff => f.write_str("ATE0"),
            Self::Reset => f.write_str("AT+CFUN=1,1"),
            Self::SignalQuality => f.write_str("AT+CSQ"),
            Self::PinStatus => f.write_str("AT+CPIN?"),
            Self::PinEnter { pin } => write!(f, "AT+CPIN=\"{pin}\""),

            Self::ApnQuery => f.write_str("AT+CSTT?"),
            Self::ApnSet {
                apn,
                username,
                password,
            } => {
                if username.is_empty() && password.is_empty() {
                    write!(f, "AT+CSTT=\"{apn}\"")
                } else {
                    write!(f, "AT+CSTT=\"{apn}\",\"{username}\",\"{password}\"")
                }
            }
            Self::BringUp => f.write_str("AT+CIICR"),
            Self::LocalAddress => f.write_str("AT+CIFSR"),
            Self::IpStatus => f.write_str("AT+CIPSTATUS"),

            Self::DnsConfigQuery => f.write_str("AT+CDNSCFG?"),
            Self::DnsConfigSet { primary, secondary } => match secondary {
                Some(secondary) => write!(f, "AT+CDNSCFG={primary},{secondary}"),
                None => write!(f, "AT+CDNSCFG={primary}"),
            },
            Self::Resolve { host } => write!(f, "AT+CDNSGIP=\"{host}\""),

            Self::ManualReceive => f.write_str("AT+CIPRXGET=1"),
            Self::StartTcp { ip, port } => write!(f, "AT+CIPSTART=\"TCP\",\"{ip}\",{port}"),
            Self::SendSizeQuery => f.write_str("AT+CIPSEND?"),
            Self::Send { len } => write!(f, "AT+CIPSEND={len}"),
            Self::PendingQuery => f.write_str("AT+CIPRXGET=4"),
            Self::Fetch { len } => write!(f, "AT+CIPRXGET=2,{len}"),
            Self::CloseTcp => f.write_str("AT+CIPCLOSE"),
            Self::Shutdown => f.write_str("AT+CIPSHUT"),

            Self::FsInit => f.write_str("AT+CFSINIT"),
            Self::FsWrite {
                name,
                len,
                timeout_ms,
            } => write!(f, "AT+CFSWFILE=3,\"{name}\",0,{len},{timeout_ms}"),
            Self::FsTerm => f.write_str("AT+CFSTERM"),

            Self::Raw(text) => f.write_str(text),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
