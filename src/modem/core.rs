//! Modem handle: bring-up, state, DNS configuration and teardown.
//!
//! The [`Modem`] owns the [`Connection`] to one device together with the
//! [`Settings`] it was opened with. Sockets borrow its connection.
//!
//! # Example
//!
//! ```no_run
//! use atlink::Modem;
//!
//! # async fn example() -> atlink::Result<()> {
//! let modem = Modem::builder()
//!     .serial_port("/dev/ttyUSB2")
//!     .apn("internet")
//!     .open()
//!     .await?;
//!
//! let mut socket = modem.connect("example.com:http").await?;
//! socket.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//! socket.close().await;
//! modem.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatScript;
use crate::error::Result;
use crate::protocol::parse::parse_dns_config;
use crate::protocol::{
    Command, ConnectionState, DnsConfig, Exchange, Framing, Transaction, parse_state,
};
use crate::socket::Socket;
use crate::transport::{Connection, Indication};

use super::builder::ModemBuilder;
use super::script::bring_up_script;
use super::settings::Settings;

// ============================================================================
// Constants
// ============================================================================

/// Reply window of the teardown commands.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the modem.
pub(crate) struct ModemInner {
    /// Command channel to the device.
    pub connection: Connection,

    /// Settings the modem was opened with.
    pub settings: Settings,

    /// Stops commands, scripts and sockets of this modem.
    pub cancel: CancellationToken,
}

// ============================================================================
// Modem
// ============================================================================

/// A SIMCom modem with an active command channel.
///
/// Cheap to clone; clones share the channel.
///
/// # Cancellation
///
/// Every command goes through the modem's [`CancellationToken`]. Once it is
/// cancelled, pending and later commands fail with [`Error::Cancelled`],
/// and sockets opened by [`connect`](Self::connect) stop too since they
/// hold a child token. [`shutdown`](Self::shutdown) still runs.
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
#[derive(Clone)]
pub struct Modem {
    /// Shared inner state.
    pub(crate) inner: Arc<ModemInner>,
}

impl fmt::Debug for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modem")
            .field("serial_port", &self.inner.settings.serial_port)
            .field("apn", &self.inner.settings.apn)
            .field("closed", &self.inner.connection.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Modem - Construction
// ============================================================================

impl Modem {
    /// Creates a configuration builder for the modem.
    #[inline]
    #[must_use]
    pub fn builder() -> ModemBuilder {
        ModemBuilder::new()
    }

    /// Wraps an already spawned connection. No commands are sent.
    pub(crate) fn new(connection: Connection, settings: Settings) -> Self {
        Self::with_cancel(connection, settings, CancellationToken::new())
    }

    pub(crate) fn with_cancel(
        connection: Connection,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ModemInner {
                connection,
                settings,
                cancel,
            }),
        }
    }

    /// Brings the bearer up unless it already is, then applies DNS settings.
    pub(crate) async fn prepare(&self) -> Result<()> {
        let state = self.current_state().await?;
        if state.is_ready() {
            info!(%state, "Bearer already up, skipping bring-up");
        } else {
            debug!(%state, "Running bring-up");
            self.bring_up().await?;
        }

        if let Some(primary) = &self.inner.settings.dns_primary {
            self.configure_dns(primary, self.inner.settings.dns_secondary.as_deref())
                .await?;
        }
        Ok(())
    }
}

// ============================================================================
// Modem - Accessors
// ============================================================================

impl Modem {
    /// Returns the command channel.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the settings the modem was opened with.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns the token that stops this modem's commands.
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }
}

// ============================================================================
// Modem - Commands
// ============================================================================

impl Modem {
    /// Runs one transaction on the channel.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel has stopped
    /// - [`Error::Cancelled`] if the modem token fired
    pub async fn execute(&self, transaction: Transaction) -> Result<Exchange> {
        self.inner
            .connection
            .execute_with_cancel(transaction, &self.inner.cancel)
            .await
    }

    /// Runs a chat script on the channel.
    ///
    /// # Errors
    ///
    /// See [`ChatScript::run`].
    pub async fn run(&self, script: &ChatScript) -> Result<Vec<String>> {
        script
            .run_with_cancel(&self.inner.connection, &self.inner.cancel)
            .await
    }

    /// Runs the configured bring-up script, or the built-in one.
    ///
    /// # Errors
    ///
    /// See [`ChatScript::run`].
    pub async fn bring_up(&self) -> Result<Vec<String>> {
        let settings = &self.inner.settings;
        let script = match &settings.chat_script {
            Some(script) => script.clone(),
            None => bring_up_script(settings),
        };
        let transcript = self.run(&script).await?;
        info!(apn = %settings.apn, "Bearer up");
        Ok(transcript)
    }

    /// Queries the IP session state.
    ///
    /// A reply without a `STATE:` line yields [`ConnectionState::Unknown`].
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the channel failed
    /// - [`Error::ConnectionClosed`] if the channel has stopped
    pub async fn current_state(&self) -> Result<ConnectionState> {
        let exchange = self
            .execute(
                Transaction::command(Command::IpStatus)
                    .timeout(self.inner.settings.command_timeout())
                    .framing(Framing::until(["STATE:", "ERROR"])),
            )
            .await?;
        exchange.check_io()?;

        let state = parse_state(exchange.reply.text_lines());
        debug!(%state, "IP session state");
        Ok(state)
    }

    /// Queries the DNS servers in use.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if the query did not end in `OK`
    pub async fn dns_config(&self) -> Result<DnsConfig> {
        let reply = self
            .execute(self.standard(Command::DnsConfigQuery))
            .await?
            .require(&Command::DnsConfigQuery.to_string())?;
        Ok(parse_dns_config(&reply))
    }

    /// Sets the DNS servers, skipping the write when they are already set.
    ///
    /// Returns `true` if the configuration was changed.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if the device refused the servers
    pub async fn configure_dns(&self, primary: &str, secondary: Option<&str>) -> Result<bool> {
        let current = self.dns_config().await?;
        let secondary_matches =
            secondary.is_none_or(|secondary| current.secondary.as_deref() == Some(secondary));
        if current.primary.as_deref() == Some(primary) && secondary_matches {
            debug!(primary, ?secondary, "DNS already configured");
            return Ok(false);
        }

        let command = Command::DnsConfigSet {
            primary: primary.to_string(),
            secondary: secondary.map(str::to_string),
        };
        let label = command.to_string();
        self.execute(self.standard(command)).await?.require(&label)?;
        info!(primary, ?secondary, "DNS configured");
        Ok(true)
    }

    /// Opens a TCP session to `address` (`host:port` or `host:service`).
    ///
    /// # Errors
    ///
    /// See [`Socket::connect`].
    pub async fn connect(&self, address: &str) -> Result<Socket> {
        Socket::connect_with_cancel(
            self.inner.connection.clone(),
            self.inner.settings.socket.clone(),
            address,
            self.inner.cancel.child_token(),
        )
        .await
    }

    /// Standard `OK` / `ERROR` terminated transaction.
    pub(crate) fn standard(&self, command: Command) -> Transaction {
        Transaction::command(command)
            .timeout(self.inner.settings.command_timeout())
            .framing(Framing::standard())
            .expect(["OK"])
    }
}

// ============================================================================
// Modem - Indications
// ============================================================================

impl Modem {
    /// Routes lines starting with `prefix` to `handler`.
    ///
    /// # Errors
    ///
    /// - [`Error::IndicationInUse`] if `prefix` already has a handler
    pub fn register_indication<F>(&self, prefix: &str, handler: F) -> Result<()>
    where
        F: Fn(Indication) + Send + Sync + 'static,
    {
        self.inner.connection.register_indication(prefix, handler)
    }

    /// Removes the handler for `prefix`; returns `true` if one existed.
    pub fn cancel_indication(&self, prefix: &str) -> bool {
        self.inner.connection.cancel_indication(prefix)
    }

    /// Waits for the first line starting with `prefix`.
    ///
    /// Without an explicit `cancel` the modem token is used.
    ///
    /// # Errors
    ///
    /// See [`Connection::wait_indication`].
    pub async fn wait_indication(
        &self,
        prefix: &str,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Indication> {
        self.inner
            .connection
            .wait_indication(prefix, timeout, Some(cancel.unwrap_or(&self.inner.cancel)))
            .await
    }
}

// ============================================================================
// Modem - Teardown
// ============================================================================

impl Modem {
    /// Closes any TCP session, deactivates the bearer and stops the channel.
    ///
    /// The channel is stopped even when the device refuses the shutdown.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if `AT+CIPSHUT` did not answer `SHUT OK`
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.teardown().await;
        self.inner.connection.shutdown();
        self.inner.connection.closed().await;
        info!("Modem channel closed");
        result
    }

    async fn teardown(&self) -> Result<()> {
        let connection = &self.inner.connection;
        let close = connection
            .execute(
                Transaction::command(Command::CloseTcp)
                    .timeout(TEARDOWN_TIMEOUT)
                    .framing(Framing::terminal(["OK", "CLOSE OK", "ERROR"]))
                    .expect(["OK", "ERROR"]),
            )
            .await?;
        if close.outcome.matched().is_none() {
            warn!(reply = %close.reply, "No answer to AT+CIPCLOSE");
        }

        let label = Command::Shutdown.to_string();
        connection
            .execute(
                Transaction::command(Command::Shutdown)
                    .timeout(TEARDOWN_TIMEOUT)
                    .framing(Framing::terminal(["SHUT OK", "ERROR"]))
                    .expect(["SHUT OK"]),
            )
            .await?
            .require(&label)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
