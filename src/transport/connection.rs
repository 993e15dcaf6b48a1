//! Command channel and event loop.
//!
//! This module owns the byte stream to the modem. One spawned task reads
//! every byte, so command replies and unsolicited indications never race
//! for the same data.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming lines (indications first, then the reply in flight)
//! - Outgoing transactions, one at a time, in submission order
//! - The reply deadline of the transaction in flight
//! - Shutdown
//!
//! A transaction's deadline starts once its bytes are written. Writes are
//! never interrupted; a caller that stops waiting leaves the reply to be
//! drained and discarded so it cannot leak into the next transaction.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::codec::{Frame, ReplyCodec};
use super::framer::PendingReply;
use super::indication::{Indication, IndicationHandler, IndicationRegistry};
use crate::error::{Error, Result};
use crate::protocol::{Exchange, Outcome, Transaction, render_bytes};

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a transaction and frame its reply.
    Execute {
        transaction: Transaction,
        reply_tx: oneshot::Sender<Exchange>,
    },
}

/// Transaction whose reply is being collected.
struct InFlight {
    label: String,
    matchers: Vec<String>,
    pending: PendingReply,
    reply_tx: oneshot::Sender<Exchange>,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to the modem command channel.
///
/// Cheap to clone; all clones talk to the same event loop.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and can be shared across tasks.
/// Transactions from different tasks are serialized by the event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Indication handlers (shared with event loop).
    indications: Arc<Mutex<IndicationRegistry>>,
    /// Cancelled to stop the event loop.
    shutdown: CancellationToken,
    /// Cancelled by the event loop when it exits.
    closed: CancellationToken,
}

impl Connection {
    /// Spawns the event loop over `stream`.
    ///
    /// The stream is owned by the loop from here on.
    pub fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let indications = Arc::new(Mutex::new(IndicationRegistry::new()));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        tokio::spawn(Self::run_event_loop(
            stream,
            command_rx,
            Arc::clone(&indications),
            shutdown.clone(),
            closed.clone(),
        ));

        Self {
            command_tx,
            indications,
            shutdown,
            closed,
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Runs one transaction: a single write and a single framed read.
    ///
    /// Device replies never produce an `Err` here; they are classified in
    /// the returned [`Exchange`]. No retries.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    pub async fn execute(&self, transaction: Transaction) -> Result<Exchange> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Execute {
                transaction,
                reply_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        reply_rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Runs one transaction, giving up as soon as `cancel` fires.
    ///
    /// Nothing is written if `cancel` has already fired. A transaction
    /// abandoned mid-reply is still framed by the event loop and its reply
    /// discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fired first
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    pub async fn execute_with_cancel(
        &self,
        transaction: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Exchange> {
        let label = transaction.label();
        if cancel.is_cancelled() {
            return Err(Error::cancelled(label));
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(command = %label, "Transaction cancelled by caller");
                Err(Error::cancelled(label))
            }
            result = self.execute(transaction) => result,
        }
    }

    /// Writes `command` and collects its reply until `timeout` elapses.
    ///
    /// The outcome names the matcher found first in document order.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    pub async fn send_command<I, S>(
        &self,
        command: impl std::fmt::Display,
        timeout: Duration,
        matchers: I,
    ) -> Result<Exchange>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(
            Transaction::command(command)
                .timeout(timeout)
                .expect(matchers),
        )
        .await
    }

    /// Writes raw bytes and collects the reply until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    pub async fn send_raw<I, S>(
        &self,
        bytes: impl Into<Vec<u8>>,
        timeout: Duration,
        matchers: I,
    ) -> Result<Exchange>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(Transaction::raw(bytes).timeout(timeout).expect(matchers))
            .await
    }

    // ========================================================================
    // Indications
    // ========================================================================

    /// Routes lines starting with `prefix` to `handler`.
    ///
    /// The handler runs on the event loop task and must not block.
    ///
    /// # Errors
    ///
    /// - [`Error::IndicationInUse`] if `prefix` already has a handler
    pub fn register_indication<F>(&self, prefix: &str, handler: F) -> Result<()>
    where
        F: Fn(Indication) + Send + Sync + 'static,
    {
        let handler: IndicationHandler = Arc::new(handler);
        self.indications.lock().register(prefix, handler)?;
        debug!(prefix, "Indication registered");
        Ok(())
    }

    /// Removes the handler for `prefix`; returns `true` if one existed.
    pub fn cancel_indication(&self, prefix: &str) -> bool {
        let removed = self.indications.lock().cancel(prefix);
        if removed {
            debug!(prefix, "Indication cancelled");
        }
        removed
    }

    /// Returns `true` if `prefix` has a handler.
    #[inline]
    #[must_use]
    pub fn has_indication(&self, prefix: &str) -> bool {
        self.indications.lock().contains(prefix)
    }

    /// Waits for the first line starting with `prefix`.
    ///
    /// The prefix is registered for the duration of the wait and always
    /// released afterwards, including on timeout and cancellation.
    ///
    /// # Errors
    ///
    /// - [`Error::IndicationInUse`] if `prefix` already has a handler
    /// - [`Error::Timeout`] if nothing arrived within `timeout`
    /// - [`Error::Cancelled`] if `cancel` fired first
    /// - [`Error::ConnectionClosed`] if the event loop stopped
    pub async fn wait_indication(
        &self,
        prefix: &str,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Indication> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.register_indication(prefix, move |indication| {
            let _ = tx.send(indication);
        })?;
        let _registration = Registration {
            connection: self,
            prefix,
        };

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        tokio::select! {
            indication = rx.recv() => indication.ok_or(Error::ConnectionClosed),
            () = sleep(timeout) => Err(Error::timeout(prefix, millis(timeout))),
            () = cancel.cancelled() => Err(Error::cancelled(prefix)),
            () = self.closed.cancelled() => Err(Error::ConnectionClosed),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stops the event loop.
    ///
    /// A transaction in flight completes with an I/O outcome; queued ones
    /// fail with [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns `true` once the event loop has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the event loop has exited.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    /// Event loop that owns the stream.
    async fn run_event_loop<S>(
        stream: S,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        indications: Arc<Mutex<IndicationRegistry>>,
        shutdown: CancellationToken,
        closed: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, ReplyCodec::new());
        let mut in_flight: Option<InFlight> = None;

        loop {
            let deadline = in_flight.as_ref().map(|f| f.pending.deadline());

            tokio::select! {
                // Incoming lines from the modem
                frame = frames.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            if let Some(done) = Self::handle_frame(frame, &indications, &mut in_flight) {
                                frames.decoder_mut().set_prompt(None);
                                Self::complete(done);
                            }
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Read error on modem channel");
                            Self::fail(in_flight.take(), &e.to_string());
                            break;
                        }

                        None => {
                            debug!("Modem channel ended");
                            Self::fail(in_flight.take(), "channel closed");
                            break;
                        }
                    }
                }

                // Reply deadline of the transaction in flight
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(done) = in_flight.take() {
                        trace!(command = %done.label, "Reply deadline reached");
                        frames.decoder_mut().set_prompt(None);
                        Self::complete(done);
                    }
                }

                // Transactions from the API, one at a time
                command = command_rx.recv(), if in_flight.is_none() => {
                    match command {
                        Some(ConnectionCommand::Execute { transaction, reply_tx }) => {
                            if reply_tx.is_closed() {
                                debug!(command = %transaction.label(), "Caller gone, skipping transaction");
                                continue;
                            }

                            frames.decoder_mut().set_prompt(transaction.framing.prompt_byte());
                            match Self::write_transaction(&mut write_half, &transaction).await {
                                Ok(()) => {
                                    in_flight = Some(InFlight {
                                        label: transaction.label(),
                                        pending: PendingReply::new(
                                            transaction.framing,
                                            Instant::now() + transaction.timeout,
                                        ),
                                        matchers: transaction.matchers,
                                        reply_tx,
                                    });
                                }
                                Err(e) => {
                                    error!(error = %e, command = %transaction.label(), "Write error on modem channel");
                                    let _ = reply_tx.send(Exchange::io_error(e.to_string()));
                                    break;
                                }
                            }
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }

                () = shutdown.cancelled() => {
                    debug!("Shutdown requested");
                    Self::fail(in_flight.take(), "connection shut down");
                    let _ = write_half.shutdown().await;
                    break;
                }
            }
        }

        command_rx.close();
        let mut dropped = 0usize;
        while command_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(count = dropped, "Dropped queued transactions on shutdown");
        }

        closed.cancel();
        debug!("Event loop terminated");
    }

    /// Writes the transaction payload in full.
    async fn write_transaction<W>(
        write_half: &mut WriteHalf<W>,
        transaction: &Transaction,
    ) -> std::io::Result<()>
    where
        W: AsyncRead + AsyncWrite,
    {
        let bytes = transaction.payload.to_bytes();
        trace!(bytes = %render_bytes(&bytes), "Write");
        write_half.write_all(&bytes).await?;
        write_half.flush().await
    }

    /// Routes one frame; returns the in-flight transaction if it completed.
    fn handle_frame(
        frame: Frame,
        indications: &Arc<Mutex<IndicationRegistry>>,
        in_flight: &mut Option<InFlight>,
    ) -> Option<InFlight> {
        if let Frame::Line(line) = &frame {
            trace!(line = %line.render(), "Read");

            // Look up under the lock, call outside it so handlers may
            // (de)register indications.
            let routed = indications.lock().route(line);
            if let Some((indication, handler)) = routed {
                debug!(prefix = %indication.prefix, "Indication received");
                handler(indication);
                return None;
            }
        }

        match in_flight {
            Some(current) => {
                if current.pending.push(frame) {
                    in_flight.take()
                } else {
                    None
                }
            }
            None => {
                if let Frame::Line(line) = &frame
                    && !line.is_blank()
                {
                    debug!(line = %line.render(), "Unsolicited line dropped");
                }
                None
            }
        }
    }

    /// Classifies a finished reply and hands it to the caller.
    fn complete(done: InFlight) {
        let reply = done.pending.into_block();
        let outcome = match reply.find_first(&done.matchers) {
            Some(index) => Outcome::Matched(index),
            None => Outcome::NoMatch,
        };
        debug!(command = %done.label, ?outcome, reply = %reply.render(), "Transaction complete");

        if done.reply_tx.send(Exchange { reply, outcome }).is_err() {
            trace!(command = %done.label, "Caller gone, reply discarded");
        }
    }

    /// Completes a transaction with an I/O outcome.
    fn fail(in_flight: Option<InFlight>, message: &str) {
        if let Some(done) = in_flight {
            warn!(command = %done.label, reason = message, "Transaction failed");
            let _ = done.reply_tx.send(Exchange::io_error(message));
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Registration
// ============================================================================

/// Releases an indication prefix when dropped.
struct Registration<'a> {
    connection: &'a Connection,
    prefix: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.connection.cancel_indication(self.prefix);
    }
}

// ============================================================================
// Tests
// ============================================================================
