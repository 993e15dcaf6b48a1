//! Chat scripts: ordered command steps with retries and abort terms.
//!
//! # Step Semantics
//!
//! For each step, in order:
//!
//! 1. Wait the script's inter-step delay, if any
//! 2. Write the command and collect its reply
//! 3. Any abort term in the reply stops the script
//! 4. An empty expectation, or the expectation found, advances
//! 5. Otherwise one retry is used up; the step is resent while any remain,
//!    then the script fails
//!
//! Every reply line is kept in the transcript, which is returned on success
//! and attached to the error on failure.
//!
//! # Example
//!
//! ```ignore
//! let script = ChatScript::new()
//!     .abort(["ERROR", "NO CARRIER"])
//!     .step(CommandStep::new("AT", "OK").retries(10).timeout_ms(1000))
//!     .step(CommandStep::new("AT+CPIN?", "+CPIN: READY"));
//!
//! let transcript = script.run(&connection).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Framing, Transaction};
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Reply window of a step that does not set one.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 100;

// ============================================================================
// CommandStep
// ============================================================================

/// One command of a chat script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Command text, written with a trailing `\r`.
    pub command: String,
    /// Substring the reply must contain; empty means any reply will do.
    #[serde(default)]
    pub expect: String,
    /// Reply window in milliseconds.
    #[serde(default = "default_step_timeout")]
    pub timeout_ms: u64,
    /// Attempts before the step fails; `0` and `1` both mean a single attempt.
    #[serde(default)]
    pub retries: u32,
    /// Substrings that close the reply window early.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub complete_on: Vec<String>,
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

impl CommandStep {
    /// Creates a step with a 100 ms window and a single attempt.
    #[must_use]
    pub fn new(command: impl Into<String>, expect: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expect: expect.into(),
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retries: 0,
            complete_on: Vec::new(),
        }
    }

    /// Sets the reply window.
    #[inline]
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of attempts.
    #[inline]
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Closes the reply window as soon as a line contains one of `tokens`.
    #[must_use]
    pub fn complete_on<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.complete_on = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the reply window.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn transaction(&self, aborts: &[String]) -> Transaction {
        let framing = if self.complete_on.is_empty() {
            Framing::Deadline
        } else {
            Framing::until(self.complete_on.iter().chain(aborts).cloned())
        };
        Transaction::command(&self.command)
            .timeout(self.timeout())
            .framing(framing)
    }
}

// ============================================================================
// ChatScript
// ============================================================================

/// Ordered command steps sharing a set of abort terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatScript {
    /// Steps in execution order.
    pub steps: Vec<CommandStep>,
    /// Substrings that stop the script wherever they appear.
    #[serde(default)]
    pub aborts: Vec<String>,
    /// Delay before each step, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_delay_ms: Option<u64>,
}

impl ChatScript {
    /// Creates an empty script.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: CommandStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds abort terms.
    #[must_use]
    pub fn abort<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aborts.extend(terms.into_iter().map(Into::into));
        self
    }

    /// Sets the delay before each step.
    #[inline]
    #[must_use]
    pub fn step_delay_ms(mut self, delay_ms: u64) -> Self {
        self.step_delay_ms = Some(delay_ms);
        self
    }

    /// Runs the script.
    ///
    /// Returns the transcript: every non-blank reply line of every attempt.
    /// Blank lines stay in each step's reply block but are left out of the
    /// transcript, so it is the concatenation of the replies minus their
    /// empty lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] carrying the transcript so far, wrapping:
    ///
    /// - [`Error::Aborted`] if a reply contained an abort term
    /// - [`Error::UnexpectedReply`] if a step ran out of attempts
    /// - a channel error if the connection failed
    pub async fn run(&self, connection: &Connection) -> Result<Vec<String>> {
        self.run_with_cancel(connection, &CancellationToken::new())
            .await
    }

    /// Runs the script, stopping as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`Error::Cancelled`].
    pub async fn run_with_cancel(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut transcript = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            if let Err(e) = self.run_step(connection, cancel, index, step, &mut transcript).await {
                warn!(step = index, command = %step.command, error = %e, "Chat script failed");
                return Err(Error::script(transcript, e));
            }
        }

        info!(steps = self.steps.len(), "Chat script complete");
        Ok(transcript)
    }

    async fn run_step(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
        index: usize,
        step: &CommandStep,
        transcript: &mut Vec<String>,
    ) -> Result<()> {
        let mut retries_left = step.retries;

        loop {
            if let Some(delay_ms) = self.step_delay_ms {
                tokio::select! {
                    () = sleep(Duration::from_millis(delay_ms)) => {}
                    () = cancel.cancelled() => return Err(Error::cancelled(&step.command)),
                }
            }

            let exchange = connection
                .execute_with_cancel(step.transaction(&self.aborts), cancel)
                .await?;
            transcript.extend(exchange.reply.text_lines());
            exchange.check_io()?;

            if let Some(term) = self.aborts.iter().find(|term| exchange.reply.contains(term)) {
                return Err(Error::Aborted {
                    step: index,
                    command: step.command.clone(),
                    term: term.clone(),
                    reply: exchange.reply.to_string(),
                });
            }

            if step.expect.is_empty() || exchange.reply.contains(&step.expect) {
                debug!(step = index, command = %step.command, "Step complete");
                return Ok(());
            }

            retries_left = retries_left.saturating_sub(1);
            if retries_left == 0 {
                return Err(Error::UnexpectedReply {
                    step: index,
                    command: step.command.clone(),
                    expected: step.expect.clone(),
                    reply: exchange.reply.to_string(),
                });
            }
            debug!(
                step = index,
                command = %step.command,
                retries_left,
                "Unexpected reply, retrying"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::transport::mock::{FakeModem, Response};

    fn ping(retries: u32) -> ChatScript {
        ChatScript::new().step(CommandStep::new("PING", "PONG").timeout_ms(1000).retries(retries))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_try() {
        let (connection, modem) = FakeModem::spawn(|_| Response::lines(&["PONG"]));

        let output = ping(2).run(&connection).await.expect("script");

        assert_eq!(output, vec!["PONG"]);
        assert_eq!(modem.commands(), vec!["PING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_fails_immediately() {
        let (connection, modem) = FakeModem::spawn(|_| Response::lines(&["GARBAGE"]));

        let err = ping(0).run(&connection).await.unwrap_err();

        assert!(matches!(
            err.root(),
            Error::UnexpectedReply { step: 0, reply, .. } if reply == "GARBAGE"
        ));
        assert_eq!(err.transcript(), Some(&["GARBAGE".to_string()][..]));
        assert_eq!(modem.commands(), vec!["PING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_count_total_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let (connection, modem) = FakeModem::spawn(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Response::lines(&["GARBAGE"])
            } else {
                Response::lines(&["PONG"])
            }
        });

        let output = ping(3).run(&connection).await.expect("script");

        assert_eq!(output, vec!["GARBAGE", "GARBAGE", "PONG"]);
        assert_eq!(modem.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let (connection, modem) = FakeModem::spawn(|_| Response::lines(&["GARBAGE"]));

        let err = ping(2).run(&connection).await.unwrap_err();

        assert!(matches!(err.root(), Error::UnexpectedReply { step: 0, .. }));
        assert_eq!(modem.commands(), vec!["PING", "PING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_retry_is_a_single_attempt() {
        let (connection, modem) = FakeModem::spawn(|_| Response::lines(&["GARBAGE"]));

        ping(1).run(&connection).await.unwrap_err();

        assert_eq!(modem.commands(), vec!["PING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_halts_at_its_step() {
        let (connection, modem) = FakeModem::spawn(|input| match input.command() {
            Some("AT+CSQ") => Response::lines(&["+CSQ: 99,99", "OK"]),
            _ => Response::lines(&["OK"]),
        });
        let script = ChatScript::new()
            .abort(["ERROR", "+CSQ: 99,99"])
            .step(CommandStep::new("AT", "OK"))
            .step(CommandStep::new("AT+CSQ", "+CSQ: ").retries(5))
            .step(CommandStep::new("AT+CPIN?", "+CPIN: READY"));

        let err = script.run(&connection).await.unwrap_err();

        assert!(matches!(
            err.root(),
            Error::Aborted { step: 1, term, .. } if term == "+CSQ: 99,99"
        ));
        assert_eq!(modem.commands(), vec!["AT", "AT+CSQ"]);
        assert_eq!(
            err.transcript(),
            Some(&["OK".to_string(), "+CSQ: 99,99".into(), "OK".into()][..])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_checked_before_expectation() {
        let (connection, _modem) = FakeModem::spawn(|_| Response::lines(&["OK", "ERROR"]));
        let script = ChatScript::new()
            .abort(["ERROR"])
            .step(CommandStep::new("AT", "OK"));

        let err = script.run(&connection).await.unwrap_err();
        assert!(matches!(err.root(), Error::Aborted { step: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_expectation_accepts_any_reply() {
        let (connection, _modem) = FakeModem::spawn(|_| Response::lines(&["10.0.0.7"]));
        let script = ChatScript::new().step(CommandStep::new("AT+CIFSR", ""));

        let output = script.run(&connection).await.expect("script");
        assert_eq!(output, vec!["10.0.0.7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_expectation_still_aborts() {
        let (connection, _modem) = FakeModem::spawn(|_| Response::lines(&["ERROR"]));
        let script = ChatScript::new()
            .abort(["ERROR"])
            .step(CommandStep::new("AT+CIFSR", ""));

        let err = script.run(&connection).await.unwrap_err();
        assert!(matches!(err.root(), Error::Aborted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_on_ends_window_early() {
        let (connection, _modem) = FakeModem::spawn(|_| Response::lines(&["OK"]));
        let script = ChatScript::new()
            .step(CommandStep::new("AT+CIICR", "OK").timeout_ms(30_000).complete_on(["OK"]));

        let started = tokio::time::Instant::now();
        script.run(&connection).await.expect("script");
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_concatenates_steps() {
        let (connection, _modem) = FakeModem::spawn(|input| match input.command() {
            Some("ONE") => Response::lines(&["1", "OK"]),
            _ => Response::lines(&["2", "OK"]),
        });
        let script = ChatScript::new()
            .step(CommandStep::new("ONE", "1"))
            .step(CommandStep::new("TWO", "2"));

        let output = script.run(&connection).await.expect("script");
        assert_eq!(output, vec!["1", "OK", "2", "OK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_skips_blank_lines() {
        let (connection, _modem) = FakeModem::spawn(|_| Response::lines(&["", "PONG", "", "OK"]));

        let output = ping(0).run(&connection).await.expect("script");
        assert_eq!(output, vec!["PONG", "OK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_script() {
        let (connection, modem) = FakeModem::spawn(|_| Response::silent());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ping(5).run_with_cancel(&connection, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(modem.commands().len() <= 1);
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: CommandStep = serde_json::from_str(r#"{"command": "AT"}"#).expect("json");
        assert_eq!(step, CommandStep::new("AT", ""));
    }
}
