//! Scripted in-memory modem for tests.
//!
//! The fake sits on the far end of a [`tokio::io::duplex`] pipe, parses what
//! the connection writes into commands and raw payloads, records them, and
//! answers through a handler closure.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::connection::Connection;

// ============================================================================
// Constants
// ============================================================================

const PIPE_CAPACITY: usize = 64 * 1024;

// ============================================================================
// Input / Response
// ============================================================================

/// Something the host wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    /// A `\r` terminated command, without the terminator.
    Command(String),
    /// Raw bytes written after a prompt.
    Raw(Vec<u8>),
}

impl Input {
    /// Returns the command text, if this is a command.
    pub(crate) fn command(&self) -> Option<&str> {
        match self {
            Self::Command(text) => Some(text),
            Self::Raw(_) => None,
        }
    }
}

/// What the fake modem sends back.
#[derive(Debug, Clone, Default)]
pub(crate) struct Response {
    bytes: Vec<u8>,
    raw_len: Option<usize>,
}

impl Response {
    /// Each line framed as `\r\n<line>\r\n`.
    pub(crate) fn lines(lines: &[&str]) -> Self {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(b"\r\n");
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        Self {
            bytes,
            raw_len: None,
        }
    }

    /// Verbatim bytes.
    pub(crate) fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            raw_len: None,
        }
    }

    /// The `> ` data prompt; the next `len` bytes are read as raw input.
    pub(crate) fn prompt(len: usize) -> Self {
        Self {
            bytes: b"\r\n> ".to_vec(),
            raw_len: Some(len),
        }
    }

    /// No reply at all.
    pub(crate) fn silent() -> Self {
        Self::default()
    }

    /// Switches the parser to raw mode for `len` bytes after this reply.
    pub(crate) fn then_raw(mut self, len: usize) -> Self {
        self.raw_len = Some(len);
        self
    }
}

// ============================================================================
// FakeModem
// ============================================================================

/// Handle to the scripted modem task.
pub(crate) struct FakeModem {
    log: Arc<Mutex<Vec<Input>>>,
    push_tx: mpsc::UnboundedSender<Vec<u8>>,
    hangup_tx: mpsc::UnboundedSender<()>,
}

impl FakeModem {
    /// Spawns a fake modem and a connection attached to it.
    pub(crate) fn spawn<F>(handler: F) -> (Connection, Self)
    where
        F: FnMut(&Input) -> Response + Send + 'static,
    {
        let (host, modem) = Self::spawn_stream(handler);
        (Connection::spawn(host), modem)
    }

    /// Spawns a fake modem and returns the host end of its pipe.
    pub(crate) fn spawn_stream<F>(handler: F) -> (DuplexStream, Self)
    where
        F: FnMut(&Input) -> Response + Send + 'static,
    {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (hangup_tx, hangup_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(device, handler, Arc::clone(&log), push_rx, hangup_rx));

        let modem = Self {
            log,
            push_tx,
            hangup_tx,
        };
        (host, modem)
    }

    /// Every command written so far, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|input| input.command().map(str::to_string))
            .collect()
    }

    /// Every raw payload written so far, in order.
    pub(crate) fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .iter()
            .filter_map(|input| match input {
                Input::Raw(bytes) => Some(bytes.clone()),
                Input::Command(_) => None,
            })
            .collect()
    }

    /// Sends unsolicited bytes to the host.
    pub(crate) fn push(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.push_tx.send(bytes.into());
    }

    /// Sends an unsolicited `\r\n<line>\r\n`.
    pub(crate) fn push_line(&self, line: &str) {
        self.push(format!("\r\n{line}\r\n"));
    }

    /// Closes the device end of the pipe.
    pub(crate) fn hang_up(&self) {
        let _ = self.hangup_tx.send(());
    }
}

async fn run<F>(
    mut device: DuplexStream,
    mut handler: F,
    log: Arc<Mutex<Vec<Input>>>,
    mut push_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut hangup_rx: mpsc::UnboundedReceiver<()>,
) where
    F: FnMut(&Input) -> Response + Send + 'static,
{
    let mut pending = Vec::new();
    let mut raw_len: Option<usize> = None;
    let mut chunk = [0u8; 1024];

    loop {
        tokio::select! {
            read = device.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&chunk[..n]);

                while let Some(input) = next_input(&mut pending, &mut raw_len) {
                    log.lock().push(input.clone());
                    let response = handler(&input);
                    if response.raw_len.is_some() {
                        raw_len = response.raw_len;
                    }
                    if !response.bytes.is_empty() && device.write_all(&response.bytes).await.is_err() {
                        return;
                    }
                }
            }

            Some(bytes) = push_rx.recv() => {
                if device.write_all(&bytes).await.is_err() {
                    return;
                }
            }

            Some(()) = hangup_rx.recv() => return,
        }
    }
}

fn next_input(pending: &mut Vec<u8>, raw_len: &mut Option<usize>) -> Option<Input> {
    if let Some(len) = *raw_len {
        if pending.len() < len {
            return None;
        }
        *raw_len = None;
        return Some(Input::Raw(pending.drain(..len).collect()));
    }

    let end = pending.iter().position(|&b| b == b'\r')?;
    let line: Vec<u8> = pending.drain(..=end).collect();
    let text = String::from_utf8_lossy(&line[..end]).trim().to_string();
    Some(Input::Command(text))
}
