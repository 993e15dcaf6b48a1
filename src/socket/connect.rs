//! Session establishment: name resolution and `AT+CIPSTART`.
//!
//! Both steps resend on garbage replies, up to `max_resends` attempts, and
//! fail at once on a well-formed refusal.

// ============================================================================
// Imports
// ============================================================================

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::modem::SocketOptions;
use crate::protocol::parse::{classify_connect, parse_address, parse_dns_reply};
use crate::protocol::{Command, ConnectReply, DnsReply, Framing, Transaction};
use crate::transport::Connection;

use super::core::{CLOSED_INDICATION, Socket, SocketState};

// ============================================================================
// Socket - Connect
// ============================================================================

impl Socket {
    /// Opens a TCP session to `address`.
    ///
    /// `address` is `host:port`, where port is a number or a well-known
    /// service name. Numeric IPv4 hosts skip name resolution.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `options` are invalid; nothing is sent
    /// - [`Error::InvalidAddress`] if `address` cannot be parsed; nothing is sent
    /// - [`Error::IndicationInUse`] if another session is open on this channel
    /// - [`Error::Rejected`] if resolution or the connection was refused
    /// - [`Error::RetriesExhausted`] if the device kept answering garbage
    pub async fn connect(
        connection: Connection,
        options: SocketOptions,
        address: &str,
    ) -> Result<Socket> {
        Self::connect_with_cancel(connection, options, address, CancellationToken::new()).await
    }

    /// Opens a TCP session, giving up as soon as `cancel` fires.
    ///
    /// The socket keeps `cancel` for its later reads and writes.
    ///
    /// # Errors
    ///
    /// As [`connect`](Self::connect), plus [`Error::Cancelled`].
    pub async fn connect_with_cancel(
        connection: Connection,
        options: SocketOptions,
        address: &str,
        cancel: CancellationToken,
    ) -> Result<Socket> {
        options.validate()?;
        let (host, port) = parse_address(address)?;

        let remote_closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&remote_closed);
        connection.register_indication(CLOSED_INDICATION, move |_| {
            flag.store(true, Ordering::SeqCst);
        })?;

        let mut socket = Socket {
            connection,
            options,
            host,
            remote: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port),
            chunk_size: None,
            state: SocketState::Connecting,
            remote_closed,
            cancel,
        };

        match socket.establish().await {
            Ok(()) => {
                socket.state = SocketState::Open;
                info!(host = %socket.host, remote = %socket.remote, "Connected");
                Ok(socket)
            }
            Err(e) => {
                warn!(address, error = %e, "Connect failed");
                socket.release();
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let ip = match self.host.parse::<Ipv4Addr>() {
            Ok(ip) => ip,
            Err(_) => self.resolve().await?,
        };
        self.remote.set_ip(ip);

        let manual = self
            .exchange(
                Transaction::command(Command::ManualReceive)
                    .timeout(self.options.read_timeout())
                    .framing(Framing::standard())
                    .expect(["OK"]),
            )
            .await?;
        if !manual.outcome.is(0) {
            debug!(reply = %manual.reply, "Manual receive mode not confirmed");
        }

        self.start(ip).await
    }

    /// Resolves the host name with `AT+CDNSGIP`.
    async fn resolve(&self) -> Result<Ipv4Addr> {
        let command = Command::Resolve {
            host: self.host.clone(),
        };
        let label = command.to_string();
        let mut last_reply = String::new();

        for attempt in 1..=self.options.max_resends {
            let exchange = self
                .exchange(
                    Transaction::command(&command)
                        .timeout(self.options.dns_timeout())
                        .framing(Framing::until(["+CDNSGIP:", "ERROR"])),
                )
                .await?;

            match parse_dns_reply(&exchange.reply) {
                DnsReply::Resolved { primary, .. } => {
                    debug!(host = %self.host, ip = %primary, "Resolved");
                    return Ok(primary);
                }
                DnsReply::Failed { reason } => return Err(Error::rejected(label, reason)),
                DnsReply::Garbage => {
                    debug!(attempt, reply = %exchange.reply, "Unrecognised DNS reply, resending");
                    last_reply = exchange.reply.to_string();
                }
            }
        }

        Err(Error::retries_exhausted(label, self.options.max_resends, last_reply))
    }

    /// Issues `AT+CIPSTART` until it is classified.
    async fn start(&self, ip: Ipv4Addr) -> Result<()> {
        let command = Command::StartTcp {
            ip,
            port: self.remote.port(),
        };
        let label = command.to_string();
        let mut last_reply = String::new();

        for attempt in 1..=self.options.max_resends {
            let exchange = self
                .exchange(
                    Transaction::command(&command)
                        .timeout(self.options.connect_timeout())
                        .framing(Framing::until([
                            "CONNECT OK",
                            "ALREADY CONNECT",
                            "CONNECT FAIL",
                            "ERROR",
                        ])),
                )
                .await?;

            match classify_connect(&exchange.reply) {
                ConnectReply::Connected => return Ok(()),
                ConnectReply::AlreadyConnected => {
                    debug!(remote = %self.remote, "Device reports existing connection");
                    return Ok(());
                }
                ConnectReply::Failed { reason } => return Err(Error::rejected(label, reason)),
                ConnectReply::Garbage => {
                    debug!(attempt, reply = %exchange.reply, "Unrecognised connect reply, resending");
                    last_reply = exchange.reply.to_string();
                }
            }
        }

        Err(Error::retries_exhausted(label, self.options.max_resends, last_reply))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::transport::mock::{FakeModem, Input, Response};

    fn count(commands: &[String], prefix: &str) -> usize {
        commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn device(input: &Input) -> Response {
        match input.command() {
            Some(c) if c.starts_with("AT+CDNSGIP") => {
                Response::lines(&["OK", "+CDNSGIP: 1,\"example.com\",\"93.184.216.34\""])
            }
            Some(c) if c.starts_with("AT+CIPSTART") => Response::lines(&["OK", "CONNECT OK"]),
            _ => Response::lines(&["OK"]),
        }
    }

    fn options(max_resends: usize) -> SocketOptions {
        SocketOptions {
            max_resends,
            ..SocketOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_numeric_host_skips_resolution() {
        let (connection, fake) = FakeModem::spawn(device);

        let socket = Socket::connect(connection, SocketOptions::default(), "203.0.113.5:80")
            .await
            .expect("connect");

        let commands = fake.commands();
        assert_eq!(count(&commands, "AT+CDNSGIP"), 0);
        assert_eq!(count(&commands, "AT+CIPSTART"), 1);
        assert!(commands.contains(&"AT+CIPSTART=\"TCP\",\"203.0.113.5\",80".to_string()));
        assert_eq!(socket.state(), SocketState::Open);
        assert_eq!(socket.remote_addr().to_string(), "203.0.113.5:80");
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_name_resolved_first() {
        let (connection, fake) = FakeModem::spawn(device);

        let socket = Socket::connect(connection, SocketOptions::default(), "example.com:http")
            .await
            .expect("connect");

        let commands = fake.commands();
        assert_eq!(commands[0], "AT+CDNSGIP=\"example.com\"");
        assert_eq!(
            commands.last().map(String::as_str),
            Some("AT+CIPSTART=\"TCP\",\"93.184.216.34\",80")
        );
        assert_eq!(socket.host(), "example.com");
        assert_eq!(*socket.remote_addr().ip(), Ipv4Addr::new(93, 184, 216, 34));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_failure_not_resent() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(c) if c.starts_with("AT+CDNSGIP") => Response::lines(&["OK", "+CDNSGIP: 0,8"]),
            _ => Response::lines(&["OK"]),
        });

        let err = Socket::connect(connection.clone(), options(5), "nowhere.invalid:80")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Rejected { ref reason, .. } if reason == "DNS COMMON ERROR"));
        let commands = fake.commands();
        assert_eq!(count(&commands, "AT+CDNSGIP"), 1);
        assert_eq!(count(&commands, "AT+CIPSTART"), 0);
        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_garbage_resent() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let (connection, fake) = FakeModem::spawn(move |input| match input.command() {
            Some(c) if c.starts_with("AT+CDNSGIP") => {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Response::lines(&["\u{1}\u{2}garbage"])
                } else {
                    device(input)
                }
            }
            _ => device(input),
        });

        Socket::connect(connection, options(3), "example.com:80")
            .await
            .expect("connect");

        assert_eq!(count(&fake.commands(), "AT+CDNSGIP"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_garbage_exhausts() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(c) if c.starts_with("AT+CIPSTART") => Response::lines(&["OK"]),
            _ => Response::lines(&["OK"]),
        });

        let err = Socket::connect(connection.clone(), options(3), "203.0.113.5:80")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted { attempts: 3, ref last_reply, .. } if last_reply == "OK"
        ));
        assert_eq!(count(&fake.commands(), "AT+CIPSTART"), 3);
        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fail_not_resent() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(c) if c.starts_with("AT+CIPSTART") => Response::lines(&["OK", "CONNECT FAIL"]),
            _ => Response::lines(&["OK"]),
        });

        let err = Socket::connect(connection, options(5), "203.0.113.5:80")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Rejected { ref reason, .. } if reason == "CONNECT FAIL"));
        assert_eq!(count(&fake.commands(), "AT+CIPSTART"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_connected_accepted() {
        let (connection, _fake) = FakeModem::spawn(|input| match input.command() {
            Some(c) if c.starts_with("AT+CIPSTART") => Response::lines(&["ALREADY CONNECT"]),
            _ => Response::lines(&["OK"]),
        });

        let socket = Socket::connect(connection, SocketOptions::default(), "203.0.113.5:80")
            .await
            .expect("connect");
        assert!(socket.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_address_sends_nothing() {
        let (connection, fake) = FakeModem::spawn(device);

        let err = Socket::connect(connection, SocketOptions::default(), "example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidAddress { .. }));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_options_send_nothing() {
        let (connection, fake) = FakeModem::spawn(device);
        let options = SocketOptions {
            default_chunk_size: 0,
            ..SocketOptions::default()
        };

        let err = Socket::connect(connection.clone(), options, "203.0.113.5:80")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
        assert!(fake.commands().is_empty());
        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_resolution() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(c) if c.starts_with("AT+CDNSGIP") => Response::silent(),
            _ => device(input),
        });
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let connecting = Socket::connect_with_cancel(
            connection.clone(),
            SocketOptions::default(),
            "example.com:80",
            cancel.clone(),
        );
        let canceller = async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(connecting, canceller);

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert!(started.elapsed() < SocketOptions::default().dns_timeout());
        assert_eq!(count(&fake.commands(), "AT+CDNSGIP"), 1);
        assert_eq!(count(&fake.commands(), "AT+CIPSTART"), 0);
        assert!(!connection.has_indication(CLOSED_INDICATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_session_rejected() {
        let (connection, _fake) = FakeModem::spawn(device);

        let _first = Socket::connect(connection.clone(), SocketOptions::default(), "203.0.113.5:80")
            .await
            .expect("connect");
        let err = Socket::connect(connection, SocketOptions::default(), "203.0.113.6:80")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::IndicationInUse { .. }));
    }
}
