//! Module filesystem upload.
//!
//! Files such as CA certificates are written to the device's customer
//! directory through a short dialogue:
//!
//! | Step | Command | Reply |
//! |------|---------|-------|
//! | 1 | `AT+CFSINIT` | `OK` |
//! | 2 | `AT+CFSWFILE=3,"<name>",0,<len>,<ms>` | `DOWNLOAD` |
//! | 3 | raw contents | `OK` |
//! | 4 | `AT+CFSTERM` | `OK` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{Command, Framing, Transaction};

use super::core::Modem;

// ============================================================================
// Constants
// ============================================================================

/// Largest file the device filesystem buffer takes.
pub const MAX_FILE_SIZE: usize = 10_240;

/// Device-side input window for the file contents.
const INPUT_TIMEOUT_MS: u64 = 3000;

const FS_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Modem - Filesystem
// ============================================================================

impl Modem {
    /// Stores `contents` as `name` on the module filesystem.
    ///
    /// The buffer is released with `AT+CFSTERM` once it was opened, even
    /// when the write fails or the modem token fired.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] if `contents` exceeds [`MAX_FILE_SIZE`]; nothing is sent
    /// - [`Error::Config`] if `name` is empty or contains a quote
    /// - [`Error::Rejected`] if the device refused any step
    /// - [`Error::Cancelled`] if the modem token fired
    pub async fn upload_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        if contents.len() > MAX_FILE_SIZE {
            return Err(Error::PayloadTooLarge {
                size: contents.len(),
                max: MAX_FILE_SIZE,
            });
        }
        if name.is_empty() || name.contains('"') {
            return Err(Error::config(format!("invalid file name: {name:?}")));
        }

        let label = Command::FsInit.to_string();
        self.execute(self.fs_command(Command::FsInit)).await?.require(&label)?;
        let written = self.write_file(name, contents).await;
        let released = self.release_fs().await;
        written?;
        released?;

        info!(name, size = contents.len(), "File stored on module");
        Ok(())
    }

    async fn write_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        let command = Command::FsWrite {
            name: name.to_string(),
            len: contents.len(),
            timeout_ms: INPUT_TIMEOUT_MS,
        };
        let label = command.to_string();
        self.execute(
            Transaction::command(command)
                .timeout(FS_TIMEOUT)
                .framing(Framing::until(["DOWNLOAD", "ERROR"]))
                .expect(["DOWNLOAD"]),
        )
        .await?
        .require(&label)?;
        debug!(name, "Device ready for file contents");

        self.execute(
            Transaction::raw(contents)
                .timeout(Duration::from_millis(INPUT_TIMEOUT_MS))
                .framing(Framing::standard())
                .expect(["OK"]),
        )
        .await?
        .require(&label)?;
        Ok(())
    }

    /// Sends `AT+CFSTERM` regardless of the modem token.
    async fn release_fs(&self) -> Result<()> {
        let label = Command::FsTerm.to_string();
        self.connection()
            .execute(self.fs_command(Command::FsTerm))
            .await?
            .require(&label)?;
        Ok(())
    }

    fn fs_command(&self, command: Command) -> Transaction {
        Transaction::command(command)
            .timeout(FS_TIMEOUT)
            .framing(Framing::standard())
            .expect(["OK"])
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::modem::Settings;
    use crate::transport::mock::{FakeModem, Input, Response};

    fn device(input: &Input) -> Response {
        match input {
            Input::Command(text) if text.starts_with("AT+CFSWFILE") => {
                let len = text
                    .rsplit(',')
                    .nth(1)
                    .and_then(|len| len.parse().ok())
                    .unwrap_or(0);
                Response::lines(&["DOWNLOAD"]).then_raw(len)
            }
            Input::Command(_) | Input::Raw(_) => Response::lines(&["OK"]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_sequence() {
        let (connection, fake) = FakeModem::spawn(device);
        let modem = Modem::new(connection, Settings::new());

        modem.upload_file("ca.crt", b"-----BEGIN CERTIFICATE-----").await.expect("upload");

        assert_eq!(
            fake.commands(),
            vec![
                "AT+CFSINIT",
                "AT+CFSWFILE=3,\"ca.crt\",0,27,3000",
                "AT+CFSTERM",
            ]
        );
        assert_eq!(fake.raw_writes(), vec![b"-----BEGIN CERTIFICATE-----".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_file_rejected_before_io() {
        let (connection, fake) = FakeModem::spawn(device);
        let modem = Modem::new(connection, Settings::new());

        let contents = vec![0u8; MAX_FILE_SIZE + 1];
        let err = modem.upload_file("big.bin", &contents).await.unwrap_err();

        assert!(matches!(err, Error::PayloadTooLarge { size: 10_241, max: 10_240 }));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_write_still_releases_buffer() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(text) if text.starts_with("AT+CFSWFILE") => Response::lines(&["ERROR"]),
            _ => Response::lines(&["OK"]),
        });
        let modem = Modem::new(connection, Settings::new());

        let err = modem.upload_file("ca.crt", b"data").await.unwrap_err();

        assert!(matches!(err, Error::Rejected { .. }));
        assert_eq!(fake.commands().last().map(String::as_str), Some("AT+CFSTERM"));
        assert!(fake.raw_writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_upload_still_releases_buffer() {
        let (connection, fake) = FakeModem::spawn(|input| match input.command() {
            Some(text) if text.starts_with("AT+CFSWFILE") => Response::silent(),
            _ => Response::lines(&["OK"]),
        });
        let modem = Modem::new(connection, Settings::new());

        let upload = modem.upload_file("ca.crt", b"data");
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            modem.cancel_token().cancel();
        };
        let (result, ()) = tokio::join!(upload, canceller);

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(
            fake.commands(),
            vec!["AT+CFSINIT", "AT+CFSWFILE=3,\"ca.crt\",0,4,3000", "AT+CFSTERM"]
        );
        assert!(fake.raw_writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_name_rejected() {
        let (connection, fake) = FakeModem::spawn(device);
        let modem = Modem::new(connection, Settings::new());

        assert!(matches!(
            modem.upload_file("", b"data").await,
            Err(Error::Config { .. })
        ));
        assert!(fake.commands().is_empty());
    }
}
