//! TCP round trip through a SIM7000 modem.
//!
//! Demonstrates:
//! - Opening the modem with a builder or a JSON settings file
//! - Connecting to a host by name and port
//! - Writing a request and polling for the reply
//! - Closing the session and shutting the modem down
//!
//! Usage:
//!   cargo run --example tcp_echo -- tcpbin.com:4242
//!   cargo run --example tcp_echo -- tcpbin.com:4242 --config modem.json
//!   cargo run --example tcp_echo -- tcpbin.com:4242 --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use atlink::{Modem, ReadOutcome, Result, Settings};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ADDRESS: &str = "tcpbin.com:4242";
const MESSAGE: &[u8] = b"hello from atlink\n";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: usize = 20;

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    address: String,
    config: Option<String>,
    debug: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let config = args
            .iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1))
            .cloned();
        let address = args
            .iter()
            .find(|a| !a.starts_with("--") && Some(*a) != config.as_ref())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

        Self {
            address,
            config,
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug { "atlink=trace" } else { "atlink=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== TCP echo via {} ===\n", args.address);

    let settings = match &args.config {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    println!("[Setup] Bringing up {} ...", settings.serial_port);
    let modem = Modem::builder().settings(settings).open().await?;
    println!("        ✓ State: {}\n", modem.current_state().await?);

    let mut socket = modem.connect(&args.address).await?;
    println!("[Connect] ✓ {} ({})", socket.host(), socket.remote_addr());

    let written = socket.write(MESSAGE).await?;
    println!("[Write]   ✓ {written} bytes");

    let mut received = Vec::new();
    for _ in 0..MAX_POLLS {
        match socket.read(1460).await {
            Ok(ReadOutcome::Data(bytes)) => {
                received.extend_from_slice(&bytes);
                if received.ends_with(b"\n") {
                    break;
                }
            }
            Ok(ReadOutcome::NoData) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) if e.is_session_closed() => break,
            Err(e) => return Err(e),
        }
    }
    println!("[Read]    ✓ {:?}", String::from_utf8_lossy(&received));

    socket.close().await;
    modem.shutdown().await?;
    println!("\n=== Done ===");
    Ok(())
}
