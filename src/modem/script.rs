//! Built-in bring-up script.
//!
//! Takes a freshly powered modem to an active bearer with a local address:
//! reset, echo off, signal and SIM checks, APN, `AT+CIICR`, `AT+CIFSR`.
//! Every state transition is confirmed with `AT+CIPSTATUS`.

// ============================================================================
// Imports
// ============================================================================

use crate::chat::{ChatScript, CommandStep};
use crate::protocol::Command;

use super::settings::Settings;

// ============================================================================
// Constants
// ============================================================================

/// Abort terms of the built-in script.
///
/// `+CSQ: 99,99` means no signal at all.
pub const BRING_UP_ABORTS: [&str; 4] = ["ERROR", "BUSY", "NO CARRIER", "+CSQ: 99,99"];

// ============================================================================
// Script
// ============================================================================

/// Builds the bring-up script for `settings`.
///
/// A SIM PIN, when configured, is entered right after echo is disabled.
#[must_use]
pub fn bring_up_script(settings: &Settings) -> ChatScript {
    let attention = || step(Command::Attention, "OK").timeout_ms(1000).retries(10);

    let mut script = ChatScript::new()
        .abort(BRING_UP_ABORTS)
        .step(attention())
        .step(step(Command::Reset, "OK").timeout_ms(10_000))
        .step(attention())
        .step(step(Command::EchoOff, "OK"));

    if let Some(pin) = &settings.pin {
        script = script.step(step(Command::PinEnter { pin: pin.clone() }, "OK").timeout_ms(5000));
    }

    script = script
        .step(step(Command::SignalQuality, "+CSQ: "))
        .step(step(Command::PinStatus, "+CPIN: READY").timeout_ms(1000).retries(5))
        .step(step(Command::ApnQuery, "+CSTT: "))
        .step(status("IP INITIAL"))
        .step(step(
            Command::ApnSet {
                apn: settings.apn.clone(),
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            "OK",
        ))
        .step(step(Command::ApnQuery, format!("+CSTT: \"{}\"", settings.apn)))
        .step(status("IP START"))
        .step(step(Command::BringUp, "OK").timeout_ms(30_000).complete_on(["OK"]))
        .step(status("IP GPRSACT"))
        .step(step(Command::LocalAddress, ""))
        .step(status("IP STATUS"));

    match settings.step_delay_ms {
        Some(delay_ms) => script.step_delay_ms(delay_ms),
        None => script,
    }
}

fn step(command: Command, expect: impl Into<String>) -> CommandStep {
    CommandStep::new(command.to_string(), expect)
}

fn status(state: &str) -> CommandStep {
    step(Command::IpStatus, format!("STATE: {state}"))
}

// ============================================================================
// Tests
// ============================================================================
