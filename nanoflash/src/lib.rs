//! # nanoflash
//!
//! A library for provisioning Skywire Nano (nRF9160) cellular modems.
//!
//! This crate provides:
//!
//! - an XMODEM / XMODEM-1K sender for pushing images into the modem
//!   bootloader over its UART
//! - debug-port access through a probe: AHB-AP memory transport, the
//!   CTRL-AP (mass erase, protection status, mailbox) and UICR helpers
//! - a request/response protocol with the modem firmware over the CTRL-AP
//!   mailbox (ping, DFU, convert)
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `config` (default): TOML settings for every timeout and retry policy
//!
//! ## Example
//!
//! ```rust,no_run
//! use nanoflash::protocol::Xmodem;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("modem.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut port = nanoflash::NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!         Xmodem::new(&mut port).transfer_with_progress(&image, |current, total| {
//!             println!("{current}/{total} bytes");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

#[cfg(feature = "config")]
pub mod config;
pub mod debugger;
pub mod error;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by long-running waits
/// (XMODEM handshakes and retries, mass erase, post-convert pings).
///
/// The checker should return `true` when the current operation should stop,
/// for example after Ctrl-C. Only the first registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// `Err(Error::Interrupted)` once interruption was requested.
pub(crate) fn check_interrupted() -> Result<()> {
    if is_interrupted_requested() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

// Re-exports for convenience
#[cfg(feature = "config")]
pub use config::Settings;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
#[cfg(feature = "probe-rs")]
pub use debugger::ArmInterfaceDap;
pub use {
    debugger::{
        Ahb, AhbConfig, CtrlAp, CtrlApConfig, Dap, Mailbox, MailboxConfig, MailboxPacket, Outcome,
        Uicr,
    },
    error::{Error, Result},
    port::{FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::xmodem::{Packet, PacketSize, Xmodem, XmodemConfig},
};
