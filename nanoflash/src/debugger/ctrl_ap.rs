//! nRF9160 CTRL-AP.
//!
//! The CTRL-AP (access port 4) stays reachable while the device is locked.
//! It can mass-erase the chip, report protection state, and exposes a pair of
//! one-word mailboxes shared with the application CPU.
//!
//! ```text
//! debugger --TX_DATA--> [ TX slot ] --> CPU      TX_STATUS != 0: not read yet
//! debugger <--RX_DATA-- [ RX slot ] <-- CPU      RX_STATUS != 0: word waiting
//! ```
//!
//! A register access may be buffered by the probe. Reading `RESET` forces
//! earlier writes out, which is how writes are flushed here.

use crate::debugger::Dap;
use crate::error::{Error, Result};
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Access port number of the CTRL-AP.
pub const CTRL_AP_PORT: u8 = 4;

/// CTRL-AP registers.
pub mod registers {
    /// Soft reset.
    pub const RESET: u32 = 0x000;
    /// Start an erase of all flash and RAM.
    pub const ERASE_ALL: u32 = 0x004;
    /// Erase status, 1 while an erase runs.
    pub const ERASE_ALL_STATUS: u32 = 0x008;
    /// Access port protection status.
    pub const AP_PROTECT_STATUS: u32 = 0x00C;
    /// Erase protection status.
    pub const ERASE_PROTECT_STATUS: u32 = 0x018;
    /// Key register that lifts erase protection.
    pub const ERASE_PROTECT_DISABLE: u32 = 0x01C;
    /// Debugger to CPU mailbox data.
    pub const MAILBOX_TX_DATA: u32 = 0x020;
    /// Debugger to CPU mailbox status.
    pub const MAILBOX_TX_STATUS: u32 = 0x024;
    /// CPU to debugger mailbox data.
    pub const MAILBOX_RX_DATA: u32 = 0x028;
    /// CPU to debugger mailbox status.
    pub const MAILBOX_RX_STATUS: u32 = 0x02C;
    /// Identification register.
    pub const IDR: u32 = 0x0FC;
}

const ERASE_IN_PROGRESS: u32 = 1;
const ERASE_DONE: u32 = 0;

/// Upper bound on stale words drained from the RX mailbox.
const MAX_DRAIN_WORDS: usize = 256;

/// Time for the core to come back after a soft reset.
const SOFT_RESET_SETTLE: Duration = Duration::from_millis(20);

/// CTRL-AP settings.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CtrlApConfig {
    /// Erase status polls before giving up.
    pub erase_attempts: u32,
    /// Pause between erase status polls.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub erase_poll_interval: Duration,
}

impl Default for CtrlApConfig {
    fn default() -> Self {
        Self {
            erase_attempts: 30,
            erase_poll_interval: Duration::from_secs(1),
        }
    }
}

/// The nRF9160 CTRL-AP.
pub struct CtrlAp<D: Dap> {
    dap: D,
    config: CtrlApConfig,
}

impl<D: Dap> CtrlAp<D> {
    /// Create a CTRL-AP view with default settings.
    pub fn new(dap: D) -> Self {
        Self::with_config(dap, CtrlApConfig::default())
    }

    /// Create a CTRL-AP view with custom settings.
    pub fn with_config(dap: D, config: CtrlApConfig) -> Self {
        Self { dap, config }
    }

    /// Borrow the underlying probe.
    pub fn dap_mut(&mut self) -> &mut D {
        &mut self.dap
    }

    /// Give back the underlying probe.
    pub fn into_inner(self) -> D {
        self.dap
    }

    /// Read a CTRL-AP register.
    pub fn read_register(&mut self, register: u32) -> Result<u32> {
        self.dap
            .read(CTRL_AP_PORT, register)
    }

    fn write_register(&mut self, register: u32, value: u32) -> Result<()> {
        self.dap
            .write(CTRL_AP_PORT, register, value)
    }

    /// Push buffered writes out to the device.
    fn flush(&mut self) -> Result<()> {
        self.read_register(registers::RESET)
            .map(|_| ())
    }

    /// Whether the access port protection currently allows debugging.
    pub fn is_unlocked(&mut self) -> Result<bool> {
        Ok(self.read_register(registers::AP_PROTECT_STATUS)? != 0)
    }

    /// Raw erase protection status.
    pub fn erase_protect_status(&mut self) -> Result<u32> {
        self.read_register(registers::ERASE_PROTECT_STATUS)
    }

    /// The CTRL-AP identification register.
    pub fn idr(&mut self) -> Result<u32> {
        self.read_register(registers::IDR)
    }

    /// Pulse the soft reset line.
    pub fn soft_reset(&mut self) -> Result<()> {
        debug!("Soft-resetting target through CTRL-AP");
        self.write_register(registers::RESET, 1)?;
        self.write_register(registers::RESET, 0)?;
        thread::sleep(SOFT_RESET_SETTLE);
        Ok(())
    }

    fn wait_all_erased(&mut self) -> Result<()> {
        for attempt in 0..self.config.erase_attempts {
            crate::check_interrupted()?;
            let status = self.read_register(registers::ERASE_ALL_STATUS)?;

            if attempt == 0 && status != ERASE_IN_PROGRESS {
                return Err(Error::Erase(format!(
                    "erase never started (status {status})"
                )));
            }

            if status == ERASE_DONE {
                info!("Erase finished");
                return Ok(());
            }

            thread::sleep(self.config.erase_poll_interval);
        }

        Err(Error::Timeout(format!(
            "erase still running after {} polls",
            self.config.erase_attempts
        )))
    }

    /// Erase all flash, RAM and UICR. Also clears access port protection.
    pub fn erase_all(&mut self) -> Result<()> {
        info!("Erasing all through CTRL-AP");
        self.write_register(registers::ERASE_ALL, 1)?;
        self.flush()?;
        self.wait_all_erased()
    }

    /// Lift erase protection with the key programmed in the device.
    pub fn disable_erase_protect(&mut self, key: u32) -> Result<()> {
        info!("Disabling erase protection");
        self.write_register(registers::ERASE_PROTECT_DISABLE, key)?;
        self.flush()?;
        self.wait_all_erased()
    }

    fn wait_mailbox_read_until(&mut self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.read_register(registers::MAILBOX_TX_STATUS)? == 0 {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
        }
    }

    fn wait_mailbox_written_until(&mut self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.read_register(registers::MAILBOX_RX_STATUS)? != 0 {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
        }
    }

    /// Wait for the CPU to take the word in the TX mailbox.
    ///
    /// `None` waits forever. The status is always checked at least once.
    pub fn wait_mailbox_read(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_mailbox_read_until(deadline)
    }

    /// Wait for the CPU to put a word in the RX mailbox.
    ///
    /// `None` waits forever. The status is always checked at least once.
    pub fn wait_mailbox_written(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_mailbox_written_until(deadline)
    }

    /// Send words to the CPU, one at a time.
    ///
    /// Returns `false` if the whole exchange did not fit in `timeout`.
    pub fn write_mailbox(&mut self, values: &[u32], flush: bool, timeout: Duration) -> Result<bool> {
        let deadline = Some(Instant::now() + timeout);

        for &value in values {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("Mailbox write ran out of time");
                return Ok(false);
            }

            trace!("mailbox >>> 0x{value:08X}");
            self.write_register(registers::MAILBOX_TX_DATA, value)?;

            if !self.wait_mailbox_read_until(deadline)? {
                debug!("CPU did not take mailbox word 0x{value:08X}");
                return Ok(false);
            }
        }

        if flush {
            self.flush()?;
            if !self.wait_mailbox_read_until(deadline)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Receive `length` words from the CPU.
    ///
    /// `None` if the CPU did not provide them all within `timeout`.
    pub fn read_mailbox(&mut self, length: usize, timeout: Duration) -> Result<Option<Vec<u32>>> {
        let deadline = Some(Instant::now() + timeout);
        let mut values = Vec::with_capacity(length);

        for _ in 0..length {
            if !self.wait_mailbox_written_until(deadline)? {
                return Ok(None);
            }

            let value = self.read_register(registers::MAILBOX_RX_DATA)?;
            trace!("mailbox <<< 0x{value:08X}");
            values.push(value);
        }

        Ok(Some(values))
    }

    /// Take back a TX word the CPU never read.
    pub fn clear_tx(&mut self) -> Result<()> {
        if !self.wait_mailbox_read(Some(Duration::ZERO))? {
            trace!("Draining unread TX mailbox word");
            self.read_register(registers::MAILBOX_TX_DATA)?;
        }
        Ok(())
    }

    /// Throw away RX words left over from earlier exchanges.
    pub fn clear_rx(&mut self) -> Result<()> {
        self.flush()?;

        for _ in 0..MAX_DRAIN_WORDS {
            if self.read_register(registers::MAILBOX_RX_STATUS)? == 0 {
                return Ok(());
            }
            let stale = self.read_register(registers::MAILBOX_RX_DATA)?;
            trace!("Discarding stale mailbox word 0x{stale:08X}");
        }

        warn!("RX mailbox still not empty after draining {MAX_DRAIN_WORDS} words");
        Ok(())
    }

    /// Clear both mailbox directions.
    pub fn clear(&mut self) -> Result<()> {
        self.clear_tx()?;
        self.clear_rx()
    }
}
