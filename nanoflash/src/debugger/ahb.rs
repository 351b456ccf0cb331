//! AHB-AP memory transport.
//!
//! Memory accesses go through three registers of access port 0: CSW selects
//! transfer size, address increment and security attribute, TAR holds the
//! address, and DRW moves the data.

use crate::debugger::Dap;
use crate::error::{Error, Result};
use log::trace;
use std::time::{Duration, Instant};

/// Access port number of the AHB-AP.
pub const AHB_AP_PORT: u8 = 0;

/// AHB-AP registers.
pub mod registers {
    /// Control/Status Word (CSW).
    pub const CONTROL_STATUS: u32 = 0x00;
    /// Transfer Address Register (TAR).
    pub const TRANSFER_ADDRESS: u32 = 0x04;
    /// Data Read/Write register (DRW).
    pub const DATA_READ_WRITE: u32 = 0x0C;
}

/// CSW fields.
mod csw {
    pub const SIZE_MASK: u32 = 0b11;
    pub const ADDR_INC_MASK: u32 = 0b11 << 4;
    pub const ADDR_INC_SINGLE: u32 = 0b01 << 4;
    pub const DEBUG_ENABLE: u32 = 1 << 6;
    pub const TRANSFER_IN_PROGRESS: u32 = 1 << 7;
    pub const NON_SECURE: u32 = 1 << 30;
}

/// TAR auto-increment only covers the low 10 address bits.
const AUTO_INCREMENT_WRAP: u32 = 1024;

/// Width of a single AHB transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    /// 8-bit.
    Byte,
    /// 16-bit.
    HalfWord,
    /// 32-bit.
    Word,
}

impl TransferSize {
    const fn bits(self) -> u32 {
        match self {
            Self::Byte => 0,
            Self::HalfWord => 1,
            Self::Word => 2,
        }
    }
}

/// AHB-AP settings.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct AhbConfig {
    /// How long to wait for a pending transfer to finish.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub ready_timeout: Duration,
}

impl Default for AhbConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(1),
        }
    }
}

/// Memory access through the AHB-AP.
pub struct Ahb<D: Dap> {
    dap: D,
    secure: bool,
    config: AhbConfig,
}

impl<D: Dap> Ahb<D> {
    /// Create an AHB-AP view acting as a Secure debugger.
    pub fn new(dap: D) -> Self {
        Self::with_config(dap, AhbConfig::default())
    }

    /// Create an AHB-AP view with custom settings.
    pub fn with_config(dap: D, config: AhbConfig) -> Self {
        Self {
            dap,
            secure: true,
            config,
        }
    }

    /// Act as a Secure or Non-Secure debugger from the next access on.
    pub fn set_secure_state(&mut self, secure: bool) {
        self.secure = secure;
    }

    /// Whether accesses are made as a Secure debugger.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Borrow the underlying probe.
    pub fn dap_mut(&mut self) -> &mut D {
        &mut self.dap
    }

    /// Give back the underlying probe.
    pub fn into_inner(self) -> D {
        self.dap
    }

    /// Update the CSW. Fields passed as `None` are left as they are; the
    /// debug-enable bit is always set.
    ///
    /// Nothing is written if the resulting value equals the current one.
    pub fn configure(
        &mut self,
        size: Option<TransferSize>,
        auto_increment: Option<bool>,
        secure: Option<bool>,
    ) -> Result<()> {
        let current = self
            .dap
            .read(AHB_AP_PORT, registers::CONTROL_STATUS)?;

        let mut value = current | csw::DEBUG_ENABLE;

        if let Some(size) = size {
            value = (value & !csw::SIZE_MASK) | size.bits();
        }

        if let Some(auto_increment) = auto_increment {
            value &= !csw::ADDR_INC_MASK;
            if auto_increment {
                value |= csw::ADDR_INC_SINGLE;
            }
        }

        match secure {
            Some(true) => value &= !csw::NON_SECURE,
            Some(false) => value |= csw::NON_SECURE,
            None => {},
        }

        if value == current {
            return Ok(());
        }

        trace!("AHB-AP CSW 0x{current:08X} -> 0x{value:08X}");
        self.dap
            .write(AHB_AP_PORT, registers::CONTROL_STATUS, value)
    }

    fn set_default_config(&mut self) -> Result<()> {
        self.configure(Some(TransferSize::Word), Some(true), Some(self.secure))
    }

    /// Wait until no AHB transfer is in progress.
    pub fn wait_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.ready_timeout;
        let mut last_error = None;

        loop {
            match self
                .dap
                .read(AHB_AP_PORT, registers::CONTROL_STATUS)
            {
                Ok(status) if status & csw::TRANSFER_IN_PROGRESS == 0 => return Ok(()),
                Ok(_) => last_error = None,
                // The probe may report faults while the bus is busy.
                Err(e) => {
                    trace!("CSW read failed while waiting for AHB-AP: {e}");
                    last_error = Some(e);
                },
            }

            if Instant::now() >= deadline {
                let waited = self.config.ready_timeout.as_secs_f64();
                return Err(Error::Timeout(match last_error {
                    Some(e) => format!("AHB-AP not ready after {waited:.1}s, last error: {e}"),
                    None => format!("AHB-AP transfer still in progress after {waited:.1}s"),
                }));
            }
        }
    }

    /// Read `length` consecutive words starting at `address`.
    pub fn read(&mut self, address: u32, length: usize) -> Result<Vec<u32>> {
        self.wait_ready()?;
        self.set_default_config()?;

        trace!("AHB read {length} words @ 0x{address:08X}");
        self.dap
            .write(AHB_AP_PORT, registers::TRANSFER_ADDRESS, address)?;

        let mut values = Vec::with_capacity(length);
        let mut address = address;

        for _ in 0..length {
            self.wait_ready()?;
            values.push(
                self.dap
                    .read(AHB_AP_PORT, registers::DATA_READ_WRITE)?,
            );

            address = address.wrapping_add(4);
            if address % AUTO_INCREMENT_WRAP == 0 {
                self.dap
                    .write(AHB_AP_PORT, registers::TRANSFER_ADDRESS, address)?;
            }
        }

        Ok(values)
    }

    /// Write consecutive words starting at `address`.
    ///
    /// With `flush`, waits for the last transfer and rewrites TAR so the
    /// final word is committed before returning.
    pub fn write(&mut self, address: u32, values: &[u32], flush: bool) -> Result<()> {
        self.wait_ready()?;
        self.set_default_config()?;

        trace!("AHB write {} words @ 0x{address:08X}", values.len());
        self.dap
            .write(AHB_AP_PORT, registers::TRANSFER_ADDRESS, address)?;

        let mut address = address;

        for &value in values {
            self.dap
                .write(AHB_AP_PORT, registers::DATA_READ_WRITE, value)?;

            address = address.wrapping_add(4);
            if address % AUTO_INCREMENT_WRAP == 0 {
                self.dap
                    .write(AHB_AP_PORT, registers::TRANSFER_ADDRESS, address)?;
            }
        }

        if flush {
            self.wait_ready()?;
            self.dap
                .write(AHB_AP_PORT, registers::TRANSFER_ADDRESS, address)?;
        }

        Ok(())
    }
}
