//! UICR (User Information Configuration Registers) access over the AHB-AP.

use crate::debugger::{Ahb, Dap};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::info;

/// UICR and related register addresses.
pub mod registers {
    /// Start of the UICR block.
    pub const UICR_START: u32 = 0x00FF_8000;
    /// Start of the Non-Secure NVMC peripheral.
    pub const NVMC_NS_START: u32 = 0x4003_9000;

    /// Access port protection.
    pub const APPROTECT: u32 = UICR_START + 0x000;
    /// Secure access port protection.
    pub const SECURE_APPROTECT: u32 = UICR_START + 0x02C;
    /// Erase protection.
    pub const ERASEPROTECT: u32 = UICR_START + 0x030;
    /// One-time programmable area.
    pub const OTP: u32 = UICR_START + 0x108;

    /// Lets a Non-Secure debugger set APPROTECT when Secure access is
    /// locked out.
    pub const WRITE_UICR_NS: u32 = NVMC_NS_START + 0x588;
}

/// Value written to `SECURE_APPROTECT` to lock the Secure side.
const SECURE_APPROTECT_ENABLE: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Key written to `WRITE_UICR_NS` to lock the Non-Secure side.
const NS_APPROTECT_KEY: [u8; 4] = [0x71, 0x5A, 0xBE, 0xAF];

/// UICR view on top of an AHB-AP.
pub struct Uicr<D: Dap> {
    ahb: Ahb<D>,
}

impl<D: Dap> Uicr<D> {
    /// Create a UICR view.
    pub fn new(ahb: Ahb<D>) -> Self {
        Self { ahb }
    }

    /// Borrow the AHB-AP.
    pub fn ahb_mut(&mut self) -> &mut Ahb<D> {
        &mut self.ahb
    }

    /// Give back the AHB-AP.
    pub fn into_inner(self) -> Ahb<D> {
        self.ahb
    }

    /// Enable access port protection for the Secure or Non-Secure side.
    ///
    /// Takes effect after the next reset.
    pub fn enable_ap_protect(&mut self, secure: bool) -> Result<()> {
        let (address, bytes) = if secure {
            (registers::SECURE_APPROTECT, SECURE_APPROTECT_ENABLE)
        } else {
            (registers::WRITE_UICR_NS, NS_APPROTECT_KEY)
        };

        info!(
            "Enabling {} AP protection",
            if secure { "Secure" } else { "Non-Secure" }
        );

        self.ahb.set_secure_state(secure);
        self.ahb
            .write(address, &[LittleEndian::read_u32(&bytes)], true)
    }

    /// Read one UICR word.
    pub fn read_word(&mut self, address: u32) -> Result<u32> {
        self.ahb
            .read(address, 1)?
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol(format!("no data read at 0x{address:08X}")))
    }
}
