//! [`Dap`] backend over a `probe-rs` ARM debug interface.
//!
//! Enabled by the `probe-rs` feature. The interface is borrowed, so the
//! caller keeps ownership of the session:
//!
//! ```rust,ignore
//! use nanoflash::debugger::{ArmInterfaceDap, CtrlAp, Mailbox};
//!
//! let mut interface = probe.try_into_arm_interface()?.initialize_unspecified(dp)?;
//! let mut mailbox = Mailbox::new(CtrlAp::new(ArmInterfaceDap::new(&mut *interface)));
//! mailbox.ping()?;
//! ```

use super::Dap;
use crate::error::{Error, Result};
use log::trace;
use probe_rs::architecture::arm::{DapAccess, DpAddress, FullyQualifiedApAddress};

/// [`Dap`] over anything implementing the `probe-rs` raw AP register calls,
/// e.g. `dyn ArmProbeInterface`.
pub struct ArmInterfaceDap<'a, T: ?Sized> {
    interface: &'a mut T,
    dp: DpAddress,
}

impl<'a, T: DapAccess + ?Sized> ArmInterfaceDap<'a, T> {
    /// Wrap an initialised interface talking to the only DP on the bus.
    pub fn new(interface: &'a mut T) -> Self {
        Self {
            interface,
            dp: DpAddress::Default,
        }
    }

    /// Select a DP on a SWD multidrop bus.
    #[must_use]
    pub fn with_dp(mut self, dp: DpAddress) -> Self {
        self.dp = dp;
        self
    }

    /// Access the wrapped interface.
    pub fn interface_mut(&mut self) -> &mut T {
        &mut *self.interface
    }

    fn ap(&self, port: u8) -> FullyQualifiedApAddress {
        FullyQualifiedApAddress::v1_with_dp(self.dp, port)
    }
}

/// AP register offsets are a single byte on ADIv5.
fn register_address(port: u8, register: u32) -> Result<u8> {
    u8::try_from(register).map_err(|_| {
        Error::Dap(format!(
            "register 0x{register:X} of AP{port} is outside the 8-bit AP address space"
        ))
    })
}

fn dap_error(port: u8, register: u32, e: &impl std::fmt::Display) -> Error {
    Error::Dap(format!("AP{port} register 0x{register:02X}: {e}"))
}

impl<T: DapAccess + ?Sized> Dap for ArmInterfaceDap<'_, T> {
    fn read(&mut self, port: u8, register: u32) -> Result<u32> {
        let address = register_address(port, register)?;
        let ap = self.ap(port);
        let value = self
            .interface
            .read_raw_ap_register(&ap, address)
            .map_err(|e| dap_error(port, register, &e))?;
        trace!("AP{port}[0x{register:02X}] -> 0x{value:08X}");
        Ok(value)
    }

    fn write(&mut self, port: u8, register: u32, value: u32) -> Result<()> {
        let address = register_address(port, register)?;
        let ap = self.ap(port);
        trace!("AP{port}[0x{register:02X}] <- 0x{value:08X}");
        self.interface
            .write_raw_ap_register(&ap, address, value)
            .map_err(|e| dap_error(port, register, &e))
    }
}
