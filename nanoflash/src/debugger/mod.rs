//! Debug-port access to the nRF9160 inside a Skywire Nano.
//!
//! Everything here sits on top of a [`Dap`]: a probe that can read and write
//! 32-bit registers of a numbered access port.
//!
//! ```text
//! +-----------+   +-----------------+
//! |   Uicr    |   |     Mailbox     |
//! +-----+-----+   +--------+--------+
//!       |                  |
//!       v                  v
//! +-----+-----+   +--------+--------+
//! | Ahb (AP 0)|   |  CtrlAp (AP 4)  |
//! +-----+-----+   +--------+--------+
//!       |                  |
//!       +--------+---------+
//!                v
//!          +-----+-----+
//!          |  Dap impl |
//!          +-----------+
//! ```
//!
//! Both access-port views take the probe generically, so they can share one
//! probe by borrowing it:
//!
//! ```rust,no_run
//! use nanoflash::debugger::{Ahb, CtrlAp, Dap, Mailbox};
//!
//! fn provision<D: Dap>(probe: &mut D) -> nanoflash::Result<()> {
//!     let mut mailbox = Mailbox::new(CtrlAp::new(&mut *probe));
//!     if mailbox.ping()? {
//!         mailbox.dfu(true)?;
//!     }
//!
//!     let mut ahb = Ahb::new(&mut *probe);
//!     let words = ahb.read(0x00FF_8000, 4)?;
//!     println!("UICR: {words:08X?}");
//!     Ok(())
//! }
//! ```

pub mod ahb;
#[cfg(feature = "probe-rs")]
pub mod arm_interface;
pub mod ctrl_ap;
pub mod mailbox;
pub mod uicr;

pub use ahb::{Ahb, AhbConfig, TransferSize};
#[cfg(feature = "probe-rs")]
pub use arm_interface::ArmInterfaceDap;
pub use ctrl_ap::{CtrlAp, CtrlApConfig};
pub use mailbox::{Mailbox, MailboxConfig, MailboxPacket, Outcome, Request, Response, Target};
pub use uicr::Uicr;

use crate::error::Result;

/// Register-level access to the debug access ports of a target.
///
/// Implementations wrap a vendor probe library; the `probe-rs` feature
/// provides `ArmInterfaceDap`. Failures should be reported as
/// [`crate::Error::Dap`].
pub trait Dap {
    /// Read a 32-bit register of access port `port`.
    fn read(&mut self, port: u8, register: u32) -> Result<u32>;

    /// Write a 32-bit register of access port `port`.
    fn write(&mut self, port: u8, register: u32, value: u32) -> Result<()>;
}

impl<D: Dap + ?Sized> Dap for &mut D {
    fn read(&mut self, port: u8, register: u32) -> Result<u32> {
        (**self).read(port, register)
    }

    fn write(&mut self, port: u8, register: u32, value: u32) -> Result<()> {
        (**self).write(port, register, value)
    }
}

impl<D: Dap + ?Sized> Dap for Box<D> {
    fn read(&mut self, port: u8, register: u32) -> Result<u32> {
        (**self).read(port, register)
    }

    fn write(&mut self, port: u8, register: u32, value: u32) -> Result<()> {
        (**self).write(port, register, value)
    }
}
