//! Serial transfer protocols.
//!
//! - [`xmodem`]: XMODEM / XMODEM-1K sender for bootloader image uploads

pub mod xmodem;

pub use xmodem::{PacketSize, Xmodem, XmodemConfig};
