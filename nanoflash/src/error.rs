//! Error types for nanoflash.

use std::io;
use thiserror::Error;

/// Result type for nanoflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for nanoflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// XMODEM transfer error.
    #[error("XMODEM error: {0}")]
    Xmodem(String),

    /// Payload does not fit in a single XMODEM packet.
    #[error("Packet data too large: {len} bytes (max 1024)")]
    PacketTooLarge {
        /// Length of the rejected payload.
        len: usize,
    },

    /// XMODEM packet size other than 128 or 1024.
    #[error("Invalid XMODEM packet size: {0} (expected 128 or 1024)")]
    InvalidPacketSize(usize),

    /// Debug access port failure reported by the probe backend.
    #[error("Debug port error: {0}")]
    Dap(String),

    /// Mass erase or erase-protect disable failed.
    #[error("Erase failed: {0}")]
    Erase(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stopped by the registered interrupt checker.
    #[error("Operation interrupted")]
    Interrupted,
}
