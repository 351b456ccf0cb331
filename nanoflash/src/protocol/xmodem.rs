//! XMODEM / XMODEM-1K sender.
//!
//! This module implements the sending side of XMODEM with the additive
//! checksum, as spoken by the Skywire Nano bootloader when it receives a
//! firmware image over its UART.
//!
//! ## Protocol Overview
//!
//! ```text
//! Block format:
//! +-----------+-----+------+------------------+-------+
//! | SOH / STX | SEQ | ~SEQ | DATA (128/1024)  | CKSUM |
//! +-----------+-----+------+------------------+-------+
//! | 1         | 1   | 1    | 128 or 1024      | 1     |
//! +-----------+-----+------+------------------+-------+
//! ```
//!
//! The receiver starts the session with a NAK. Every block is answered with
//! ACK (next block) or NAK (resend). The sender closes with EOT, which the
//! receiver ACKs. Short blocks are padded with `0xFF` rather than the
//! classic `0x1A`, because that is what the modem expects in erased flash.

use crate::error::{Error, Result};
use crate::port::{FlowControl, Port};
use log::{debug, error, info, trace, warn};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
}

/// Filler for the unused tail of a block.
pub const PAD_BYTE: u8 = 0xFF;

/// Header length (start byte, id, inverse id).
pub const HEADER_LEN: usize = 3;

/// Default write granularity when the port has no hardware flow control.
pub const CHUNK_SIZE: usize = 256;

/// Upper bound on clear passes while the input keeps receiving data.
const MAX_CLEAR_ROUNDS: usize = 16;

/// Block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "usize", into = "usize")
)]
pub enum PacketSize {
    /// 128-byte blocks (classic XMODEM).
    Small,
    /// 1024-byte blocks (XMODEM-1K).
    #[default]
    Large,
}

impl PacketSize {
    /// Payload length in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Small => 128,
            Self::Large => 1024,
        }
    }

    /// Start-of-block byte for this size.
    #[must_use]
    pub const fn start_byte(self) -> u8 {
        match self {
            Self::Small => control::SOH,
            Self::Large => control::STX,
        }
    }

    /// Smallest block that can carry `len` payload bytes.
    #[must_use]
    pub const fn for_payload(len: usize) -> Option<Self> {
        if len <= Self::Small.len() {
            Some(Self::Small)
        } else if len <= Self::Large.len() {
            Some(Self::Large)
        } else {
            None
        }
    }
}

impl TryFrom<usize> for PacketSize {
    type Error = Error;

    fn try_from(len: usize) -> Result<Self> {
        match len {
            128 => Ok(Self::Small),
            1024 => Ok(Self::Large),
            other => Err(Error::InvalidPacketSize(other)),
        }
    }
}

impl From<PacketSize> for usize {
    fn from(size: PacketSize) -> Self {
        size.len()
    }
}

/// XMODEM block framing.
pub struct Packet;

impl Packet {
    /// The id of the first block in a session.
    #[must_use]
    pub const fn first_id() -> u8 {
        0x01
    }

    /// The id following `id`, wrapping after 0xFF.
    #[must_use]
    pub const fn next_id(id: u8) -> u8 {
        id.wrapping_add(1)
    }

    /// The one's complement of a block id, sent after it in the header.
    #[must_use]
    pub const fn inverse_id(id: u8) -> u8 {
        255 - id
    }

    /// Additive checksum of a padded payload.
    #[must_use]
    pub fn checksum(payload: &[u8]) -> u8 {
        payload
            .iter()
            .fold(0u8, |sum, &b| sum.wrapping_add(b))
    }

    /// Build a block carrying `data` with the given id.
    ///
    /// Payloads up to 128 bytes use an SOH block, up to 1024 bytes an STX
    /// block. Anything larger is rejected rather than truncated.
    pub fn build(data: &[u8], id: u8) -> Result<Vec<u8>> {
        let size = PacketSize::for_payload(data.len())
            .ok_or(Error::PacketTooLarge { len: data.len() })?;

        let mut block = Vec::with_capacity(HEADER_LEN + size.len() + 1);

        block.push(size.start_byte());
        block.push(id);
        block.push(Self::inverse_id(id));

        block.extend_from_slice(data);
        block.resize(HEADER_LEN + size.len(), PAD_BYTE);

        let checksum = Self::checksum(&block[HEADER_LEN..]);
        block.push(checksum);

        Ok(block)
    }
}

/// XMODEM session settings.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct XmodemConfig {
    /// Block size used to slice the data.
    pub packet_size: PacketSize,
    /// How long to wait for the receiver's initial NAK.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub start_timeout: Duration,
    /// How long to wait for the answer to EOT.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub stop_timeout: Duration,
    /// Port read timeout applied while waiting for block responses.
    /// `None` keeps whatever the port was opened with.
    #[cfg_attr(
        feature = "config",
        serde(with = "crate::config::opt_secs", skip_serializing_if = "Option::is_none")
    )]
    pub packet_timeout: Option<Duration>,
    /// Maximum re-sends of one block after NAKs.
    pub max_retries: u32,
    /// Maximum time spent re-sending one block after NAKs.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub retry_window: Duration,
    /// Write size when the port has no hardware flow control.
    pub chunk_size: usize,
    /// Pause before each chunk write without hardware flow control.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub chunk_delay: Duration,
    /// Pause before each block.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub packet_delay: Duration,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            packet_size: PacketSize::Large,
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(30),
            packet_timeout: None,
            max_retries: 10,
            retry_window: Duration::from_secs(40),
            chunk_size: CHUNK_SIZE,
            chunk_delay: Duration::from_millis(100),
            packet_delay: Duration::from_millis(10),
        }
    }
}

/// XMODEM transfer handler.
pub struct Xmodem<'a, P: Port> {
    port: &'a mut P,
    config: XmodemConfig,
    packet_id: u8,
}

impl<'a, P: Port> Xmodem<'a, P> {
    /// Create a new XMODEM sender with default settings (XMODEM-1K).
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, XmodemConfig::default())
    }

    /// Create a new XMODEM sender with custom settings.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self {
            port,
            config,
            packet_id: Packet::first_id(),
        }
    }

    /// Current settings.
    pub fn config(&self) -> &XmodemConfig {
        &self.config
    }

    /// Id of the next block to be sent.
    pub fn packet_id(&self) -> u8 {
        self.packet_id
    }

    /// Read a single byte, `None` if the port timed out.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => {
                trace!("<<< {:#04x}", buf[0]);
                Ok(Some(buf[0]))
            },
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Drop anything left over in the port buffers.
    fn clear(&mut self) -> Result<()> {
        self.port.clear_buffers()?;

        for _ in 0..MAX_CLEAR_ROUNDS {
            if self.port.bytes_to_read()? == 0 {
                return Ok(());
            }
            self.port.clear_buffers()?;
        }

        debug!("Input still receiving data after clearing buffers");
        Ok(())
    }

    /// Wait for the receiver's NAK that opens the session.
    fn start_transmission(&mut self) -> Result<()> {
        self.packet_id = Packet::first_id();
        self.clear()?;

        debug!("Waiting for starting NAK...");
        let start = Instant::now();

        while start.elapsed() < self.config.start_timeout {
            crate::check_interrupted()?;
            match self.read_byte()? {
                Some(control::NAK) => {
                    debug!("Received starting NAK");
                    return Ok(());
                },
                Some(c) => trace!("Discarding 0x{c:02X} while waiting for NAK"),
                None => {},
            }
        }

        error!("Failed to get starting NAK");
        Err(Error::Timeout(format!(
            "no starting NAK within {:.1}s",
            self.config.start_timeout.as_secs_f64()
        )))
    }

    /// Send EOT and wait for the receiver to close the session.
    fn end_transmission(&mut self) -> Result<()> {
        trace!(">>> EOT");
        self.port.write_all_bytes(&[control::EOT])?;

        let start = Instant::now();

        while start.elapsed() < self.config.stop_timeout {
            crate::check_interrupted()?;
            match self.read_byte()? {
                Some(control::ACK) => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                // Some modem firmware answers the final EOT with a NAK.
                Some(control::NAK) => {
                    warn!("EOT response was a NAK");
                    return Ok(());
                },
                Some(c) => trace!("Discarding 0x{c:02X} while waiting for EOT ACK"),
                None => {},
            }
        }

        error!("Failed to get final ACK");
        Err(Error::Timeout(format!(
            "no answer to EOT within {:.1}s",
            self.config.stop_timeout.as_secs_f64()
        )))
    }

    /// Put one framed block on the wire.
    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        let written = if self.port.flow_control() == FlowControl::Hardware {
            self.port.write(block)?
        } else {
            // Without RTS/CTS the receiver can be overrun, so pace the block.
            let mut written = 0;
            for chunk in block.chunks(self.config.chunk_size.max(1)) {
                thread::sleep(self.config.chunk_delay);
                written += self.port.write(chunk)?;
            }
            written
        };
        self.port.flush()?;

        if written != block.len() {
            error!("Failed to send all bytes ({written}/{})", block.len());
            return Err(Error::Xmodem(format!(
                "short write ({written}/{} bytes)",
                block.len()
            )));
        }

        Ok(())
    }

    /// Send one block and wait until the receiver ACKs it.
    fn send_block(&mut self, data: &[u8]) -> Result<()> {
        if let Some(timeout) = self.config.packet_timeout {
            self.port.set_timeout(timeout)?;
        }

        let id = self.packet_id;
        let block = Packet::build(data, id)?;
        let first_attempt = Instant::now();
        let mut retries = 0u32;

        loop {
            crate::check_interrupted()?;
            trace!(">>> block {id} ({} bytes)", block.len());
            self.write_block(&block)?;

            match self.read_byte()? {
                Some(control::ACK) => {
                    trace!("Block {id} ACKed");
                    self.packet_id = Packet::next_id(id);
                    return Ok(());
                },
                Some(control::NAK) => {
                    retries += 1;
                    let limit = if retries > self.config.max_retries {
                        Some(format!("retry limit of {} reached", self.config.max_retries))
                    } else if first_attempt.elapsed() >= self.config.retry_window {
                        Some(format!(
                            "retry window of {:.1}s expired",
                            self.config.retry_window.as_secs_f64()
                        ))
                    } else {
                        None
                    };
                    if let Some(limit) = limit {
                        error!("Block {id} NAKed {retries} times, {limit}");
                        return Err(Error::Xmodem(format!(
                            "block {id} NAKed {retries} times, {limit}"
                        )));
                    }
                    warn!(
                        "Block {id} NAKed, retrying ({retries}/{})",
                        self.config.max_retries
                    );
                },
                Some(c) => {
                    warn!("Failed to get ACK for block {id} (got 0x{c:02X})");
                    return Err(Error::Xmodem(format!(
                        "unexpected response 0x{c:02X} to block {id}, aborting"
                    )));
                },
                None => {
                    error!("Failed to get response to block {id}");
                    return Err(Error::Timeout(format!("no response to block {id}")));
                },
            }
        }
    }

    /// Transfer data to the receiver.
    ///
    /// Succeeds only if every block was ACKed and the EOT was answered.
    /// A failed transfer has to be restarted from the first block.
    pub fn transfer(&mut self, data: &[u8]) -> Result<()> {
        self.transfer_with_progress(data, |_, _| {})
    }

    /// Transfer data, reporting `(bytes_acked, total)` after every block.
    pub fn transfer_with_progress<F>(&mut self, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let previous_timeout = self.port.timeout();

        self.start_transmission()?;

        info!("Sending {} bytes", data.len());

        let total = data.len();
        let mut sent = 0;
        let mut failure = None;

        for chunk in data.chunks(self.config.packet_size.len()) {
            thread::sleep(self.config.packet_delay);
            debug!("Sending bytes {}-{}", sent, sent + chunk.len());

            if let Err(e) = self.send_block(chunk) {
                failure = Some(e);
                break;
            }

            sent += chunk.len();
            progress(sent, total);
        }

        if failure.is_none() {
            info!("Transfer done!");
        }

        // The receiver is told we are done even after a failed block.
        let ended = self.end_transmission();

        if self.config.packet_timeout.is_some() {
            if let Err(e) = self.port.set_timeout(previous_timeout) {
                warn!("Failed to restore port timeout: {e}");
            }
        }

        match failure {
            Some(e) => Err(e),
            None => ended,
        }
    }
}
