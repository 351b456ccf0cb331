//! Request/response protocol with the modem firmware over the CTRL-AP
//! mailbox.
//!
//! ## Packet format
//!
//! Every field is one mailbox word:
//!
//! ```text
//! +------+--------+----------------+
//! | TYPE | LENGTH | DATA ...       |
//! +------+--------+----------------+
//! ```
//!
//! A request carries a [`Request`] type. The firmware answers with a
//! two-word packet whose type is a [`Response`].
//!
//! A request ends in one of three ways: acknowledged, refused, or no answer
//! at all. [`Outcome`] keeps those apart because `convert` is only
//! successful when the device goes silent.

use crate::debugger::{CtrlAp, Dap};
use crate::error::Result;
use log::{debug, info, warn};
use std::time::Duration;

/// Words in a response packet.
const RESPONSE_LEN: usize = 2;

/// Request types understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Request {
    /// Liveness check.
    Ping = 0,
    /// Start a device firmware update.
    Dfu = 1,
    /// Convert the device so it can be flashed.
    Convert = 2,
}

/// Response types sent by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Response {
    /// The request was not recognised.
    Unknown = 0,
    /// The request was handled.
    Ok = 1,
    /// The request failed.
    Error = 2,
}

impl From<u32> for Response {
    fn from(word: u32) -> Self {
        match word {
            1 => Self::Ok,
            2 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Firmware images that can host the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Target {
    /// Secure primary application.
    Monitor = 0,
    /// Non-Secure secondary application.
    Widget = 1,
}

/// How a mailbox request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The firmware answered `Ok`.
    Ack,
    /// The firmware answered, but not with `Ok`.
    Nak,
    /// The request could not be delivered or was never answered.
    Timeout,
}

/// A mailbox packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxPacket {
    /// Request or response type.
    pub kind: u32,
    /// Declared payload length.
    pub length: u32,
    /// Payload words.
    pub data: Vec<u32>,
}

impl MailboxPacket {
    /// Create a packet. `length` is sent as given.
    pub fn new(kind: u32, length: u32, data: Vec<u32>) -> Self {
        Self { kind, length, data }
    }

    /// A ping request.
    pub fn ping() -> Self {
        Self::new(Request::Ping as u32, 0, Vec::new())
    }

    /// A DFU request.
    pub fn dfu(auto_reboot: bool) -> Self {
        Self::new(Request::Dfu as u32, 1, vec![u32::from(auto_reboot)])
    }

    /// A convert request.
    pub fn convert() -> Self {
        Self::new(Request::Convert as u32, 0, Vec::new())
    }

    /// The words put on the wire.
    pub fn buffer(&self) -> Vec<u32> {
        let mut buffer = Vec::with_capacity(2 + self.data.len());
        buffer.push(self.kind);
        buffer.push(self.length);
        buffer.extend_from_slice(&self.data);
        buffer
    }

    /// Parse received words; `None` if they cannot hold a packet header.
    pub fn from_buffer(buffer: &[u32]) -> Option<Self> {
        match buffer {
            [kind, length, data @ ..] => Some(Self::new(*kind, *length, data.to_vec())),
            _ => None,
        }
    }

    /// The packet type read as a response.
    pub fn response(&self) -> Response {
        Response::from(self.kind)
    }
}

/// Mailbox protocol settings.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct MailboxConfig {
    /// Time allowed for the firmware to take all request words.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub write_timeout: Duration,
    /// Time allowed for the firmware to answer.
    #[cfg_attr(feature = "config", serde(with = "crate::config::secs"))]
    pub response_timeout: Duration,
    /// Pings sent after `convert` while waiting for the device to return.
    pub ping_attempts: u32,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(1),
            ping_attempts: 10,
        }
    }
}

/// Mailbox client.
pub struct Mailbox<D: Dap> {
    ctrl_ap: CtrlAp<D>,
    config: MailboxConfig,
}

impl<D: Dap> Mailbox<D> {
    /// Create a mailbox client with default settings.
    pub fn new(ctrl_ap: CtrlAp<D>) -> Self {
        Self::with_config(ctrl_ap, MailboxConfig::default())
    }

    /// Create a mailbox client with custom settings.
    pub fn with_config(ctrl_ap: CtrlAp<D>, config: MailboxConfig) -> Self {
        Self { ctrl_ap, config }
    }

    /// Borrow the CTRL-AP.
    pub fn ctrl_ap_mut(&mut self) -> &mut CtrlAp<D> {
        &mut self.ctrl_ap
    }

    /// Give back the CTRL-AP.
    pub fn into_inner(self) -> CtrlAp<D> {
        self.ctrl_ap
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// `Err` is only returned when the probe itself fails.
    pub fn send_request(&mut self, request: &MailboxPacket, timeout: Duration) -> Result<Outcome> {
        self.ctrl_ap.clear()?;

        if !self
            .ctrl_ap
            .write_mailbox(&request.buffer(), false, self.config.write_timeout)?
        {
            debug!("Mailbox request 0x{:X} was not taken", request.kind);
            return Ok(Outcome::Timeout);
        }

        let Some(words) = self
            .ctrl_ap
            .read_mailbox(RESPONSE_LEN, timeout)?
        else {
            debug!("No response to mailbox request 0x{:X}", request.kind);
            return Ok(Outcome::Timeout);
        };

        let Some(response) = MailboxPacket::from_buffer(&words) else {
            warn!("Malformed mailbox response {words:?}");
            return Ok(Outcome::Nak);
        };

        match response.response() {
            Response::Ok => Ok(Outcome::Ack),
            other => {
                debug!("Mailbox request 0x{:X} answered {other:?}", request.kind);
                Ok(Outcome::Nak)
            },
        }
    }

    /// Check that the firmware is listening.
    pub fn ping(&mut self) -> Result<bool> {
        let outcome = self.send_request(&MailboxPacket::ping(), self.config.response_timeout)?;
        Ok(outcome == Outcome::Ack)
    }

    /// Start a firmware update, rebooting afterwards if `auto_reboot`.
    pub fn dfu(&mut self, auto_reboot: bool) -> Result<bool> {
        info!("Requesting DFU (auto reboot: {auto_reboot})");
        let outcome = self.send_request(
            &MailboxPacket::dfu(auto_reboot),
            self.config.response_timeout,
        )?;
        Ok(outcome == Outcome::Ack)
    }

    /// Convert the device to a flashable state.
    ///
    /// The firmware erases and reboots instead of answering, so the request
    /// must go unanswered. Success is then confirmed by pinging the device
    /// until it comes back.
    pub fn convert(&mut self) -> Result<bool> {
        info!("Requesting conversion");

        let outcome = self.send_request(&MailboxPacket::convert(), self.config.response_timeout)?;
        if outcome != Outcome::Timeout {
            warn!("Device answered the conversion request ({outcome:?})");
            return Ok(false);
        }

        for attempt in 1..=self.config.ping_attempts {
            crate::check_interrupted()?;
            if self.ping()? {
                info!("Device back after conversion");
                return Ok(true);
            }
            debug!("Ping {attempt}/{} after conversion failed", self.config.ping_attempts);
        }

        warn!("Device did not come back after conversion");
        Ok(false)
    }
}
