//! Debug-port provisioning flows against a simulated nRF9160.

use nanoflash::debugger::ahb::{AHB_AP_PORT, registers as ahb_reg};
use nanoflash::debugger::ctrl_ap::{CTRL_AP_PORT, registers as ctrl_reg};
use nanoflash::debugger::mailbox::{Request, Response};
use nanoflash::debugger::uicr::registers as uicr_reg;
use nanoflash::{Ahb, CtrlAp, CtrlApConfig, Dap, Error, Mailbox, MailboxConfig, Result, Uicr};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// What the application firmware is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firmware {
    Running,
    /// Converting: the next `n` requests go unanswered.
    Rebooting(u32),
}

struct Nrf9160 {
    // CTRL-AP
    firmware: Firmware,
    request: Vec<u32>,
    responses: VecDeque<u32>,
    erase_polls: Option<u32>,
    ap_protect_status: u32,
    dfu_requests: Vec<bool>,

    // AHB-AP
    csw: u32,
    tar: u32,
    memory: HashMap<u32, u32>,
}

impl Nrf9160 {
    fn new() -> Self {
        Self {
            firmware: Firmware::Running,
            request: Vec::new(),
            responses: VecDeque::new(),
            erase_polls: None,
            ap_protect_status: 0,
            dfu_requests: Vec::new(),
            csw: 0x0300_0040,
            tar: 0,
            memory: HashMap::new(),
        }
    }

    fn mailbox_word(&mut self, word: u32) {
        self.request.push(word);

        let [kind, length, data @ ..] = self.request.as_slice() else {
            return;
        };
        if data.len() < *length as usize {
            return;
        }
        let (kind, data) = (*kind, data.to_vec());
        self.request.clear();

        if let Firmware::Rebooting(remaining) = self.firmware {
            self.firmware = if remaining <= 1 {
                Firmware::Running
            } else {
                Firmware::Rebooting(remaining - 1)
            };
            return;
        }

        let response = match kind {
            k if k == Request::Ping as u32 => Response::Ok,
            k if k == Request::Dfu as u32 => {
                self.dfu_requests.push(data == [1]);
                Response::Ok
            },
            k if k == Request::Convert as u32 => {
                self.firmware = Firmware::Rebooting(2);
                return;
            },
            _ => Response::Unknown,
        };
        self.responses.extend([response as u32, 0]);
    }

    fn advance_tar(&mut self) {
        self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(4) & 0x3FF);
    }
}

impl Dap for Nrf9160 {
    fn read(&mut self, port: u8, register: u32) -> Result<u32> {
        match (port, register) {
            (CTRL_AP_PORT, ctrl_reg::MAILBOX_TX_STATUS) => Ok(0),
            (CTRL_AP_PORT, ctrl_reg::MAILBOX_RX_STATUS) => Ok(u32::from(!self.responses.is_empty())),
            (CTRL_AP_PORT, ctrl_reg::MAILBOX_RX_DATA) => Ok(self.responses.pop_front().unwrap_or(0)),
            (CTRL_AP_PORT, ctrl_reg::ERASE_ALL_STATUS) => match self.erase_polls {
                Some(0) | None => {
                    self.erase_polls = None;
                    Ok(0)
                },
                Some(n) => {
                    self.erase_polls = Some(n - 1);
                    Ok(1)
                },
            },
            (CTRL_AP_PORT, ctrl_reg::AP_PROTECT_STATUS) => Ok(self.ap_protect_status),
            (CTRL_AP_PORT, ctrl_reg::IDR) => Ok(0x1288_0000),
            (CTRL_AP_PORT, _) => Ok(0),
            (AHB_AP_PORT, ahb_reg::CONTROL_STATUS) => Ok(self.csw),
            (AHB_AP_PORT, ahb_reg::DATA_READ_WRITE) => {
                let value = self.memory.get(&self.tar).copied().unwrap_or(0xFFFF_FFFF);
                self.advance_tar();
                Ok(value)
            },
            _ => Err(Error::Dap(format!("read AP{port} 0x{register:02X}"))),
        }
    }

    fn write(&mut self, port: u8, register: u32, value: u32) -> Result<()> {
        match (port, register) {
            (CTRL_AP_PORT, ctrl_reg::MAILBOX_TX_DATA) => self.mailbox_word(value),
            (CTRL_AP_PORT, ctrl_reg::ERASE_ALL) => {
                self.memory.clear();
                self.ap_protect_status = 1;
                self.erase_polls = Some(3);
            },
            (CTRL_AP_PORT, _) => {},
            (AHB_AP_PORT, ahb_reg::CONTROL_STATUS) => self.csw = value,
            (AHB_AP_PORT, ahb_reg::TRANSFER_ADDRESS) => self.tar = value,
            (AHB_AP_PORT, ahb_reg::DATA_READ_WRITE) => {
                self.memory.insert(self.tar, value);
                self.advance_tar();
            },
            _ => return Err(Error::Dap(format!("write AP{port} 0x{register:02X}"))),
        }
        Ok(())
    }
}

fn mailbox_config() -> MailboxConfig {
    MailboxConfig {
        write_timeout: Duration::from_millis(50),
        response_timeout: Duration::from_millis(20),
        ping_attempts: 5,
    }
}

fn ctrl_ap_config() -> CtrlApConfig {
    CtrlApConfig {
        erase_attempts: 10,
        erase_poll_interval: Duration::from_millis(1),
    }
}

#[test]
fn test_mailbox_provisioning_flow() {
    let mut target = Nrf9160::new();
    let mut mailbox = Mailbox::with_config(CtrlAp::new(&mut target), mailbox_config());

    assert!(mailbox.ping().unwrap());
    assert!(mailbox.dfu(true).unwrap());
    assert!(mailbox.convert().unwrap());
    assert!(mailbox.ping().unwrap());

    assert_eq!(target.dfu_requests, vec![true]);
    assert_eq!(target.firmware, Firmware::Running);
}

#[test]
fn test_unknown_request_is_refused() {
    let mut target = Nrf9160::new();
    let mut mailbox = Mailbox::with_config(CtrlAp::new(&mut target), mailbox_config());

    let outcome = mailbox
        .send_request(
            &nanoflash::MailboxPacket::new(0x7F, 0, Vec::new()),
            Duration::from_millis(20),
        )
        .unwrap();
    assert_eq!(outcome, nanoflash::Outcome::Nak);
}

#[test]
fn test_recover_and_lock_device() {
    let mut target = Nrf9160::new();
    target.memory.insert(uicr_reg::APPROTECT, 0x0000_0000);

    let mut ctrl_ap = CtrlAp::with_config(&mut target, ctrl_ap_config());
    assert!(!ctrl_ap.is_unlocked().unwrap());
    assert_eq!(ctrl_ap.idr().unwrap(), 0x1288_0000);
    ctrl_ap.erase_all().unwrap();
    assert!(ctrl_ap.is_unlocked().unwrap());

    let mut uicr = Uicr::new(Ahb::new(&mut target));
    assert_eq!(uicr.read_word(uicr_reg::APPROTECT).unwrap(), 0xFFFF_FFFF);

    uicr.enable_ap_protect(false).unwrap();
    assert_eq!(uicr.read_word(uicr_reg::WRITE_UICR_NS).unwrap(), 0xAFBE_5A71);
    // Reading back happened as a Non-Secure debugger as well.
    assert_ne!(target.csw & (1 << 30), 0);
}

#[test]
fn test_bulk_write_across_1k_boundaries() {
    let mut target = Nrf9160::new();
    let base = 0x2000_0000;
    let words: Vec<u32> = (0..600).collect();

    let mut ahb = Ahb::new(&mut target);
    ahb.write(base, &words, true).unwrap();
    let read_back = ahb.read(base, words.len()).unwrap();

    assert_eq!(read_back, words);
    assert_eq!(target.memory.len(), 600);
}

#[cfg(feature = "config")]
#[test]
fn test_settings_drive_components() {
    let settings = nanoflash::Settings::from_toml_str(
        r#"
        [mailbox]
        response_timeout = 0.25
        ping_attempts = 2

        [ctrl_ap]
        erase_attempts = 2
        erase_poll_interval = 0.0
        "#,
    )
    .unwrap();

    let mut target = Nrf9160::new();
    let result = CtrlAp::with_config(&mut target, settings.ctrl_ap.clone()).erase_all();
    // Three busy polls do not fit in two attempts.
    assert!(matches!(result, Err(Error::Timeout(_))), "{result:?}");

    let mut mailbox = Mailbox::with_config(CtrlAp::new(&mut target), settings.mailbox);
    assert!(mailbox.ping().unwrap());
}
