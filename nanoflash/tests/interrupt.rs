//! The registered interrupt checker stops long waits.
//!
//! Kept in its own test binary with a single test: the checker is
//! process-wide, so the scenarios run one after another.

use nanoflash::{
    CtrlAp, CtrlApConfig, Dap, Error, FlowControl, Mailbox, MailboxConfig, PacketSize, Port,
    Result, Xmodem, XmodemConfig,
};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// CTRL-AP whose erase never finishes.
struct StuckErase;

impl Dap for StuckErase {
    fn read(&mut self, _port: u8, _register: u32) -> Result<u32> {
        Ok(1)
    }

    fn write(&mut self, _port: u8, _register: u32, _value: u32) -> Result<()> {
        Ok(())
    }
}

/// Firmware that takes every mailbox word and never answers.
struct RebootingFirmware {
    words: usize,
}

impl Dap for RebootingFirmware {
    fn read(&mut self, _port: u8, _register: u32) -> Result<u32> {
        Ok(0)
    }

    fn write(&mut self, _port: u8, _register: u32, _value: u32) -> Result<()> {
        self.words += 1;
        Ok(())
    }
}

/// Serial line with nobody on the other end.
struct SilentLine {
    written: Vec<u8>,
}

impl Read for SilentLine {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(1));
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }
}

impl Write for SilentLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SilentLine {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(1)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn flow_control(&self) -> FlowControl {
        FlowControl::None
    }

    fn name(&self) -> &str {
        "silent"
    }
}

/// Run `wait` on a worker, raise the interrupt flag after 50 ms and return
/// the result together with how long the wait lasted.
fn interrupt_during<T, F>(wait: F) -> (T, Duration)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    INTERRUPTED.store(false, Ordering::Relaxed);
    assert!(!nanoflash::is_interrupted_requested());

    let waiter = std::thread::spawn(move || {
        let started = Instant::now();
        let result = wait();
        (result, started.elapsed())
    });

    std::thread::sleep(Duration::from_millis(50));
    INTERRUPTED.store(true, Ordering::Relaxed);
    assert!(nanoflash::is_interrupted_requested());

    waiter.join().unwrap()
}

#[test]
fn test_interrupt_stops_long_waits() {
    nanoflash::set_interrupt_checker(|| INTERRUPTED.load(Ordering::Relaxed));

    // Erase status poll.
    let config = CtrlApConfig {
        erase_attempts: 1000,
        erase_poll_interval: Duration::from_millis(5),
    };
    let (result, elapsed) =
        interrupt_during(move || CtrlAp::with_config(StuckErase, config).erase_all());
    assert!(matches!(result, Err(Error::Interrupted)), "{result:?}");
    assert!(elapsed < Duration::from_secs(4));

    // Waiting for the bootloader's starting NAK.
    let config = XmodemConfig {
        packet_size: PacketSize::Large,
        start_timeout: Duration::from_secs(30),
        chunk_delay: Duration::ZERO,
        packet_delay: Duration::ZERO,
        ..XmodemConfig::default()
    };
    let ((result, written), elapsed) = interrupt_during(move || {
        let mut line = SilentLine {
            written: Vec::new(),
        };
        let result = Xmodem::with_config(&mut line, config).transfer(&[0x5A; 64]);
        (result, line.written)
    });
    assert!(matches!(result, Err(Error::Interrupted)), "{result:?}");
    assert!(written.is_empty(), "nothing is sent before the starting NAK");
    assert!(elapsed < Duration::from_secs(4));

    // Pinging the device back after a conversion.
    let config = MailboxConfig {
        write_timeout: Duration::from_millis(20),
        response_timeout: Duration::from_millis(20),
        ping_attempts: 1000,
    };
    let ((result, words), elapsed) = interrupt_during(move || {
        let mut firmware = RebootingFirmware { words: 0 };
        let result = Mailbox::with_config(CtrlAp::new(&mut firmware), config).convert();
        (result, firmware.words)
    });
    assert!(matches!(result, Err(Error::Interrupted)), "{result:?}");
    // The conversion request itself went out.
    assert!(words >= 2, "{words} mailbox words written");
    assert!(elapsed < Duration::from_secs(4));
}
