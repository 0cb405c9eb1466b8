//! Blocking serial transport for the acquisition board.
//!
//! The transport is split at two seams so sessions can run against real
//! hardware or a simulated board:
//!
//! - [`PortOpener`] turns a port name into an open [`SerialLink`].
//! - [`SerialLink`] is one open connection: full writes and exact-length reads.
//!
//! [`Transport`] owns at most one link at a time and guarantees it is closed
//! exactly once, whether the caller closes it explicitly, reopens it, or
//! drops the transport on an error path.
//!
//! All calls block. They must run on a worker thread, never on the thread that
//! dispatches run events (see [`crate::repeater`]).

use crate::config::SerialSettings;
use crate::error::{AppResult, DaqError};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Baud rate the board firmware is fixed at.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Line settings for one connection. 8N1, no flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Baud rate (the board only speaks 9600).
    pub baud_rate: u32,
    /// Overall deadline for one `read_exact` call.
    pub read_timeout: Duration,
    /// Timeout for a single OS read; the deadline loop retries until `read_timeout`.
    pub poll_interval: Duration,
    /// Settle time after closing an already open link before reopening it.
    pub reset_delay: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
            reset_delay: Duration::ZERO,
        }
    }
}

impl From<&SerialSettings> for LinkSettings {
    fn from(settings: &SerialSettings) -> Self {
        Self {
            baud_rate: settings.baud_rate,
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            reset_delay: Duration::from_millis(settings.reset_delay_ms),
        }
    }
}

/// One open connection to the board.
pub trait SerialLink: Send {
    /// Write every byte or fail with `LinkError`.
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Block until exactly `n` bytes arrived, or fail with `Timeout`/`LinkError`.
    fn read_exact(&mut self, n: usize) -> AppResult<Vec<u8>>;

    /// Release the underlying port. Called once by [`Transport`].
    fn close(&mut self);
}

/// Opens links by port name.
pub trait PortOpener: Send + Sync {
    /// Open `port_name`, failing with `PortUnavailable` if it is missing or claimed.
    fn open(&self, port_name: &str, settings: &LinkSettings) -> AppResult<Box<dyn SerialLink>>;
}

/// Owner of the single connection a session uses.
pub struct Transport {
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    link: Option<Box<dyn SerialLink>>,
    port_name: Option<String>,
}

impl Transport {
    /// Closed transport that opens links through `opener`.
    #[must_use]
    pub fn new(opener: Arc<dyn PortOpener>, settings: LinkSettings) -> Self {
        Self {
            opener,
            settings,
            link: None,
            port_name: None,
        }
    }

    /// Open `port_name`.
    ///
    /// An already open link is closed first and reopened, which resets the
    /// board the same way unplugging the adapter would.
    pub fn open(&mut self, port_name: &str) -> AppResult<()> {
        if self.is_open() {
            debug!(port = port_name, "Link already open, resetting");
            self.close();
            if !self.settings.reset_delay.is_zero() {
                std::thread::sleep(self.settings.reset_delay);
            }
        }

        let link = self.opener.open(port_name, &self.settings)?;
        self.link = Some(link);
        self.port_name = Some(port_name.to_string());
        debug!(
            port = port_name,
            baud = self.settings.baud_rate,
            "Serial link opened"
        );
        Ok(())
    }

    /// Write the whole frame, failing with `LinkError` when not open.
    pub fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.link_mut()?.write_all(bytes)
    }

    /// Read exactly `n` bytes within the configured deadline.
    pub fn read_exact(&mut self, n: usize) -> AppResult<Vec<u8>> {
        self.link_mut()?.read_exact(n)
    }

    /// Close the link. Closing a closed transport is a no-op.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            debug!(port = ?self.port_name, "Serial link closed");
        }
    }

    /// Whether a link is currently held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Line settings used for every open.
    #[must_use]
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    fn link_mut(&mut self) -> AppResult<&mut Box<dyn SerialLink>> {
        self.link
            .as_mut()
            .ok_or_else(|| DaqError::LinkError("serial port not connected".into()))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`PortOpener`] backed by the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(&self, port_name: &str, settings: &LinkSettings) -> AppResult<Box<dyn SerialLink>> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.poll_interval)
            .open()
            .map_err(|e| DaqError::PortUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialPortLink {
            port: Some(port),
            read_timeout: settings.read_timeout,
        }))
    }
}

/// Link over a real serial port.
pub struct SerialPortLink {
    port: Option<Box<dyn serialport::SerialPort>>,
    read_timeout: Duration,
}

impl SerialLink for SerialPortLink {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| DaqError::LinkError("serial port closed".into()))?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| DaqError::LinkError(format!("write failed: {e}")))
    }

    fn read_exact(&mut self, n: usize) -> AppResult<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| DaqError::LinkError("serial port closed".into()))?;
        read_exact_with_deadline(port, n, self.read_timeout)
    }

    fn close(&mut self) {
        // Dropping the handle releases the OS port.
        self.port.take();
    }
}

/// Read exactly `n` bytes from `reader`, retrying short and timed-out reads
/// until `deadline` has elapsed.
pub fn read_exact_with_deadline<R: Read + ?Sized>(
    reader: &mut R,
    n: usize,
    deadline: Duration,
) -> AppResult<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    let start = Instant::now();

    while filled < n {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(DaqError::LinkError(
                    "unexpected EOF from serial port".into(),
                ))
            }
            Ok(k) => {
                filled += k;
                trace!(filled, expected = n, "Serial read");
                continue;
            }
            Err(e) if is_retryable(&e) => {}
            Err(e) => return Err(DaqError::LinkError(format!("read failed: {e}"))),
        }

        if start.elapsed() >= deadline {
            return Err(DaqError::Timeout {
                expected: n,
                received: filled,
            });
        }
    }

    Ok(buf)
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
