//! Device transport: a non-blocking line feed over any async byte stream.
//!
//! A background task owns the port, splits its bytes into lines and forwards
//! them over an unbounded channel. The acquisition loop then has two ways in:
//!
//! - [`LineFeed::next_line`] waits for the next line (used for the readiness
//!   handshake, which may take as long as the device needs)
//! - [`LineFeed::try_next_line`] returns immediately with whatever is already
//!   buffered (used on every polling tick)
//!
//! Any `AsyncRead + Unpin + Send` works as a port: a `tokio_serial::SerialStream`
//! for hardware, a `tokio::io::DuplexStream` in tests, or the
//! [`crate::simulator`] device.
//!
//! # Example
//!
//! ```rust,no_run
//! use thermo_daq::transport::{open_serial, LineFeed};
//!
//! # async fn demo() -> thermo_daq::error::LoggerResult<()> {
//! let port = open_serial("/dev/ttyACM0", 115_200).await?;
//! let mut feed = LineFeed::spawn(port);
//! let first = feed.next_line().await?;
//! println!("device says: {first}");
//! # Ok(())
//! # }
//! ```

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{LoggerError, LoggerResult};

/// Trait alias for anything that can serve as the device port.
pub trait DevicePort: AsyncRead + Unpin + Send {}

impl<T: AsyncRead + Unpin + Send> DevicePort for T {}

/// Type-erased port.
pub type DynPort = Box<dyn DevicePort>;

/// What the reader task reports.
#[derive(Debug)]
enum TransportEvent {
    Line(String),
    Closed,
    Failed(io::Error),
}

/// Lines from a device port, buffered by a background reader task.
#[derive(Debug)]
pub struct LineFeed {
    rx: UnboundedReceiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl LineFeed {
    /// Start reading `port` on a new task. Must be called within a Tokio runtime.
    pub fn spawn<R>(port: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_lines(port, tx));
        Self {
            rx,
            reader: Some(reader),
            closed: false,
        }
    }

    /// Wait for the next complete line.
    ///
    /// Cancel safe: no line is lost if the future is dropped, so callers may
    /// wrap it in `tokio::time::timeout`.
    pub async fn next_line(&mut self) -> LoggerResult<String> {
        if self.closed {
            return Err(LoggerError::TransportClosed);
        }
        let event = self.rx.recv().await;
        self.handle(event)
    }

    /// Take one already-buffered line without waiting.
    ///
    /// `Ok(None)` means nothing is pending right now.
    pub fn try_next_line(&mut self) -> LoggerResult<Option<String>> {
        if self.closed {
            return Err(LoggerError::TransportClosed);
        }
        match self.rx.try_recv() {
            Ok(event) => self.handle(Some(event)).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.handle(None).map(Some),
        }
    }

    fn handle(&mut self, event: Option<TransportEvent>) -> LoggerResult<String> {
        match event {
            Some(TransportEvent::Line(line)) => Ok(line),
            Some(TransportEvent::Failed(e)) => {
                self.closed = true;
                Err(LoggerError::Transport(e))
            }
            Some(TransportEvent::Closed) | None => {
                self.closed = true;
                Err(LoggerError::TransportClosed)
            }
        }
    }

    /// True after the link closed, failed, or was closed here.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop the reader task and release the port.
    ///
    /// Idempotent. Reports an error only if the reader task had panicked.
    pub async fn close(&mut self) -> LoggerResult<()> {
        self.closed = true;
        self.rx.close();
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        reader.abort();
        match reader.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(LoggerError::Transport(io::Error::other(format!(
                "transport reader task failed: {e}"
            )))),
        }
    }
}

impl Drop for LineFeed {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Reader task body: forward complete lines until EOF or error.
///
/// A trailing fragment without a newline at EOF is dropped; a device that
/// disconnects mid-line must not produce a truncated record.
async fn read_lines<R>(port: R, tx: UnboundedSender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(port);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("Device port reached end of stream");
                let _ = tx.send(TransportEvent::Closed);
                return;
            }
            Ok(n) if buf.last() != Some(&b'\n') => {
                debug!(bytes = n, "Discarding partial line at end of stream");
                let _ = tx.send(TransportEvent::Closed);
                return;
            }
            Ok(_) => {
                let line = decode_line(&buf);
                trace!(%line, "Received line");
                if tx.send(TransportEvent::Line(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Device port read failed");
                let _ = tx.send(TransportEvent::Failed(e));
                return;
            }
        }
    }
}

/// Decode one raw line, dropping byte sequences that are not valid UTF-8.
///
/// Boards often emit reset noise glued to the first line they print; the
/// readable remainder must still match the sentinel or parse as data.
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

/// A serial port visible to the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS device name, e.g. `/dev/ttyACM0`.
    pub name: String,
    /// Human-readable port type.
    pub description: String,
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
#[cfg(feature = "serial")]
pub async fn open_serial(port_path: &str, baud_rate: u32) -> LoggerResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let stream = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| LoggerError::Transport(io::Error::other(e)))?
    .map_err(|e| LoggerError::Transport(io::Error::from(e)))?;

    debug!(port = port_path, baud_rate, "Opened serial port");
    Ok(stream)
}

/// Serial support is compiled out.
#[cfg(not(feature = "serial"))]
pub async fn open_serial(_port_path: &str, _baud_rate: u32) -> LoggerResult<DynPort> {
    Err(LoggerError::SerialFeatureDisabled)
}

/// Enumerate serial ports.
#[cfg(feature = "serial")]
pub fn list_ports() -> LoggerResult<Vec<PortInfo>> {
    use tokio_serial::SerialPortType;

    let ports = tokio_serial::available_ports()
        .map_err(|e| LoggerError::Transport(io::Error::from(e)))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    let product = usb.product.unwrap_or_else(|| "USB serial".to_string());
                    format!("{product} ({:04x}:{:04x})", usb.vid, usb.pid)
                }
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: port.port_name,
                description,
            }
        })
        .collect())
}

/// Serial support is compiled out.
#[cfg(not(feature = "serial"))]
pub fn list_ports() -> LoggerResult<Vec<PortInfo>> {
    Err(LoggerError::SerialFeatureDisabled)
}
