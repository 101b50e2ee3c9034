//! Port abstraction for serial communication.
//!
//! This module provides a unified `Port` trait over serial port backends and a
//! `PortProvider` that lists and opens endpoints by name. Protocol code never
//! touches the backend directly; it goes through
//! [`SerialTransport`](crate::transport::SerialTransport), which owns a boxed
//! `Port` obtained from a provider.
//!
//! ```text
//! +------------------+      +------------------+
//! |  Device layer    |      |   Identification |
//! | (generic, odin)  |      |   (probing)      |
//! +--------+---------+      +--------+---------+
//!          |                         |
//!          v                         v
//! +--------+-------------------------+---------+
//! |               SerialTransport              |
//! +--------+-----------------------------------+
//!          |
//!          v
//! +--------+---------+      +------------------+
//! |   PortProvider   | ---> |  Box<dyn Port>   |
//! +------------------+      +------------------+
//!   NativePortProvider          NativePort
//!     (serialport)             (serialport)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::port::{Port, SerialConfig};
//!
//! fn example(port: &mut dyn Port) -> std::io::Result<()> {
//!     port.write_all(b"V#")?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-call read timeout.
    pub read_timeout: Duration,
    /// Per-call write timeout.
    pub write_timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set both read and write timeouts.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set flow control.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Timeout handed to the backend for a single blocking call.
    ///
    /// The transport enforces the read and write deadlines itself, so the
    /// backend only needs to wake up at least as often as the shorter one.
    pub fn poll_timeout(&self) -> Duration {
        self.read_timeout.min(self.write_timeout)
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string, used as the port description (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Create port info for a USB endpoint.
    pub fn usb(name: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            name: name.into(),
            vid: Some(vid),
            pid: Some(pid),
            ..Default::default()
        }
    }

    /// Set the manufacturer string.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the product string.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Human readable description: product, then manufacturer, then name.
    pub fn description(&self) -> &str {
        self.product
            .as_deref()
            .or(self.manufacturer.as_deref())
            .unwrap_or(&self.name)
    }
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Set the backend timeout for a single blocking call.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current backend timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Read CTS (Clear To Send) pin state.
    fn read_cts(&mut self) -> Result<bool>;

    /// Read DSR (Data Set Ready) pin state.
    fn read_dsr(&mut self) -> Result<bool>;

    /// Read DCD (Data Carrier Detect) pin state.
    fn read_cd(&mut self) -> Result<bool>;

    /// Read RI (Ring Indicator) pin state.
    fn read_ri(&mut self) -> Result<bool>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Lists and opens serial endpoints.
///
/// Shared as `Arc<dyn PortProvider>` by the transport, the device interfaces
/// and the identification probes, so an embedder (or a test) can replace the
/// platform backend in one place.
pub trait PortProvider: Send + Sync {
    /// List all available serial ports.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open and fully configure a port.
    ///
    /// Every setting in `config` is applied before the port is returned; if
    /// any of them fails nothing stays open.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(&self, vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let ports = self.list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
            .collect())
    }

    /// Look up a single port by name.
    fn port_info(&self, name: &str) -> Result<Option<PortInfo>> {
        Ok(self
            .list_ports()?
            .into_iter()
            .find(|p| p.name == name))
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortProvider};
