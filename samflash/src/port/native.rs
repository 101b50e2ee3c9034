//! `serialport` backend for desktop hosts.
//!
//! Open failures are classified so that a missing device surfaces as
//! [`Error::PortNotFound`] rather than a raw backend error.

use {
    crate::{
        error::{Error, Result},
        port::{
            DataBits, FlowControl, Parity, Port, PortInfo, PortProvider, SerialConfig, StopBits,
        },
    },
    log::{debug, trace},
    serialport::{ClearBuffer, ErrorKind},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// A serial port opened through `serialport`.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    ///
    /// All line settings go through the `serialport` builder, so the port is
    /// either opened with every setting applied or not opened at all.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let timeout = config.poll_timeout();
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()
            .map_err(|e| open_error(&config.port_name, e))?;

        debug!(
            "Opened {} at {} baud ({:?}/{:?}/{:?}, flow {:?})",
            config.port_name,
            config.baud_rate,
            config.data_bits,
            config.parity,
            config.stop_bits,
            config.flow_control
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout,
            baud_rate: config.baud_rate,
        })
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or(Error::PortNotOpen)
    }
}

/// Classify an open failure into the crate taxonomy.
fn open_error(port_name: &str, e: serialport::Error) -> Error {
    match e.kind() {
        ErrorKind::NoDevice => Error::PortNotFound(port_name.to_string()),
        ErrorKind::Io(std::io::ErrorKind::NotFound) => Error::PortNotFound(port_name.to_string()),
        ErrorKind::InvalidInput => Error::Config(format!("{port_name}: {}", e.description)),
        _ => Error::Serial(e),
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_baud_rate(baud_rate)?;
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.inner()?.bytes_to_read()?)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        self.inner()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        self.inner()?.write_request_to_send(level)?;
        Ok(())
    }

    fn read_cts(&mut self) -> Result<bool> {
        Ok(self.inner()?.read_clear_to_send()?)
    }

    fn read_dsr(&mut self) -> Result<bool> {
        Ok(self.inner()?.read_data_set_ready()?)
    }

    fn read_cd(&mut self) -> Result<bool> {
        Ok(self.inner()?.read_carrier_detect()?)
    }

    fn read_ri(&mut self) -> Result<bool> {
        Ok(self.inner()?.read_ring_indicator()?)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the descriptor
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Port provider backed by the operating system's serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePortProvider;

impl PortProvider for NativePortProvider {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer,
                        info.product,
                        info.serial_number,
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        Ok(Box::new(NativePort::open(config)?))
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_are_well_formed() {
        match NativePortProvider.list_ports() {
            Ok(ports) => {
                for port in ports {
                    assert!(!port.name.is_empty());
                    // USB identity comes as a pair, strings only with it
                    assert_eq!(port.vid.is_some(), port.pid.is_some(), "{port:?}");
                    if port.vid.is_none() {
                        assert!(port.manufacturer.is_none() && port.product.is_none());
                    }
                }
            },
            Err(err) => assert!(matches!(err, Error::Serial(_)), "unexpected error: {err}"),
        }
    }

    #[test]
    fn test_open_missing_port_is_not_found_or_config() {
        let config = SerialConfig::new("/dev/samflash-does-not-exist", 115200);
        let err = NativePortProvider
            .open(&config)
            .err()
            .expect("opening a missing port must fail");
        assert!(
            matches!(
                err,
                Error::PortNotFound(_) | Error::Config(_) | Error::Serial(_)
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_open_error_classification() {
        let err = open_error(
            "COM9",
            serialport::Error::new(ErrorKind::NoDevice, "gone"),
        );
        assert!(matches!(err, Error::PortNotFound(name) if name == "COM9"));

        let err = open_error(
            "COM9",
            serialport::Error::new(ErrorKind::InvalidInput, "bad baud"),
        );
        assert!(matches!(err, Error::Config(msg) if msg.contains("bad baud")));
    }
}
