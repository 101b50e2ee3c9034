//! Serial transport shared by every device interface.
//!
//! [`SerialTransport`] owns at most one open [`Port`] and layers deadlines,
//! bulk transfers with progress, and a last-error slot on top of it. Every
//! public operation overwrites the last error: cleared on success, set to
//! the failure message otherwise.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, PortProvider, SerialConfig};

/// Window size used by bulk transfers.
pub const BULK_WINDOW: usize = 1024;

/// Progress of a bulk transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Bytes moved so far.
    pub bytes_transferred: usize,
    /// Bytes requested.
    pub total_bytes: usize,
    /// 0.0 ..= 100.0
    pub percentage: f64,
    /// "Writing" or "Reading".
    pub operation: String,
    /// Time since the transfer started.
    pub elapsed: Duration,
    /// Bytes per second so far.
    pub throughput: f64,
    /// Estimated time to completion, once throughput is known.
    pub eta: Option<Duration>,
}

impl TransferProgress {
    /// Build a progress record from raw counters.
    pub fn compute(done: usize, total: usize, elapsed: Duration, operation: &str) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            (done as f64 / total as f64) * 100.0
        };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { done as f64 / secs } else { 0.0 };
        let eta = (throughput > 0.0)
            .then(|| Duration::from_secs_f64(total.saturating_sub(done) as f64 / throughput));

        Self {
            bytes_transferred: done,
            total_bytes: total,
            percentage,
            operation: operation.to_string(),
            elapsed,
            throughput,
            eta,
        }
    }
}

/// Byte transport over one serial endpoint.
pub struct SerialTransport {
    provider: Arc<dyn PortProvider>,
    port: Option<Box<dyn Port>>,
    config: SerialConfig,
    last_error: Option<String>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port.as_ref().map(|p| p.name().to_string()))
            .field("config", &self.config)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

impl SerialTransport {
    /// Create a closed transport over `provider`.
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        Self {
            provider,
            port: None,
            config: SerialConfig::default(),
            last_error: None,
        }
    }

    /// Create a closed transport over the platform's serial ports.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::port::NativePortProvider))
    }

    /// The provider this transport opens ports from.
    pub fn provider(&self) -> &Arc<dyn PortProvider> {
        &self.provider
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn Port>> {
        self.port.as_mut().ok_or(Error::PortNotOpen)
    }

    /// List the endpoints the provider can see.
    pub fn enumerate_ports(&mut self) -> Result<Vec<PortInfo>> {
        let result = self.provider.list_ports();
        self.record(result)
    }

    /// Open the endpoint named in `config`, closing any current one first.
    pub fn open(&mut self, config: SerialConfig) -> Result<()> {
        if self.port.is_some() {
            self.close_port();
        }
        let result = self.provider.open(&config);
        let result = result.map(|port| {
            debug!("Transport opened {}", config.port_name);
            self.port = Some(port);
            self.config = config;
        });
        self.record(result)
    }

    fn close_port(&mut self) {
        if let Some(mut port) = self.port.take() {
            debug!("Transport closing {}", port.name());
            if let Err(e) = port.close() {
                warn!("Error closing {}: {e}", port.name());
            }
        }
    }

    /// Close the endpoint. Closing a closed transport is a no-op.
    pub fn close(&mut self) {
        self.close_port();
    }

    /// Whether a port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Configuration of the open (or last opened) port.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Name of the open port.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(|p| p.name())
    }

    fn write_inner(&mut self, data: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + self.config.write_timeout;
        let port = self.port_mut()?;
        let mut written = 0;
        while written < data.len() {
            match port.write(&data[written..]) {
                Ok(0) => {},
                Ok(n) => written += n,
                Err(e) if is_retryable(e.kind()) => {},
                Err(e) => return Err(e.into()),
            }
            if written < data.len() && Instant::now() >= deadline {
                return Err(Error::WriteTimeout {
                    written,
                    total: data.len(),
                });
            }
        }
        port.flush()?;
        trace!("TX {} bytes", data.len());
        Ok(written)
    }

    /// Write every byte of `data` within the write timeout.
    ///
    /// Returns the number of bytes written, always `data.len()` on success.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let result = self.write_inner(data);
        self.record(result)
    }

    fn read_inner(&mut self, max: usize, deadline: Instant) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max];
        loop {
            match port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    buf.truncate(n);
                    trace!("RX {n} bytes");
                    return Ok(buf);
                },
                Ok(_) => {},
                Err(e) if is_retryable(e.kind()) => {},
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout("no data".into()));
            }
        }
    }

    /// Read up to `max` bytes, returning as soon as any arrive.
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config.read_timeout;
        let result = self
            .read_inner(max, deadline)
            .map_err(|e| self.timeout_message(e, max, 0));
        self.record(result)
    }

    fn timeout_message(&self, e: Error, wanted: usize, got: usize) -> Error {
        match e {
            Error::Timeout(_) => Error::Timeout(format!(
                "read {got} of {wanted} bytes within {:?}",
                self.config.read_timeout
            )),
            other => other,
        }
    }

    fn read_exact_inner(&mut self, len: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config.read_timeout;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match self.read_inner(len - out.len(), deadline) {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => return Err(self.timeout_message(e, len, out.len())),
            }
        }
        Ok(out)
    }

    /// Read exactly `len` bytes within one read timeout.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let result = self.read_exact_inner(len);
        self.record(result)
    }

    fn read_until_inner(&mut self, terminator: &[u8], max: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config.read_timeout;
        let mut out = Vec::new();
        while out.len() < max {
            // One byte at a time so nothing after the terminator is consumed
            let byte = self
                .read_inner(1, deadline)
                .map_err(|e| self.timeout_message(e, max, out.len()))?;
            out.extend_from_slice(&byte);
            if !terminator.is_empty() && out.ends_with(terminator) {
                break;
            }
        }
        Ok(out)
    }

    /// Read until `terminator` (included in the result) or `max` bytes.
    pub fn read_until(&mut self, terminator: &[u8], max: usize) -> Result<Vec<u8>> {
        let result = self.read_until_inner(terminator, max);
        self.record(result)
    }

    /// Write `data` in [`BULK_WINDOW`] windows, reporting after each.
    pub fn write_bulk(
        &mut self,
        data: &[u8],
        progress: &mut dyn FnMut(&TransferProgress),
    ) -> Result<usize> {
        let start = Instant::now();
        let mut done = 0;
        for window in data.chunks(BULK_WINDOW) {
            if let Err(e) = self.write_inner(window) {
                let e = match e {
                    Error::WriteTimeout { written, .. } => Error::WriteTimeout {
                        written: done + written,
                        total: data.len(),
                    },
                    other => other,
                };
                return self.record(Err(e));
            }
            done += window.len();
            progress(&TransferProgress::compute(
                done,
                data.len(),
                start.elapsed(),
                "Writing",
            ));
        }
        self.record(Ok(done))
    }

    /// Read `len` bytes in [`BULK_WINDOW`] windows, reporting after each.
    pub fn read_bulk(
        &mut self,
        len: usize,
        progress: &mut dyn FnMut(&TransferProgress),
    ) -> Result<Vec<u8>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let window = BULK_WINDOW.min(len - out.len());
            match self.read_exact_inner(window) {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => return self.record(Err(e)),
            }
            progress(&TransferProgress::compute(
                out.len(),
                len,
                start.elapsed(),
                "Reading",
            ));
        }
        self.record(Ok(out))
    }

    /// Flush pending output.
    pub fn flush(&mut self) -> Result<()> {
        let result = self
            .port_mut()
            .and_then(|p| p.flush().map_err(Error::from));
        self.record(result)
    }

    /// Discard both the input and output buffers.
    pub fn clear_buffers(&mut self) -> Result<()> {
        let result = self.port_mut().and_then(|p| p.clear_buffers());
        self.record(result)
    }

    /// Bytes waiting to be read.
    pub fn bytes_available(&mut self) -> Result<usize> {
        let result = self
            .port_mut()
            .and_then(|p| p.bytes_to_read())
            .map(|n| n as usize);
        self.record(result)
    }

    /// Change the read timeout of this and later calls.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.read_timeout = timeout;
        self.apply_poll_timeout()
    }

    /// Change the write timeout of this and later calls.
    pub fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.write_timeout = timeout;
        self.apply_poll_timeout()
    }

    fn apply_poll_timeout(&mut self) -> Result<()> {
        let poll = self.config.poll_timeout();
        let result = match self.port.as_mut() {
            Some(port) => port.set_timeout(poll),
            None => Ok(()),
        };
        self.record(result)
    }

    /// Current read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Current write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    /// Drive the DTR line.
    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        let result = self.port_mut().and_then(|p| p.set_dtr(level));
        self.record(result)
    }

    /// Drive the RTS line.
    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        let result = self.port_mut().and_then(|p| p.set_rts(level));
        self.record(result)
    }

    /// Clear To Send.
    pub fn cts(&mut self) -> Result<bool> {
        let result = self.port_mut().and_then(|p| p.read_cts());
        self.record(result)
    }

    /// Data Set Ready.
    pub fn dsr(&mut self) -> Result<bool> {
        let result = self.port_mut().and_then(|p| p.read_dsr());
        self.record(result)
    }

    /// Carrier Detect.
    pub fn cd(&mut self) -> Result<bool> {
        let result = self.port_mut().and_then(|p| p.read_cd());
        self.record(result)
    }

    /// Ring Indicator.
    pub fn ri(&mut self) -> Result<bool> {
        let result = self.port_mut().and_then(|p| p.read_ri());
        self.record(result)
    }

    /// Message of the most recent failure; kept until [`Self::clear_error`].
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Forget the last failure.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close_port();
    }
}
