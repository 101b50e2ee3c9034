//! Scripted ports and simulated devices shared by the unit tests.
//!
//! A [`SimProvider`] hands out [`SimPort`]s wired to a [`SimDevice`]. Bytes
//! the host writes are fed to the device, which queues its replies; reads
//! return `TimedOut` while nothing is queued, like a real port with a short
//! timeout.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, PortProvider, SerialConfig};
use crate::protocol::odin::{
    self, BOOTLOADER_VERSION_QUERY, CHIP_ID_QUERY, CONTROL_PACKET_SIZE, ControlPacket,
    ControlType, DATA_PACKET_SIZE, DOWNLOAD_MODE_HANDSHAKE, DOWNLOAD_RESPONSE_OK,
    FLASH_INFO_QUERY, ODIN_HANDSHAKE, ODIN_RESPONSE_OK, PIT_PART_SIZE, Response,
    SECURITY_VERSION_QUERY,
};
use crate::protocol::pit::PitTable;
use crate::protocol::samba::{self, Command};

/// Short per-call timeout for tests that expect a timeout.
pub(crate) const FAST_TIMEOUT: Duration = Duration::from_millis(60);

/// Route `log` output through the test harness; `RUST_LOG` selects the level.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Device side of a simulated endpoint.
pub(crate) trait SimDevice: Send {
    /// Accept host bytes; returns how many were taken.
    fn receive(&mut self, data: &[u8]) -> usize;

    /// Bytes waiting for the host.
    fn pending(&mut self) -> &mut VecDeque<u8>;

    /// Called every time the host opens the port.
    fn on_open(&mut self) {}
}

pub(crate) type SharedDevice = Arc<Mutex<dyn SimDevice>>;

/// Modem line state seen by a simulated port.
#[derive(Debug, Default)]
pub(crate) struct Lines {
    pub dtr: Vec<bool>,
    pub rts: Vec<bool>,
    pub cts: bool,
    pub dsr: bool,
    pub cd: bool,
    pub ri: bool,
}

/// Port handed out by [`SimProvider`].
pub(crate) struct SimPort {
    name: String,
    device: SharedDevice,
    lines: Arc<Mutex<Lines>>,
    timeout: Duration,
    baud_rate: u32,
    closed: bool,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        let mut device = lock(&self.device);
        let pending = device.pending();
        if pending.is_empty() {
            drop(device);
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(pending.len());
        for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        let accepted = lock(&self.device).receive(buf);
        if accepted == 0 && !buf.is_empty() {
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "device stalled"));
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        lock(&self.device).pending().clear();
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(lock(&self.device).pending().len() as u32)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        lock(&self.lines).dtr.push(level);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        lock(&self.lines).rts.push(level);
        Ok(())
    }

    fn read_cts(&mut self) -> Result<bool> {
        Ok(lock(&self.lines).cts)
    }

    fn read_dsr(&mut self) -> Result<bool> {
        Ok(lock(&self.lines).dsr)
    }

    fn read_cd(&mut self) -> Result<bool> {
        Ok(lock(&self.lines).cd)
    }

    fn read_ri(&mut self) -> Result<bool> {
        Ok(lock(&self.lines).ri)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct Endpoint {
    info: PortInfo,
    device: SharedDevice,
    lines: Arc<Mutex<Lines>>,
    reject_config: bool,
}

/// Provider over a fixed set of simulated endpoints.
#[derive(Default)]
pub(crate) struct SimProvider {
    endpoints: Vec<Endpoint>,
    opens: AtomicUsize,
}

impl SimProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint backed by `device`.
    pub(crate) fn with_device(mut self, info: PortInfo, device: SharedDevice) -> Self {
        self.endpoints.push(Endpoint {
            info,
            device,
            lines: Arc::new(Mutex::new(Lines::default())),
            reject_config: false,
        });
        self
    }

    /// Add an endpoint with nothing behind it.
    pub(crate) fn with_port(self, info: PortInfo) -> Self {
        self.with_device(info, Arc::new(Mutex::new(Scripted::default())))
    }

    /// Make opening `name` fail as if a line setting were rejected.
    pub(crate) fn rejecting_config(mut self, name: &str) -> Self {
        for endpoint in &mut self.endpoints {
            if endpoint.info.name == name {
                endpoint.reject_config = true;
            }
        }
        self
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn lines(&self, name: &str) -> Arc<Mutex<Lines>> {
        self.endpoints
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| Arc::clone(&e.lines))
            .unwrap_or_default()
    }

    pub(crate) fn into_shared(self) -> Arc<dyn PortProvider> {
        Arc::new(self)
    }
}

impl PortProvider for SimProvider {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self
            .endpoints
            .iter()
            .map(|e| e.info.clone())
            .collect())
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.info.name == config.port_name)
            .ok_or_else(|| Error::PortNotFound(config.port_name.clone()))?;
        if endpoint.reject_config {
            return Err(Error::Config(format!(
                "{}: unsupported line settings",
                config.port_name
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        lock(&endpoint.device).on_open();
        Ok(Box::new(SimPort {
            name: config.port_name.clone(),
            device: Arc::clone(&endpoint.device),
            lines: Arc::clone(&endpoint.lines),
            timeout: config.poll_timeout(),
            baud_rate: config.baud_rate,
            closed: false,
        }))
    }
}

/// Canned replies plus a record of everything written.
#[derive(Default)]
pub(crate) struct Scripted {
    pub output: VecDeque<u8>,
    pub written: Vec<u8>,
    /// Stop accepting host bytes after this many.
    pub accept_limit: Option<usize>,
    /// Released one per host write, after the bytes are taken.
    pub replies: VecDeque<Vec<u8>>,
}

impl Scripted {
    pub(crate) fn with_response(response: &[u8]) -> Self {
        Self {
            output: response.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn replying(replies: &[&[u8]]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_vec()).collect(),
            ..Default::default()
        }
    }
}

impl SimDevice for Scripted {
    fn receive(&mut self, data: &[u8]) -> usize {
        let room = self
            .accept_limit
            .map_or(data.len(), |limit| {
                limit
                    .saturating_sub(self.written.len())
                    .min(data.len())
            });
        self.written.extend_from_slice(&data[..room]);
        if room > 0 {
            if let Some(reply) = self.replies.pop_front() {
                self.output.extend(reply);
            }
        }
        room
    }

    fn pending(&mut self) -> &mut VecDeque<u8> {
        &mut self.output
    }
}

/// In-memory SAM-BA style bootloader.
pub(crate) struct SamBaSim {
    pub flash: Vec<u8>,
    pub version: String,
    pub commands: Vec<Command>,
    /// Number of upcoming page writes to reject.
    pub fail_writes: usize,
    /// Never answer anything.
    pub silent: bool,
    pub exited: bool,
    input: Vec<u8>,
    write: Option<(usize, usize, Vec<u8>)>,
    output: VecDeque<u8>,
}

/// Reply to a rejected page write.
pub(crate) const SAMBA_NAK: &[u8] = b"!\r";

impl SamBaSim {
    pub(crate) fn new(flash_size: usize) -> Self {
        Self {
            flash: vec![0xFF; flash_size],
            version: "v1.1 Nov 12 2012 SAMFLASH".to_string(),
            commands: Vec::new(),
            fail_writes: 0,
            silent: false,
            exited: false,
            input: Vec::new(),
            write: None,
            output: VecDeque::new(),
        }
    }

    pub(crate) fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn write_commands(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match *c {
                Command::Write { addr, len } => Some((addr, len)),
                _ => None,
            })
            .collect()
    }

    fn handle(&mut self, cmd: Command) {
        self.commands.push(cmd);
        match cmd {
            Command::Normal => self.output.extend(samba::LINE_END),
            Command::Version => {
                self.output.extend(self.version.as_bytes());
                self.output.extend(samba::LINE_END);
            },
            Command::Write { addr, len } => {
                self.write = Some((addr as usize, len as usize, Vec::new()));
                self.finish_write_if_complete();
            },
            Command::Read { addr, len } => {
                let (addr, len) = (addr as usize, len as usize);
                for i in addr..addr + len {
                    self.output.push_back(self.flash.get(i).copied().unwrap_or(0xFF));
                }
            },
            Command::ErasePage { addr } => {
                let start = (addr as usize / samba::PAGE_SIZE) * samba::PAGE_SIZE;
                let end = (start + samba::PAGE_SIZE).min(self.flash.len());
                if start < end {
                    self.flash[start..end].fill(0xFF);
                }
                self.output.extend(samba::LINE_END);
            },
            Command::EraseAll => {
                self.flash.fill(0xFF);
                self.output.extend(samba::LINE_END);
            },
            Command::Go { .. } => self.exited = true,
        }
    }

    fn finish_write_if_complete(&mut self) {
        let complete = matches!(&self.write, Some((_, len, data)) if data.len() == *len);
        if !complete {
            return;
        }
        if let Some((addr, _, data)) = self.write.take() {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                self.output.extend(SAMBA_NAK);
                return;
            }
            for (i, byte) in data.into_iter().enumerate() {
                if let Some(slot) = self.flash.get_mut(addr + i) {
                    *slot = byte;
                }
            }
            self.output.extend(samba::LINE_END);
        }
    }
}

impl SimDevice for SamBaSim {
    fn receive(&mut self, data: &[u8]) -> usize {
        if self.silent {
            return data.len();
        }
        for &byte in data {
            if let Some((_, _, buf)) = self.write.as_mut() {
                buf.push(byte);
                self.finish_write_if_complete();
                continue;
            }
            self.input.push(byte);
            if byte == samba::TERMINATOR {
                let frame = std::mem::take(&mut self.input);
                if let Some(cmd) = Command::parse(&frame) {
                    self.handle(cmd);
                }
            }
        }
        data.len()
    }

    fn pending(&mut self) -> &mut VecDeque<u8> {
        &mut self.output
    }

    fn on_open(&mut self) {
        self.input.clear();
        self.write = None;
        self.output.clear();
    }
}

/// In-memory Samsung download-mode device.
pub(crate) struct OdinSim {
    pub flash: Vec<u8>,
    pub pit: Vec<u8>,
    pub chip_id: Vec<u8>,
    pub bootloader_version: Vec<u8>,
    pub security_version: Vec<u8>,
    pub session_begins: usize,
    pub pit_requests: usize,
    pub sessions_ended: usize,
    pub erase_all_count: usize,
    /// `(addr, len)` of every data packet accepted.
    pub parts: Vec<(u32, u32)>,
    /// Number of upcoming data packets to reject.
    pub fail_parts: usize,
    /// Answer probes but refuse to begin a session.
    pub refuse_session: bool,
    /// Never answer anything.
    pub silent: bool,
    input: Vec<u8>,
    data_expected: Option<(u32, u32, u32)>,
    output: VecDeque<u8>,
}

impl OdinSim {
    pub(crate) fn new(flash_size: usize, pit: &PitTable) -> Self {
        Self {
            flash: vec![0xFF; flash_size],
            pit: pit.to_bytes(),
            chip_id: b"EXYNOS9820".to_vec(),
            bootloader_version: b"G973FXXU9FUCD".to_vec(),
            security_version: b"9".to_vec(),
            session_begins: 0,
            pit_requests: 0,
            sessions_ended: 0,
            erase_all_count: 0,
            parts: Vec::new(),
            fail_parts: 0,
            refuse_session: false,
            silent: false,
            input: Vec::new(),
            data_expected: None,
            output: VecDeque::new(),
        }
    }

    pub(crate) fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    fn respond(&mut self, control: ControlType, data: u32) {
        self.output.extend(Response::build(control, data));
    }

    fn handle_probe(&mut self, command: [u8; 4]) {
        let reply = match command {
            ODIN_HANDSHAKE => ODIN_RESPONSE_OK.to_vec(),
            DOWNLOAD_MODE_HANDSHAKE => DOWNLOAD_RESPONSE_OK.to_vec(),
            CHIP_ID_QUERY => odin::build_query_reply(command, &self.chip_id),
            BOOTLOADER_VERSION_QUERY => odin::build_query_reply(command, &self.bootloader_version),
            SECURITY_VERSION_QUERY => odin::build_query_reply(command, &self.security_version),
            FLASH_INFO_QUERY => {
                let mut size = [0u8; 4];
                LittleEndian::write_u32(&mut size, u32::try_from(self.flash.len()).unwrap_or(0));
                odin::build_query_reply(command, &size)
            },
            _ => Vec::new(),
        };
        self.output.extend(reply);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn handle_control(&mut self, packet: ControlPacket) {
        use odin::{end_session, file_request, pit_request, session};

        let [a0, a1, a2, ..] = packet.args;
        match (packet.control, packet.request) {
            (ControlType::Session, session::BEGIN) => {
                if self.refuse_session {
                    // Wrong echo makes the host reject the handshake
                    self.respond(ControlType::EndSession, 0);
                } else {
                    self.session_begins += 1;
                    self.respond(ControlType::Session, 2);
                }
            },
            (ControlType::Session, session::DEVICE_TYPE) => self.respond(ControlType::Session, 2),
            (ControlType::Session, session::ERASE_ALL) => {
                self.erase_all_count += 1;
                self.flash.fill(0xFF);
                self.respond(ControlType::Session, 0);
            },
            (ControlType::PitFile, pit_request::DUMP) => {
                self.pit_requests += 1;
                self.respond(ControlType::PitFile, self.pit.len() as u32);
            },
            (ControlType::PitFile, pit_request::PART) => {
                let start = (a0 as usize) * PIT_PART_SIZE;
                let end = (start + PIT_PART_SIZE).min(self.pit.len());
                if start < end {
                    let part = self.pit[start..end].to_vec();
                    self.output.extend(part);
                }
            },
            (ControlType::FileTransfer, file_request::PART) => {
                self.data_expected = Some((a0, a1, a2));
                self.respond(ControlType::FileTransfer, 0);
            },
            (ControlType::FileTransfer, file_request::DUMP) => {
                self.respond(ControlType::FileTransfer, a1);
                for i in a0 as usize..(a0 + a1) as usize {
                    self.output.push_back(self.flash.get(i).copied().unwrap_or(0xFF));
                }
            },
            (ControlType::FileTransfer, file_request::ERASE) => {
                let start = (a0 as usize).min(self.flash.len());
                let end = (a0 as usize + a1 as usize).min(self.flash.len());
                self.flash[start..end].fill(0xFF);
                self.respond(ControlType::FileTransfer, 0);
            },
            (ControlType::EndSession, end_session::END | end_session::REBOOT) => {
                self.sessions_ended += 1;
                self.respond(ControlType::EndSession, 0);
            },
            (control, _) => self.respond(control, 0),
        }
    }

    fn handle_data(&mut self, (addr, len, index): (u32, u32, u32), packet: &[u8]) {
        if self.fail_parts > 0 {
            self.fail_parts -= 1;
            self.respond(ControlType::FileTransfer, index.wrapping_add(1));
            return;
        }
        for (i, &byte) in packet.iter().take(len as usize).enumerate() {
            if let Some(slot) = self.flash.get_mut(addr as usize + i) {
                *slot = byte;
            }
        }
        self.parts.push((addr, len));
        self.respond(ControlType::FileTransfer, index);
    }

    fn process(&mut self) {
        loop {
            if let Some(expected) = self.data_expected {
                if self.input.len() < DATA_PACKET_SIZE {
                    return;
                }
                let packet: Vec<u8> = self.input.drain(..DATA_PACKET_SIZE).collect();
                self.data_expected = None;
                self.handle_data(expected, &packet);
                continue;
            }

            let Some(&first) = self.input.first() else {
                return;
            };
            if ControlType::from_u32(u32::from(first)).is_some() {
                if self.input.len() < CONTROL_PACKET_SIZE {
                    return;
                }
                let raw: Vec<u8> = self.input.drain(..CONTROL_PACKET_SIZE).collect();
                if let Some(packet) = ControlPacket::parse(&raw) {
                    self.handle_control(packet);
                }
            } else {
                if self.input.len() < 4 {
                    return;
                }
                let mut command = [0u8; 4];
                command.copy_from_slice(&self.input[..4]);
                self.input.drain(..4);
                self.handle_probe(command);
            }
        }
    }
}

impl SimDevice for OdinSim {
    fn receive(&mut self, data: &[u8]) -> usize {
        if !self.silent {
            self.input.extend_from_slice(data);
            self.process();
        }
        data.len()
    }

    fn pending(&mut self) -> &mut VecDeque<u8> {
        &mut self.output
    }

    fn on_open(&mut self) {
        self.input.clear();
        self.data_expected = None;
        self.output.clear();
    }
}
