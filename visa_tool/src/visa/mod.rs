use anyhow::anyhow;

use crate::scpi::{self, ByteOrder, DataType, Sample};
use crate::Error;

pub use visa_sys::{Instrument as VisaInstrument, Visa, VisaError, VisaResult};

#[cfg(test)]
pub(crate) mod mock;
mod visa_sys;

/// Size of a single `viRead` request.
pub const CHUNK_SIZE: usize = 20 * 1024;

pub const DEFAULT_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_TERMINATION: &str = "\n";

const VI_FALSE: u64 = 0;
const VI_TRUE: u64 = 1;

/// Completion status of a successful read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    End,
    TermChar,
    MaxCount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    Timeout,
    TermChar,
    TermCharEnabled,
}

impl Attribute {
    pub fn code(&self) -> u32 {
        match self {
            Attribute::Timeout => 0x3FFF001A,
            Attribute::TermChar => 0x3FFF0018,
            Attribute::TermCharEnabled => 0x3FFF0038,
        }
    }
}

/// Byte-level access to an open session.
pub trait Device {
    fn write(&mut self, data: &[u8]) -> VisaResult<usize>;

    /// Read at most `max_len` bytes.
    fn read(&mut self, max_len: usize) -> VisaResult<(Vec<u8>, ReadStatus)>;

    fn set_attribute(&mut self, attr: Attribute, value: u64) -> VisaResult<()>;

    fn close(&mut self) -> VisaResult<()>;
}

pub trait ResourceManager {
    type Device: Device;

    fn list_resources(&self, query: &str) -> crate::Result<Vec<String>>;

    fn open(&self, addr: &str) -> crate::Result<Self::Device>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub timeout_ms: u32,
    pub read_termination: Option<String>,
    pub write_termination: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            read_termination: Some(DEFAULT_TERMINATION.to_string()),
            write_termination: Some(DEFAULT_TERMINATION.to_string()),
        }
    }
}

/// A message-based session.
///
/// The write termination is appended to every message sent and the read termination is
/// stripped from text responses. The last character of the read termination doubles as the
/// VISA termination character, so reads stop as soon as it arrives.
///
/// The underlying device is closed exactly once: either by [`Instrument::close`] or, if the
/// session is abandoned, when it is dropped.
pub struct Instrument<D: Device = VisaInstrument> {
    device: D,
    addr: String,
    read_termination: Option<String>,
    write_termination: Option<String>,
    closed: bool,
}

impl<D: Device> Instrument<D> {
    pub fn new<T: Into<String>>(device: D, addr: T) -> Self {
        Self {
            device,
            addr: addr.into(),
            read_termination: None,
            write_termination: None,
            closed: false,
        }
    }

    /// Open `addr` and apply timeout and terminations from `config`.
    pub fn open<R>(rm: &R, addr: &str, config: &SessionConfig) -> crate::Result<Self>
    where
        R: ResourceManager<Device = D>,
    {
        let device = rm.open(addr)?;
        let mut ret = Self::new(device, addr);
        ret.set_timeout(config.timeout_ms)?;
        ret.set_read_termination(config.read_termination.clone())?;
        ret.set_write_termination(config.write_termination.clone());
        Ok(ret)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_timeout(&mut self, timeout_ms: u32) -> VisaResult<()> {
        log::debug!("{}: timeout = {} ms", self.addr, timeout_ms);
        self.device.set_attribute(Attribute::Timeout, timeout_ms as u64)
    }

    pub fn read_termination(&self) -> Option<&str> {
        self.read_termination.as_deref()
    }

    pub fn write_termination(&self) -> Option<&str> {
        self.write_termination.as_deref()
    }

    /// `None` or an empty string disables termination character detection.
    pub fn set_read_termination(&mut self, termination: Option<String>) -> crate::Result<()> {
        let termination = termination.filter(|x| !x.is_empty());
        match &termination {
            Some(termination) => {
                let term_char = term_char(termination)?;
                log::debug!("{}: read termination = {:?}", self.addr, termination);
                self.device.set_attribute(Attribute::TermChar, term_char as u64)?;
                self.device.set_attribute(Attribute::TermCharEnabled, VI_TRUE)?;
            }
            None => {
                log::debug!("{}: read termination disabled", self.addr);
                self.device.set_attribute(Attribute::TermChar, b'\n' as u64)?;
                self.device.set_attribute(Attribute::TermCharEnabled, VI_FALSE)?;
            }
        }
        self.read_termination = termination;
        Ok(())
    }

    pub fn set_write_termination(&mut self, termination: Option<String>) {
        self.write_termination = termination.filter(|x| !x.is_empty());
    }

    pub fn write(&mut self, msg: &str) -> VisaResult<usize> {
        let mut data = msg.as_bytes().to_vec();
        if let Some(termination) = &self.write_termination {
            data.extend_from_slice(termination.as_bytes());
        }
        log::debug!("{}: write {:?}", self.addr, String::from_utf8_lossy(&data));
        self.device.write(&data)
    }

    /// Read until END or the termination character is received.
    pub fn read_raw(&mut self) -> VisaResult<Vec<u8>> {
        let mut ret = Vec::new();
        loop {
            let (chunk, status) = self.device.read(CHUNK_SIZE)?;
            ret.extend(chunk);
            if status != ReadStatus::MaxCount {
                break;
            }
        }
        log::debug!("{}: read {} bytes", self.addr, ret.len());
        Ok(ret)
    }

    /// Read exactly `count` bytes, ignoring termination characters on the way.
    ///
    /// Returns fewer bytes only if the device stops delivering data.
    pub fn read_bytes(&mut self, count: usize) -> VisaResult<Vec<u8>> {
        let mut ret = Vec::with_capacity(count.min(CHUNK_SIZE));
        while ret.len() < count {
            let size = (count - ret.len()).min(CHUNK_SIZE);
            let (chunk, _) = self.device.read(size)?;
            if chunk.is_empty() {
                break;
            }
            ret.extend(chunk);
        }
        Ok(ret)
    }

    pub fn read(&mut self) -> VisaResult<String> {
        let data = self.read_raw()?;
        let mut ret = String::from_utf8_lossy(&data).into_owned();
        if let Some(termination) = &self.read_termination {
            if ret.ends_with(termination.as_str()) {
                ret.truncate(ret.len() - termination.len());
            } else {
                log::warn!("{}: response does not end with the read termination", self.addr);
            }
        }
        Ok(ret)
    }

    pub fn query(&mut self, msg: &str) -> VisaResult<String> {
        self.write(msg)?;
        self.read()
    }

    /// Read an IEEE 488.2 binary block and decode its payload.
    pub fn read_binary_values(&mut self, data_type: DataType, byte_order: ByteOrder) -> crate::Result<Vec<Sample>> {
        let mut block = self.read_raw()?;
        let header = scpi::parse_block_header(&block)?;
        if let Some(length) = header.length {
            let mut expected = header.offset + length;
            if let Some(termination) = &self.read_termination {
                expected += termination.len();
            }
            if expected > block.len() {
                let rest = self.read_bytes(expected - block.len())?;
                block.extend(rest);
            }
        }
        scpi::decode_block(&block, &header, data_type, byte_order)
    }

    pub fn query_binary_values(
        &mut self,
        msg: &str,
        data_type: DataType,
        byte_order: ByteOrder,
    ) -> crate::Result<Vec<Sample>> {
        self.write(msg)?;
        self.read_binary_values(data_type, byte_order)
    }

    pub fn close(mut self) -> VisaResult<()> {
        self.closed = true;
        self.device.close()
    }
}

impl<D: Device> Drop for Instrument<D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.device.close() {
            log::debug!("Error closing `{}`: {}", self.addr, err);
        }
    }
}

/// The VISA termination character is the last character of the read termination.
fn term_char(termination: &str) -> crate::Result<u8> {
    let mut chars = termination.chars();
    let last = chars.next_back().ok_or_else(|| Error::argument(anyhow!("Empty read termination")))?;
    if chars.as_str().contains(last) {
        return Err(Error::argument(anyhow!(
            "Ambiguous ending in read termination {:?}",
            termination
        )));
    }
    if (last as u32) > 0xFF {
        return Err(Error::argument(anyhow!(
            "Read termination must end in a single-byte character, got {:?}",
            last
        )));
    }
    Ok(last as u32 as u8)
}
