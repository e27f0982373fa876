//! Scripted loopback device for exercising sessions without hardware.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Attribute, Device, ReadStatus, ResourceManager, VisaError, VisaResult};

pub const VI_ERROR_TMO: i32 = 0xBFFF0015_u32 as i32;
pub const VI_ERROR_RSRC_NFOUND: i32 = 0xBFFF0011_u32 as i32;
pub const VI_ERROR_INV_OBJECT: i32 = 0xBFFF000E_u32 as i32;

#[derive(Default)]
struct MockState {
    reads: VecDeque<(Vec<u8>, ReadStatus)>,
    read_sizes: Vec<usize>,
    written: Vec<Vec<u8>>,
    attributes: Vec<(Attribute, u64)>,
    closed: usize,
    close_error: Option<VisaError>,
}

/// Handles share their state, so a clone kept by the test observes what the session did.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    pub fn push_read(&self, data: &[u8], status: ReadStatus) {
        self.state.borrow_mut().reads.push_back((data.to_vec(), status));
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.borrow().written.clone()
    }

    pub fn read_sizes(&self) -> Vec<usize> {
        self.state.borrow().read_sizes.clone()
    }

    pub fn attribute(&self, attr: Attribute) -> Option<u64> {
        let state = self.state.borrow();
        state.attributes.iter().rev().find(|(x, _)| *x == attr).map(|(_, value)| *value)
    }

    pub fn close_count(&self) -> usize {
        self.state.borrow().closed
    }
}

impl Device for MockDevice {
    fn write(&mut self, data: &[u8]) -> VisaResult<usize> {
        self.state.borrow_mut().written.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> VisaResult<(Vec<u8>, ReadStatus)> {
        let mut state = self.state.borrow_mut();
        state.read_sizes.push(max_len);
        let (mut data, status) = state
            .reads
            .pop_front()
            .ok_or_else(|| VisaError::new(VI_ERROR_TMO, "Timeout expired before operation completed."))?;
        if data.len() > max_len {
            let rest = data.split_off(max_len);
            state.reads.push_front((rest, status));
            return Ok((data, ReadStatus::MaxCount));
        }
        Ok((data, status))
    }

    fn set_attribute(&mut self, attr: Attribute, value: u64) -> VisaResult<()> {
        self.state.borrow_mut().attributes.push((attr, value));
        Ok(())
    }

    fn close(&mut self) -> VisaResult<()> {
        let mut state = self.state.borrow_mut();
        state.closed += 1;
        match &state.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct MockResourceManager {
    device: MockDevice,
    resources: Vec<String>,
    open_error: Option<VisaError>,
    opened: RefCell<Vec<String>>,
}

impl MockResourceManager {
    pub fn new() -> Self {
        Self {
            device: MockDevice::default(),
            resources: Vec::new(),
            open_error: None,
            opened: RefCell::new(Vec::new()),
        }
    }

    pub fn with_resources(resources: &[&str]) -> Self {
        let mut ret = Self::new();
        ret.resources = resources.iter().map(|x| x.to_string()).collect();
        ret
    }

    pub fn failing(err: VisaError) -> Self {
        let mut ret = Self::new();
        ret.open_error = Some(err);
        ret
    }

    pub fn failing_close(err: VisaError) -> Self {
        let ret = Self::new();
        ret.device.state.borrow_mut().close_error = Some(err);
        ret
    }

    pub fn device(&self) -> MockDevice {
        self.device.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }
}

impl ResourceManager for MockResourceManager {
    type Device = MockDevice;

    fn list_resources(&self, _query: &str) -> crate::Result<Vec<String>> {
        Ok(self.resources.clone())
    }

    fn open(&self, addr: &str) -> crate::Result<MockDevice> {
        if let Some(err) = &self.open_error {
            return Err(err.clone().into());
        }
        self.opened.borrow_mut().push(addr.to_string());
        Ok(self.device.clone())
    }
}
