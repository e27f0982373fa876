#![allow(non_snake_case)]

use std::ffi::{CStr, CString};
use std::fmt::{Display, Formatter};
use std::os::raw::c_char;
use std::sync::Arc;

use anyhow::anyhow;
use dlopen::wrapper::{Container, WrapperApi};
use thiserror::Error;

use super::{Attribute, Device, ReadStatus, ResourceManager};

#[derive(Error, Clone, Debug, PartialEq)]
pub struct VisaError {
    desc: String,
    code: i32,
}

pub type VisaResult<T> = std::result::Result<T, VisaError>;

impl Display for VisaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VisaError({:#010X}): `{}`", self.code, self.desc))
    }
}

impl VisaError {
    pub fn new<T: Into<String>>(code: i32, desc: T) -> Self {
        Self {
            desc: desc.into(),
            code,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.desc
    }
}

impl From<VisaError> for crate::Error {
    fn from(err: VisaError) -> Self {
        crate::Error::Visa(err)
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const DEFAULT_LIBRARIES: &[&str] = &["visa64.dll", "visa32.dll"];
    } else if #[cfg(target_os = "macos")] {
        const DEFAULT_LIBRARIES: &[&str] = &["/Library/Frameworks/VISA.framework/VISA"];
    } else {
        const DEFAULT_LIBRARIES: &[&str] = &["libvisa.so", "libvisa.so.0"];
    }
}

type ViStatus = i32;
type ViAccessMode = u32;
type ViSession = u32;
type ViObject = u32;
type ViFindList = u32;
type ViAttr = u32;

#[cfg(target_pointer_width = "64")]
type ViAttrState = u64;
#[cfg(not(target_pointer_width = "64"))]
type ViAttrState = u32;

const VI_SUCCESS: ViStatus = 0;
const VI_SUCCESS_TERM_CHAR: ViStatus = 0x3FFF0005;
const VI_SUCCESS_MAX_CNT: ViStatus = 0x3FFF0006;
const VI_ERROR_RSRC_NFOUND: ViStatus = 0xBFFF0011_u32 as i32;

const VI_NO_LOCK: ViAccessMode = 0;
const VI_TMO_IMMEDIATE: u32 = 0;

// VI_FIND_BUFLEN
const DESC_LEN: usize = 256;

#[derive(WrapperApi)]
struct Api {
    viOpenDefaultRM: unsafe extern "system" fn(vi: *mut ViSession) -> ViStatus,
    viFindRsrc: unsafe extern "system" fn(
        session: ViSession,
        expr: *const c_char,
        find_list: *mut ViFindList,
        ret_cnt: *mut u32,
        desc: *mut c_char,
    ) -> ViStatus,
    viFindNext: unsafe extern "system" fn(find_list: ViFindList, desc: *mut c_char) -> ViStatus,
    viOpen: unsafe extern "system" fn(
        session: ViSession,
        rsrc: *const c_char,
        access_mode: ViAccessMode,
        timeout: u32,
        vi: *mut ViObject,
    ) -> ViStatus,
    viClose: extern "system" fn(vi: ViObject) -> ViStatus,
    viSetAttribute: extern "system" fn(vi: ViObject, attr: ViAttr, value: ViAttrState) -> ViStatus,
    viStatusDesc: unsafe extern "system" fn(vi: ViObject, status: ViStatus, desc: *mut c_char) -> ViStatus,
    viRead: unsafe extern "system" fn(vi: ViSession, buf: *mut u8, cnt: u32, cnt_ret: *mut u32) -> ViStatus,
    viWrite: unsafe extern "system" fn(vi: ViSession, buf: *const u8, cnt: u32, cnt_ret: *mut u32) -> ViStatus,
}

struct Library {
    api: Container<Api>,
    rm: ViSession,
    path: String,
}

impl Library {
    fn load(path: &str) -> crate::Result<Self> {
        log::debug!("Loading VISA library from `{}`", path);
        let api: Container<Api> = unsafe { Container::load(path) }
            .map_err(|err| crate::Error::Library(format!("{}: {}", path, err)))?;
        let mut rm: ViSession = 0;
        let status = unsafe { api.viOpenDefaultRM(&mut rm as *mut ViSession) };
        if status < VI_SUCCESS {
            return Err(VisaError::new(status, "Could not open default resource manager").into());
        }
        Ok(Library {
            api,
            rm,
            path: path.to_string(),
        })
    }

    fn check(&self, status: ViStatus) -> VisaResult<ViStatus> {
        if status < VI_SUCCESS {
            Err(VisaError::new(status, self.describe_status(status)))
        } else {
            Ok(status)
        }
    }

    fn describe_status(&self, status: ViStatus) -> String {
        let mut desc = [0 as c_char; DESC_LEN];
        let ret = unsafe { self.api.viStatusDesc(self.rm, status, desc.as_mut_ptr()) };
        if ret < VI_SUCCESS {
            return format!("Unknown status code {:#010X}", status);
        }
        unsafe { CStr::from_ptr(desc.as_ptr()) }.to_string_lossy().into_owned()
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        let status = self.api.viClose(self.rm);
        if status < VI_SUCCESS {
            log::debug!("Error closing resource manager: {:#010X}", status);
        }
    }
}

/// Resource manager backed by a VISA shared library loaded at run time.
pub struct Visa {
    lib: Arc<Library>,
}

impl Visa {
    /// Load the VISA library at `path`, or try the platform defaults in order.
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        if let Some(path) = path {
            let lib = Library::load(path)?;
            return Ok(Self { lib: Arc::new(lib) });
        }
        let mut last_err = crate::Error::Library("No default VISA library for this platform".to_string());
        for path in DEFAULT_LIBRARIES {
            match Library::load(path) {
                Ok(lib) => return Ok(Self { lib: Arc::new(lib) }),
                Err(err) => {
                    log::debug!("{}", err);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    pub fn path(&self) -> &str {
        &self.lib.path
    }
}

impl ResourceManager for Visa {
    type Device = Instrument;

    fn list_resources(&self, query: &str) -> crate::Result<Vec<String>> {
        let expr = CString::new(query).map_err(crate::Error::argument)?;
        let api = &self.lib.api;
        let mut find_list: ViFindList = 0;
        let mut count = 0_u32;
        let mut desc = [0 as c_char; DESC_LEN];
        let status = unsafe {
            api.viFindRsrc(
                self.lib.rm,
                expr.as_ptr(),
                &mut find_list as *mut ViFindList,
                &mut count as *mut u32,
                desc.as_mut_ptr(),
            )
        };
        if status == VI_ERROR_RSRC_NFOUND {
            return Ok(Vec::new());
        }
        self.lib.check(status)?;

        let mut ret = Vec::with_capacity(count as usize);
        ret.push(unsafe { CStr::from_ptr(desc.as_ptr()) }.to_string_lossy().into_owned());
        let mut result = Ok(());
        for _ in 1..count {
            let status = unsafe { api.viFindNext(find_list, desc.as_mut_ptr()) };
            if let Err(err) = self.lib.check(status) {
                result = Err(err);
                break;
            }
            ret.push(unsafe { CStr::from_ptr(desc.as_ptr()) }.to_string_lossy().into_owned());
        }
        api.viClose(find_list);
        result?;
        Ok(ret)
    }

    fn open(&self, addr: &str) -> crate::Result<Instrument> {
        let rsrc = CString::new(addr)
            .map_err(|_| crate::Error::argument(anyhow!("Resource address `{}` contains a NUL byte", addr)))?;
        let mut vi: ViObject = 0;
        let status = unsafe {
            self.lib
                .api
                .viOpen(self.lib.rm, rsrc.as_ptr(), VI_NO_LOCK, VI_TMO_IMMEDIATE, &mut vi as *mut ViObject)
        };
        self.lib.check(status)?;
        log::debug!("Opened `{}` as session {}", addr, vi);
        Ok(Instrument {
            lib: self.lib.clone(),
            vi,
            addr: addr.to_string(),
            closed: false,
        })
    }
}

/// A raw VISA session handle.
pub struct Instrument {
    lib: Arc<Library>,
    vi: ViObject,
    addr: String,
    closed: bool,
}

impl Instrument {
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Device for Instrument {
    fn write(&mut self, data: &[u8]) -> VisaResult<usize> {
        let mut actually_written = 0_u32;
        let status = unsafe {
            self.lib
                .api
                .viWrite(self.vi, data.as_ptr(), data.len() as u32, &mut actually_written as *mut u32)
        };
        self.lib.check(status)?;
        Ok(actually_written as usize)
    }

    fn read(&mut self, max_len: usize) -> VisaResult<(Vec<u8>, ReadStatus)> {
        let mut data = vec![0_u8; max_len];
        let mut actually_read = 0_u32;
        let status = unsafe {
            self.lib
                .api
                .viRead(self.vi, data.as_mut_ptr(), max_len as u32, &mut actually_read as *mut u32)
        };
        let status = self.lib.check(status)?;
        data.truncate(actually_read as usize);
        let status = match status {
            VI_SUCCESS_TERM_CHAR => ReadStatus::TermChar,
            VI_SUCCESS_MAX_CNT => ReadStatus::MaxCount,
            _ => ReadStatus::End,
        };
        Ok((data, status))
    }

    fn set_attribute(&mut self, attr: Attribute, value: u64) -> VisaResult<()> {
        let status = self.lib.api.viSetAttribute(self.vi, attr.code(), value as ViAttrState);
        self.lib.check(status).map(|_| ())
    }

    fn close(&mut self) -> VisaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::debug!("Closing session {} (`{}`)", self.vi, self.addr);
        let status = self.lib.api.viClose(self.vi);
        self.lib.check(status).map(|_| ())
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::debug!("Error dropping instrument `{}`: {}", self.addr, err);
        }
    }
}
