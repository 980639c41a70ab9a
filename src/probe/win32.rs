//! Win32 probe backend (ToolHelp snapshots + ReadProcessMemory)

use super::memory::ReadMemory;
use super::{Address, ProbeError, ProcessId, ProcessProvider};
use std::ffi::c_void;
use tracing::trace;
use windows::core::{w, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, ERROR_PARTIAL_COPY, HANDLE, MAX_PATH,
};
use windows::Win32::Storage::FileSystem::{
    GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW, VS_FIXEDFILEINFO,
};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Process32FirstW, Process32NextW,
    MODULEENTRY32W, PROCESSENTRY32W, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_VM_READ,
};

/// Owned Win32 handle, closed on drop
#[derive(Debug)]
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Process handle opened with `PROCESS_VM_READ` only
#[derive(Debug)]
pub struct Win32ProcessHandle {
    pid: ProcessId,
    handle: OwnedHandle,
}

impl ReadMemory for Win32ProcessHandle {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        let len = buf.len();
        let mut read = 0usize;

        let result = unsafe {
            ReadProcessMemory(
                self.handle.0,
                address as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                len,
                Some(&mut read),
            )
        };

        match result {
            Ok(()) if read == len => Ok(()),
            Ok(()) => Err(ProbeError::PartialCopy { address, len }),
            Err(err) => {
                let code = err.code();
                Err(if code == ERROR_ACCESS_DENIED.to_hresult() {
                    ProbeError::AccessDenied { pid: self.pid }
                } else if code == ERROR_INVALID_PARAMETER.to_hresult() {
                    ProbeError::InvalidParameter { address, len }
                } else if code == ERROR_PARTIAL_COPY.to_hresult() {
                    ProbeError::PartialCopy { address, len }
                } else {
                    ProbeError::Unknown { address, code: code.0 }
                })
            }
        }
    }
}

/// UTF-16 fixed buffer up to the first NUL
fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|c| *c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// Process discovery through ToolHelp snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Provider;

impl Win32Provider {
    pub fn new() -> Self {
        Self
    }

    fn image_path(pid: ProcessId) -> Option<Vec<u16>> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }.ok()?;
        let handle = OwnedHandle(handle);

        let mut buffer = [0u16; MAX_PATH as usize];
        let mut size = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(handle.0, PROCESS_NAME_WIN32, PWSTR(buffer.as_mut_ptr()), &mut size)
        }
        .ok()?;

        let mut path = buffer[..size as usize].to_vec();
        path.push(0);
        Some(path)
    }
}

impl ProcessProvider for Win32Provider {
    type Handle = Win32ProcessHandle;

    fn locate_process(&self, name: &str) -> Result<ProcessId, ProbeError> {
        let not_found = || ProbeError::ProcessNotFound { name: name.to_string() };
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }.map_err(|_| not_found())?;
        let snapshot = OwnedHandle(snapshot);

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) }.is_ok();
        while more {
            if wide_to_string(&entry.szExeFile).eq_ignore_ascii_case(name) {
                return Ok(entry.th32ProcessID);
            }
            more = unsafe { Process32NextW(snapshot.0, &mut entry) }.is_ok();
        }

        Err(not_found())
    }

    fn locate_module_base(&self, pid: ProcessId, module_name: &str) -> Result<Address, ProbeError> {
        let not_found = || ProbeError::ModuleNotFound {
            pid,
            module: module_name.to_string(),
        };
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) }
            .map_err(|_| not_found())?;
        let snapshot = OwnedHandle(snapshot);

        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let mut more = unsafe { Module32FirstW(snapshot.0, &mut entry) }.is_ok();
        while more {
            if wide_to_string(&entry.szModule).eq_ignore_ascii_case(module_name) {
                return Ok(entry.modBaseAddr as Address);
            }
            more = unsafe { Module32NextW(snapshot.0, &mut entry) }.is_ok();
        }

        Err(not_found())
    }

    fn open_readable_handle(&self, pid: ProcessId) -> Result<Self::Handle, ProbeError> {
        let handle = unsafe { OpenProcess(PROCESS_VM_READ, false, pid) }
            .map_err(|_| ProbeError::AccessDenied { pid })?;
        trace!(pid, "opened process handle");

        Ok(Win32ProcessHandle {
            pid,
            handle: OwnedHandle(handle),
        })
    }

    fn process_version(&self, pid: ProcessId) -> Option<String> {
        let path = Self::image_path(pid)?;
        let path = PCWSTR(path.as_ptr());

        let size = unsafe { GetFileVersionInfoSizeW(path, None) };
        if size == 0 {
            return None;
        }

        let mut data = vec![0u8; size as usize];
        unsafe { GetFileVersionInfoW(path, 0, size, data.as_mut_ptr() as *mut c_void) }.ok()?;

        let mut info: *mut c_void = std::ptr::null_mut();
        let mut len = 0u32;
        let found = unsafe { VerQueryValueW(data.as_ptr() as *const c_void, w!("\\"), &mut info, &mut len) };
        if !found.as_bool() || info.is_null() {
            return None;
        }

        let info = unsafe { &*(info as *const VS_FIXEDFILEINFO) };
        Some(format!(
            "{}.{}.{}.{}",
            info.dwFileVersionMS >> 16,
            info.dwFileVersionMS & 0xffff,
            info.dwFileVersionLS >> 16,
            info.dwFileVersionLS & 0xffff
        ))
    }
}
