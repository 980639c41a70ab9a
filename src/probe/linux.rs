//! procfs-backed probe for Linux hosts (external app running under Wine/Proton)
//!
//! Processes are matched on the basename of `argv[0]`, which is the Windows
//! executable name for Wine processes, falling back to `comm`. Module bases
//! come from the first mapping of a matching file in `/proc/<pid>/maps`.

use super::memory::ReadMemory;
use super::{Address, ProbeError, ProcessId, ProcessProvider};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use tracing::trace;

// errno values (asm-generic)
const EPERM: i32 = 1;
const EIO: i32 = 5;
const EACCES: i32 = 13;
const EFAULT: i32 = 14;
const EINVAL: i32 = 22;

/// Reads `/proc/<pid>/mem` through a read-only file descriptor
#[derive(Debug)]
pub struct ProcMemHandle {
    pid: ProcessId,
    file: File,
}

impl ReadMemory for ProcMemHandle {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        let len = buf.len();
        match self.file.read_at(buf, address) {
            Ok(read) if read == len => Ok(()),
            Ok(_) => Err(ProbeError::PartialCopy { address, len }),
            Err(err) => Err(match err.raw_os_error() {
                Some(EPERM) | Some(EACCES) => ProbeError::AccessDenied { pid: self.pid },
                Some(EINVAL) => ProbeError::InvalidParameter { address, len },
                Some(EIO) | Some(EFAULT) => ProbeError::PartialCopy { address, len },
                code => ProbeError::Unknown {
                    address,
                    code: code.unwrap_or(-1),
                },
            }),
        }
    }
}

/// Process discovery through `/proc`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProvider;

impl ProcfsProvider {
    pub fn new() -> Self {
        Self
    }

    fn executable_name(pid: ProcessId) -> Option<String> {
        let cmdline = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let argv0 = cmdline.split(|b| *b == 0).next().filter(|arg| !arg.is_empty());

        match argv0 {
            Some(arg) => {
                let arg = String::from_utf8_lossy(arg);
                Some(basename(&arg).to_string())
            }
            None => fs::read_to_string(format!("/proc/{pid}/comm"))
                .ok()
                .map(|comm| comm.trim_end().to_string()),
        }
    }
}

/// Last component of a path using either separator
fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

impl ProcessProvider for ProcfsProvider {
    type Handle = ProcMemHandle;

    fn locate_process(&self, name: &str) -> Result<ProcessId, ProbeError> {
        let not_found = || ProbeError::ProcessNotFound { name: name.to_string() };
        let entries = fs::read_dir("/proc").map_err(|_| not_found())?;

        let mut pids: Vec<ProcessId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        pids.into_iter()
            .find(|pid| {
                Self::executable_name(*pid)
                    .map(|exe| exe.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .ok_or_else(not_found)
    }

    fn locate_module_base(&self, pid: ProcessId, module_name: &str) -> Result<Address, ProbeError> {
        let not_found = || ProbeError::ModuleNotFound {
            pid,
            module: module_name.to_string(),
        };
        let maps = fs::read_to_string(format!("/proc/{pid}/maps")).map_err(|_| not_found())?;

        maps.lines()
            .find_map(|line| {
                let mut fields = line.splitn(6, ' ');
                let range = fields.next()?;
                let path = fields.nth(4)?.trim_start();
                if !basename(path).eq_ignore_ascii_case(module_name) {
                    return None;
                }
                let start = range.split('-').next()?;
                Address::from_str_radix(start, 16).ok()
            })
            .ok_or_else(not_found)
    }

    fn open_readable_handle(&self, pid: ProcessId) -> Result<Self::Handle, ProbeError> {
        let file = File::open(format!("/proc/{pid}/mem")).map_err(|err| match err.kind() {
            ErrorKind::NotFound => ProbeError::ProcessNotFound { name: pid.to_string() },
            _ => ProbeError::AccessDenied { pid },
        })?;
        trace!(pid, "opened /proc mem handle");
        Ok(ProcMemHandle { pid, file })
    }
}
