//! Fallback for platforms without a memory probe backend

use super::memory::ReadMemory;
use super::{Address, ProbeError, ProcessId, ProcessProvider};

#[derive(Debug)]
pub struct NoHandle;

impl ReadMemory for NoHandle {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        Err(ProbeError::InvalidParameter { address, len: buf.len() })
    }
}

/// Never finds the external process
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProvider;

impl UnsupportedProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessProvider for UnsupportedProvider {
    type Handle = NoHandle;

    fn locate_process(&self, name: &str) -> Result<ProcessId, ProbeError> {
        Err(ProbeError::ProcessNotFound { name: name.to_string() })
    }

    fn locate_module_base(&self, pid: ProcessId, module_name: &str) -> Result<Address, ProbeError> {
        Err(ProbeError::ModuleNotFound {
            pid,
            module: module_name.to_string(),
        })
    }

    fn open_readable_handle(&self, pid: ProcessId) -> Result<Self::Handle, ProbeError> {
        Err(ProbeError::AccessDenied { pid })
    }
}
