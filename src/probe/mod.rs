//! Out-of-process memory probe
//!
//! Locates the external process and its modules, opens a read-only handle and
//! resolves pointer chains to typed values. Carries no transport semantics.
//!
//! Handles are scoped: a [`ProbeSession`] opens one on creation and releases
//! it on drop, so nothing survives from one tick to the next and a restarted
//! external process is picked up transparently.

mod error;
pub mod memory;

#[doc(hidden)]
pub mod mock;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(windows, target_os = "linux")))]
mod unsupported;
#[cfg(windows)]
mod win32;

pub use error::{ProbeError, ProbeErrorKind};
pub use memory::{read_pointer, read_typed, resolve_pointer_chain, MemoryValue, PointerWidth, ReadMemory};

#[cfg(target_os = "linux")]
pub use linux::ProcfsProvider as SystemProvider;
#[cfg(not(any(windows, target_os = "linux")))]
pub use unsupported::UnsupportedProvider as SystemProvider;
#[cfg(windows)]
pub use win32::Win32Provider as SystemProvider;

use std::collections::HashMap;
use tracing::trace;

/// Virtual address in the external process
pub type Address = u64;

/// OS process identifier
pub type ProcessId = u32;

/// OS-level process and module discovery
pub trait ProcessProvider {
    /// Read-only process handle, released on drop
    type Handle: ReadMemory;

    /// First running process whose executable file name matches (case-insensitive)
    fn locate_process(&self, name: &str) -> Result<ProcessId, ProbeError>;

    /// Load address of the first module whose file name matches (case-insensitive)
    fn locate_module_base(&self, pid: ProcessId, module_name: &str) -> Result<Address, ProbeError>;

    /// Open the process with read-only memory access
    fn open_readable_handle(&self, pid: ProcessId) -> Result<Self::Handle, ProbeError>;

    /// File version of the process executable (`major.minor.patch.build`)
    fn process_version(&self, _pid: ProcessId) -> Option<String> {
        None
    }
}

/// One scoped acquisition of the external process
///
/// Opens the handle once, serves every field read of a tick, and closes the
/// handle when dropped. Module bases are memoized for the session only.
pub struct ProbeSession<'p, P: ProcessProvider> {
    provider: &'p P,
    pid: ProcessId,
    handle: P::Handle,
    module_bases: HashMap<String, Address>,
}

impl<'p, P: ProcessProvider> ProbeSession<'p, P> {
    /// Locate `process_name` and open it for reading
    pub fn open(provider: &'p P, process_name: &str) -> Result<Self, ProbeError> {
        let pid = provider.locate_process(process_name)?;
        let handle = provider.open_readable_handle(pid)?;
        trace!(pid, process = process_name, "probe session opened");

        Ok(Self {
            provider,
            pid,
            handle,
            module_bases: HashMap::new(),
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn process_version(&self) -> Option<String> {
        self.provider.process_version(self.pid)
    }

    /// Base address of `module_name`, looked up at most once per session
    pub fn module_base(&mut self, module_name: &str) -> Result<Address, ProbeError> {
        let key = module_name.to_ascii_lowercase();
        if let Some(base) = self.module_bases.get(&key) {
            return Ok(*base);
        }

        let base = self.provider.locate_module_base(self.pid, module_name)?;
        self.module_bases.insert(key, base);
        Ok(base)
    }

    /// Resolve `module + base_offset` through `offsets` and return the final address
    pub fn resolve(
        &mut self,
        module_name: &str,
        base_offset: u64,
        offsets: &[u64],
        width: PointerWidth,
    ) -> Result<Address, ProbeError> {
        let base = self.module_base(module_name)?.wrapping_add(base_offset);
        resolve_pointer_chain(&self.handle, base, offsets, width)
    }

    pub fn read<T: MemoryValue>(&self, address: Address) -> Result<T, ProbeError> {
        read_typed(&self.handle, address)
    }
}

impl<P: ProcessProvider> Drop for ProbeSession<'_, P> {
    fn drop(&mut self) {
        trace!(pid = self.pid, "probe session closed");
    }
}
