//! In-memory process image for tests
//!
//! `MockMemory` answers reads from a sparse set of byte regions and
//! `MockProvider` exposes one or more of them as fake processes.

use super::memory::{MemoryValue, ReadMemory};
use super::{Address, ProbeError, ProcessId, ProcessProvider};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sparse little-endian memory image
#[derive(Debug, Clone, Default)]
pub struct MockMemory {
    regions: Arc<BTreeMap<Address, Vec<u8>>>,
}

impl ReadMemory for MockMemory {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        let len = buf.len();
        let fault = ProbeError::PartialCopy { address, len };

        let (start, bytes) = self.regions.range(..=address).next_back().ok_or(fault.clone())?;
        let offset = (address - start) as usize;
        let end = offset.checked_add(len).ok_or(fault.clone())?;
        if end > bytes.len() {
            return Err(fault);
        }

        buf.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }
}

/// Builder for [`MockMemory`]
#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    regions: BTreeMap<Address, Vec<u8>>,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place raw bytes at `address`
    pub fn with_bytes(mut self, address: Address, bytes: &[u8]) -> Self {
        self.regions.insert(address, bytes.to_vec());
        self
    }

    /// Place a typed value at `address`
    pub fn with_value<T: MemoryValue>(self, address: Address, value: T) -> Self {
        let bytes = value.to_le_vec();
        self.with_bytes(address, &bytes)
    }

    /// Lay out a pointer chain so that `chain` resolves to `target` from `base`
    ///
    /// Intermediate hops are allocated from `scratch` upwards in 64 KiB steps.
    pub fn with_chain(mut self, base: Address, offsets: &[u64], target: Address, scratch: Address) -> Self {
        let Some((last, hops)) = offsets.split_last() else {
            return self;
        };

        let mut cursor = base;
        for (i, offset) in hops.iter().enumerate() {
            let block = scratch + (i as u64) * 0x1_0000;
            self = self.with_value(cursor, block);
            cursor = block + offset;
        }
        self.with_value(cursor, target.wrapping_sub(*last))
    }

    pub fn build(self) -> MockMemory {
        MockMemory {
            regions: Arc::new(self.regions),
        }
    }
}

/// Handle into a [`MockProvider`] process, tracking how many are open
#[derive(Debug)]
pub struct MockHandle {
    memory: MockMemory,
    live: Arc<AtomicUsize>,
}

impl ReadMemory for MockHandle {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        self.memory.read_bytes(address, buf)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct MockProcess {
    name: String,
    pid: ProcessId,
    version: Option<String>,
    modules: Vec<(String, Address)>,
    memory: MockMemory,
}

/// Fake process table implementing [`ProcessProvider`]
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    processes: Vec<MockProcess>,
    denied: HashSet<ProcessId>,
    live_handles: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(mut self, name: &str, pid: ProcessId, memory: MockMemory) -> Self {
        self.processes.push(MockProcess {
            name: name.to_string(),
            pid,
            version: None,
            modules: Vec::new(),
            memory,
        });
        self
    }

    pub fn with_module(mut self, pid: ProcessId, module: &str, base: Address) -> Self {
        if let Some(process) = self.processes.iter_mut().find(|p| p.pid == pid) {
            process.modules.push((module.to_string(), base));
        }
        self
    }

    pub fn with_version(mut self, pid: ProcessId, version: &str) -> Self {
        if let Some(process) = self.processes.iter_mut().find(|p| p.pid == pid) {
            process.version = Some(version.to_string());
        }
        self
    }

    pub fn deny_access(mut self, pid: ProcessId) -> Self {
        self.denied.insert(pid);
        self
    }

    /// Handles currently held open
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Handles opened since creation
    pub fn opened_handles(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn process(&self, pid: ProcessId) -> Option<&MockProcess> {
        self.processes.iter().find(|p| p.pid == pid)
    }
}

impl ProcessProvider for MockProvider {
    type Handle = MockHandle;

    fn locate_process(&self, name: &str) -> Result<ProcessId, ProbeError> {
        self.processes
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.pid)
            .ok_or_else(|| ProbeError::ProcessNotFound { name: name.to_string() })
    }

    fn locate_module_base(&self, pid: ProcessId, module_name: &str) -> Result<Address, ProbeError> {
        self.process(pid)
            .and_then(|p| {
                p.modules
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(module_name))
                    .map(|(_, base)| *base)
            })
            .ok_or_else(|| ProbeError::ModuleNotFound {
                pid,
                module: module_name.to_string(),
            })
    }

    fn open_readable_handle(&self, pid: ProcessId) -> Result<Self::Handle, ProbeError> {
        if self.denied.contains(&pid) {
            return Err(ProbeError::AccessDenied { pid });
        }
        let process = self.process(pid).ok_or(ProbeError::AccessDenied { pid })?;

        self.live_handles.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            memory: process.memory.clone(),
            live: self.live_handles.clone(),
        })
    }

    fn process_version(&self, pid: ProcessId) -> Option<String> {
        self.process(pid).and_then(|p| p.version.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::memory::{read_typed, resolve_pointer_chain, PointerWidth};

    #[test]
    fn test_with_chain_resolves_to_target() {
        let offsets = [0x18, 0xA0, 0x38, 0x0];
        let memory = MockMemoryBuilder::new()
            .with_chain(0x1000, &offsets, 0x9000, 0x10_0000)
            .with_value(0x9000u64, 1234i32)
            .build();

        let address = resolve_pointer_chain(&memory, 0x1000, &offsets, PointerWidth::Bits64).unwrap();
        assert_eq!(address, 0x9000);
        assert_eq!(read_typed::<i32, _>(&memory, address).unwrap(), 1234);
    }

    #[test]
    fn test_provider_lookup_is_case_insensitive() {
        let provider = MockProvider::new()
            .with_process("GuitarPro.exe", 7, MockMemory::default())
            .with_module(7, "GPCore.dll", 0x7ff0_0000);

        let pid = provider.locate_process("guitarpro.EXE").unwrap();
        assert_eq!(pid, 7);
        assert_eq!(provider.locate_module_base(pid, "gpcore.dll").unwrap(), 0x7ff0_0000);
        assert!(provider.locate_process("GuitarPro").is_err());
    }

    #[test]
    fn test_handles_are_counted() {
        let provider = MockProvider::new().with_process("a.exe", 1, MockMemory::default());
        {
            let _handle = provider.open_readable_handle(1).unwrap();
            assert_eq!(provider.live_handles(), 1);
        }
        assert_eq!(provider.live_handles(), 0);
        assert_eq!(provider.opened_handles(), 1);
    }

    #[test]
    fn test_denied_process() {
        let provider = MockProvider::new()
            .with_process("a.exe", 1, MockMemory::default())
            .deny_access(1);
        let err = provider.open_readable_handle(1).unwrap_err();
        assert_eq!(err, ProbeError::AccessDenied { pid: 1 });
    }
}
