//! Typed reads and pointer-chain resolution over any [`ReadMemory`] source

use super::{Address, ProbeError};
use serde::{Deserialize, Serialize};

/// Raw byte access into a foreign address space
///
/// Implementations perform exactly one OS read per call and never retry.
pub trait ReadMemory {
    /// Fill `buf` with the bytes stored at `address`
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError>;
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), ProbeError> {
        (**self).read_bytes(address, buf)
    }
}

/// Plain value that can be decoded from little-endian process memory
pub trait MemoryValue: Copy {
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
    fn to_le_vec(self) -> Vec<u8>;
}

macro_rules! impl_memory_value {
    ($($ty:ty),*) => {
        $(
            impl MemoryValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                fn to_le_vec(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_memory_value!(i32, u32, i64, u64, f32, f64);

/// Size of a pointer in the external process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerWidth {
    #[serde(rename = "32")]
    Bits32,
    #[default]
    #[serde(rename = "64")]
    Bits64,
}

/// Read `size_of::<T>()` bytes at `address`
pub fn read_typed<T: MemoryValue, R: ReadMemory + ?Sized>(
    reader: &R,
    address: Address,
) -> Result<T, ProbeError> {
    let mut buf = [0u8; 8];
    let slice = &mut buf[..T::SIZE];
    reader.read_bytes(address, slice)?;
    Ok(T::from_le_slice(slice))
}

/// Read a pointer-sized value at `address`
pub fn read_pointer<R: ReadMemory + ?Sized>(
    reader: &R,
    address: Address,
    width: PointerWidth,
) -> Result<Address, ProbeError> {
    match width {
        PointerWidth::Bits32 => read_typed::<u32, R>(reader, address).map(Address::from),
        PointerWidth::Bits64 => read_typed::<u64, R>(reader, address),
    }
}

/// Follow a pointer chain starting at `base_address`
///
/// Each hop dereferences the current address and adds the next offset. The
/// address produced by the last offset is returned without dereferencing it.
pub fn resolve_pointer_chain<R: ReadMemory + ?Sized>(
    reader: &R,
    base_address: Address,
    offsets: &[u64],
    width: PointerWidth,
) -> Result<Address, ProbeError> {
    let mut address = base_address;
    for offset in offsets {
        let pointer = read_pointer(reader, address, width)?;
        address = pointer.wrapping_add(*offset);
    }
    Ok(address)
}
