//! Physical memory sources and the page-bounded access contract
use crate::error::EngineError;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;

/// Physical page size for x86-64 4 KiB pages.
pub const PAGE_SIZE: usize = 4096;

/// Low 12 bits of a physical address (offset within a page).
pub const PAGE_OFFSET_MASK: u64 = 0xFFF;

/// A source of raw physical memory.
///
/// Reads and writes are bounded to a single physical page; callers needing
/// more must chunk at page boundaries. A read may return fewer bytes than
/// requested when the range runs off the end of the source; it must never
/// fault. Writes are all-or-nothing within the page bound.
pub trait PhysicalMemory {
    /// Read up to `buf.len()` bytes (at most one page) from `addr`.
    /// Returns the number of bytes actually copied.
    fn read_physical(&self, addr: u64, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Write `bytes` (at most one page) at `addr`. Returns bytes written.
    fn write_physical(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, EngineError>;

    /// One past the highest addressable physical byte.
    fn max_address(&self) -> u64;
}

/// Copy from a backing slice through a page-sized scratch buffer.
///
/// The intermediate copy keeps a partial or failed transfer from leaving the
/// caller's buffer half-written.
fn scratch_copy(backing: &[u8], addr: u64, buf: &mut [u8]) -> Result<usize, EngineError> {
    if buf.len() > PAGE_SIZE {
        return Err(EngineError::BufferTooLarge);
    }
    if addr >= backing.len() as u64 {
        return Err(EngineError::NotFound(format!(
            "physical address 0x{:x} out of range",
            addr
        )));
    }

    let mut scratch = [0u8; PAGE_SIZE];
    let start = addr as usize;
    let avail = backing.len() - start;
    let copied = buf.len().min(avail);
    scratch[..copied].copy_from_slice(&backing[start..start + copied]);

    buf[..copied].copy_from_slice(&scratch[..copied]);
    Ok(copied)
}

fn bounded_write(backing: &mut [u8], addr: u64, bytes: &[u8]) -> Result<usize, EngineError> {
    if bytes.len() > PAGE_SIZE {
        return Err(EngineError::BufferTooLarge);
    }
    let start = addr as usize;
    // The whole target range must be mappable; a straddling or out-of-range
    // write has no backing to map.
    if addr >= backing.len() as u64 || start + bytes.len() > backing.len() {
        log::error!(
            "Cannot map physical range 0x{:x}..0x{:x} for write",
            addr,
            addr + bytes.len() as u64
        );
        return Err(EngineError::InsufficientResources);
    }
    backing[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// A raw physical memory image mapped read-write from disk.
pub struct MappedImage {
    mapped: MmapMut,
}

impl MappedImage {
    /// Open and memory-map a raw physical image file.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mapped = unsafe { MmapMut::map_mut(&file)? };
        Ok(MappedImage { mapped })
    }

    /// The full image contents, for scanners that work over raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.mapped
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }
}

impl PhysicalMemory for MappedImage {
    fn read_physical(&self, addr: u64, buf: &mut [u8]) -> Result<usize, EngineError> {
        scratch_copy(&self.mapped, addr, buf)
    }

    fn write_physical(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, EngineError> {
        bounded_write(&mut self.mapped, addr, bytes)
    }

    fn max_address(&self) -> u64 {
        self.mapped.len() as u64
    }
}

/// A Vec-backed physical memory, for in-process callers and tests.
pub struct BufferMemory {
    data: Vec<u8>,
}

impl BufferMemory {
    /// Create a zero-filled physical space of `size` bytes.
    pub fn new(size: usize) -> Self {
        BufferMemory {
            data: vec![0u8; size],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        BufferMemory { data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl PhysicalMemory for BufferMemory {
    fn read_physical(&self, addr: u64, buf: &mut [u8]) -> Result<usize, EngineError> {
        scratch_copy(&self.data, addr, buf)
    }

    fn write_physical(&mut self, addr: u64, bytes: &[u8]) -> Result<usize, EngineError> {
        bounded_write(&mut self.data, addr, bytes)
    }

    fn max_address(&self) -> u64 {
        self.data.len() as u64
    }
}
