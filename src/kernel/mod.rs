//! Kernel virtual-address-space views over a physical source
use crate::error::EngineError;
use crate::memory::{PhysicalMemory, PAGE_SIZE};
use crate::translation::{AddressTranslator, VirtualAddress};

/// Longest routine or module name the engine will read out of a target.
pub const MAX_NAME_LEN: usize = 256;

/// A virtual address space: a page-table root paired with the physical
/// source its tables live in.
///
/// Reads are strict. Structure parsing (module lists, process objects, PE
/// headers) cannot act on partial data, so any unmapped page inside the
/// requested range fails the whole read with `NotFound`.
pub struct VirtualSpace<'a> {
    phys: &'a dyn PhysicalMemory,
    root: u64,
}

impl<'a> VirtualSpace<'a> {
    pub fn new(phys: &'a dyn PhysicalMemory, root: u64) -> Self {
        VirtualSpace { phys, root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn physical(&self) -> &'a dyn PhysicalMemory {
        self.phys
    }

    /// Read `buf.len()` bytes at `va`, chunking at physical page boundaries.
    pub fn read_into(&self, va: u64, buf: &mut [u8]) -> Result<(), EngineError> {
        let translator = AddressTranslator::new(self.phys);
        let mut current_va = va;
        let mut filled = 0usize;

        while filled < buf.len() {
            let physical = translator
                .translate(self.root, VirtualAddress(current_va))
                .ok_or_else(|| {
                    EngineError::NotFound(format!("virtual address 0x{:x} not present", current_va))
                })?;

            let offset_in_page = (physical & 0xFFF) as usize;
            let chunk = (PAGE_SIZE - offset_in_page).min(buf.len() - filled);

            let copied = self
                .phys
                .read_physical(physical, &mut buf[filled..filled + chunk])?;
            if copied != chunk {
                return Err(EngineError::NotFound(format!(
                    "short physical read at 0x{:x}",
                    physical
                )));
            }

            current_va += chunk as u64;
            filled += chunk;
        }

        Ok(())
    }

    pub fn read(&self, va: u64, len: usize) -> Result<Vec<u8>, EngineError> {
        let mut buf = vec![0u8; len];
        self.read_into(va, &mut buf)?;
        Ok(buf)
    }

    pub fn read_u64(&self, va: u64) -> Result<u64, EngineError> {
        let mut buf = [0u8; 8];
        self.read_into(va, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u32(&self, va: u64) -> Result<u32, EngineError> {
        let mut buf = [0u8; 4];
        self.read_into(va, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u16(&self, va: u64) -> Result<u16, EngineError> {
        let mut buf = [0u8; 2];
        self.read_into(va, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a NUL-terminated ASCII string of at most `MAX_NAME_LEN` bytes,
    /// advancing page by page so a name near an unmapped page does not fail.
    pub fn read_cstring(&self, va: u64) -> Result<String, EngineError> {
        let mut out = Vec::new();
        let mut current_va = va;

        while out.len() < MAX_NAME_LEN {
            let to_page_end = PAGE_SIZE - (current_va as usize & 0xFFF);
            let chunk_len = to_page_end.min(MAX_NAME_LEN - out.len());
            let chunk = self.read(current_va, chunk_len)?;

            match chunk.iter().position(|&b| b == 0) {
                Some(nul) => {
                    out.extend_from_slice(&chunk[..nul]);
                    return Ok(String::from_utf8_lossy(&out).to_string());
                }
                None => {
                    out.extend_from_slice(&chunk);
                    current_va += chunk_len as u64;
                }
            }
        }

        Ok(String::from_utf8_lossy(&out).to_string())
    }

    /// Read a UTF-16LE string of `byte_len` bytes (a UNICODE_STRING body).
    pub fn read_utf16(&self, va: u64, byte_len: usize) -> Result<String, EngineError> {
        let byte_len = byte_len.min(MAX_NAME_LEN * 2);
        let raw = self.read(va, byte_len & !1)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Raw key-state query boundary.
///
/// The engine resolves the routine's address from the export table, but an
/// image source cannot execute target code; the host supplies the actual
/// query. Bit 15 of the returned value means "currently down".
pub trait KeyStateSource {
    fn raw_key_state(&self, key: u32) -> Result<u16, EngineError>;
}
