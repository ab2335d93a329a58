//! Symbol resolution: loaded-module walking and export-table lookup
use crate::error::EngineError;
use crate::kernel::VirtualSpace;
use memchr::memmem;
use serde::Serialize;
use std::collections::HashMap;

pub mod pe;

// KLDR_DATA_TABLE_ENTRY field offsets. The InLoadOrderLinks entry sits at
// offset 0, so a list link address is also the record address.
const LDR_DLL_BASE: u64 = 0x30;
const LDR_SIZE_OF_IMAGE: u64 = 0x40;
const LDR_BASE_NAME: u64 = 0x58;

// UNICODE_STRING: Length (u16), MaximumLength (u16), pad, Buffer (u64).
const USTR_LENGTH: u64 = 0x0;
const USTR_BUFFER: u64 = 0x8;

/// Upper bound on list traversal; a corrupt Flink chain must not spin.
const MAX_LIST_WALK: usize = 4096;

/// The privileged routines the engine resolves at initialization. Missing
/// entries are logged and surface as `NotFound` when first used.
pub const REQUIRED_ROUTINES: &[(&str, &str)] = &[
    ("ntoskrnl.exe", "PsLookupProcessByProcessId"),
    ("ntoskrnl.exe", "PsInitialSystemProcess"),
    ("ntoskrnl.exe", "MmCopyMemory"),
    ("ntoskrnl.exe", "MmMapIoSpace"),
    ("ntoskrnl.exe", "MmUnmapIoSpace"),
    ("win32kbase.sys", "_GetAsyncKeyState"),
];

/// A loaded module, as recorded in the loader's list.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

/// Routine name to resolved absolute address. Built once at initialization
/// and immutable afterwards.
pub struct SymbolTable {
    symbols: HashMap<String, u64>,
}

impl SymbolTable {
    /// Build a table from known entries, bypassing resolution. Useful when
    /// addresses come from an external source instead of the export walk.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        SymbolTable {
            symbols: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// Like `get`, but with the not-resolved error the operations report.
    pub fn require(&self, name: &str) -> Result<u64, EngineError> {
        self.get(name)
            .ok_or_else(|| EngineError::NotFound(format!("routine {} not resolved", name)))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Resolves modules and exports by walking target-kernel structures.
pub struct SymbolResolver<'a> {
    space: &'a VirtualSpace<'a>,
    module_list_head: u64,
}

impl<'a> SymbolResolver<'a> {
    pub fn new(space: &'a VirtualSpace<'a>, module_list_head: u64) -> Self {
        SymbolResolver {
            space,
            module_list_head,
        }
    }

    fn read_unicode_string(&self, va: u64) -> Result<String, EngineError> {
        let length = self.space.read_u16(va + USTR_LENGTH)? as usize;
        let buffer = self.space.read_u64(va + USTR_BUFFER)?;
        if buffer == 0 || length == 0 {
            return Ok(String::new());
        }
        self.space.read_utf16(buffer, length)
    }

    /// Walk the doubly linked loaded-module list and collect every record.
    pub fn modules(&self) -> Result<Vec<ModuleRecord>, EngineError> {
        let mut records = Vec::new();
        let mut current = self.space.read_u64(self.module_list_head)?;

        for _ in 0..MAX_LIST_WALK {
            if current == self.module_list_head || current == 0 {
                return Ok(records);
            }

            let base = self.space.read_u64(current + LDR_DLL_BASE)?;
            let size = self.space.read_u32(current + LDR_SIZE_OF_IMAGE)? as u64;
            let name = self.read_unicode_string(current + LDR_BASE_NAME)?;

            if base != 0 && !name.is_empty() {
                records.push(ModuleRecord { name, base, size });
            }

            current = self.space.read_u64(current)?;
        }

        log::warn!("Module list exceeded {} entries; truncating", MAX_LIST_WALK);
        Ok(records)
    }

    /// Locate one module by base name, case-insensitively.
    pub fn find_module(&self, name: &str) -> Result<ModuleRecord, EngineError> {
        let wanted = name.to_ascii_lowercase();
        let mut current = self.space.read_u64(self.module_list_head)?;

        for _ in 0..MAX_LIST_WALK {
            if current == self.module_list_head || current == 0 {
                break;
            }

            let entry_name = self.read_unicode_string(current + LDR_BASE_NAME)?;
            if entry_name.to_ascii_lowercase() == wanted {
                let base = self.space.read_u64(current + LDR_DLL_BASE)?;
                let size = self.space.read_u32(current + LDR_SIZE_OF_IMAGE)? as u64;
                log::debug!("Found module {} at 0x{:x} (size 0x{:x})", entry_name, base, size);
                return Ok(ModuleRecord {
                    name: entry_name,
                    base,
                    size,
                });
            }

            current = self.space.read_u64(current)?;
        }

        log::warn!("Module {} not found in loaded-module list", name);
        Err(EngineError::NotFound(format!("module {}", name)))
    }

    /// Resolve one export of a named module to an absolute address.
    pub fn resolve(&self, module_name: &str, export: &str) -> Result<u64, EngineError> {
        let module = self.find_module(module_name)?;
        let address = pe::find_export(self.space, module.base, export)?;
        log::debug!(
            "Resolved {}!{} -> 0x{:x}",
            module_name,
            export,
            address
        );
        Ok(address)
    }

    /// Resolve every required routine into an immutable table.
    ///
    /// Failures are logged and skipped; the table holds whatever resolved.
    pub fn resolve_all(&self) -> SymbolTable {
        let mut symbols = HashMap::new();
        for (module, export) in REQUIRED_ROUTINES {
            match self.resolve(module, export) {
                Ok(address) => {
                    symbols.insert((*export).to_string(), address);
                }
                Err(e) => {
                    log::warn!("Could not resolve {}!{}: {}", module, export, e);
                }
            }
        }
        log::info!(
            "Resolved {}/{} required routines",
            symbols.len(),
            REQUIRED_ROUTINES.len()
        );
        SymbolTable { symbols }
    }
}

/// A page-aligned PE header candidate found by a raw scan.
#[derive(Debug, Clone, Serialize)]
pub struct ImageHit {
    pub physical: u64,
    pub size_of_image: u64,
}

/// Heuristic scan of a raw physical image for page-aligned module headers.
///
/// Finds DOS-magic candidates, keeps the page-aligned ones, and validates
/// the PE signature at `e_lfanew` before reporting. `report` is invoked with
/// the scan position for progress display.
pub fn scan_image_bases<F: FnMut(u64)>(image: &[u8], mut report: F) -> Vec<ImageHit> {
    let mut hits = Vec::new();
    let finder = memmem::Finder::new(b"MZ");

    for pos in finder.find_iter(image) {
        report(pos as u64);
        if pos & 0xFFF != 0 {
            continue;
        }
        if pos + 0x40 > image.len() {
            continue;
        }

        let e_lfanew = u32::from_le_bytes([
            image[pos + 0x3C],
            image[pos + 0x3D],
            image[pos + 0x3E],
            image[pos + 0x3F],
        ]) as usize;
        if e_lfanew < 0x40 || e_lfanew > 0x1000 || pos + e_lfanew + 0x58 > image.len() {
            continue;
        }

        let nt = pos + e_lfanew;
        let signature =
            u32::from_le_bytes([image[nt], image[nt + 1], image[nt + 2], image[nt + 3]]);
        if signature != pe::PE_SIGNATURE {
            continue;
        }

        // SizeOfImage lives at optional header offset 0x38.
        let size_at = nt + 0x18 + 0x38;
        let size_of_image = u32::from_le_bytes([
            image[size_at],
            image[size_at + 1],
            image[size_at + 2],
            image[size_at + 3],
        ]) as u64;

        hits.push(ImageHit {
            physical: pos as u64,
            size_of_image,
        });
    }

    hits
}
