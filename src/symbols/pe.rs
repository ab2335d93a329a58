//! PE header and export-directory parsing over a virtual address space
//!
//! This is not a PE loader. It validates just enough of the headers to reach
//! the export directory of an already-loaded image, where RVAs can be applied
//! directly to the in-memory base.
use crate::error::EngineError;
use crate::kernel::VirtualSpace;
use serde::Serialize;

/// "MZ"
pub const DOS_SIGNATURE: u16 = 0x5A4D;
/// "PE\0\0"
pub const PE_SIGNATURE: u32 = 0x0000_4550;
/// PE32+ optional header magic.
const OPTIONAL_MAGIC_64: u16 = 0x020B;

const E_LFANEW: u64 = 0x3C;
/// Optional header offset from the NT signature.
const OPTIONAL_HEADER: u64 = 0x18;
/// Export data-directory entry offset from the NT signature.
const EXPORT_DATA_DIRECTORY: u64 = 0x88;

// IMAGE_EXPORT_DIRECTORY fields.
const EXPORT_NUMBER_OF_FUNCTIONS: u64 = 0x14;
const EXPORT_NUMBER_OF_NAMES: u64 = 0x18;
const EXPORT_ADDRESS_OF_FUNCTIONS: u64 = 0x1C;
const EXPORT_ADDRESS_OF_NAMES: u64 = 0x20;
const EXPORT_ADDRESS_OF_NAME_ORDINALS: u64 = 0x24;

/// One named export, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub name: String,
    pub ordinal: u16,
    pub rva: u32,
    pub address: u64,
}

struct ExportDirectory {
    number_of_functions: u32,
    number_of_names: u32,
    functions: u64,
    names: u64,
    ordinals: u64,
}

/// Validate DOS and NT headers and return the export directory tables,
/// or `NotFound` when the image exports nothing.
fn export_directory(space: &VirtualSpace, base: u64) -> Result<ExportDirectory, EngineError> {
    let dos_magic = space.read_u16(base)?;
    if dos_magic != DOS_SIGNATURE {
        log::warn!("Invalid DOS header at 0x{:x} (magic 0x{:x})", base, dos_magic);
        return Err(EngineError::InvalidImageFormat(format!(
            "bad DOS magic 0x{:x}",
            dos_magic
        )));
    }

    let e_lfanew = space.read_u32(base + E_LFANEW)? as u64;
    let nt = base + e_lfanew;
    let signature = space.read_u32(nt)?;
    if signature != PE_SIGNATURE {
        log::warn!("Invalid NT header at 0x{:x} (signature 0x{:x})", nt, signature);
        return Err(EngineError::InvalidImageFormat(format!(
            "bad NT signature 0x{:x}",
            signature
        )));
    }

    let optional_magic = space.read_u16(nt + OPTIONAL_HEADER)?;
    if optional_magic != OPTIONAL_MAGIC_64 {
        return Err(EngineError::InvalidImageFormat(format!(
            "not a PE32+ image (optional magic 0x{:x})",
            optional_magic
        )));
    }

    let export_rva = space.read_u32(nt + EXPORT_DATA_DIRECTORY)? as u64;
    let export_size = space.read_u32(nt + EXPORT_DATA_DIRECTORY + 4)?;
    if export_rva == 0 || export_size == 0 {
        return Err(EngineError::NotFound("export directory".to_string()));
    }

    let dir = base + export_rva;
    let directory = ExportDirectory {
        number_of_functions: space.read_u32(dir + EXPORT_NUMBER_OF_FUNCTIONS)?,
        number_of_names: space.read_u32(dir + EXPORT_NUMBER_OF_NAMES)?,
        functions: base + space.read_u32(dir + EXPORT_ADDRESS_OF_FUNCTIONS)? as u64,
        names: base + space.read_u32(dir + EXPORT_ADDRESS_OF_NAMES)? as u64,
        ordinals: base + space.read_u32(dir + EXPORT_ADDRESS_OF_NAME_ORDINALS)? as u64,
    };

    if directory.number_of_names == 0 {
        return Err(EngineError::NotFound("export names".to_string()));
    }
    Ok(directory)
}

/// Find a named export and compute its absolute address.
///
/// A linear scan over the name-pointer array; the one-time init cost at this
/// scale does not justify a binary search over the sorted table.
pub fn find_export(space: &VirtualSpace, base: u64, export: &str) -> Result<u64, EngineError> {
    let directory = export_directory(space, base)?;

    for i in 0..directory.number_of_names as u64 {
        let name_rva = space.read_u32(directory.names + i * 4)? as u64;
        let name = space.read_cstring(base + name_rva)?;

        if name == export {
            let ordinal = space.read_u16(directory.ordinals + i * 2)?;
            if ordinal as u32 >= directory.number_of_functions {
                return Err(EngineError::InvalidImageFormat(format!(
                    "ordinal {} out of range",
                    ordinal
                )));
            }
            let rva = space.read_u32(directory.functions + ordinal as u64 * 4)?;
            return Ok(base + rva as u64);
        }
    }

    Err(EngineError::NotFound(format!("export {}", export)))
}

/// List every named export of a loaded image.
pub fn list_exports(space: &VirtualSpace, base: u64) -> Result<Vec<ExportRecord>, EngineError> {
    let directory = export_directory(space, base)?;
    let mut records = Vec::with_capacity(directory.number_of_names as usize);

    for i in 0..directory.number_of_names as u64 {
        let name_rva = space.read_u32(directory.names + i * 4)? as u64;
        let name = space.read_cstring(base + name_rva)?;
        let ordinal = space.read_u16(directory.ordinals + i * 2)?;
        if ordinal as u32 >= directory.number_of_functions {
            continue;
        }
        let rva = space.read_u32(directory.functions + ordinal as u64 * 4)?;

        records.push(ExportRecord {
            name,
            ordinal,
            rva,
            address: base + rva as u64,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Machine, PeLayout};

    fn loaded_image(exports: &[(&str, u32)]) -> (Machine, u64, u64) {
        let mut m = Machine::new(0x400);
        let root = m.new_address_space();
        let base = 0xFFFF_A000_0000_0000u64;
        let image = PeLayout::new(exports).build();
        m.load_image(root, base, &image);
        (m, root, base)
    }

    #[test]
    fn test_find_export_by_name() {
        let (m, root, base) = loaded_image(&[("Alpha", 0x1100), ("Beta", 0x2200)]);
        let space = VirtualSpace::new(&m.phys, root);

        assert_eq!(find_export(&space, base, "Beta").unwrap(), base + 0x2200);
        assert!(matches!(
            find_export(&space, base, "Gamma"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_exports() {
        let (m, root, base) = loaded_image(&[("Alpha", 0x1100), ("Beta", 0x2200)]);
        let space = VirtualSpace::new(&m.phys, root);

        let records = list_exports(&space, base).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Alpha");
        assert_eq!(records[0].address, base + 0x1100);
        assert_eq!(records[1].rva, 0x2200);
    }

    #[test]
    fn test_bad_dos_magic_is_invalid_image_format() {
        let (mut m, root, base) = loaded_image(&[("Alpha", 0x1100)]);
        // Corrupt the DOS magic in place.
        let pa = {
            let space = VirtualSpace::new(&m.phys, root);
            crate::translation::AddressTranslator::new(&m.phys)
                .translate(space.root(), crate::translation::VirtualAddress(base))
                .unwrap()
        };
        m.fill(pa, &[0, 0]);

        let space = VirtualSpace::new(&m.phys, root);
        assert!(matches!(
            find_export(&space, base, "Alpha"),
            Err(EngineError::InvalidImageFormat(_))
        ));
    }

    #[test]
    fn test_no_export_directory_is_not_found() {
        let mut m = Machine::new(0x400);
        let root = m.new_address_space();
        let base = 0xFFFF_A000_0000_0000u64;
        let image = PeLayout::without_exports().build();
        m.load_image(root, base, &image);

        let space = VirtualSpace::new(&m.phys, root);
        assert!(matches!(
            find_export(&space, base, "Anything"),
            Err(EngineError::NotFound(_))
        ));
    }
}
