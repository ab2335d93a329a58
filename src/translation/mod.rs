//! x86-64 4-level page-table walking (virtual to physical translation)
use crate::memory::PhysicalMemory;

/// Bit 0 of a page-table entry: the next level (or final page) is mapped.
const ENTRY_PRESENT: u64 = 1 << 0;
/// Bit 7: the entry maps a 1 GiB (PDPT) or 2 MiB (PD) page directly.
const ENTRY_PAGE_SIZE: u64 = 1 << 7;

/// Offset mask within a 1 GiB page.
const LARGE_1G_MASK: u64 = (1u64 << 30) - 1;
/// Offset mask within a 2 MiB page.
const LARGE_2M_MASK: u64 = (1u64 << 21) - 1;

/// A 64-bit virtual address decomposed by shift/mask accessors.
///
/// Layout (low to high): page offset (12 bits), PT index (9), PD index (9),
/// PDPT index (9), PML4 index (9), 16 reserved sign bits. The reserved bits
/// are not validated against canonical-address rules; callers supply raw
/// 64-bit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub fn page_offset(self) -> u64 {
        self.0 & 0xFFF
    }

    pub fn pt_index(self) -> u64 {
        (self.0 >> 12) & 0x1FF
    }

    pub fn pd_index(self) -> u64 {
        (self.0 >> 21) & 0x1FF
    }

    pub fn pdpt_index(self) -> u64 {
        (self.0 >> 30) & 0x1FF
    }

    pub fn pml4_index(self) -> u64 {
        (self.0 >> 39) & 0x1FF
    }
}

/// A 64-bit page-table entry viewed through shift/mask accessors.
///
/// The full hardware layout is present(1) | rw(1) | user(1) | write-through(1)
/// | cache-disable(1) | accessed(1) | dirty(1) | page-size(1) | global(1) |
/// available(3) | physical frame (bits 12-51) | reserved(11) | nx(1). Only
/// `present`, `page_size`, and `phys_base` are consumed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry(pub u64);

impl PageEntry {
    pub fn present(self) -> bool {
        self.0 & ENTRY_PRESENT != 0
    }

    pub fn page_size(self) -> bool {
        self.0 & ENTRY_PAGE_SIZE != 0
    }

    /// Physical base frame number, bits 12-51 of the entry.
    pub fn phys_base(self) -> u64 {
        (self.0 >> 12) & 0xFF_FFFF_FFFF
    }
}

/// Outcome of a single page-table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// An intermediate or final entry was absent (or unreadable) at `level`,
    /// counted 0..=3 from the PML4.
    NotPresent { level: usize },
    /// The address resolved; `page_size` is 4 KiB, 2 MiB, or 1 GiB.
    Mapped { physical: u64, page_size: u64 },
}

/// Walks 4-level page tables against a physical memory source.
pub struct AddressTranslator<'a> {
    phys: &'a dyn PhysicalMemory,
}

impl<'a> AddressTranslator<'a> {
    pub fn new(phys: &'a dyn PhysicalMemory) -> Self {
        AddressTranslator { phys }
    }

    /// Read one 8-byte entry. A failed or short read is reported as an
    /// absent entry, never as a garbage address.
    fn read_entry(&self, addr: u64) -> Option<PageEntry> {
        let mut buf = [0u8; 8];
        match self.phys.read_physical(addr, &mut buf) {
            Ok(8) => Some(PageEntry(u64::from_le_bytes(buf))),
            Ok(n) => {
                log::debug!("Short entry read at 0x{:x} ({} bytes)", addr, n);
                None
            }
            Err(e) => {
                log::debug!("Entry read failed at 0x{:x}: {}", addr, e);
                None
            }
        }
    }

    /// Walk the hierarchy starting at the PML4 physical base `root`.
    ///
    /// One iteration per level, PML4 -> PDPT -> PD -> PT. The PDPT and PD
    /// levels short-circuit to 1 GiB and 2 MiB pages when the page-size bit
    /// is set.
    pub fn walk(&self, root: u64, va: VirtualAddress) -> Walk {
        // (table index, large-page offset mask where the level supports one)
        let levels: [(u64, Option<u64>); 4] = [
            (va.pml4_index(), None),
            (va.pdpt_index(), Some(LARGE_1G_MASK)),
            (va.pd_index(), Some(LARGE_2M_MASK)),
            (va.pt_index(), None),
        ];

        let mut table_base = root;
        for (level, (index, large_mask)) in levels.iter().enumerate() {
            // The root comes out of the image; an entry address past the
            // 64-bit limit is corrupt, not a wrap-around.
            let entry_addr = match table_base.checked_add(index * 8) {
                Some(addr) => addr,
                None => return Walk::NotPresent { level },
            };
            let entry = match self.read_entry(entry_addr) {
                Some(e) => e,
                None => return Walk::NotPresent { level },
            };

            if !entry.present() {
                log::debug!(
                    "Level {} entry not present for VA 0x{:x}",
                    level,
                    va.0
                );
                return Walk::NotPresent { level };
            }

            if let Some(mask) = large_mask {
                if entry.page_size() {
                    return Walk::Mapped {
                        physical: (entry.phys_base() << 12) + (va.0 & mask),
                        page_size: mask + 1,
                    };
                }
            }

            table_base = entry.phys_base() << 12;
        }

        Walk::Mapped {
            physical: table_base + va.page_offset(),
            page_size: 0x1000,
        }
    }

    /// Translate a virtual address, or `None` when any level is not present.
    pub fn translate(&self, root: u64, va: VirtualAddress) -> Option<u64> {
        match self.walk(root, va) {
            Walk::Mapped { physical, .. } => Some(physical),
            Walk::NotPresent { .. } => None,
        }
    }
}
