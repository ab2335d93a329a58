//! In-memory machine builder shared by the unit tests
//!
//! Builds a small physical space with real four-level page tables, loaded
//! images, a loader module list, and an active-process list, so tests can
//! exercise the translation and walking code against honest structures.
use crate::core::profile::ProcessOffsets;
use crate::memory::{BufferMemory, PhysicalMemory, PAGE_SIZE};
use crate::symbols::SymbolTable;
use crate::translation::VirtualAddress;

const ENTRY_PRESENT: u64 = 0x3;
const FRAME_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Kernel VA where `build_module_list` places its loader page.
const LDR_VA: u64 = 0xFFFF_B000_0000_0000;
/// Kernel VA where `build_process_list` places its anchor page.
const PROC_VA: u64 = 0xFFFF_C000_0000_0000;

pub struct Machine {
    pub phys: BufferMemory,
    next_frame: u64,
}

impl Machine {
    /// A zeroed physical space of `frames` pages. Frame 0 stays unused so a
    /// zero address never aliases a real structure.
    pub fn new(frames: usize) -> Self {
        Machine {
            phys: BufferMemory::new(frames * PAGE_SIZE),
            next_frame: 1,
        }
    }

    /// Hand out the next free frame, as a physical address.
    pub fn alloc_frame(&mut self) -> u64 {
        let pa = self.next_frame * PAGE_SIZE as u64;
        self.next_frame += 1;
        assert!(
            pa < self.phys.max_address(),
            "machine out of physical frames"
        );
        pa
    }

    /// A fresh, empty page-table root.
    pub fn new_address_space(&mut self) -> u64 {
        self.alloc_frame()
    }

    pub fn fill(&mut self, pa: u64, bytes: &[u8]) {
        let start = pa as usize;
        self.phys.bytes_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u64(&mut self, pa: u64, value: u64) {
        self.fill(pa, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, pa: u64, value: u32) {
        self.fill(pa, &value.to_le_bytes());
    }

    pub fn write_u16(&mut self, pa: u64, value: u16) {
        self.fill(pa, &value.to_le_bytes());
    }

    fn read_u64(&self, pa: u64) -> u64 {
        let start = pa as usize;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.phys.bytes()[start..start + 8]);
        u64::from_le_bytes(raw)
    }

    /// Return the table a directory entry points at, creating it on demand.
    fn table_at(&mut self, entry_pa: u64) -> u64 {
        let entry = self.read_u64(entry_pa);
        if entry & 1 != 0 {
            return entry & FRAME_MASK;
        }
        let table = self.alloc_frame();
        self.write_u64(entry_pa, table | ENTRY_PRESENT);
        table
    }

    /// Map one 4 KiB page `va` -> `pa` under `root`, building intermediate
    /// tables as needed.
    pub fn map_page(&mut self, root: u64, va: u64, pa: u64) {
        let va = VirtualAddress(va);
        let pdpt = self.table_at(root + va.pml4_index() * 8);
        let pd = self.table_at(pdpt + va.pdpt_index() * 8);
        let pt = self.table_at(pd + va.pd_index() * 8);
        self.write_u64(pt + va.pt_index() * 8, pa | ENTRY_PRESENT);
    }

    /// Map `image` page by page at `base_va` and copy its bytes in.
    pub fn load_image(&mut self, root: u64, base_va: u64, image: &[u8]) {
        for (i, chunk) in image.chunks(PAGE_SIZE).enumerate() {
            let frame = self.alloc_frame();
            self.map_page(root, base_va + (i * PAGE_SIZE) as u64, frame);
            self.fill(frame, chunk);
        }
    }

    /// Build a loader module list from `(name, base, size)` triples and
    /// return the list head's virtual address.
    ///
    /// The head `LIST_ENTRY` sits at offset 0 of a dedicated page; module
    /// records follow at 0x100 strides with their links at record offset 0,
    /// and the UTF-16 name buffers occupy the page's upper half.
    pub fn build_module_list(&mut self, root: u64, modules: &[(&str, u64, u64)]) -> u64 {
        assert!(modules.len() <= 7, "loader page holds at most 7 records");
        let frame = self.alloc_frame();
        self.map_page(root, LDR_VA, frame);

        let entry_va = |i: usize| LDR_VA + 0x100 * (i as u64 + 1);
        let name_va = |i: usize| LDR_VA + 0x800 + 0x40 * i as u64;

        for (i, (name, base, size)) in modules.iter().enumerate() {
            let record = frame + 0x100 * (i as u64 + 1);

            let next = if i + 1 == modules.len() {
                LDR_VA
            } else {
                entry_va(i + 1)
            };
            let prev = if i == 0 { LDR_VA } else { entry_va(i - 1) };
            self.write_u64(record, next);
            self.write_u64(record + 8, prev);

            self.write_u64(record + 0x30, *base);
            self.write_u32(record + 0x40, *size as u32);

            // BaseDllName UNICODE_STRING.
            let wide: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            self.write_u16(record + 0x58, wide.len() as u16);
            self.write_u16(record + 0x5A, wide.len() as u16);
            self.write_u64(record + 0x60, name_va(i));
            let name_pa = frame + 0x800 + 0x40 * i as u64;
            self.fill(name_pa, &wide);
        }

        // Head links: Flink to the first record, Blink to the last.
        if modules.is_empty() {
            self.write_u64(frame, LDR_VA);
            self.write_u64(frame + 8, LDR_VA);
        } else {
            self.write_u64(frame, entry_va(0));
            self.write_u64(frame + 8, entry_va(modules.len() - 1));
        }
        LDR_VA
    }

    /// Build an active-process list from `(pid, dir_base, image_base)`
    /// triples. Returns a symbol table whose `PsInitialSystemProcess` entry
    /// anchors the list, plus the object virtual addresses in input order.
    pub fn build_process_list(
        &mut self,
        root: u64,
        offsets: &ProcessOffsets,
        processes: &[(u64, u64, u64)],
    ) -> (SymbolTable, Vec<u64>) {
        let anchor_frame = self.alloc_frame();
        self.map_page(root, PROC_VA, anchor_frame);

        let object_va = |i: usize| PROC_VA + PAGE_SIZE as u64 * (i as u64 + 1);
        let mut objects = Vec::with_capacity(processes.len());

        for (i, (pid, dir_base, image_base)) in processes.iter().enumerate() {
            let frame = self.alloc_frame();
            let va = object_va(i);
            self.map_page(root, va, frame);

            self.write_u64(frame + offsets.unique_pid, *pid);
            self.write_u64(frame + offsets.dir_base, *dir_base);
            self.write_u64(frame + offsets.image_base, *image_base);

            // Circular links: last entry points back at the first.
            let next = if i + 1 == processes.len() {
                object_va(0)
            } else {
                object_va(i + 1)
            };
            self.write_u64(frame + offsets.links, next + offsets.links);
            objects.push(va);
        }

        // The PsInitialSystemProcess data cell points at the first object.
        if let Some(first) = objects.first() {
            self.write_u64(anchor_frame, *first);
        }

        let symbols =
            SymbolTable::from_entries([("PsInitialSystemProcess".to_string(), PROC_VA)]);
        (symbols, objects)
    }
}

/// Builds a minimal but well-formed PE32+ image in one page.
pub struct PeLayout {
    exports: Vec<(String, u32)>,
    export_directory: bool,
}

// Fixed layout offsets within the built page.
const NT: usize = 0x80;
const OPTIONAL: usize = NT + 0x18;
const EXPORT_DIR: usize = 0x200;
const FUNCTIONS: usize = 0x240;
const NAMES: usize = 0x280;
const ORDINALS: usize = 0x2C0;
const NAME_STRINGS: usize = 0x300;
const NAME_STRIDE: usize = 0x20;

impl PeLayout {
    pub fn new(exports: &[(&str, u32)]) -> Self {
        PeLayout {
            exports: exports
                .iter()
                .map(|(name, rva)| ((*name).to_string(), *rva))
                .collect(),
            export_directory: true,
        }
    }

    /// A valid image whose export data-directory entry is empty.
    pub fn without_exports() -> Self {
        PeLayout {
            exports: Vec::new(),
            export_directory: false,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; PAGE_SIZE];
        let put_u16 = |image: &mut Vec<u8>, at: usize, v: u16| {
            image[at..at + 2].copy_from_slice(&v.to_le_bytes());
        };
        let put_u32 = |image: &mut Vec<u8>, at: usize, v: u32| {
            image[at..at + 4].copy_from_slice(&v.to_le_bytes());
        };

        image[0] = b'M';
        image[1] = b'Z';
        put_u32(&mut image, 0x3C, NT as u32);
        put_u32(&mut image, NT, 0x0000_4550);
        put_u16(&mut image, OPTIONAL, 0x020B);
        // SizeOfImage: one page.
        put_u32(&mut image, OPTIONAL + 0x38, PAGE_SIZE as u32);
        // NumberOfRvaAndSizes.
        put_u32(&mut image, OPTIONAL + 0x6C, 16);

        if self.export_directory {
            put_u32(&mut image, NT + 0x88, EXPORT_DIR as u32);
            put_u32(&mut image, NT + 0x8C, 0x100);

            let count = self.exports.len();
            put_u32(&mut image, EXPORT_DIR + 0x14, count as u32);
            put_u32(&mut image, EXPORT_DIR + 0x18, count as u32);
            put_u32(&mut image, EXPORT_DIR + 0x1C, FUNCTIONS as u32);
            put_u32(&mut image, EXPORT_DIR + 0x20, NAMES as u32);
            put_u32(&mut image, EXPORT_DIR + 0x24, ORDINALS as u32);

            for (i, (name, rva)) in self.exports.iter().enumerate() {
                let string_at = NAME_STRINGS + i * NAME_STRIDE;
                assert!(name.len() < NAME_STRIDE, "export name too long");
                assert!(string_at + NAME_STRIDE <= PAGE_SIZE, "too many exports");

                put_u32(&mut image, FUNCTIONS + i * 4, *rva);
                put_u32(&mut image, NAMES + i * 4, string_at as u32);
                put_u16(&mut image, ORDINALS + i * 2, i as u16);
                image[string_at..string_at + name.len()].copy_from_slice(name.as_bytes());
            }
        }
        image
    }
}
