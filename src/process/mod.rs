//! Process binding and active-process list lookup
use crate::core::profile::ProcessOffsets;
use crate::error::EngineError;
use crate::kernel::VirtualSpace;
use crate::symbols::SymbolTable;
use serde::Serialize;
use std::sync::Mutex;

/// Upper bound on the active-process walk; a corrupt link chain must not spin.
const MAX_LIST_WALK: usize = 4096;

/// The currently attached target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundProcess {
    pub pid: u64,
    /// Virtual address of the process object in the kernel address space.
    pub object: u64,
}

/// The single process-wide binding slot.
///
/// Guarded by a mutex: concurrent attach calls, or an attach racing a
/// read/write, serialize on the slot instead of interleaving.
pub struct ProcessBinding {
    slot: Mutex<Option<BoundProcess>>,
}

impl ProcessBinding {
    pub fn new() -> Self {
        ProcessBinding {
            slot: Mutex::new(None),
        }
    }

    /// Replace any previous binding.
    pub fn bind(&self, bound: BoundProcess) {
        *self.slot.lock().unwrap() = Some(bound);
        log::info!("Bound to process {} (object 0x{:x})", bound.pid, bound.object);
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap() = None;
    }

    pub fn current(&self) -> Option<BoundProcess> {
        *self.slot.lock().unwrap()
    }
}

impl Default for ProcessBinding {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of a process listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub pid: u64,
    pub object: u64,
    pub dir_base: u64,
    pub image_base: u64,
}

/// Walks the active-process list anchored at `PsInitialSystemProcess`.
pub struct ProcessList<'a> {
    space: &'a VirtualSpace<'a>,
    offsets: &'a ProcessOffsets,
    symbols: &'a SymbolTable,
}

impl<'a> ProcessList<'a> {
    pub fn new(
        space: &'a VirtualSpace<'a>,
        offsets: &'a ProcessOffsets,
        symbols: &'a SymbolTable,
    ) -> Self {
        ProcessList {
            space,
            offsets,
            symbols,
        }
    }

    /// The system process object: `PsInitialSystemProcess` is a data export
    /// holding a pointer to it.
    fn system_process(&self) -> Result<u64, EngineError> {
        let anchor = self.symbols.require("PsInitialSystemProcess")?;
        let object = self.space.read_u64(anchor)?;
        if object == 0 {
            return Err(EngineError::NotFound(
                "system process pointer is null".to_string(),
            ));
        }
        Ok(object)
    }

    /// Look a process object up by its numeric identifier.
    pub fn lookup(&self, pid: u64) -> Result<u64, EngineError> {
        let start = self.system_process()?;
        let mut current = start;

        for _ in 0..MAX_LIST_WALK {
            let current_pid = self.space.read_u64(current + self.offsets.unique_pid)?;
            if current_pid == pid {
                return Ok(current);
            }

            let next_link = self.space.read_u64(current + self.offsets.links)?;
            let next = match next_link.checked_sub(self.offsets.links) {
                Some(va) if va != 0 => va,
                _ => {
                    log::warn!("Corrupt process link 0x{:x}; stopping walk", next_link);
                    break;
                }
            };
            if next == start {
                break;
            }
            current = next;
        }

        log::warn!("Process {} not found in active-process list", pid);
        Err(EngineError::NotFound(format!("process {}", pid)))
    }

    /// Enumerate every process on the list.
    pub fn processes(&self) -> Result<Vec<ProcessSummary>, EngineError> {
        let start = self.system_process()?;
        let mut summaries = Vec::new();
        let mut current = start;

        for _ in 0..MAX_LIST_WALK {
            summaries.push(ProcessSummary {
                pid: self.space.read_u64(current + self.offsets.unique_pid)?,
                object: current,
                dir_base: self.space.read_u64(current + self.offsets.dir_base)?,
                image_base: self.space.read_u64(current + self.offsets.image_base)?,
            });

            let next_link = self.space.read_u64(current + self.offsets.links)?;
            let next = match next_link.checked_sub(self.offsets.links) {
                Some(va) if va != 0 => va,
                _ => {
                    log::warn!("Corrupt process link 0x{:x}; stopping walk", next_link);
                    return Ok(summaries);
                }
            };
            if next == start {
                return Ok(summaries);
            }
            current = next;
        }

        log::warn!("Process list exceeded {} entries; truncating", MAX_LIST_WALK);
        Ok(summaries)
    }
}

/// Read the page-table root out of a process object. Derived per call, never
/// cached, so a root change in the target is observed immediately.
pub fn page_table_root(
    space: &VirtualSpace,
    offsets: &ProcessOffsets,
    process: u64,
) -> Result<u64, EngineError> {
    space.read_u64(process + offsets.dir_base)
}

/// Read the image base virtual address out of a process object.
pub fn image_base(
    space: &VirtualSpace,
    offsets: &ProcessOffsets,
    process: u64,
) -> Result<u64, EngineError> {
    space.read_u64(process + offsets.image_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Machine;

    #[test]
    fn test_binding_overwrite_and_clear() {
        let binding = ProcessBinding::new();
        assert_eq!(binding.current(), None);

        binding.bind(BoundProcess {
            pid: 4,
            object: 0x1000,
        });
        binding.bind(BoundProcess {
            pid: 1234,
            object: 0x2000,
        });
        assert_eq!(binding.current().unwrap().pid, 1234);

        binding.clear();
        assert_eq!(binding.current(), None);
    }

    #[test]
    fn test_lookup_walks_the_list() {
        let mut m = Machine::new(0x800);
        let root = m.new_address_space();
        let offsets = ProcessOffsets::default();
        let (symbols, objects) =
            m.build_process_list(root, &offsets, &[(4, 0x1AD000, 0), (1234, 0x2BE000, 0x1_4000_0000)]);

        let space = VirtualSpace::new(&m.phys, root);
        let list = ProcessList::new(&space, &offsets, &symbols);

        assert_eq!(list.lookup(1234).unwrap(), objects[1]);
        assert_eq!(list.lookup(4).unwrap(), objects[0]);
        assert!(matches!(
            list.lookup(9999),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_link_stops_the_walk() {
        let mut m = Machine::new(0x800);
        let root = m.new_address_space();
        let offsets = ProcessOffsets::default();
        let (symbols, objects) =
            m.build_process_list(root, &offsets, &[(4, 0x1AD000, 0), (1234, 0x2BE000, 0)]);

        // Point the last object's Flink below the links offset, as a hostile
        // image could.
        let pa = crate::translation::AddressTranslator::new(&m.phys)
            .translate(root, crate::translation::VirtualAddress(objects[1]))
            .unwrap();
        m.write_u64(pa + offsets.links, 0x100);

        let space = VirtualSpace::new(&m.phys, root);
        let list = ProcessList::new(&space, &offsets, &symbols);

        assert!(matches!(
            list.lookup(9999),
            Err(EngineError::NotFound(_))
        ));
        let all = list.processes().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_processes_enumeration() {
        let mut m = Machine::new(0x800);
        let root = m.new_address_space();
        let offsets = ProcessOffsets::default();
        let (symbols, _) =
            m.build_process_list(root, &offsets, &[(4, 0x1AD000, 0), (1234, 0x2BE000, 0x1_4000_0000)]);

        let space = VirtualSpace::new(&m.phys, root);
        let list = ProcessList::new(&space, &offsets, &symbols);

        let all = list.processes().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pid, 4);
        assert_eq!(all[1].pid, 1234);
        assert_eq!(all[1].dir_base, 0x2BE000);
        assert_eq!(all[1].image_base, 0x1_4000_0000);
    }
}
