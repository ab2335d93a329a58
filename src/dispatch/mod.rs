//! Request dispatcher: routes fixed-layout control requests to operations
use crate::core::profile::{ProcessOffsets, SystemProfile};
use crate::error::EngineError;
use crate::kernel::{KeyStateSource, VirtualSpace};
use crate::memory::{PhysicalMemory, PAGE_SIZE};
use crate::process::{self, BoundProcess, ProcessBinding, ProcessList};
use crate::protocol::{
    Request, ATTACH_CODE, GETBASE_CODE, KEYSTATE_CODE, READ_CODE, WRITE_CODE,
};
use crate::symbols::SymbolTable;
use crate::translation::{AddressTranslator, VirtualAddress};

/// Dispatches control requests against one physical memory source.
///
/// Holds no per-operation state beyond the binding slot; every read and
/// write re-derives the target's page-table root so target-side changes are
/// observed immediately.
pub struct Dispatcher<'a> {
    phys: &'a mut dyn PhysicalMemory,
    offsets: ProcessOffsets,
    kernel_root: u64,
    symbols: &'a SymbolTable,
    binding: ProcessBinding,
    keys: Option<&'a dyn KeyStateSource>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        phys: &'a mut dyn PhysicalMemory,
        profile: &SystemProfile,
        symbols: &'a SymbolTable,
    ) -> Self {
        Dispatcher {
            phys,
            offsets: profile.process_offsets(),
            kernel_root: profile.kernel_root,
            symbols,
            binding: ProcessBinding::new(),
            keys: None,
        }
    }

    /// Attach a host-side key-state query source.
    pub fn with_key_state(mut self, keys: &'a dyn KeyStateSource) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Handle-open lifecycle entry point. Acknowledged; no state change.
    pub fn create(&self) {
        log::debug!("Control interface opened");
    }

    /// Handle-close lifecycle entry point. The binding deliberately
    /// persists across close and reopen.
    pub fn close(&self) {
        log::debug!("Control interface closed");
    }

    pub fn bound_process(&self) -> Option<BoundProcess> {
        self.binding.current()
    }

    /// Route one request by operation code. `payload` is the caller's data
    /// buffer: destination for READ, source for WRITE, unused otherwise.
    pub fn control(
        &mut self,
        code: u32,
        request: &mut Request,
        payload: &mut [u8],
    ) -> Result<(), EngineError> {
        match code {
            ATTACH_CODE => self.attach(request),
            READ_CODE => self.read(request, payload),
            WRITE_CODE => self.write(request, payload),
            GETBASE_CODE => self.get_base(request),
            KEYSTATE_CODE => self.key_state(request),
            other => {
                log::warn!("Unrecognized operation code 0x{:x}", other);
                Err(EngineError::InvalidDeviceRequest(other))
            }
        }
    }

    /// ATTACH: look the process up and make it the bound target.
    pub fn attach(&mut self, request: &mut Request) -> Result<(), EngineError> {
        let space = VirtualSpace::new(&*self.phys, self.kernel_root);
        let list = ProcessList::new(&space, &self.offsets, self.symbols);

        match list.lookup(request.process_id) {
            Ok(object) => {
                self.binding.bind(BoundProcess {
                    pid: request.process_id,
                    object,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("Attach to process {} failed: {}", request.process_id, e);
                self.binding.clear();
                Err(e)
            }
        }
    }

    /// The bound process's page-table root, derived fresh for this call.
    fn target_root(&self, bound: &BoundProcess) -> Result<u64, EngineError> {
        let space = VirtualSpace::new(&*self.phys, self.kernel_root);
        process::page_table_root(&space, &self.offsets, bound.object)
    }

    /// READ: translate and copy, chunked at physical page boundaries.
    ///
    /// A translation miss ends the transfer with whatever was copied so far
    /// (partial completion, reported as success); a physical read failure
    /// surfaces as the error, still with the partial count recorded.
    pub fn read(&mut self, request: &mut Request, dst: &mut [u8]) -> Result<(), EngineError> {
        request.bytes_read = 0;
        let bound = self.require_bound()?;
        let root = self.target_root(&bound)?;

        let wanted = request.bytes_to_read as usize;
        if dst.len() < wanted {
            log::error!("Payload buffer smaller than requested byte count");
            return Err(EngineError::InvalidParameter);
        }

        let translator = AddressTranslator::new(&*self.phys);
        let mut current_va = request.target_address;
        let mut total = 0usize;

        while total < wanted {
            let physical = match translator.translate(root, VirtualAddress(current_va)) {
                Some(pa) => pa,
                None => {
                    log::warn!(
                        "Translation failed at VA 0x{:x} after {} bytes",
                        current_va,
                        total
                    );
                    break;
                }
            };

            let offset_in_page = (physical & 0xFFF) as usize;
            let chunk = (PAGE_SIZE - offset_in_page).min(wanted - total);

            let copied = match self.phys.read_physical(physical, &mut dst[total..total + chunk]) {
                Ok(0) => {
                    log::warn!("Zero-byte physical read at 0x{:x}", physical);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    log::error!("Physical read failed at 0x{:x}: {}", physical, e);
                    request.bytes_read = total as u64;
                    return Err(e);
                }
            };

            current_va += copied as u64;
            total += copied;
        }

        request.bytes_read = total as u64;
        Ok(())
    }

    /// WRITE: one translation, one physical write clamped to the page
    /// boundary. Bytes past the boundary are dropped; `bytes_read` tells the
    /// caller how much actually landed. Unlike READ this does not loop over
    /// pages, which the protocol's callers rely on when probing writability.
    pub fn write(&mut self, request: &mut Request, src: &[u8]) -> Result<(), EngineError> {
        request.bytes_read = 0;
        let bound = self.require_bound()?;
        let root = self.target_root(&bound)?;

        let translator = AddressTranslator::new(&*self.phys);
        let physical = translator
            .translate(root, VirtualAddress(request.target_address))
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "virtual address 0x{:x} not present",
                    request.target_address
                ))
            })?;

        let offset_in_page = (physical & 0xFFF) as usize;
        let clamped = (PAGE_SIZE - offset_in_page)
            .min(request.bytes_to_read as usize)
            .min(src.len());
        if clamped as u64 != request.bytes_to_read {
            log::warn!(
                "Write at VA 0x{:x} crosses a page boundary; limiting to {} bytes",
                request.target_address,
                clamped
            );
        }

        let written = self.phys.write_physical(physical, &src[..clamped])?;
        request.bytes_read = written as u64;
        Ok(())
    }

    /// GETBASE: report the bound process's image base via `target_address`.
    pub fn get_base(&mut self, request: &mut Request) -> Result<(), EngineError> {
        let bound = self.require_bound()?;
        let space = VirtualSpace::new(&*self.phys, self.kernel_root);
        let base = process::image_base(&space, &self.offsets, bound.object)?;
        request.target_address = base;
        Ok(())
    }

    /// KEYSTATE: query the key-state source for one virtual-key code.
    ///
    /// Codes past the 0x100 key-state array are rejected before any state is
    /// queried. Bit 15 of the raw value resolves to the boolean result.
    pub fn key_state(&mut self, request: &mut Request) -> Result<(), EngineError> {
        request.is_down = false;
        if request.key >= 0x100 {
            log::warn!("Key code 0x{:x} out of range", request.key);
            return Err(EngineError::InvalidParameter);
        }
        if self.binding.current().is_none() {
            log::warn!("Key-state query with no target process attached");
            return Err(EngineError::NotFound("no target process".to_string()));
        }

        let source = self
            .keys
            .ok_or_else(|| EngineError::NotFound("key-state source".to_string()))?;
        let raw = source.raw_key_state(request.key)?;
        request.is_down = raw & 0x8000 != 0;
        log::debug!(
            "Key state 0x{:x} -> 0x{:04x} (down = {})",
            request.key,
            raw,
            request.is_down
        );
        Ok(())
    }

    fn require_bound(&self) -> Result<BoundProcess, EngineError> {
        self.binding.current().ok_or_else(|| {
            log::error!("No target process attached");
            EngineError::InvalidParameter
        })
    }
}
