//! System profile: page-table roots, list anchors, and structure offsets
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Byte offsets of the process-object fields the engine reads.
///
/// These move between Windows builds; the built-in tables cover common
/// builds and a profile file can override any of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessOffsets {
    /// DirectoryTableBase: physical address of the process page-table root.
    pub dir_base: u64,
    /// UniqueProcessId.
    pub unique_pid: u64,
    /// ActiveProcessLinks list entry.
    pub links: u64,
    /// SectionBaseAddress: the image base virtual address.
    pub image_base: u64,
}

impl Default for ProcessOffsets {
    fn default() -> Self {
        // The layout the original protocol was built against.
        ProcessOffsets {
            dir_base: 0x28,
            unique_pid: 0x440,
            links: 0x448,
            image_base: 0x2B0,
        }
    }
}

impl ProcessOffsets {
    /// Offsets for a specific Windows build number.
    pub fn for_build(build: u32) -> Self {
        match build {
            // Windows 10 1809
            17763 => ProcessOffsets {
                dir_base: 0x28,
                unique_pid: 0x2E0,
                links: 0x2E8,
                image_base: 0x3C0,
            },
            // Windows 10 1903 / 1909
            18362 | 18363 => ProcessOffsets {
                dir_base: 0x28,
                unique_pid: 0x2E8,
                links: 0x2F0,
                image_base: 0x3C8,
            },
            // Windows 10 2004 and later, Windows 11
            19041..=u32::MAX => ProcessOffsets {
                dir_base: 0x28,
                unique_pid: 0x440,
                links: 0x448,
                image_base: 0x520,
            },
            _ => ProcessOffsets::default(),
        }
    }
}

/// Everything the engine needs to know about the target system image.
///
/// `kernel_root` and `module_list_head` stand in for the two well-known
/// anchors the original resolves at load time: the system address space and
/// the loaded-module list head symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProfile {
    /// Physical address of the kernel (system process) PML4.
    pub kernel_root: u64,
    /// Virtual address of the loaded-module list head.
    pub module_list_head: u64,
    /// Windows build number, when known. Selects built-in offsets.
    #[serde(default)]
    pub build: Option<u32>,
    /// Explicit offsets; override whatever `build` would select.
    #[serde(default)]
    pub offsets: Option<ProcessOffsets>,
}

impl SystemProfile {
    /// Load a profile from a JSON file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let profile: SystemProfile = serde_json::from_str(&raw)?;

        if profile.kernel_root == 0 {
            return Err(EngineError::ProfileError(
                "kernel_root must be non-zero".to_string(),
            ));
        }
        if profile.module_list_head == 0 {
            return Err(EngineError::ProfileError(
                "module_list_head must be non-zero".to_string(),
            ));
        }

        log::info!(
            "Loaded profile: kernel_root=0x{:x}, module_list_head=0x{:x}, build={:?}",
            profile.kernel_root,
            profile.module_list_head,
            profile.build
        );
        Ok(profile)
    }

    /// Effective process-object offsets for this profile.
    pub fn process_offsets(&self) -> ProcessOffsets {
        if let Some(explicit) = &self.offsets {
            return explicit.clone();
        }
        match self.build {
            Some(build) => ProcessOffsets::for_build(build),
            None => ProcessOffsets::default(),
        }
    }
}
