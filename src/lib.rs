//! Library crate for the Windows physical memory access engine

// Allow clippy lints that would require significant refactoring
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::redundant_closure)]
#![allow(clippy::useless_format)]
#![allow(clippy::unnecessary_cast)]

pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod protocol;
pub mod symbols;
pub mod translation;

// Core modules
pub mod core {
    pub mod profile;
}

// CLI modules
pub mod cli {
    pub mod args;
}

// Format modules
pub mod formats {
    pub mod csv;
    pub mod json;
    pub mod jsonl;
    pub mod text;
    pub mod traits;
}

#[cfg(test)]
pub(crate) mod testutil;
