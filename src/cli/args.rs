//! Command-line argument parsing for the memory access tool
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "winmemaccess")]
#[command(about = "Windows Physical Memory Access Engine", long_about = None)]
pub struct Cli {
    /// Path to a raw physical memory image
    #[arg(value_name = "MEMORY_IMAGE")]
    pub memory_image: std::path::PathBuf,

    /// Command to run
    #[command(subcommand)]
    pub command: Option<EngineCommand>,

    /// Path to a system profile (JSON: kernel_root, module_list_head, build)
    #[arg(short, long, value_name = "FILE")]
    pub profile: Option<std::path::PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormatArg,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<std::path::PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Enable verbose output (warnings, status messages)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum EngineCommand {
    /// Scan the raw image for page-aligned module headers
    Scan,

    /// List loaded kernel modules (requires a profile)
    Modules {
        /// Filter by module name (regex)
        #[arg(long)]
        name: Option<String>,
    },

    /// List the named exports of a loaded module
    Exports {
        /// Module base name, e.g. ntoskrnl.exe
        #[arg(value_name = "MODULE")]
        module: String,
    },

    /// List active processes
    Pslist {
        /// Filter by PID
        #[arg(long)]
        pid: Option<u64>,
    },

    /// Translate a virtual address in a process address space
    Translate {
        /// Target process PID
        #[arg(long)]
        pid: u64,

        /// Virtual address (hex accepted with 0x prefix)
        #[arg(long, value_parser = parse_address)]
        va: u64,
    },

    /// Read target-process virtual memory
    Read {
        /// Target process PID
        #[arg(long)]
        pid: u64,

        /// Virtual address (hex accepted with 0x prefix)
        #[arg(long, value_parser = parse_address)]
        va: u64,

        /// Number of bytes to read
        #[arg(long, default_value = "256")]
        len: u64,

        /// Write raw bytes to a file instead of hexdumping
        #[arg(long, value_name = "FILE")]
        out: Option<std::path::PathBuf>,
    },

    /// Report a process's image base address
    Getbase {
        /// Target process PID
        #[arg(long)]
        pid: u64,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormatArg {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Parse a decimal or 0x-prefixed hexadecimal address.
pub fn parse_address(raw: &str) -> Result<u64, String> {
    let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        raw.parse::<u64>()
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", raw, e))
}
