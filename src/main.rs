//! Main entry point for the memory access tool
use clap::Parser;

use winmemaccess::cli::args::{Cli, EngineCommand, OutputFormatArg};
use winmemaccess::core::profile::SystemProfile;
use winmemaccess::dispatch::Dispatcher;
use winmemaccess::error::EngineError;
use winmemaccess::formats::traits::{OutputDestination, OutputFormat, OutputWriter};
use winmemaccess::kernel::VirtualSpace;
use winmemaccess::memory::MappedImage;
use winmemaccess::process::ProcessList;
use winmemaccess::protocol::Request;
use winmemaccess::symbols::{pe, scan_image_bases, SymbolResolver, SymbolTable};
use winmemaccess::translation::{AddressTranslator, VirtualAddress};

use indicatif::{ProgressBar, ProgressStyle};

fn main() -> Result<(), EngineError> {
    // Parse command-line arguments
    let cli = Cli::parse();

    let filter = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    println!("Opening memory image: {}", cli.memory_image.display());
    let mut image = MappedImage::open(&cli.memory_image)?;
    println!("Mapped {} bytes of physical memory", image.len());

    // Determine output format and destination
    let output_format = match cli.format {
        OutputFormatArg::Text => OutputFormat::Text,
        OutputFormatArg::Csv => OutputFormat::Csv,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Jsonl => OutputFormat::Jsonl,
    };
    let output_dest = if let Some(output_path) = &cli.output {
        OutputDestination::File(output_path.clone())
    } else {
        OutputDestination::Stdout
    };
    let output_writer = OutputWriter::new(output_format, output_dest);

    match &cli.command {
        Some(EngineCommand::Scan) | None => run_scan(&image),
        Some(command) => {
            let profile = load_profile(&cli)?;
            run_command(command, &mut image, &profile, &output_writer)
        }
    }
}

/// Every command except scan needs the system anchors from a profile.
fn load_profile(cli: &Cli) -> Result<SystemProfile, EngineError> {
    let path = cli.profile.as_ref().ok_or_else(|| {
        EngineError::ProfileError(
            "this command needs a system profile; pass one with --profile".to_string(),
        )
    })?;
    SystemProfile::load(path)
}

/// Heuristic image-base scan over the raw physical image.
fn run_scan(image: &MappedImage) -> Result<(), EngineError> {
    let bytes = image.bytes();
    let bar = ProgressBar::new(bytes.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let hits = scan_image_bases(bytes, |pos| bar.set_position(pos));
    bar.finish_and_clear();

    if hits.is_empty() {
        println!("No page-aligned module headers found.");
        return Ok(());
    }
    println!("Found {} candidate module header(s):", hits.len());
    for hit in &hits {
        println!(
            "  Physical 0x{:x}, SizeOfImage 0x{:x}",
            hit.physical, hit.size_of_image
        );
    }
    Ok(())
}

fn run_command(
    command: &EngineCommand,
    image: &mut MappedImage,
    profile: &SystemProfile,
    output_writer: &OutputWriter,
) -> Result<(), EngineError> {
    match command {
        EngineCommand::Scan => run_scan(image),

        EngineCommand::Modules { name } => {
            let space = VirtualSpace::new(&*image, profile.kernel_root);
            let resolver = SymbolResolver::new(&space, profile.module_list_head);
            let mut modules = resolver.modules()?;

            if let Some(pattern) = name {
                let re = regex::Regex::new(pattern)?;
                modules.retain(|m| re.is_match(&m.name));
            }
            if modules.is_empty() {
                println!("No modules found matching the specified criteria.");
            } else {
                output_writer.write_modules(&modules)?;
            }
            Ok(())
        }

        EngineCommand::Exports { module } => {
            let space = VirtualSpace::new(&*image, profile.kernel_root);
            let resolver = SymbolResolver::new(&space, profile.module_list_head);
            let record = resolver.find_module(module)?;
            let exports = pe::list_exports(&space, record.base)?;

            if exports.is_empty() {
                println!("Module {} has no named exports.", record.name);
            } else {
                output_writer.write_exports(&exports)?;
            }
            Ok(())
        }

        EngineCommand::Pslist { pid } => {
            let offsets = profile.process_offsets();
            let space = VirtualSpace::new(&*image, profile.kernel_root);
            let symbols = resolve_symbols(&space, profile);
            let list = ProcessList::new(&space, &offsets, &symbols);

            let mut processes = list.processes()?;
            if let Some(wanted) = pid {
                processes.retain(|p| p.pid == *wanted);
            }
            if processes.is_empty() {
                println!("No processes found matching the specified criteria.");
            } else {
                output_writer.write_processes(&processes)?;
            }
            Ok(())
        }

        EngineCommand::Translate { pid, va } => {
            let offsets = profile.process_offsets();
            let space = VirtualSpace::new(&*image, profile.kernel_root);
            let symbols = resolve_symbols(&space, profile);
            let list = ProcessList::new(&space, &offsets, &symbols);

            let object = list.lookup(*pid)?;
            let root = winmemaccess::process::page_table_root(&space, &offsets, object)?;
            println!("Process {} page-table root: 0x{:x}", pid, root);

            let translator = AddressTranslator::new(&*image);
            match translator.translate(root, VirtualAddress(*va)) {
                Some(physical) => println!("VA 0x{:x} -> PA 0x{:x}", va, physical),
                None => println!("VA 0x{:x} is not mapped", va),
            }
            Ok(())
        }

        EngineCommand::Read { pid, va, len, out } => {
            let symbols = {
                let space = VirtualSpace::new(&*image, profile.kernel_root);
                resolve_symbols(&space, profile)
            };
            let mut dispatcher = Dispatcher::new(image, profile, &symbols);

            let mut request = Request {
                process_id: *pid,
                ..Default::default()
            };
            dispatcher.attach(&mut request)?;

            request.target_address = *va;
            request.bytes_to_read = *len;
            let mut payload = vec![0u8; *len as usize];
            dispatcher.read(&mut request, &mut payload)?;
            payload.truncate(request.bytes_read as usize);

            if request.bytes_read < *len {
                println!(
                    "Short read: {} of {} bytes (unmapped page reached)",
                    request.bytes_read, len
                );
            }
            match out {
                Some(path) => {
                    std::fs::write(path, &payload)?;
                    println!("Wrote {} bytes to {}", payload.len(), path.display());
                }
                None => hexdump(*va, &payload),
            }
            Ok(())
        }

        EngineCommand::Getbase { pid } => {
            let symbols = {
                let space = VirtualSpace::new(&*image, profile.kernel_root);
                resolve_symbols(&space, profile)
            };
            let mut dispatcher = Dispatcher::new(image, profile, &symbols);

            let mut request = Request {
                process_id: *pid,
                ..Default::default()
            };
            dispatcher.attach(&mut request)?;
            dispatcher.get_base(&mut request)?;
            println!("Process {} image base: 0x{:x}", pid, request.target_address);
            Ok(())
        }
    }
}

/// Resolve the required kernel routines, or fall back to an empty table when
/// the module list is unusable. Operations that need a routine will report
/// it as not found.
fn resolve_symbols(space: &VirtualSpace, profile: &SystemProfile) -> SymbolTable {
    let resolver = SymbolResolver::new(space, profile.module_list_head);
    resolver.resolve_all()
}

fn hexdump(base: u64, data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        let mut hex = String::with_capacity(48);
        let mut ascii = String::with_capacity(16);
        for byte in row {
            hex.push_str(&format!("{:02x} ", byte));
            ascii.push(if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            });
        }
        println!("0x{:016x}  {:<48} {}", base + (i * 16) as u64, hex, ascii);
    }
}
