//! Output format traits for the memory access tool
use crate::error::EngineError;
use crate::process::ProcessSummary;
use crate::symbols::pe::ExportRecord;
use crate::symbols::ModuleRecord;

/// Trait for output formatters
pub trait OutputFormatter: Send + Sync {
    fn format_processes(&self, processes: &[ProcessSummary]) -> Result<String, EngineError>;
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, EngineError>;
    fn format_exports(&self, exports: &[ExportRecord]) -> Result<String, EngineError>;
}

/// Enum for output format types
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Enum for output destination
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Stdout,
    File(std::path::PathBuf),
}

/// Output writer that combines format and destination
pub struct OutputWriter {
    formatter: Box<dyn OutputFormatter>,
    destination: OutputDestination,
}

impl OutputWriter {
    /// Create a new output writer
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        let formatter: Box<dyn OutputFormatter> = match format {
            OutputFormat::Text => Box::new(crate::formats::text::TextFormatter),
            OutputFormat::Csv => Box::new(crate::formats::csv::CsvFormatter),
            OutputFormat::Json => Box::new(crate::formats::json::JsonFormatter),
            OutputFormat::Jsonl => Box::new(crate::formats::jsonl::JsonlFormatter),
        };

        Self {
            formatter,
            destination,
        }
    }

    fn emit(&self, content: String) -> Result<(), EngineError> {
        match &self.destination {
            OutputDestination::Stdout => {
                println!("{}", content);
            }
            OutputDestination::File(path) => {
                std::fs::write(path, content)?;
            }
        }
        Ok(())
    }

    /// Write processes to the configured destination
    pub fn write_processes(&self, processes: &[ProcessSummary]) -> Result<(), EngineError> {
        self.emit(self.formatter.format_processes(processes)?)
    }

    /// Write modules to the configured destination
    pub fn write_modules(&self, modules: &[ModuleRecord]) -> Result<(), EngineError> {
        self.emit(self.formatter.format_modules(modules)?)
    }

    /// Write exports to the configured destination
    pub fn write_exports(&self, exports: &[ExportRecord]) -> Result<(), EngineError> {
        self.emit(self.formatter.format_exports(exports)?)
    }
}
