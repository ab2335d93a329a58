//! JSONL (JSON Lines) output formatter for the memory access tool
use crate::error::EngineError;
use crate::formats::traits::OutputFormatter;
use crate::process::ProcessSummary;
use crate::symbols::pe::ExportRecord;
use crate::symbols::ModuleRecord;
use serde_json;

/// JSONL formatter that outputs data as JSON objects, one per line
pub struct JsonlFormatter;

impl OutputFormatter for JsonlFormatter {
    fn format_processes(&self, processes: &[ProcessSummary]) -> Result<String, EngineError> {
        let mut output = String::new();

        for proc in processes {
            let line = serde_json::to_string(proc)?;
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }

    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, EngineError> {
        let mut output = String::new();

        for module in modules {
            let line = serde_json::to_string(module)?;
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }

    fn format_exports(&self, exports: &[ExportRecord]) -> Result<String, EngineError> {
        let mut output = String::new();

        for export in exports {
            let line = serde_json::to_string(export)?;
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }
}
