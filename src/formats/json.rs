//! JSON output formatter for the memory access tool
use crate::error::EngineError;
use crate::formats::traits::OutputFormatter;
use crate::process::ProcessSummary;
use crate::symbols::pe::ExportRecord;
use crate::symbols::ModuleRecord;
use serde_json;

#[derive(serde::Serialize)]
struct OutputWrapper<T> {
    command: String,
    timestamp: String,
    count: usize,
    results: Vec<T>,
}

/// JSON formatter that outputs data in JSON format with metadata
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_processes(&self, processes: &[ProcessSummary]) -> Result<String, EngineError> {
        let wrapper = OutputWrapper {
            command: "pslist".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            count: processes.len(),
            results: processes.to_vec(),
        };

        let json = serde_json::to_string_pretty(&wrapper)?;
        Ok(json)
    }

    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, EngineError> {
        let wrapper = OutputWrapper {
            command: "modules".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            count: modules.len(),
            results: modules.to_vec(),
        };

        let json = serde_json::to_string_pretty(&wrapper)?;
        Ok(json)
    }

    fn format_exports(&self, exports: &[ExportRecord]) -> Result<String, EngineError> {
        let wrapper = OutputWrapper {
            command: "exports".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            count: exports.len(),
            results: exports.to_vec(),
        };

        let json = serde_json::to_string_pretty(&wrapper)?;
        Ok(json)
    }
}
