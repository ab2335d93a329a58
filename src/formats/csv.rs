//! CSV output formatter for the memory access tool
use crate::error::EngineError;
use crate::formats::traits::OutputFormatter;
use crate::process::ProcessSummary;
use crate::symbols::pe::ExportRecord;
use crate::symbols::ModuleRecord;
use csv::Writer;

/// CSV formatter that outputs data in comma-separated values format
pub struct CsvFormatter;

impl OutputFormatter for CsvFormatter {
    fn format_processes(&self, processes: &[ProcessSummary]) -> Result<String, EngineError> {
        let mut wtr = Writer::from_writer(vec![]);

        // Write header
        wtr.write_record(["pid", "object", "dir_base", "image_base"])?;

        // Write data rows
        for proc in processes {
            wtr.write_record(&[
                proc.pid.to_string(),
                format!("0x{:x}", proc.object),
                format!("0x{:x}", proc.dir_base),
                format!("0x{:x}", proc.image_base),
            ])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }

    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, EngineError> {
        let mut wtr = Writer::from_writer(vec![]);

        // Write header
        wtr.write_record(["name", "base", "size"])?;

        // Write data rows
        for module in modules {
            wtr.write_record(&[
                module.name.clone(),
                format!("0x{:x}", module.base),
                format!("0x{:x}", module.size),
            ])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }

    fn format_exports(&self, exports: &[ExportRecord]) -> Result<String, EngineError> {
        let mut wtr = Writer::from_writer(vec![]);

        // Write header
        wtr.write_record(["name", "ordinal", "rva", "address"])?;

        // Write data rows
        for export in exports {
            wtr.write_record(&[
                export.name.clone(),
                export.ordinal.to_string(),
                format!("0x{:x}", export.rva),
                format!("0x{:x}", export.address),
            ])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }
}
