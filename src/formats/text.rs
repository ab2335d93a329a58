//! Text (table) output formatter for the memory access tool
use crate::error::EngineError;
use crate::formats::traits::OutputFormatter;
use crate::process::ProcessSummary;
use crate::symbols::pe::ExportRecord;
use crate::symbols::ModuleRecord;
use prettytable::{Cell, Row, Table};

/// Text formatter that outputs data in a human-readable table format
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format_processes(&self, processes: &[ProcessSummary]) -> Result<String, EngineError> {
        let mut table = Table::new();
        table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

        // Header
        table.add_row(Row::new(vec![
            Cell::new("PID").style_spec("c"),
            Cell::new("OBJECT").style_spec("c"),
            Cell::new("DIR_BASE").style_spec("c"),
            Cell::new("IMAGE_BASE").style_spec("c"),
        ]));

        // Data rows
        for proc in processes {
            table.add_row(Row::new(vec![
                Cell::new(&proc.pid.to_string()),
                Cell::new(&format!("0x{:x}", proc.object)),
                Cell::new(&format!("0x{:x}", proc.dir_base)),
                Cell::new(&format!("0x{:x}", proc.image_base)),
            ]));
        }

        Ok(table.to_string())
    }

    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, EngineError> {
        let mut table = Table::new();
        table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

        // Header
        table.add_row(Row::new(vec![
            Cell::new("NAME").style_spec("c"),
            Cell::new("BASE").style_spec("c"),
            Cell::new("SIZE").style_spec("c"),
        ]));

        // Data rows
        for module in modules {
            table.add_row(Row::new(vec![
                Cell::new(&module.name),
                Cell::new(&format!("0x{:x}", module.base)),
                Cell::new(&format!("0x{:x}", module.size)),
            ]));
        }

        Ok(table.to_string())
    }

    fn format_exports(&self, exports: &[ExportRecord]) -> Result<String, EngineError> {
        let mut table = Table::new();
        table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

        // Header
        table.add_row(Row::new(vec![
            Cell::new("NAME").style_spec("c"),
            Cell::new("ORDINAL").style_spec("c"),
            Cell::new("RVA").style_spec("c"),
            Cell::new("ADDRESS").style_spec("c"),
        ]));

        // Data rows
        for export in exports {
            table.add_row(Row::new(vec![
                Cell::new(&export.name),
                Cell::new(&export.ordinal.to_string()),
                Cell::new(&format!("0x{:x}", export.rva)),
                Cell::new(&format!("0x{:x}", export.address)),
            ]));
        }

        Ok(table.to_string())
    }
}
