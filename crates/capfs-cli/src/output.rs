//! Terminal output helpers.

use capfs_core::HandleKind;
use capfs_transfer::{ProgressReporter, ProgressStep};
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL_CONDENSED;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table
}

pub fn format_entry_type(kind: HandleKind) -> &'static str {
    match kind {
        HandleKind::File => "file",
        HandleKind::Directory => "dir",
    }
}

/// Writes transfer progress to stderr, one line per report.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl ProgressReporter for StderrReporter {
    fn report(&self, step: ProgressStep) {
        eprintln!("{step}");
    }
}
