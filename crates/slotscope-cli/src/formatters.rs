//! Output formatting and file helpers
//!
//! Tables for the terminal, the persisted layout artifact and the error
//! type for problems with arguments and files.

use crate::cli::ArtifactFormat;
use slotscope_core::{LayoutStore, SlotRecord};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Read a file, reporting a missing one by name
pub fn read_file(path: &Path) -> CliResult<String> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    fs::read_to_string(path).map_err(CliError::Io)
}

/// Serialize the layout document in the requested format
pub fn render_artifact(store: &LayoutStore, format: ArtifactFormat) -> CliResult<String> {
    let document = store.to_document();
    match format {
        ArtifactFormat::Json => serde_json::to_string_pretty(&document).map_err(Into::into),
        ArtifactFormat::Toml => {
            toml::to_string_pretty(&document).map_err(|e| CliError::Configuration(e.to_string()))
        }
    }
}

/// Write the layout artifact when the store holds more than one record
///
/// Returns the path written, if any.
pub fn write_artifact(
    store: &LayoutStore,
    format: ArtifactFormat,
    output: Option<&Path>,
) -> CliResult<Option<PathBuf>> {
    if store.len() <= 1 {
        return Ok(None);
    }
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format.default_file_name()));
    fs::write(&path, render_artifact(store, format)?)?;
    info!(path = %path.display(), records = store.len(), "Wrote storage layout");
    Ok(Some(path))
}

/// Fixed-width table with a header rule
struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(headers: Vec<&'static str>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let line = |cells: Vec<&str>| {
            let padded: Vec<String> =
                cells.iter().zip(&widths).map(|(c, w)| format!("{:<width$}", c, width = w)).collect();
            format!("| {} |", padded.join(" | "))
        };
        let rule = format!("+{}+", widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("+"));

        let mut out = vec![rule.clone(), line(self.headers.clone()), rule.clone()];
        for row in &self.rows {
            out.push(line(row.iter().map(String::as_str).collect()));
        }
        out.push(rule);
        out.join("\n")
    }
}

fn layout_row(record: &SlotRecord) -> Vec<String> {
    vec![
        record.path.to_string(),
        record.ty.type_string(),
        record.slot.to_string(),
        record.offset.to_string(),
        record.size.to_string(),
        record.declared_in.clone(),
    ]
}

/// One table per contract: name, type, slot, offset, size, declaring contract
pub fn layout_table(store: &LayoutStore) -> String {
    let mut sections = Vec::new();
    for contract in store.contracts() {
        let mut table = Table::new(vec!["Name", "Type", "Slot", "Offset", "Size", "Declared in"]);
        for record in store.for_contract(contract) {
            table.push(layout_row(record));
        }
        sections.push(format!("{}\n{}", contract, table.render()));
    }
    sections.join("\n\n")
}

/// Layout table with the decoded value and status of each record
pub fn value_table(store: &LayoutStore) -> String {
    let mut sections = Vec::new();
    for contract in store.contracts() {
        let mut table =
            Table::new(vec!["Name", "Type", "Slot", "Offset", "Size", "Declared in", "Value", "Status"]);
        for record in store.for_contract(contract) {
            let mut row = layout_row(record);
            row.push(record.value.as_ref().map(|v| v.to_string()).unwrap_or_default());
            row.push(record.status.to_string());
            table.push(row);
        }
        sections.push(format!("{}\n{}", contract, table.render()));
    }
    sections.join("\n\n")
}

/// Single-line summary of a record
pub fn record_line(record: &SlotRecord) -> String {
    let mut line = format!(
        "{} ({}) slot: {} (0x{:x}) offset: {} size: {}",
        record.key(),
        record.ty.type_string(),
        record.slot,
        record.slot,
        record.offset,
        record.size
    );
    if let Some(value) = &record.value {
        line.push_str(&format!(" value: {}", value));
    }
    if !record.status.is_resolved() {
        line.push_str(&format!(" [{}]", record.status));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotscope_core::{DecodedValue, RecordStatus, TypeDescriptor, VariablePath, U256};

    fn store() -> LayoutStore {
        let mut store = LayoutStore::new();
        store
            .insert(SlotRecord::new("Token", "Token", VariablePath::new("owner"), U256::ZERO, 0, 20, TypeDescriptor::address()))
            .unwrap();
        store
            .insert(SlotRecord::new(
                "Token",
                "Token",
                VariablePath::new("totalSupply"),
                U256::from(1),
                0,
                32,
                TypeDescriptor::uint(256),
            ))
            .unwrap();
        store
    }

    #[test]
    fn test_layout_table_lists_records() {
        let table = layout_table(&store());
        assert!(table.starts_with("Token\n+"));
        assert!(table.contains("| totalSupply | uint256 | 1    |"));
        assert!(table.contains("| Name "));
    }

    #[test]
    fn test_value_table_shows_status() {
        let mut store = store();
        let key = slotscope_core::RecordKey::new("Token", "totalSupply");
        store.attach_value(&key, vec![0; 32], Some(DecodedValue::Uint(U256::from(5)))).unwrap();
        store.mark_failed(&slotscope_core::RecordKey::new("Token", "owner"), "timeout").unwrap();
        let table = value_table(&store);
        assert!(table.contains("| 5 "));
        assert!(table.contains("read-failed: timeout"));
    }

    #[test]
    fn test_artifact_requires_more_than_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");

        let mut single = LayoutStore::new();
        single
            .insert(SlotRecord::new("T", "T", VariablePath::new("x"), U256::ZERO, 0, 32, TypeDescriptor::uint(256)))
            .unwrap();
        assert_eq!(write_artifact(&single, ArtifactFormat::Json, Some(&path)).unwrap(), None);
        assert!(!path.exists());

        let written = write_artifact(&store(), ArtifactFormat::Json, Some(&path)).unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["contracts"]["Token"]["totalSupply"]["slot"], "1");
        assert_eq!(doc["contracts"]["Token"]["owner"]["type_string"], "address");
    }

    #[test]
    fn test_toml_artifact() {
        let rendered = render_artifact(&store(), ArtifactFormat::Toml).unwrap();
        assert!(rendered.contains("layout_commitment"));
        assert!(rendered.contains("type_string = \"uint256\""));
    }

    #[test]
    fn test_record_line() {
        let record = SlotRecord::new("T", "T", VariablePath::new("x"), U256::from(16), 0, 32, TypeDescriptor::uint(256))
            .with_status(RecordStatus::Partial("max depth".into()));
        assert_eq!(record_line(&record), "T.x (uint256) slot: 16 (0x10) offset: 0 size: 32 [partial: max depth]");
    }
}
