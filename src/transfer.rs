use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Note;

pub const EXPORT_VERSION: &str = "1.0";

/// Export/import file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub notes: Vec<Note>,
    pub export_date: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Ids already present in the collection; those notes were not imported.
    pub skipped: Vec<String>,
}

pub fn export_bundle(notes: &[Note]) -> ExportBundle {
    ExportBundle {
        notes: notes.to_vec(),
        export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        version: EXPORT_VERSION.to_string(),
    }
}

pub fn export_json(notes: &[Note]) -> Result<String> {
    serde_json::to_string_pretty(&export_bundle(notes))
        .map_err(|e| Error::InvalidDocument(e.to_string()))
}

/// Parse and validate an import payload without touching any collection.
pub fn parse_bundle(json: &str) -> Result<ExportBundle> {
    let mut bundle: ExportBundle =
        serde_json::from_str(json).map_err(|e| Error::ImportValidation(e.to_string()))?;

    if bundle.version != EXPORT_VERSION {
        return Err(Error::ImportValidation(format!(
            "unsupported version {:?}",
            bundle.version
        )));
    }
    chrono::DateTime::parse_from_rfc3339(&bundle.export_date)
        .map_err(|e| Error::ImportValidation(format!("exportDate: {e}")))?;

    let mut seen = HashSet::new();
    for note in &mut bundle.notes {
        if note.id.trim().is_empty() {
            return Err(Error::ImportValidation("note without id".to_string()));
        }
        if !seen.insert(note.id.clone()) {
            return Err(Error::ImportValidation(format!("duplicate id {}", note.id)));
        }
        if !note.is_consistent() {
            return Err(Error::ImportValidation(format!(
                "note {} has inconsistent encryption state",
                note.id
            )));
        }
        note.refresh_plain_text()
            .map_err(|e| Error::ImportValidation(format!("note {}: {e}", note.id)))?;
    }
    Ok(bundle)
}

/// Merge `bundle` into `existing` by id. Colliding ids are skipped, never
/// overwritten. When anything was added the collection is re-sorted by
/// `updated_at`, newest first.
pub fn merge_into(existing: &mut Vec<Note>, bundle: ExportBundle) -> ImportReport {
    let known: HashSet<String> = existing.iter().map(|n| n.id.clone()).collect();
    let mut report = ImportReport::default();
    for note in bundle.notes {
        if known.contains(&note.id) {
            report.skipped.push(note.id);
        } else {
            existing.push(note);
            report.imported += 1;
        }
    }
    if report.imported > 0 {
        existing.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
    report
}

/// Validate then merge. A malformed payload leaves `existing` untouched.
pub fn import_json(existing: &mut Vec<Note>, json: &str) -> Result<ImportReport> {
    let bundle = parse_bundle(json)?;
    Ok(merge_into(existing, bundle))
}
