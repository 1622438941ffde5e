//! Bulk loading of metadata documents into the catalogue.

use crate::catalog::{AddOptions, Handler, MetaHandler};
use crate::error::ApiError;
use crate::model::Metadata;
use crate::types::Document;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of a directory ingest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub files: usize,
    pub records: usize,
    pub failed: Vec<(PathBuf, String)>,
}

impl IngestReport {
    pub fn ingested(&self) -> usize {
        self.files + self.records
    }
}

/// Every `*.json` file under `root`, in walk order
pub fn scan_metadata_files(root: &Path) -> Result<Vec<PathBuf>, ApiError> {
    if !root.exists() {
        return Err(ApiError::FileNotFound(root.to_path_buf()));
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ApiError::IoFailure(e.into()))?;
        let is_json = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_json {
            found.push(entry.into_path());
        }
    }
    debug!(root = %root.display(), count = found.len(), "Scanned metadata files");
    Ok(found)
}

fn has_path(document: &Document) -> bool {
    matches!(document.get("path"), Some(Value::String(p)) if !p.is_empty())
}

/// Add one document as a file, or as a record when it carries no path
fn add_document(
    handler: &mut MetaHandler,
    document: Document,
    report: &mut IngestReport,
) -> Result<String, ApiError> {
    if has_path(&document) {
        let uuid = handler.add_file(document, AddOptions::merge())?;
        report.files += 1;
        Ok(uuid)
    } else {
        let uuid = handler.add_record(document, AddOptions::merge())?;
        report.records += 1;
        Ok(uuid)
    }
}

/// Load every metadata file under `root` and save once at the end
///
/// Files that fail to parse or validate are logged and reported; they do not
/// stop the ingest.
pub fn ingest_directory(handler: &mut MetaHandler, root: &Path) -> Result<IngestReport, ApiError> {
    let mut report = IngestReport::default();
    for path in scan_metadata_files(root)? {
        let result = Metadata::load(&path)
            .and_then(|metadata| add_document(handler, metadata.into_document(), &mut report));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Skipping metadata file");
            report.failed.push((path, e.to_string()));
        }
    }
    handler.save()?;
    info!(
        root = %root.display(),
        files = report.files,
        records = report.records,
        failed = report.failed.len(),
        "Ingest complete"
    );
    Ok(report)
}

/// Ingest a JSON object or a list of objects read from `reader`
///
/// Nothing is saved; the caller decides when to flush.
pub fn ingest_reader(handler: &mut MetaHandler, mut reader: impl Read) -> Result<Vec<String>, ApiError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    if text.trim().is_empty() {
        return Err(ApiError::EmptyStream("no metadata in input".to_string()));
    }
    let documents = match serde_json::from_str::<Value>(&text)? {
        Value::Object(document) => vec![document],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(document) => Ok(document),
                other => Err(ApiError::InvalidArgument(format!(
                    "expected a JSON object, got {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(ApiError::InvalidArgument(format!(
                "expected a JSON object or list, got {}",
                other
            )))
        }
    };
    let mut report = IngestReport::default();
    documents
        .into_iter()
        .map(|document| add_document(handler, Metadata::from_document(document).into_document(), &mut report))
        .collect()
}
