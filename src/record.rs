//! Per-item records and the aggregate manifest.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::category::{CategoryRecord, GarmentLabel, LabelScores};
use crate::depiction::{DepictionRecord, SourceType};
use crate::ingest::ImageEntry;

/// Manifest columns, in output order.
pub const MANIFEST_COLUMNS: [&str; 8] = [
    "id",
    "status",
    "ext",
    "raw_path",
    "label",
    "label_confidence",
    "source_type",
    "source_confidence",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    SkippedUnsupportedExt,
    SkippedUnreadable,
    /// Only produced when inference-error isolation is enabled.
    SkippedInferenceError,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Ok => "ok",
            ItemStatus::SkippedUnsupportedExt => "skipped_unsupported_ext",
            ItemStatus::SkippedUnreadable => "skipped_unreadable",
            ItemStatus::SkippedInferenceError => "skipped_inference_error",
        }
    }
}

/// Everything known about one input file. Labels are set iff status is `Ok`.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub status: ItemStatus,
    pub ext: String,
    pub raw_path: Option<PathBuf>,
    pub depiction: Option<DepictionRecord>,
    pub category: Option<CategoryRecord>,
}

impl ItemRecord {
    pub fn unsupported(entry: &ImageEntry) -> Self {
        Self::skipped(entry, ItemStatus::SkippedUnsupportedExt, None)
    }

    pub fn unreadable(entry: &ImageEntry, raw_path: PathBuf) -> Self {
        Self::skipped(entry, ItemStatus::SkippedUnreadable, Some(raw_path))
    }

    pub fn inference_error(entry: &ImageEntry, raw_path: PathBuf) -> Self {
        Self::skipped(entry, ItemStatus::SkippedInferenceError, Some(raw_path))
    }

    pub fn labeled(
        entry: &ImageEntry,
        raw_path: PathBuf,
        depiction: DepictionRecord,
        category: CategoryRecord,
    ) -> Self {
        Self {
            id: entry.file_name.clone(),
            status: ItemStatus::Ok,
            ext: entry.ext.clone(),
            raw_path: Some(raw_path),
            depiction: Some(depiction),
            category: Some(category),
        }
    }

    fn skipped(entry: &ImageEntry, status: ItemStatus, raw_path: Option<PathBuf>) -> Self {
        Self {
            id: entry.file_name.clone(),
            status,
            ext: entry.ext.clone(),
            raw_path,
            depiction: None,
            category: None,
        }
    }

    /// Flatten into a manifest row, rounding confidences to 4 decimals.
    pub fn to_row(&self) -> ManifestRow {
        ManifestRow {
            id: self.id.clone(),
            status: self.status,
            ext: self.ext.clone(),
            raw_path: self.raw_path.as_deref().map(display_path).unwrap_or_default(),
            label: self.category.map(|c| c.label),
            label_confidence: self.category.map(|c| round4(c.confidence)),
            source_type: self.depiction.map(|d| d.source_type),
            source_confidence: self.depiction.map(|d| round4(d.confidence)),
        }
    }

    /// The JSON document persisted for a labeled item.
    pub fn to_label_file(&self) -> Result<LabelFile> {
        let (Some(depiction), Some(category), Some(raw_path)) =
            (self.depiction, self.category, self.raw_path.as_deref())
        else {
            return Err(anyhow!("item '{}' has no labels to persist", self.id));
        };
        Ok(LabelFile {
            id: self.id.clone(),
            status: self.status,
            ext: self.ext.clone(),
            label: category.label,
            label_confidence: round4(category.confidence),
            source_type: depiction.source_type,
            source_confidence: round4(depiction.confidence),
            per_label_scores: category.per_label_scores,
            raw_path: display_path(raw_path),
        })
    }
}

/// One manifest line. Field order is the column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub id: String,
    pub status: ItemStatus,
    pub ext: String,
    pub raw_path: String,
    pub label: Option<GarmentLabel>,
    pub label_confidence: Option<f64>,
    pub source_type: Option<SourceType>,
    pub source_confidence: Option<f64>,
}

/// Per-item JSON record (`labels/<id>.json`). Field order is the file order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelFile {
    pub id: String,
    pub status: ItemStatus,
    pub ext: String,
    pub label: GarmentLabel,
    pub label_confidence: f64,
    pub source_type: SourceType,
    pub source_confidence: f64,
    pub per_label_scores: LabelScores,
    pub raw_path: String,
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Path rendered with forward slashes, as stored in records.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Write `labels/<id>.json` for a labeled item, replacing any previous file.
pub fn write_label_file(labels_dir: &Path, record: &ItemRecord) -> Result<PathBuf> {
    let doc = record.to_label_file()?;
    let path = labels_dir.join(format!("{}.json", record.id));
    let json = serde_json::to_vec_pretty(&doc)?;
    write_atomic(&path, &json)
        .with_context(|| format!("failed to write label file {}", path.display()))?;
    Ok(path)
}

/// Write the manifest (UTF-8 with BOM, header row), replacing any previous one.
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let mut buf = UTF8_BOM.to_vec();
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        writer.write_record(MANIFEST_COLUMNS)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    write_atomic(path, &buf)
        .with_context(|| format!("failed to write manifest {}", path.display()))
}

/// Read a manifest back, tolerating a leading BOM.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let raw = fs::read(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let body = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw);
    let mut reader = csv::Reader::from_reader(body);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
