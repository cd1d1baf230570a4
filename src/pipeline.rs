//! Run orchestration: enumerate, archive, classify, record.
//!
//! The run is sequential. Unsupported and undecodable files become status
//! rows; archive and collaborator failures halt the run unless inference
//! errors are configured to be isolated per item.

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageDecoder};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::category::{classify_category, CategoryRecord, PromptTable};
use crate::config::LabelerConfig;
use crate::depiction::{classify_depiction, DepictionPolicy, DepictionRecord};
use crate::detect::DetectorBackend;
use crate::embed::EmbeddingBackend;
use crate::ingest::{list_images, ContentStore, FileCopier, ImageEntry, MetadataPreservingCopier};
use crate::record::{write_label_file, write_manifest, ItemRecord, ItemStatus, ManifestRow};

pub const RAW_DIR: &str = "raw_all";
pub const LABELS_DIR: &str = "labels";
pub const MANIFEST_FILE: &str = "manifest.csv";

/// Where a run writes its outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub raw_dir: PathBuf,
    pub labels_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            raw_dir: root.join(RAW_DIR),
            labels_dir: root.join(LABELS_DIR),
            manifest_path: root.join(MANIFEST_FILE),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.raw_dir, &self.labels_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output folder {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Progress notification for one accepted item.
#[derive(Clone, Debug)]
pub struct ItemProgress<'a> {
    /// 1-based position among accepted items.
    pub index: usize,
    pub total: usize,
    pub record: &'a ItemRecord,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub ok: usize,
    pub skipped_unsupported_ext: usize,
    pub skipped_unreadable: usize,
    pub skipped_inference_error: usize,
}

impl StatusCounts {
    fn add(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Ok => self.ok += 1,
            ItemStatus::SkippedUnsupportedExt => self.skipped_unsupported_ext += 1,
            ItemStatus::SkippedUnreadable => self.skipped_unreadable += 1,
            ItemStatus::SkippedInferenceError => self.skipped_inference_error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.skipped_unsupported_ext + self.skipped_unreadable + self.skipped_inference_error
    }
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub layout: OutputLayout,
    pub rows: Vec<ManifestRow>,
    pub counts: StatusCounts,
}

/// One labeling run over an input folder.
///
/// Collaborators are borrowed so the caller loads them once and can reuse
/// them across runs.
pub struct Pipeline<'a, C: FileCopier = MetadataPreservingCopier> {
    layout: OutputLayout,
    store: ContentStore<C>,
    detector: &'a mut dyn DetectorBackend,
    embedder: &'a mut dyn EmbeddingBackend,
    policy: DepictionPolicy,
    prompts: PromptTable,
    skip_inference_errors: bool,
}

impl<'a> Pipeline<'a, MetadataPreservingCopier> {
    pub fn new(
        config: &LabelerConfig,
        detector: &'a mut dyn DetectorBackend,
        embedder: &'a mut dyn EmbeddingBackend,
    ) -> Self {
        let layout = OutputLayout::new(&config.out_root);
        let store = ContentStore::new(&layout.raw_dir);
        Self::with_store(config, store, detector, embedder)
    }
}

impl<'a, C: FileCopier> Pipeline<'a, C> {
    pub fn with_store(
        config: &LabelerConfig,
        store: ContentStore<C>,
        detector: &'a mut dyn DetectorBackend,
        embedder: &'a mut dyn EmbeddingBackend,
    ) -> Self {
        Self {
            layout: OutputLayout::new(&config.out_root),
            store,
            detector,
            embedder,
            policy: DepictionPolicy::from(&config.detector),
            prompts: config.prompts.clone(),
            skip_inference_errors: config.skip_inference_errors,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn store(&self) -> &ContentStore<C> {
        &self.store
    }

    pub fn run(&mut self, input_dir: &Path) -> Result<RunSummary> {
        self.run_with_progress(input_dir, |_| {})
    }

    /// Label every file in `input_dir` and write the manifest.
    pub fn run_with_progress<F>(&mut self, input_dir: &Path, mut on_item: F) -> Result<RunSummary>
    where
        F: FnMut(&ItemProgress<'_>),
    {
        if !input_dir.is_dir() {
            return Err(anyhow!("Folder not found: {}", input_dir.display()));
        }
        self.layout.ensure()?;

        let (images, skipped) = list_images(input_dir)?;
        log::info!(
            "found {} supported images, skipped {} unsupported",
            images.len(),
            skipped.len()
        );

        let mut counts = StatusCounts::default();
        let mut rows = Vec::with_capacity(images.len() + skipped.len());
        for entry in &skipped {
            let record = ItemRecord::unsupported(entry);
            counts.add(record.status);
            rows.push(record.to_row());
        }

        let total = images.len();
        for (i, entry) in images.iter().enumerate() {
            let started = Instant::now();
            let record = self.process(entry)?;
            if record.status == ItemStatus::Ok {
                write_label_file(&self.layout.labels_dir, &record)?;
            }
            log::debug!("{} processed in {:?}", record.id, started.elapsed());
            on_item(&ItemProgress {
                index: i + 1,
                total,
                record: &record,
            });
            counts.add(record.status);
            rows.push(record.to_row());
        }

        write_manifest(&self.layout.manifest_path, &rows)?;
        log::info!(
            "manifest written to {} ({} rows)",
            self.layout.manifest_path.display(),
            rows.len()
        );

        Ok(RunSummary {
            layout: self.layout.clone(),
            rows,
            counts,
        })
    }

    /// Archive, decode, and classify one accepted entry.
    fn process(&mut self, entry: &ImageEntry) -> Result<ItemRecord> {
        let (raw_path, _) = self.store.archive(entry)?;

        let image = match decode(&raw_path) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("skip unreadable {}: {:#}", entry.file_name, e);
                return Ok(ItemRecord::unreadable(entry, raw_path));
            }
        };

        match self.classify(&image) {
            Ok((depiction, category)) => Ok(ItemRecord::labeled(entry, raw_path, depiction, category)),
            Err(e) if self.skip_inference_errors => {
                log::warn!("skip {} after inference error: {:#}", entry.file_name, e);
                Ok(ItemRecord::inference_error(entry, raw_path))
            }
            Err(e) => Err(e.context(format!("inference failed for {}", entry.file_name))),
        }
    }

    fn classify(&mut self, image: &DynamicImage) -> Result<(DepictionRecord, CategoryRecord)> {
        let depiction = classify_depiction(&mut *self.detector, image, &self.policy)?;
        let category = classify_category(&mut *self.embedder, image, &self.prompts)?;
        Ok((depiction, category))
    }
}

/// Decode by content, not by extension, and rotate upright per EXIF orientation.
fn decode(path: &Path) -> Result<DynamicImage> {
    let mut decoder = image::ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}
