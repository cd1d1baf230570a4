//! Garment Labeler
//!
//! Builds a labeled clothing dataset from an unlabeled folder of photographs.
//! Every supported image gets two independent labels:
//!
//! 1. **Depiction** (`flat_lay`, `model_upperbody`, `model_fullbody`), from a
//!    person detector and a bounding-box height heuristic.
//! 2. **Category** (`top`, `bottom`, `one_piece`), from zero-shot image–text
//!    similarity over a prompt ensemble.
//!
//! # Module Structure
//!
//! - `ingest`: input enumeration and the raw archive
//! - `detect` / `embed`: collaborator traits and backends
//! - `depiction` / `category`: the two classifiers
//! - `record`: per-item JSON records and the CSV manifest
//! - `pipeline`: the sequential run over an input folder
//! - `config`: defaults, config file, environment overrides

pub mod category;
pub mod config;
pub mod depiction;
pub mod detect;
pub mod embed;
pub mod ingest;
pub mod pipeline;
pub mod record;

pub use category::{classify_category, CategoryRecord, GarmentLabel, LabelScores, PromptTable};
pub use config::{BackendKind, LabelerConfig};
pub use depiction::{classify_depiction, DepictionPolicy, DepictionRecord, SourceType};
pub use detect::{build_detector, DetectRequest, Detection, DetectorBackend, StubBackend};
pub use embed::{build_embedder, EmbeddingBackend, StubEmbedder};
pub use ingest::{list_images, ContentStore, ImageEntry};
pub use pipeline::{OutputLayout, Pipeline, RunSummary};
pub use record::{ItemRecord, ItemStatus, ManifestRow};
