use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::category::PromptTable;

pub const DEFAULT_OUT_ROOT: &str = "YV_dataset";
/// Minimum detector confidence for an instance to count at all.
pub const DEFAULT_PERSON_CONFIDENCE: f32 = 0.25;
/// Person bbox height / image height at or above which a shot is full-body.
pub const DEFAULT_FULLBODY_HEIGHT_RATIO: f64 = 0.60;
/// Square detector input resolution in pixels.
pub const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 640;
pub const DEFAULT_DETECTOR_MODEL: &str = "yolov8n.onnx";
/// Square CLIP visual encoder input resolution in pixels.
pub const DEFAULT_EMBEDDER_INPUT_SIZE: u32 = 224;
pub const DEFAULT_IMAGE_ENCODER_MODEL: &str = "clip-vit-b32-visual.onnx";
pub const DEFAULT_PROMPT_EMBEDDINGS: &str = "clip-vit-b32-prompts.json";

#[derive(Debug, Deserialize, Default)]
struct LabelerConfigFile {
    out_root: Option<String>,
    detector: Option<DetectorConfigFile>,
    embedder: Option<EmbedderConfigFile>,
    prompts: Option<BTreeMap<String, Vec<String>>>,
    skip_inference_errors: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    person_confidence: Option<f32>,
    fullbody_height_ratio: Option<f64>,
    inference_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EmbedderConfigFile {
    backend: Option<String>,
    image_model_path: Option<PathBuf>,
    prompt_embeddings_path: Option<PathBuf>,
    input_size: Option<u32>,
}

/// Which implementation backs a collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Scripted in-process backend (tests, dry runs).
    Stub,
    /// ONNX model executed with tract (feature `backend-tract`).
    Tract,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown backend '{}' (expected 'stub' or 'tract')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelerConfig {
    pub out_root: PathBuf,
    pub detector: DetectorSettings,
    pub embedder: EmbedderSettings,
    pub prompts: PromptTable,
    pub skip_inference_errors: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub person_confidence: f32,
    pub fullbody_height_ratio: f64,
    pub inference_size: u32,
}

#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    pub backend: BackendKind,
    pub image_model_path: PathBuf,
    pub prompt_embeddings_path: PathBuf,
    pub input_size: u32,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            out_root: PathBuf::from(DEFAULT_OUT_ROOT),
            detector: DetectorSettings {
                backend: BackendKind::Tract,
                model_path: PathBuf::from(DEFAULT_DETECTOR_MODEL),
                person_confidence: DEFAULT_PERSON_CONFIDENCE,
                fullbody_height_ratio: DEFAULT_FULLBODY_HEIGHT_RATIO,
                inference_size: DEFAULT_DETECTOR_INPUT_SIZE,
            },
            embedder: EmbedderSettings {
                backend: BackendKind::Tract,
                image_model_path: PathBuf::from(DEFAULT_IMAGE_ENCODER_MODEL),
                prompt_embeddings_path: PathBuf::from(DEFAULT_PROMPT_EMBEDDINGS),
                input_size: DEFAULT_EMBEDDER_INPUT_SIZE,
            },
            prompts: PromptTable::default(),
            skip_inference_errors: false,
        }
    }
}

impl LabelerConfig {
    /// Load from `LABELER_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LABELER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LabelerConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let detector_file = file.detector.unwrap_or_default();
        let embedder_file = file.embedder.unwrap_or_default();

        let detector = DetectorSettings {
            backend: match detector_file.backend.as_deref() {
                Some(name) => BackendKind::parse(name)?,
                None => defaults.detector.backend,
            },
            model_path: detector_file
                .model_path
                .unwrap_or(defaults.detector.model_path),
            person_confidence: detector_file
                .person_confidence
                .unwrap_or(defaults.detector.person_confidence),
            fullbody_height_ratio: detector_file
                .fullbody_height_ratio
                .unwrap_or(defaults.detector.fullbody_height_ratio),
            inference_size: detector_file
                .inference_size
                .unwrap_or(defaults.detector.inference_size),
        };
        let embedder = EmbedderSettings {
            backend: match embedder_file.backend.as_deref() {
                Some(name) => BackendKind::parse(name)?,
                None => defaults.embedder.backend,
            },
            image_model_path: embedder_file
                .image_model_path
                .unwrap_or(defaults.embedder.image_model_path),
            prompt_embeddings_path: embedder_file
                .prompt_embeddings_path
                .unwrap_or(defaults.embedder.prompt_embeddings_path),
            input_size: embedder_file
                .input_size
                .unwrap_or(defaults.embedder.input_size),
        };
        let prompts = match file.prompts {
            Some(raw) => PromptTable::from_named(raw)?,
            None => defaults.prompts,
        };

        Ok(Self {
            out_root: file
                .out_root
                .map(PathBuf::from)
                .unwrap_or(defaults.out_root),
            detector,
            embedder,
            prompts,
            skip_inference_errors: file
                .skip_inference_errors
                .unwrap_or(defaults.skip_inference_errors),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("LABELER_OUT_ROOT") {
            if !root.trim().is_empty() {
                self.out_root = PathBuf::from(root);
            }
        }
        if let Ok(backend) = std::env::var("LABELER_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("LABELER_DETECTOR_MODEL") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(value) = std::env::var("LABELER_PERSON_CONFIDENCE") {
            self.detector.person_confidence = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("LABELER_PERSON_CONFIDENCE must be a number"))?;
        }
        if let Ok(value) = std::env::var("LABELER_FULLBODY_RATIO") {
            self.detector.fullbody_height_ratio = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("LABELER_FULLBODY_RATIO must be a number"))?;
        }
        if let Ok(backend) = std::env::var("LABELER_EMBEDDER") {
            if !backend.trim().is_empty() {
                self.embedder.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(value) = std::env::var("LABELER_SKIP_INFERENCE_ERRORS") {
            self.skip_inference_errors = parse_bool(&value).ok_or_else(|| {
                anyhow!("LABELER_SKIP_INFERENCE_ERRORS must be true/false")
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.out_root.as_os_str().is_empty() {
            return Err(anyhow!("out_root must not be empty"));
        }
        let conf = self.detector.person_confidence;
        if !(conf > 0.0 && conf <= 1.0) {
            return Err(anyhow!(
                "detector.person_confidence must be in (0, 1], got {}",
                conf
            ));
        }
        let ratio = self.detector.fullbody_height_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(anyhow!(
                "detector.fullbody_height_ratio must be in (0, 1], got {}",
                ratio
            ));
        }
        if self.detector.inference_size == 0 {
            return Err(anyhow!("detector.inference_size must be greater than zero"));
        }
        if self.embedder.input_size == 0 {
            return Err(anyhow!("embedder.input_size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LabelerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = LabelerConfig::default();
        assert_eq!(cfg.out_root, PathBuf::from("YV_dataset"));
        assert_eq!(cfg.detector.person_confidence, 0.25);
        assert_eq!(cfg.detector.fullbody_height_ratio, 0.60);
        assert_eq!(cfg.detector.inference_size, 640);
        assert!(!cfg.skip_inference_errors);
        cfg.validate().unwrap();
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!(BackendKind::parse("Stub").unwrap(), BackendKind::Stub);
        assert_eq!(BackendKind::parse(" tract ").unwrap(), BackendKind::Tract);
        assert!(BackendKind::parse("onnxruntime").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_ratio() {
        let mut cfg = LabelerConfig::default();
        cfg.detector.fullbody_height_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.detector.fullbody_height_ratio = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
