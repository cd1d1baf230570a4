//! Zero-shot garment category scoring.
//!
//! Each label owns an ensemble of prompts. The image is compared against
//! every prompt, the best prompt per label becomes the label's raw score,
//! and a softmax across labels yields the reported distribution.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::embed::EmbeddingBackend;

/// Garment category, in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GarmentLabel {
    Top,
    Bottom,
    OnePiece,
}

impl GarmentLabel {
    /// Canonical order. Exact score ties resolve to the earliest entry.
    pub const ALL: [GarmentLabel; 3] = [GarmentLabel::Top, GarmentLabel::Bottom, GarmentLabel::OnePiece];

    pub fn as_str(self) -> &'static str {
        match self {
            GarmentLabel::Top => "top",
            GarmentLabel::Bottom => "bottom",
            GarmentLabel::OnePiece => "one_piece",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        GarmentLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == value.trim())
            .ok_or_else(|| anyhow!("unknown garment label '{}'", value))
    }

    fn index(self) -> usize {
        match self {
            GarmentLabel::Top => 0,
            GarmentLabel::Bottom => 1,
            GarmentLabel::OnePiece => 2,
        }
    }
}

impl fmt::Display for GarmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEFAULT_TOP_PROMPTS: [&str; 5] = [
    "a photo of a top clothing item",
    "a photo of a shirt or blouse",
    "a photo of a jacket or coat",
    "a photo of a sweater",
    "a photo of a hoodie",
];

const DEFAULT_BOTTOM_PROMPTS: [&str; 5] = [
    "a photo of a bottom clothing item",
    "a photo of pants or trousers",
    "a photo of jeans",
    "a photo of a skirt",
    "a photo of shorts",
];

const DEFAULT_ONE_PIECE_PROMPTS: [&str; 5] = [
    "a photo of a one-piece outfit",
    "a photo of a dress",
    "a photo of a jumpsuit",
    "a photo of a romper",
    "a photo of a full-body outfit",
];

/// Validated mapping from every label to a non-empty, ordered prompt list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTable {
    prompts: [Vec<String>; 3],
}

impl PromptTable {
    pub fn new(top: Vec<String>, bottom: Vec<String>, one_piece: Vec<String>) -> Result<Self> {
        let table = Self {
            prompts: [top, bottom, one_piece],
        };
        for label in GarmentLabel::ALL {
            let prompts = table.prompts_for(label);
            if prompts.is_empty() {
                return Err(anyhow!("prompt table has no prompts for label '{}'", label));
            }
            if prompts.iter().any(|p| p.trim().is_empty()) {
                return Err(anyhow!("prompt table has a blank prompt for label '{}'", label));
            }
        }
        Ok(table)
    }

    /// Build from a name-keyed map, e.g. a config file section.
    pub fn from_named(mut raw: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut take = |label: GarmentLabel| {
            raw.remove(label.as_str())
                .ok_or_else(|| anyhow!("prompt table is missing label '{}'", label))
        };
        let top = take(GarmentLabel::Top)?;
        let bottom = take(GarmentLabel::Bottom)?;
        let one_piece = take(GarmentLabel::OnePiece)?;
        if let Some(extra) = raw.keys().next() {
            return Err(anyhow!("prompt table has unknown label '{}'", extra));
        }
        Self::new(top, bottom, one_piece)
    }

    pub fn prompts_for(&self, label: GarmentLabel) -> &[String] {
        &self.prompts[label.index()]
    }

    /// All prompts flattened in canonical label order, each tagged with its label.
    pub fn flatten(&self) -> Vec<(GarmentLabel, &str)> {
        GarmentLabel::ALL
            .into_iter()
            .flat_map(|label| {
                self.prompts_for(label)
                    .iter()
                    .map(move |prompt| (label, prompt.as_str()))
            })
            .collect()
    }
}

impl Default for PromptTable {
    fn default() -> Self {
        let owned = |prompts: &[&str]| prompts.iter().map(|p| p.to_string()).collect();
        Self {
            prompts: [
                owned(&DEFAULT_TOP_PROMPTS),
                owned(&DEFAULT_BOTTOM_PROMPTS),
                owned(&DEFAULT_ONE_PIECE_PROMPTS),
            ],
        }
    }
}

/// Probability per label. Serializes in canonical label order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelScores {
    pub top: f64,
    pub bottom: f64,
    pub one_piece: f64,
}

impl LabelScores {
    fn from_array(values: [f64; 3]) -> Self {
        Self {
            top: values[0],
            bottom: values[1],
            one_piece: values[2],
        }
    }

    pub fn get(&self, label: GarmentLabel) -> f64 {
        match label {
            GarmentLabel::Top => self.top,
            GarmentLabel::Bottom => self.bottom,
            GarmentLabel::OnePiece => self.one_piece,
        }
    }

    pub fn sum(&self) -> f64 {
        self.top + self.bottom + self.one_piece
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CategoryRecord {
    pub label: GarmentLabel,
    /// Always equal to `per_label_scores.get(label)`.
    pub confidence: f64,
    pub per_label_scores: LabelScores,
}

/// Classify the garment category of a decoded image.
pub fn classify_category(
    embedder: &mut dyn EmbeddingBackend,
    image: &DynamicImage,
    prompts: &PromptTable,
) -> Result<CategoryRecord> {
    let flat = prompts.flatten();
    let texts: Vec<&str> = flat.iter().map(|(_, text)| *text).collect();

    let image_vec = embedder.embed_image(image)?;
    let text_vecs = embedder.embed_texts(&texts)?;
    if text_vecs.len() != texts.len() {
        return Err(anyhow!(
            "embedder '{}' returned {} text embeddings for {} prompts",
            embedder.name(),
            text_vecs.len(),
            texts.len()
        ));
    }

    let image_vec = l2_normalize(&image_vec)?;
    let mut raw = [f64::NEG_INFINITY; 3];
    for ((label, _), text_vec) in flat.iter().zip(text_vecs.iter()) {
        let text_vec = l2_normalize(text_vec)?;
        let similarity = dot(&image_vec, &text_vec)?;
        let slot = &mut raw[label.index()];
        if similarity > *slot {
            *slot = similarity;
        }
    }

    Ok(score_labels(raw))
}

/// Turn per-label raw similarity scores into a category record.
pub fn score_labels(raw: [f64; 3]) -> CategoryRecord {
    let probs = softmax(raw);
    let mut best = 0;
    for i in 1..probs.len() {
        if probs[i] > probs[best] {
            best = i;
        }
    }
    let label = GarmentLabel::ALL[best];
    CategoryRecord {
        label,
        confidence: probs[best],
        per_label_scores: LabelScores::from_array(probs),
    }
}

/// Numerically stable softmax.
pub fn softmax(scores: [f64; 3]) -> [f64; 3] {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = scores.map(|s| (s - max).exp());
    let total: f64 = exps.iter().sum();
    exps.map(|e| e / total)
}

pub fn l2_normalize(vector: &[f32]) -> Result<Vec<f64>> {
    if vector.is_empty() {
        return Err(anyhow!("embedding vector is empty"));
    }
    let norm = vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(anyhow!("embedding vector has degenerate norm {}", norm));
    }
    Ok(vector.iter().map(|&v| f64::from(v) / norm).collect())
}

fn dot(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(anyhow!(
            "embedding dimension mismatch: image {} vs text {}",
            a.len(),
            b.len()
        ));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::StubEmbedder;

    fn blank_image() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    /// Gives every prompt of `label` the vector `hit`, all others `miss`.
    fn embedder_favoring(label: GarmentLabel, hit: Vec<f32>, miss: Vec<f32>) -> StubEmbedder {
        let table = PromptTable::default();
        let mut embedder = StubEmbedder::new(vec![1.0, 0.0, 0.0]);
        for (prompt_label, prompt) in table.flatten() {
            let vector = if prompt_label == label { hit.clone() } else { miss.clone() };
            embedder = embedder.with_text(prompt, vector);
        }
        embedder
    }

    #[test]
    fn default_table_has_five_prompts_per_label() {
        let table = PromptTable::default();
        for label in GarmentLabel::ALL {
            assert_eq!(table.prompts_for(label).len(), 5);
        }
        assert_eq!(table.flatten().len(), 15);
        assert_eq!(table.flatten()[5], (GarmentLabel::Bottom, "a photo of a bottom clothing item"));
    }

    #[test]
    fn prompt_table_rejects_empty_label() {
        let err = PromptTable::new(vec!["a".into()], vec![], vec!["c".into()]).unwrap_err();
        assert!(err.to_string().contains("bottom"));
    }

    #[test]
    fn prompt_table_from_named_requires_every_label() {
        let mut raw = BTreeMap::new();
        raw.insert("top".to_string(), vec!["a shirt".to_string()]);
        raw.insert("bottom".to_string(), vec!["a skirt".to_string()]);
        assert!(PromptTable::from_named(raw.clone()).is_err());

        raw.insert("one_piece".to_string(), vec!["a dress".to_string()]);
        let table = PromptTable::from_named(raw.clone()).unwrap();
        assert_eq!(table.prompts_for(GarmentLabel::OnePiece), ["a dress".to_string()]);

        raw.insert("shoes".to_string(), vec!["a boot".to_string()]);
        assert!(PromptTable::from_named(raw).is_err());
    }

    #[test]
    fn softmax_is_stable_and_normalized() {
        let probs = softmax([1000.0, 999.0, -1000.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn exact_ties_resolve_in_canonical_order() {
        let record = score_labels([0.2, 0.2, 0.2]);
        assert_eq!(record.label, GarmentLabel::Top);

        let record = score_labels([0.1, 0.3, 0.3]);
        assert_eq!(record.label, GarmentLabel::Bottom);
    }

    #[test]
    fn max_pooling_uses_best_prompt_per_label() {
        // One strong one-piece prompt beats a uniformly decent bottom ensemble.
        let table = PromptTable::default();
        let mut embedder = StubEmbedder::new(vec![1.0, 0.0]);
        for (label, prompt) in table.flatten() {
            let vector = match label {
                GarmentLabel::Top => vec![0.0, 1.0],
                GarmentLabel::Bottom => vec![0.6, 0.8],
                GarmentLabel::OnePiece => vec![0.0, 1.0],
            };
            embedder = embedder.with_text(prompt, vector);
        }
        embedder = embedder.with_text("a photo of a dress", vec![0.9, 0.1]);

        let record = classify_category(&mut embedder, &blank_image(), &table).unwrap();
        assert_eq!(record.label, GarmentLabel::OnePiece);
    }

    #[test]
    fn confidence_matches_distribution() {
        let mut embedder = embedder_favoring(GarmentLabel::Bottom, vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]);
        let record = classify_category(&mut embedder, &blank_image(), &PromptTable::default()).unwrap();
        assert_eq!(record.label, GarmentLabel::Bottom);
        assert_eq!(record.confidence, record.per_label_scores.get(GarmentLabel::Bottom));
        assert!((record.per_label_scores.sum() - 1.0).abs() < 1e-6);
        // softmax([0, 1, 0])
        let expected = std::f64::consts::E / (std::f64::consts::E + 2.0);
        assert!((record.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_norm_embedding_is_an_error() {
        let mut embedder = StubEmbedder::new(vec![0.0, 0.0, 0.0]);
        let result = classify_category(&mut embedder, &blank_image(), &PromptTable::default());
        assert!(result.is_err());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut embedder = StubEmbedder::new(vec![1.0, 0.0]).with_default_text(vec![1.0, 0.0, 0.0]);
        let result = classify_category(&mut embedder, &blank_image(), &PromptTable::default());
        assert!(result.is_err());
    }

    #[test]
    fn label_parse_round_trips_names() {
        for label in GarmentLabel::ALL {
            assert_eq!(GarmentLabel::parse(label.as_str()).unwrap(), label);
        }
        assert!(GarmentLabel::parse("shoes").is_err());
    }
}
