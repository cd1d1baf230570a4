//! Depiction mode: flat lay vs. worn, and how much of the wearer is visible.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{
    DetectorSettings, DEFAULT_DETECTOR_INPUT_SIZE, DEFAULT_FULLBODY_HEIGHT_RATIO,
    DEFAULT_PERSON_CONFIDENCE,
};
use crate::detect::{DetectRequest, Detection, DetectorBackend, ObjectClass};

/// Smallest box height, in pixels, used for the height ratio.
const MIN_BOX_HEIGHT_PX: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    FlatLay,
    ModelUpperbody,
    ModelFullbody,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::FlatLay => "flat_lay",
            SourceType::ModelUpperbody => "model_upperbody",
            SourceType::ModelFullbody => "model_fullbody",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the depiction heuristic.
///
/// `confidence` is the detector's confidence in the person instance the
/// decision was based on (0.0 when no person was found). It is not a
/// probability that `source_type` is correct.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepictionRecord {
    pub source_type: SourceType,
    pub confidence: f64,
}

/// Thresholds for the depiction heuristic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepictionPolicy {
    pub person_confidence: f32,
    pub fullbody_height_ratio: f64,
    pub inference_size: u32,
}

impl Default for DepictionPolicy {
    fn default() -> Self {
        Self {
            person_confidence: DEFAULT_PERSON_CONFIDENCE,
            fullbody_height_ratio: DEFAULT_FULLBODY_HEIGHT_RATIO,
            inference_size: DEFAULT_DETECTOR_INPUT_SIZE,
        }
    }
}

impl From<&DetectorSettings> for DepictionPolicy {
    fn from(settings: &DetectorSettings) -> Self {
        Self {
            person_confidence: settings.person_confidence,
            fullbody_height_ratio: settings.fullbody_height_ratio,
            inference_size: settings.inference_size,
        }
    }
}

impl DepictionPolicy {
    fn request(&self) -> DetectRequest {
        DetectRequest {
            confidence_threshold: self.person_confidence,
            inference_size: self.inference_size,
        }
    }
}

/// Run the detector over `image` and classify how the garment is depicted.
pub fn classify_depiction(
    detector: &mut dyn DetectorBackend,
    image: &DynamicImage,
    policy: &DepictionPolicy,
) -> Result<DepictionRecord> {
    let detections = detector.detect(image, &policy.request())?;
    decide_source_type(&detections, image.height(), policy)
}

/// Apply the bbox-height heuristic to a detector's output.
pub fn decide_source_type(
    detections: &[Detection],
    image_height: u32,
    policy: &DepictionPolicy,
) -> Result<DepictionRecord> {
    if image_height == 0 {
        return Err(anyhow!("image height must be greater than zero"));
    }

    // Strict `>` keeps the first of equally confident people.
    let mut best: Option<&Detection> = None;
    for detection in detections {
        if detection.class() != ObjectClass::Person
            || detection.confidence < policy.person_confidence
        {
            continue;
        }
        if best.map_or(true, |b| detection.confidence > b.confidence) {
            best = Some(detection);
        }
    }

    let Some(person) = best else {
        return Ok(DepictionRecord {
            source_type: SourceType::FlatLay,
            confidence: 0.0,
        });
    };

    let box_height = f64::from(person.bbox.height()).max(MIN_BOX_HEIGHT_PX);
    let ratio = box_height / f64::from(image_height);
    let source_type = if ratio >= policy.fullbody_height_ratio {
        SourceType::ModelFullbody
    } else {
        SourceType::ModelUpperbody
    };
    log::debug!(
        "person conf={:.3} height_ratio={:.4} -> {}",
        person.confidence,
        ratio,
        source_type
    );

    Ok(DepictionRecord {
        source_type,
        confidence: f64::from(person.confidence),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend};

    fn person(confidence: f32, y1: f32, y2: f32) -> Detection {
        Detection {
            class_id: 0,
            confidence,
            bbox: BoundingBox { x1: 10.0, y1, x2: 90.0, y2 },
        }
    }

    #[test]
    fn no_person_is_flat_lay_with_zero_confidence() {
        let policy = DepictionPolicy::default();
        let handbag = Detection {
            class_id: 26,
            confidence: 0.95,
            bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 1000.0 },
        };
        let record = decide_source_type(&[handbag], 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::FlatLay);
        assert_eq!(record.confidence, 0.0);

        let record = decide_source_type(&[], 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::FlatLay);
    }

    #[test]
    fn ratio_exactly_at_threshold_is_fullbody() {
        let policy = DepictionPolicy::default();
        let record = decide_source_type(&[person(0.8, 100.0, 700.0)], 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::ModelFullbody);
        assert!((record.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn ratio_just_below_threshold_is_upperbody() {
        let policy = DepictionPolicy::default();
        let record = decide_source_type(&[person(0.8, 0.0, 599.999)], 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::ModelUpperbody);
    }

    #[test]
    fn highest_confidence_person_wins_and_ties_keep_first() {
        let policy = DepictionPolicy::default();
        let detections = [person(0.5, 0.0, 900.0), person(0.9, 0.0, 100.0), person(0.9, 0.0, 950.0)];
        let record = decide_source_type(&detections, 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::ModelUpperbody);
        assert!((record.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn persons_below_threshold_are_ignored() {
        let policy = DepictionPolicy::default();
        let record = decide_source_type(&[person(0.2, 0.0, 900.0)], 1000, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::FlatLay);
    }

    #[test]
    fn degenerate_box_height_is_clamped() {
        let policy = DepictionPolicy {
            fullbody_height_ratio: 0.5,
            ..DepictionPolicy::default()
        };
        // Inverted box: the clamp keeps the ratio at 1px / 2px.
        let record = decide_source_type(&[person(0.7, 5.0, 3.0)], 2, &policy).unwrap();
        assert_eq!(record.source_type, SourceType::ModelFullbody);
    }

    #[test]
    fn classify_depiction_uses_detector_output() {
        let mut detector = StubBackend::with_detections(vec![person(0.66, 0.0, 64.0)]);
        let image = DynamicImage::new_rgb8(50, 80);
        let record = classify_depiction(&mut detector, &image, &DepictionPolicy::default()).unwrap();
        assert_eq!(record.source_type, SourceType::ModelFullbody);
        assert_eq!(detector.calls(), 1);
    }
}
