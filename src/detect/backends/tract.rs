#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectRequest, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection};

/// IoU above which a lower-confidence box of the same class is suppressed.
const NMS_IOU_THRESHOLD: f32 = 0.45;
/// Letterbox padding value, matching the exporter's preprocessing.
const LETTERBOX_FILL: u8 = 114;

/// Tract backend for YOLOv8-style ONNX detectors.
///
/// Expects a single output shaped `[1, 4 + classes, candidates]` holding
/// center-x, center-y, width, height in input pixels followed by per-class
/// scores.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

/// Maps letterboxed coordinates back to the source image.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &DynamicImage, inference_size: u32) -> Result<(Tensor, Letterbox)> {
        if inference_size != self.input_size {
            return Err(anyhow!(
                "requested inference size {} does not match model input {}",
                inference_size,
                self.input_size
            ));
        }
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return Err(anyhow!("image has zero size"));
        }

        let side = self.input_size;
        let scale = (side as f32 / w as f32).min(side as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, side);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, side);
        let resized = image::imageops::resize(&image.to_rgb8(), new_w, new_h, FilterType::Triangle);

        let pad_x = (side - new_w) / 2;
        let pad_y = (side - new_h) / 2;
        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        image::imageops::replace(&mut canvas, &resized, i64::from(pad_x), i64::from(pad_y));

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        image: &DynamicImage,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let rows = shape[1];
        let candidates = shape[2];
        let (img_w, img_h) = (image.width() as f32, image.height() as f32);

        let mut found = Vec::new();
        for i in 0..candidates {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for row in 4..rows {
                let score = view[[0, row, i]];
                if score > best_score {
                    best_score = score;
                    best_class = row - 4;
                }
            }
            if !(best_score >= threshold) {
                continue;
            }
            let (cx, cy, bw, bh) = (view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            let unmap_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, img_w);
            let unmap_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, img_h);
            found.push(Detection {
                class_id: best_class as u32,
                confidence: best_score,
                bbox: BoundingBox {
                    x1: unmap_x(cx - bw / 2.0),
                    y1: unmap_y(cy - bh / 2.0),
                    x2: unmap_x(cx + bw / 2.0),
                    y2: unmap_y(cy + bh / 2.0),
                },
            });
        }

        Ok(non_max_suppression(found, NMS_IOU_THRESHOLD))
    }
}

/// Greedy per-class NMS. Output is ordered by descending confidence.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &DynamicImage, request: &DetectRequest) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(image, request.inference_size)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, image, request.confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let request = DetectRequest {
            confidence_threshold: 1.0,
            inference_size: side,
        };
        self.detect(&DynamicImage::new_rgb8(side, side), &request)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, x1: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: BoundingBox { x1, y1: 0.0, x2: x1 + 10.0, y2: 10.0 },
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let kept = non_max_suppression(
            vec![det(0, 0.5, 0.0), det(0, 0.9, 1.0), det(2, 0.4, 1.0), det(0, 0.3, 50.0)],
            NMS_IOU_THRESHOLD,
        );
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.4, 0.3]);
    }
}
