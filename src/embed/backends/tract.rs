#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use tract_onnx::prelude::*;

use crate::embed::backend::EmbeddingBackend;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];

/// CLIP embedder: visual encoder run with tract, prompt vectors precomputed.
///
/// The prompt file is a JSON object mapping prompt text to its text-encoder
/// output. Prompts are looked up verbatim; a missing prompt is an error.
pub struct TractClipBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    prompt_vectors: HashMap<String, Vec<f32>>,
}

impl TractClipBackend {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        image_model_path: P,
        prompt_embeddings_path: Q,
        input_size: u32,
    ) -> Result<Self> {
        let image_model_path = image_model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(image_model_path)
            .with_context(|| {
                format!(
                    "failed to load CLIP image encoder from {}",
                    image_model_path.display()
                )
            })?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize CLIP image encoder")?
            .into_runnable()
            .context("failed to build runnable CLIP image encoder")?;

        let prompt_embeddings_path = prompt_embeddings_path.as_ref();
        let raw = std::fs::read_to_string(prompt_embeddings_path).with_context(|| {
            format!(
                "failed to read prompt embeddings {}",
                prompt_embeddings_path.display()
            )
        })?;
        let prompt_vectors: HashMap<String, Vec<f32>> = serde_json::from_str(&raw)
            .with_context(|| {
                format!(
                    "invalid prompt embeddings {}",
                    prompt_embeddings_path.display()
                )
            })?;

        Ok(Self {
            model,
            input_size,
            prompt_vectors,
        })
    }

    /// Resize the shorter side to the input size, center crop, CLIP-normalize.
    fn build_input(&self, image: &DynamicImage) -> Result<Tensor> {
        let side = self.input_size;
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return Err(anyhow!("image has zero size"));
        }
        let scale = side as f32 / w.min(h) as f32;
        let scaled_w = ((w as f32 * scale).round() as u32).max(side);
        let scaled_h = ((h as f32 * scale).round() as u32).max(side);
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(&rgb, scaled_w, scaled_h, FilterType::CatmullRom);
        let left = (scaled_w - side) / 2;
        let top = (scaled_h - side) / 2;
        let cropped = image::imageops::crop_imm(&resized, left, top, side, side).to_image();

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let value = cropped.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - CLIP_MEAN[c]) / CLIP_STD[c]
        });
        Ok(input.into_tensor())
    }
}

impl EmbeddingBackend for TractClipBackend {
    fn name(&self) -> &'static str {
        "tract-clip"
    }

    fn embed_image(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("CLIP image encoder inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("CLIP image encoder produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("CLIP image encoder output was not f32")?;
        Ok(view.iter().copied().collect())
    }

    fn embed_texts(&mut self, prompts: &[&str]) -> Result<Vec<Vec<f32>>> {
        prompts
            .iter()
            .map(|prompt| {
                self.prompt_vectors
                    .get(*prompt)
                    .cloned()
                    .ok_or_else(|| anyhow!("no precomputed embedding for prompt '{}'", prompt))
            })
            .collect()
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = DynamicImage::new_rgb8(side, side);
        self.embed_image(&blank).map(|_| ())
    }
}
