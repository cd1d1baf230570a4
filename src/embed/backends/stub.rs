use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::collections::HashMap;

use crate::embed::backend::EmbeddingBackend;

/// Scripted embedder for tests and dry runs.
///
/// Every image maps to the same vector; prompts map to their scripted vector,
/// falling back to the default text vector when one is set.
pub struct StubEmbedder {
    image_vector: Vec<f32>,
    text_vectors: HashMap<String, Vec<f32>>,
    default_text: Option<Vec<f32>>,
    images_embedded: usize,
}

impl StubEmbedder {
    pub fn new(image_vector: Vec<f32>) -> Self {
        Self {
            image_vector,
            text_vectors: HashMap::new(),
            default_text: None,
            images_embedded: 0,
        }
    }

    pub fn with_text(mut self, prompt: &str, vector: Vec<f32>) -> Self {
        self.text_vectors.insert(prompt.to_string(), vector);
        self
    }

    pub fn with_default_text(mut self, vector: Vec<f32>) -> Self {
        self.default_text = Some(vector);
        self
    }

    pub fn images_embedded(&self) -> usize {
        self.images_embedded
    }
}

impl EmbeddingBackend for StubEmbedder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn embed_image(&mut self, _image: &DynamicImage) -> Result<Vec<f32>> {
        self.images_embedded += 1;
        Ok(self.image_vector.clone())
    }

    fn embed_texts(&mut self, prompts: &[&str]) -> Result<Vec<Vec<f32>>> {
        prompts
            .iter()
            .map(|prompt| {
                self.text_vectors
                    .get(*prompt)
                    .or(self.default_text.as_ref())
                    .cloned()
                    .ok_or_else(|| anyhow!("no stub embedding for prompt '{}'", prompt))
            })
            .collect()
    }
}
