use anyhow::Result;
use image::DynamicImage;

/// Image–text embedding collaborator.
///
/// Image and text vectors must live in the same space so that cosine
/// similarity between them is meaningful. Vectors need not be normalized.
pub trait EmbeddingBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Embed one decoded image.
    fn embed_image(&mut self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Embed a batch of prompts, one vector per prompt, in input order.
    fn embed_texts(&mut self, prompts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Optional warm-up hook, called once before the first image.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
