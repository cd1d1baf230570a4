mod backend;
mod backends;

pub use backend::EmbeddingBackend;
pub use backends::StubEmbedder;

#[cfg(feature = "backend-tract")]
pub use backends::TractClipBackend;

use anyhow::Result;

use crate::config::{BackendKind, EmbedderSettings};

/// Construct the configured embedding backend.
pub fn build_embedder(settings: &EmbedderSettings) -> Result<Box<dyn EmbeddingBackend>> {
    match settings.backend {
        BackendKind::Stub => {
            log::warn!("embedder: stub backend selected, category scores will be uniform");
            Ok(Box::new(
                StubEmbedder::new(vec![1.0]).with_default_text(vec![1.0]),
            ))
        }
        BackendKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                Ok(Box::new(TractClipBackend::new(
                    &settings.image_model_path,
                    &settings.prompt_embeddings_path,
                    settings.input_size,
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow::anyhow!(
                    "embedder backend 'tract' requires the backend-tract feature"
                ))
            }
        }
    }
}
