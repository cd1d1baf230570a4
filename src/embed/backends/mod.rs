pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubEmbedder;

#[cfg(feature = "backend-tract")]
pub use tract::TractClipBackend;
