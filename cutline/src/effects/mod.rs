//! Pure per-frame transforms applied to decoded clip frames.

pub mod blur;
pub mod chroma;
pub mod color;
pub mod envelope;
pub mod params;
pub mod pipeline;
pub mod place;
pub mod text;

pub use envelope::fade_factor;
pub use params::{
    Blur, ChromaKey, EffectParams, TextAnchor, TextAnimation, TextOutline, TextOverlay, TextShadow,
};
