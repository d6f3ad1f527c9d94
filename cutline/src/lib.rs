//! Cutline is the timeline compositing and export core of a multi-track
//! video editor.
//!
//! The library takes an ordered set of clips across video, audio, and
//! overlay tracks, each with trims, a speed factor, and effect parameters,
//! and renders them into one deterministic frame/audio stream:
//!
//! - Build or load a [`project::Project`] (assets, tracks, clips)
//! - Composite single frames with a [`compose::Compositor`] or through a
//!   [`preview::PreviewWorker`]
//! - Drive a full render into an [`export::EncoderSink`] with an
//!   [`export::Exporter`]
//!
//! Decoding and encoding go through the system `ffmpeg`/`ffprobe` binaries;
//! both sit behind traits so tests run against synthetic sources and an
//! in-memory sink.
#![forbid(unsafe_code)]

pub mod compose;
pub mod effects;
pub mod export;
mod foundation;
pub mod media;
pub mod preview;
pub mod project;

pub use foundation::core::{Canvas, Fps, FrameIndex, FrameRgba};
pub use foundation::error::{CutlineError, CutlineResult};

pub use compose::{AudioBlock, CompositeOutput, Compositor};
pub use export::{
    CancelToken, EncoderSink, ExportOpts, ExportReport, ExportStatus, Exporter, FfmpegEncoder,
    FfmpegEncoderOpts, InMemorySink,
};
pub use media::{DecoderPool, FfmpegOpener};
pub use preview::PreviewWorker;
pub use project::{CommandHistory, EditCommand, Project};
