//! Export pipeline: encoder sessions and the timeline export driver.

pub mod cancel;
pub mod encoder;
pub mod exporter;
pub mod ffmpeg;

pub use cancel::CancelToken;
pub use encoder::{AudioEncodeConfig, EncodeConfig, EncoderSink, InMemorySink};
pub use exporter::{ExportOpts, ExportReport, ExportStatus, Exporter};
pub use ffmpeg::{FfmpegEncoder, FfmpegEncoderOpts, is_ffmpeg_on_path};
