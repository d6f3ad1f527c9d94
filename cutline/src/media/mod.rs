//! Asset decoding boundary: probing, decode cursors, and the checkout pool.

pub mod pool;
pub mod probe;
pub mod source;

pub use pool::{DecoderPool, SourceLease};
pub use probe::{MediaProbe, VideoStreamInfo, probe_media};
pub use source::{
    AudioChunk, DecodeRequest, Decoded, FfmpegOpener, MIX_CHANNELS, MIX_SAMPLE_RATE, MediaSource,
    SourceOpener,
};
