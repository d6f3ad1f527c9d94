use crate::compose::audio::AudioBlock;
use crate::foundation::core::{Fps, FrameIndex, FrameRgba};
use crate::foundation::error::{CutlineError, CutlineResult};

/// Configuration handed to an encoder session in `begin`.
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    /// Present when the export mixes audio.
    pub audio: Option<AudioEncodeConfig>,
}

#[derive(Clone, Copy, Debug)]
pub struct AudioEncodeConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl EncodeConfig {
    pub fn validate(&self) -> CutlineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CutlineError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(CutlineError::validation("encode fps must be non-zero"));
        }
        if let Some(audio) = &self.audio {
            if audio.sample_rate == 0 {
                return Err(CutlineError::validation(
                    "audio sample_rate must be non-zero",
                ));
            }
            if audio.channels == 0 {
                return Err(CutlineError::validation("audio channels must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Encoder session boundary.
///
/// Ordering contract: `write_frame` and `write_audio` are called in strictly
/// increasing frame order per stream; sinks reject violations. A session
/// ends in exactly one of `finalize` (output becomes visible) or `discard`
/// (any partial output is removed).
pub trait EncoderSink: Send {
    /// Called once before any writes.
    fn begin(&mut self, cfg: EncodeConfig) -> CutlineResult<()>;
    /// Push one video frame.
    fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()>;
    /// Push the audio block belonging to `idx`.
    fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()>;
    /// Complete the session and make the output visible.
    fn finalize(&mut self) -> CutlineResult<()>;
    /// Abort the session, removing any partial output.
    fn discard(&mut self) -> CutlineResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<EncodeConfig>,
    pub frames: Vec<(FrameIndex, FrameRgba)>,
    pub audio: Vec<(FrameIndex, AudioBlock)>,
    pub finalized: bool,
    pub discarded: bool,
    last_frame_idx: Option<FrameIndex>,
    last_audio_idx: Option<FrameIndex>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<&EncodeConfig> {
        self.cfg.as_ref()
    }
}

impl EncoderSink for InMemorySink {
    fn begin(&mut self, cfg: EncodeConfig) -> CutlineResult<()> {
        cfg.validate()?;
        self.cfg = Some(cfg);
        self.frames.clear();
        self.audio.clear();
        self.finalized = false;
        self.discarded = false;
        self.last_frame_idx = None;
        self.last_audio_idx = None;
        Ok(())
    }

    fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()> {
        if self.cfg.is_none() {
            return Err(CutlineError::encode("sink not started"));
        }
        if let Some(last) = self.last_frame_idx
            && idx.0 <= last.0
        {
            return Err(CutlineError::encode("out-of-order frame index"));
        }
        self.last_frame_idx = Some(idx);
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()> {
        if self.cfg.is_none() {
            return Err(CutlineError::encode("sink not started"));
        }
        if let Some(last) = self.last_audio_idx
            && idx.0 <= last.0
        {
            return Err(CutlineError::encode("out-of-order audio index"));
        }
        self.last_audio_idx = Some(idx);
        self.audio.push((idx, block.clone()));
        Ok(())
    }

    fn finalize(&mut self) -> CutlineResult<()> {
        if self.cfg.is_none() {
            return Err(CutlineError::encode("sink not started"));
        }
        self.finalized = true;
        Ok(())
    }

    fn discard(&mut self) -> CutlineResult<()> {
        self.discarded = true;
        self.frames.clear();
        self.audio.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Canvas;

    fn cfg() -> EncodeConfig {
        EncodeConfig {
            width: 4,
            height: 4,
            fps: Fps { num: 30, den: 1 },
            audio: None,
        }
    }

    fn frame() -> FrameRgba {
        FrameRgba::transparent(Canvas {
            width: 4,
            height: 4,
        })
    }

    #[test]
    fn config_validation_catches_bad_values() {
        let mut bad = cfg();
        bad.width = 0;
        assert!(bad.validate().is_err());

        let mut bad = cfg();
        bad.audio = Some(AudioEncodeConfig {
            sample_rate: 0,
            channels: 2,
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn writes_before_begin_fail() {
        let mut sink = InMemorySink::new();
        assert!(sink.write_frame(FrameIndex(0), &frame()).is_err());
    }

    #[test]
    fn out_of_order_frames_are_rejected() {
        let mut sink = InMemorySink::new();
        sink.begin(cfg()).unwrap();
        sink.write_frame(FrameIndex(0), &frame()).unwrap();
        sink.write_frame(FrameIndex(1), &frame()).unwrap();
        assert!(sink.write_frame(FrameIndex(1), &frame()).is_err());
        assert!(sink.write_frame(FrameIndex(0), &frame()).is_err());
    }

    #[test]
    fn discard_clears_captured_output() {
        let mut sink = InMemorySink::new();
        sink.begin(cfg()).unwrap();
        sink.write_frame(FrameIndex(0), &frame()).unwrap();
        sink.discard().unwrap();
        assert!(sink.discarded);
        assert!(sink.frames.is_empty());
    }
}
