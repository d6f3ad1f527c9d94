use std::sync::Arc;

use smallvec::SmallVec;

use crate::compose::audio::{AudioBlock, MixParams, mix_chunk_into, samples_for_frame};
use crate::compose::blend::over_in_place;
use crate::effects::pipeline::render_layer;
use crate::effects::text::TextRasterizer;
use crate::foundation::core::{FrameIndex, FrameRgba};
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::media::pool::DecoderPool;
use crate::media::source::{DecodeRequest, Decoded, MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::project::Project;
use crate::project::clip::{Clip, ClipId};
use crate::project::track::{Track, TrackKind};

/// A per-clip decode failure isolated during composition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipFailure {
    pub clip: ClipId,
    pub error: String,
}

/// One composited output timestamp: frame, audio block, and any isolated
/// decode failures.
#[derive(Clone, Debug)]
pub struct CompositeOutput {
    pub frame: FrameRgba,
    pub audio: AudioBlock,
    pub failures: Vec<ClipFailure>,
}

/// Produces one merged frame and audio block per output timestamp.
///
/// Tracks are blended bottom-to-top with "over"; active audio clips are
/// summed and soft-clipped. Given the same project state and frame index the
/// output is byte-identical across calls.
pub struct Compositor {
    pool: Arc<DecoderPool>,
    text: TextRasterizer,
}

impl Compositor {
    pub fn new(pool: Arc<DecoderPool>) -> Self {
        Self {
            pool,
            text: TextRasterizer::new(),
        }
    }

    /// Composite the output frame at `frame`.
    #[tracing::instrument(skip_all, fields(frame = frame.0))]
    pub fn composite_at(
        &mut self,
        project: &Project,
        frame: FrameIndex,
    ) -> CutlineResult<CompositeOutput> {
        let timeline = &project.timeline;
        let fps = timeline.output.fps;
        let canvas = timeline.output.canvas();
        let t = fps.frames_to_secs(frame.0);

        let mut acc = FrameRgba::transparent(canvas);
        let block_frames = samples_for_frame(frame.0, fps, MIX_SAMPLE_RATE);
        let mut audio = AudioBlock::silence(MIX_SAMPLE_RATE, MIX_CHANNELS, block_frames);
        let mut failures = Vec::new();

        let active: SmallVec<[(&Track, &Clip); 8]> = timeline
            .tracks()
            .iter()
            .filter_map(|track| track.active_at(t).map(|clip| (track, clip)))
            .collect();

        for (track, clip) in active {
            let result = match track.kind {
                TrackKind::Video | TrackKind::Overlay => {
                    self.composite_visual(project, clip, t, &mut acc)
                }
                TrackKind::Audio => self.mix_audio(project, clip, t, &mut audio),
            };
            if let Err(err) = result {
                if err.is_cancelled() {
                    return Err(err);
                }
                // Decode failures are isolated per clip: substitute a blank
                // layer and keep compositing the remaining tracks.
                tracing::warn!(clip = clip.id.0, error = %err, "clip decode failed; substituting blank layer");
                failures.push(ClipFailure {
                    clip: clip.id,
                    error: err.to_string(),
                });
            }
        }

        audio.soft_clip_in_place();

        Ok(CompositeOutput {
            frame: acc,
            audio,
            failures,
        })
    }

    fn composite_visual(
        &mut self,
        project: &Project,
        clip: &Clip,
        t: f64,
        acc: &mut FrameRgba,
    ) -> CutlineResult<()> {
        let asset = project.assets.get(clip.asset).ok_or_else(|| {
            CutlineError::decode(format!(
                "clip {} references missing asset {}",
                clip.id.0, clip.asset.0
            ))
        })?;
        let canvas = project.timeline.output.canvas();

        let mut lease = self.pool.checkout(asset)?;
        let decoded = lease.decode_at(DecodeRequest::VideoFrame {
            source_time_sec: clip.source_time_sec(t),
        })?;
        drop(lease);

        let frame = match decoded {
            Decoded::Frame(frame) => frame,
            // Past the end of the source: contribute nothing this frame.
            Decoded::EndOfStream => return Ok(()),
            Decoded::Audio(_) => {
                return Err(CutlineError::decode(format!(
                    "asset {} returned audio for a video request",
                    clip.asset.0
                )));
            }
        };

        let layer = render_layer(
            canvas,
            frame,
            &clip.effects,
            clip.elapsed_sec(t),
            clip.duration_sec(),
            &mut self.text,
        )?;
        over_in_place(&mut acc.data, &layer.frame.data, layer.opacity)
    }

    fn mix_audio(
        &mut self,
        project: &Project,
        clip: &Clip,
        t: f64,
        out: &mut AudioBlock,
    ) -> CutlineResult<()> {
        let asset = project.assets.get(clip.asset).ok_or_else(|| {
            CutlineError::decode(format!(
                "clip {} references missing asset {}",
                clip.id.0, clip.asset.0
            ))
        })?;

        let src_time = clip.source_time_sec(t);
        let out_frames = out.len_frames();
        let src_step = clip.speed * f64::from(MIX_SAMPLE_RATE) / f64::from(out.sample_rate);
        let max_frames = ((out_frames as f64) * src_step).ceil() as usize + 2;

        let mut lease = self.pool.checkout(asset)?;
        let decoded = lease.decode_at(DecodeRequest::AudioSpan {
            source_time_sec: src_time,
            max_frames,
        })?;
        drop(lease);

        let chunk = match decoded {
            Decoded::Audio(chunk) => chunk,
            Decoded::EndOfStream => return Ok(()),
            Decoded::Frame(_) => {
                return Err(CutlineError::decode(format!(
                    "asset {} returned video for an audio request",
                    clip.asset.0
                )));
            }
        };

        // The chunk starts on the sample boundary at or before the requested
        // time; carry the fractional remainder into the resample offset.
        let src_offset =
            src_time.max(0.0) * f64::from(chunk.sample_rate) - (chunk.start_frame as f64);

        mix_chunk_into(
            out,
            &chunk,
            &MixParams {
                src_offset,
                src_step: clip.speed * f64::from(chunk.sample_rate) / f64::from(out.sample_rate),
                gain: clip.effects.volume as f32,
                elapsed_sec: clip.elapsed_sec(t),
                clip_duration_sec: clip.duration_sec(),
                fade_in_sec: clip.effects.fade_in_sec,
                fade_out_sec: clip.effects.fade_out_sec,
            },
        );
        Ok(())
    }
}
