//! End-to-end pipeline tests over synthetic media sources and the in-memory
//! encoder sink. No ffmpeg required.

use std::sync::Arc;

use cutline::effects::EffectParams;
use cutline::export::{EncoderSink, InMemorySink};
use cutline::media::{
    AudioChunk, DecodeRequest, Decoded, DecoderPool, MIX_SAMPLE_RATE, MediaSource, SourceOpener,
};
use cutline::project::{Clip, ClipId, MediaKind, OutputSettings, Project, TrackKind};
use cutline::{
    AudioBlock, CancelToken, Compositor, CutlineResult, ExportOpts, ExportStatus, Exporter, Fps,
    FrameIndex, FrameRgba,
};

/// Deterministic synthetic source: video frames are a solid color derived
/// from the asset id and requested time, audio is a constant level.
struct SyntheticOpener;

struct SyntheticSource {
    asset: u64,
    duration_sec: f64,
}

impl MediaSource for SyntheticSource {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match request {
            DecodeRequest::VideoFrame { source_time_sec } => {
                if source_time_sec >= self.duration_sec {
                    return Ok(Decoded::EndOfStream);
                }
                // Quantize so nearby timestamps map to the same "frame".
                let shade = ((source_time_sec * 30.0).round() as u64 % 200) as u8;
                Ok(Decoded::Frame(FrameRgba {
                    width: 8,
                    height: 8,
                    data: [50 + self.asset as u8, shade, 100, 255].repeat(64),
                    premultiplied: true,
                }))
            }
            DecodeRequest::AudioSpan {
                source_time_sec,
                max_frames,
            } => {
                if source_time_sec >= self.duration_sec {
                    return Ok(Decoded::EndOfStream);
                }
                let start =
                    (source_time_sec.max(0.0) * f64::from(MIX_SAMPLE_RATE)).floor() as u64;
                Ok(Decoded::Audio(AudioChunk {
                    sample_rate: MIX_SAMPLE_RATE,
                    channels: 2,
                    start_frame: start,
                    interleaved: vec![0.2; max_frames * 2],
                }))
            }
        }
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, asset: &cutline::project::Asset) -> CutlineResult<Box<dyn MediaSource>> {
        Ok(Box::new(SyntheticSource {
            asset: asset.id.0,
            duration_sec: asset.duration_sec.unwrap_or(f64::MAX),
        }))
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn pool() -> Arc<DecoderPool> {
    Arc::new(DecoderPool::new(Arc::new(SyntheticOpener)))
}

fn base_project() -> Project {
    let mut p = Project::new(
        "pipeline",
        OutputSettings {
            width: 8,
            height: 8,
            fps: Fps { num: 30, den: 1 },
        },
    )
    .unwrap();
    p.import_asset(MediaKind::Video, Some("v0.mp4".into()), Some(60.0), None, None)
        .unwrap();
    p.import_asset(MediaKind::Video, Some("v1.mp4".into()), Some(60.0), None, None)
        .unwrap();
    p.import_asset(MediaKind::Audio, Some("a0.wav".into()), Some(60.0), None, None)
        .unwrap();
    p
}

fn add_clip(p: &mut Project, track: usize, id: u64, asset: u64, start: f64, trim_out: f64) {
    add_clip_with(p, track, id, asset, start, trim_out, EffectParams::default());
}

fn add_clip_with(
    p: &mut Project,
    track: usize,
    id: u64,
    asset: u64,
    start: f64,
    trim_out: f64,
    effects: EffectParams,
) {
    let clip = Clip::new(
        ClipId(id),
        cutline::project::AssetId(asset),
        start,
        0.0,
        trim_out,
        1.0,
        effects,
    )
    .unwrap();
    p.timeline.add_clip(track, clip, &p.assets).unwrap();
}

#[test]
fn export_duration_matches_the_derived_timeline_duration() {
    init_tracing();
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    // 2.5s of video: 75 frames at 30fps, and a partial frame rounds up.
    add_clip(&mut p, v, 0, 0, 0.0, 2.51);

    let exporter = Exporter::new(pool());
    let mut sink = InMemorySink::new();
    let report = exporter
        .export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
        .unwrap();

    assert_eq!(report.status, ExportStatus::Completed);
    let expected = p.timeline.duration_frames();
    assert_eq!(expected, 76);
    assert_eq!(report.frames_written, expected);
    assert_eq!(sink.frames.len(), expected as usize);

    // Output duration differs from the timeline duration by under a frame.
    let encoded_sec = (sink.frames.len() as f64) / 30.0;
    assert!((encoded_sec - p.timeline.duration_sec()).abs() < 1.0 / 30.0);
}

#[test]
fn frames_arrive_in_strictly_increasing_order() {
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    add_clip(&mut p, v, 0, 0, 0.0, 2.0);

    let exporter = Exporter::new(pool());
    let mut sink = InMemorySink::new();
    exporter
        .export(
            &p,
            &mut sink,
            &ExportOpts {
                parallel: true,
                threads: Some(4),
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();

    for (i, (idx, _)) in sink.frames.iter().enumerate() {
        assert_eq!(idx.0, i as u64);
    }
}

#[test]
fn parallel_export_matches_sequential_output() {
    let mut p = base_project();
    let v0 = p.timeline.add_track(TrackKind::Video, "v0");
    let v1 = p.timeline.add_track(TrackKind::Video, "v1");
    let a0 = p.timeline.add_track(TrackKind::Audio, "a0");
    add_clip(&mut p, v0, 0, 0, 0.0, 3.0);
    add_clip_with(
        &mut p,
        v1,
        1,
        1,
        1.0,
        1.5,
        EffectParams {
            opacity: 0.6,
            fade_in_sec: 0.5,
            ..Default::default()
        },
    );
    add_clip_with(
        &mut p,
        a0,
        2,
        2,
        0.0,
        3.0,
        EffectParams {
            volume: 0.8,
            ..Default::default()
        },
    );

    let run = |parallel: bool| -> InMemorySink {
        let exporter = Exporter::new(pool());
        let mut sink = InMemorySink::new();
        exporter
            .export(
                &p,
                &mut sink,
                &ExportOpts {
                    parallel,
                    threads: parallel.then_some(4),
                    chunk_size: 16,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        sink
    };

    let seq = run(false);
    let par = run(true);

    assert_eq!(seq.frames.len(), par.frames.len());
    for ((ia, fa), (ib, fb)) in seq.frames.iter().zip(par.frames.iter()) {
        assert_eq!(ia, ib);
        assert_eq!(fa.data, fb.data);
    }
    assert_eq!(seq.audio.len(), par.audio.len());
    for ((ia, ba), (ib, bb)) in seq.audio.iter().zip(par.audio.iter()) {
        assert_eq!(ia, ib);
        assert_eq!(ba.interleaved, bb.interleaved);
    }
}

#[test]
fn repeated_exports_are_byte_identical() {
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    add_clip_with(
        &mut p,
        v,
        0,
        0,
        0.0,
        2.0,
        EffectParams {
            rotation_deg: 12.5,
            scale: 1.25,
            fade_out_sec: 0.5,
            ..Default::default()
        },
    );

    let run = || -> Vec<Vec<u8>> {
        let exporter = Exporter::new(pool());
        let mut sink = InMemorySink::new();
        exporter
            .export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
            .unwrap();
        sink.frames.into_iter().map(|(_, f)| f.data).collect()
    };

    assert_eq!(run(), run());
}

#[test]
fn audio_blocks_cover_one_second_exactly() {
    let mut p = base_project();
    let a = p.timeline.add_track(TrackKind::Audio, "a0");
    add_clip(&mut p, a, 0, 2, 0.0, 1.0);

    let exporter = Exporter::new(pool());
    let mut sink = InMemorySink::new();
    exporter
        .export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
        .unwrap();

    assert_eq!(sink.audio.len(), 30);
    let total_frames: usize = sink.audio.iter().map(|(_, b)| b.len_frames()).sum();
    assert_eq!(total_frames, MIX_SAMPLE_RATE as usize);
    // The constant 0.2 source mixes through untouched (no fades, volume 1).
    let (_, first) = &sink.audio[0];
    assert!(first.interleaved.iter().all(|&s| (s - 0.2).abs() < 1e-6));
}

#[test]
fn disabling_audio_skips_audio_blocks() {
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    let a = p.timeline.add_track(TrackKind::Audio, "a0");
    add_clip(&mut p, v, 0, 0, 0.0, 1.0);
    add_clip(&mut p, a, 1, 2, 0.0, 1.0);

    let exporter = Exporter::new(pool());
    let mut sink = InMemorySink::new();
    exporter
        .export(
            &p,
            &mut sink,
            &ExportOpts {
                enable_audio: false,
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
    assert!(sink.audio.is_empty());
    assert_eq!(sink.frames.len(), 30);
}

#[test]
fn cancellation_mid_export_discards_the_session() {
    init_tracing();
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    add_clip(&mut p, v, 0, 0, 0.0, 10.0);

    /// Sink that trips the cancel token after a few frames.
    struct CancellingSink {
        inner: InMemorySink,
        cancel: CancelToken,
        after: u64,
    }

    impl EncoderSink for CancellingSink {
        fn begin(&mut self, cfg: cutline::export::EncodeConfig) -> CutlineResult<()> {
            self.inner.begin(cfg)
        }
        fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()> {
            if idx.0 >= self.after {
                self.cancel.cancel();
            }
            self.inner.write_frame(idx, frame)
        }
        fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()> {
            self.inner.write_audio(idx, block)
        }
        fn finalize(&mut self) -> CutlineResult<()> {
            self.inner.finalize()
        }
        fn discard(&mut self) -> CutlineResult<()> {
            self.inner.discard()
        }
    }

    let cancel = CancelToken::new();
    let exporter = Exporter::new(pool());
    let mut sink = CancellingSink {
        inner: InMemorySink::new(),
        cancel: cancel.clone(),
        after: 5,
    };

    let report = exporter
        .export(&p, &mut sink, &ExportOpts::default(), &cancel)
        .unwrap();

    assert_eq!(report.status, ExportStatus::Cancelled);
    assert!(report.frames_written < 300);
    assert!(sink.inner.discarded, "partial output must be discarded");
    assert!(!sink.inner.finalized, "a cancelled export must not finalize");
}

#[test]
fn single_frame_compositing_matches_the_fade_scenario() {
    // One 10s clip with a 1s fade-in: opacity factor 0.5 at T=0.5s and 1.0
    // at T=5s.
    let mut p = base_project();
    let v = p.timeline.add_track(TrackKind::Video, "v0");
    add_clip_with(
        &mut p,
        v,
        0,
        0,
        0.0,
        10.0,
        EffectParams {
            fade_in_sec: 1.0,
            ..Default::default()
        },
    );

    let mut compositor = Compositor::new(pool());
    let half = compositor.composite_at(&p, FrameIndex(15)).unwrap();
    assert_eq!(half.frame.data[3], 128);
    let full = compositor.composite_at(&p, FrameIndex(150)).unwrap();
    assert_eq!(full.frame.data[3], 255);
}

#[test]
fn overlapping_tracks_blend_bottom_to_top() {
    let mut p = base_project();
    let v0 = p.timeline.add_track(TrackKind::Video, "bottom");
    let v1 = p.timeline.add_track(TrackKind::Video, "top");
    add_clip(&mut p, v0, 0, 0, 0.0, 2.0);
    add_clip(&mut p, v1, 1, 1, 0.0, 2.0);

    let mut compositor = Compositor::new(pool());
    let out = compositor.composite_at(&p, FrameIndex(0)).unwrap();
    // The top layer is opaque, so its asset-derived red channel (51) wins
    // over the bottom layer's (50).
    assert_eq!(out.frame.data[0], 51);
}
