use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::core::FrameRgba;
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::media::probe::probe_media;
use crate::project::asset::{Asset, MediaKind};

/// Sample rate all audio is resampled to before mixing.
pub const MIX_SAMPLE_RATE: u32 = 48_000;
/// Channel count used throughout the mixer.
pub const MIX_CHANNELS: u16 = 2;

/// Number of frames decoded per ffmpeg seek.
const PREFETCH_FRAMES: u32 = 12;
/// Decoded frames kept per source.
const FRAME_CACHE_CAPACITY: usize = 64;

/// A decode request against one media source.
#[derive(Clone, Copy, Debug)]
pub enum DecodeRequest {
    /// The video frame nearest to `source_time_sec`.
    VideoFrame { source_time_sec: f64 },
    /// Up to `max_frames` interleaved sample frames starting at the sample
    /// nearest to `source_time_sec`, at the source's native mix rate.
    AudioSpan {
        source_time_sec: f64,
        max_frames: usize,
    },
}

/// Result of a decode request.
#[derive(Clone, Debug)]
pub enum Decoded {
    Frame(FrameRgba),
    Audio(AudioChunk),
    /// The request lies at or past the end of the stream, or the source has
    /// no stream of the requested kind.
    EndOfStream,
}

/// A span of interleaved f32 samples.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample index of the first frame within the source stream.
    pub start_frame: u64,
    pub interleaved: Vec<f32>,
}

impl AudioChunk {
    pub fn len_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.interleaved.len() / usize::from(self.channels)
    }
}

/// One exclusive decode cursor over a media source.
///
/// Implementations are stateful (seek position, frame cache) and must never
/// be shared between threads without the pool's checkout discipline. Closing
/// happens on drop.
pub trait MediaSource: Send {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded>;
}

/// Factory for decode cursors, implemented by the production ffmpeg opener
/// and by synthetic sources in tests.
pub trait SourceOpener: Send + Sync {
    fn open(&self, asset: &Asset) -> CutlineResult<Box<dyn MediaSource>>;
}

/// Production opener backed by the system `ffmpeg`/`ffprobe` binaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegOpener;

impl SourceOpener for FfmpegOpener {
    fn open(&self, asset: &Asset) -> CutlineResult<Box<dyn MediaSource>> {
        match asset.kind {
            MediaKind::Video => {
                let path = require_path(asset)?;
                Ok(Box::new(VideoFileSource::open(path)?))
            }
            MediaKind::Image => {
                let path = require_path(asset)?;
                Ok(Box::new(ImageSource::open(path)?))
            }
            MediaKind::Audio => {
                let path = require_path(asset)?;
                Ok(Box::new(AudioFileSource::open(path)?))
            }
            MediaKind::Title => Ok(Box::new(TitleSource)),
        }
    }
}

fn require_path(asset: &Asset) -> CutlineResult<&Path> {
    asset
        .path
        .as_deref()
        .ok_or_else(|| CutlineError::decode(format!("asset {} has no source path", asset.id.0)))
}

/// Stateful video decode cursor with batch prefetch and a bounded LRU cache.
///
/// Each miss seeks `ffmpeg` to the enclosing prefetch window and decodes a
/// short run of frames, so sequential playback touches the decoder once per
/// window rather than once per frame.
struct VideoFileSource {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    duration_sec: Option<f64>,
    frame_cache: HashMap<u64, Arc<Vec<u8>>>,
    lru: VecDeque<u64>,
    /// Soundtrack PCM, decoded on the first audio request. Video clips on
    /// audio tracks read their soundtrack through this.
    audio_pcm: Option<Arc<Vec<f32>>>,
}

impl VideoFileSource {
    fn open(path: &Path) -> CutlineResult<Self> {
        let probe = probe_media(path)?;
        let video = probe.video.ok_or_else(|| {
            CutlineError::decode(format!("no video stream in '{}'", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            width: video.width,
            height: video.height,
            fps: video.fps.as_f64(),
            duration_sec: probe.duration_sec,
            frame_cache: HashMap::new(),
            lru: VecDeque::new(),
            audio_pcm: None,
        })
    }

    /// Nearest source frame number for a source timestamp.
    fn frame_key(&self, source_time_sec: f64) -> u64 {
        (source_time_sec.max(0.0) * self.fps).round() as u64
    }

    fn decode_frame(&mut self, source_time_sec: f64) -> CutlineResult<Decoded> {
        if let Some(end) = self.duration_sec
            && source_time_sec >= end + 0.5 / self.fps
        {
            return Ok(Decoded::EndOfStream);
        }

        let key = self.frame_key(source_time_sec);
        if let Some(data) = self.frame_cache.get(&key).cloned() {
            self.touch(key);
            return Ok(Decoded::Frame(self.to_frame(&data)));
        }

        let window_start = key - (key % u64::from(PREFETCH_FRAMES));
        let start_time_sec = (window_start as f64) / self.fps;
        let frames = decode_video_frames_rgba8(
            &self.path,
            self.width,
            self.height,
            start_time_sec,
            PREFETCH_FRAMES,
        )?;
        for (offset, data) in frames.into_iter().enumerate() {
            self.insert_frame(window_start + offset as u64, Arc::new(data));
        }

        match self.frame_cache.get(&key).cloned() {
            Some(data) => {
                self.touch(key);
                Ok(Decoded::Frame(self.to_frame(&data)))
            }
            // The batch came up short of the requested key: the stream ended.
            None => Ok(Decoded::EndOfStream),
        }
    }

    fn to_frame(&self, data: &Arc<Vec<u8>>) -> FrameRgba {
        FrameRgba {
            width: self.width,
            height: self.height,
            data: data.as_ref().clone(),
            // Decoded frames are opaque, which is trivially premultiplied.
            premultiplied: true,
        }
    }

    fn insert_frame(&mut self, key: u64, data: Arc<Vec<u8>>) {
        self.frame_cache.insert(key, data);
        self.touch(key);
        while self.lru.len() > FRAME_CACHE_CAPACITY {
            if let Some(old) = self.lru.pop_front() {
                self.frame_cache.remove(&old);
            }
        }
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.lru.iter().position(|&k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
    }
}

impl MediaSource for VideoFileSource {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match request {
            DecodeRequest::VideoFrame { source_time_sec } => self.decode_frame(source_time_sec),
            DecodeRequest::AudioSpan {
                source_time_sec,
                max_frames,
            } => {
                if self.audio_pcm.is_none() {
                    self.audio_pcm = Some(Arc::new(decode_audio_f32_stereo(
                        &self.path,
                        MIX_SAMPLE_RATE,
                    )?));
                }
                let pcm = self.audio_pcm.clone().unwrap_or_default();
                Ok(serve_audio_span(&pcm, source_time_sec, max_frames))
            }
        }
    }
}

/// Still image source: decodes once, serves the same frame for any timestamp.
struct ImageSource {
    frame: FrameRgba,
}

impl ImageSource {
    fn open(path: &Path) -> CutlineResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read image file '{}'", path.display()))?;
        let dyn_img = image::load_from_memory(&bytes)
            .map_err(|e| CutlineError::decode(format!("decode image '{}': {e}", path.display())))?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut data = rgba.into_raw();
        premultiply_rgba8_in_place(&mut data);

        Ok(Self {
            frame: FrameRgba {
                width,
                height,
                data,
                premultiplied: true,
            },
        })
    }
}

impl MediaSource for ImageSource {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match request {
            DecodeRequest::VideoFrame { .. } => Ok(Decoded::Frame(self.frame.clone())),
            DecodeRequest::AudioSpan { .. } => Ok(Decoded::EndOfStream),
        }
    }
}

/// Blank source behind pure text/title clips.
struct TitleSource;

impl MediaSource for TitleSource {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match request {
            DecodeRequest::VideoFrame { .. } => Ok(Decoded::Frame(FrameRgba {
                width: 1,
                height: 1,
                data: vec![0, 0, 0, 0],
                premultiplied: true,
            })),
            DecodeRequest::AudioSpan { .. } => Ok(Decoded::EndOfStream),
        }
    }
}

/// Audio source: the whole file is decoded to 48 kHz stereo f32 once at open,
/// then spans are served from memory.
struct AudioFileSource {
    pcm: Arc<Vec<f32>>,
}

impl AudioFileSource {
    fn open(path: &Path) -> CutlineResult<Self> {
        let pcm = decode_audio_f32_stereo(path, MIX_SAMPLE_RATE)?;
        Ok(Self { pcm: Arc::new(pcm) })
    }
}

impl MediaSource for AudioFileSource {
    fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match request {
            DecodeRequest::VideoFrame { .. } => Ok(Decoded::EndOfStream),
            DecodeRequest::AudioSpan {
                source_time_sec,
                max_frames,
            } => Ok(serve_audio_span(&self.pcm, source_time_sec, max_frames)),
        }
    }
}

/// Slice a span out of fully decoded mix-rate stereo PCM.
fn serve_audio_span(pcm: &[f32], source_time_sec: f64, max_frames: usize) -> Decoded {
    let channels = usize::from(MIX_CHANNELS);
    let total_frames = pcm.len() / channels;
    let start = (source_time_sec.max(0.0) * f64::from(MIX_SAMPLE_RATE)).floor() as u64;
    if start as usize >= total_frames {
        return Decoded::EndOfStream;
    }
    let end = (start as usize + max_frames).min(total_frames);
    Decoded::Audio(AudioChunk {
        sample_rate: MIX_SAMPLE_RATE,
        channels: MIX_CHANNELS,
        start_frame: start,
        interleaved: pcm[start as usize * channels..end * channels].to_vec(),
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 255 {
            continue;
        }
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((u16::from(px[0]) * a + 127) / 255) as u8;
        px[1] = ((u16::from(px[1]) * a + 127) / 255) as u8;
        px[2] = ((u16::from(px[2]) * a + 127) / 255) as u8;
    }
}

fn decode_video_frames_rgba8(
    path: &Path,
    width: u32,
    height: u32,
    start_time_sec: f64,
    frame_count: u32,
) -> CutlineResult<Vec<Vec<u8>>> {
    if frame_count == 0 {
        return Ok(Vec::new());
    }

    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{start_time_sec:.9}")])
        .arg("-i")
        .arg(path)
        .args([
            "-frames:v",
            &frame_count.to_string(),
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "pipe:1",
        ])
        .output()
        .map_err(|e| CutlineError::decode(format!("failed to run ffmpeg for video decode: {e}")))?;

    if !out.status.success() {
        return Err(CutlineError::decode(format!(
            "ffmpeg video decode failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let expected_len = width as usize * height as usize * 4;
    if expected_len == 0 {
        return Err(CutlineError::decode(
            "decoded video frame size is zero (invalid source dimensions)",
        ));
    }
    if !out.stdout.len().is_multiple_of(expected_len) {
        return Err(CutlineError::decode(format!(
            "decoded video batch has invalid size: got {} bytes, expected multiples of {expected_len}",
            out.stdout.len()
        )));
    }

    let available = (out.stdout.len() / expected_len).min(frame_count as usize);
    let mut frames = Vec::with_capacity(available);
    for idx in 0..available {
        let off = idx * expected_len;
        frames.push(out.stdout[off..off + expected_len].to_vec());
    }
    Ok(frames)
}

fn decode_audio_f32_stereo(path: &Path, sample_rate: u32) -> CutlineResult<Vec<f32>> {
    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            "2",
            "-ar",
            &sample_rate.to_string(),
            "pipe:1",
        ])
        .output()
        .map_err(|e| CutlineError::decode(format!("failed to run ffmpeg for audio decode: {e}")))?;

    if !out.status.success() {
        let msg = String::from_utf8_lossy(&out.stderr);
        // ffmpeg reports the absence of an audio stream as an error; treat it
        // as empty PCM so video files without soundtracks still open.
        if msg.contains("Stream specifier")
            || msg.contains("matches no streams")
            || msg.contains("does not contain any stream")
        {
            return Ok(Vec::new());
        }
        return Err(CutlineError::decode(format!(
            "ffmpeg audio decode failed for '{}': {}",
            path.display(),
            msg.trim()
        )));
    }

    if !out.stdout.len().is_multiple_of(4) {
        return Err(CutlineError::decode(
            "decoded audio byte length is not aligned to f32 samples",
        ));
    }
    let mut pcm = Vec::<f32>::with_capacity(out.stdout.len() / 4);
    for chunk in out.stdout.chunks_exact(4) {
        pcm.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiply_scales_color_by_alpha() {
        let mut px = vec![100u8, 50, 200, 128];
        premultiply_rgba8_in_place(&mut px);
        assert_eq!(
            px,
            vec![
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128
            ]
        );
    }

    #[test]
    fn premultiply_zero_alpha_clears_color() {
        let mut px = vec![10u8, 20, 30, 0];
        premultiply_rgba8_in_place(&mut px);
        assert_eq!(px, vec![0, 0, 0, 0]);
    }

    #[test]
    fn title_source_serves_a_transparent_pixel() {
        let mut src = TitleSource;
        match src
            .decode_at(DecodeRequest::VideoFrame {
                source_time_sec: 3.0,
            })
            .unwrap()
        {
            Decoded::Frame(f) => {
                assert_eq!((f.width, f.height), (1, 1));
                assert_eq!(f.data, vec![0, 0, 0, 0]);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn audio_source_spans_respect_bounds() {
        let mut src = AudioFileSource {
            pcm: Arc::new(vec![0.5f32; 2 * 100]),
        };
        match src
            .decode_at(DecodeRequest::AudioSpan {
                source_time_sec: 0.0,
                max_frames: 40,
            })
            .unwrap()
        {
            Decoded::Audio(chunk) => {
                assert_eq!(chunk.len_frames(), 40);
                assert_eq!(chunk.start_frame, 0);
            }
            other => panic!("expected audio, got {other:?}"),
        }

        // Requests past the decoded stream end the stream.
        match src
            .decode_at(DecodeRequest::AudioSpan {
                source_time_sec: 10.0,
                max_frames: 40,
            })
            .unwrap()
        {
            Decoded::EndOfStream => {}
            other => panic!("expected end of stream, got {other:?}"),
        }
    }
}
