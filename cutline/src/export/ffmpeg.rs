use std::fs::File;
use std::io::{BufWriter, Read, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::Context as _;

use crate::compose::audio::AudioBlock;
use crate::export::encoder::{EncodeConfig, EncoderSink};
use crate::foundation::core::{Fps, FrameIndex, FrameRgba};
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::foundation::math::mul_div255_u16;

/// Options for [`FfmpegEncoder`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegEncoderOpts {
    /// Final MP4 path. Only written by a successful `finalize`.
    pub out_path: PathBuf,
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
    /// Background color used to flatten alpha (straight RGBA8).
    pub bg_rgba: [u8; 4],
}

impl FfmpegEncoderOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            bg_rgba: [0, 0, 0, 255],
        }
    }
}

/// Encoder session backed by the system `ffmpeg` binary.
///
/// Runs in two stages so the final path only ever holds complete output:
/// frames stream into a temporary video-only MP4 while audio blocks spool
/// into a raw `f32le` sidecar; `finalize` muxes the two and renames the
/// result into place. `discard` kills the child and removes the temp files.
pub struct FfmpegEncoder {
    opts: FfmpegEncoderOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    audio_writer: Option<BufWriter<File>>,

    video_tmp: PathBuf,
    audio_tmp: PathBuf,

    scratch: Vec<u8>,
    cfg: Option<EncodeConfig>,
    last_frame_idx: Option<FrameIndex>,
    last_audio_idx: Option<FrameIndex>,
    wrote_audio: bool,
}

impl FfmpegEncoder {
    pub fn new(opts: FfmpegEncoderOpts) -> Self {
        let video_tmp = opts.out_path.with_extension("video.part.mp4");
        let audio_tmp = opts.out_path.with_extension("audio.part.f32le");
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            audio_writer: None,
            video_tmp,
            audio_tmp,
            scratch: Vec::new(),
            cfg: None,
            last_frame_idx: None,
            last_audio_idx: None,
            wrote_audio: false,
        }
    }

    fn cleanup_temps(&self) {
        let _ = std::fs::remove_file(&self.video_tmp);
        let _ = std::fs::remove_file(&self.audio_tmp);
    }

    fn wait_for_video(&mut self) -> CutlineResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CutlineError::encode("ffmpeg session not started"))?;

        let status = child
            .wait()
            .map_err(|e| CutlineError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CutlineError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| CutlineError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(CutlineError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn mux_audio_and_rename(&mut self) -> CutlineResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CutlineError::encode("ffmpeg session not started"))?;
        let audio = cfg
            .audio
            .ok_or_else(|| CutlineError::encode("audio mux requested without audio config"))?;

        let mux_tmp = self.opts.out_path.with_extension("mux.part.mp4");
        let out = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(&self.video_tmp)
            .args([
                "-f",
                "f32le",
                "-ar",
                &audio.sample_rate.to_string(),
                "-ac",
                &audio.channels.to_string(),
                "-i",
            ])
            .arg(&self.audio_tmp)
            .args(["-c:v", "copy", "-c:a", "aac", "-shortest", "-movflags", "+faststart"])
            .arg(&mux_tmp)
            .output()
            .map_err(|e| CutlineError::encode(format!("failed to run ffmpeg for mux: {e}")))?;

        if !out.status.success() {
            let _ = std::fs::remove_file(&mux_tmp);
            return Err(CutlineError::encode(format!(
                "ffmpeg mux failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        std::fs::rename(&mux_tmp, &self.opts.out_path).map_err(|e| {
            let _ = std::fs::remove_file(&mux_tmp);
            CutlineError::encode(format!(
                "rename output into '{}': {e}",
                self.opts.out_path.display()
            ))
        })
    }
}

impl EncoderSink for FfmpegEncoder {
    fn begin(&mut self, cfg: EncodeConfig) -> CutlineResult<()> {
        cfg.validate()?;
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(CutlineError::validation(
                "encode width/height must be even (required for yuv420p mp4 output)",
            ));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(CutlineError::validation(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(CutlineError::encode(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Stage one always writes the temp video; overwrite it freely.
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"]);
        cmd.arg(&self.video_tmp);

        let mut child = cmd.spawn().map_err(|e| {
            CutlineError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CutlineError::encode("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CutlineError::encode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        if cfg.audio.is_some() {
            let file = File::create(&self.audio_tmp).with_context(|| {
                format!("create audio spool file '{}'", self.audio_tmp.display())
            })?;
            self.audio_writer = Some(BufWriter::new(file));
        }

        self.scratch = vec![0u8; (cfg.width * cfg.height * 4) as usize];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_frame_idx = None;
        self.last_audio_idx = None;
        self.wrote_audio = false;
        Ok(())
    }

    fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CutlineError::encode("ffmpeg session not started"))?;
        if let Some(last) = self.last_frame_idx
            && idx.0 <= last.0
        {
            return Err(CutlineError::encode("out-of-order frame index"));
        }
        self.last_frame_idx = Some(idx);

        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(CutlineError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        if frame.data.len() != self.scratch.len() {
            return Err(CutlineError::validation(
                "frame data size mismatch with width*height*4",
            ));
        }

        flatten_premul_over_bg_to_opaque_rgba8(&mut self.scratch, &frame.data, self.opts.bg_rgba)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(CutlineError::encode("ffmpeg session is already finalized"));
        };
        stdin.write_all(&self.scratch).map_err(|e| {
            CutlineError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()> {
        if self.cfg.is_none() {
            return Err(CutlineError::encode("ffmpeg session not started"));
        }
        if let Some(last) = self.last_audio_idx
            && idx.0 <= last.0
        {
            return Err(CutlineError::encode("out-of-order audio index"));
        }
        self.last_audio_idx = Some(idx);

        let Some(writer) = self.audio_writer.as_mut() else {
            // Session was configured without audio; blocks are dropped.
            return Ok(());
        };
        for &sample in &block.interleaved {
            writer.write_all(&sample.to_le_bytes()).map_err(|e| {
                CutlineError::encode(format!("failed to spool audio samples: {e}"))
            })?;
        }
        self.wrote_audio |= !block.interleaved.is_empty();
        Ok(())
    }

    fn finalize(&mut self) -> CutlineResult<()> {
        if let Some(mut writer) = self.audio_writer.take() {
            writer
                .flush()
                .map_err(|e| CutlineError::encode(format!("failed to flush audio spool: {e}")))?;
        }

        let video_result = self.wait_for_video();
        if let Err(e) = video_result {
            self.cleanup_temps();
            return Err(e);
        }

        let result = if self.wrote_audio {
            self.mux_audio_and_rename()
        } else {
            std::fs::rename(&self.video_tmp, &self.opts.out_path).map_err(|e| {
                CutlineError::encode(format!(
                    "rename output into '{}': {e}",
                    self.opts.out_path.display()
                ))
            })
        };

        self.cleanup_temps();
        self.cfg = None;
        result
    }

    fn discard(&mut self) -> CutlineResult<()> {
        drop(self.stdin.take());
        self.audio_writer = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
        self.cleanup_temps();
        self.cfg = None;
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // An unfinished session must not leave a child or partial files.
        if self.child.is_some() {
            let _ = self.discard();
        }
    }
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // Rawvideo input takes its frame rate from `-r` before `-i`.
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

fn flatten_premul_over_bg_to_opaque_rgba8(
    dst: &mut [u8],
    src_premul: &[u8],
    bg_rgba: [u8; 4],
) -> CutlineResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(CutlineError::validation(
            "flatten expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = u16::from(bg_rgba[0]);
    let bg_g = u16::from(bg_rgba[1]);
    let bg_b = u16::from(bg_rgba[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            d[3] = 255;
            continue;
        }

        let inv = 255u16 - a;
        let r = u16::from(s[0]) + mul_div255_u16(bg_r, inv);
        let g = u16::from(s[1]) + mul_div255_u16(bg_g, inv);
        let b = u16::from(s[2]) + mul_div255_u16(bg_b, inv);

        d[0] = r.min(255) as u8;
        d[1] = g.min(255) as u8;
        d[2] = b.min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> CutlineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_premul_alpha_0_returns_bg() {
        let src = vec![0u8, 0, 0, 0];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [10, 20, 30, 255]).unwrap();
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn flatten_premul_alpha_255_is_identity() {
        let src = vec![1u8, 2, 3, 255];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [10, 20, 30, 255]).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn flatten_blends_partial_alpha_over_bg() {
        // Premultiplied 50% red over a white background.
        let src = vec![128u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [255, 255, 255, 255]).unwrap();
        assert_eq!(dst[3], 255);
        assert!(dst[0] > 200);
        assert!(dst[1] > 100 && dst[1] < 160);
    }

    #[test]
    fn temp_paths_sit_next_to_the_output() {
        let enc = FfmpegEncoder::new(FfmpegEncoderOpts::new("out/movie.mp4"));
        assert_eq!(enc.video_tmp, PathBuf::from("out/movie.video.part.mp4"));
        assert_eq!(enc.audio_tmp, PathBuf::from("out/movie.audio.part.f32le"));
    }
}
