use std::path::Path;

use crate::foundation::core::Fps;
use crate::foundation::error::{CutlineError, CutlineResult};

/// Metadata extracted from a source media file.
#[derive(Clone, Debug)]
pub struct MediaProbe {
    pub duration_sec: Option<f64>,
    pub video: Option<VideoStreamInfo>,
    pub has_audio: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
}

/// Probe a media file with the system `ffprobe`.
pub fn probe_media(source_path: &Path) -> CutlineResult<MediaProbe> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| CutlineError::decode(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(CutlineError::decode(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| CutlineError::decode(format!("ffprobe json parse failed: {e}")))?;

    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok());

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| -> CutlineResult<VideoStreamInfo> {
            let width = s
                .width
                .ok_or_else(|| CutlineError::decode("missing video width from ffprobe"))?;
            let height = s
                .height
                .ok_or_else(|| CutlineError::decode("missing video height from ffprobe"))?;
            let (num, den) = parse_ff_ratio(s.r_frame_rate.as_deref().unwrap_or("0/1"))
                .ok_or_else(|| CutlineError::decode("invalid video r_frame_rate"))?;
            Ok(VideoStreamInfo {
                width,
                height,
                fps: Fps::new(num, den)?,
            })
        })
        .transpose()?;

    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaProbe {
        duration_sec,
        video,
        has_audio,
    })
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if a == 0 || b == 0 {
        return None;
    }
    Some((a, b))
}
