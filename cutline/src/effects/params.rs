use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::track::TrackKind;

/// Per-clip effect parameters.
///
/// All fields are validated when the clip is attached to a track (or when the
/// parameter set is replaced through an edit command), never at render time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EffectParams {
    /// Base opacity in `[0, 1]`, multiplied by the fade envelope per frame.
    pub opacity: f64,
    /// Uniform scale factor, must be finite and > 0.
    pub scale: f64,
    /// Rotation in degrees (counter-clockwise).
    pub rotation_deg: f64,
    /// Linear fade-in duration in timeline seconds.
    pub fade_in_sec: f64,
    /// Linear fade-out duration in timeline seconds.
    pub fade_out_sec: f64,
    /// Placement offset from the canvas center, in pixels.
    pub offset_px: [f64; 2],
    /// Color-keyed transparency substitution.
    pub chroma_key: Option<ChromaKey>,
    /// Desaturate to Rec. 601 luma.
    pub grayscale: bool,
    /// Gaussian blur pass.
    pub blur: Option<Blur>,
    /// Text rendered on top of the clip layer.
    pub text: Option<TextOverlay>,
    /// Linear gain for audio clips.
    pub volume: f64,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            scale: 1.0,
            rotation_deg: 0.0,
            fade_in_sec: 0.0,
            fade_out_sec: 0.0,
            offset_px: [0.0, 0.0],
            chroma_key: None,
            grayscale: false,
            blur: None,
            text: None,
            volume: 1.0,
        }
    }
}

impl EffectParams {
    /// Validate against the owning track kind and the clip's timeline duration.
    pub fn validate(&self, kind: TrackKind, clip_duration_sec: f64) -> CutlineResult<()> {
        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(CutlineError::validation("opacity must be within [0, 1]"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(CutlineError::validation("scale must be finite and > 0"));
        }
        if !self.rotation_deg.is_finite() {
            return Err(CutlineError::validation("rotation_deg must be finite"));
        }
        for (name, fade) in [("fade_in_sec", self.fade_in_sec), ("fade_out_sec", self.fade_out_sec)]
        {
            if !fade.is_finite() || fade < 0.0 {
                return Err(CutlineError::validation(format!(
                    "{name} must be finite and >= 0"
                )));
            }
            if fade > clip_duration_sec {
                return Err(CutlineError::validation(format!(
                    "{name} must not exceed the clip duration"
                )));
            }
        }
        if !self.offset_px.iter().all(|v| v.is_finite()) {
            return Err(CutlineError::validation("offset_px must be finite"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(CutlineError::validation("volume must be finite and >= 0"));
        }

        if let Some(key) = &self.chroma_key {
            key.validate()?;
        }
        if let Some(blur) = &self.blur {
            blur.validate()?;
        }
        if let Some(text) = &self.text {
            text.validate()?;
        }

        match kind {
            TrackKind::Audio => {
                if self.chroma_key.is_some()
                    || self.text.is_some()
                    || self.blur.is_some()
                    || self.grayscale
                    || self.scale != 1.0
                    || self.rotation_deg != 0.0
                {
                    return Err(CutlineError::validation(
                        "visual effect parameters are not valid on audio tracks",
                    ));
                }
            }
            TrackKind::Video => {
                if self.text.is_some() {
                    return Err(CutlineError::validation(
                        "text overlays are only valid on overlay tracks",
                    ));
                }
                if self.volume != 1.0 {
                    return Err(CutlineError::validation(
                        "volume is only valid on audio tracks",
                    ));
                }
            }
            TrackKind::Overlay => {
                if self.volume != 1.0 {
                    return Err(CutlineError::validation(
                        "volume is only valid on audio tracks",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Return `true` when nothing alters the decoded pixels before placement.
    pub(crate) fn is_pixel_neutral(&self) -> bool {
        self.chroma_key.is_none() && !self.grayscale && self.blur.is_none()
    }
}

/// Color-keyed transparency (green-screen removal).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChromaKey {
    /// Key color as straight RGB8.
    pub color: [u8; 3],
    /// Normalized distance below which pixels become fully transparent.
    pub tolerance: f64,
    /// Width of the partial-transparency band above `tolerance`.
    pub softness: f64,
}

impl ChromaKey {
    pub fn validate(&self) -> CutlineResult<()> {
        for (name, v) in [("tolerance", self.tolerance), ("softness", self.softness)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(CutlineError::validation(format!(
                    "chroma_key {name} must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Separable Gaussian blur parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Blur {
    /// Kernel radius in pixels, at most 256.
    pub radius_px: u32,
    /// Gaussian sigma; defaults to `radius_px / 2` when omitted in documents.
    #[serde(default)]
    pub sigma: Option<f32>,
}

impl Blur {
    pub fn validate(&self) -> CutlineResult<()> {
        if self.radius_px > 256 {
            return Err(CutlineError::validation("blur radius_px must be <= 256"));
        }
        if let Some(sigma) = self.sigma
            && (!sigma.is_finite() || sigma <= 0.0)
        {
            return Err(CutlineError::validation("blur sigma must be finite and > 0"));
        }
        Ok(())
    }

    pub(crate) fn effective_sigma(&self) -> f32 {
        self.sigma.unwrap_or((self.radius_px as f32) / 2.0)
    }
}

/// Text composited on top of an overlay clip layer.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextOverlay {
    pub text: String,
    /// Path to a TrueType/OpenType font file.
    pub font_source: String,
    pub size_px: f64,
    /// Fill color as straight RGBA8.
    pub color: [u8; 4],
    #[serde(default)]
    pub anchor: TextAnchor,
    #[serde(default)]
    pub animation: TextAnimation,
    #[serde(default)]
    pub shadow: Option<TextShadow>,
    #[serde(default)]
    pub outline: Option<TextOutline>,
}

impl TextOverlay {
    pub fn validate(&self) -> CutlineResult<()> {
        if self.text.is_empty() {
            return Err(CutlineError::validation("text overlay text must be non-empty"));
        }
        if self.font_source.trim().is_empty() {
            return Err(CutlineError::validation(
                "text overlay font_source must be non-empty",
            ));
        }
        if !self.size_px.is_finite() || self.size_px <= 0.0 {
            return Err(CutlineError::validation(
                "text overlay size_px must be finite and > 0",
            ));
        }
        if let Some(outline) = &self.outline
            && outline.width_px == 0
        {
            return Err(CutlineError::validation(
                "text overlay outline width_px must be > 0",
            ));
        }
        Ok(())
    }
}

/// Anchor position for text overlays, with a fixed 10 px canvas margin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAnchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    #[default]
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// Text overlay entrance animation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAnimation {
    #[default]
    None,
    /// Text alpha follows the clip fade envelope.
    Fade,
    /// Text glides toward its anchor over the fade-in window.
    SlideIn,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextShadow {
    pub color: [u8; 4],
    pub offset_px: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextOutline {
    pub color: [u8; 4],
    pub width_px: u32,
}
