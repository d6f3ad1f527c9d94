use crate::effects::params::EffectParams;
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::asset::AssetId;

/// Stable identifier for a clip placement.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ClipId(pub u64);

/// One placement of an asset on a track.
///
/// `trim_in_sec..trim_out_sec` selects the source span; `speed` maps it onto
/// the timeline, so the clip occupies
/// `[start_sec, start_sec + (trim_out - trim_in) / speed)`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub asset: AssetId,
    pub start_sec: f64,
    pub trim_in_sec: f64,
    pub trim_out_sec: f64,
    pub speed: f64,
    #[serde(default)]
    pub effects: EffectParams,
    /// Insertion order within the owning track; not persisted.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Clip {
    pub fn new(
        id: ClipId,
        asset: AssetId,
        start_sec: f64,
        trim_in_sec: f64,
        trim_out_sec: f64,
        speed: f64,
        effects: EffectParams,
    ) -> CutlineResult<Self> {
        let clip = Self {
            id,
            asset,
            start_sec,
            trim_in_sec,
            trim_out_sec,
            speed,
            effects,
            seq: 0,
        };
        clip.validate_times()?;
        Ok(clip)
    }

    /// Validate the placement and trim fields (effect parameters are checked
    /// against the owning track's kind separately).
    pub fn validate_times(&self) -> CutlineResult<()> {
        for (name, v) in [
            ("start_sec", self.start_sec),
            ("trim_in_sec", self.trim_in_sec),
            ("trim_out_sec", self.trim_out_sec),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(CutlineError::validation(format!(
                    "clip {} {name} must be finite and >= 0",
                    self.id.0
                )));
            }
        }
        if self.trim_in_sec >= self.trim_out_sec {
            return Err(CutlineError::validation(format!(
                "clip {} trim_in_sec must be < trim_out_sec",
                self.id.0
            )));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(CutlineError::validation(format!(
                "clip {} speed must be finite and > 0",
                self.id.0
            )));
        }
        Ok(())
    }

    /// Timeline duration in seconds, after the speed mapping.
    pub fn duration_sec(&self) -> f64 {
        (self.trim_out_sec - self.trim_in_sec) / self.speed
    }

    /// Exclusive timeline end in seconds.
    pub fn end_sec(&self) -> f64 {
        self.start_sec + self.duration_sec()
    }

    /// Return `true` when the clip is active at timeline time `t`.
    pub fn contains(&self, t: f64) -> bool {
        self.start_sec <= t && t < self.end_sec()
    }

    /// Map timeline time to source time: `(t - start) * speed + trim_in`.
    pub fn source_time_sec(&self, t: f64) -> f64 {
        (t - self.start_sec) * self.speed + self.trim_in_sec
    }

    /// Seconds elapsed since the clip start in timeline time, for envelopes.
    pub fn elapsed_sec(&self, t: f64) -> f64 {
        t - self.start_sec
    }
}
