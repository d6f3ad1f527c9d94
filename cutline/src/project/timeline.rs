use crate::effects::params::EffectParams;
use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::asset::{Asset, AssetId, AssetLibrary, MediaKind};
use crate::project::clip::{Clip, ClipId};
use crate::project::track::{Track, TrackKind};

/// Global output settings for preview and export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
}

impl OutputSettings {
    pub fn validate(&self) -> CutlineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CutlineError::validation(
                "output width/height must be non-zero",
            ));
        }
        Fps::new(self.fps.num, self.fps.den)?;
        Ok(())
    }

    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
        }
    }
}

/// The full ordered composition: tracks bottom-to-top plus output settings.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Timeline {
    pub output: OutputSettings,
    tracks: Vec<Track>,
    #[serde(skip)]
    next_clip_id: u64,
}

impl Timeline {
    pub fn new(output: OutputSettings) -> CutlineResult<Self> {
        output.validate()?;
        Ok(Self {
            output,
            tracks: Vec::new(),
            next_clip_id: 0,
        })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> CutlineResult<&Track> {
        self.tracks
            .get(index)
            .ok_or_else(|| CutlineError::validation(format!("unknown track index {index}")))
    }

    fn track_mut(&mut self, index: usize) -> CutlineResult<&mut Track> {
        self.tracks
            .get_mut(index)
            .ok_or_else(|| CutlineError::validation(format!("unknown track index {index}")))
    }

    /// Append a track and return its index.
    pub fn add_track(&mut self, kind: TrackKind, name: impl Into<String>) -> usize {
        self.tracks.push(Track::new(kind, name));
        self.tracks.len() - 1
    }

    /// Insert a previously removed track back at `index`.
    pub fn insert_track(&mut self, index: usize, track: Track) -> CutlineResult<()> {
        if index > self.tracks.len() {
            return Err(CutlineError::validation(format!(
                "track insert index {index} is out of bounds"
            )));
        }
        track.validate()?;
        self.tracks.insert(index, track);
        Ok(())
    }

    /// Remove a track and everything on it.
    pub fn remove_track(&mut self, index: usize) -> CutlineResult<Track> {
        if index >= self.tracks.len() {
            return Err(CutlineError::validation(format!(
                "unknown track index {index}"
            )));
        }
        Ok(self.tracks.remove(index))
    }

    /// Allocate a fresh clip id.
    pub fn allocate_clip_id(&mut self) -> ClipId {
        let id = ClipId(self.next_clip_id);
        self.next_clip_id += 1;
        id
    }

    /// Place a clip on a track after full validation: the asset must exist,
    /// match the track kind, cover the trimmed span, and the effect
    /// parameters must be valid for the track kind.
    pub fn add_clip(
        &mut self,
        track_index: usize,
        clip: Clip,
        assets: &AssetLibrary,
    ) -> CutlineResult<()> {
        let kind = self.track(track_index)?.kind;
        validate_clip_against(&clip, kind, assets)?;
        self.next_clip_id = self.next_clip_id.max(clip.id.0 + 1);
        self.track_mut(track_index)?.insert(clip)
    }

    pub fn remove_clip(&mut self, track_index: usize, id: ClipId) -> CutlineResult<Clip> {
        self.track_mut(track_index)?.remove(id)
    }

    /// Move a clip to a new start offset on the same track.
    pub fn move_clip(
        &mut self,
        track_index: usize,
        id: ClipId,
        new_start_sec: f64,
    ) -> CutlineResult<f64> {
        let track = self.track(track_index)?;
        let clip = track
            .get(id)
            .ok_or_else(|| CutlineError::validation(format!("unknown clip id {}", id.0)))?;

        let mut moved = clip.clone();
        moved.start_sec = new_start_sec;
        moved.validate_times()?;
        if let Some(other) = track.find_overlap(&moved, Some(id)) {
            return Err(CutlineError::validation(format!(
                "moving clip {} would overlap clip {}",
                id.0, other.0
            )));
        }

        let track = self.track_mut(track_index)?;
        let old = track.remove(id)?;
        let old_start = old.start_sec;
        let mut clip = old;
        clip.start_sec = new_start_sec;
        track.insert(clip)?;
        Ok(old_start)
    }

    /// Change a clip's trim window, preserving its start offset.
    pub fn retrim_clip(
        &mut self,
        track_index: usize,
        id: ClipId,
        trim_in_sec: f64,
        trim_out_sec: f64,
        assets: &AssetLibrary,
    ) -> CutlineResult<(f64, f64)> {
        self.edit_clip(track_index, id, assets, |clip| {
            let old = (clip.trim_in_sec, clip.trim_out_sec);
            clip.trim_in_sec = trim_in_sec;
            clip.trim_out_sec = trim_out_sec;
            old
        })
    }

    /// Change a clip's playback speed.
    pub fn set_clip_speed(
        &mut self,
        track_index: usize,
        id: ClipId,
        speed: f64,
        assets: &AssetLibrary,
    ) -> CutlineResult<f64> {
        self.edit_clip(track_index, id, assets, |clip| {
            let old = clip.speed;
            clip.speed = speed;
            old
        })
    }

    /// Replace a clip's effect parameters.
    pub fn set_clip_effects(
        &mut self,
        track_index: usize,
        id: ClipId,
        effects: EffectParams,
        assets: &AssetLibrary,
    ) -> CutlineResult<EffectParams> {
        self.edit_clip(track_index, id, assets, |clip| {
            std::mem::replace(&mut clip.effects, effects)
        })
    }

    /// Apply `edit` to a copy of the clip, re-validate it in place on the
    /// track (including sibling overlap with the possibly changed duration),
    /// and commit only on success.
    fn edit_clip<T>(
        &mut self,
        track_index: usize,
        id: ClipId,
        assets: &AssetLibrary,
        edit: impl FnOnce(&mut Clip) -> T,
    ) -> CutlineResult<T> {
        let track = self.track(track_index)?;
        let kind = track.kind;
        let clip = track
            .get(id)
            .ok_or_else(|| CutlineError::validation(format!("unknown clip id {}", id.0)))?;

        let mut edited = clip.clone();
        let old = edit(&mut edited);
        validate_clip_against(&edited, kind, assets)?;
        if let Some(other) = track.find_overlap(&edited, Some(id)) {
            return Err(CutlineError::validation(format!(
                "editing clip {} would overlap clip {}",
                id.0, other.0
            )));
        }

        let track = self.track_mut(track_index)?;
        let slot = track
            .get_mut(id)
            .ok_or_else(|| CutlineError::validation(format!("unknown clip id {}", id.0)))?;
        edited.seq = slot.seq;
        *slot = edited;
        Ok(old)
    }

    /// Derived duration: the furthest clip end across all tracks.
    pub fn duration_sec(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips())
            .map(|c| c.end_sec())
            .fold(0.0, f64::max)
    }

    /// Derived duration in output frames (ceiling, covers partial frames).
    pub fn duration_frames(&self) -> u64 {
        self.output.fps.secs_to_frames_ceil(self.duration_sec())
    }

    /// Return `true` when any clip references `asset`.
    pub fn references_asset(&self, asset: AssetId) -> bool {
        self.tracks
            .iter()
            .flat_map(|t| t.clips())
            .any(|c| c.asset == asset)
    }

    /// Return `true` when any audio track carries a clip.
    pub fn has_audio(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind == TrackKind::Audio && !t.is_empty())
    }

    /// Validate the whole graph against the asset library.
    pub fn validate(&self, assets: &AssetLibrary) -> CutlineResult<()> {
        self.output.validate()?;
        for track in &self.tracks {
            track.validate()?;
            for clip in track.clips() {
                validate_clip_against(clip, track.kind, assets)?;
            }
        }
        Ok(())
    }

    /// Reassign clip sequence numbers and the clip id watermark after
    /// deserialization.
    pub(crate) fn reseed(&mut self) {
        let mut max_id = 0u64;
        for track in &mut self.tracks {
            track.reseed_seq();
            for clip in track.clips() {
                max_id = max_id.max(clip.id.0 + 1);
            }
        }
        self.next_clip_id = max_id;
    }
}

fn validate_clip_against(
    clip: &Clip,
    kind: TrackKind,
    assets: &AssetLibrary,
) -> CutlineResult<()> {
    clip.validate_times()?;
    let asset = assets.get(clip.asset).ok_or_else(|| {
        CutlineError::validation(format!(
            "clip {} references missing asset {}",
            clip.id.0, clip.asset.0
        ))
    })?;
    check_kind_compat(clip, asset, kind)?;

    if let Some(duration) = asset.duration_sec
        && clip.trim_out_sec > duration + 1e-9
    {
        return Err(CutlineError::validation(format!(
            "clip {} trim_out_sec exceeds asset duration {duration}",
            clip.id.0
        )));
    }

    clip.effects.validate(kind, clip.duration_sec())
}

fn check_kind_compat(clip: &Clip, asset: &Asset, kind: TrackKind) -> CutlineResult<()> {
    let ok = match kind {
        TrackKind::Video => matches!(asset.kind, MediaKind::Video | MediaKind::Image),
        // Video assets on audio tracks contribute their soundtrack.
        TrackKind::Audio => matches!(asset.kind, MediaKind::Audio | MediaKind::Video),
        TrackKind::Overlay => matches!(asset.kind, MediaKind::Image | MediaKind::Title),
    };
    if !ok {
        return Err(CutlineError::validation(format!(
            "clip {} asset kind {:?} is not allowed on a {kind:?} track",
            clip.id.0, asset.kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> OutputSettings {
        OutputSettings {
            width: 640,
            height: 360,
            fps: Fps { num: 30, den: 1 },
        }
    }

    fn library() -> AssetLibrary {
        let mut lib = AssetLibrary::new();
        lib.insert(
            MediaKind::Video,
            Some("a.mp4".into()),
            Some(10.0),
            Some(Fps { num: 30, den: 1 }),
            Some([640, 360]),
        )
        .unwrap();
        lib.insert(MediaKind::Audio, Some("a.mp3".into()), Some(30.0), None, None)
            .unwrap();
        lib
    }

    fn clip(id: u64, asset: u64, start: f64, trim_out: f64) -> Clip {
        Clip::new(
            ClipId(id),
            AssetId(asset),
            start,
            0.0,
            trim_out,
            1.0,
            EffectParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn duration_is_the_furthest_clip_end() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        let a = tl.add_track(TrackKind::Audio, "a0");
        tl.add_clip(v, clip(0, 0, 0.0, 4.0), &lib).unwrap();
        tl.add_clip(a, clip(1, 1, 3.0, 2.5), &lib).unwrap();
        assert!((tl.duration_sec() - 5.5).abs() < 1e-12);
        assert_eq!(tl.duration_frames(), 165);
    }

    #[test]
    fn speed_shortens_the_derived_duration() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        let mut c = clip(0, 0, 0.0, 10.0);
        c.speed = 2.0;
        tl.add_clip(v, c, &lib).unwrap();
        assert!((tl.duration_sec() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn add_clip_rejects_missing_asset() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        assert!(tl.add_clip(v, clip(0, 99, 0.0, 4.0), &lib).is_err());
    }

    #[test]
    fn add_clip_rejects_kind_mismatch() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let a = tl.add_track(TrackKind::Audio, "a0");
        // Audio asset is fine; image-less video is fine too; but an audio
        // asset on a video track is not.
        tl.add_clip(a, clip(0, 1, 0.0, 4.0), &lib).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        assert!(tl.add_clip(v, clip(1, 1, 0.0, 4.0), &lib).is_err());
    }

    #[test]
    fn add_clip_rejects_trim_beyond_asset() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        assert!(tl.add_clip(v, clip(0, 0, 0.0, 10.5), &lib).is_err());
        tl.add_clip(v, clip(1, 0, 0.0, 10.0), &lib).unwrap();
    }

    #[test]
    fn move_clip_checks_overlap_and_returns_old_start() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        tl.add_clip(v, clip(0, 0, 0.0, 4.0), &lib).unwrap();
        tl.add_clip(v, clip(1, 0, 6.0, 4.0), &lib).unwrap();

        assert!(tl.move_clip(v, ClipId(1), 2.0).is_err());
        let old = tl.move_clip(v, ClipId(1), 4.0).unwrap();
        assert_eq!(old, 6.0);
        assert!((tl.duration_sec() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn retrim_validates_against_asset_duration() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        tl.add_clip(v, clip(0, 0, 0.0, 4.0), &lib).unwrap();
        assert!(tl.retrim_clip(v, ClipId(0), 0.0, 11.0, &lib).is_err());
        let old = tl.retrim_clip(v, ClipId(0), 1.0, 9.0, &lib).unwrap();
        assert_eq!(old, (0.0, 4.0));
    }

    #[test]
    fn set_effects_validates_for_track_kind() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let a = tl.add_track(TrackKind::Audio, "a0");
        tl.add_clip(a, clip(0, 1, 0.0, 4.0), &lib).unwrap();
        let bad = EffectParams {
            grayscale: true,
            ..Default::default()
        };
        assert!(tl.set_clip_effects(a, ClipId(0), bad, &lib).is_err());
        let good = EffectParams {
            volume: 0.25,
            fade_in_sec: 1.0,
            ..Default::default()
        };
        tl.set_clip_effects(a, ClipId(0), good, &lib).unwrap();
    }

    #[test]
    fn references_asset_sees_all_tracks() {
        let lib = library();
        let mut tl = Timeline::new(output()).unwrap();
        let v = tl.add_track(TrackKind::Video, "v0");
        tl.add_clip(v, clip(0, 0, 0.0, 4.0), &lib).unwrap();
        assert!(tl.references_asset(AssetId(0)));
        assert!(!tl.references_asset(AssetId(1)));
    }
}
