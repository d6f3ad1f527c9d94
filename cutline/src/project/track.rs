use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::clip::{Clip, ClipId};

/// Kind of clips a track carries, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    /// Image/text/sticker layers composited above the video tracks.
    Overlay,
}

impl TrackKind {
    pub fn is_visual(self) -> bool {
        matches!(self, Self::Video | Self::Overlay)
    }
}

/// An ordered lane of non-overlapping clips of one kind.
///
/// Clips are kept sorted by start offset. Insertion order is tracked
/// separately so that the defensive overlap policy (latest-inserted wins) is
/// well defined even if the non-overlap invariant is ever violated.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Track {
    pub kind: TrackKind,
    pub name: String,
    clips: Vec<Clip>,
    #[serde(skip)]
    next_seq: u64,
}

impl Track {
    pub fn new(kind: TrackKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            clips: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Insert a clip, rejecting any overlap with an existing sibling.
    pub(crate) fn insert(&mut self, mut clip: Clip) -> CutlineResult<()> {
        clip.validate_times()?;
        if self.clips.iter().any(|c| c.id == clip.id) {
            return Err(CutlineError::validation(format!(
                "clip id {} already exists on track '{}'",
                clip.id.0, self.name
            )));
        }
        if let Some(other) = self.find_overlap(&clip, None) {
            return Err(CutlineError::validation(format!(
                "clip {} overlaps clip {} on track '{}'",
                clip.id.0, other.0, self.name
            )));
        }

        clip.seq = self.next_seq;
        self.next_seq += 1;
        let at = self
            .clips
            .partition_point(|c| c.start_sec <= clip.start_sec);
        self.clips.insert(at, clip);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ClipId) -> CutlineResult<Clip> {
        let idx = self
            .clips
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| {
                CutlineError::validation(format!(
                    "unknown clip id {} on track '{}'",
                    id.0, self.name
                ))
            })?;
        Ok(self.clips.remove(idx))
    }

    pub fn get(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|c| c.id == id)
    }

    /// Find the clip active at timeline time `t`.
    ///
    /// The non-overlap invariant means at most one clip matches. If the
    /// invariant is ever violated, the latest-inserted match wins.
    pub fn active_at(&self, t: f64) -> Option<&Clip> {
        self.clips
            .iter()
            .filter(|c| c.contains(t))
            .max_by_key(|c| c.seq)
    }

    /// Check whether `clip` overlaps any sibling, ignoring `except`.
    pub(crate) fn find_overlap(&self, clip: &Clip, except: Option<ClipId>) -> Option<ClipId> {
        self.clips
            .iter()
            .filter(|c| Some(c.id) != except && c.id != clip.id)
            .find(|c| clip.start_sec < c.end_sec() && c.start_sec < clip.end_sec())
            .map(|c| c.id)
    }

    /// Validate sibling non-overlap and per-clip time fields.
    pub fn validate(&self) -> CutlineResult<()> {
        for clip in &self.clips {
            clip.validate_times()?;
            if let Some(other) = self.find_overlap(clip, None) {
                return Err(CutlineError::validation(format!(
                    "clip {} overlaps clip {} on track '{}'",
                    clip.id.0, other.0, self.name
                )));
            }
        }
        Ok(())
    }

    /// Reassign insertion sequence numbers after deserialization.
    pub(crate) fn reseed_seq(&mut self) {
        for (i, clip) in self.clips.iter_mut().enumerate() {
            clip.seq = i as u64;
        }
        self.next_seq = self.clips.len() as u64;
    }

    /// Insert without the overlap check. Exists to exercise the defensive
    /// overlap policy in tests.
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&mut self, mut clip: Clip) {
        clip.seq = self.next_seq;
        self.next_seq += 1;
        let at = self
            .clips
            .partition_point(|c| c.start_sec <= clip.start_sec);
        self.clips.insert(at, clip);
    }
}
