use crate::effects::params::EffectParams;
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::Project;
use crate::project::clip::{Clip, ClipId};
use crate::project::track::{Track, TrackKind};

/// A serializable edit applied to the timeline.
///
/// Every user action becomes one explicit command; applying a command
/// validates the edit and returns its inverse, which is what makes the
/// history below a plain stack of commands.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditCommand {
    AddTrack {
        kind: TrackKind,
        name: String,
    },
    /// Inverse of `AddTrack`/`InsertTrack`; removes the track and its clips.
    RemoveTrack {
        index: usize,
    },
    /// Inverse of `RemoveTrack`; restores a removed track in place.
    InsertTrack {
        index: usize,
        track: Track,
    },
    AddClip {
        track: usize,
        clip: Clip,
    },
    RemoveClip {
        track: usize,
        clip: ClipId,
    },
    MoveClip {
        track: usize,
        clip: ClipId,
        start_sec: f64,
    },
    RetrimClip {
        track: usize,
        clip: ClipId,
        trim_in_sec: f64,
        trim_out_sec: f64,
    },
    SetClipSpeed {
        track: usize,
        clip: ClipId,
        speed: f64,
    },
    SetClipEffects {
        track: usize,
        clip: ClipId,
        effects: EffectParams,
    },
}

impl EditCommand {
    /// Apply the command to `project` and return the inverse command.
    pub fn apply(self, project: &mut Project) -> CutlineResult<EditCommand> {
        match self {
            Self::AddTrack { kind, name } => {
                let index = project.timeline.add_track(kind, name);
                Ok(Self::RemoveTrack { index })
            }
            Self::RemoveTrack { index } => {
                let track = project.timeline.remove_track(index)?;
                Ok(Self::InsertTrack { index, track })
            }
            Self::InsertTrack { index, track } => {
                project.timeline.insert_track(index, track)?;
                Ok(Self::RemoveTrack { index })
            }
            Self::AddClip { track, clip } => {
                let id = clip.id;
                project.timeline.add_clip(track, clip, &project.assets)?;
                Ok(Self::RemoveClip { track, clip: id })
            }
            Self::RemoveClip { track, clip } => {
                let removed = project.timeline.remove_clip(track, clip)?;
                Ok(Self::AddClip {
                    track,
                    clip: removed,
                })
            }
            Self::MoveClip {
                track,
                clip,
                start_sec,
            } => {
                let old = project.timeline.move_clip(track, clip, start_sec)?;
                Ok(Self::MoveClip {
                    track,
                    clip,
                    start_sec: old,
                })
            }
            Self::RetrimClip {
                track,
                clip,
                trim_in_sec,
                trim_out_sec,
            } => {
                let (old_in, old_out) = project.timeline.retrim_clip(
                    track,
                    clip,
                    trim_in_sec,
                    trim_out_sec,
                    &project.assets,
                )?;
                Ok(Self::RetrimClip {
                    track,
                    clip,
                    trim_in_sec: old_in,
                    trim_out_sec: old_out,
                })
            }
            Self::SetClipSpeed { track, clip, speed } => {
                let old = project
                    .timeline
                    .set_clip_speed(track, clip, speed, &project.assets)?;
                Ok(Self::SetClipSpeed {
                    track,
                    clip,
                    speed: old,
                })
            }
            Self::SetClipEffects {
                track,
                clip,
                effects,
            } => {
                let old = project
                    .timeline
                    .set_clip_effects(track, clip, effects, &project.assets)?;
                Ok(Self::SetClipEffects {
                    track,
                    clip,
                    effects: old,
                })
            }
        }
    }
}

/// Undo/redo stack scoped to one open project.
///
/// New edits drop the redo stack. Failed commands leave both stacks and the
/// project untouched.
#[derive(Debug, Default)]
pub struct CommandHistory {
    undo: Vec<EditCommand>,
    redo: Vec<EditCommand>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a command and push its inverse onto the undo stack.
    pub fn apply(&mut self, cmd: EditCommand, project: &mut Project) -> CutlineResult<()> {
        let inverse = cmd.apply(project)?;
        self.undo.push(inverse);
        self.redo.clear();
        Ok(())
    }

    /// Undo the most recent edit. Errors when there is nothing to undo.
    pub fn undo(&mut self, project: &mut Project) -> CutlineResult<()> {
        let cmd = self
            .undo
            .pop()
            .ok_or_else(|| CutlineError::validation("nothing to undo"))?;
        let inverse = cmd.apply(project)?;
        self.redo.push(inverse);
        Ok(())
    }

    /// Redo the most recently undone edit.
    pub fn redo(&mut self, project: &mut Project) -> CutlineResult<()> {
        let cmd = self
            .redo
            .pop()
            .ok_or_else(|| CutlineError::validation("nothing to redo"))?;
        let inverse = cmd.apply(project)?;
        self.undo.push(inverse);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
