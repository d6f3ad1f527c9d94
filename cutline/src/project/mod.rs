//! Project data model: assets, clips, tracks, timeline, edit commands, and
//! the persistence boundary.

pub mod asset;
pub mod clip;
pub mod command;
pub mod persist;
pub mod timeline;
pub mod track;

use std::path::PathBuf;

use crate::foundation::core::Fps;
use crate::foundation::error::{CutlineError, CutlineResult};

pub use asset::{Asset, AssetId, AssetLibrary, MediaKind};
pub use clip::{Clip, ClipId};
pub use command::{CommandHistory, EditCommand};
pub use timeline::{OutputSettings, Timeline};
pub use track::{Track, TrackKind};

/// One open editing project: the asset library plus the timeline that
/// references it.
#[derive(Clone, Debug)]
pub struct Project {
    pub name: String,
    pub assets: AssetLibrary,
    pub timeline: Timeline,
}

impl Project {
    pub fn new(name: impl Into<String>, output: OutputSettings) -> CutlineResult<Self> {
        Ok(Self {
            name: name.into(),
            assets: AssetLibrary::new(),
            timeline: Timeline::new(output)?,
        })
    }

    /// Register a source media file with the project.
    pub fn import_asset(
        &mut self,
        kind: MediaKind,
        path: Option<PathBuf>,
        duration_sec: Option<f64>,
        fps: Option<Fps>,
        resolution: Option<[u32; 2]>,
    ) -> CutlineResult<AssetId> {
        self.assets.insert(kind, path, duration_sec, fps, resolution)
    }

    /// Remove an asset. Fails while any clip still references it.
    pub fn remove_asset(&mut self, id: AssetId) -> CutlineResult<Asset> {
        if self.timeline.references_asset(id) {
            return Err(CutlineError::validation(format!(
                "asset {} is still referenced by a clip",
                id.0
            )));
        }
        self.assets.remove(id)
    }

    /// Validate the whole asset/track/clip graph.
    pub fn validate(&self) -> CutlineResult<()> {
        self.timeline.validate(&self.assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project::new(
            "p",
            OutputSettings {
                width: 320,
                height: 180,
                fps: Fps { num: 30, den: 1 },
            },
        )
        .unwrap()
    }

    #[test]
    fn remove_asset_fails_while_referenced() {
        let mut p = project();
        let id = p
            .import_asset(
                MediaKind::Video,
                Some("a.mp4".into()),
                Some(10.0),
                None,
                None,
            )
            .unwrap();
        let v = p.timeline.add_track(TrackKind::Video, "v0");
        p.timeline
            .add_clip(
                v,
                Clip::new(ClipId(0), id, 0.0, 0.0, 5.0, 1.0, Default::default()).unwrap(),
                &p.assets,
            )
            .unwrap();

        assert!(p.remove_asset(id).is_err());
        p.timeline.remove_clip(v, ClipId(0)).unwrap();
        p.remove_asset(id).unwrap();
        assert!(p.assets.is_empty());
    }
}
