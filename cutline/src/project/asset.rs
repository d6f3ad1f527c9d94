use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::foundation::core::Fps;
use crate::foundation::error::{CutlineError, CutlineResult};

/// Stable identifier for an imported asset.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct AssetId(pub u64);

/// Kind of source media behind an asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    /// A blank transparent source for pure text/title clips; has no file.
    Title,
}

/// An imported source media file. Immutable once created.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub kind: MediaKind,
    /// Source file path; `None` only for `Title` assets.
    pub path: Option<PathBuf>,
    /// Intrinsic duration in seconds; `None` for unbounded sources
    /// (images and titles).
    pub duration_sec: Option<f64>,
    /// Native frame rate, when the source has one.
    pub fps: Option<Fps>,
    /// Native resolution `[width, height]`, when the source has one.
    pub resolution: Option<[u32; 2]>,
}

impl Asset {
    pub fn validate(&self) -> CutlineResult<()> {
        match self.kind {
            MediaKind::Title => {
                if self.path.is_some() {
                    return Err(CutlineError::validation("title assets must not have a path"));
                }
            }
            _ => {
                if self.path.is_none() {
                    return Err(CutlineError::validation(format!(
                        "asset {} requires a source path",
                        self.id.0
                    )));
                }
            }
        }
        if let Some(d) = self.duration_sec
            && (!d.is_finite() || d < 0.0)
        {
            return Err(CutlineError::validation(
                "asset duration_sec must be finite and >= 0",
            ));
        }
        Ok(())
    }

    /// Return `true` when clips of this asset can sit on a track of `visual` kind.
    pub fn is_visual(&self) -> bool {
        matches!(
            self.kind,
            MediaKind::Video | MediaKind::Image | MediaKind::Title
        )
    }
}

/// Owning registry of the project's assets.
#[derive(Clone, Debug, Default)]
pub struct AssetLibrary {
    next_id: u64,
    assets: BTreeMap<AssetId, Asset>,
}

impl AssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset and return its id.
    pub fn insert(
        &mut self,
        kind: MediaKind,
        path: Option<PathBuf>,
        duration_sec: Option<f64>,
        fps: Option<Fps>,
        resolution: Option<[u32; 2]>,
    ) -> CutlineResult<AssetId> {
        let id = AssetId(self.next_id);
        let asset = Asset {
            id,
            kind,
            path,
            duration_sec,
            fps,
            resolution,
        };
        asset.validate()?;
        self.next_id += 1;
        self.assets.insert(id, asset);
        Ok(id)
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.assets.contains_key(&id)
    }

    /// Remove an asset unconditionally. Reference checks live on `Project`,
    /// which can see the timeline.
    pub(crate) fn remove(&mut self, id: AssetId) -> CutlineResult<Asset> {
        self.assets
            .remove(&id)
            .ok_or_else(|| CutlineError::validation(format!("unknown asset id {}", id.0)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Rebuild a library from a serialized asset list.
    pub(crate) fn from_assets(next_id: u64, assets: Vec<Asset>) -> CutlineResult<Self> {
        let mut map = BTreeMap::new();
        for asset in assets {
            asset.validate()?;
            if asset.id.0 >= next_id {
                return Err(CutlineError::validation(format!(
                    "asset id {} is not below next_asset_id {next_id}",
                    asset.id.0
                )));
            }
            if map.insert(asset.id, asset).is_some() {
                return Err(CutlineError::validation("duplicate asset id"));
            }
        }
        Ok(Self {
            next_id,
            assets: map,
        })
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }
}
