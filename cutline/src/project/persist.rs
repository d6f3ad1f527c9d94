use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::foundation::error::{CutlineError, CutlineResult};
use crate::project::Project;
use crate::project::asset::{Asset, AssetLibrary};
use crate::project::timeline::Timeline;

/// Current project document schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// JSON-facing project document.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ProjectDoc {
    schema_version: u32,
    name: String,
    next_asset_id: u64,
    assets: Vec<Asset>,
    timeline: Timeline,
}

/// Load a project document, returning a fully validated graph.
///
/// Documents from a newer schema version are rejected rather than
/// misinterpreted.
pub fn load_project(path: impl AsRef<Path>) -> CutlineResult<Project> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        CutlineError::parse(format!("open project file '{}': {e}", path.display()))
    })?;
    let doc: ProjectDoc = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| CutlineError::parse(format!("parse project JSON: {e}")))?;

    if doc.schema_version > SCHEMA_VERSION {
        return Err(CutlineError::parse(format!(
            "project schema_version {} is newer than supported version {SCHEMA_VERSION}",
            doc.schema_version
        )));
    }

    let assets = AssetLibrary::from_assets(doc.next_asset_id, doc.assets)?;
    let mut timeline = doc.timeline;
    timeline.reseed();
    timeline.validate(&assets)?;

    Ok(Project {
        name: doc.name,
        assets,
        timeline,
    })
}

/// Save a project document atomically (write to a sibling temp file, then
/// rename into place), so a failed save leaves any existing file untouched.
pub fn save_project(project: &Project, path: impl AsRef<Path>) -> CutlineResult<()> {
    let path = path.as_ref();
    project.validate().map_err(|e| {
        CutlineError::write(format!("refusing to save an invalid project: {e}"))
    })?;

    let doc = ProjectDoc {
        schema_version: SCHEMA_VERSION,
        name: project.name.clone(),
        next_asset_id: project.assets.next_id(),
        assets: project.assets.iter().cloned().collect(),
        timeline: project.timeline.clone(),
    };

    let json = serde_json::to_vec_pretty(&doc)
        .map_err(|e| CutlineError::write(format!("serialize project JSON: {e}")))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            CutlineError::write(format!(
                "create project directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &json).map_err(|e| {
        CutlineError::write(format!("write project file '{}': {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CutlineError::write(format!("rename project file into '{}': {e}", path.display()))
    })?;
    Ok(())
}
