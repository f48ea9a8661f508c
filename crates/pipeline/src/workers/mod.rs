//! Built-in stage workers.
//!
//! These produce real files (frames, JSON manifests, PLY point clouds) so a
//! job's artifacts can be inspected and downloaded, but the 3D content is
//! placeholder output, not a reconstruction of the input video.

pub mod extract;
pub mod point_cloud;
pub mod simulated;

pub use extract::FrameExtractor;
pub use point_cloud::PointCloudBuilder;
pub use simulated::SimulatedStage;

use std::path::Path;

use serde::Serialize;
use vid3d_core::job::ArtifactRef;

use crate::error::StageError;

/// Write `value` as pretty JSON to `path` and return it as an artifact.
pub(crate) async fn write_manifest<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<ArtifactRef, StageError> {
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(ArtifactRef::Path(path.to_path_buf()))
}
