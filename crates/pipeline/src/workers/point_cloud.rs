//! Placeholder point-cloud generation written as ASCII PLY.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use vid3d_core::job::ArtifactRef;

use crate::error::StageError;
use crate::stage::{StageContext, StageInput, StageWorker};

/// Hard cap on points in one cloud.
pub const MAX_POINTS: u32 = 500_000;

/// Points are generated and written in this many chunks, with a progress
/// report and a cancellation check after each.
const CHUNKS: u32 = 10;

#[derive(Debug, Clone)]
pub struct PointCloudBuilder {
    file_stem: String,
    density: f64,
    chunk_delay: Duration,
}

impl PointCloudBuilder {
    /// `density` scales the quality's points-per-frame budget.
    pub fn new(file_stem: impl Into<String>, density: f64, chunk_delay: Duration) -> Self {
        Self {
            file_stem: file_stem.into(),
            density: if density.is_finite() && density > 0.0 { density } else { 1.0 },
            chunk_delay,
        }
    }

    fn point_count(&self, ctx: &StageContext) -> u32 {
        let options = ctx.options();
        let budget = f64::from(options.frame_budget())
            * f64::from(options.quality.points_per_frame())
            * self.density;
        (budget.round() as u32).clamp(1, MAX_POINTS)
    }
}

#[async_trait]
impl StageWorker for PointCloudBuilder {
    async fn execute(&self, input: StageInput, ctx: StageContext) -> Result<ArtifactRef, StageError> {
        let total = self.point_count(&ctx);
        let path = ctx.work_dir().join(format!("{}.ply", self.file_stem));

        let file = tokio::fs::File::create(&path).await?;
        let mut writer = tokio::io::BufWriter::new(file);
        let header = ply_header(total, input.previous.as_ref());
        writer.write_all(header.as_bytes()).await?;

        ctx.emit(0.0);
        let mut written = 0;
        for chunk in 1..=CHUNKS {
            ctx.checkpoint()?;
            let target = (u64::from(total) * u64::from(chunk) / u64::from(CHUNKS)) as u32;
            let body = random_points(target - written);
            writer.write_all(body.as_bytes()).await?;
            written = target;
            tokio::time::sleep(self.chunk_delay).await;
            ctx.emit(f64::from(chunk) / f64::from(CHUNKS));
        }
        writer.flush().await?;

        tracing::debug!(job_id = %ctx.job_id(), points = total, path = %path.display(), "Point cloud written");
        Ok(ArtifactRef::Path(path))
    }
}

/// Header for `vertices` points. The artifact the cloud was built from, if
/// any, is named in a `comment source` line.
fn ply_header(vertices: u32, built_from: Option<&ArtifactRef>) -> String {
    let source = built_from
        .map(|artifact| {
            let name = match artifact {
                ArtifactRef::Path(path) => path.display().to_string(),
                ArtifactRef::Inline(text) => text.clone(),
            };
            // One header line per comment.
            format!("comment source {}\n", name.replace(['\r', '\n'], " "))
        })
        .unwrap_or_default();
    format!(
        "ply\n\
         format ascii 1.0\n\
         comment placeholder reconstruction\n\
         {source}\
         element vertex {vertices}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         end_header\n"
    )
}

/// Points scattered over a unit sphere shell, coloured by position.
fn random_points(count: u32) -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(count as usize * 40);
    for _ in 0..count {
        let theta: f64 = rng.random_range(0.0..std::f64::consts::TAU);
        let z: f64 = rng.random_range(-1.0..=1.0);
        let radius: f64 = rng.random_range(0.9..=1.0);
        let ring = (1.0 - z * z).sqrt() * radius;
        let (x, y, z) = (ring * theta.cos(), ring * theta.sin(), z * radius);
        let colour = |v: f64| ((v + 1.0) * 127.5).round() as u8;
        let _ = writeln!(
            out,
            "{x:.5} {y:.5} {z:.5} {} {} {}",
            colour(x),
            colour(y),
            colour(z)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing;
    use vid3d_core::options::{Quality, StageOptions};

    #[tokio::test]
    async fn writes_ply_with_declared_vertex_count() {
        let dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            quality: Quality::Low,
            max_frames: Some(2),
            ..Default::default()
        };
        let (ctx, mut rx, _) = testing::context(dir.path(), options);

        let artifact = PointCloudBuilder::new("cloud", 1.0, Duration::ZERO)
            .execute(
                StageInput {
                    source: dir.path().join("in.mp4"),
                    previous: None,
                },
                ctx,
            )
            .await
            .unwrap();

        let text = std::fs::read_to_string(artifact.as_path().unwrap()).unwrap();
        assert!(text.starts_with("ply\nformat ascii 1.0\n"));
        assert!(text.contains("element vertex 400\n"));
        let body = text.split("end_header\n").nth(1).unwrap();
        assert_eq!(body.lines().count(), 400);

        let samples = testing::drain(&mut rx);
        assert_eq!(samples.first().unwrap().fraction, 0.0);
        assert_eq!(samples.last().unwrap().fraction, 1.0);
        assert_eq!(samples.len(), CHUNKS as usize + 1);
    }

    #[tokio::test]
    async fn cancelled_build_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, cancel) = testing::context(dir.path(), StageOptions::default());
        cancel.cancel();
        let result = PointCloudBuilder::new("cloud", 1.0, Duration::ZERO)
            .execute(
                StageInput {
                    source: dir.path().join("in.mp4"),
                    previous: None,
                },
                ctx,
            )
            .await;
        assert!(matches!(result, Err(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn header_names_the_artifact_it_was_built_from() {
        let dir = tempfile::tempdir().unwrap();
        let depth = dir.path().join("depth.json");
        let (ctx, _rx, _) = testing::context(dir.path(), StageOptions::default());

        let artifact = PointCloudBuilder::new("model", 1.0, Duration::ZERO)
            .execute(
                StageInput {
                    source: dir.path().join("in.mp4"),
                    previous: Some(ArtifactRef::Path(depth.clone())),
                },
                ctx,
            )
            .await
            .unwrap();

        let text = std::fs::read_to_string(artifact.as_path().unwrap()).unwrap();
        let header = text.split("end_header\n").next().unwrap();
        assert!(header.contains(&format!("comment source {}\n", depth.display())));
    }

    #[test]
    fn header_without_input_has_no_source_comment() {
        assert!(!ply_header(3, None).contains("comment source"));
        let inline = ply_header(3, Some(&ArtifactRef::Inline("multi\nline".into())));
        assert!(inline.contains("comment source multi line\nelement vertex 3\n"));
    }

    #[test]
    fn non_positive_density_falls_back_to_one() {
        let builder = PointCloudBuilder::new("c", -2.0, Duration::ZERO);
        assert_eq!(builder.density, 1.0);
    }
}
