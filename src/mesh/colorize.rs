//! Per-vertex colorization from stored keyframes.
//!
//! Runs in two stages on its own thread: a quick preview that takes each
//! vertex's color from its single best keyframe, then an enhanced pass that
//! blends the best few views.

use std::sync::Arc;

use nalgebra::Vector3;
use tracing::debug;

use crate::config::ColorizationSettings;
use crate::error::FinalizeError;
use crate::finalization::{CancelToken, TwoStageTask};
use crate::geometry::SE3;
use crate::keyframes::KeyframeRecord;
use crate::mesh::TriangleMesh;

/// Color given to vertices no keyframe sees.
pub const UNSEEN_COLOR: [u8; 3] = [128, 128, 128];

const CANCEL_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorizationQuality {
    Preview,
    Enhanced,
}

/// Produces a colorized variant of a mesh from (color image, pose) keyframes.
pub trait Colorizer: Send + Sync {
    fn colorize(
        &self,
        mesh: &TriangleMesh,
        keyframes: &[KeyframeRecord],
        quality: ColorizationQuality,
        cancel: &CancelToken,
    ) -> Result<TriangleMesh, FinalizeError>;
}

/// Run preview then enhanced colorization on a background thread.
pub fn spawn_colorization(
    colorizer: Arc<dyn Colorizer>,
    mesh: Arc<TriangleMesh>,
    keyframes: Arc<[KeyframeRecord]>,
    cancel: CancelToken,
) -> TwoStageTask<TriangleMesh> {
    TwoStageTask::spawn("colorize", cancel, move |sink, cancel| {
        let preview = colorizer.colorize(&mesh, &keyframes, ColorizationQuality::Preview, &cancel);
        let failed = preview.is_err();
        if !sink.first(preview) || failed {
            return;
        }
        let enhanced = colorizer.colorize(&mesh, &keyframes, ColorizationQuality::Enhanced, &cancel);
        sink.second(enhanced);
    })
}

/// Projects vertices into keyframes and samples their color images.
pub struct KeyframeColorizer {
    settings: ColorizationSettings,
}

impl KeyframeColorizer {
    pub fn new(settings: ColorizationSettings) -> Self {
        Self { settings }
    }

    /// Candidate (score, color) samples for one vertex, one per keyframe that
    /// sees it. `world_to_camera[i]` is the inverse pose of `keyframes[i]`.
    fn samples(
        &self,
        vertex: &Vector3<f32>,
        normal: &Vector3<f32>,
        keyframes: &[KeyframeRecord],
        world_to_camera: &[SE3],
    ) -> Vec<(f64, [u8; 3])> {
        let min_cos = self.settings.max_view_angle_deg.to_radians().cos();
        let p_w = vertex.cast::<f64>();
        let n_w = normal.cast::<f64>();

        keyframes
            .iter()
            .zip(world_to_camera)
            .filter_map(|(kf, t_cw)| {
                let to_camera = kf.pose.translation - p_w;
                let dist = to_camera.norm();
                if dist < 1e-6 {
                    return None;
                }
                // Zero normals (isolated vertices) accept any direction.
                let cos = if n_w.norm_squared() > 0.0 { n_w.dot(&to_camera) / dist } else { 1.0 };
                if cos < min_cos {
                    return None;
                }
                let p_c = t_cw.transform_point(&p_w);
                let (u, v) = kf.color.intrinsics.project_to_pixel(&p_c)?;
                let rgb = kf.color.image.get(u, v)?;
                Some((cos / dist, rgb))
            })
            .collect()
    }
}

impl Default for KeyframeColorizer {
    fn default() -> Self {
        Self::new(ColorizationSettings::default())
    }
}

impl Colorizer for KeyframeColorizer {
    fn colorize(
        &self,
        mesh: &TriangleMesh,
        keyframes: &[KeyframeRecord],
        quality: ColorizationQuality,
        cancel: &CancelToken,
    ) -> Result<TriangleMesh, FinalizeError> {
        if mesh.is_empty() {
            return Err(FinalizeError::EmptyMesh);
        }
        if keyframes.is_empty() {
            return Err(FinalizeError::NoKeyframes);
        }

        let per_vertex = match quality {
            ColorizationQuality::Preview => 1,
            ColorizationQuality::Enhanced => self.settings.enhanced_keyframes_per_vertex.max(1),
        };

        let world_to_camera: Vec<SE3> = keyframes.iter().map(|kf| kf.pose.inverse()).collect();
        let mut colors = Vec::with_capacity(mesh.num_vertices());
        let mut unseen = 0usize;
        for (i, (vertex, normal)) in mesh.vertices.iter().zip(&mesh.normals).enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            let mut samples = self.samples(vertex, normal, keyframes, &world_to_camera);
            if samples.is_empty() {
                unseen += 1;
                colors.push(UNSEEN_COLOR);
                continue;
            }
            samples.sort_by(|a, b| b.0.total_cmp(&a.0));
            samples.truncate(per_vertex);
            colors.push(blend(&samples));
        }

        debug!(?quality, vertices = colors.len(), unseen, "colorization done");

        let mut out = mesh.clone();
        out.colors = Some(colors);
        Ok(out)
    }
}

/// Score-weighted average color.
fn blend(samples: &[(f64, [u8; 3])]) -> [u8; 3] {
    let total: f64 = samples.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        return samples.first().map(|(_, c)| *c).unwrap_or(UNSEEN_COLOR);
    }
    let mut acc = [0.0f64; 3];
    for (w, rgb) in samples {
        for ch in 0..3 {
            acc[ch] += w * f64::from(rgb[ch]);
        }
    }
    acc.map(|c| (c / total).round().clamp(0.0, 255.0) as u8)
}
