//! Projective point-to-plane ICP between two depth frames.
//!
//! Association is projective: a current-frame point is transformed into the
//! reference camera and matched with the reference vertex at that pixel.
//! Each Gauss-Newton step solves the 6×6 normal equations for a world-frame
//! twist `[ω, v]` applied on the left of the current pose estimate.

use nalgebra::{Matrix6, Vector3, Vector6};

use crate::config::TrackerSettings;
use crate::geometry::SE3;
use crate::sensor::{CameraIntrinsics, DepthFrame};

/// Convergence threshold on the twist norm.
const CONVERGED_STEP: f64 = 1e-6;

/// Levenberg damping added to the diagonal.
const DAMPING: f64 = 1e-6;

/// Camera-frame vertices and normals for every pixel of a depth frame.
#[derive(Debug, Clone)]
pub struct VertexMap {
    pub intrinsics: CameraIntrinsics,
    pub vertices: Vec<Option<Vector3<f64>>>,
    pub normals: Vec<Option<Vector3<f64>>>,
}

impl VertexMap {
    pub fn from_depth(frame: &DepthFrame) -> Self {
        let (w, h) = (frame.width(), frame.height());
        let mut vertices = Vec::with_capacity(w * h);
        for v in 0..h {
            for u in 0..w {
                vertices.push(frame.point_at(u, v));
            }
        }

        let mut normals = vec![None; w * h];
        for v in 0..h.saturating_sub(1) {
            for u in 0..w.saturating_sub(1) {
                let idx = v * w + u;
                let (Some(p), Some(right), Some(down)) =
                    (vertices[idx], vertices[idx + 1], vertices[idx + w])
                else {
                    continue;
                };
                let du = right - p;
                let dv = down - p;
                // Reject normals across depth discontinuities.
                let max_edge = 0.05 * p.z.max(0.5);
                if du.norm() > max_edge || dv.norm() > max_edge {
                    continue;
                }
                if let Some(mut n) = du.cross(&dv).try_normalize(1e-12) {
                    if n.dot(&p) > 0.0 {
                        n = -n;
                    }
                    normals[idx] = Some(n);
                }
            }
        }

        Self {
            intrinsics: frame.intrinsics,
            vertices,
            normals,
        }
    }

    #[inline]
    fn at(&self, u: usize, v: usize) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let idx = v * self.intrinsics.width + u;
        Some((self.vertices[idx]?, self.normals[idx]?))
    }
}

/// Result of an ICP alignment.
#[derive(Debug, Clone, Copy)]
pub struct IcpResult {
    pub pose: SE3,
    pub n_correspondences: usize,
    pub iterations: usize,
    pub rms_residual_m: f64,
}

/// Why ICP could not produce a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpFailure {
    /// Fewer correspondences than required.
    TooFewCorrespondences(usize),
    /// The normal equations were not positive definite.
    Degenerate,
}

/// Align `current` (camera frame) to `reference` seen from `reference_pose`.
pub fn align(
    reference: &VertexMap,
    reference_pose: &SE3,
    current: &VertexMap,
    initial: &SE3,
    settings: &TrackerSettings,
) -> Result<IcpResult, IcpFailure> {
    let stride = settings.pixel_stride.max(1);
    let ref_inv = reference_pose.inverse();
    let max_dist = settings.max_correspondence_distance_m;
    let min_normal_cos = settings.max_normal_angle_deg.to_radians().cos();
    let k = current.intrinsics;

    let mut pose = *initial;
    let mut n_corr = 0;
    let mut rms = 0.0;
    let mut iterations = 0;

    for _ in 0..settings.max_iterations.max(1) {
        iterations += 1;
        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        let mut sq_sum = 0.0;
        n_corr = 0;

        for v in (0..k.height).step_by(stride) {
            for u in (0..k.width).step_by(stride) {
                let Some((p_cam, n_cam)) = current.at(u, v) else {
                    continue;
                };
                let p_w = pose.transform_point(&p_cam);
                let n_cur_w = pose.rotate_vector(&n_cam);

                let Some((ru, rv)) = reference.intrinsics.project_to_pixel(&ref_inv.transform_point(&p_w)) else {
                    continue;
                };
                let Some((q_ref, m_ref)) = reference.at(ru, rv) else {
                    continue;
                };
                let q_w = reference_pose.transform_point(&q_ref);
                let n_w = reference_pose.rotate_vector(&m_ref);

                let diff = p_w - q_w;
                if diff.norm() > max_dist || n_w.dot(&n_cur_w) < min_normal_cos {
                    continue;
                }

                let r = n_w.dot(&diff);
                let ang = p_w.cross(&n_w);
                let j = Vector6::new(ang.x, ang.y, ang.z, n_w.x, n_w.y, n_w.z);
                jtj += j * j.transpose();
                jtr += j * r;
                sq_sum += r * r;
                n_corr += 1;
            }
        }

        if n_corr < settings.min_correspondences {
            return Err(IcpFailure::TooFewCorrespondences(n_corr));
        }
        rms = (sq_sum / n_corr as f64).sqrt();

        for i in 0..6 {
            jtj[(i, i)] += DAMPING;
        }
        let step = jtj.cholesky().ok_or(IcpFailure::Degenerate)?.solve(&(-jtr));
        pose = pose.retract(&step);

        if step.norm() < CONVERGED_STEP {
            break;
        }
    }

    Ok(IcpResult {
        pose,
        n_correspondences: n_corr,
        iterations,
        rms_residual_m: rms,
    })
}
