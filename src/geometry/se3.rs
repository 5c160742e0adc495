//! Rigid body transforms.
//!
//! Poses are stored as `T_wc` (camera to world): `p_world = pose.transform_point(p_cam)`.
//! Camera frame follows the depth sensor convention: X right, Y down, Z forward.

use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6};

/// Rigid transform in 3D (rotation + translation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::identity(), translation)
    }

    /// Build from a homogeneous 4×4 matrix. The rotation block is re-orthonormalized.
    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&r));
        let translation = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::new(rotation, translation)
    }

    /// Homogeneous 4×4 matrix, the form handed to the render layer.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        (Translation3::from(self.translation) * self.rotation).to_homogeneous()
    }

    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        Self {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    #[inline]
    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Relative rotation angle to `other`, in radians.
    pub fn angle_to(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    /// Euclidean distance between the two origins, in meters.
    pub fn distance_to(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }

    /// Left-multiply by the exponential of a small twist `[ω, v]`.
    ///
    /// Used by the ICP solver: the twist is expressed in the world frame.
    pub fn retract(&self, twist: &Vector6<f64>) -> Self {
        let omega = Vector3::new(twist[0], twist[1], twist[2]);
        let v = Vector3::new(twist[3], twist[4], twist[5]);
        let delta = UnitQuaternion::from_scaled_axis(omega);
        Self {
            rotation: delta * self.rotation,
            translation: delta * self.translation + v,
        }
    }

    /// Camera orientation whose +Y axis (image down) points along `gravity`.
    ///
    /// Heading is taken from the camera's current forward axis projected onto
    /// the horizontal plane; if the camera looks straight up or down the
    /// heading falls back to world +Z.
    pub fn gravity_aligned(gravity: &Vector3<f64>, forward_hint: &Vector3<f64>) -> Option<UnitQuaternion<f64>> {
        let down = gravity.try_normalize(1e-9)?;
        let mut forward = forward_hint - down * down.dot(forward_hint);
        if forward.norm() < 1e-6 {
            forward = Vector3::z() - down * down.z;
        }
        let forward = forward.try_normalize(1e-9)?;
        let right = down.cross(&forward);
        let r = Matrix3::from_columns(&[right, down, forward]);
        Some(UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r)))
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

impl<'a> Mul<&'a SE3> for &'a SE3 {
    type Output = SE3;

    fn mul(self, rhs: &'a SE3) -> SE3 {
        *self * *rhs
    }
}
