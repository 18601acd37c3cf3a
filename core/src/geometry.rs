use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};

use crate::point_cloud::OrientedPointCloud;

/// Rigid transform mapping one cloud's frame into another's: `p -> R p + t`.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_matrix(transform: &Matrix4<f64>) -> Self {
        let r = Matrix3::from(transform.fixed_view::<3, 3>(0, 0));
        let t = Vector3::from(transform.fixed_view::<3, 1>(0, 3));
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&nalgebra::Rotation3::from_matrix(&r)),
            translation: t,
        }
    }

    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Rotates a direction without translating it (normals, offsets).
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * vector
    }

    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.inverse();
        Self {
            rotation: r_inv,
            translation: -(r_inv * self.translation),
        }
    }

    /// Composition `self ∘ other`: applies `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Applies the transform to every point and normal of a cloud.
    ///
    /// Depth values are carried over unchanged; they describe the sensor
    /// geometry of the original acquisition, not the aligned frame.
    pub fn apply(&self, cloud: &OrientedPointCloud) -> OrientedPointCloud {
        let points = cloud
            .points
            .iter()
            .map(|p| self.transform_point(p))
            .collect();
        let normals = cloud
            .normals
            .iter()
            .map(|n| self.transform_vector(n))
            .collect();
        OrientedPointCloud {
            points,
            normals,
            depths: cloud.depths.clone(),
        }
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}
