use nalgebra::{Point3, Vector3};

/// A point cloud with one surface normal per point and optional per-point
/// depth (sensor range) values.
#[derive(Debug, Clone, Default)]
pub struct OrientedPointCloud {
    pub points: Vec<Point3<f64>>,
    pub normals: Vec<Vector3<f64>>,
    pub depths: Option<Vec<f64>>,
}

impl OrientedPointCloud {
    pub fn new(points: Vec<Point3<f64>>, normals: Vec<Vector3<f64>>) -> crate::Result<Self> {
        if normals.len() != points.len() {
            return Err(crate::Error::DimensionMismatch(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                points.len()
            )));
        }
        Ok(Self {
            points,
            normals,
            depths: None,
        })
    }

    /// Attaches per-point depth values used for area weighting of normals.
    pub fn with_depths(mut self, depths: Vec<f64>) -> crate::Result<Self> {
        if depths.len() != self.points.len() {
            return Err(crate::Error::DimensionMismatch(format!(
                "Depth count {} does not match point count {}",
                depths.len(),
                self.points.len()
            )));
        }
        self.depths = Some(depths);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Axis-aligned bounding extents, or `None` for an empty cloud.
    pub fn extent(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let first = self.points.first()?;
        let mut min = first.coords;
        let mut max = first.coords;
        for p in &self.points[1..] {
            for d in 0..3 {
                min[d] = min[d].min(p[d]);
                max[d] = max[d].max(p[d]);
            }
        }
        Some((min, max))
    }
}
