//! Tessellation of the two search domains.
//!
//! Rotation space is covered by spherical tetrahedra on the unit quaternion
//! sphere: the 16-cell polytope tiles S3 exactly with 16 tetrahedral cells,
//! and under the quaternion double cover (`q` and `-q` are the same
//! rotation) the 8 cells of the `w >= 0` hemisphere cover every rotation
//! with no gaps. Translation space is covered by an axis-aligned cube grid.

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::{Error, Result};

/// Edge index pairs of a tetrahedron, in the order used for bisection.
const EDGES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// A spherical tetrahedron patch of the rotation manifold.
///
/// Vertices are unit 4-vectors in `(w, x, y, z)` layout; the patch is the
/// set of normalized non-negative combinations of the vertices.
#[derive(Debug, Clone)]
pub struct RotationCell {
    vertices: [Vector4<f64>; 4],
}

impl RotationCell {
    fn new(vertices: [Vector4<f64>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Vector4<f64>; 4] {
        &self.vertices
    }

    pub fn center_direction(&self) -> Vector4<f64> {
        (self.vertices[0] + self.vertices[1] + self.vertices[2] + self.vertices[3]).normalize()
    }

    /// Deterministic center representative of the patch.
    pub fn center(&self) -> UnitQuaternion<f64> {
        quaternion_from_vec4(&self.center_direction())
    }

    pub fn vertex_quaternion(&self, index: usize) -> UnitQuaternion<f64> {
        quaternion_from_vec4(&self.vertices[index])
    }

    /// Angular radius on S3: the largest angle between the center direction
    /// and a vertex. For a geodesically convex patch the vertex distance
    /// dominates every interior point.
    pub fn radius(&self) -> f64 {
        let c = self.center_direction();
        self.vertices
            .iter()
            .map(|v| c.dot(v).clamp(-1.0, 1.0).acos())
            .fold(0.0, f64::max)
    }

    /// Upper bound on the rotation angle between the center and any rotation
    /// in the patch. A quaternion perturbation by angle `a` on S3 rotates
    /// any direction by at most `2a`.
    pub fn rotation_radius(&self) -> f64 {
        (2.0 * self.radius()).min(std::f64::consts::PI)
    }

    /// Splits the patch into 4 children that exactly cover it, by bisecting
    /// the longest edge of the patch and then of each half.
    pub fn subdivide(&self) -> Vec<RotationCell> {
        let [a, b] = self.bisect();
        let [c0, c1] = a.bisect();
        let [c2, c3] = b.bisect();
        vec![c0, c1, c2, c3]
    }

    fn bisect(&self) -> [RotationCell; 2] {
        // The longest edge has the smallest vertex dot product; ties resolve
        // to the first edge in the fixed order for determinism.
        let mut longest = EDGES[0];
        let mut min_dot = f64::INFINITY;
        for &(i, j) in &EDGES {
            let d = self.vertices[i].dot(&self.vertices[j]);
            if d < min_dot {
                min_dot = d;
                longest = (i, j);
            }
        }
        let (i, j) = longest;
        let mid = (self.vertices[i] + self.vertices[j]).normalize();
        let mut left = self.vertices;
        let mut right = self.vertices;
        left[j] = mid;
        right[i] = mid;
        [RotationCell::new(left), RotationCell::new(right)]
    }

    /// Whether the patch contains the rotation (either quaternion sign).
    pub fn contains(&self, q: &UnitQuaternion<f64>) -> bool {
        let v = vec4_from_quaternion(q);
        self.contains_direction(&v) || self.contains_direction(&-v)
    }

    fn contains_direction(&self, v: &Vector4<f64>) -> bool {
        let basis = Matrix4::from_columns(&self.vertices);
        match basis.lu().solve(v) {
            Some(alpha) => alpha.iter().all(|&a| a >= -1e-9),
            None => false,
        }
    }
}

pub(crate) fn quaternion_from_vec4(v: &Vector4<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(v[0], v[1], v[2], v[3]))
}

pub(crate) fn vec4_from_quaternion(q: &UnitQuaternion<f64>) -> Vector4<f64> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

/// Generates the fixed coarse covering of rotation space: the 8 cells of the
/// 16-cell tessellation of S3 whose `w` vertex points to the positive
/// hemisphere. Deterministic, gap-free, with measure-zero overlap.
pub fn tessellate_rotations() -> Vec<RotationCell> {
    let mut cells = Vec::with_capacity(8);
    for &sx in &[1.0, -1.0] {
        for &sy in &[1.0, -1.0] {
            for &sz in &[1.0, -1.0] {
                cells.push(RotationCell::new([
                    Vector4::new(1.0, 0.0, 0.0, 0.0),
                    Vector4::new(0.0, sx, 0.0, 0.0),
                    Vector4::new(0.0, 0.0, sy, 0.0),
                    Vector4::new(0.0, 0.0, 0.0, sz),
                ]));
            }
        }
    }
    cells
}

/// An axis-aligned cube of translation space.
#[derive(Debug, Clone)]
pub struct TranslationCell {
    corner: Vector3<f64>,
    edge: f64,
}

impl TranslationCell {
    pub fn new(corner: Vector3<f64>, edge: f64) -> Self {
        Self { corner, edge }
    }

    pub fn edge(&self) -> f64 {
        self.edge
    }

    pub fn center(&self) -> Vector3<f64> {
        self.corner + Vector3::repeat(self.edge / 2.0)
    }

    pub fn corners(&self) -> [Vector3<f64>; 8] {
        let e = self.edge;
        let c = self.corner;
        let mut out = [c; 8];
        for (idx, corner) in out.iter_mut().enumerate() {
            for d in 0..3 {
                if idx >> d & 1 == 1 {
                    corner[d] += e;
                }
            }
        }
        out
    }

    /// Splits the cube into its 8 octants.
    pub fn subdivide(&self) -> Vec<TranslationCell> {
        let half = self.edge / 2.0;
        let mut children = Vec::with_capacity(8);
        for idx in 0..8usize {
            let mut corner = self.corner;
            for d in 0..3 {
                if idx >> d & 1 == 1 {
                    corner[d] += half;
                }
            }
            children.push(TranslationCell::new(corner, half));
        }
        children
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|d| p[d] >= self.corner[d] - 1e-12 && p[d] <= self.corner[d] + self.edge + 1e-12)
    }
}

/// Tiles `[min, max]` with cubes of the requested edge length. The grid is
/// extended past `max` where the edge length does not divide the box evenly,
/// so the box is always fully contained.
pub fn tessellate_translations(
    min: &Vector3<f64>,
    max: &Vector3<f64>,
    edge: f64,
) -> Result<Vec<TranslationCell>> {
    if !(edge > 0.0) || !edge.is_finite() {
        return Err(Error::InvalidInput(format!(
            "translation cell edge length {edge} must be positive and finite"
        )));
    }
    if (0..3).any(|d| max[d] < min[d]) {
        return Err(Error::InvalidInput(format!(
            "translation box min {min:?} exceeds max {max:?}"
        )));
    }
    let counts: Vec<usize> = (0..3)
        .map(|d| (((max[d] - min[d]) / edge).ceil() as usize).max(1))
        .collect();
    let mut cells = Vec::with_capacity(counts[0] * counts[1] * counts[2]);
    for i in 0..counts[0] {
        for j in 0..counts[1] {
            for k in 0..counts[2] {
                let corner = Vector3::new(
                    min[0] + i as f64 * edge,
                    min[1] + j as f64 * edge,
                    min[2] + k as f64 * edge,
                );
                cells.push(TranslationCell::new(corner, edge));
            }
        }
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Longest geodesic edge of the cell's vertex tetrahedron on S^3.
    fn max_edge(cell: &RotationCell) -> f64 {
        let verts = cell.vertices();
        EDGES
            .iter()
            .map(|&(i, j)| verts[i].dot(&verts[j]).clamp(-1.0, 1.0).acos())
            .fold(0.0f64, f64::max)
    }

    fn random_quaternion(rng: &mut StdRng) -> UnitQuaternion<f64> {
        loop {
            let v = Vector4::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            if v.norm() > 1e-3 {
                return quaternion_from_vec4(&v.normalize());
            }
        }
    }

    #[test]
    fn test_rotation_tessellation_covers_random_rotations() {
        let cells = tessellate_rotations();
        assert_eq!(cells.len(), 8);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let q = random_quaternion(&mut rng);
            let covered = cells.iter().filter(|c| c.contains(&q)).count();
            assert!(covered >= 1, "rotation {q} not covered by any seed cell");
        }
    }

    #[test]
    fn test_rotation_cell_subdivision_covers_parent() {
        let mut rng = StdRng::seed_from_u64(11);
        for parent in tessellate_rotations() {
            let children = parent.subdivide();
            assert_eq!(children.len(), 4);

            // Sample points of the parent patch and check a child holds each.
            for _ in 0..50 {
                let alpha = Vector4::new(
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                );
                let mut v = Vector4::zeros();
                for (k, vert) in parent.vertices().iter().enumerate() {
                    v += alpha[k] * vert;
                }
                let q = quaternion_from_vec4(&v.normalize());
                assert!(children.iter().any(|c| c.contains(&q)));
            }

            // Longest-edge bisection never lengthens an edge, so the
            // longest edge is non-increasing from parent to child. The
            // circumradius itself is not monotone for obtuse simplices.
            for child in &children {
                assert!(max_edge(child) <= max_edge(&parent) + 1e-12);
            }
        }
    }

    #[test]
    fn test_rotation_cell_shrinks_along_subdivision_chain() {
        let mut cell = tessellate_rotations().remove(0);
        let mut longest = max_edge(&cell);
        for _ in 0..30 {
            cell = cell.subdivide().remove(0);
            let e = max_edge(&cell);
            assert!(e <= longest + 1e-12);
            longest = e;
        }
        // Sixty bisections halve the longest edge at least every six of
        // them, so the cell is tiny and its covering radius has shrunk
        // with the edges.
        assert!(longest < 1e-2);
        assert!(cell.radius() < 0.1);
    }

    #[test]
    fn test_translation_grid_unit_box_half_edge() {
        // A [-1,1]^3 box at edge 0.5 needs exactly 4 cells per axis, and
        // every center stays within the half-edge-expanded box.
        let min = Vector3::repeat(-1.0);
        let max = Vector3::repeat(1.0);
        let cells = tessellate_translations(&min, &max, 0.5).unwrap();
        assert_eq!(cells.len(), 64);
        for cell in &cells {
            let c = cell.center();
            for d in 0..3 {
                assert!(c[d] >= -1.0 - 0.25 && c[d] <= 1.0 + 0.25);
            }
        }
    }

    #[test]
    fn test_translation_grid_contains_requested_box() {
        let min = Vector3::new(-0.7, 0.2, 1.0);
        let max = Vector3::new(1.3, 0.9, 1.1);
        let cells = tessellate_translations(&min, &max, 0.3).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let p = Vector3::new(
                rng.gen_range(min[0]..max[0]),
                rng.gen_range(min[1]..max[1]),
                rng.gen_range(min[2]..max[2]),
            );
            assert!(cells.iter().any(|c| c.contains(&p)));
        }
    }

    #[test]
    fn test_translation_grid_rejects_bad_inputs() {
        let min = Vector3::zeros();
        let max = Vector3::repeat(1.0);
        assert!(tessellate_translations(&min, &max, 0.0).is_err());
        assert!(tessellate_translations(&max, &min, 0.5).is_err());
    }

    #[test]
    fn test_translation_cell_octants_cover_parent() {
        let parent = TranslationCell::new(Vector3::new(-1.0, 2.0, 0.5), 2.0);
        let children = parent.subdivide();
        assert_eq!(children.len(), 8);

        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..200 {
            let mut p = parent.center();
            for d in 0..3 {
                p[d] += rng.gen_range(-1.0..1.0);
            }
            assert!(parent.contains(&p));
            assert!(children.iter().any(|c| c.contains(&p)));
        }
    }

    #[test]
    fn test_degenerate_box_still_produces_one_cell_per_axis() {
        let min = Vector3::zeros();
        let max = Vector3::zeros();
        let cells = tessellate_translations(&min, &max, 0.5).unwrap();
        assert_eq!(cells.len(), 1);
        assert!(cells[0].contains(&Vector3::zeros()));
    }
}
