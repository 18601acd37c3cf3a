//! Bound functions driving the branch-and-bound searches.
//!
//! For every cell of a search domain a bound strategy produces a provable
//! bracket around the best objective value achievable inside the cell:
//! the lower bound is the objective evaluated at concrete transforms of the
//! cell (center and vertices/corners), the upper bounds dominate the
//! objective everywhere in the cell. Two upper-bound strategies exist per
//! domain: an independent-pair bound (cheap, loose) and a convexity bound
//! (tighter, the default for pruning).

pub mod rotation;
pub mod translation;

use nalgebra::{DMatrix, DVector, Matrix4, SymmetricEigen, Vector3};

use crate::tessellation::RotationCell;

pub use rotation::{
    DirectionalConvexityBound, DirectionalIndependentBound, DirectionalLowerBound,
    DirectionalObjective,
};
pub use translation::{
    SpatialConvexityBound, SpatialIndependentBound, SpatialLowerBound, SpatialObjective,
};

/// Evaluates one upper bound over a whole cell.
pub trait CellBound<C> {
    fn evaluate(&self, cell: &C) -> f64;
}

/// Achieved lower bound over a cell: the objective evaluated at concrete
/// transforms of the cell, reported together with the transform that
/// achieved the best value. The search returns that transform, so an
/// optimum sitting on a cell vertex is never misreported as the center.
pub trait CellLowerBound<C> {
    type Transform: Clone;

    fn evaluate(&self, cell: &C) -> (f64, Self::Transform);
}

/// Quadratic form `M` with `q^T M q = a . (R(q) b)` for unit quaternions
/// `q = (w, x, y, z)`.
///
/// Derived from `R(q) b = b + 2w (v x b) + 2 v x (v x b)` with `v = (x,y,z)`:
/// `a . R(q) b = (a.b)(w^2 - |v|^2) + 2w v.(b x a) + 2 (a.v)(b.v)`.
pub(crate) fn rotation_cosine_form(a: &Vector3<f64>, b: &Vector3<f64>) -> Matrix4<f64> {
    let d = a.dot(b);
    let c = b.cross(a);
    let mut m = Matrix4::zeros();
    m[(0, 0)] = d;
    for i in 0..3 {
        m[(0, i + 1)] = c[i];
        m[(i + 1, 0)] = c[i];
        for j in 0..3 {
            m[(i + 1, j + 1)] = a[i] * b[j] + b[i] * a[j];
        }
        m[(i + 1, i + 1)] -= d;
    }
    m
}

/// Upper bound on `max q^T M q` over the unit quaternions of a rotation
/// cell.
///
/// Writing cell members as `q = V alpha / |V alpha|` with `alpha >= 0`, the
/// problem is the maximum of the generalized Rayleigh quotient
/// `alpha^T B alpha / alpha^T N alpha` (`B = V^T M V`, `N = V^T V`) over the
/// non-negative cone. The maximizer is a KKT point supported on some vertex
/// subset, i.e. a sign-consistent generalized eigenvector of the subset
/// pencil, so enumerating all 15 subsets covers it. Sign feasibility is
/// checked with a generous tolerance; false positives only loosen the bound.
pub(crate) fn max_form_over_cell(form: &Matrix4<f64>, cell: &RotationCell) -> f64 {
    let v = Matrix4::from_columns(cell.vertices());
    let sym = (form + form.transpose()) * 0.5;
    let b_full = v.transpose() * sym * v;
    let n_full = v.transpose() * v;

    let mut best = f64::NEG_INFINITY;
    for mask in 1u32..16 {
        let idx: Vec<usize> = (0..4).filter(|i| mask >> i & 1 == 1).collect();
        let k = idx.len();
        let b_s = DMatrix::from_fn(k, k, |r, c| b_full[(idx[r], idx[c])]);
        let n_s = DMatrix::from_fn(k, k, |r, c| n_full[(idx[r], idx[c])]);

        let Some(chol) = n_s.cholesky() else {
            // Degenerate vertex geometry; fall back to the sphere-wide bound.
            return SymmetricEigen::new(sym).eigenvalues.max();
        };
        let l = chol.l();
        // A = L^-1 B L^-T, symmetric with the pencil's eigenvalues.
        let Some(x) = l.solve_lower_triangular(&b_s) else {
            return SymmetricEigen::new(sym).eigenvalues.max();
        };
        let Some(y) = l.solve_lower_triangular(&x.transpose()) else {
            return SymmetricEigen::new(sym).eigenvalues.max();
        };
        let a = (y.transpose() + y) * 0.5;

        let eig = SymmetricEigen::new(a);
        for (col, &lambda) in eig.eigenvalues.iter().enumerate() {
            let w: DVector<f64> = eig.eigenvectors.column(col).into();
            // alpha solves L^T alpha = w.
            let Some(mut alpha) = l.transpose().solve_upper_triangular(&w) else {
                continue;
            };
            let amax = alpha.iter().cloned().fold(0.0f64, |m, x| m.max(x.abs()));
            if amax == 0.0 {
                continue;
            }
            let lead = alpha.iter().cloned().max_by(|p, q| p.abs().total_cmp(&q.abs()));
            if let Some(lead) = lead {
                if lead < 0.0 {
                    alpha.neg_mut();
                }
            }
            if alpha.iter().all(|&a| a >= -1e-6 * amax) && lambda > best {
                best = lambda;
            }
        }
    }
    best
}
