//! Bounds for the translation search over Gaussian mixtures.
//!
//! With the rotation fixed, the objective is the integral of the product of
//! the two spatial mixture densities as a function of the translation. Each
//! component pair collapses to a single Gaussian in the translation:
//! `w_i w_j N(t; m_i - R m_j, S_i + R S_j R^T)`. Pair means, combined
//! precisions and eigendecompositions are precomputed once per rotation.

use nalgebra::{Cholesky, Matrix3, SymmetricEigen, UnitQuaternion, Vector3};

use crate::mixture::{Mixture, MixtureComponent, SpatialComponent};
use crate::tessellation::TranslationCell;
use crate::{Error, Result};

use super::{CellBound, CellLowerBound};

const LN_2PI: f64 = 1.8378770664093453;

struct GaussPair {
    mean: Vector3<f64>,
    precision: Matrix3<f64>,
    // ln(w_a w_b) - 3/2 ln(2 pi) - 1/2 ln det(S).
    ln_coeff: f64,
    axes: Matrix3<f64>,
    variances: Vector3<f64>,
}

impl GaussPair {
    fn value(&self, t: &Vector3<f64>) -> f64 {
        let d = t - self.mean;
        (self.ln_coeff - 0.5 * (self.precision * d).dot(&d)).exp()
    }
}

/// The translation-stage objective for one fixed rotation.
pub struct SpatialObjective {
    pairs: Vec<GaussPair>,
}

impl SpatialObjective {
    pub fn new(
        fixed: &Mixture<SpatialComponent>,
        rotated: &Mixture<SpatialComponent>,
        rotation: &UnitQuaternion<f64>,
    ) -> Result<Self> {
        let r = rotation.to_rotation_matrix();
        let rm = r.matrix();
        let mut pairs = Vec::with_capacity(fixed.len() * rotated.len());
        for a in fixed.components() {
            for b in rotated.components() {
                let covariance = a.covariance() + rm * b.covariance() * rm.transpose();
                let chol = Cholesky::new(covariance).ok_or_else(|| {
                    Error::NumericalDegeneracy(
                        "combined pair covariance is not positive-definite".into(),
                    )
                })?;
                let ln_det: f64 = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
                let eig = SymmetricEigen::new(covariance);
                if eig.eigenvalues.iter().any(|&v| !(v > 0.0)) {
                    return Err(Error::NumericalDegeneracy(
                        "combined pair covariance has non-positive eigenvalues".into(),
                    ));
                }
                pairs.push(GaussPair {
                    mean: a.mean() - rotation * b.mean(),
                    precision: chol.inverse(),
                    ln_coeff: a.weight().ln() + b.weight().ln() - 1.5 * LN_2PI - 0.5 * ln_det,
                    axes: eig.eigenvectors,
                    variances: eig.eigenvalues,
                });
            }
        }
        Ok(Self { pairs })
    }

    /// Exact objective value at one translation.
    pub fn evaluate(&self, t: &Vector3<f64>) -> f64 {
        self.pairs.iter().map(|p| p.value(t)).sum()
    }
}

/// Achievable lower bound: the objective at the cell center and the 8 cell
/// corners, best value kept along with the translation that produced it.
pub struct SpatialLowerBound<'a> {
    objective: &'a SpatialObjective,
}

impl<'a> SpatialLowerBound<'a> {
    pub fn new(objective: &'a SpatialObjective) -> Self {
        Self { objective }
    }
}

impl CellLowerBound<TranslationCell> for SpatialLowerBound<'_> {
    type Transform = Vector3<f64>;

    fn evaluate(&self, cell: &TranslationCell) -> (f64, Vector3<f64>) {
        let mut best_translation = cell.center();
        let mut best = self.objective.evaluate(&best_translation);
        for corner in cell.corners() {
            let value = self.objective.evaluate(&corner);
            if value > best {
                best = value;
                best_translation = corner;
            }
        }
        (best, best_translation)
    }
}

/// Independent-pair upper bound: each pair's Mahalanobis distance is
/// minimized per principal axis of its combined covariance, allowing each
/// axis its own minimizer within the cell's reach.
pub struct SpatialIndependentBound<'a> {
    objective: &'a SpatialObjective,
}

impl<'a> SpatialIndependentBound<'a> {
    pub fn new(objective: &'a SpatialObjective) -> Self {
        Self { objective }
    }
}

impl CellBound<TranslationCell> for SpatialIndependentBound<'_> {
    fn evaluate(&self, cell: &TranslationCell) -> f64 {
        let center = cell.center();
        let half = cell.edge() / 2.0;
        self.objective
            .pairs
            .iter()
            .map(|pair| {
                let offset = center - pair.mean;
                let mut mahal = 0.0;
                for k in 0..3 {
                    let axis = pair.axes.column(k);
                    let y = axis.dot(&offset);
                    // The cell projects onto the axis to an interval of
                    // half-width h = half * |axis|_1 around y.
                    let reach = half * (axis[0].abs() + axis[1].abs() + axis[2].abs());
                    let nearest = if y > reach {
                        y - reach
                    } else if y < -reach {
                        y + reach
                    } else {
                        0.0
                    };
                    mahal += nearest * nearest / pair.variances[k];
                }
                (pair.ln_coeff - 0.5 * mahal).exp()
            })
            .sum()
    }
}

/// Convexity upper bound. Each pair's log-density is concave, so its
/// tangent plane at the cell center dominates it everywhere and
/// `exp(tangent)` dominates the pair term. The sum of exponentials of
/// affine functions is convex, hence maximal at a cell corner; the corner
/// maximum of the linearized sum is therefore a valid cell bound.
pub struct SpatialConvexityBound<'a> {
    objective: &'a SpatialObjective,
}

impl<'a> SpatialConvexityBound<'a> {
    pub fn new(objective: &'a SpatialObjective) -> Self {
        Self { objective }
    }
}

impl CellBound<TranslationCell> for SpatialConvexityBound<'_> {
    fn evaluate(&self, cell: &TranslationCell) -> f64 {
        let center = cell.center();
        // Per pair: exponent at the center and its gradient there.
        let linearized: Vec<(f64, Vector3<f64>)> = self
            .objective
            .pairs
            .iter()
            .map(|pair| {
                let d = center - pair.mean;
                let grad = -(pair.precision * d);
                let at_center = pair.ln_coeff - 0.5 * (pair.precision * d).dot(&d);
                (at_center, grad)
            })
            .collect();

        let mut best = f64::NEG_INFINITY;
        for corner in cell.corners() {
            let step = corner - center;
            let total: f64 = linearized
                .iter()
                .map(|(at_center, grad)| (at_center + grad.dot(&step)).exp())
                .sum();
            best = best.max(total);
        }
        best
    }
}
