//! Bounds for the rotation search over von Mises-Fisher mixtures.
//!
//! The rotation objective is the integral of the product of the two
//! directional mixture densities, one of them rotated. For a component pair
//! `(i, j)` the integral has the closed form
//! `w_i w_j Z(tau_i) Z(tau_j) 4 pi sinh(z) / z` with
//! `z = |tau_i mu_i + tau_j R nu_j|`, so each pair term depends on the
//! rotation only through the cosine `c = mu_i . (R nu_j)`. All pair terms
//! are computed in the log domain; `z <= tau_i + tau_j` keeps the combined
//! exponent non-positive and safe from overflow for arbitrarily sharp
//! clusters.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use crate::mixture::{ln_sinh_over, DirectionalComponent, Mixture, MixtureComponent};
use crate::tessellation::RotationCell;

use super::{max_form_over_cell, rotation_cosine_form, CellBound, CellLowerBound};

struct VmfPair {
    mean_a: Vector3<f64>,
    mean_b: Vector3<f64>,
    tau_a: f64,
    tau_b: f64,
    // ln(w_a w_b Z(tau_a) Z(tau_b) 4 pi). The normalizers contribute
    // -ln_sinh_over(tau) each, which cancels the growth of ln_sinh_over(z)
    // in the pair term since z <= tau_a + tau_b, so the single exp in
    // `value` never sees a large argument.
    ln_coeff: f64,
}

impl VmfPair {
    /// Pair term as a function of the alignment cosine `c in [-1, 1]`.
    fn value(&self, c: f64) -> f64 {
        let z = (self.tau_a * self.tau_a
            + self.tau_b * self.tau_b
            + 2.0 * self.tau_a * self.tau_b * c)
            .max(0.0)
            .sqrt();
        (self.ln_coeff + ln_sinh_over(z)).exp()
    }

    fn cosine(&self, rotation: &UnitQuaternion<f64>) -> f64 {
        self.mean_a.dot(&(rotation * self.mean_b)).clamp(-1.0, 1.0)
    }
}

/// The rotation-stage objective: similarity between a fixed directional
/// mixture and a rotated one, precomputed as a flat pair table.
pub struct DirectionalObjective {
    pairs: Vec<VmfPair>,
}

impl DirectionalObjective {
    pub fn new(
        fixed: &Mixture<DirectionalComponent>,
        rotated: &Mixture<DirectionalComponent>,
    ) -> Self {
        let mut pairs = Vec::with_capacity(fixed.len() * rotated.len());
        for a in fixed.components() {
            for b in rotated.components() {
                pairs.push(VmfPair {
                    mean_a: *a.mean(),
                    mean_b: *b.mean(),
                    tau_a: a.concentration(),
                    tau_b: b.concentration(),
                    ln_coeff: a.weight().ln()
                        + b.weight().ln()
                        + a.ln_normalizer()
                        + b.ln_normalizer()
                        + crate::mixture::LN_4PI,
                });
            }
        }
        Self { pairs }
    }

    /// Exact objective value at one rotation.
    pub fn evaluate(&self, rotation: &UnitQuaternion<f64>) -> f64 {
        self.pairs
            .iter()
            .map(|p| p.value(p.cosine(rotation)))
            .sum()
    }

    /// Cosine interval `[c_lo, c_hi]` reachable by a pair inside a cell of
    /// angular radius `omega` around the center rotation.
    fn cosine_interval(pair: &VmfPair, center: &UnitQuaternion<f64>, omega: f64) -> (f64, f64) {
        let gamma = pair.cosine(center).acos();
        let hi = (gamma - omega).max(0.0).cos();
        let lo = (gamma + omega).min(std::f64::consts::PI).cos();
        (lo, hi)
    }
}

/// Achievable lower bound: the objective evaluated at the cell center and
/// the four cell vertices, best value kept along with the rotation that
/// produced it.
pub struct DirectionalLowerBound<'a> {
    objective: &'a DirectionalObjective,
}

impl<'a> DirectionalLowerBound<'a> {
    pub fn new(objective: &'a DirectionalObjective) -> Self {
        Self { objective }
    }
}

impl CellLowerBound<RotationCell> for DirectionalLowerBound<'_> {
    type Transform = UnitQuaternion<f64>;

    fn evaluate(&self, cell: &RotationCell) -> (f64, UnitQuaternion<f64>) {
        let mut best_rotation = cell.center();
        let mut best = self.objective.evaluate(&best_rotation);
        for i in 0..4 {
            let q = cell.vertex_quaternion(i);
            let value = self.objective.evaluate(&q);
            if value > best {
                best = value;
                best_rotation = q;
            }
        }
        (best, best_rotation)
    }
}

/// Independent-pair upper bound: each pair is maximized over its own cosine
/// interval, ignoring that a single rotation must serve all pairs at once.
pub struct DirectionalIndependentBound<'a> {
    objective: &'a DirectionalObjective,
}

impl<'a> DirectionalIndependentBound<'a> {
    pub fn new(objective: &'a DirectionalObjective) -> Self {
        Self { objective }
    }
}

impl CellBound<RotationCell> for DirectionalIndependentBound<'_> {
    fn evaluate(&self, cell: &RotationCell) -> f64 {
        let center = cell.center();
        let omega = cell.rotation_radius();
        self.objective
            .pairs
            .iter()
            .map(|p| {
                let (_, hi) = DirectionalObjective::cosine_interval(p, &center, omega);
                // Pair terms increase with the cosine.
                p.value(hi)
            })
            .sum()
    }
}

/// Convexity upper bound: every pair term is convex in its cosine, so on the
/// pair's cosine interval it lies below the chord `s c + g`. Summing chords
/// gives `sum g + q^T S q` with `S` the slope-weighted sum of the pair
/// cosine forms, maximized exactly over the cell.
pub struct DirectionalConvexityBound<'a> {
    objective: &'a DirectionalObjective,
}

impl<'a> DirectionalConvexityBound<'a> {
    pub fn new(objective: &'a DirectionalObjective) -> Self {
        Self { objective }
    }
}

impl CellBound<RotationCell> for DirectionalConvexityBound<'_> {
    fn evaluate(&self, cell: &RotationCell) -> f64 {
        let center = cell.center();
        let omega = cell.rotation_radius();

        let mut offset = 0.0;
        let mut form = Matrix4::zeros();
        let mut has_form = false;
        for pair in &self.objective.pairs {
            let (lo, hi) = DirectionalObjective::cosine_interval(pair, &center, omega);
            let f_hi = pair.value(hi);
            if hi - lo < 1e-12 {
                offset += f_hi;
                continue;
            }
            let f_lo = pair.value(lo);
            let slope = (f_hi - f_lo) / (hi - lo);
            offset += f_lo - slope * lo;
            if slope != 0.0 {
                form += slope * rotation_cosine_form(&pair.mean_a, &pair.mean_b);
                has_form = true;
            }
        }
        if has_form {
            offset + max_form_over_cell(&form, cell)
        } else {
            offset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tessellation::{quaternion_from_vec4, tessellate_rotations};
    use approx::assert_relative_eq;
    use nalgebra::Vector4;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_mixture(rng: &mut StdRng, n: usize) -> Mixture<DirectionalComponent> {
        let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(0.2..1.0)).collect();
        let total: f64 = raw.iter().sum();
        let components = raw
            .into_iter()
            .map(|w| {
                let mean = Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                DirectionalComponent::new(mean, rng.gen_range(0.5..30.0), w / total).unwrap()
            })
            .collect();
        Mixture::new(components).unwrap()
    }

    fn sample_in_cell(cell: &RotationCell, rng: &mut StdRng) -> UnitQuaternion<f64> {
        let mut v = Vector4::zeros();
        for vert in cell.vertices() {
            v += rng.gen_range(1e-3..1.0) * vert;
        }
        quaternion_from_vec4(&v.normalize())
    }

    #[test]
    fn test_objective_matches_closed_form_for_aligned_pair() {
        let a = Mixture::new(vec![DirectionalComponent::new(Vector3::z(), 4.0, 1.0).unwrap()])
            .unwrap();
        let b = Mixture::new(vec![DirectionalComponent::new(Vector3::z(), 4.0, 1.0).unwrap()])
            .unwrap();
        let objective = DirectionalObjective::new(&a, &b);

        // Aligned means: z = 8, value = Z(4)^2 * 4 pi * sinh(8) / 8.
        let z4 = 4.0 / (4.0 * std::f64::consts::PI * 4.0f64.sinh());
        let expected = z4 * z4 * 4.0 * std::f64::consts::PI * 8.0f64.sinh() / 8.0;
        assert_relative_eq!(
            objective.evaluate(&UnitQuaternion::identity()),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_objective_peaks_at_aligning_rotation() {
        let mut rng = StdRng::seed_from_u64(3);
        let truth = UnitQuaternion::from_euler_angles(0.4, -0.2, 1.1);
        let a = random_mixture(&mut rng, 4);
        let rotated = a
            .components()
            .iter()
            .map(|c| {
                DirectionalComponent::new(
                    truth.inverse() * c.mean(),
                    c.concentration(),
                    c.weight(),
                )
                .unwrap()
            })
            .collect();
        let b = Mixture::new(rotated).unwrap();
        let objective = DirectionalObjective::new(&a, &b);

        let at_truth = objective.evaluate(&truth);
        for _ in 0..50 {
            let q = UnitQuaternion::from_euler_angles(
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-3.0..3.0),
            );
            assert!(objective.evaluate(&q) <= at_truth + 1e-12);
        }
    }

    #[test]
    fn test_bounds_bracket_sampled_rotations() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = random_mixture(&mut rng, 3);
        let b = random_mixture(&mut rng, 4);
        let objective = DirectionalObjective::new(&a, &b);
        let lower = DirectionalLowerBound::new(&objective);
        let independent = DirectionalIndependentBound::new(&objective);
        let convexity = DirectionalConvexityBound::new(&objective);

        let mut cells = tessellate_rotations();
        for _ in 0..3 {
            // Random descent keeps the cell count manageable across depths.
            let deeper: Vec<_> = cells
                .iter()
                .map(|c| {
                    let children = c.subdivide();
                    children[rng.gen_range(0..children.len())].clone()
                })
                .collect();
            cells.extend(deeper);
        }

        for cell in &cells {
            let (lo, at) = lower.evaluate(cell);
            assert_relative_eq!(lo, objective.evaluate(&at), epsilon = 1e-12);
            let u_ind = independent.evaluate(cell);
            let u_cvx = convexity.evaluate(cell);
            assert!(lo <= u_ind + 1e-9, "lower {lo} above independent {u_ind}");
            assert!(lo <= u_cvx + 1e-9, "lower {lo} above convexity {u_cvx}");
            for _ in 0..40 {
                let q = sample_in_cell(cell, &mut rng);
                let value = objective.evaluate(&q);
                assert!(value <= u_ind + 1e-9);
                assert!(value <= u_cvx + 1e-9);
            }
        }
    }

    #[test]
    fn test_lower_bound_reports_achieving_vertex_rotation() {
        // Identical mixtures peak at the identity, which is a vertex of
        // every seed cell. The lower bound must hand back that vertex, not
        // the far-away cell center.
        let a = Mixture::new(vec![
            DirectionalComponent::new(Vector3::z(), 20.0, 0.6).unwrap(),
            DirectionalComponent::new(Vector3::x(), 10.0, 0.4).unwrap(),
        ])
        .unwrap();
        let objective = DirectionalObjective::new(&a, &a);
        let lower = DirectionalLowerBound::new(&objective);

        for cell in tessellate_rotations() {
            let (value, rotation) = lower.evaluate(&cell);
            assert_relative_eq!(value, objective.evaluate(&rotation), epsilon = 1e-12);
            assert!(
                rotation.angle() < 1e-9,
                "achieving rotation is {:.4} rad from the identity vertex",
                rotation.angle()
            );
        }
    }

    #[test]
    fn test_convexity_bound_tightens_with_subdivision() {
        let mut rng = StdRng::seed_from_u64(23);
        let a = random_mixture(&mut rng, 3);
        let b = a.clone();
        let objective = DirectionalObjective::new(&a, &b);
        let convexity = DirectionalConvexityBound::new(&objective);

        // Identical mixtures peak at the identity rotation, which sits on
        // every seed cell. Following the identity-containing chain, the
        // bound must stay above the optimum and close in on it as the cell
        // shrinks.
        let identity = UnitQuaternion::identity();
        let optimum = objective.evaluate(&identity);
        let mut cell = tessellate_rotations()
            .into_iter()
            .find(|c| c.contains(&identity))
            .unwrap();
        let coarse = convexity.evaluate(&cell);
        assert!(coarse >= optimum - 1e-9);
        for _ in 0..8 {
            cell = cell
                .subdivide()
                .into_iter()
                .find(|c| c.contains(&identity))
                .unwrap();
        }
        let fine = convexity.evaluate(&cell);
        assert!(fine >= optimum - 1e-9);
        assert!(fine - optimum <= 0.2 * (coarse - optimum) + 1e-9);
    }

    #[test]
    fn test_sharp_concentrations_stay_finite() {
        let a = Mixture::new(vec![
            DirectionalComponent::new(Vector3::z(), 4000.0, 0.6).unwrap(),
            DirectionalComponent::new(Vector3::x(), 2500.0, 0.4).unwrap(),
        ])
        .unwrap();
        let b = a.clone();
        let objective = DirectionalObjective::new(&a, &b);
        let value = objective.evaluate(&UnitQuaternion::identity());
        assert!(value.is_finite() && value > 0.0);

        let convexity = DirectionalConvexityBound::new(&objective);
        for cell in tessellate_rotations() {
            assert!(convexity.evaluate(&cell).is_finite());
        }
    }
}
