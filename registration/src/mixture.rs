//! Mixture components produced by clustering and consumed by the bounds.
//!
//! Components are immutable snapshots: once a mixture is built at pipeline
//! start it is never mutated, so bound evaluation can borrow it freely.

use nalgebra::{Cholesky, Matrix3, Vector3};

use crate::{Error, Result};

pub const LN_4PI: f64 = 2.531024246969291; // ln(4*pi)

/// Numerically stable `ln(sinh(x))` for `x > 0`.
pub(crate) fn ln_sinh(x: f64) -> f64 {
    if x < 1e-4 {
        // sinh(x)/x -> 1 + x^2/6
        x.ln() + x * x / 6.0
    } else {
        x + (-(-2.0 * x).exp()).ln_1p() - std::f64::consts::LN_2
    }
}

/// Numerically stable `ln(sinh(z) / z)`, defined as 0 at `z = 0`.
pub(crate) fn ln_sinh_over(z: f64) -> f64 {
    if z < 1e-4 {
        z * z / 6.0
    } else {
        ln_sinh(z) - z.ln()
    }
}

/// Log normalizer of a 3D von Mises-Fisher density with concentration `tau`.
///
/// `Z(tau) = tau / (4*pi*sinh(tau))`, converging to `1/(4*pi)` as `tau -> 0`.
pub(crate) fn ln_vmf_normalizer(tau: f64) -> f64 {
    -LN_4PI - ln_sinh_over(tau)
}

pub trait MixtureComponent {
    fn weight(&self) -> f64;
}

/// One entry of a directional mixture on the unit sphere: a von Mises-Fisher
/// cluster of surface normals.
#[derive(Debug, Clone)]
pub struct DirectionalComponent {
    mean: Vector3<f64>,
    concentration: f64,
    weight: f64,
}

impl DirectionalComponent {
    /// Builds a component from a mean direction (normalized internally), a
    /// concentration and a mixing weight.
    pub fn new(mean: Vector3<f64>, concentration: f64, weight: f64) -> Result<Self> {
        if !mean.iter().all(|v| v.is_finite()) || mean.norm() < 1e-12 {
            return Err(Error::MalformedMixture(format!(
                "directional mean {:?} cannot be normalized",
                mean
            )));
        }
        if !concentration.is_finite() || concentration < 0.0 {
            return Err(Error::MalformedMixture(format!(
                "concentration {} must be finite and non-negative",
                concentration
            )));
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(Error::MalformedMixture(format!(
                "component weight {} must be positive",
                weight
            )));
        }
        Ok(Self {
            mean: mean.normalize(),
            concentration,
            weight,
        })
    }

    pub fn mean(&self) -> &Vector3<f64> {
        &self.mean
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub(crate) fn ln_normalizer(&self) -> f64 {
        ln_vmf_normalizer(self.concentration)
    }
}

impl MixtureComponent for DirectionalComponent {
    fn weight(&self) -> f64 {
        self.weight
    }
}

/// One entry of a spatial Gaussian mixture over point positions.
#[derive(Debug, Clone)]
pub struct SpatialComponent {
    mean: Vector3<f64>,
    covariance: Matrix3<f64>,
    weight: f64,
}

impl SpatialComponent {
    /// Builds a component from a mean, a symmetric positive-definite
    /// covariance (callers regularize before construction) and a weight.
    pub fn new(mean: Vector3<f64>, covariance: Matrix3<f64>, weight: f64) -> Result<Self> {
        if !mean.iter().all(|v| v.is_finite()) {
            return Err(Error::MalformedMixture(format!(
                "spatial mean {:?} is not finite",
                mean
            )));
        }
        let asym = (covariance - covariance.transpose()).norm();
        if !covariance.iter().all(|v| v.is_finite()) || asym > 1e-9 * (1.0 + covariance.norm()) {
            return Err(Error::MalformedMixture(
                "covariance must be finite and symmetric".into(),
            ));
        }
        if Cholesky::new(covariance).is_none() {
            return Err(Error::MalformedMixture(
                "covariance is not positive-definite after regularization".into(),
            ));
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(Error::MalformedMixture(format!(
                "component weight {} must be positive",
                weight
            )));
        }
        Ok(Self {
            mean,
            covariance,
            weight,
        })
    }

    pub fn mean(&self) -> &Vector3<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Matrix3<f64> {
        &self.covariance
    }
}

impl MixtureComponent for SpatialComponent {
    fn weight(&self) -> f64 {
        self.weight
    }
}

/// A finite mixture of one component kind describing one point cloud.
///
/// Invariants enforced at construction: at least one component, all weights
/// positive, weights summing to one within floating tolerance.
#[derive(Debug, Clone)]
pub struct Mixture<C: MixtureComponent> {
    components: Vec<C>,
}

impl<C: MixtureComponent> Mixture<C> {
    pub fn new(components: Vec<C>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::MalformedMixture(
                "mixture must contain at least one component".into(),
            ));
        }
        let total: f64 = components.iter().map(|c| c.weight()).sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(Error::MalformedMixture(format!(
                "component weights sum to {total}, expected 1"
            )));
        }
        Ok(Self { components })
    }

    pub fn components(&self) -> &[C] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
