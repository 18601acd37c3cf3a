//! The two-stage registration pipeline.
//!
//! Both clouds are condensed into mixture summaries, then a certified
//! rotation search and a certified translation search run back to back. The
//! resulting transform maps points of the second cloud into the frame of
//! the first: `p_a = R p_b + t`.

use log::info;
use nalgebra::{UnitQuaternion, Vector3};

use cloudalign_core::{OrientedPointCloud, RigidTransform};

use crate::bounds::{
    DirectionalConvexityBound, DirectionalLowerBound, DirectionalObjective,
    SpatialConvexityBound, SpatialLowerBound, SpatialObjective,
};
use crate::clustering::{
    directional_mixture_from, spatial_mixture_from, Clusterer, EuclideanDpMeans, SphericalDpMeans,
};
use crate::mixture::{DirectionalComponent, Mixture, SpatialComponent};
use crate::search::{BranchAndBound, SearchOutcome, SearchStatus};
use crate::tessellation::{tessellate_rotations, tessellate_translations};
use crate::{Error, Result};

/// Tuning knobs of the full pipeline. The defaults are sized for indoor
/// depth-sensor scans in meters.
#[derive(Debug, Clone)]
pub struct RegistrationParams {
    /// Cluster opening angle of the normal clustering, radians.
    pub lambda_directional: f64,
    /// Cluster spawn radius of the position clustering, same unit as the
    /// cloud coordinates.
    pub lambda_spatial: f64,
    /// Focal length used for depth-based area weighting of normals, pixels.
    pub focal_depth: f64,
    /// Diagonal added to every spatial covariance.
    pub covariance_regularization: f64,
    /// Edge length of the initial translation grid cells; `None` sizes the
    /// cells from the search box.
    pub translation_cell_edge: Option<f64>,
    /// Absolute optimality gap at which a search stage is certified.
    pub epsilon: f64,
    /// Subdivision budget per search stage.
    pub max_iterations: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            lambda_directional: 93.0f64.to_radians(),
            lambda_spatial: 1.0,
            focal_depth: 540.0,
            covariance_regularization: 0.01,
            translation_cell_edge: None,
            epsilon: 1e-5,
            max_iterations: 1000,
        }
    }
}

impl RegistrationParams {
    fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) || !self.epsilon.is_finite() {
            return Err(Error::InvalidInput(format!(
                "epsilon {} must be positive and finite",
                self.epsilon
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidInput(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.focal_depth > 0.0) {
            return Err(Error::InvalidInput(format!(
                "focal_depth {} must be positive",
                self.focal_depth
            )));
        }
        if !(self.covariance_regularization > 0.0) {
            return Err(Error::InvalidInput(format!(
                "covariance_regularization {} must be positive",
                self.covariance_regularization
            )));
        }
        Ok(())
    }
}

/// Certification summary of one search stage.
#[derive(Debug, Clone)]
pub struct SearchReport {
    /// Best achieved objective value.
    pub value: f64,
    /// Residual optimality gap at termination.
    pub gap: f64,
    pub iterations: usize,
    pub certified: bool,
}

impl SearchReport {
    fn from_outcome<C, T>(outcome: &SearchOutcome<C, T>) -> Self {
        Self {
            value: outcome.value,
            gap: outcome.gap,
            iterations: outcome.iterations,
            certified: outcome.status == SearchStatus::Certified,
        }
    }
}

/// The registered transform with per-stage certificates.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Maps points of the second cloud into the frame of the first.
    pub transform: RigidTransform,
    pub rotation: SearchReport,
    pub translation: SearchReport,
}

impl AlignmentResult {
    /// Whether both stages closed their optimality gap within epsilon.
    pub fn certified(&self) -> bool {
        self.rotation.certified && self.translation.certified
    }

    /// Carries a cloud (typically the second input) through the recovered
    /// transform.
    pub fn apply(&self, cloud: &OrientedPointCloud) -> OrientedPointCloud {
        self.transform.apply(cloud)
    }
}

/// Registers `cloud_b` onto `cloud_a` with the built-in DP-means
/// clusterers.
pub fn align(
    cloud_a: &OrientedPointCloud,
    cloud_b: &OrientedPointCloud,
    params: &RegistrationParams,
) -> Result<AlignmentResult> {
    let directional = SphericalDpMeans::new(params.lambda_directional);
    let spatial = EuclideanDpMeans::new(params.lambda_spatial);
    align_with_clusterers(cloud_a, cloud_b, &directional, &spatial, params)
}

/// Registers `cloud_b` onto `cloud_a` with caller-provided clusterers.
pub fn align_with_clusterers(
    cloud_a: &OrientedPointCloud,
    cloud_b: &OrientedPointCloud,
    directional: &dyn Clusterer,
    spatial: &dyn Clusterer,
    params: &RegistrationParams,
) -> Result<AlignmentResult> {
    params.validate()?;
    if cloud_a.is_empty() || cloud_b.is_empty() {
        return Err(Error::DegenerateCloud(
            "both clouds must contain at least one point".into(),
        ));
    }

    let vmf_a = directional_mixture_from(
        cloud_a,
        &directional.cluster(&cloud_a.normals)?,
        params.focal_depth,
    )?;
    let vmf_b = directional_mixture_from(
        cloud_b,
        &directional.cluster(&cloud_b.normals)?,
        params.focal_depth,
    )?;
    info!(
        "directional mixtures: {} and {} components from {} and {} normals",
        vmf_a.len(),
        vmf_b.len(),
        cloud_a.len(),
        cloud_b.len()
    );

    let (rotation, rotation_report) =
        search_rotation(&vmf_a, &vmf_b, params.epsilon, params.max_iterations)?;
    info!(
        "rotation stage: value {:.6e}, gap {:.3e}, certified {}",
        rotation_report.value, rotation_report.gap, rotation_report.certified
    );

    let coords_a: Vec<Vector3<f64>> = cloud_a.points.iter().map(|p| p.coords).collect();
    let coords_b: Vec<Vector3<f64>> = cloud_b.points.iter().map(|p| p.coords).collect();
    let gmm_a = spatial_mixture_from(
        cloud_a,
        &spatial.cluster(&coords_a)?,
        params.covariance_regularization,
    )?;
    let gmm_b = spatial_mixture_from(
        cloud_b,
        &spatial.cluster(&coords_b)?,
        params.covariance_regularization,
    )?;

    let (box_min, box_max) = translation_search_box(cloud_a, cloud_b, &rotation)?;
    let edge = params.translation_cell_edge.unwrap_or_else(|| {
        let span = box_max - box_min;
        (span.amax() / 4.0).max(1e-3)
    });
    let (translation, translation_report) = search_translation(
        &gmm_a,
        &gmm_b,
        &rotation,
        &box_min,
        &box_max,
        edge,
        params.epsilon,
        params.max_iterations,
    )?;
    info!(
        "translation stage: value {:.6e}, gap {:.3e}, certified {}",
        translation_report.value, translation_report.gap, translation_report.certified
    );

    Ok(AlignmentResult {
        transform: RigidTransform::new(rotation, translation),
        rotation: rotation_report,
        translation: translation_report,
    })
}

/// Finds the globally best rotation between two directional mixtures.
pub fn search_rotation(
    fixed: &Mixture<DirectionalComponent>,
    rotated: &Mixture<DirectionalComponent>,
    epsilon: f64,
    max_iterations: usize,
) -> Result<(UnitQuaternion<f64>, SearchReport)> {
    let objective = DirectionalObjective::new(fixed, rotated);
    let lower = DirectionalLowerBound::new(&objective);
    let upper = DirectionalConvexityBound::new(&objective);
    let outcome =
        BranchAndBound::new(&lower, &upper).run(tessellate_rotations(), epsilon, max_iterations)?;
    let report = SearchReport::from_outcome(&outcome);
    Ok((outcome.transform, report))
}

/// Finds the globally best translation between two spatial mixtures under a
/// fixed rotation, searching the axis-aligned box `[box_min, box_max]`.
#[allow(clippy::too_many_arguments)]
pub fn search_translation(
    fixed: &Mixture<SpatialComponent>,
    rotated: &Mixture<SpatialComponent>,
    rotation: &UnitQuaternion<f64>,
    box_min: &Vector3<f64>,
    box_max: &Vector3<f64>,
    cell_edge: f64,
    epsilon: f64,
    max_iterations: usize,
) -> Result<(Vector3<f64>, SearchReport)> {
    let objective = SpatialObjective::new(fixed, rotated, rotation)?;
    let lower = SpatialLowerBound::new(&objective);
    let upper = SpatialConvexityBound::new(&objective);
    let cells = tessellate_translations(box_min, box_max, cell_edge)?;
    let outcome = BranchAndBound::new(&lower, &upper).run(cells, epsilon, max_iterations)?;
    let report = SearchReport::from_outcome(&outcome);
    Ok((outcome.transform, report))
}

/// The translation box guaranteed to contain the optimum: per axis, the
/// offsets that can bring the rotated extents of the second cloud into
/// contact with the extents of the first.
pub fn translation_search_box(
    cloud_a: &OrientedPointCloud,
    cloud_b: &OrientedPointCloud,
    rotation: &UnitQuaternion<f64>,
) -> Result<(Vector3<f64>, Vector3<f64>)> {
    let (min_a, max_a) = cloud_a
        .extent()
        .ok_or_else(|| Error::DegenerateCloud("first cloud is empty".into()))?;

    let mut min_b = Vector3::repeat(f64::INFINITY);
    let mut max_b = Vector3::repeat(f64::NEG_INFINITY);
    for p in &cloud_b.points {
        let q = rotation * p.coords;
        for d in 0..3 {
            min_b[d] = min_b[d].min(q[d]);
            max_b[d] = max_b[d].max(q[d]);
        }
    }
    if !min_b.iter().all(|v| v.is_finite()) {
        return Err(Error::DegenerateCloud("second cloud is empty".into()));
    }

    Ok((min_a - max_b, max_a - min_b))
}
