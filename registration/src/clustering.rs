//! Clustering collaborator interface and mixture construction.
//!
//! The pipeline only needs a finished cluster assignment (labels, centroids,
//! counts); the heavy streaming clusterer may live elsewhere (e.g. on a
//! GPU) behind [`Clusterer`]. The batch DP-means implementations here are
//! deterministic CPU references sufficient for moderate cloud sizes.

use nalgebra::{Matrix3, Vector3};

use cloudalign_core::OrientedPointCloud;

use crate::mixture::{DirectionalComponent, Mixture, SpatialComponent};
use crate::{Error, Result};

/// A finished cluster assignment.
///
/// `labels[i]` is the cluster index of sample `i`, or `None` when the sample
/// could not be assigned (degenerate input such as a zero-length normal).
#[derive(Debug, Clone)]
pub struct Clustering {
    pub labels: Vec<Option<usize>>,
    pub centroids: Vec<Vector3<f64>>,
    pub counts: Vec<usize>,
}

impl Clustering {
    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }
}

/// Contract for the external clustering collaborator.
pub trait Clusterer {
    fn cluster(&self, samples: &[Vector3<f64>]) -> Result<Clustering>;
}

/// Batch DP-means over unit directions: samples join the nearest centroid by
/// spherical angle, or found a new cluster when no centroid is within
/// `lambda`.
#[derive(Debug, Clone)]
pub struct SphericalDpMeans {
    /// Cluster opening angle in radians.
    pub lambda: f64,
    pub max_sweeps: usize,
}

impl SphericalDpMeans {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            max_sweeps: 10,
        }
    }
}

impl Clusterer for SphericalDpMeans {
    fn cluster(&self, samples: &[Vector3<f64>]) -> Result<Clustering> {
        if !(self.lambda > 0.0) {
            return Err(Error::InvalidInput(format!(
                "spherical DP-means lambda {} must be positive",
                self.lambda
            )));
        }
        let threshold = self.lambda.cos();
        let mut centroids: Vec<Vector3<f64>> = Vec::new();
        let mut labels: Vec<Option<usize>> = vec![None; samples.len()];

        for _sweep in 0..self.max_sweeps.max(1) {
            let mut changes = 0usize;
            for (i, s) in samples.iter().enumerate() {
                let norm = s.norm();
                if norm < 1e-12 {
                    labels[i] = None;
                    continue;
                }
                let dir = s / norm;
                let mut best = None;
                let mut best_dot = threshold;
                for (k, c) in centroids.iter().enumerate() {
                    let d = dir.dot(c);
                    if d >= best_dot {
                        best_dot = d;
                        best = Some(k);
                    }
                }
                let label = match best {
                    Some(k) => k,
                    None => {
                        centroids.push(dir);
                        centroids.len() - 1
                    }
                };
                if labels[i] != Some(label) {
                    changes += 1;
                }
                labels[i] = Some(label);
            }

            // Recompute centroids as normalized member means.
            let mut sums = vec![Vector3::zeros(); centroids.len()];
            for (i, s) in samples.iter().enumerate() {
                if let Some(k) = labels[i] {
                    let norm = s.norm();
                    if norm >= 1e-12 {
                        sums[k] += s / norm;
                    }
                }
            }
            for (k, sum) in sums.iter().enumerate() {
                if sum.norm() > 1e-12 {
                    centroids[k] = sum.normalize();
                }
            }

            if changes <= samples.len() / 100 {
                break;
            }
        }

        Ok(compact(labels, centroids))
    }
}

/// Batch DP-means over positions: Euclidean distance with spawn radius
/// `lambda`.
#[derive(Debug, Clone)]
pub struct EuclideanDpMeans {
    pub lambda: f64,
    pub max_sweeps: usize,
}

impl EuclideanDpMeans {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            max_sweeps: 10,
        }
    }
}

impl Clusterer for EuclideanDpMeans {
    fn cluster(&self, samples: &[Vector3<f64>]) -> Result<Clustering> {
        if !(self.lambda > 0.0) {
            return Err(Error::InvalidInput(format!(
                "euclidean DP-means lambda {} must be positive",
                self.lambda
            )));
        }
        let threshold = self.lambda * self.lambda;
        let mut centroids: Vec<Vector3<f64>> = Vec::new();
        let mut labels: Vec<Option<usize>> = vec![None; samples.len()];

        for _sweep in 0..self.max_sweeps.max(1) {
            let mut changes = 0usize;
            for (i, s) in samples.iter().enumerate() {
                let mut best = None;
                let mut best_dist = threshold;
                for (k, c) in centroids.iter().enumerate() {
                    let d = (s - c).norm_squared();
                    if d <= best_dist {
                        best_dist = d;
                        best = Some(k);
                    }
                }
                let label = match best {
                    Some(k) => k,
                    None => {
                        centroids.push(*s);
                        centroids.len() - 1
                    }
                };
                if labels[i] != Some(label) {
                    changes += 1;
                }
                labels[i] = Some(label);
            }

            let mut sums = vec![Vector3::zeros(); centroids.len()];
            let mut counts = vec![0usize; centroids.len()];
            for (i, s) in samples.iter().enumerate() {
                if let Some(k) = labels[i] {
                    sums[k] += s;
                    counts[k] += 1;
                }
            }
            for k in 0..centroids.len() {
                if counts[k] > 0 {
                    centroids[k] = sums[k] / counts[k] as f64;
                }
            }

            if changes <= samples.len() / 100 {
                break;
            }
        }

        Ok(compact(labels, centroids))
    }
}

/// Drops empty clusters and relabels densely.
fn compact(labels: Vec<Option<usize>>, centroids: Vec<Vector3<f64>>) -> Clustering {
    let mut counts = vec![0usize; centroids.len()];
    for label in labels.iter().flatten() {
        counts[*label] += 1;
    }
    let mut remap = vec![None; centroids.len()];
    let mut kept_centroids = Vec::new();
    let mut kept_counts = Vec::new();
    for (k, &count) in counts.iter().enumerate() {
        if count > 0 {
            remap[k] = Some(kept_centroids.len());
            kept_centroids.push(centroids[k]);
            kept_counts.push(count);
        }
    }
    let labels = labels
        .into_iter()
        .map(|l| l.and_then(|k| remap[k]))
        .collect();
    Clustering {
        labels,
        centroids: kept_centroids,
        counts: kept_counts,
    }
}

fn check_assignment(cloud: &OrientedPointCloud, clustering: &Clustering) -> Result<f64> {
    if clustering.labels.len() != cloud.len() {
        return Err(Error::InvalidInput(format!(
            "clustering has {} labels for {} points",
            clustering.labels.len(),
            cloud.len()
        )));
    }
    if clustering.centroids.len() != clustering.counts.len() {
        return Err(Error::InvalidInput(
            "clustering centroid and count lengths differ".into(),
        ));
    }
    let total: usize = clustering.counts.iter().sum();
    if clustering.centroids.is_empty() || total == 0 {
        return Err(Error::DegenerateCloud(
            "clustering assigned no points to any cluster".into(),
        ));
    }
    Ok(total as f64)
}

/// Builds the directional mixture of a cloud from a normal clustering.
///
/// Each cluster contributes a component whose mean is the cluster centroid,
/// whose concentration is the length of the cluster's area-weighted normal
/// resultant and whose weight is the cluster's share of assigned points.
/// A point at depth `d` weighs `(d / focal)^2`, the surface patch area it
/// subtends on the sensor; clouds without depths weigh every point equally.
pub fn directional_mixture_from(
    cloud: &OrientedPointCloud,
    clustering: &Clustering,
    focal: f64,
) -> Result<Mixture<DirectionalComponent>> {
    let total = check_assignment(cloud, clustering)?;

    let mut resultants = vec![Vector3::zeros(); clustering.num_clusters()];
    for (i, label) in clustering.labels.iter().enumerate() {
        if let Some(k) = *label {
            let scale = match &cloud.depths {
                Some(depths) => (depths[i] / focal).powi(2),
                None => 1.0,
            };
            resultants[k] += cloud.normals[i] * scale;
        }
    }

    let mut components = Vec::with_capacity(clustering.num_clusters());
    for k in 0..clustering.num_clusters() {
        components.push(DirectionalComponent::new(
            clustering.centroids[k],
            resultants[k].norm(),
            clustering.counts[k] as f64 / total,
        )?);
    }
    Mixture::new(components)
}

/// Builds the spatial Gaussian mixture of a cloud from a position
/// clustering. Covariances are per-cluster scatter matrices with a
/// `regularization * I` diagonal term to avoid singularity.
pub fn spatial_mixture_from(
    cloud: &OrientedPointCloud,
    clustering: &Clustering,
    regularization: f64,
) -> Result<Mixture<SpatialComponent>> {
    let total = check_assignment(cloud, clustering)?;

    let mut scatters = vec![Matrix3::zeros(); clustering.num_clusters()];
    for (i, label) in clustering.labels.iter().enumerate() {
        if let Some(k) = *label {
            let d = cloud.points[i].coords - clustering.centroids[k];
            scatters[k] += d * d.transpose();
        }
    }

    let mut components = Vec::with_capacity(clustering.num_clusters());
    for k in 0..clustering.num_clusters() {
        let covariance =
            scatters[k] / clustering.counts[k] as f64 + Matrix3::identity() * regularization;
        components.push(SpatialComponent::new(
            clustering.centroids[k],
            covariance,
            clustering.counts[k] as f64 / total,
        )?);
    }
    Mixture::new(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn three_group_normals() -> Vec<Vector3<f64>> {
        let mut normals = Vec::new();
        for i in 0..30 {
            let eps = (i % 5) as f64 * 1e-3;
            normals.push(Vector3::new(1.0, eps, 0.0).normalize());
        }
        for i in 0..20 {
            let eps = (i % 5) as f64 * 1e-3;
            normals.push(Vector3::new(eps, 1.0, 0.0).normalize());
        }
        for i in 0..10 {
            let eps = (i % 5) as f64 * 1e-3;
            normals.push(Vector3::new(0.0, eps, 1.0).normalize());
        }
        normals
    }

    #[test]
    fn test_spherical_dp_means_separates_groups() {
        let normals = three_group_normals();
        let clustering = SphericalDpMeans::new(0.5).cluster(&normals).unwrap();
        assert_eq!(clustering.num_clusters(), 3);
        assert_eq!(clustering.counts.iter().sum::<usize>(), 60);
        assert!(clustering.labels.iter().all(|l| l.is_some()));
    }

    #[test]
    fn test_spherical_dp_means_leaves_zero_normals_unassigned() {
        let mut normals = three_group_normals();
        normals.push(Vector3::zeros());
        let clustering = SphericalDpMeans::new(0.5).cluster(&normals).unwrap();
        assert_eq!(clustering.labels.last().unwrap(), &None);
        assert_eq!(clustering.counts.iter().sum::<usize>(), 60);
    }

    #[test]
    fn test_euclidean_dp_means_separates_blobs() {
        let mut points = Vec::new();
        for i in 0..25 {
            let eps = (i % 5) as f64 * 0.01;
            points.push(Vector3::new(eps, 0.0, 0.0));
            points.push(Vector3::new(5.0 + eps, 0.0, 0.0));
        }
        let clustering = EuclideanDpMeans::new(1.0).cluster(&points).unwrap();
        assert_eq!(clustering.num_clusters(), 2);
        assert_eq!(clustering.counts, vec![25, 25]);
    }

    #[test]
    fn test_directional_mixture_weights_and_concentration() {
        let normals = three_group_normals();
        let points = vec![Point3::origin(); normals.len()];
        let cloud = OrientedPointCloud::new(points, normals).unwrap();
        let clustering = SphericalDpMeans::new(0.5).cluster(&cloud.normals).unwrap();
        let mixture = directional_mixture_from(&cloud, &clustering, 540.0).unwrap();

        assert_eq!(mixture.len(), 3);
        let weight_sum: f64 = mixture.components().iter().map(|c| c.weight()).sum();
        assert_relative_eq!(weight_sum, 1.0, epsilon = 1e-9);

        // Concentration is the resultant length, roughly the member count
        // for tightly grouped unit normals.
        use crate::mixture::MixtureComponent;
        let largest = mixture
            .components()
            .iter()
            .max_by(|a, b| a.weight().partial_cmp(&b.weight()).unwrap())
            .unwrap();
        assert!(largest.concentration() > 29.0 && largest.concentration() <= 30.0);
    }

    #[test]
    fn test_directional_mixture_depth_weighting() {
        let normals = vec![Vector3::x(); 10];
        let points = vec![Point3::origin(); 10];
        let cloud = OrientedPointCloud::new(points, normals)
            .unwrap()
            .with_depths(vec![1080.0; 10])
            .unwrap();
        let clustering = SphericalDpMeans::new(0.5).cluster(&cloud.normals).unwrap();
        let mixture = directional_mixture_from(&cloud, &clustering, 540.0).unwrap();

        // (1080/540)^2 = 4 per point, 10 points.
        assert_relative_eq!(
            mixture.components()[0].concentration(),
            40.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_spatial_mixture_regularizes_covariance() {
        let points = vec![Point3::new(1.0, 2.0, 3.0); 8];
        let normals = vec![Vector3::z(); 8];
        let cloud = OrientedPointCloud::new(points, normals).unwrap();
        let clustering = EuclideanDpMeans::new(1.0)
            .cluster(&cloud.points.iter().map(|p| p.coords).collect::<Vec<_>>())
            .unwrap();
        let mixture = spatial_mixture_from(&cloud, &clustering, 0.01).unwrap();

        assert_eq!(mixture.len(), 1);
        // Identical points have zero scatter; only the regularizer remains.
        assert_relative_eq!(
            *mixture.components()[0].covariance(),
            Matrix3::identity() * 0.01,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_mixture_from_empty_clustering_fails() {
        let cloud = OrientedPointCloud::default();
        let clustering = Clustering {
            labels: vec![],
            centroids: vec![],
            counts: vec![],
        };
        assert!(matches!(
            directional_mixture_from(&cloud, &clustering, 540.0),
            Err(Error::DegenerateCloud(_))
        ));
    }
}
