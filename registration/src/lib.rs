//! Globally optimal rigid registration of oriented point clouds.
//!
//! The registration runs in two certified stages:
//! 1. The surface normals of both clouds are summarized as von Mises-Fisher
//!    mixtures on the sphere and a branch-and-bound search over a
//!    tessellation of rotation space finds the globally best rotation.
//! 2. With the rotation fixed, the point positions are summarized as
//!    Gaussian mixtures and a second branch-and-bound search over a
//!    translation bounding box finds the globally best translation.
//!
//! Each search maintains provable lower/upper bounds per search-space cell,
//! so the returned transform carries an optimality-gap certificate instead
//! of being a locally converged guess.

pub mod bounds;
pub mod clustering;
pub mod mixture;
pub mod pipeline;
pub mod search;
pub mod tessellation;

pub use clustering::{Clusterer, Clustering, EuclideanDpMeans, SphericalDpMeans};
pub use mixture::{DirectionalComponent, Mixture, MixtureComponent, SpatialComponent};
pub use pipeline::{align, align_with_clusterers, AlignmentResult, RegistrationParams, SearchReport};
pub use search::{BranchAndBound, SearchOutcome, SearchStatus};
pub use tessellation::{
    tessellate_rotations, tessellate_translations, RotationCell, TranslationCell,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed mixture: {0}")]
    MalformedMixture(String),

    #[error("Degenerate point cloud: {0}")]
    DegenerateCloud(String),

    #[error("Empty tessellation: the search domain has no initial cells")]
    EmptyTessellation,

    #[error("Numerical degeneracy during bound evaluation: {0}")]
    NumericalDegeneracy(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
