pub mod geometry;
pub mod point_cloud;

pub use geometry::RigidTransform;
pub use point_cloud::OrientedPointCloud;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}
