pub use cloudalign_core as core;
pub use cloudalign_registration as registration;

pub use cloudalign_core::{OrientedPointCloud, RigidTransform};
pub use cloudalign_registration::pipeline::{align, AlignmentResult, RegistrationParams};
