//! Check registration and dependency-ordered execution

pub mod context;
pub mod registry;
pub mod runner;

pub use context::{CheckContext, PipelineContext};
pub use registry::{CheckDescriptor, CheckSuite};
pub use runner::Pipeline;
