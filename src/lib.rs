pub mod config;
pub mod database_ops;
pub mod download;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod staging;
pub mod status;
pub mod transform;

pub mod util {
    pub mod env;
}

#[cfg(test)]
mod test_support;

pub use error::HarvestError;
pub use model::{HarvestStatus, Job, JobOutcome, JobStage, RunReport};
pub use orchestrator::Orchestrator;
