//! Core domain models
//!
//! Pipeline state threaded through a run, step outcomes, and the YAML
//! pipeline configuration.

pub mod config;
pub mod state;
pub mod step;

pub use config::PipelineConfig;
pub use state::*;
pub use step::*;
