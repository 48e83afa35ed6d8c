pub mod config;
mod engine;
pub mod memory;
pub mod output;
mod orchestrator;
pub mod report;
mod types;

pub use orchestrator::{integrate_frames, run_integration, run_integration_reported, IntegrationResult};
pub use output::IntegratedImage;
pub use report::IntegrationReport;
pub use types::{IntegrationStage, ProgressReporter};
