pub mod runner;
pub mod state;
pub mod trace_job;

pub use runner::{Collaborators, Orchestrator, PipelineOutcome};
pub use state::{GenerationGuard, PipelineState, Rejection};
