//! Recap pipeline workflow
//!
//! One run moves a request through match, retrieve, generate and synthesize
//! under a global deadline. Each stage receives a share of whatever budget
//! is left when it starts.

pub mod budget;
pub mod orchestrator;
pub mod outcome;
pub mod state;
pub mod trace;

pub use budget::{DeadlineBudget, StageBudget};
pub use orchestrator::{Orchestrator, Providers, RecapRequest, RecapResult};
pub use outcome::{Degradation, RecapError, RunFailure};
pub use state::{RunState, Stage};
pub use trace::{LatencyTrace, StageOutcome, StageTrace};
