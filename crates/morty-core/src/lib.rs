pub mod commit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod machine;
pub mod plan;
pub mod process;
pub mod prompt;
pub mod result;
pub mod rollback;
pub mod scheduler;
pub mod state;
pub mod types;

pub use config::Config;
pub use engine::{EngineContext, ExecuteOutcome};
pub use errors::{EngineError, GitError, MortyError, PlanError, ProcessError, ResultError, StateError};
pub use scheduler::{Selection, reset_targets, select};
pub use state::StateStore;
pub use types::{
    GlobalState, Job, JobState, JobStatus, LoopCommit, ModuleState, Plan, SelectionMode, StateDocument,
    Task, TaskState,
};
