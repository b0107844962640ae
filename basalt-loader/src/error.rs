//! Loader error types

use basalt_core::CoreError;
use thiserror::Error;

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Storage-layer failure (arity mismatch, unknown index, transaction
    /// misuse)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A loader plan failed to parse
    #[error("invalid loader plan: {0}")]
    PlanParse(#[from] serde_json::Error),

    /// The same index name appears twice in one plan phase
    #[error("duplicate index '{0}' in loader plan")]
    DuplicatePlanIndex(String),

    /// A pipeline stage was used outside its lifecycle
    #[error("stage '{stage}' is {state}, operation not valid")]
    InvalidStageState {
        stage: &'static str,
        state: &'static str,
    },

    /// A downstream stage stopped receiving; its own error carries the
    /// cause and surfaces at finish
    #[error("stage '{0}' downstream closed early")]
    DownstreamClosed(&'static str),

    /// A worker thread failed; first failure wins after all workers have
    /// wound down
    #[error("loader worker '{worker}' failed: {message}")]
    WorkerFailed { worker: String, message: String },
}
