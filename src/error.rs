//! Error taxonomy shared by every backend.
//!
//! A pipeline either translates (or executes) completely or fails with a
//! single [`PipelineError`] naming the offending step. There is no partial
//! output mode.

use thiserror::Error;

/// Error raised by an external collaborator (table retriever, schema
/// describer, query executor, domain retriever).
///
/// Collaborator failures are never retried; they are wrapped with the step
/// context and handed back to the caller.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for whole-pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for a single step translator or executor.
pub type StepResult<T> = Result<T, StepError>;

/// Failure of one step, tagged with its position and kind.
#[derive(Debug, Error)]
#[error("step #{index} ({step}) failed: {source}")]
pub struct PipelineError {
    /// Zero-based index of the failed step in its pipeline.
    pub index: usize,
    /// Wire name of the failed step (`"waterfall"`, `"pivot"`, ...).
    pub step: &'static str,
    /// The underlying cause.
    #[source]
    pub source: StepError,
}

impl PipelineError {
    pub fn new(index: usize, step: &'static str, source: StepError) -> Self {
        Self {
            index,
            step,
            source,
        }
    }

    /// Walk through nested pipeline failures and return the innermost one.
    pub fn innermost(&self) -> &PipelineError {
        match &self.source {
            StepError::Nested(inner) => inner.innermost(),
            _ => self,
        }
    }
}

/// Why a step could not be translated or executed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step '{step}' is not supported by the {backend} backend")]
    UnsupportedStep {
        step: &'static str,
        backend: &'static str,
    },

    #[error("{feature} is not implemented for dialect {dialect}")]
    MissingCapability {
        feature: &'static str,
        dialect: &'static str,
    },

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("type error: {0}")]
    Type(String),

    #[error("collaborator failed: {0}")]
    Collaborator(#[source] CollaboratorError),

    #[error("nested pipeline failed: {0}")]
    Nested(#[source] Box<PipelineError>),

    /// The in-memory engine rejected a plan built from a valid step.
    #[error("tabular engine error: {0}")]
    Engine(String),
}

impl StepError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StepError::InvalidStep(msg.into())
    }
}

impl From<polars::error::PolarsError> for StepError {
    fn from(err: polars::error::PolarsError) -> Self {
        StepError::Engine(err.to_string())
    }
}

impl From<PipelineError> for StepError {
    fn from(err: PipelineError) -> Self {
        StepError::Nested(Box::new(err))
    }
}

/// Errors raised while reading or updating a tracked schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("column '{column}' already exists in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{0}' already exists")]
    DuplicateTable(String),
}
