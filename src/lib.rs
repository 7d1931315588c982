//! # Stepforge
//!
//! Compiles data-pipeline steps for three backends.
//!
//! ## Architecture
//!
//! A pipeline is an ordered list of [`Step`]s, usually deserialized from
//! JSON. The same list can be handed to any backend:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Pipeline (Vec<Step>)                     │
//! │   domain, filter, aggregate, pivot, waterfall, ...       │
//! └─────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼ [relational]       ▼ [document]         ▼ [tabular]
//! ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐
//! │ CTE chain + the │  │ aggregation     │  │ in-memory       │
//! │ tracked schema, │  │ stages          │  │ DataFrame       │
//! │ 8 SQL dialects  │  │                 │  │                 │
//! └─────────────────┘  └─────────────────┘  └─────────────────┘
//! ```
//!
//! Date handling is shared: [`calendar`] expresses every date unit as a
//! recipe over a small set of primitives that each backend implements.

pub mod calendar;
pub mod config;
pub mod document;
pub mod error;
pub mod relational;
pub mod sql;
pub mod step;
pub mod tabular;

pub use config::Settings;
pub use document::{DocumentPipeline, DocumentTranslator};
pub use error::{PipelineError, PipelineResult, StepError};
pub use relational::{SqlTranslator, Translation};
pub use sql::Dialect;
pub use step::{parse_pipeline, Pipeline, Step};
pub use tabular::{DataFrame, FrameExt, TabularExecutor, Value};
