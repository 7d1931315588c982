//! Tabular backend: execute a pipeline in memory.
//!
//! Steps run one at a time against a polars [`DataFrame`], mostly as lazy
//! plans collected once per step. A pipeline starts with a `domain` step,
//! which loads its frame through the [`DomainRetriever`]; `append` and
//! `join` run their nested pipelines with the same executor.
//!
//! ```ignore
//! let domains = InMemoryDomains::new().with("sales", DataFrame::from_records(&records)?);
//! let frame = TabularExecutor::new(&domains).execute(&steps)?;
//! ```

mod collaborators;
mod dates;
mod frame;
mod steps;
mod value;

pub use collaborators::{DomainRetriever, InMemoryDomains};
pub use dates::TabularDates;
pub use frame::FrameExt;
pub use polars::prelude::DataFrame;
pub use value::{parse_date, Value};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult, StepError, StepResult};
use crate::step::Step;

/// Execute `steps` against the domains served by `retriever`.
pub fn execute(steps: &[Step], retriever: &dyn DomainRetriever) -> PipelineResult<DataFrame> {
    TabularExecutor::new(retriever).execute(steps)
}

/// Runs pipelines against the domains of one retriever.
pub struct TabularExecutor<'a> {
    retriever: &'a dyn DomainRetriever,
}

/// What a step executor sees besides its input frame.
pub struct ExecutionContext<'a> {
    pub index: usize,
    retriever: &'a dyn DomainRetriever,
    nested: &'a dyn Fn(&[Step]) -> StepResult<DataFrame>,
}

impl ExecutionContext<'_> {
    pub fn load(&self, domain: &str) -> StepResult<DataFrame> {
        self.retriever
            .retrieve(domain)
            .map_err(StepError::Collaborator)
    }

    pub fn execute_nested(&self, steps: &[Step]) -> StepResult<DataFrame> {
        (self.nested)(steps)
    }
}

impl<'a> TabularExecutor<'a> {
    pub fn new(retriever: &'a dyn DomainRetriever) -> Self {
        Self { retriever }
    }

    pub fn execute(&self, steps: &[Step]) -> PipelineResult<DataFrame> {
        debug!(steps = steps.len(), "executing pipeline");
        let frame = self.run(steps)?;
        debug!(rows = frame.height(), columns = frame.width(), "pipeline executed");
        Ok(frame)
    }

    fn run(&self, steps: &[Step]) -> PipelineResult<DataFrame> {
        let nested = |inner: &[Step]| -> StepResult<DataFrame> { Ok(self.run(inner)?) };

        let mut frame: Option<DataFrame> = None;
        for (index, step) in steps.iter().enumerate() {
            let fail = |source: StepError| PipelineError::new(index, step.name(), source);
            let ctx = ExecutionContext {
                index,
                retriever: self.retriever,
                nested: &nested,
            };
            let next = steps::execute_step(step, frame.take(), &ctx).map_err(fail)?;
            debug!(
                index,
                step = step.name(),
                rows = next.height(),
                columns = next.width(),
                "executed step"
            );
            frame = Some(next);
        }
        frame.ok_or_else(|| {
            PipelineError::new(0, "domain", StepError::invalid("pipeline has no steps"))
        })
    }
}

impl std::fmt::Debug for TabularExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TabularExecutor { .. }")
    }
}
