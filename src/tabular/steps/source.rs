//! `domain`: load the rows of a domain, replacing any current frame.

use crate::error::StepResult;
use crate::step::DomainStep;
use crate::tabular::{DataFrame, ExecutionContext};

pub fn domain(step: &DomainStep, ctx: &ExecutionContext) -> StepResult<DataFrame> {
    ctx.load(&step.domain)
}
