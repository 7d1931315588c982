//! `domain`.

use serde_json::Value as JsonValue;

use crate::document::expr::object;
use crate::document::{Stage, StageContext};
use crate::error::StepResult;
use crate::step::DomainStep;

pub fn domain(step: &DomainStep, ctx: &StageContext) -> StepResult<Vec<Stage>> {
    let matched = object(
        &ctx.settings.domain_field,
        JsonValue::String(step.domain.clone()),
    );
    Ok(vec![object("$match", matched)])
}
