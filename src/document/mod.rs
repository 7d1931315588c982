//! Document backend: compile a pipeline into aggregation stages.
//!
//! Each step becomes a short list of stages (`$match`, `$addFields`,
//! `$group`, `$facet`, ...) and the pipeline is their concatenation, in step
//! order. Stages run against one collection holding the documents of every
//! domain; the `domain` step selects them through
//! [`DocumentSettings::domain_field`]. Nested pipelines (`append`, `join`)
//! read the same collection through `$unionWith` / `$lookup`.
//!
//! Documents are schemaless, so unlike the relational backend there is no
//! tracked column list: a missing field simply evaluates to null.

mod dates;
mod expr;
mod steps;

pub use dates::DocumentDates;

use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::config::DocumentSettings;
use crate::error::{PipelineError, PipelineResult, StepError, StepResult};
use crate::step::Step;

/// One aggregation stage, e.g. `{"$match": {...}}`.
pub type Stage = JsonValue;

/// A compiled pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPipeline {
    pub stages: Vec<Stage>,
}

impl DocumentPipeline {
    /// The stages as a JSON array, ready to hand to `aggregate`.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.stages.clone())
    }
}

/// Translate `steps` with default settings.
pub fn translate(steps: &[Step]) -> PipelineResult<DocumentPipeline> {
    DocumentTranslator::new().translate(steps)
}

/// Compiles pipelines to aggregation stages.
#[derive(Debug, Clone, Default)]
pub struct DocumentTranslator {
    settings: DocumentSettings,
}

/// What a stage builder sees.
pub struct StageContext<'a> {
    pub index: usize,
    pub settings: &'a DocumentSettings,
    nested: &'a dyn Fn(&[Step]) -> StepResult<Vec<Stage>>,
}

impl StageContext<'_> {
    /// Compile a nested pipeline (`append`, `join`).
    pub fn translate_nested(&self, steps: &[Step]) -> StepResult<Vec<Stage>> {
        (self.nested)(steps)
    }
}

impl DocumentTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &DocumentSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    pub fn translate(&self, steps: &[Step]) -> PipelineResult<DocumentPipeline> {
        debug!(steps = steps.len(), "translating pipeline to stages");
        let stages = self.compile(steps)?;
        debug!(stages = stages.len(), "pipeline translated");
        Ok(DocumentPipeline { stages })
    }

    fn compile(&self, steps: &[Step]) -> PipelineResult<Vec<Stage>> {
        if steps.is_empty() {
            return Err(PipelineError::new(
                0,
                "domain",
                StepError::invalid("pipeline has no steps"),
            ));
        }

        let nested = |inner: &[Step]| -> StepResult<Vec<Stage>> { Ok(self.compile(inner)?) };
        let mut stages = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            let ctx = StageContext {
                index,
                settings: &self.settings,
                nested: &nested,
            };
            let produced = steps::translate_step(step, &ctx)
                .map_err(|source| PipelineError::new(index, step.name(), source))?;
            debug!(index, step = step.name(), stages = produced.len(), "translated step");
            for stage in &produced {
                trace!(stage = %stage, "emitting stage");
            }
            stages.extend(produced);
        }
        Ok(stages)
    }
}
