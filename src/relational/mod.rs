//! Relational backend: compile a pipeline into one SQL statement.
//!
//! Every step becomes one or more CTEs appended to a chain; the statement
//! ends with `SELECT <tracked columns> FROM <last CTE>`. A
//! [`MetadataTracker`] follows the column list through the chain so each
//! translator knows exactly which columns it reads and produces.
//!
//! # Example
//!
//! ```ignore
//! let retriever = |d: &str| -> Result<String, CollaboratorError> { Ok(format!("\"{}\"", d)) };
//! let describer = |_: &str| -> Result<Vec<(String, String)>, CollaboratorError> {
//!     Ok(vec![("a".into(), "int".into())])
//! };
//! let executor = |_: &str| -> Result<Vec<Vec<serde_json::Value>>, CollaboratorError> { Ok(vec![]) };
//!
//! let steps = vec![Step::domain("sales")];
//! let translation = translate(&steps, &retriever, &describer, &executor, Dialect::Postgres)?;
//! println!("{}", translation.sql);
//! ```

mod collaborators;
mod compiled;
mod context;
mod metadata;
mod steps;

pub use collaborators::{Collaborators, QueryExecutor, SchemaDescriber, TableRetriever};
pub use compiled::CompiledQuery;
pub use context::{NestedPipeline, RowOrder, StepContext, StepOutput};
pub use metadata::{
    ColumnChange, ColumnMetadata, MetadataTracker, SchemaDelta, TableSchema, CURRENT_TABLE,
};

use std::cell::Cell;

use tracing::{debug, trace};

use crate::config::SqlSettings;
use crate::error::{PipelineError, PipelineResult, StepError, StepResult};
use crate::sql::{Dialect, SortDir, SqlDates};
use crate::step::Step;

/// Per-step summary of a translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    /// CTEs emitted for the step, nested pipelines included.
    pub ctes: Vec<String>,
    pub column_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationReport {
    pub steps: Vec<StepReport>,
}

/// A translated pipeline.
#[derive(Debug, Clone)]
pub struct Translation {
    /// The complete statement.
    pub sql: String,
    /// The CTE chain the statement was built from.
    pub query: CompiledQuery,
    /// Result columns, in order.
    pub columns: Vec<ColumnMetadata>,
    pub report: TranslationReport,
}

/// Translate `steps` with default settings for `dialect`.
pub fn translate(
    steps: &[Step],
    retriever: &dyn TableRetriever,
    describer: &dyn SchemaDescriber,
    executor: &dyn QueryExecutor,
    dialect: Dialect,
) -> PipelineResult<Translation> {
    SqlTranslator::new(retriever, describer, executor, dialect).translate(steps)
}

/// Compiles pipelines to SQL for one dialect.
pub struct SqlTranslator<'a> {
    collaborators: Collaborators<'a>,
    dialect: Dialect,
    limit: Option<u64>,
    offset: Option<u64>,
}

/// State of one (possibly nested) pipeline being compiled.
struct Session {
    tracker: MetadataTracker,
    compiled: CompiledQuery,
    ordering: Vec<(String, SortDir)>,
    report: Vec<StepReport>,
}

impl<'a> SqlTranslator<'a> {
    pub fn new(
        retriever: &'a dyn TableRetriever,
        describer: &'a dyn SchemaDescriber,
        executor: &'a dyn QueryExecutor,
        dialect: Dialect,
    ) -> Self {
        Self {
            collaborators: Collaborators {
                retriever,
                describer,
                executor,
            },
            dialect,
            limit: None,
            offset: None,
        }
    }

    /// Take dialect and pagination from loaded settings.
    pub fn with_settings(mut self, settings: &SqlSettings) -> Self {
        self.dialect = settings.dialect;
        self.limit = settings.limit;
        self.offset = settings.offset;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn translate(&self, steps: &[Step]) -> PipelineResult<Translation> {
        debug!(dialect = %self.dialect, steps = steps.len(), "translating pipeline");
        let nested_counter = Cell::new(0usize);
        let session = self.compile(steps, "", &nested_counter)?;

        let columns: Vec<&ColumnMetadata> = session
            .tracker
            .columns(CURRENT_TABLE)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !c.hidden)
            .collect();
        let mut query = session
            .compiled
            .select_current(&columns, &session.ordering)
            .ok_or_else(empty_pipeline)?;
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        let sql = query.to_sql(self.dialect);
        debug!(ctes = session.compiled.ctes().len(), "pipeline translated");

        Ok(Translation {
            sql,
            columns: columns.into_iter().cloned().collect(),
            query: session.compiled,
            report: TranslationReport {
                steps: session.report,
            },
        })
    }

    fn compile(&self, steps: &[Step], prefix: &str, nested_counter: &Cell<usize>) -> PipelineResult<Session> {
        if steps.is_empty() {
            return Err(empty_pipeline());
        }

        let mut session = Session {
            tracker: MetadataTracker::new(),
            compiled: CompiledQuery::new(),
            ordering: Vec::new(),
            report: Vec::new(),
        };
        session.tracker.set_table(CURRENT_TABLE, Vec::new());

        for (index, step) in steps.iter().enumerate() {
            let fail = |source: StepError| PipelineError::new(index, step.name(), source);
            let name = format!("{}{}_STEP_{}", prefix, step.name().to_uppercase(), index);
            debug!(index, step = step.name(), cte = %name, "translating step");

            let nested = |inner: &[Step]| -> StepResult<NestedPipeline> {
                let n = nested_counter.get() + 1;
                nested_counter.set(n);
                let inner_prefix = format!("NESTED_{}_", n);
                let inner_session = self.compile(inner, &inner_prefix, nested_counter)?;
                let name = inner_session
                    .compiled
                    .current()
                    .map(str::to_string)
                    .ok_or_else(|| StepError::invalid("nested pipeline is empty"))?;
                let schema = inner_session.tracker.table(CURRENT_TABLE)?.output();
                Ok(NestedPipeline {
                    ctes: inner_session.compiled.into_ctes(),
                    name,
                    schema,
                })
            };

            let output = {
                let ctx = StepContext {
                    index,
                    name: name.clone(),
                    dialect: self.dialect,
                    dates: SqlDates::new(self.dialect),
                    tracker: &session.tracker,
                    compiled: &session.compiled,
                    collaborators: self.collaborators,
                    nested: &nested,
                };
                steps::translate_step(step, &ctx).map_err(fail)?
            };

            match output.ctes.last() {
                Some(last) if last.name == name => {}
                _ => {
                    return Err(fail(StepError::invalid(format!(
                        "step did not produce CTE '{}'",
                        name
                    ))))
                }
            }

            session
                .tracker
                .apply(&output.delta)
                .map_err(|e| fail(e.into()))?;
            session.ordering = next_ordering(
                std::mem::take(&mut session.ordering),
                &output,
                &session.tracker,
            );

            let mut emitted = Vec::with_capacity(output.ctes.len());
            for cte in output.ctes {
                trace!(cte = %cte.name, "emitting CTE");
                emitted.push(cte.name.clone());
                session.compiled.push(cte).map_err(fail)?;
            }

            session.report.push(StepReport {
                index,
                step: step.name(),
                ctes: emitted,
                column_count: session.tracker.column_count(CURRENT_TABLE).unwrap_or(0),
            });
        }

        Ok(session)
    }
}

/// Ordering the final SELECT applies after a step.
fn next_ordering(
    mut ordering: Vec<(String, SortDir)>,
    output: &StepOutput,
    tracker: &MetadataTracker,
) -> Vec<(String, SortDir)> {
    match &output.order {
        RowOrder::Set(keys) => keys.clone(),
        RowOrder::Clear => Vec::new(),
        RowOrder::Preserve => {
            for (from, to) in output.delta.renames() {
                for (name, _) in ordering.iter_mut() {
                    if name.eq_ignore_ascii_case(from) {
                        *name = to.to_string();
                    }
                }
            }
            ordering.retain(|(name, _)| tracker.column(CURRENT_TABLE, name).is_ok());
            ordering
        }
    }
}

fn empty_pipeline() -> PipelineError {
    PipelineError::new(0, "domain", StepError::invalid("pipeline has no steps"))
}
