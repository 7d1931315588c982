//! What a step translator sees, and what it hands back.

use crate::error::{SchemaError, StepError, StepResult};
use crate::sql::{col, Cte, Dialect, DialectCapabilities, Expr, Query, SelectExpr, SortDir, SqlDates, TableRef};
use crate::step::Step;

use super::collaborators::Collaborators;
use super::compiled::CompiledQuery;
use super::metadata::{ColumnMetadata, MetadataTracker, SchemaDelta, TableSchema, CURRENT_TABLE};

/// Result of translating a nested pipeline (`append`, `join`).
#[derive(Debug, Clone)]
pub struct NestedPipeline {
    /// CTEs of the nested pipeline, in order; they precede the parent step's
    /// own CTEs.
    pub ctes: Vec<Cte>,
    /// Name of the nested pipeline's last CTE.
    pub name: String,
    /// Final schema of the nested pipeline.
    pub schema: TableSchema,
}

/// How a step affects the row order the final SELECT applies.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOrder {
    /// Rows keep the order requested by earlier steps.
    Preserve,
    /// The step establishes a new order.
    Set(Vec<(String, SortDir)>),
    /// Row order is unspecified after this step.
    Clear,
}

/// Output of one step translator.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// New CTEs, the last of which holds the step's rows.
    pub ctes: Vec<Cte>,
    pub delta: SchemaDelta,
    pub order: RowOrder,
}

impl StepOutput {
    pub fn new(cte: Cte, delta: SchemaDelta) -> Self {
        Self {
            ctes: vec![cte],
            delta,
            order: RowOrder::Preserve,
        }
    }

    pub fn with_ctes(ctes: Vec<Cte>, delta: SchemaDelta) -> Self {
        Self {
            ctes,
            delta,
            order: RowOrder::Preserve,
        }
    }

    pub fn ordered(mut self, order: RowOrder) -> Self {
        self.order = order;
        self
    }
}

pub type NestedTranslate<'t> = dyn Fn(&[Step]) -> StepResult<NestedPipeline> + 't;

/// Read-only view of the translation state handed to a step translator.
pub struct StepContext<'t> {
    pub index: usize,
    /// Name of the CTE the step must produce last; auxiliary CTEs use it as
    /// a prefix.
    pub name: String,
    pub dialect: Dialect,
    pub dates: SqlDates,
    pub tracker: &'t MetadataTracker,
    pub compiled: &'t CompiledQuery,
    pub collaborators: Collaborators<'t>,
    pub nested: &'t NestedTranslate<'t>,
}

impl<'t> StepContext<'t> {
    pub fn caps(&self) -> &'static DialectCapabilities {
        self.dialect.capabilities()
    }

    /// Name of an auxiliary CTE of this step.
    pub fn aux(&self, suffix: &str) -> String {
        format!("{}_{}", self.name, suffix)
    }

    /// Name of the CTE holding the rows the step reads.
    pub fn previous(&self) -> StepResult<&'t str> {
        self.compiled
            .current()
            .ok_or_else(|| StepError::invalid("step has no input; start the pipeline with a domain"))
    }

    pub fn previous_ref(&self) -> StepResult<TableRef> {
        Ok(TableRef::new(self.previous()?))
    }

    /// Live columns of the current table, hidden ones included.
    pub fn columns(&self) -> Vec<&'t ColumnMetadata> {
        self.tracker.columns(CURRENT_TABLE).unwrap_or_default()
    }

    /// Live columns that are part of the output.
    pub fn output_columns(&self) -> Vec<&'t ColumnMetadata> {
        self.columns().into_iter().filter(|c| !c.hidden).collect()
    }

    /// Hidden columns, which row-preserving steps carry along.
    pub fn hidden_columns(&self) -> Vec<&'t ColumnMetadata> {
        self.columns().into_iter().filter(|c| c.hidden).collect()
    }

    pub fn column(&self, name: &str) -> Result<&'t ColumnMetadata, SchemaError> {
        self.tracker.column(CURRENT_TABLE, name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_ok()
    }

    /// Fail unless every name is a live column.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> StepResult<()> {
        for name in names {
            self.column(name)?;
        }
        Ok(())
    }

    /// Fail if `name` is already a live column.
    pub fn require_absent(&self, name: &str) -> StepResult<()> {
        if self.has_column(name) {
            return Err(SchemaError::DuplicateColumn {
                table: CURRENT_TABLE.to_string(),
                column: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// `SELECT <every live column, or its replacement> <extra> FROM previous`.
    pub fn project(
        &self,
        replace: impl Fn(&ColumnMetadata) -> Option<Expr>,
        extra: Vec<SelectExpr>,
    ) -> StepResult<Query> {
        let mut select: Vec<SelectExpr> = self
            .columns()
            .into_iter()
            .map(|c| match replace(c) {
                Some(expr) => SelectExpr {
                    expr,
                    alias: Some(c.name.clone()),
                },
                None => col(&c.name).into(),
            })
            .collect();
        select.extend(extra);
        Ok(Query::new().select(select).from(self.previous_ref()?))
    }

    /// `SELECT <every live column> FROM previous`.
    pub fn select_all(&self) -> StepResult<Query> {
        self.project(|_| None, vec![])
    }

    /// SQL that selects the current rows: used for describer and executor
    /// calls.
    pub fn current_sql(&self, main: Query) -> String {
        self.compiled.with_main(main).to_sql(self.dialect)
    }

    pub fn translate_nested(&self, steps: &[Step]) -> StepResult<NestedPipeline> {
        (self.nested)(steps)
    }
}
