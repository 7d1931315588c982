//! Metadata tracker - the schema of every table the translation knows about.
//!
//! The tracker is the single source of truth for "what columns exist right
//! now". Step translators read it through their context and describe their
//! effect as a [`SchemaDelta`]; the orchestrator applies the delta after the
//! step's CTEs are emitted.
//!
//! Lookups are case-insensitive (names are compared upper-cased) while the
//! original casing is kept for rendering. Removing a column only marks it
//! deleted, so a later `add_column` with the same name revives it.

use std::collections::BTreeMap;

use crate::error::SchemaError;
use crate::sql::DataType;

/// Name of the table holding the pipeline's current row set.
pub const CURRENT_TABLE: &str = "__CURRENT__";

fn key(name: &str) -> String {
    name.to_uppercase()
}

// =============================================================================
// Columns and tables
// =============================================================================

/// One tracked column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Name as rendered in SQL, original casing.
    pub name: String,
    pub sql_type: DataType,
    /// Type name as reported by the schema describer.
    pub original_type: String,
    /// Name of this column in the table it is read from, when that differs
    /// from `name` (join collisions).
    pub alias: Option<String>,
    pub deleted: bool,
    /// Carried from step to step for the final ordering but never part of
    /// the pipeline's output.
    pub hidden: bool,
}

impl ColumnMetadata {
    pub fn new(name: &str, sql_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            original_type: sql_type.to_string(),
            sql_type,
            alias: None,
            deleted: false,
            hidden: false,
        }
    }

    /// Column reported by a schema describer.
    pub fn described(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: DataType::from_sql_name(type_name),
            original_type: type_name.to_string(),
            alias: None,
            deleted: false,
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Name to read this column by in its source table.
    pub fn source_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is(&self, name: &str) -> bool {
        key(&self.name) == key(name)
    }
}

/// Ordered columns of one table, live and soft-deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<ColumnMetadata>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    /// Live columns in order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| !c.deleted)
    }

    /// Live columns that are part of the output.
    pub fn visible(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns().filter(|c| !c.hidden)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns().find(|c| c.is(name))
    }

    pub fn column_count(&self) -> usize {
        self.visible().count()
    }

    pub fn names(&self) -> Vec<String> {
        self.visible().map(|c| c.name.clone()).collect()
    }

    /// This schema as seen by a consumer of the table: visible columns only.
    pub fn output(&self) -> TableSchema {
        TableSchema::new(self.visible().cloned().collect())
    }

    /// Live columns, cloned.
    pub fn live(&self) -> Vec<ColumnMetadata> {
        self.columns().cloned().collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| !c.deleted && c.is(name))
    }
}

// =============================================================================
// Schema deltas
// =============================================================================

/// One schema change produced by a step.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    Add(ColumnMetadata),
    Drop(String),
    Rename { from: String, to: String },
    Retype { name: String, sql_type: DataType },
    /// Keep only these columns, in this order.
    Keep(Vec<String>),
    /// The step produces an entirely new row shape.
    ReplaceAll(Vec<ColumnMetadata>),
}

/// Effect of one step on the tracked schemas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDelta {
    /// Changes to the current table, applied in order.
    pub changes: Vec<ColumnChange>,
    /// Tables registered by nested pipelines, keyed by their CTE name.
    pub tables: Vec<(String, TableSchema)>,
}

impl SchemaDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: &str, sql_type: DataType) -> Self {
        self.changes
            .push(ColumnChange::Add(ColumnMetadata::new(name, sql_type)));
        self
    }

    pub fn drop(mut self, name: &str) -> Self {
        self.changes.push(ColumnChange::Drop(name.to_string()));
        self
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.changes.push(ColumnChange::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn retype(mut self, name: &str, sql_type: DataType) -> Self {
        self.changes.push(ColumnChange::Retype {
            name: name.to_string(),
            sql_type,
        });
        self
    }

    pub fn keep(mut self, names: Vec<String>) -> Self {
        self.changes.push(ColumnChange::Keep(names));
        self
    }

    pub fn replace_all(mut self, columns: Vec<ColumnMetadata>) -> Self {
        self.changes.push(ColumnChange::ReplaceAll(columns));
        self
    }

    pub fn register(mut self, name: &str, schema: TableSchema) -> Self {
        self.tables.push((name.to_string(), schema));
        self
    }

    /// Renames in this delta, in order.
    pub fn renames(&self) -> impl Iterator<Item = (&str, &str)> {
        self.changes.iter().filter_map(|c| match c {
            ColumnChange::Rename { from, to } => Some((from.as_str(), to.as_str())),
            _ => None,
        })
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MetadataTracker {
    tables: BTreeMap<String, (String, TableSchema)>,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: &str, columns: Vec<ColumnMetadata>) -> Result<(), SchemaError> {
        if self.tables.contains_key(&key(name)) {
            return Err(SchemaError::DuplicateTable(name.to_string()));
        }
        self.tables
            .insert(key(name), (name.to_string(), TableSchema::new(columns)));
        Ok(())
    }

    /// Register or overwrite a table.
    pub fn set_table(&mut self, name: &str, columns: Vec<ColumnMetadata>) {
        self.tables
            .insert(key(name), (name.to_string(), TableSchema::new(columns)));
    }

    /// Register the schema of a nested pipeline under its alias.
    pub fn merge_table(&mut self, alias: &str, schema: TableSchema) -> Result<(), SchemaError> {
        self.add_table(alias, schema.live())
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema, SchemaError> {
        self.tables
            .get(&key(name))
            .map(|(_, schema)| schema)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableSchema, SchemaError> {
        self.tables
            .get_mut(&key(name))
            .map(|(_, schema)| schema)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    /// Live columns of `table`, in order.
    pub fn columns(&self, table: &str) -> Result<Vec<&ColumnMetadata>, SchemaError> {
        Ok(self.table(table)?.columns().collect())
    }

    pub fn column_count(&self, table: &str) -> Result<usize, SchemaError> {
        Ok(self.table(table)?.column_count())
    }

    pub fn column(&self, table: &str, name: &str) -> Result<&ColumnMetadata, SchemaError> {
        self.table(table)?
            .column(name)
            .ok_or_else(|| unknown_column(table, name))
    }

    /// Add a column at the end. A soft-deleted column of the same name is
    /// revived with the new type.
    pub fn add_column(&mut self, table: &str, column: ColumnMetadata) -> Result<(), SchemaError> {
        let schema = self.table_mut(table)?;
        if schema.column(&column.name).is_some() {
            return Err(SchemaError::DuplicateColumn {
                table: table.to_string(),
                column: column.name,
            });
        }
        schema.columns.retain(|c| !c.is(&column.name));
        schema.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, table: &str, name: &str) -> Result<(), SchemaError> {
        let schema = self.table_mut(table)?;
        let pos = schema
            .position(name)
            .ok_or_else(|| unknown_column(table, name))?;
        schema.columns[pos].deleted = true;
        Ok(())
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<(), SchemaError> {
        let schema = self.table_mut(table)?;
        if schema.position(from).is_none() {
            return Err(unknown_column(table, from));
        }
        if key(from) != key(to) && schema.column(to).is_some() {
            return Err(SchemaError::DuplicateColumn {
                table: table.to_string(),
                column: to.to_string(),
            });
        }
        // A deleted namesake would otherwise be revived by a later add.
        schema.columns.retain(|c| !(c.deleted && c.is(to)));
        let pos = schema
            .position(from)
            .ok_or_else(|| unknown_column(table, from))?;
        let column = &mut schema.columns[pos];
        column.name = to.to_string();
        column.alias = None;
        Ok(())
    }

    pub fn update_type(&mut self, table: &str, name: &str, sql_type: DataType) -> Result<(), SchemaError> {
        let schema = self.table_mut(table)?;
        let pos = schema
            .position(name)
            .ok_or_else(|| unknown_column(table, name))?;
        let column = &mut schema.columns[pos];
        column.original_type = sql_type.to_string();
        column.sql_type = sql_type;
        Ok(())
    }

    /// Keep only `names`, in that order; every other live column is
    /// soft-deleted.
    pub fn keep_columns(&mut self, table: &str, names: &[String]) -> Result<(), SchemaError> {
        let schema = self.table_mut(table)?;
        let mut kept = Vec::with_capacity(names.len());
        for name in names {
            let pos = schema
                .position(name)
                .ok_or_else(|| unknown_column(table, name))?;
            kept.push(schema.columns.remove(pos));
        }
        for column in schema.columns.iter_mut() {
            column.deleted = true;
        }
        let deleted = std::mem::take(&mut schema.columns);
        schema.columns = kept;
        schema.columns.extend(deleted);
        Ok(())
    }

    /// Apply a step's delta to the current table.
    pub fn apply(&mut self, delta: &SchemaDelta) -> Result<(), SchemaError> {
        for (name, schema) in &delta.tables {
            self.merge_table(name, schema.clone())?;
        }
        for change in &delta.changes {
            match change {
                ColumnChange::Add(column) => self.add_column(CURRENT_TABLE, column.clone())?,
                ColumnChange::Drop(name) => self.remove_column(CURRENT_TABLE, name)?,
                ColumnChange::Rename { from, to } => self.rename_column(CURRENT_TABLE, from, to)?,
                ColumnChange::Retype { name, sql_type } => {
                    self.update_type(CURRENT_TABLE, name, sql_type.clone())?
                }
                ColumnChange::Keep(names) => self.keep_columns(CURRENT_TABLE, names)?,
                ColumnChange::ReplaceAll(columns) => self.set_table(CURRENT_TABLE, columns.clone()),
            }
        }
        Ok(())
    }
}

fn unknown_column(table: &str, column: &str) -> SchemaError {
    SchemaError::UnknownColumn {
        table: table.to_string(),
        column: column.to_string(),
    }
}
