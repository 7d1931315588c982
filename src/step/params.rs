//! Parameter structs for each step kind.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Condition, PipelineRef};
use crate::calendar::{DateUnit, Granularity};
use crate::error::{StepError, StepResult};

fn default_true() -> bool {
    true
}

// =============================================================================
// Shared enums
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Aggregation function of `aggregate`, `pivot`, `totals`, `rollup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunction {
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "avg")]
    Avg,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "count distinct")]
    CountDistinct,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "first")]
    First,
    #[serde(rename = "last")]
    Last,
}

impl AggFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunction::Sum => "sum",
            AggFunction::Avg => "avg",
            AggFunction::Count => "count",
            AggFunction::CountDistinct => "count distinct",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::First => "first",
            AggFunction::Last => "last",
        }
    }
}

/// One aggregation: apply `aggfunction` to each of `columns`, naming the
/// results `newcolumns` (same length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub columns: Vec<String>,
    pub newcolumns: Vec<String>,
    pub aggfunction: AggFunction,
}

impl Aggregation {
    /// `(source column, output column)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(self.newcolumns.iter())
            .map(|(c, n)| (c.as_str(), n.as_str()))
    }
}

/// Reject aggregation lists that would produce an ambiguous column list.
pub fn validate_aggregations(aggregations: &[Aggregation], keys: &[String]) -> StepResult<()> {
    let mut seen: HashSet<String> = keys.iter().map(|k| k.to_uppercase()).collect();
    for agg in aggregations {
        if agg.columns.len() != agg.newcolumns.len() {
            return Err(StepError::invalid(format!(
                "aggregation '{}' has {} columns but {} new column names",
                agg.aggfunction.as_str(),
                agg.columns.len(),
                agg.newcolumns.len()
            )));
        }
        for new in &agg.newcolumns {
            if !seen.insert(new.to_uppercase()) {
                return Err(StepError::invalid(format!(
                    "duplicate output column '{}' in aggregation",
                    new
                )));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Source steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStep {
    pub domain: String,
}

/// Literal SQL query. `##PREVIOUS_STEP##` is replaced by the name of the
/// previous CTE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSqlStep {
    pub query: String,
}

// =============================================================================
// Row and column steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub condition: Condition,
}

/// `select` and `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnsStep {
    pub columns: Vec<String>,
}

/// `lowercase` and `uppercase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStep {
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameStep {
    pub to_rename: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateStep {
    pub column: String,
    pub new_column_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStep {
    pub new_column: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillnaStep {
    pub columns: Vec<String>,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceStep {
    pub search_column: String,
    pub to_replace: Vec<(JsonValue, JsonValue)>,
}

/// Target type of `convert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvertType {
    Integer,
    Float,
    Text,
    Date,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertStep {
    pub columns: Vec<String>,
    pub data_type: ConvertType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatenateStep {
    pub columns: Vec<String>,
    #[serde(default)]
    pub separator: String,
    pub new_column_name: String,
}

/// Split a text column on a delimiter into `<column>_1 .. <column>_n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitStep {
    pub column: String,
    pub delimiter: String,
    pub number_cols_to_keep: usize,
}

impl SplitStep {
    pub fn output_columns(&self) -> Vec<String> {
        (1..=self.number_cols_to_keep)
            .map(|i| format!("{}_{}", self.column, i))
            .collect()
    }
}

// =============================================================================
// Ordering and ranking
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortColumn {
    pub column: String,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub columns: Vec<SortColumn>,
}

/// Keep the `limit` first rows by `rankOn`, per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStep {
    pub rank_on: String,
    #[serde(default)]
    pub sort: SortOrder,
    pub limit: u64,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMethod {
    #[default]
    Standard,
    Dense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankStep {
    pub value_col: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub method: RankMethod,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub new_column_name: Option<String>,
}

impl RankStep {
    pub fn output_column(&self) -> String {
        self.new_column_name
            .clone()
            .unwrap_or_else(|| format!("{}_RANK", self.value_col))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumsumStep {
    pub to_cum_sum: Vec<(String, String)>,
    pub reference_column: String,
    #[serde(default)]
    pub groupby: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentageStep {
    pub column: String,
    #[serde(default)]
    pub group: Vec<String>,
    #[serde(default)]
    pub new_column_name: Option<String>,
}

impl PercentageStep {
    pub fn output_column(&self) -> String {
        self.new_column_name
            .clone()
            .unwrap_or_else(|| format!("{}_PCT", self.column))
    }
}

// =============================================================================
// Aggregation steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStep {
    #[serde(default)]
    pub on: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub keep_original_granularity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueGroupsStep {
    pub on: Vec<String>,
}

/// `argmax` / `argmin`: keep the rows holding the extremum of `column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgExtremumStep {
    pub column: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalDimension {
    pub total_column: String,
    pub total_rows_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsStep {
    pub total_dimensions: Vec<TotalDimension>,
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl TotalsStep {
    /// Every subset of total dimensions, as bitmasks; mask bit `i` set means
    /// dimension `i` is replaced by its total label. The first mask (0) is the
    /// detailed grouping.
    pub fn combinations(&self) -> Vec<u32> {
        (0..(1u32 << self.total_dimensions.len())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupStep {
    pub hierarchy: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub label_col: Option<String>,
    #[serde(default)]
    pub level_col: Option<String>,
    #[serde(default)]
    pub parent_label_col: Option<String>,
}

impl RollupStep {
    pub fn label_column(&self) -> &str {
        self.label_col.as_deref().unwrap_or("label")
    }

    pub fn level_column(&self) -> &str {
        self.level_col.as_deref().unwrap_or("level")
    }

    pub fn parent_column(&self) -> &str {
        self.parent_label_col.as_deref().unwrap_or("parent")
    }
}

// =============================================================================
// Reshaping steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotStep {
    pub index: Vec<String>,
    pub column_to_pivot: String,
    pub value_column: String,
    pub agg_function: AggFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpivotStep {
    pub keep: Vec<String>,
    pub unpivot: Vec<String>,
    pub unpivot_column_name: String,
    pub value_column_name: String,
    #[serde(default = "default_true")]
    pub dropna: bool,
}

// =============================================================================
// Combination steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendStep {
    pub pipelines: Vec<PipelineRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    #[serde(rename = "left")]
    Left,
    #[serde(rename = "inner")]
    Inner,
    /// Anti-join: left rows with no match on the right.
    #[serde(rename = "left outer")]
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub right_pipeline: PipelineRef,
    #[serde(rename = "type")]
    pub join_type: JoinKind,
    pub on: Vec<(String, String)>,
}

// =============================================================================
// Date steps
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateExtractStep {
    pub column: String,
    pub date_info: Vec<DateUnit>,
    #[serde(default)]
    pub new_columns: Vec<String>,
}

impl DateExtractStep {
    /// `(unit, output column)` pairs; missing names default to
    /// `<column>_<unit>`.
    pub fn outputs(&self) -> Vec<(DateUnit, String)> {
        self.date_info
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                let name = self
                    .new_columns
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("{}_{}", self.column, unit.as_str()));
                (*unit, name)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMissingDatesStep {
    pub dates_column: String,
    pub dates_granularity: Granularity,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterfallSortBy {
    Label,
    #[default]
    Value,
}

/// Bridge between a start and an end milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallStep {
    pub value_column: String,
    pub milestones_column: String,
    pub start: JsonValue,
    pub end: JsonValue,
    pub labels_column: String,
    #[serde(default)]
    pub parents_column: Option<String>,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub sort_by: WaterfallSortBy,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default = "default_true")]
    pub backfill: bool,
}

/// Name of the row-type column produced by `waterfall`.
pub const WATERFALL_TYPE_COLUMN: &str = "TYPE_waterfall";

impl WaterfallStep {
    /// Text used in the label column for a milestone total row.
    pub fn milestone_label(value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Key columns identifying one bridge element: group-by, label, parent.
    pub fn key_columns(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.groupby.iter().map(String::as_str).collect();
        keys.push(&self.labels_column);
        if let Some(parent) = &self.parents_column {
            keys.push(parent);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(cols: &[&str], new: &[&str], f: AggFunction) -> Aggregation {
        Aggregation {
            columns: cols.iter().map(|s| s.to_string()).collect(),
            newcolumns: new.iter().map(|s| s.to_string()).collect(),
            aggfunction: f,
        }
    }

    #[test]
    fn test_validate_aggregations_rejects_duplicates() {
        let aggs = vec![
            agg(&["a"], &["total"], AggFunction::Sum),
            agg(&["b"], &["TOTAL"], AggFunction::Max),
        ];
        let err = validate_aggregations(&aggs, &[]).unwrap_err();
        assert!(err.to_string().contains("duplicate output column"));
    }

    #[test]
    fn test_validate_aggregations_rejects_key_clash() {
        let aggs = vec![agg(&["a"], &["country"], AggFunction::Sum)];
        assert!(validate_aggregations(&aggs, &["country".to_string()]).is_err());
    }

    #[test]
    fn test_validate_aggregations_length_mismatch() {
        let aggs = vec![agg(&["a", "b"], &["x"], AggFunction::Sum)];
        assert!(validate_aggregations(&aggs, &[]).is_err());
    }

    #[test]
    fn test_date_extract_default_names() {
        let step = DateExtractStep {
            column: "d".into(),
            date_info: vec![DateUnit::Year, DateUnit::FirstDayOfIsoWeek],
            new_columns: vec!["the_year".into()],
        };
        let outputs = step.outputs();
        assert_eq!(outputs[0].1, "the_year");
        assert_eq!(outputs[1].1, "d_firstDayOfIsoWeek");
    }

    #[test]
    fn test_totals_combinations() {
        let step = TotalsStep {
            total_dimensions: vec![
                TotalDimension {
                    total_column: "a".into(),
                    total_rows_label: "All a".into(),
                },
                TotalDimension {
                    total_column: "b".into(),
                    total_rows_label: "All b".into(),
                },
            ],
            aggregations: vec![],
            groups: vec![],
        };
        assert_eq!(step.combinations(), vec![0, 1, 2, 3]);
    }
}
