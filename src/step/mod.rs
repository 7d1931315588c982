//! The step model.
//!
//! A pipeline is an ordered list of [`Step`] values. Each step is a tagged
//! JSON object whose `"name"` field selects the operation; remaining fields
//! are operation-specific and camelCased on the wire:
//!
//! ```json
//! [
//!   {"name": "domain", "domain": "sales"},
//!   {"name": "rename", "toRename": [["amount", "revenue"]]},
//!   {"name": "addmissingdates", "datesColumn": "day", "datesGranularity": "day", "groups": []}
//! ]
//! ```
//!
//! Steps are produced and validated upstream; translators only rely on the
//! typed fields below.

mod condition;
mod params;

pub use condition::{Condition, Operator, SimpleCondition};
pub use params::*;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub use crate::calendar::{DateUnit, Granularity};

/// An ordered list of steps.
pub type Pipeline = Vec<Step>;

/// One declarative pipeline operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Step {
    Domain(DomainStep),
    CustomSql(CustomSqlStep),
    Filter(FilterStep),
    Select(ColumnsStep),
    Delete(ColumnsStep),
    Rename(RenameStep),
    Duplicate(DuplicateStep),
    Text(TextStep),
    Fillna(FillnaStep),
    Replace(ReplaceStep),
    Lowercase(ColumnStep),
    Uppercase(ColumnStep),
    Convert(ConvertStep),
    Concatenate(ConcatenateStep),
    Split(SplitStep),
    Sort(SortStep),
    Top(TopStep),
    Aggregate(AggregateStep),
    UniqueGroups(UniqueGroupsStep),
    Argmax(ArgExtremumStep),
    Argmin(ArgExtremumStep),
    Pivot(PivotStep),
    Unpivot(UnpivotStep),
    Rank(RankStep),
    Cumsum(CumsumStep),
    Percentage(PercentageStep),
    Totals(TotalsStep),
    Rollup(RollupStep),
    Append(AppendStep),
    Join(JoinStep),
    DateExtract(DateExtractStep),
    AddMissingDates(AddMissingDatesStep),
    Waterfall(WaterfallStep),
}

impl Step {
    /// Wire name of this step kind.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Domain(_) => "domain",
            Step::CustomSql(_) => "customsql",
            Step::Filter(_) => "filter",
            Step::Select(_) => "select",
            Step::Delete(_) => "delete",
            Step::Rename(_) => "rename",
            Step::Duplicate(_) => "duplicate",
            Step::Text(_) => "text",
            Step::Fillna(_) => "fillna",
            Step::Replace(_) => "replace",
            Step::Lowercase(_) => "lowercase",
            Step::Uppercase(_) => "uppercase",
            Step::Convert(_) => "convert",
            Step::Concatenate(_) => "concatenate",
            Step::Split(_) => "split",
            Step::Sort(_) => "sort",
            Step::Top(_) => "top",
            Step::Aggregate(_) => "aggregate",
            Step::UniqueGroups(_) => "uniquegroups",
            Step::Argmax(_) => "argmax",
            Step::Argmin(_) => "argmin",
            Step::Pivot(_) => "pivot",
            Step::Unpivot(_) => "unpivot",
            Step::Rank(_) => "rank",
            Step::Cumsum(_) => "cumsum",
            Step::Percentage(_) => "percentage",
            Step::Totals(_) => "totals",
            Step::Rollup(_) => "rollup",
            Step::Append(_) => "append",
            Step::Join(_) => "join",
            Step::DateExtract(_) => "dateextract",
            Step::AddMissingDates(_) => "addmissingdates",
            Step::Waterfall(_) => "waterfall",
        }
    }

    pub fn domain(name: &str) -> Self {
        Step::Domain(DomainStep {
            domain: name.into(),
        })
    }
}

/// A nested pipeline used by `append` and `join`: either a bare domain name
/// or an inline list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineRef {
    Domain(String),
    Steps(Vec<Step>),
}

impl PipelineRef {
    /// The steps of this pipeline; a bare domain name becomes a one-step
    /// pipeline.
    pub fn steps(&self) -> Cow<'_, [Step]> {
        match self {
            PipelineRef::Domain(name) => Cow::Owned(vec![Step::domain(name)]),
            PipelineRef::Steps(steps) => Cow::Borrowed(steps.as_slice()),
        }
    }
}

/// Parse a pipeline from its JSON wire format.
pub fn parse_pipeline(json: &str) -> Result<Pipeline, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_tagged_steps() {
        let steps: Pipeline = serde_json::from_value(json!([
            {"name": "domain", "domain": "sales"},
            {"name": "rename", "toRename": [["a", "b"]]},
            {"name": "uniquegroups", "on": ["b"]},
            {"name": "customsql", "query": "SELECT 1"}
        ]))
        .unwrap();

        let names: Vec<&str> = steps.iter().map(Step::name).collect();
        assert_eq!(names, vec!["domain", "rename", "uniquegroups", "customsql"]);
        match &steps[1] {
            Step::Rename(r) => assert_eq!(r.to_rename, vec![("a".into(), "b".into())]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_waterfall_defaults() {
        let step: Step = serde_json::from_value(json!({
            "name": "waterfall",
            "valueColumn": "value",
            "milestonesColumn": "year",
            "start": 2019,
            "end": 2020,
            "labelsColumn": "city",
            "sortBy": "label",
            "order": "desc"
        }))
        .unwrap();

        let Step::Waterfall(w) = step else {
            panic!("expected waterfall");
        };
        assert!(w.backfill);
        assert!(w.groupby.is_empty());
        assert_eq!(w.parents_column, None);
        assert_eq!(w.sort_by, WaterfallSortBy::Label);
        assert_eq!(w.order, SortOrder::Desc);
        assert_eq!(w.start, json!(2019));
    }

    #[test]
    fn test_pipeline_ref_domain_shortcut() {
        let join: Step = serde_json::from_value(json!({
            "name": "join",
            "rightPipeline": "customers",
            "type": "left outer",
            "on": [["customer_id", "id"]]
        }))
        .unwrap();
        let Step::Join(j) = join else {
            panic!("expected join");
        };
        assert_eq!(j.join_type, JoinKind::LeftOuter);
        let steps = j.right_pipeline.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name(), "domain");
    }

    #[test]
    fn test_aggregate_wire_names() {
        let step: Step = serde_json::from_value(json!({
            "name": "aggregate",
            "on": ["country"],
            "aggregations": [
                {"columns": ["v"], "newcolumns": ["n"], "aggfunction": "count distinct"}
            ]
        }))
        .unwrap();
        let Step::Aggregate(agg) = step else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.aggregations[0].aggfunction, AggFunction::CountDistinct);
        assert!(!agg.keep_original_granularity);
    }
}
