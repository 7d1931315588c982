//! `dateextract`.

use std::collections::HashSet;

use crate::document::expr::{field, object, object_of};
use crate::document::{DocumentDates, Stage};
use crate::error::{StepError, StepResult};
use crate::step::DateExtractStep;

pub fn date_extract(step: &DateExtractStep) -> StepResult<Vec<Stage>> {
    if step.date_info.is_empty() {
        return Err(StepError::invalid("dateextract needs at least one unit"));
    }
    let date = field(&step.column);
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for (unit, name) in step.outputs() {
        if !seen.insert(name.to_uppercase()) {
            return Err(StepError::invalid(format!(
                "dateextract produces '{}' twice",
                name
            )));
        }
        fields.push((name, DocumentDates.unit(unit, &date)?));
    }
    Ok(vec![object("$addFields", object_of(fields))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::steps::test_support::stages;
    use crate::step::{DateUnit, Step};
    use serde_json::json;

    #[test]
    fn test_extracts_each_unit() {
        let out = stages(Step::DateExtract(DateExtractStep {
            column: "d".into(),
            date_info: vec![DateUnit::Year, DateUnit::FirstDayOfMonth, DateUnit::DayOfWeek],
            new_columns: vec![],
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$addFields": {
                "d_year": {"$year": "$d"},
                "d_firstDayOfMonth": {"$dateTrunc": {"date": "$d", "unit": "month"}},
                "d_dayOfWeek": {"$dayOfWeek": "$d"}
            }})]
        );
    }

    #[test]
    fn test_first_day_of_previous_week_uses_sunday_weeks() {
        let out = stages(Step::DateExtract(DateExtractStep {
            column: "d".into(),
            date_info: vec![DateUnit::FirstDayOfPreviousWeek],
            new_columns: vec!["prev".into()],
        }))
        .unwrap();
        let sunday = json!({"$dateTrunc": {"date": "$d", "unit": "week", "startOfWeek": "sunday"}});
        assert_eq!(
            out[0]["$addFields"]["prev"],
            json!({"$dateTrunc": {
                "date": {"$dateAdd": {"startDate": sunday, "unit": "day", "amount": -1}},
                "unit": "week",
                "startOfWeek": "sunday"
            }})
        );
    }

    #[test]
    fn test_duplicate_outputs_are_rejected() {
        let err = stages(Step::DateExtract(DateExtractStep {
            column: "d".into(),
            date_info: vec![DateUnit::Day, DateUnit::Month],
            new_columns: vec!["x".into(), "X".into()],
        }))
        .unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
    }
}
