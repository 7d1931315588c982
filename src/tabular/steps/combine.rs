//! `append` and `join`: steps running nested pipelines.

use polars::prelude::*;
use tracing::warn;

use crate::error::{StepError, StepResult};
use crate::step::{AppendStep, JoinKind, JoinStep};
use crate::tabular::frame::{cols, common_dtype, same_name};
use crate::tabular::{ExecutionContext, FrameExt};

const MATCHED: &str = "__stepforge_matched";

/// Stack the rows of every nested pipeline under the current frame. Columns
/// are matched by name; a column missing on one side is null there.
pub fn append(step: &AppendStep, frame: DataFrame, ctx: &ExecutionContext) -> StepResult<DataFrame> {
    if step.pipelines.is_empty() {
        return Err(StepError::invalid("append needs at least one pipeline"));
    }
    let mut parts = vec![frame];
    for pipeline in &step.pipelines {
        parts.push(ctx.execute_nested(&pipeline.steps())?);
    }

    let mut columns: Vec<String> = Vec::new();
    for part in &parts {
        for name in part.column_names() {
            if !super::contains(&columns, &name) {
                columns.push(name);
            }
        }
    }

    let mut dtypes = Vec::with_capacity(columns.len());
    for name in &columns {
        let mut present = Vec::new();
        for part in &parts {
            if let Ok(actual) = part.resolve(name) {
                present.push(part.column(&actual)?.dtype().clone());
            }
        }
        dtypes.push(common_dtype(name, &present)?);
    }

    let mut stacked = Vec::with_capacity(parts.len());
    for part in parts {
        let selected: Vec<Expr> = columns
            .iter()
            .zip(&dtypes)
            .map(|(name, dtype)| match part.resolve(name) {
                Ok(actual) => col(&actual).cast(dtype.clone()).alias(name),
                Err(_) => lit(NULL).cast(dtype.clone()).alias(name),
            })
            .collect();
        stacked.push(part.lazy().select(selected));
    }
    Ok(concat(stacked, UnionArgs::default())?.collect()?)
}

/// Join the current frame with a nested pipeline. `left outer` keeps the
/// left rows without a match and only the left columns. Null keys never
/// match.
pub fn join(step: &JoinStep, frame: DataFrame, ctx: &ExecutionContext) -> StepResult<DataFrame> {
    if step.on.is_empty() {
        return Err(StepError::invalid("join needs at least one key pair"));
    }
    let right = ctx.execute_nested(&step.right_pipeline.steps())?;
    let mut keys = Vec::with_capacity(step.on.len());
    for (l, r) in &step.on {
        let (l, r) = (frame.resolve(l)?, right.resolve(r)?);
        let dtype = common_dtype(&l, [frame.column(&l)?.dtype(), right.column(&r)?.dtype()])?;
        keys.push((l, r, dtype));
    }

    // Both sides join on copies of their keys cast to a shared type.
    let left_keys: Vec<String> = (0..keys.len()).map(|i| format!("__stepforge_lk_{}", i)).collect();
    let right_keys: Vec<String> = (0..keys.len()).map(|i| format!("__stepforge_rk_{}", i)).collect();
    let left_copies: Vec<Expr> = keys
        .iter()
        .zip(&left_keys)
        .map(|((l, _, dtype), temp)| col(l).cast(dtype.clone()).alias(temp))
        .collect();
    let right_copies: Vec<Expr> = keys
        .iter()
        .zip(&right_keys)
        .map(|((_, r, dtype), temp)| col(r).cast(dtype.clone()).alias(temp))
        .collect();
    let left_names = frame.column_names();

    if step.join_type == JoinKind::LeftOuter {
        let mut left = cols(&left_names);
        left.extend(left_copies);
        let out = frame
            .lazy()
            .select(left)
            .join(
                right.lazy().select(right_copies),
                cols(&left_keys),
                cols(&right_keys),
                JoinArgs::new(JoinType::Anti),
            )
            .select(cols(&left_names));
        return Ok(out.collect()?);
    }

    let pairs: Vec<(String, String)> = keys.iter().map(|(l, r, _)| (l.clone(), r.clone())).collect();
    let (columns, kept) = joined_columns(&left_names, &right.column_names(), &pairs);

    let mut left: Vec<Expr> = left_names
        .iter()
        .zip(&columns)
        .map(|(name, output)| col(name).alias(output))
        .collect();
    left.extend(left_copies);
    let mut right_selected: Vec<Expr> = kept
        .iter()
        .zip(&columns[left_names.len()..])
        .map(|(name, output)| col(name).alias(output))
        .collect();
    right_selected.extend(right_copies);
    right_selected.push(lit(true).alias(MATCHED));

    let how = match step.join_type {
        JoinKind::Inner => JoinType::Inner,
        _ => JoinType::Left,
    };
    let joined = frame
        .lazy()
        .select(left)
        .join(
            right.lazy().select(right_selected),
            cols(&left_keys),
            cols(&right_keys),
            JoinArgs::new(how),
        )
        .collect()?;
    let unmatched = joined.column(MATCHED)?.null_count();
    if unmatched > 0 {
        warn!(unmatched, "left join rows without a match");
    }
    Ok(joined.lazy().select(cols(&columns)).collect()?)
}

/// Output names of a left or inner join, and the right columns kept.
///
/// A right key named like its left key is dropped. Other names present on
/// both sides get `_LEFT` / `_RIGHT`, numbered while still taken.
fn joined_columns(
    left: &[String],
    right: &[String],
    keys: &[(String, String)],
) -> (Vec<String>, Vec<String>) {
    let kept: Vec<String> = right
        .iter()
        .filter(|r| {
            !keys
                .iter()
                .any(|(l, k)| k == *r && same_name(l, r))
        })
        .cloned()
        .collect();
    let clashes = |name: &str| {
        super::contains(left, name) && super::contains(&kept, name)
    };

    let mut taken: Vec<String> = left
        .iter()
        .chain(kept.iter())
        .map(|c| c.to_uppercase())
        .collect();
    let mut unique = |base: String| -> String {
        let mut candidate = base.clone();
        let mut n = 0;
        while taken.contains(&candidate.to_uppercase()) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        taken.push(candidate.to_uppercase());
        candidate
    };

    let mut columns = Vec::with_capacity(left.len() + kept.len());
    for name in left {
        columns.push(if clashes(name) {
            unique(format!("{}_LEFT", name))
        } else {
            name.clone()
        });
    }
    for name in &kept {
        columns.push(if clashes(name) {
            unique(format!("{}_RIGHT", name))
        } else {
            name.clone()
        });
    }
    (columns, kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ColumnsStep, PipelineRef, Step};
    use crate::tabular::{execute, InMemoryDomains};
    use crate::tabular::{DataFrame, FrameExt};
    use serde_json::json;

    fn domains() -> InMemoryDomains {
        let orders = DataFrame::from_records(&[
            json!({"id": 1, "customer_id": 10, "amount": 5}),
            json!({"id": 2, "customer_id": 20, "amount": 7}),
            json!({"id": 3, "customer_id": 99, "amount": 1}),
        ])
        .unwrap();
        let customers = DataFrame::from_records(&[
            json!({"id": 10, "name": "ann", "amount": 100}),
            json!({"id": 20, "name": "bob", "amount": 200}),
        ])
        .unwrap();
        InMemoryDomains::new()
            .with("orders", orders)
            .with("customers", customers)
    }

    fn join(kind: JoinKind, on: (&str, &str)) -> DataFrame {
        execute(
            &[
                Step::domain("orders"),
                Step::Join(JoinStep {
                    right_pipeline: PipelineRef::Domain("customers".into()),
                    join_type: kind,
                    on: vec![(on.0.into(), on.1.into())],
                }),
            ],
            &domains(),
        )
        .unwrap()
    }

    #[test]
    fn test_left_join_renames_collisions() {
        let frame = join(JoinKind::Left, ("customer_id", "id"));
        assert_eq!(
            frame.column_names(),
            ["id_LEFT", "customer_id", "amount_LEFT", "id_RIGHT", "name", "amount_RIGHT"]
        );
        assert_eq!(frame.height(), 3);
        assert_eq!(
            frame.to_records()[2],
            json!({"id_LEFT": 3, "customer_id": 99, "amount_LEFT": 1,
                   "id_RIGHT": null, "name": null, "amount_RIGHT": null})
        );
    }

    #[test]
    fn test_inner_join_drops_identical_key() {
        let frame = execute(
            &[
                Step::domain("orders"),
                Step::Rename(crate::step::RenameStep {
                    to_rename: vec![("customer_id".into(), "cid".into())],
                }),
                Step::Join(JoinStep {
                    right_pipeline: PipelineRef::Steps(vec![
                        Step::domain("customers"),
                        Step::Rename(crate::step::RenameStep {
                            to_rename: vec![("id".into(), "cid".into())],
                        }),
                    ]),
                    join_type: JoinKind::Inner,
                    on: vec![("cid".into(), "cid".into())],
                }),
            ],
            &domains(),
        )
        .unwrap();
        assert_eq!(frame.column_names(), ["id", "cid", "amount_LEFT", "name", "amount_RIGHT"]);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn test_anti_join() {
        let frame = join(JoinKind::LeftOuter, ("customer_id", "id"));
        assert_eq!(frame.column_names(), ["id", "customer_id", "amount"]);
        assert_eq!(frame.to_records(), vec![json!({"id": 3, "customer_id": 99, "amount": 1})]);
    }

    #[test]
    fn test_append_aligns_columns() {
        let frame = execute(
            &[
                Step::domain("orders"),
                Step::Append(AppendStep {
                    pipelines: vec![PipelineRef::Domain("customers".into())],
                }),
            ],
            &domains(),
        )
        .unwrap();
        assert_eq!(frame.column_names(), ["id", "customer_id", "amount", "name"]);
        assert_eq!(frame.height(), 5);
        assert_eq!(
            frame.to_records()[3],
            json!({"id": 10, "customer_id": null, "amount": 100, "name": "ann"})
        );
    }

    #[test]
    fn test_nested_failure_is_wrapped() {
        let err = execute(
            &[
                Step::domain("orders"),
                Step::Append(AppendStep {
                    pipelines: vec![PipelineRef::Steps(vec![
                        Step::domain("customers"),
                        Step::Delete(ColumnsStep {
                            columns: vec!["missing".into()],
                        }),
                    ])],
                }),
            ],
            &domains(),
        )
        .unwrap_err();
        assert_eq!((err.index, err.step), (1, "append"));
        let inner = err.innermost();
        assert_eq!((inner.index, inner.step), (1, "delete"));
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = DataFrame::from_records(&[json!({"k": null, "a": 1}), json!({"k": 2.0, "a": 2})])
            .unwrap();
        let right = DataFrame::from_records(&[json!({"k": null, "b": "x"}), json!({"k": 2, "b": "y"})])
            .unwrap();
        let domains = InMemoryDomains::new().with("l", left).with("r", right);
        let frame = execute(
            &[
                Step::domain("l"),
                Step::Join(JoinStep {
                    right_pipeline: PipelineRef::Domain("r".into()),
                    join_type: JoinKind::Left,
                    on: vec![("k".into(), "k".into())],
                }),
            ],
            &domains,
        )
        .unwrap();
        assert_eq!(
            frame.to_records(),
            vec![json!({"k": null, "a": 1, "b": null}), json!({"k": 2.0, "a": 2, "b": "y"})]
        );
    }
}
