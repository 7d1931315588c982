//! `filter`: keep the rows matching a condition tree.

use crate::error::{StepError, StepResult};
use crate::relational::context::{StepContext, StepOutput};
use crate::relational::metadata::SchemaDelta;
use crate::sql::dialect::capabilities::RegexFlavor;
use crate::sql::expr::raw_sql;
use crate::sql::{col, func, lit_int, lit_json, lit_str, Cte, Expr, ExprExt};
use crate::step::{Condition, FilterStep, Operator, SimpleCondition};

pub fn filter(step: &FilterStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let condition = compile_condition(&step.condition, ctx)?;
    let query = ctx.select_all()?.filter(condition);
    Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new()))
}

/// SQL predicate for a condition tree.
///
/// Negative operators (`ne`, `nin`, `notmatches`) keep rows where the
/// column is NULL.
pub fn compile_condition(condition: &Condition, ctx: &StepContext) -> StepResult<Expr> {
    match condition {
        Condition::And { and } => combine(and, ctx, |a, b| a.and(b)),
        Condition::Or { or } => combine(or, ctx, |a, b| a.or(b)),
        Condition::Simple(simple) => compile_simple(simple, ctx),
    }
}

fn combine(
    children: &[Condition],
    ctx: &StepContext,
    op: impl Fn(Expr, Expr) -> Expr,
) -> StepResult<Expr> {
    let compiled = children
        .iter()
        .map(|c| compile_condition(c, ctx))
        .collect::<StepResult<Vec<_>>>()?;
    compiled
        .into_iter()
        .reduce(op)
        .ok_or_else(|| StepError::invalid("empty condition group"))
}

fn compile_simple(simple: &SimpleCondition, ctx: &StepContext) -> StepResult<Expr> {
    let column = ctx.column(&simple.column)?;
    let target = col(&column.name);
    let or_null = |expr: Expr| Expr::Paren(Box::new(expr.or(col(&column.name).is_null())));

    Ok(match simple.operator {
        Operator::Eq if simple.value.is_null() => target.is_null(),
        Operator::Ne if simple.value.is_null() => target.is_not_null(),
        Operator::Eq => target.eq(lit_json(&simple.value)),
        Operator::Ne => or_null(target.ne(lit_json(&simple.value))),
        Operator::Gt => target.gt(lit_json(&simple.value)),
        Operator::Ge => target.gte(lit_json(&simple.value)),
        Operator::Lt => target.lt(lit_json(&simple.value)),
        Operator::Le => target.lte(lit_json(&simple.value)),
        Operator::In => target.in_list(simple.values().iter().map(lit_json).collect()),
        Operator::Nin => or_null(target.not_in_list(simple.values().iter().map(lit_json).collect())),
        Operator::IsNull => target.is_null(),
        Operator::NotNull => target.is_not_null(),
        Operator::Matches => regex_match(target, pattern(simple)?, false, ctx)?,
        Operator::NotMatches => or_null(regex_match(target, pattern(simple)?, true, ctx)?),
    })
}

fn pattern(simple: &SimpleCondition) -> StepResult<&str> {
    simple.pattern().ok_or_else(|| {
        StepError::invalid(format!(
            "regular expression filter on '{}' needs a string pattern",
            simple.column
        ))
    })
}

fn regex_match(target: Expr, pattern: &str, negated: bool, ctx: &StepContext) -> StepResult<Expr> {
    let flavor = ctx.caps().regex.ok_or(StepError::MissingCapability {
        feature: "regular expression filters",
        dialect: ctx.dialect.name(),
    })?;
    let dialect = ctx.dialect;
    let column = target.to_sql(dialect);
    let literal = lit_str(pattern).to_sql(dialect);
    let infix = |positive: &str, negative: &str| {
        let op = if negated { negative } else { positive };
        Expr::Paren(Box::new(raw_sql(&format!("{} {} {}", column, op, literal))))
    };

    Ok(match flavor {
        RegexFlavor::Tilde => infix("~", "!~"),
        RegexFlavor::RegexpKeyword => infix("REGEXP", "NOT REGEXP"),
        RegexFlavor::Rlike => infix("RLIKE", "NOT RLIKE"),
        RegexFlavor::RegexpContains | RegexFlavor::RegexpMatches => {
            let name = if flavor == RegexFlavor::RegexpContains {
                "REGEXP_CONTAINS"
            } else {
                "REGEXP_MATCHES"
            };
            let call = func(name, vec![target, lit_str(pattern)]);
            if negated {
                call.not()
            } else {
                call
            }
        }
        RegexFlavor::RegexpInstr => {
            let call = func("REGEXP_INSTR", vec![target, lit_str(pattern)]);
            if negated {
                call.eq(lit_int(0))
            } else {
                call.gt(lit_int(0))
            }
        }
    })
}
