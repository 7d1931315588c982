//! Query builder - construct SELECT statements and CTE chains with a
//! fluent API.

use std::collections::HashSet;

use super::dialect::Dialect;
use super::expr::{star, Expr, ExprExt, SortDir};
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens(dialect);
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// What a FROM or JOIN item reads.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    /// `"schema"."name"` or `"name"`
    Named {
        schema: Option<String>,
        name: String,
    },
    /// `(SELECT ...)`
    Subquery(Box<Query>),
    /// Trusted text such as a table expression returned by a collaborator.
    Raw(String),
}

/// A table reference with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        Self {
            source: TableSource::Named {
                schema: None,
                name: name.into(),
            },
            alias: None,
        }
    }

    pub fn raw(sql: &str) -> Self {
        Self {
            source: TableSource::Raw(sql.into()),
            alias: None,
        }
    }

    pub fn subquery(query: Query) -> Self {
        Self {
            source: TableSource::Subquery(Box::new(query)),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        if let TableSource::Named { schema: s, .. } = &mut self.source {
            *s = Some(schema.into());
        }
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        match &self.source {
            TableSource::Named { schema, name } => {
                if let Some(schema) = schema {
                    ts.push(Token::Ident(schema.clone())).push(Token::Dot);
                }
                ts.push(Token::Ident(name.clone()));
            }
            TableSource::Subquery(query) => {
                ts.lparen().append(&query.to_tokens(dialect)).rparen();
            }
            TableSource::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Joins
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Option<Expr>,
}

impl Join {
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Token::Inner),
            JoinType::Left => ts.push(Token::Left),
            JoinType::Cross => ts.push(Token::Cross),
        };

        ts.space().push(Token::Join).space();
        ts.append(&self.table.to_tokens(dialect));

        if let Some(on) = &self.on {
            ts.space().push(Token::On).space();
            ts.append(&on.to_tokens(dialect));
        }

        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// An ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: SortDir,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Desc,
        }
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens(dialect);
        ts.space().push(match self.dir {
            SortDir::Asc => Token::Asc,
            SortDir::Desc => Token::Desc,
        });
        ts
    }
}

// =============================================================================
// LIMIT / OFFSET
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LimitOffset {
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        dialect.emit_limit_offset(self.limit, self.offset)
    }
}

// =============================================================================
// Set Operations
// =============================================================================

/// `q1 UNION [ALL] q2 UNION [ALL] ...`
#[derive(Debug, Clone, PartialEq)]
pub struct SetOperation {
    pub queries: Vec<Query>,
    pub all: bool,
}

impl SetOperation {
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        for (i, query) in self.queries.iter().enumerate() {
            if i > 0 {
                ts.newline().push(Token::Union);
                if self.all {
                    ts.space().push(Token::All);
                }
                ts.newline();
            }
            // A member's own ORDER BY or LIMIT would otherwise apply to the
            // whole union.
            let wrap = !query.order_by.is_empty()
                || query.limit_offset.is_some()
                || query.set_op.is_some();
            if wrap {
                ts.lparen();
            }
            ts.append(&query.to_tokens(dialect));
            if wrap {
                ts.rparen();
            }
        }
        ts
    }
}

// =============================================================================
// CTE (Common Table Expression)
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CteBody {
    Query(Box<Query>),
    /// Caller-provided SQL, emitted verbatim.
    Raw(String),
}

/// One `name AS (...)` entry of a WITH clause.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct Cte {
    pub name: String,
    pub body: CteBody,
    pub recursive: bool,
}

impl Cte {
    pub fn new(name: &str, query: Query) -> Self {
        Self {
            name: name.into(),
            body: CteBody::Query(Box::new(query)),
            recursive: false,
        }
    }

    pub fn raw(name: &str, sql: &str) -> Self {
        Self {
            name: name.into(),
            body: CteBody::Raw(sql.trim().trim_end_matches(';').to_string()),
            recursive: false,
        }
    }

    /// A CTE referencing itself.
    pub fn recursive(name: &str, query: Query) -> Self {
        Self {
            recursive: true,
            ..Self::new(name, query)
        }
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::As)
            .space()
            .lparen()
            .newline();
        match &self.body {
            CteBody::Query(query) => ts.append(&query.to_tokens(dialect)),
            CteBody::Raw(sql) => ts.push(Token::Raw(sql.clone())),
        };
        ts.newline().rparen();
        ts
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT statement, optionally preceded by CTEs.
///
/// When `set_op` is present the query renders as that union; its own
/// ORDER BY and LIMIT then apply to the combined rows.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql() or to_tokens()"]
pub struct Query {
    pub with: Vec<Cte>,
    pub select: Vec<SelectExpr>,
    pub distinct: bool,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
    pub set_op: Option<SetOperation>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SELECT * FROM name`
    pub fn select_all_from(name: &str) -> Self {
        Self::new().select_star().from(TableRef::new(name))
    }

    /// `q1 UNION ALL q2 ...`
    pub fn union_all(queries: Vec<Query>) -> Self {
        Self {
            set_op: Some(SetOperation { queries, all: true }),
            ..Self::default()
        }
    }

    /// `q1 UNION q2 ...`
    pub fn union(queries: Vec<Query>) -> Self {
        Self {
            set_op: Some(SetOperation {
                queries,
                all: false,
            }),
            ..Self::default()
        }
    }

    pub fn with_cte(mut self, cte: Cte) -> Self {
        self.with.push(cte);
        self
    }

    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn select_star(mut self) -> Self {
        self.select = vec![SelectExpr::new(star())];
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            join_type,
            table,
            on: Some(on),
        });
        self
    }

    pub fn inner_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Inner, table, on)
    }

    pub fn left_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Left, table, on)
    }

    pub fn cross_join(mut self, table: TableRef) -> Self {
        self.joins.push(Join {
            join_type: JoinType::Cross,
            table,
            on: None,
        });
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(condition);
        self
    }

    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_offset.get_or_insert_with(LimitOffset::default).limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.limit_offset.get_or_insert_with(LimitOffset::default).offset = Some(offset);
        self
    }

    pub fn is_recursive(&self) -> bool {
        self.with.iter().any(|cte| cte.recursive)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let caps = dialect.capabilities();
        let mut ts = TokenStream::new();

        // WITH clause
        if !self.with.is_empty() {
            ts.push(Token::With);
            if self.is_recursive() && caps.recursive_keyword {
                ts.space().push(Token::Recursive);
            }
            ts.space();
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    ts.comma().newline();
                }
                ts.append(&cte.to_tokens(dialect));
            }
            ts.newline();
        }

        if let Some(set_op) = &self.set_op {
            ts.append(&set_op.to_tokens(dialect));
        } else {
            self.append_select_body(&mut ts, dialect);
        }

        // ORDER BY
        // OFFSET ... FETCH is only valid after an ORDER BY, so emit a no-op
        // ordering when none was requested.
        let needs_order_by_placeholder = caps.pagination.requires_order_by()
            && self.order_by.is_empty()
            && self.limit_offset.is_some();

        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            ts.comma_separated(&self.order_by, |o| o.to_tokens(dialect));
        } else if needs_order_by_placeholder {
            ts.newline()
                .push(Token::OrderBy)
                .space()
                .lparen()
                .push(Token::Select)
                .space()
                .push(Token::Null)
                .rparen();
        }

        // LIMIT / OFFSET
        if let Some(lo) = &self.limit_offset {
            ts.newline();
            ts.append(&lo.to_tokens(dialect));
        }

        // Recursion depth of SQL Server defaults to 100 levels.
        if self.is_recursive() && !caps.recursive_keyword && caps.recursive_cte {
            ts.newline().push(Token::Raw("OPTION (MAXRECURSION 0)".into()));
        }

        ts
    }

    fn append_select_body(&self, ts: &mut TokenStream, dialect: Dialect) {
        ts.push(Token::Select);
        if self.distinct {
            ts.space().push(Token::Distinct);
        }

        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens(dialect));
        }

        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens(dialect));
        }

        for join in &self.joins {
            ts.newline();
            ts.append(&join.to_tokens(dialect));
        }

        if let Some(where_clause) = &self.where_clause {
            ts.newline().push(Token::Where).space();
            ts.append(&where_clause.to_tokens(dialect));
        }

        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            ts.comma_separated(&self.group_by, |e| e.to_tokens(dialect));
        }

        if let Some(having) = &self.having {
            ts.newline().push(Token::Having).space();
            ts.append(&having.to_tokens(dialect));
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Upper-cased names of the tables this query reads, subqueries and
    /// set operation members included. Raw table text is not inspected.
    pub fn tables_read(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        self.collect_tables(&mut names);
        names
    }

    fn collect_tables(&self, names: &mut HashSet<String>) {
        for cte in &self.with {
            if let CteBody::Query(query) = &cte.body {
                query.collect_tables(names);
            }
        }
        for table in self.from.iter().chain(self.joins.iter().map(|j| &j.table)) {
            match &table.source {
                TableSource::Named { name, .. } => {
                    names.insert(name.to_uppercase());
                }
                TableSource::Subquery(query) => query.collect_tables(names),
                TableSource::Raw(_) => {}
            }
        }
        let exprs = self
            .select
            .iter()
            .map(|s| &s.expr)
            .chain(self.where_clause.iter())
            .chain(self.group_by.iter())
            .chain(self.having.iter())
            .chain(self.joins.iter().filter_map(|j| j.on.as_ref()));
        for expr in exprs {
            expr_tables(expr, names);
        }
        if let Some(set_op) = &self.set_op {
            for query in &set_op.queries {
                query.collect_tables(names);
            }
        }
    }
}

/// Tables read by subqueries inside `expr`.
fn expr_tables(expr: &Expr, names: &mut HashSet<String>) {
    match expr {
        Expr::Exists { query, .. } => query.collect_tables(names),
        Expr::BinaryOp { left, right, .. } => {
            expr_tables(left, names);
            expr_tables(right, names);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Paren(expr) => expr_tables(expr, names),
        Expr::Interval { amount, .. } => expr_tables(amount, names),
        Expr::Function { args, .. } => args.iter().for_each(|a| expr_tables(a, names)),
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            for e in operand.iter().chain(else_clause.iter()) {
                expr_tables(e, names);
            }
            for (when, then) in when_clauses {
                expr_tables(when, names);
                expr_tables(then, names);
            }
        }
        Expr::In { expr, values, .. } => {
            expr_tables(expr, names);
            values.iter().for_each(|v| expr_tables(v, names));
        }
        Expr::WindowFunction {
            function,
            partition_by,
            order_by,
            ..
        } => {
            expr_tables(function, names);
            partition_by.iter().for_each(|e| expr_tables(e, names));
            order_by.iter().for_each(|o| expr_tables(&o.expr, names));
        }
        Expr::Column { .. }
        | Expr::Literal(_)
        | Expr::Keyword(_)
        | Expr::Star { .. }
        | Expr::Raw(_) => {}
    }
}

impl std::fmt::Display for Query {
    /// Formats the query using the default dialect (Postgres).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::{col, count_star, lit_int, sum, table_col};

    #[test]
    fn test_simple_select() {
        let query = Query::new()
            .select(vec![col("id"), col("name")])
            .from(TableRef::new("users").with_schema("dbo"));

        let sql = query.to_sql(Dialect::TSql);
        assert_eq!(sql, "SELECT\n  [id],\n  [name]\nFROM [dbo].[users]");
    }

    #[test]
    fn test_aggregation() {
        let query = Query::new()
            .select(vec![
                col("region").into(),
                sum(col("amount")).alias("total"),
                count_star().alias("cnt"),
            ])
            .from(TableRef::new("orders"))
            .group_by(vec![col("region")])
            .having(sum(col("amount")).gt(lit_int(1000)));

        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("GROUP BY \"region\""));
        assert!(sql.contains("HAVING SUM(\"amount\") > 1000"));
        assert!(sql.contains("COUNT(*) AS \"cnt\""));
    }

    #[test]
    fn test_join() {
        let query = Query::new()
            .select(vec![table_col("u", "name"), table_col("o", "total")])
            .from(TableRef::new("users").with_alias("u"))
            .left_join(
                TableRef::new("orders").with_alias("o"),
                table_col("u", "id").eq(table_col("o", "user_id")),
            );

        let sql = query.to_sql(Dialect::MySql);
        assert!(sql.contains("LEFT JOIN `orders` AS `o` ON `u`.`id` = `o`.`user_id`"));
    }

    #[test]
    fn test_limit_tsql_without_order_by() {
        let query = Query::select_all_from("users").limit(10);
        let sql = query.to_sql(Dialect::TSql);
        assert!(
            sql.contains("ORDER BY (SELECT NULL)"),
            "Expected ORDER BY (SELECT NULL) placeholder, got: {}",
            sql
        );
        assert!(sql.ends_with("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"));
    }

    #[test]
    fn test_cte_chain() {
        let query = Query::select_all_from("b")
            .with_cte(Cte::raw("a", "SELECT 1 AS x;"))
            .with_cte(Cte::new("b", Query::select_all_from("a")));

        assert_eq!(
            query.to_sql(Dialect::Postgres),
            "WITH \"a\" AS (\nSELECT 1 AS x\n),\n\"b\" AS (\nSELECT\n  *\nFROM \"a\"\n)\nSELECT\n  *\nFROM \"b\""
        );
    }

    #[test]
    fn test_recursive_keyword_per_dialect() {
        let seed = Query::new().select(vec![lit_int(1).alias("n")]);
        let query = Query::select_all_from("r").with_cte(Cte::recursive("r", seed));

        assert!(query.to_sql(Dialect::Postgres).starts_with("WITH RECURSIVE"));
        let tsql = query.to_sql(Dialect::TSql);
        assert!(tsql.starts_with("WITH [r]"));
        assert!(tsql.ends_with("OPTION (MAXRECURSION 0)"));
    }

    #[test]
    fn test_union_all_wraps_ordered_members() {
        let first = Query::select_all_from("t1");
        let second = Query::select_all_from("t2")
            .order_by(vec![OrderByExpr::asc(col("id"))])
            .limit(1);
        let sql = Query::union_all(vec![first, second])
            .order_by(vec![OrderByExpr::desc(col("id"))])
            .to_sql(Dialect::DuckDb);

        assert!(sql.starts_with("SELECT\n  *\nFROM \"t1\"\nUNION ALL\n(SELECT"));
        assert!(sql.ends_with(")\nORDER BY \"id\" DESC"));
    }

    #[test]
    fn test_union_distinct() {
        let sql = Query::union(vec![Query::select_all_from("a"), Query::select_all_from("b")])
            .to_sql(Dialect::Postgres);
        assert!(sql.contains("\nUNION\n"));
        assert!(!sql.contains("ALL"));
    }
}
