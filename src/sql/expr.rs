//! Expression AST.
//!
//! Every variant is rendered by [`Expr::to_tokens`]; dialect differences
//! (concat spelling, modulo, interval literals) are resolved there from the
//! capability table.

use serde_json::Value as JsonValue;

use super::dialect::{ConcatStyle, DateFlavor, Dialect};
use super::query::{Query, SelectExpr};
use super::token::{Token, TokenStream};

// =============================================================================
// Expression AST
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `table.column` or `column`
    Column {
        table: Option<String>,
        column: String,
    },

    Literal(Literal),

    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },

    Case {
        operand: Option<Box<Expr>>,
        when_clauses: Vec<(Expr, Expr)>,
        else_clause: Option<Box<Expr>>,
    },

    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    IsNull { expr: Box<Expr>, negated: bool },

    /// `[NOT] EXISTS (SELECT ...)`
    Exists { query: Box<Query>, negated: bool },

    /// `CAST(expr AS type)`; the type name is already dialect-specific.
    Cast { expr: Box<Expr>, type_name: String },

    /// `EXTRACT(field FROM expr)`
    Extract { field: &'static str, expr: Box<Expr> },

    /// A day/month/... interval. Rendered `INTERVAL '1 day'` by dialects with
    /// ANSI date functions and `INTERVAL 1 DAY` elsewhere.
    Interval { amount: Box<Expr>, unit: &'static str },

    /// Bare keyword argument such as `YEAR` in `DATEPART(YEAR, x)`.
    Keyword(&'static str),

    /// `*` or `table.*`
    Star { table: Option<String> },

    Paren(Box<Expr>),

    /// `function OVER (PARTITION BY ... ORDER BY ... frame)`
    WindowFunction {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<WindowOrderBy>,
        frame: Option<WindowFrame>,
    },

    /// Trusted SQL passed through unchanged.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Concat,
}

impl BinaryOperator {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Gt
            | BinaryOperator::Lte
            | BinaryOperator::Gte => 3,
            BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Concat => 4,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 5,
        }
    }

    fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Plus
                | BinaryOperator::Mul
                | BinaryOperator::Concat
        )
    }

    fn token(&self) -> Token {
        match self {
            BinaryOperator::Eq => Token::Eq,
            BinaryOperator::Ne => Token::Ne,
            BinaryOperator::Lt => Token::Lt,
            BinaryOperator::Gt => Token::Gt,
            BinaryOperator::Lte => Token::Lte,
            BinaryOperator::Gte => Token::Gte,
            BinaryOperator::And => Token::And,
            BinaryOperator::Or => Token::Or,
            BinaryOperator::Plus => Token::Plus,
            BinaryOperator::Minus => Token::Minus,
            BinaryOperator::Mul => Token::Mul,
            BinaryOperator::Div => Token::Div,
            BinaryOperator::Mod => Token::Mod,
            BinaryOperator::Concat => Token::Concat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

// =============================================================================
// Window Functions
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY item inside a window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOrderBy {
    pub expr: Expr,
    pub dir: SortDir,
}

impl WindowOrderBy {
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
}

/// Frame of a window function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFrame {
    /// `ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW`
    RowsToCurrent,
    /// `ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING`
    RowsEntirePartition,
}

/// Builder returned by [`WindowExt::over`].
#[derive(Debug, Clone)]
#[must_use = "call build() to obtain the window expression"]
pub struct WindowBuilder {
    function: Expr,
    partition_by: Vec<Expr>,
    order_by: Vec<WindowOrderBy>,
    frame: Option<WindowFrame>,
}

impl WindowBuilder {
    pub fn partition_by(mut self, exprs: Vec<Expr>) -> Self {
        self.partition_by = exprs;
        self
    }

    pub fn order_by(mut self, exprs: Vec<WindowOrderBy>) -> Self {
        self.order_by = exprs;
        self
    }

    pub fn frame(mut self, frame: WindowFrame) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn build(self) -> Expr {
        Expr::WindowFunction {
            function: Box::new(self.function),
            partition_by: self.partition_by,
            order_by: self.order_by,
            frame: self.frame,
        }
    }
}

pub trait WindowExt: Sized {
    fn over(self) -> WindowBuilder;
}

impl WindowExt for Expr {
    fn over(self) -> WindowBuilder {
        WindowBuilder {
            function: self,
            partition_by: vec![],
            order_by: vec![],
            frame: None,
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

impl Expr {
    /// Render as a standalone SQL fragment.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        let caps = dialect.capabilities();

        match self {
            Expr::Column { table, column } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone())).push(Token::Dot);
                }
                ts.push(Token::Ident(column.clone()));
            }

            Expr::Literal(lit) => {
                ts.push(match lit {
                    Literal::Int(n) => Token::LitInt(*n),
                    Literal::Float(f) => Token::LitFloat(*f),
                    Literal::String(s) => Token::LitString(s.clone()),
                    Literal::Bool(b) => Token::LitBool(*b),
                    Literal::Null => Token::LitNull,
                });
            }

            Expr::BinaryOp { left, op, right } => {
                let function = match op {
                    BinaryOperator::Concat if caps.concat == ConcatStyle::Function => {
                        Some("CONCAT")
                    }
                    BinaryOperator::Mod if caps.modulo_function => Some("MOD"),
                    _ => None,
                };
                if let Some(name) = function {
                    ts.push(Token::FunctionName(name.into())).lparen();
                    ts.append(&left.to_tokens(dialect)).comma().space();
                    ts.append(&right.to_tokens(dialect)).rparen();
                } else {
                    append_operand(&mut ts, left, *op, false, dialect);
                    ts.space().push(op.token()).space();
                    append_operand(&mut ts, right, *op, true, dialect);
                }
            }

            Expr::UnaryOp { op, expr } => {
                match op {
                    UnaryOperator::Not => ts.push(Token::Not).space(),
                    UnaryOperator::Minus => ts.push(Token::Minus),
                };
                let needs_parens = matches!(**expr, Expr::BinaryOp { .. });
                if needs_parens {
                    ts.lparen();
                }
                ts.append(&expr.to_tokens(dialect));
                if needs_parens {
                    ts.rparen();
                }
            }

            Expr::Function {
                name,
                args,
                distinct,
            } => {
                ts.push(Token::FunctionName(name.clone())).lparen();
                if *distinct {
                    ts.push(Token::Distinct).space();
                }
                ts.comma_separated(args, |a| a.to_tokens(dialect));
                ts.rparen();
            }

            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                ts.push(Token::Case);
                if let Some(op) = operand {
                    ts.space().append(&op.to_tokens(dialect));
                }
                for (when, then) in when_clauses {
                    ts.space().push(Token::When).space();
                    ts.append(&when.to_tokens(dialect));
                    ts.space().push(Token::Then).space();
                    ts.append(&then.to_tokens(dialect));
                }
                if let Some(else_expr) = else_clause {
                    ts.space().push(Token::Else).space();
                    ts.append(&else_expr.to_tokens(dialect));
                }
                ts.space().push(Token::End);
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                // "x IN ()" is invalid SQL.
                if values.is_empty() {
                    let always = Expr::Literal(Literal::Int(1))
                        .eq(Expr::Literal(Literal::Int(if *negated { 1 } else { 0 })));
                    ts.append(&always.to_tokens(dialect));
                } else {
                    ts.append(&expr.to_tokens(dialect));
                    if *negated {
                        ts.space().push(Token::Not);
                    }
                    ts.space().push(Token::In).space().lparen();
                    ts.comma_separated(values, |v| v.to_tokens(dialect));
                    ts.rparen();
                }
            }

            Expr::IsNull { expr, negated } => {
                ts.append(&expr.to_tokens(dialect)).space();
                ts.push(if *negated {
                    Token::IsNotNull
                } else {
                    Token::IsNull
                });
            }

            Expr::Exists { query, negated } => {
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::Exists).space().lparen();
                ts.append(&query.to_tokens(dialect)).rparen();
            }

            Expr::Cast { expr, type_name } => {
                ts.push(Token::Cast).lparen();
                ts.append(&expr.to_tokens(dialect));
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Raw(type_name.clone()))
                    .rparen();
            }

            Expr::Extract { field, expr } => {
                ts.push(Token::FunctionName("EXTRACT".into())).lparen();
                ts.push(Token::Keyword(field)).space().push(Token::From).space();
                ts.append(&expr.to_tokens(dialect)).rparen();
            }

            Expr::Interval { amount, unit } => {
                let quoted = caps.date == DateFlavor::Ansi;
                match (quoted, &**amount) {
                    (true, Expr::Literal(Literal::Int(n))) => {
                        ts.push(Token::Keyword("INTERVAL")).space();
                        ts.push(Token::Raw(format!("'{} {}'", n, unit.to_lowercase())));
                    }
                    (true, other) => {
                        ts.lparen().append(&other.to_tokens(dialect)).rparen();
                        ts.space().push(Token::Mul).space();
                        ts.push(Token::Keyword("INTERVAL")).space();
                        ts.push(Token::Raw(format!("'1 {}'", unit.to_lowercase())));
                    }
                    (false, other) => {
                        ts.push(Token::Keyword("INTERVAL")).space();
                        let bare = matches!(other, Expr::Literal(_) | Expr::Column { .. });
                        if !bare {
                            ts.lparen();
                        }
                        ts.append(&other.to_tokens(dialect));
                        if !bare {
                            ts.rparen();
                        }
                        ts.space().push(Token::Raw(unit.to_uppercase()));
                    }
                }
            }

            Expr::Keyword(kw) => {
                ts.push(Token::Keyword(kw));
            }

            Expr::Star { table } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone())).push(Token::Dot);
                }
                ts.push(Token::Star);
            }

            Expr::Paren(inner) => {
                ts.lparen().append(&inner.to_tokens(dialect)).rparen();
            }

            Expr::WindowFunction {
                function,
                partition_by,
                order_by,
                frame,
            } => {
                ts.append(&function.to_tokens(dialect));
                ts.space().push(Token::Over).space().lparen();

                let mut need_space = false;
                if !partition_by.is_empty() {
                    ts.push(Token::PartitionBy).space();
                    ts.comma_separated(partition_by, |e| e.to_tokens(dialect));
                    need_space = true;
                }
                if !order_by.is_empty() {
                    if need_space {
                        ts.space();
                    }
                    ts.push(Token::OrderBy).space();
                    ts.comma_separated(order_by, |ob| {
                        let mut item = ob.expr.to_tokens(dialect);
                        item.space().push(match ob.dir {
                            SortDir::Asc => Token::Asc,
                            SortDir::Desc => Token::Desc,
                        });
                        item
                    });
                    need_space = true;
                }
                if let Some(frame) = frame {
                    if need_space {
                        ts.space();
                    }
                    ts.push(Token::Rows).space().push(Token::Keyword("BETWEEN")).space();
                    ts.push(Token::Unbounded).space().push(Token::Preceding);
                    ts.space().push(Token::And).space();
                    match frame {
                        WindowFrame::RowsToCurrent => ts.push(Token::CurrentRow),
                        WindowFrame::RowsEntirePartition => {
                            ts.push(Token::Unbounded).space().push(Token::Following)
                        }
                    };
                }
                ts.rparen();
            }

            Expr::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }

        ts
    }
}

/// Render one side of a binary operation, parenthesizing it when its own
/// operator binds looser than the parent (or equally, on the right).
fn append_operand(
    ts: &mut TokenStream,
    operand: &Expr,
    parent: BinaryOperator,
    right_side: bool,
    dialect: Dialect,
) {
    let needs_parens = match operand {
        Expr::BinaryOp { op, .. } => {
            let (child, outer) = (op.precedence(), parent.precedence());
            child < outer || (right_side && child == outer && !(*op == parent && parent.is_associative()))
        }
        _ => false,
    };
    if needs_parens {
        ts.lparen();
    }
    ts.append(&operand.to_tokens(dialect));
    if needs_parens {
        ts.rparen();
    }
}

// =============================================================================
// Expression Constructors
// =============================================================================

pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

/// Literal for a JSON scalar. Arrays and objects become their JSON text.
pub fn lit_json(value: &JsonValue) -> Expr {
    match value {
        JsonValue::Null => lit_null(),
        JsonValue::Bool(b) => lit_bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => lit_int(i),
            None => lit_float(n.as_f64().unwrap_or(0.0)),
        },
        JsonValue::String(s) => lit_str(s),
        other => lit_str(&other.to_string()),
    }
}

pub fn star() -> Expr {
    Expr::Star { table: None }
}

pub fn table_star(table: &str) -> Expr {
    Expr::Star {
        table: Some(table.into()),
    }
}

pub fn keyword(kw: &'static str) -> Expr {
    Expr::Keyword(kw)
}

pub fn raw_sql(sql: &str) -> Expr {
    Expr::Raw(sql.into())
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct: false,
    }
}

pub fn count(expr: Expr) -> Expr {
    func("COUNT", vec![expr])
}

pub fn count_star() -> Expr {
    func("COUNT", vec![star()])
}

pub fn count_distinct(expr: Expr) -> Expr {
    Expr::Function {
        name: "COUNT".into(),
        args: vec![expr],
        distinct: true,
    }
}

pub fn sum(expr: Expr) -> Expr {
    func("SUM", vec![expr])
}

pub fn avg(expr: Expr) -> Expr {
    func("AVG", vec![expr])
}

pub fn min(expr: Expr) -> Expr {
    func("MIN", vec![expr])
}

pub fn max(expr: Expr) -> Expr {
    func("MAX", vec![expr])
}

pub fn coalesce(args: Vec<Expr>) -> Expr {
    func("COALESCE", args)
}

pub fn row_number() -> Expr {
    func("ROW_NUMBER", vec![])
}

pub fn rank() -> Expr {
    func("RANK", vec![])
}

pub fn dense_rank() -> Expr {
    func("DENSE_RANK", vec![])
}

/// `CASE WHEN cond THEN then [ELSE otherwise] END`
pub fn case_when(cond: Expr, then: Expr, otherwise: Option<Expr>) -> Expr {
    Expr::Case {
        operand: None,
        when_clauses: vec![(cond, then)],
        else_clause: otherwise.map(Box::new),
    }
}

pub fn exists(query: Query) -> Expr {
    Expr::Exists {
        query: Box::new(query),
        negated: false,
    }
}

pub fn not_exists(query: Query) -> Expr {
    Expr::Exists {
        query: Box::new(query),
        negated: true,
    }
}

/// `left = right OR (left IS NULL AND right IS NULL)`
pub fn null_safe_eq(left: Expr, right: Expr) -> Expr {
    let both_null = left.clone().is_null().and(right.clone().is_null());
    Expr::Paren(Box::new(left.eq(right).or(both_null)))
}

// =============================================================================
// Expression Builder Trait
// =============================================================================

/// Fluent operators on expressions.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    fn binary(self, op: BinaryOperator, other: impl Into<Expr>) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Eq, other)
    }

    fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Ne, other)
    }

    fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gt, other)
    }

    fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gte, other)
    }

    fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lt, other)
    }

    fn lte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lte, other)
    }

    fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::And, other)
    }

    fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Or, other)
    }

    fn not(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(self.into_expr()),
        }
    }

    fn add(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Plus, other)
    }

    fn sub(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Minus, other)
    }

    fn mul(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Mul, other)
    }

    fn div(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Div, other)
    }

    fn modulo(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Mod, other)
    }

    fn concat(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Concat, other)
    }

    #[allow(clippy::wrong_self_convention)]
    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    #[allow(clippy::wrong_self_convention)]
    fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }

    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn not_in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: true,
        }
    }

    fn cast(self, type_name: &str) -> Expr {
        Expr::Cast {
            expr: Box::new(self.into_expr()),
            type_name: type_name.into(),
        }
    }

    fn alias(self, name: &str) -> SelectExpr {
        SelectExpr {
            expr: self.into_expr(),
            alias: Some(name.into()),
        }
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<f64> for Expr {
    fn from(f: f64) -> Self {
        lit_float(f)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        lit_bool(b)
    }
}
