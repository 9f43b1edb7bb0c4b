//! Predicate and assignment expressions.
//!
//! [`Expr`] is the small expression tree the engine evaluates itself: WHERE
//! predicates of UPDATE and DELETE, SET assignments, and MERGE conditions.
//! It is evaluated two ways:
//!
//! - against rows, with SQL three-valued logic ([`Expr::eval`]), to decide
//!   which rows change;
//! - against file statistics ([`pruning`]), conservatively, to decide which
//!   files may contain such rows at all.
//!
//! Expressions serialize as externally-tagged JSON, which is also the form
//! the CLI accepts:
//!
//! ```json
//! {"and": [{"is_null": {"column": "salary"}}, {"gt": [{"column": "id"}, {"literal": 2}]}]}
//! ```
pub mod pruning;

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::value::{Row, Value};

/// An expression over a target row and, in MERGE, a source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A column of the target table.
    Column(String),
    /// A column of the MERGE source.
    Source(String),
    /// A constant.
    Literal(Value),
    /// `a = b`
    Eq(Box<Expr>, Box<Expr>),
    /// `a <> b`
    NotEq(Box<Expr>, Box<Expr>),
    /// `a < b`
    Lt(Box<Expr>, Box<Expr>),
    /// `a <= b`
    LtEq(Box<Expr>, Box<Expr>),
    /// `a > b`
    Gt(Box<Expr>, Box<Expr>),
    /// `a >= b`
    GtEq(Box<Expr>, Box<Expr>),
    /// `a AND b`
    And(Box<Expr>, Box<Expr>),
    /// `a OR b`
    Or(Box<Expr>, Box<Expr>),
    /// `NOT a`
    Not(Box<Expr>),
    /// `a IS NULL`
    IsNull(Box<Expr>),
    /// `a IS NOT NULL`
    IsNotNull(Box<Expr>),
    /// `a + b`
    Add(Box<Expr>, Box<Expr>),
    /// `a - b`
    Sub(Box<Expr>, Box<Expr>),
    /// `a * b`
    Mul(Box<Expr>, Box<Expr>),
    /// `a LIKE 'pattern'` with `%` and `_` wildcards.
    Like(Box<Expr>, String),
}

/// Target column reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Source column reference (MERGE only).
pub fn src(name: impl Into<String>) -> Expr {
    Expr::Source(name.into())
}

/// Literal value.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Errors raised while evaluating an expression.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExprError {
    /// A column reference has no row to read from.
    #[snafu(display("{side} column {column} is not available in this context"))]
    UnboundColumn {
        /// `target` or `source`.
        side: &'static str,
        /// Referenced column.
        column: String,
    },

    /// Operands of incompatible types.
    #[snafu(display("Cannot apply {op} to {left} and {right}"))]
    TypeMismatch {
        /// Operator.
        op: &'static str,
        /// Left operand type.
        left: &'static str,
        /// Right operand type.
        right: &'static str,
    },

    /// A predicate evaluated to something other than a boolean or NULL.
    #[snafu(display("Predicate evaluated to non-boolean value {value}"))]
    NotBoolean {
        /// The offending value.
        value: Value,
    },

    /// Integer arithmetic overflowed.
    #[snafu(display("Integer overflow in {op}"))]
    Overflow {
        /// Operator.
        op: &'static str,
    },
}

/// Rows an expression is evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Target row (UPDATE, DELETE, MERGE matched clauses).
    pub target: Option<&'a Row>,
    /// Source row (MERGE).
    pub source: Option<&'a Row>,
}

impl<'a> EvalContext<'a> {
    /// Context with only a target row.
    pub fn target(row: &'a Row) -> Self {
        Self {
            target: Some(row),
            source: None,
        }
    }

    /// Context with only a source row (MERGE not-matched clauses).
    pub fn source(row: &'a Row) -> Self {
        Self {
            target: None,
            source: Some(row),
        }
    }

    /// Context with both rows (MERGE matched clauses).
    pub fn joined(target: &'a Row, source: &'a Row) -> Self {
        Self {
            target: Some(target),
            source: Some(source),
        }
    }
}

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "<>",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }

    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Eq => ord == Equal,
            CmpOp::NotEq => ord != Equal,
            CmpOp::Lt => ord == Less,
            CmpOp::LtEq => ord != Greater,
            CmpOp::Gt => ord == Greater,
            CmpOp::GtEq => ord != Less,
        }
    }
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
        }
    }
}

impl Expr {
    /// `self AND other`
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// `self = other`
    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, other: Expr) -> Expr {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    /// `self <> other`
    pub fn not_eq(self, other: Expr) -> Expr {
        Expr::NotEq(Box::new(self), Box::new(other))
    }

    /// `self < other`
    pub fn lt(self, other: Expr) -> Expr {
        Expr::Lt(Box::new(self), Box::new(other))
    }

    /// `self <= other`
    pub fn lt_eq(self, other: Expr) -> Expr {
        Expr::LtEq(Box::new(self), Box::new(other))
    }

    /// `self > other`
    pub fn gt(self, other: Expr) -> Expr {
        Expr::Gt(Box::new(self), Box::new(other))
    }

    /// `self >= other`
    pub fn gt_eq(self, other: Expr) -> Expr {
        Expr::GtEq(Box::new(self), Box::new(other))
    }

    /// `self + other`
    #[allow(clippy::should_implement_trait)]
    pub fn add(self, other: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(other))
    }

    /// `self - other`
    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, other: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    /// `self * other`
    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, other: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    /// `NOT self`
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like(Box::new(self), pattern.into())
    }

    /// Evaluate to a value.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Column(name) => {
                let row = ctx.target.context(UnboundColumnSnafu {
                    side: "target",
                    column: name.clone(),
                })?;
                Ok(row.get(name).clone())
            }
            Expr::Source(name) => {
                let row = ctx.source.context(UnboundColumnSnafu {
                    side: "source",
                    column: name.clone(),
                })?;
                Ok(row.get(name).clone())
            }
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Eq(a, b) => compare(CmpOp::Eq, a, b, ctx),
            Expr::NotEq(a, b) => compare(CmpOp::NotEq, a, b, ctx),
            Expr::Lt(a, b) => compare(CmpOp::Lt, a, b, ctx),
            Expr::LtEq(a, b) => compare(CmpOp::LtEq, a, b, ctx),
            Expr::Gt(a, b) => compare(CmpOp::Gt, a, b, ctx),
            Expr::GtEq(a, b) => compare(CmpOp::GtEq, a, b, ctx),
            Expr::And(a, b) => {
                let l = truth(a.eval(ctx)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(b.eval(ctx)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }
            Expr::Or(a, b) => {
                let l = truth(a.eval(ctx)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = truth(b.eval(ctx)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            Expr::Not(a) => Ok(truth(a.eval(ctx)?)?.map_or(Value::Null, |b| Value::Bool(!b))),
            Expr::IsNull(a) => Ok(Value::Bool(a.eval(ctx)?.is_null())),
            Expr::IsNotNull(a) => Ok(Value::Bool(!a.eval(ctx)?.is_null())),
            Expr::Add(a, b) => arith(ArithOp::Add, a, b, ctx),
            Expr::Sub(a, b) => arith(ArithOp::Sub, a, b, ctx),
            Expr::Mul(a, b) => arith(ArithOp::Mul, a, b, ctx),
            Expr::Like(a, pattern) => match a.eval(ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Utf8(s) => Ok(Value::Bool(like_match(&s, pattern))),
                other => TypeMismatchSnafu {
                    op: "LIKE",
                    left: other.type_name(),
                    right: "utf8",
                }
                .fail(),
            },
        }
    }

    /// Evaluate as a filter: only TRUE passes, NULL counts as false.
    pub fn eval_predicate(&self, ctx: &EvalContext<'_>) -> Result<bool, ExprError> {
        Ok(truth(self.eval(ctx)?)?.unwrap_or(false))
    }

    /// Target columns referenced anywhere in the expression.
    pub fn target_columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Column(c) = e {
                out.insert(c.as_str());
            }
        });
        out
    }

    /// Source columns referenced anywhere in the expression.
    pub fn source_columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Source(c) = e {
                out.insert(c.as_str());
            }
        });
        out
    }

    /// Split a conjunction into its top-level terms.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(a, b) => {
                let mut out = a.conjuncts();
                out.extend(b.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Source(_) | Expr::Literal(_) => {}
            Expr::Not(a) | Expr::IsNull(a) | Expr::IsNotNull(a) | Expr::Like(a, _) => a.visit(f),
            Expr::Eq(a, b)
            | Expr::NotEq(a, b)
            | Expr::Lt(a, b)
            | Expr::LtEq(a, b)
            | Expr::Gt(a, b)
            | Expr::GtEq(a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b) => {
                a.visit(f);
                b.visit(f);
            }
        }
    }
}

fn truth(v: Value) -> Result<Option<bool>, ExprError> {
    match v {
        Value::Bool(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        value => NotBooleanSnafu { value }.fail(),
    }
}

fn compare(op: CmpOp, a: &Expr, b: &Expr, ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
    let l = a.eval(ctx)?;
    let r = b.eval(ctx)?;
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let ord = l.compare(&r).context(TypeMismatchSnafu {
        op: op.symbol(),
        left: l.type_name(),
        right: r.type_name(),
    })?;
    Ok(Value::Bool(op.holds(ord)))
}

fn arith(op: ArithOp, a: &Expr, b: &Expr, ctx: &EvalContext<'_>) -> Result<Value, ExprError> {
    let l = a.eval(ctx)?;
    let r = b.eval(ctx)?;
    match (&l, &r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => {
            let out = match op {
                ArithOp::Add => x.checked_add(*y),
                ArithOp::Sub => x.checked_sub(*y),
                ArithOp::Mul => x.checked_mul(*y),
            };
            out.map(Value::Int)
                .context(OverflowSnafu { op: op.symbol() })
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (x, y) = (as_f64(&l), as_f64(&r));
            Ok(Value::Float(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
            }))
        }
        _ => TypeMismatchSnafu {
            op: op.symbol(),
            left: l.type_name(),
            right: r.type_name(),
        }
        .fail(),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

/// SQL LIKE with `%` (any run) and `_` (any single char).
pub(crate) fn like_match(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    // Greedy matcher with backtracking to the last `%`.
    let (mut si, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == s[si]) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((sp, ss)) = star {
            pi = sp + 1;
            si = ss + 1;
            star = Some((sp, ss + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '%')
}

/// Literal prefix of a LIKE pattern, up to the first wildcard.
pub(crate) fn like_prefix(pattern: &str) -> &str {
    let end = pattern.find(['%', '_']).unwrap_or(pattern.len());
    &pattern[..end]
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Source(c) => write!(f, "source.{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Eq(a, b) => write!(f, "({a} = {b})"),
            Expr::NotEq(a, b) => write!(f, "({a} <> {b})"),
            Expr::Lt(a, b) => write!(f, "({a} < {b})"),
            Expr::LtEq(a, b) => write!(f, "({a} <= {b})"),
            Expr::Gt(a, b) => write!(f, "({a} > {b})"),
            Expr::GtEq(a, b) => write!(f, "({a} >= {b})"),
            Expr::And(a, b) => write!(f, "({a} AND {b})"),
            Expr::Or(a, b) => write!(f, "({a} OR {b})"),
            Expr::Not(a) => write!(f, "(NOT {a})"),
            Expr::IsNull(a) => write!(f, "({a} IS NULL)"),
            Expr::IsNotNull(a) => write!(f, "({a} IS NOT NULL)"),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Mul(a, b) => write!(f, "({a} * {b})"),
            Expr::Like(a, p) => write!(f, "({a} LIKE '{p}')"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn comparisons_with_null_are_unknown() -> Result<(), ExprError> {
        let r = row(&[("salary", Value::Null), ("id", Value::from(3))]);
        let ctx = EvalContext::target(&r);

        assert_eq!(col("salary").gt(lit(1)).eval(&ctx)?, Value::Null);
        assert!(!col("salary").gt(lit(1)).eval_predicate(&ctx)?);
        assert!(col("salary").is_null().eval_predicate(&ctx)?);
        assert!(col("id").gt_eq(lit(3.0)).eval_predicate(&ctx)?);
        Ok(())
    }

    #[test]
    fn three_valued_and_or_not() -> Result<(), ExprError> {
        let r = row(&[("x", Value::Null)]);
        let ctx = EvalContext::target(&r);
        let unknown = col("x").eq(lit(1));

        assert_eq!(unknown.clone().and(lit(false)).eval(&ctx)?, Value::Bool(false));
        assert_eq!(unknown.clone().and(lit(true)).eval(&ctx)?, Value::Null);
        assert_eq!(unknown.clone().or(lit(true)).eval(&ctx)?, Value::Bool(true));
        assert_eq!(unknown.clone().or(lit(false)).eval(&ctx)?, Value::Null);
        assert_eq!(unknown.not().eval(&ctx)?, Value::Null);
        Ok(())
    }

    #[test]
    fn arithmetic_widens_and_detects_overflow() -> Result<(), ExprError> {
        let r = row(&[("salary", Value::from(10)), ("bonus", Value::from(0.5))]);
        let ctx = EvalContext::target(&r);

        assert_eq!(col("salary").add(lit(1)).eval(&ctx)?, Value::Int(11));
        assert_eq!(col("salary").mul(col("bonus")).eval(&ctx)?, Value::Float(5.0));
        assert!(matches!(
            lit(i64::MAX).add(lit(1)).eval(&ctx),
            Err(ExprError::Overflow { .. })
        ));
        assert!(matches!(
            col("salary").add(lit("x")).eval(&ctx),
            Err(ExprError::TypeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn like_supports_wildcards() {
        assert!(like_match("Teresa", "T%"));
        assert!(like_match("Tom", "T_m"));
        assert!(like_match("abcabc", "%b%c"));
        assert!(!like_match("Sam", "T%"));
        assert!(!like_match("Tim", "T_"));
        assert_eq!(like_prefix("Te%a_"), "Te");
        assert_eq!(like_prefix("%x"), "");
    }

    #[test]
    fn source_columns_need_a_source_row() {
        let t = row(&[("id", Value::from(1))]);
        let err = src("id").eq(col("id")).eval(&EvalContext::target(&t));
        assert!(matches!(err, Err(ExprError::UnboundColumn { side: "source", .. })));

        let s = row(&[("id", Value::from(1))]);
        let joined = EvalContext::joined(&t, &s);
        assert!(matches!(src("id").eq(col("id")).eval_predicate(&joined), Ok(true)));
    }

    #[test]
    fn predicates_must_be_boolean() {
        let r = row(&[("id", Value::from(1))]);
        assert!(matches!(
            col("id").eval_predicate(&EvalContext::target(&r)),
            Err(ExprError::NotBoolean { .. })
        ));
    }

    #[test]
    fn json_form_is_externally_tagged() -> Result<(), serde_json::Error> {
        let e = col("middleName").like("T%").and(col("salary").is_not_null());
        let json = serde_json::to_string(&e)?;
        assert_eq!(
            json,
            r#"{"and":[{"like":[{"column":"middleName"},"T%"]},{"is_not_null":{"column":"salary"}}]}"#
        );
        let back: Expr = serde_json::from_str(&json)?;
        assert_eq!(back, e);
        assert_eq!(
            e.to_string(),
            "((middleName LIKE 'T%') AND (salary IS NOT NULL))"
        );
        Ok(())
    }

    #[test]
    fn column_sets_and_conjuncts() {
        let e = col("a").eq(src("k")).and(col("b").is_null()).and(lit(true));
        assert_eq!(e.target_columns().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(e.source_columns().into_iter().collect::<Vec<_>>(), vec!["k"]);
        assert_eq!(e.conjuncts().len(), 3);
    }
}
