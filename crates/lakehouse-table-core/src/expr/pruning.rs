//! Stats-based file pruning.
//!
//! [`may_match`] answers "could any row of this file satisfy the predicate?"
//! from the file's min/max/null-count statistics. The answer is conservative:
//! `false` only when the statistics prove no row can match, `true` whenever
//! they are missing or the expression is outside what we can reason about
//! (arithmetic, column-to-column comparisons, source references).

use std::cmp::Ordering;

use crate::{
    expr::{Expr, like_prefix},
    metadata::FileStats,
    value::Value,
};

/// True unless `stats` prove that no row makes `predicate` TRUE.
pub fn may_match(predicate: &Expr, stats: &FileStats) -> bool {
    if stats.num_records == 0 {
        return false;
    }
    could_be(predicate, stats, true)
}

/// Could `expr` evaluate to `want` for some row?
fn could_be(expr: &Expr, stats: &FileStats, want: bool) -> bool {
    match expr {
        Expr::Literal(Value::Bool(b)) => *b == want,
        Expr::Literal(Value::Null) => false,
        Expr::And(a, b) => {
            if want {
                could_be(a, stats, true) && could_be(b, stats, true)
            } else {
                could_be(a, stats, false) || could_be(b, stats, false)
            }
        }
        Expr::Or(a, b) => {
            if want {
                could_be(a, stats, true) || could_be(b, stats, true)
            } else {
                could_be(a, stats, false) && could_be(b, stats, false)
            }
        }
        Expr::Not(a) => could_be(a, stats, !want),
        Expr::IsNull(a) => null_check(a, stats, want),
        Expr::IsNotNull(a) => null_check(a, stats, !want),
        Expr::Eq(a, b) => cmp_check(Cmp::Eq, a, b, stats, want),
        Expr::NotEq(a, b) => cmp_check(Cmp::NotEq, a, b, stats, want),
        Expr::Lt(a, b) => cmp_check(Cmp::Lt, a, b, stats, want),
        Expr::LtEq(a, b) => cmp_check(Cmp::LtEq, a, b, stats, want),
        Expr::Gt(a, b) => cmp_check(Cmp::Gt, a, b, stats, want),
        Expr::GtEq(a, b) => cmp_check(Cmp::GtEq, a, b, stats, want),
        Expr::Like(a, pattern) => like_check(a, pattern, stats, want),
        _ => true,
    }
}

/// `IS NULL` on a column: `want` is whether the result should be TRUE.
fn null_check(expr: &Expr, stats: &FileStats, want_null: bool) -> bool {
    let Expr::Column(c) = expr else {
        return true;
    };
    match stats.nulls(c) {
        None => true,
        Some(nulls) if want_null => nulls > 0,
        Some(nulls) => nulls < stats.num_records,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Cmp {
    /// `lit OP col` is `col FLIP(OP) lit`.
    fn flip(self) -> Self {
        match self {
            Cmp::Eq => Cmp::Eq,
            Cmp::NotEq => Cmp::NotEq,
            Cmp::Lt => Cmp::Gt,
            Cmp::LtEq => Cmp::GtEq,
            Cmp::Gt => Cmp::Lt,
            Cmp::GtEq => Cmp::LtEq,
        }
    }

    /// The operator whose TRUE set is this operator's FALSE set.
    fn negate(self) -> Self {
        match self {
            Cmp::Eq => Cmp::NotEq,
            Cmp::NotEq => Cmp::Eq,
            Cmp::Lt => Cmp::GtEq,
            Cmp::LtEq => Cmp::Gt,
            Cmp::Gt => Cmp::LtEq,
            Cmp::GtEq => Cmp::Lt,
        }
    }
}

fn cmp_check(op: Cmp, a: &Expr, b: &Expr, stats: &FileStats, want: bool) -> bool {
    let (column, literal, op) = match (a, b) {
        (Expr::Column(c), Expr::Literal(v)) => (c, v, op),
        (Expr::Literal(v), Expr::Column(c)) => (c, v, op.flip()),
        _ => return true,
    };

    // NULL compares to UNKNOWN, which is neither TRUE nor FALSE.
    if literal.is_null() || stats.all_null(column) {
        return false;
    }

    let (Some(min), Some(max)) = (stats.min(column), stats.max(column)) else {
        return true;
    };

    let op = if want { op } else { op.negate() };
    range_admits(op, min, max, literal)
}

/// Could some value in `[min, max]` satisfy `value OP literal`?
fn range_admits(op: Cmp, min: &Value, max: &Value, literal: &Value) -> bool {
    let (Some(lo), Some(hi)) = (min.compare(literal), max.compare(literal)) else {
        // Incomparable types: let row evaluation report it.
        return true;
    };
    match op {
        Cmp::Eq => lo != Ordering::Greater && hi != Ordering::Less,
        Cmp::NotEq => !(lo == Ordering::Equal && hi == Ordering::Equal),
        Cmp::Lt => lo == Ordering::Less,
        Cmp::LtEq => lo != Ordering::Greater,
        Cmp::Gt => hi == Ordering::Greater,
        Cmp::GtEq => hi != Ordering::Less,
    }
}

fn like_check(expr: &Expr, pattern: &str, stats: &FileStats, want: bool) -> bool {
    let Expr::Column(c) = expr else {
        return true;
    };
    if stats.all_null(c) {
        return false;
    }
    if !want {
        return true;
    }
    let prefix = like_prefix(pattern);
    if prefix.is_empty() {
        return true;
    }
    match (stats.min(c), stats.max(c)) {
        (Some(Value::Utf8(min)), Some(Value::Utf8(max))) => {
            // Every match starts with `prefix`, so it sorts at or after
            // `prefix` and before any string that is larger than `prefix`
            // without starting with it.
            let below = max.as_str() < prefix;
            let above = min.as_str() > prefix && !min.starts_with(prefix);
            !(below || above)
        }
        _ => true,
    }
}
