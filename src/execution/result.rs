//! Execution Result - Typed outcome of running SQL against a database

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Scalar value returned by a query
///
/// Integers and reals form one numeric domain: `3` equals `3.0` and `-0.0`
/// equals `0.0`, so rows from `COUNT(*)` and `SUM(x) * 0.5` can land in the
/// same result set. NaN equals itself and sorts above every other number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Integer(_) | SqlValue::Real(_) => 1,
            SqlValue::Text(_) => 2,
            SqlValue::Blob(_) => 3,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// 2^63 as f64; every f64 in `[-I64_BOUND, I64_BOUND)` truncates into i64
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn cmp_real(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        // -0.0 == 0.0 under partial_cmp
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact integer/real comparison without rounding the integer
fn cmp_int_real(a: i64, b: f64) -> Ordering {
    if b.is_nan() || b >= I64_BOUND {
        return Ordering::Less;
    }
    if b < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = b.trunc();
    match a.cmp(&(whole as i64)) {
        Ordering::Equal => cmp_real(0.0, b - whole),
        other => other,
    }
}

/// Integer value of an integral real, when representable
fn integral(r: f64) -> Option<i64> {
    if r.is_finite() && r.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&r) {
        Some(r as i64)
    } else {
        None
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SqlValue {}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
            (SqlValue::Integer(a), SqlValue::Integer(b)) => a.cmp(b),
            (SqlValue::Real(a), SqlValue::Real(b)) => cmp_real(*a, *b),
            (SqlValue::Integer(a), SqlValue::Real(b)) => cmp_int_real(*a, *b),
            (SqlValue::Real(a), SqlValue::Integer(b)) => cmp_int_real(*b, *a).reverse(),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Blob(a), SqlValue::Blob(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Integer(i) => i.hash(state),
            SqlValue::Real(r) => match integral(*r) {
                Some(i) => i.hash(state),
                None if r.is_nan() => u64::MAX.hash(state),
                None => r.to_bits().hash(state),
            },
            SqlValue::Text(s) => s.hash(state),
            SqlValue::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

pub type Row = Vec<SqlValue>;

/// Order-insensitive set of rows; duplicate rows collapse
pub type RowSet = BTreeSet<Row>;

/// Outcome of executing one SQL string: rows or an error, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { rows: Vec<Row> },
    Failure { error_message: String },
}

impl ExecutionResult {
    pub fn success(rows: Vec<Row>) -> Self {
        ExecutionResult::Success { rows }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            error_message: error_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            ExecutionResult::Success { rows } => Some(rows),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { error_message } => Some(error_message),
        }
    }

    /// Rows as an order-insensitive set, for successful results
    pub fn row_set(&self) -> Option<RowSet> {
        self.rows().map(|rows| rows.iter().cloned().collect())
    }
}

/// Which successful results count as valid answers during selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityPredicate {
    /// At least one row with at least one non-NULL value
    NonEmpty,
    /// Every successful result is valid
    AcceptAll,
}

impl ValidityPredicate {
    pub fn is_valid(&self, result: &ExecutionResult) -> bool {
        let rows = match result.rows() {
            Some(rows) => rows,
            None => return false,
        };
        match self {
            ValidityPredicate::AcceptAll => true,
            ValidityPredicate::NonEmpty => rows
                .iter()
                .any(|row| row.iter().any(|value| !value.is_null())),
        }
    }
}

/// Size-bounded textual preview of a result for model context
pub fn format_execution_result(
    result: &ExecutionResult,
    row_limit: usize,
    val_length_limit: usize,
) -> String {
    match result {
        ExecutionResult::Failure { error_message } => format!("Error: {}", error_message),
        ExecutionResult::Success { rows } => {
            if rows.is_empty() {
                return "(empty result)".to_string();
            }
            let mut lines: Vec<String> = rows
                .iter()
                .take(row_limit)
                .map(|row| {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|value| truncate(&value.to_string(), val_length_limit))
                        .collect();
                    format!("({})", cells.join(", "))
                })
                .collect();
            if rows.len() > row_limit {
                lines.push(format!("... ({} rows in total)", rows.len()));
            }
            lines.join("\n")
        }
    }
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        value.to_string()
    } else {
        let head: String = value.chars().take(limit).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_ignores_order_and_duplicates() {
        let a = ExecutionResult::success(vec![
            vec![SqlValue::Integer(1)],
            vec![SqlValue::Integer(2)],
            vec![SqlValue::Integer(1)],
        ]);
        let b = ExecutionResult::success(vec![vec![SqlValue::Integer(2)], vec![SqlValue::Integer(1)]]);
        assert_eq!(a.row_set(), b.row_set());
    }

    fn hash_of(value: &SqlValue) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_integer_and_real_compare_numerically() {
        assert_eq!(SqlValue::Integer(3), SqlValue::Real(3.0));
        assert_eq!(hash_of(&SqlValue::Integer(3)), hash_of(&SqlValue::Real(3.0)));
        assert_eq!(SqlValue::Real(-0.0), SqlValue::Real(0.0));
        assert_eq!(SqlValue::Integer(0), SqlValue::Real(-0.0));
        assert_eq!(hash_of(&SqlValue::Real(-0.0)), hash_of(&SqlValue::Integer(0)));

        assert!(SqlValue::Integer(1) < SqlValue::Real(1.5));
        assert!(SqlValue::Real(1.5) < SqlValue::Integer(2));
        assert!(SqlValue::Integer(-2) < SqlValue::Real(-1.5));
        assert!(SqlValue::Integer(i64::MAX) < SqlValue::Real(1e19));
        assert!(SqlValue::Real(f64::NAN) > SqlValue::Integer(i64::MAX));
        assert_eq!(SqlValue::Real(f64::NAN), SqlValue::Real(f64::NAN));
        assert!(SqlValue::Real(1e300) < SqlValue::Text("a".into()));
    }

    #[test]
    fn test_row_sets_merge_integral_reals() {
        let counted = ExecutionResult::success(vec![vec![SqlValue::Integer(3)]]);
        let halved = ExecutionResult::success(vec![vec![SqlValue::Real(3.0)]]);
        let fraction = ExecutionResult::success(vec![vec![SqlValue::Real(3.5)]]);
        assert_eq!(counted.row_set(), halved.row_set());
        assert_ne!(counted.row_set(), fraction.row_set());
    }

    #[test]
    fn test_validity_predicates() {
        let empty = ExecutionResult::success(vec![]);
        let nulls = ExecutionResult::success(vec![vec![SqlValue::Null]]);
        let value = ExecutionResult::success(vec![vec![SqlValue::Text("x".into())]]);
        let failed = ExecutionResult::failure("no such table");

        assert!(!ValidityPredicate::NonEmpty.is_valid(&empty));
        assert!(!ValidityPredicate::NonEmpty.is_valid(&nulls));
        assert!(ValidityPredicate::NonEmpty.is_valid(&value));
        assert!(ValidityPredicate::AcceptAll.is_valid(&empty));
        assert!(!ValidityPredicate::AcceptAll.is_valid(&failed));
    }

    #[test]
    fn test_format_preview_is_bounded() {
        let result = ExecutionResult::success(vec![
            vec![SqlValue::Text("a".repeat(80)), SqlValue::Integer(1)],
            vec![SqlValue::Text("b".into()), SqlValue::Null],
            vec![SqlValue::Text("c".into()), SqlValue::Integer(3)],
        ]);
        let preview = format_execution_result(&result, 2, 50);
        let lines: Vec<&str> = preview.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(&format!("{}...", "a".repeat(50))));
        assert_eq!(lines[1], "(b, NULL)");
        assert_eq!(lines[2], "... (3 rows in total)");
    }
}
