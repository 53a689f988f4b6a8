//! SQLite Execution Oracle
//!
//! Runs candidate SQL against benchmark SQLite databases. Every failure mode
//! (missing file, compile error, runtime error, timeout) is reported as an
//! `ExecutionResult::Failure` value rather than an error.

use crate::execution::result::{ExecutionResult, Row, SqlValue};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Executes SQL against a database identified by its file path
pub trait SqlOracle: Send + Sync {
    fn execute(&self, db_path: &Path, sql: &str, timeout: Duration) -> ExecutionResult;
}

impl<T: SqlOracle + ?Sized> SqlOracle for Arc<T> {
    fn execute(&self, db_path: &Path, sql: &str, timeout: Duration) -> ExecutionResult {
        (**self).execute(db_path, sql, timeout)
    }
}

/// Run `oracle.execute` on tokio's blocking pool
///
/// Async callers use this so a slow query does not stall the runtime worker
/// driving other paths. A panicked worker is reported as a failed execution.
pub async fn execute_blocking<O: SqlOracle + ?Sized + 'static>(
    oracle: Arc<O>,
    db_path: &Path,
    sql: &str,
    timeout: Duration,
) -> ExecutionResult {
    let db_path = db_path.to_path_buf();
    let sql = sql.to_string();
    tokio::task::spawn_blocking(move || oracle.execute(&db_path, &sql, timeout))
        .await
        .unwrap_or_else(|e| ExecutionResult::failure(format!("SQL worker failed: {}", e)))
}

/// Uncached oracle backed by rusqlite
#[derive(Debug, Clone, Default)]
pub struct SqliteOracle;

impl SqliteOracle {
    /// SQLite VM instructions between timeout checks
    const PROGRESS_INTERVAL: i32 = 1_000;

    pub fn new() -> Self {
        Self
    }
}

impl SqlOracle for SqliteOracle {
    fn execute(&self, db_path: &Path, sql: &str, timeout: Duration) -> ExecutionResult {
        if !db_path.exists() {
            return ExecutionResult::failure(format!("Database not found: {}", db_path.display()));
        }

        let conn = match Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ) {
            Ok(conn) => conn,
            Err(e) => return ExecutionResult::failure(format!("Failed to open database: {}", e)),
        };

        let deadline = Instant::now() + timeout;
        conn.progress_handler(Self::PROGRESS_INTERVAL, Some(move || Instant::now() > deadline));

        match run_query(&conn, sql) {
            Ok(rows) => ExecutionResult::success(rows),
            Err(e) if is_interrupted(&e) => {
                debug!("SQL timed out after {:?}: {}", timeout, sql);
                ExecutionResult::failure(format!("Query timed out after {}s", timeout.as_secs()))
            }
            Err(e) => ExecutionResult::failure(e.to_string()),
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(to_sql_value(row.get_ref(idx)?));
        }
        collected.push(values);
    }
    Ok(collected)
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn is_interrupted(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

type CacheKey = (PathBuf, String);

/// Memoising oracle keyed by `(db_path, sql)`
///
/// The cache is process-local; a clone shares the same cache.
#[derive(Clone)]
pub struct CachedOracle<O> {
    inner: O,
    cache: Arc<Mutex<HashMap<CacheKey, ExecutionResult>>>,
}

impl<O: SqlOracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// Number of cached `(db_path, sql)` entries
    pub fn len(&self) -> usize {
        if let Ok(cache) = self.cache.lock() {
            cache.len()
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: SqlOracle> SqlOracle for CachedOracle<O> {
    fn execute(&self, db_path: &Path, sql: &str, timeout: Duration) -> ExecutionResult {
        let key = (db_path.to_path_buf(), sql.to_string());
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }

        // Executed outside the lock
        let result = self.inner.execute(db_path, sql, timeout);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        result
    }
}

/// Estimates how long a query takes to run
pub trait LatencyMeter: Send + Sync {
    fn measure(&self, db_path: &Path, sql: &str, repeat: usize) -> Duration;
}

/// Times repeated executions on an uncached oracle and reports the median
pub struct OracleLatencyMeter<O> {
    oracle: O,
    timeout: Duration,
}

impl<O: SqlOracle> OracleLatencyMeter<O> {
    pub fn new(oracle: O, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }
}

impl<O: SqlOracle> LatencyMeter for OracleLatencyMeter<O> {
    fn measure(&self, db_path: &Path, sql: &str, repeat: usize) -> Duration {
        let mut samples: Vec<Duration> = (0..repeat.max(1))
            .map(|_| {
                let start = Instant::now();
                let _ = self.oracle.execute(db_path, sql, self.timeout);
                start.elapsed()
            })
            .collect();
        samples.sort();
        samples[samples.len() / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture_db(dir: &Path) -> PathBuf {
        let path = dir.join("shop.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER, name TEXT, price REAL, data BLOB);
             INSERT INTO items VALUES (1, 'pen', 1.5, NULL);
             INSERT INTO items VALUES (2, 'ink', 3.0, x'00ff');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_sqlite_success_maps_types() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path());
        let result = SqliteOracle::new().execute(
            &db,
            "SELECT id, name, price, data FROM items ORDER BY id",
            Duration::from_secs(5),
        );

        let rows = result.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], SqlValue::Integer(1));
        assert_eq!(rows[0][1], SqlValue::Text("pen".to_string()));
        assert_eq!(rows[0][2], SqlValue::Real(1.5));
        assert_eq!(rows[0][3], SqlValue::Null);
        assert_eq!(rows[1][3], SqlValue::Blob(vec![0x00, 0xff]));
    }

    #[test]
    fn test_sqlite_compile_error_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path());
        let result = SqliteOracle::new().execute(&db, "SELECT nope FROM items", Duration::from_secs(5));
        assert!(result.error_message().unwrap().contains("no such column"));
    }

    #[test]
    fn test_missing_database_is_failure() {
        let result = SqliteOracle::new().execute(
            Path::new("/definitely/not/here.sqlite"),
            "SELECT 1",
            Duration::from_secs(1),
        );
        assert!(!result.is_success());
    }

    #[test]
    fn test_timeout_interrupts_long_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = fixture_db(dir.path());
        let sql = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";
        let result = SqliteOracle::new().execute(&db, sql, Duration::from_millis(50));
        assert!(result.error_message().unwrap().contains("timed out"));
    }

    struct CountingOracle {
        calls: AtomicUsize,
    }

    impl SqlOracle for CountingOracle {
        fn execute(&self, _db_path: &Path, _sql: &str, _timeout: Duration) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecutionResult::success(vec![vec![SqlValue::Integer(1)]])
        }
    }

    #[test]
    fn test_cached_oracle_memoises_by_path_and_sql() {
        let inner = Arc::new(CountingOracle {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedOracle::new(Arc::clone(&inner));
        let timeout = Duration::from_secs(1);

        cached.execute(Path::new("a.sqlite"), "SELECT 1", timeout);
        cached.execute(Path::new("a.sqlite"), "SELECT 1", timeout);
        cached.execute(Path::new("b.sqlite"), "SELECT 1", timeout);

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_latency_meter_runs_repeat_times() {
        let inner = Arc::new(CountingOracle {
            calls: AtomicUsize::new(0),
        });
        let meter = OracleLatencyMeter::new(Arc::clone(&inner), Duration::from_secs(1));
        meter.measure(Path::new("a.sqlite"), "SELECT 1", 20);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 20);
    }
}
