//! SQLite Execution Backend
//!
//! Each tier gets its own connection, opened on first use and configured from
//! the variant's resource settings:
//! - `PRAGMA threads` caps SQLite's auxiliary worker threads
//! - `PRAGMA cache_size` bounds the page cache to the tier's memory limit
//!
//! rusqlite is synchronous, so every call runs under `spawn_blocking`. Runs
//! on one tier serialize on its connection mutex; tiers run independently.

use crate::compiler::{ExecutionStrategy, ExecutionVariant, StrategyTable};
use crate::error::{CarbonQueryError, Result};
use crate::execution::backend::{ExecutionBackend, ExecutionHandle, QueryRows};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    // per-query thread cap the compiler prepends to EFFICIENT variants
    static ref THREADS_PREFIX_RE: Regex = Regex::new(r"(?i)^\s*PRAGMA\s+threads\s*=\s*\d+\s*;").unwrap();
}

pub struct SqliteBackend {
    /// File path or SQLite URI
    location: String,

    /// Run once, on the first handle opened
    init_sql: Option<String>,

    handles: StrategyTable<OnceCell<Arc<SqliteHandle>>>,
    initialized: OnceCell<()>,
}

impl SqliteBackend {
    pub fn open(path: impl Into<String>) -> Self {
        Self {
            location: path.into(),
            init_sql: None,
            handles: StrategyTable::from_fn(|_| OnceCell::new()),
            initialized: OnceCell::new(),
        }
    }

    /// Private in-memory database shared by all three tiers
    pub fn in_memory() -> Self {
        Self::open(format!(
            "file:carbon_query_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// SQL batch (schema, seed data) run before the first query
    pub fn with_init_sql(mut self, sql: impl Into<String>) -> Self {
        self.init_sql = Some(sql.into());
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the tier's connection has been opened yet
    pub fn is_open(&self, strategy: ExecutionStrategy) -> bool {
        self.handles[strategy].initialized()
    }

    async fn open_handle(&self, variant: &ExecutionVariant) -> Result<Arc<SqliteHandle>> {
        let location = self.location.clone();
        let strategy = variant.strategy;
        let threads = variant.resource_config.threads;
        let cache_kib = variant.resource_config.memory_limit_mb.saturating_mul(1024);

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&location).map_err(|e| {
                CarbonQueryError::Execution(format!("Failed to open SQLite database {}: {}", location, e))
            })?;
            conn.busy_timeout(BUSY_TIMEOUT).map_err(sql_error)?;
            conn.execute_batch(&format!(
                "PRAGMA threads = {};\nPRAGMA cache_size = -{};",
                threads, cache_kib
            ))
            .map_err(sql_error)?;
            Ok(conn)
        })
        .await
        .map_err(|e| CarbonQueryError::Execution(format!("SQLite worker failed: {}", e)))??;

        info!(
            "Opened {} tier connection to {} (threads={}, cache={} KiB)",
            strategy, self.location, threads, cache_kib
        );

        Ok(Arc::new(SqliteHandle {
            strategy,
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

#[async_trait]
impl ExecutionBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get_handle(&self, variant: &ExecutionVariant) -> Result<Arc<dyn ExecutionHandle>> {
        let handle = self.handles[variant.strategy]
            .get_or_try_init(|| self.open_handle(variant))
            .await?
            .clone();

        if let Some(init_sql) = &self.init_sql {
            self.initialized
                .get_or_try_init(|| async {
                    debug!("Running init SQL on {} tier", handle.strategy);
                    handle.execute_batch(init_sql).await
                })
                .await?;
        }

        Ok(handle as Arc<dyn ExecutionHandle>)
    }
}

/// One tier's connection, serialized by its mutex
pub struct SqliteHandle {
    strategy: ExecutionStrategy,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = lock(&conn)?;
            conn.execute_batch(&sql).map_err(sql_error)
        })
        .await
        .map_err(|e| CarbonQueryError::Execution(format!("SQLite worker failed: {}", e)))?
    }
}

#[async_trait]
impl ExecutionHandle for SqliteHandle {
    async fn run(&self, sql: &str) -> Result<QueryRows> {
        let conn = self.conn.clone();
        let (prefix, body) = split_threads_prefix(sql);
        let prefix = prefix.map(str::to_string);
        let body = body.to_string();

        tokio::task::spawn_blocking(move || -> Result<QueryRows> {
            let conn = lock(&conn)?;
            if let Some(prefix) = &prefix {
                conn.execute_batch(prefix).map_err(sql_error)?;
            }
            if body.is_empty() {
                return Ok(QueryRows::default());
            }
            query_rows(&conn, &body)
        })
        .await
        .map_err(|e| CarbonQueryError::Execution(format!("SQLite worker failed: {}", e)))?
    }
}

fn query_rows(conn: &Connection, sql: &str) -> Result<QueryRows> {
    let mut stmt = conn.prepare(sql).map_err(sql_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(sql_error)?;
    while let Some(row) = cursor.next().map_err(sql_error)? {
        let values = (0..width)
            .map(|i| row.get_ref(i).map(value_to_json).map_err(sql_error))
            .collect::<Result<Vec<_>>>()?;
        rows.push(values);
    }

    Ok(QueryRows { columns, rows })
}

/// Split a leading `PRAGMA threads = N;` off the query it configures.
///
/// Any other statement, PRAGMA queries included, stays in the body.
fn split_threads_prefix(sql: &str) -> (Option<&str>, &str) {
    match THREADS_PREFIX_RE.find(sql) {
        Some(m) => (Some(m.as_str().trim()), sql[m.end()..].trim()),
        None => (None, sql.trim()),
    }
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            serde_json::Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| CarbonQueryError::Execution("SQLite connection mutex poisoned".to_string()))
}

fn sql_error(e: rusqlite::Error) -> CarbonQueryError {
    CarbonQueryError::Execution(format!("SQLite error: {}", e))
}
