//! SQLite document store for ChainPipe.
//!
//! Every collection lives in one `documents` table holding the JSON text of
//! each document. Filters and sorts are evaluated with SQLite's JSON1
//! functions (`json_extract`, `json_type`, `json_each`). The database runs in
//! WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use chainpipe_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./chainpipe.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use chainpipe_core::error::PipelineError;
use chainpipe_core::store::{
    merge_document, sum_operand, Filter, FindOptions, Op, PersistentStore, SortOrder,
};

fn storage_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

/// SQLite-backed [`PersistentStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes read-modify-write upserts.
    writer: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainpipe.db"`) or a full
    /// SQLite URL (`"sqlite:./chainpipe.db"`).
    pub async fn open(path: &str) -> Result<Self, PipelineError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the store is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, PipelineError> {
        // every connection to sqlite::memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, PipelineError> {
        let store = Self {
            pool,
            writer: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the documents table and its indexes.
    async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT    NOT NULL,
                doc        TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Keyset pagination sorts and compares on the primary key
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_pk
             ON documents (collection, json_extract(doc, '$._id'));",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

// ─── Query building ───────────────────────────────────────────────────────────

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
enum Param {
    Int(i64),
    Real(f64),
    Text(String),
}

impl Param {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Param::Int(i),
                (None, Some(f)) => Param::Real(f),
                (None, None) => Param::Text(n.to_string()),
            },
            Value::String(s) => Param::Text(s.clone()),
            Value::Bool(b) => Param::Int(i64::from(*b)),
            other => Param::Text(other.to_string()),
        }
    }
}

/// `json_type` values a comparison operand must match.
fn json_types(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "('integer', 'real')",
        Value::String(_) => "('text')",
        Value::Bool(_) => "('true', 'false')",
        _ => "('array', 'object')",
    }
}

/// JSON path of a top-level document field. Field names are restricted so
/// the path can be embedded in SQL text.
fn json_path(field: &str) -> Result<String, PipelineError> {
    let valid = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(PipelineError::Storage(format!("invalid field name '{field}'")));
    }
    Ok(format!("'$.{field}'"))
}

/// `collection = ? AND ...` for `filter`, with its parameters in order.
fn where_clause(collection: &str, filter: &Filter) -> Result<(String, Vec<Param>), PipelineError> {
    filter.validate()?;
    let mut sql = String::from("collection = ?");
    let mut params = vec![Param::Text(collection.to_string())];

    for c in &filter.conditions {
        let path = json_path(&c.field)?;
        let col = format!("json_extract(doc, {path})");
        let clause = match (c.op, &c.value) {
            (Op::Eq, Value::Null) => format!("{col} IS NULL"),
            (Op::Ne, Value::Null) => format!("{col} IS NOT NULL"),
            (Op::Eq, v) => {
                params.push(Param::from_value(v));
                format!("{col} = ?")
            }
            (Op::Ne, v) => {
                params.push(Param::from_value(v));
                format!("({col} IS NULL OR {col} <> ?)")
            }
            (Op::Contains, v) => {
                params.push(Param::from_value(v));
                format!("EXISTS (SELECT 1 FROM json_each(doc, {path}) WHERE json_each.value = ?)")
            }
            (op, v) => {
                let cmp = match op {
                    Op::Gt => ">",
                    Op::Gte => ">=",
                    Op::Lt => "<",
                    _ => "<=",
                };
                params.push(Param::from_value(v));
                format!("(json_type(doc, {path}) IN {} AND {col} {cmp} ?)", json_types(v))
            }
        };
        sql.push_str(" AND ");
        sql.push_str(&clause);
    }
    Ok((sql, params))
}

fn order_clause(options: &FindOptions) -> Result<String, PipelineError> {
    let mut terms = Vec::with_capacity(options.sort.len() + 1);
    for s in &options.sort {
        let dir = match s.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        terms.push(format!("json_extract(doc, {}) {dir}", json_path(&s.field)?));
    }
    // insertion order breaks ties
    terms.push("id ASC".to_string());
    Ok(terms.join(", "))
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<Param>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for p in params {
        query = match p {
            Param::Int(i) => query.bind(i),
            Param::Real(f) => query.bind(f),
            Param::Text(s) => query.bind(s),
        };
    }
    query
}

fn parse_doc(text: &str) -> Result<Value, PipelineError> {
    serde_json::from_str(text).map_err(storage_err)
}

// ─── PersistentStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn insert(&self, collection: &str, doc: Value) -> Result<(), PipelineError> {
        sqlx::query("INSERT INTO documents (collection, doc) VALUES (?, ?)")
            .bind(collection)
            .bind(doc.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, filter: &Filter, doc: Value) -> Result<(), PipelineError> {
        let (cond, params) = where_clause(collection, filter)?;
        let select = format!("SELECT id, doc FROM documents WHERE {cond} ORDER BY id LIMIT 1");

        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing = bind_params(sqlx::query(&select), params)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id").map_err(storage_err)?;
                let text: String = row.try_get("doc").map_err(storage_err)?;
                let mut current = parse_doc(&text)?;
                merge_document(&mut current, doc);
                sqlx::query("UPDATE documents SET doc = ? WHERE id = ?")
                    .bind(current.to_string())
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                debug!(collection, id, "document updated");
            }
            None => {
                sqlx::query("INSERT INTO documents (collection, doc) VALUES (?, ?)")
                    .bind(collection)
                    .bind(doc.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
            }
        }

        tx.commit().await.map_err(storage_err)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Value>, PipelineError> {
        let (cond, params) = where_clause(collection, filter)?;
        let limit = options
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let offset = i64::try_from(options.skip).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT doc FROM documents WHERE {cond} ORDER BY {} LIMIT {limit} OFFSET {offset}",
            order_clause(options)?
        );

        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let text: String = row.try_get("doc").map_err(storage_err)?;
                parse_doc(&text)
            })
            .collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, PipelineError> {
        let (cond, params) = where_clause(collection, filter)?;
        let sql = format!("SELECT COUNT(*) AS n FROM documents WHERE {cond}");
        let row = bind_params(sqlx::query(&sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        Ok(n.max(0) as u64)
    }

    /// Amounts are usually stored as hex strings, so they are summed here
    /// rather than with SQL `SUM`.
    async fn aggregate_sum(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> Result<U256, PipelineError> {
        let (cond, params) = where_clause(collection, filter)?;
        let sql = format!(
            "SELECT json_quote(json_extract(doc, {})) AS v FROM documents WHERE {cond}",
            json_path(field)?
        );
        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut total = U256::ZERO;
        for row in &rows {
            let text: String = row.try_get("v").map_err(storage_err)?;
            if let Some(v) = sum_operand(&parse_doc(&text)?) {
                total = total
                    .checked_add(v)
                    .ok_or_else(|| PipelineError::Storage(format!("sum of '{field}' overflows")))?;
            }
        }
        Ok(total)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
