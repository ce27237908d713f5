//! SQLite row store
//!
//! Every table lives in a single `rows` table keyed by `(tbl, id)` with the
//! row itself stored as JSON. Filtering and ordering are evaluated by
//! [`Query`] after load, so the embedded store and the REST encoding share
//! one set of semantics.
//!
//! Writes run in a transaction on the blocking pool; change events are
//! published to the feed only after commit.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::backend::{Backend, NotificationOutcome, NotificationRequest};
use super::error::{StoreError, StoreResult};
use crate::model::{Filter, Query, Table};
use crate::realtime::{ChangeEvent, ChangeFeed};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rows (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        tbl TEXT NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        UNIQUE (tbl, id)
    );
    CREATE INDEX IF NOT EXISTS idx_rows_tbl ON rows(tbl);
";

/// Embedded backend publishing every committed write to its feed
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    feed: Arc<ChangeFeed>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a store file
    pub fn open(path: &Path, feed: Arc<ChangeFeed>) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = %path.display(), "Opened row store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            feed,
            path: Some(path.to_path_buf()),
        })
    }

    /// Throwaway store for tests and demos
    pub fn in_memory(feed: Arc<ChangeFeed>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            feed,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of rows in a table
    pub async fn count(&self, table: Table) -> StoreResult<usize> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rows WHERE tbl = ?",
                params![table.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Cheap liveness query for readiness probes
    pub async fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }

    fn publish_all(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.feed.publish(event);
        }
    }
}

fn load_table(conn: &Connection, table: Table) -> StoreResult<Vec<Value>> {
    let mut stmt = conn.prepare_cached("SELECT data FROM rows WHERE tbl = ? ORDER BY seq")?;
    let rows = stmt.query_map(params![table.as_str()], |row| row.get::<_, String>(0))?;

    let mut values = Vec::new();
    for data in rows {
        values.push(serde_json::from_str(&data?)?);
    }
    Ok(values)
}

fn require_filters(op: &str, filters: &[Filter]) -> StoreResult<()> {
    if filters.is_empty() {
        return Err(StoreError::InvalidRequest(format!(
            "{} requires at least one filter",
            op
        )));
    }
    Ok(())
}

fn as_object(table: Table, value: Value) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Constraint {
            table,
            message: format!("expected a JSON object, got {}", other),
        }),
    }
}

fn normalize(table: Table, row: &Value) -> StoreResult<Value> {
    table
        .normalize(row)
        .map_err(|message| StoreError::Constraint { table, message })
}

fn row_id(row: &Value) -> String {
    row.get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Fill in id and timestamps for a new row
fn prepare_insert(table: Table, row: Value) -> StoreResult<Value> {
    let mut map = as_object(table, row)?;
    let now = Value::String(Utc::now().to_rfc3339());

    let has_id = map
        .get("id")
        .and_then(Value::as_str)
        .map(|id| !id.is_empty())
        .unwrap_or(false);
    if !has_id {
        map.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    for column in ["created_at", "updated_at"] {
        if map.get(column).map(Value::is_null).unwrap_or(true) {
            map.insert(column.to_string(), now.clone());
        }
    }

    normalize(table, &Value::Object(map))
}

/// Shallow-merge a patch into an existing row
fn apply_patch(table: Table, current: &Value, patch: &Map<String, Value>) -> StoreResult<Value> {
    let mut map = as_object(table, current.clone())?;
    let id = row_id(current);

    for (column, value) in patch {
        if column == "id" && value.as_str() != Some(id.as_str()) {
            return Err(StoreError::InvalidRequest("row ids cannot be changed".to_string()));
        }
        if column == "created_at" {
            continue;
        }
        map.insert(column.clone(), value.clone());
    }
    if !patch.contains_key("updated_at") {
        map.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    normalize(table, &Value::Object(map))
}

#[async_trait]
impl Backend for SqliteStore {
    async fn select(&self, table: Table, query: &Query) -> StoreResult<Vec<Value>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let rows = load_table(conn, table)?;
            Ok(query.apply(rows))
        })
        .await
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = rows
            .into_iter()
            .map(|row| prepare_insert(table, row))
            .collect::<StoreResult<Vec<_>>>()?;

        let inserted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt =
                        tx.prepare_cached("INSERT INTO rows (tbl, id, data) VALUES (?, ?, ?)")?;
                    for row in &prepared {
                        let id = row_id(row);
                        stmt.execute(params![table.as_str(), id, serde_json::to_string(row)?])
                            .map_err(|e| match e {
                                rusqlite::Error::SqliteFailure(err, _)
                                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                                {
                                    StoreError::Constraint {
                                        table,
                                        message: format!("duplicate id '{}'", id),
                                    }
                                }
                                other => StoreError::Database(other),
                            })?;
                    }
                }
                tx.commit()?;
                Ok(prepared)
            })
            .await?;

        tracing::debug!(table = %table, count = inserted.len(), "Inserted rows");
        self.publish_all(
            inserted
                .iter()
                .map(|row| ChangeEvent::insert(table, row.clone()))
                .collect(),
        );
        Ok(inserted)
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Value,
    ) -> StoreResult<Vec<Value>> {
        require_filters("update", filters)?;
        let patch = as_object(table, patch)?;
        let query = Query {
            filters: filters.to_vec(),
            ..Query::default()
        };

        let changes = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let matching: Vec<Value> = load_table(&tx, table)?
                    .into_iter()
                    .filter(|row| query.matches(row))
                    .collect();

                let mut changes = Vec::with_capacity(matching.len());
                {
                    let mut stmt =
                        tx.prepare_cached("UPDATE rows SET data = ? WHERE tbl = ? AND id = ?")?;
                    for old in matching {
                        let new = apply_patch(table, &old, &patch)?;
                        stmt.execute(params![
                            serde_json::to_string(&new)?,
                            table.as_str(),
                            row_id(&old)
                        ])?;
                        changes.push((old, new));
                    }
                }
                tx.commit()?;
                Ok(changes)
            })
            .await?;

        tracing::debug!(table = %table, count = changes.len(), "Updated rows");
        let updated = changes.iter().map(|(_, new)| new.clone()).collect();
        self.publish_all(
            changes
                .into_iter()
                .map(|(old, new)| ChangeEvent::update(table, old, new))
                .collect(),
        );
        Ok(updated)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        require_filters("delete", filters)?;
        let query = Query {
            filters: filters.to_vec(),
            ..Query::default()
        };

        let removed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let matching: Vec<Value> = load_table(&tx, table)?
                    .into_iter()
                    .filter(|row| query.matches(row))
                    .collect();
                {
                    let mut stmt = tx.prepare_cached("DELETE FROM rows WHERE tbl = ? AND id = ?")?;
                    for row in &matching {
                        stmt.execute(params![table.as_str(), row_id(row)])?;
                    }
                }
                tx.commit()?;
                Ok(matching)
            })
            .await?;

        tracing::debug!(table = %table, count = removed.len(), "Deleted rows");
        self.publish_all(
            removed
                .iter()
                .map(|row| ChangeEvent::delete(table, row.clone()))
                .collect(),
        );
        Ok(removed)
    }

    async fn create_notification(
        &self,
        request: NotificationRequest,
    ) -> StoreResult<NotificationOutcome> {
        crate::notify::fan_out(self, request).await
    }

    fn feed(&self) -> Arc<ChangeFeed> {
        Arc::clone(&self.feed)
    }
}

impl SqliteStore {
    /// Raw JSON of a single row, bypassing the query layer
    pub async fn get_raw(&self, table: Table, id: &str) -> StoreResult<Option<Value>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM rows WHERE tbl = ? AND id = ?",
                    params![table.as_str(), id],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
                .transpose()
        })
        .await
    }
}
