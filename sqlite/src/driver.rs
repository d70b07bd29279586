//! SQLite driver: wraps a synchronous `rusqlite::Connection` behind the
//! async [`Driver`] contract via `spawn_blocking`, serialising access
//! through a `std::sync::Mutex` since a single connection is not `Sync`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lattice_core::dialect::Dialect;
use lattice_core::driver::{Driver, MigrationLock, Row};
use lattice_core::error::{LatticeError, Result};
use lattice_core::value::DbValue;
use rusqlite::types::{Value as RusqliteValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};

use crate::dialect::SqliteDialect;

pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
    dialect: SqliteDialect,
}

impl SqliteDriver {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| LatticeError::Driver(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dialect: SqliteDialect,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dialect: SqliteDialect,
        })
    }

    fn from_conn(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            dialect: SqliteDialect,
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| LatticeError::Driver(format!("sqlite worker panicked: {e}")))?
        .map_err(|e| LatticeError::Driver(e.to_string()))
    }
}

fn to_rusqlite(value: &DbValue) -> RusqliteValue {
    match value {
        DbValue::Null => RusqliteValue::Null,
        DbValue::Bool(b) => RusqliteValue::Integer(if *b { 1 } else { 0 }),
        DbValue::Int(i) => RusqliteValue::Integer(*i),
        DbValue::Real(r) => RusqliteValue::Real(*r),
        DbValue::Text(s) => RusqliteValue::Text(s.clone()),
        DbValue::Blob(b) => RusqliteValue::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(i) => DbValue::Int(i),
        ValueRef::Real(r) => DbValue::Real(r),
        ValueRef::Text(t) => DbValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DbValue::Blob(b.to_vec()),
    }
}

fn row_to_map(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let stmt = row.as_ref();
    let mut out = Row::new();
    for i in 0..stmt.column_count() {
        let name = stmt.column_name(i)?.to_string();
        out.insert(name, from_value_ref(row.get_ref(i)?));
    }
    Ok(out)
}

struct SqliteMigrationLock {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl MigrationLock for SqliteMigrationLock {
    async fn release(self: Box<Self>) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .expect("sqlite connection mutex poisoned")
                .execute_batch("COMMIT;")
        })
        .await
        .map_err(|e| LatticeError::Driver(format!("sqlite worker panicked: {e}")))?
        .map_err(|e| LatticeError::Driver(e.to_string()))
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params: Vec<RusqliteValue> = params.iter().map(to_rusqlite).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), row_to_map)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn get(&self, sql: &str, params: &[DbValue]) -> Result<Option<Row>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    async fn run(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        let sql = sql.to_string();
        let params: Vec<RusqliteValue> = params.iter().map(to_rusqlite).collect();
        self.with_conn(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map(|n| n as u64)
        })
        .await
    }

    async fn val(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbValue>> {
        Ok(self
            .all(sql, params)
            .await?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v)))
    }

    fn supports_returning(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<Box<dyn Driver>> {
        self.with_conn(|conn| conn.execute_batch("BEGIN;")).await?;
        Ok(Box::new(SqliteDriver::from_conn(self.conn.clone())))
    }

    async fn commit(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("COMMIT;")).await
    }

    async fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("ROLLBACK;")).await
    }

    async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
        self.with_conn(|conn| conn.execute_batch("BEGIN EXCLUSIVE;"))
            .await?;
        Ok(Some(Box::new(SqliteMigrationLock {
            conn: self.conn.clone(),
        })))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", self.dialect.quote_identifier(table));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
            names.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn list_unique_constraints(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let quoted = self.dialect.quote_identifier(table);
        let list_sql = format!("PRAGMA index_list({quoted})");
        let indexes: Vec<(String, bool)> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&list_sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)? != 0))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        let mut out = Vec::new();
        for (index_name, is_unique) in indexes {
            if !is_unique {
                continue;
            }
            let info_sql = format!("PRAGMA index_info({})", self.dialect.quote_identifier(&index_name));
            let columns: Vec<String> = self
                .with_conn(move |conn| {
                    let mut stmt = conn.prepare(&info_sql)?;
                    let rows = stmt.query_map([], |row| row.get::<_, String>(2))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })
                .await?;
            out.push(columns);
        }
        Ok(out)
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<(Vec<String>, String)>> {
        let sql = format!(
            "PRAGMA foreign_key_list({})",
            self.dialect.quote_identifier(table)
        );
        let rows: Vec<(i64, String, String)> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        let mut grouped: indexmap::IndexMap<i64, (Vec<String>, String)> = indexmap::IndexMap::new();
        for (id, target_table, source_column) in rows {
            let entry = grouped
                .entry(id)
                .or_insert_with(|| (Vec::new(), target_table));
            entry.0.push(source_column);
        }
        Ok(grouped.into_values().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
        })
        .await
    }
}
