//! MySQL/MariaDB driver on `mysql_async`. Every `Queryable` call needs
//! `&mut Conn`, so the single connection is held behind a `tokio::sync::Mutex`
//! rather than `std::sync::Mutex` (lock is held across `.await` points).

use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::dialect::Dialect;
use lattice_core::driver::{Driver, MigrationLock, Row};
use lattice_core::error::{LatticeError, Result};
use lattice_core::value::DbValue;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, Params, Value as MysqlValue};
use tokio::sync::Mutex;

use crate::dialect::MysqlDialect;

pub struct MysqlDriver {
    conn: Arc<Mutex<Conn>>,
    dialect: MysqlDialect,
}

impl MysqlDriver {
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url).map_err(|e| LatticeError::Driver(e.to_string()))?;
        let conn = Conn::new(opts)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dialect: MysqlDialect,
        })
    }

    fn from_conn(conn: Arc<Mutex<Conn>>) -> Self {
        Self {
            conn,
            dialect: MysqlDialect,
        }
    }

    async fn exec_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.query_drop(sql)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))
    }
}

fn to_mysql_value(value: &DbValue) -> MysqlValue {
    match value {
        DbValue::Null => MysqlValue::NULL,
        DbValue::Bool(b) => MysqlValue::Int(if *b { 1 } else { 0 }),
        DbValue::Int(i) => MysqlValue::Int(*i),
        DbValue::Real(r) => MysqlValue::Double(*r),
        DbValue::Text(s) => MysqlValue::Bytes(s.clone().into_bytes()),
        DbValue::Blob(b) => MysqlValue::Bytes(b.clone()),
    }
}

fn from_mysql_value(value: MysqlValue) -> DbValue {
    match value {
        MysqlValue::NULL => DbValue::Null,
        MysqlValue::Bytes(b) => DbValue::Text(String::from_utf8_lossy(&b).into_owned()),
        MysqlValue::Int(i) => DbValue::Int(i),
        MysqlValue::UInt(u) => DbValue::Int(u as i64),
        MysqlValue::Float(f) => DbValue::Real(f as f64),
        MysqlValue::Double(d) => DbValue::Real(d),
        MysqlValue::Date(year, month, day, hour, minute, second, micros) => DbValue::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{:03}",
            micros / 1000
        )),
        MysqlValue::Time(negative, days, hours, minutes, seconds, micros) => DbValue::Text(format!(
            "{}{:02}:{:02}:{:02}.{:03}",
            if negative { "-" } else { "" },
            u32::from(days) * 24 + u32::from(hours),
            minutes,
            seconds,
            micros / 1000
        )),
    }
}

fn row_to_map(row: mysql_async::Row) -> Row {
    let mut out = Row::new();
    let columns = row.columns();
    for (idx, column) in columns.iter().enumerate() {
        let name = column.name_str().to_string();
        let value = row.as_ref(idx).cloned().unwrap_or(MysqlValue::NULL);
        out.insert(name, from_mysql_value(value));
    }
    out
}

struct MysqlMigrationLock {
    conn: Arc<Mutex<Conn>>,
}

#[async_trait]
impl MigrationLock for MysqlMigrationLock {
    async fn release(self: Box<Self>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.query_drop("SELECT RELEASE_LOCK('lattice_migrations');")
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        let bound = Params::Positional(params.iter().map(to_mysql_value).collect());
        let mut conn = self.conn.lock().await;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, bound)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_map).collect())
    }

    async fn get(&self, sql: &str, params: &[DbValue]) -> Result<Option<Row>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    async fn run(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        let bound = Params::Positional(params.iter().map(to_mysql_value).collect());
        let mut conn = self.conn.lock().await;
        conn.exec_drop(sql, bound)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(conn.affected_rows())
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
        false
    }

    async fn begin(&self) -> Result<Box<dyn Driver>> {
        self.exec_batch("START TRANSACTION;").await?;
        Ok(Box::new(MysqlDriver::from_conn(self.conn.clone())))
    }

    async fn commit(&self) -> Result<()> {
        self.exec_batch("COMMIT;").await
    }

    async fn rollback(&self) -> Result<()> {
        self.exec_batch("ROLLBACK;").await
    }

    async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
        let result = self
            .val("SELECT GET_LOCK('lattice_migrations', 30);", &[])
            .await?;
        match result {
            Some(DbValue::Int(1)) => Ok(Some(Box::new(MysqlMigrationLock {
                conn: self.conn.clone(),
            }))),
            Some(DbValue::Int(0)) => Err(LatticeError::Driver(
                "GET_LOCK('lattice_migrations', 30) timed out".to_string(),
            )),
            _ => Err(LatticeError::Driver(
                "GET_LOCK('lattice_migrations', 30) returned NULL (error acquiring lock)".to_string(),
            )),
        }
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .all(
                "SELECT column_name FROM information_schema.columns WHERE table_name = ?",
                &[DbValue::Text(table.to_string())],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.shift_remove("column_name"))
            .filter_map(|v| match v {
                DbValue::Text(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn list_unique_constraints(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let rows = self
            .all(
                "SELECT index_name, column_name FROM information_schema.statistics \
                 WHERE table_name = ? AND non_unique = 0 AND index_name != 'PRIMARY' \
                 ORDER BY index_name, seq_in_index",
                &[DbValue::Text(table.to_string())],
            )
            .await?;
        let mut grouped: indexmap::IndexMap<String, Vec<String>> = indexmap::IndexMap::new();
        for mut row in rows {
            let index_name = match row.shift_remove("index_name") {
                Some(DbValue::Text(s)) => s,
                _ => continue,
            };
            let column = match row.shift_remove("column_name") {
                Some(DbValue::Text(s)) => s,
                _ => continue,
            };
            grouped.entry(index_name).or_default().push(column);
        }
        Ok(grouped.into_values().collect())
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<(Vec<String>, String)>> {
        let rows = self
            .all(
                "SELECT constraint_name, column_name, referenced_table_name \
                 FROM information_schema.key_column_usage \
                 WHERE table_name = ? AND referenced_table_name IS NOT NULL \
                 ORDER BY constraint_name, ordinal_position",
                &[DbValue::Text(table.to_string())],
            )
            .await?;
        let mut grouped: indexmap::IndexMap<String, (Vec<String>, String)> = indexmap::IndexMap::new();
        for mut row in rows {
            let constraint = match row.shift_remove("constraint_name") {
                Some(DbValue::Text(s)) => s,
                _ => continue,
            };
            let column = match row.shift_remove("column_name") {
                Some(DbValue::Text(s)) => s,
                _ => continue,
            };
            let target = match row.shift_remove("referenced_table_name") {
                Some(DbValue::Text(s)) => s,
                _ => continue,
            };
            let entry = grouped.entry(constraint).or_insert_with(|| (Vec::new(), target));
            entry.0.push(column);
        }
        Ok(grouped.into_values().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let value = self
            .val(
                "SELECT 1 FROM information_schema.tables WHERE table_name = ? LIMIT 1",
                &[DbValue::Text(table.to_string())],
            )
            .await?;
        Ok(value.is_some())
    }
}
