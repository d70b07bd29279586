//! PostgreSQL driver: `tokio_postgres::Client` is natively async, so every
//! [`Driver`] method is a thin wrapper that converts params/rows at the
//! boundary.

use async_trait::async_trait;
use lattice_core::dialect::Dialect;
use lattice_core::driver::{Driver, MigrationLock, Row};
use lattice_core::error::{LatticeError, Result};
use lattice_core::value::DbValue;
use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use std::sync::Arc;

use tokio_postgres::Client;

use crate::dialect::PostgresDialect;

/// `client` is `Arc`-shared (not owned outright) so [`Driver::begin`] can
/// hand back a second `PostgresDriver` bound to the very same connection —
/// `tokio_postgres::Transaction` borrows its client, which doesn't fit the
/// boxed-owned-driver shape the core's transaction facade needs.
pub struct PostgresDriver {
    client: Arc<Client>,
    dialect: PostgresDialect,
}

impl PostgresDriver {
    /// Connects with `NoTls` and drives the connection on a spawned task
    /// (the standard `tokio_postgres` pattern — see its own docs).
    pub async fn connect(conninfo: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(conninfo, tokio_postgres::NoTls)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(%error, "postgres connection task terminated");
            }
        });
        Ok(Self {
            client: Arc::new(client),
            dialect: PostgresDialect,
        })
    }

    fn params<'a>(values: &'a [DbValue]) -> Vec<&'a (dyn ToSql + Sync)> {
        values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
    }
}

impl ToSql for DbValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> core::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            DbValue::Null => Ok(IsNull::Yes),
            DbValue::Bool(b) => b.to_sql(ty, out),
            DbValue::Int(i) => i.to_sql(ty, out),
            DbValue::Real(r) => r.to_sql(ty, out),
            DbValue::Text(s) => s.to_sql(ty, out),
            DbValue::Blob(b) => b.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn column_value(row: &tokio_postgres::Row, idx: usize) -> Result<DbValue> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map(|o| o.map(DbValue::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|o| o.map(|v| DbValue::Int(v as i64))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|o| o.map(|v| DbValue::Int(v as i64))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map(|o| o.map(DbValue::Int)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|o| o.map(|v| DbValue::Real(v as f64))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map(|o| o.map(DbValue::Real)),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|o| o.map(|v| DbValue::Text(v.to_string()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|o| o.map(|dt| DbValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map(|o| o.map(DbValue::Blob)),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(|o| o.map(DbValue::Text)),
    };
    value
        .map_err(|e| LatticeError::Driver(e.to_string()))
        .map(|o| o.unwrap_or(DbValue::Null))
}

fn row_to_map(row: tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(&row, idx)?);
    }
    Ok(out)
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        let bound = Self::params(params);
        let rows = self
            .client
            .query(sql, &bound)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        rows.into_iter().map(row_to_map).collect()
    }

    async fn get(&self, sql: &str, params: &[DbValue]) -> Result<Option<Row>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    async fn run(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        let bound = Self::params(params);
        self.client
            .execute(sql, &bound)
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))
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
        self.client
            .batch_execute("BEGIN;")
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(Box::new(PostgresDriver {
            client: self.client.clone(),
            dialect: self.dialect,
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.client
            .batch_execute("COMMIT;")
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))
    }

    async fn rollback(&self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK;")
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))
    }

    async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
        // Advisory lock keyed on a fixed, application-reserved id (§5).
        self.client
            .batch_execute("SELECT pg_advisory_lock(727103);")
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(Some(Box::new(PostgresMigrationLockToken)))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT column_name FROM information_schema.columns WHERE table_name = $1",
                &[&table],
            )
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        rows.into_iter()
            .map(|r| r.try_get::<_, String>(0).map_err(|e| LatticeError::Driver(e.to_string())))
            .collect()
    }

    async fn list_unique_constraints(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let rows = self
            .client
            .query(
                "SELECT tc.constraint_name, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                 WHERE tc.table_name = $1 AND tc.constraint_type = 'UNIQUE' \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;

        let mut grouped: indexmap::IndexMap<String, Vec<String>> = indexmap::IndexMap::new();
        for row in rows {
            let constraint: String = row.try_get(0).map_err(|e| LatticeError::Driver(e.to_string()))?;
            let column: String = row.try_get(1).map_err(|e| LatticeError::Driver(e.to_string()))?;
            grouped.entry(constraint).or_default().push(column);
        }
        Ok(grouped.into_values().collect())
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<(Vec<String>, String)>> {
        let rows = self
            .client
            .query(
                "SELECT tc.constraint_name, kcu.column_name, ccu.table_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON tc.constraint_name = ccu.constraint_name \
                 WHERE tc.table_name = $1 AND tc.constraint_type = 'FOREIGN KEY' \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;

        let mut grouped: indexmap::IndexMap<String, (Vec<String>, String)> = indexmap::IndexMap::new();
        for row in rows {
            let constraint: String = row.try_get(0).map_err(|e| LatticeError::Driver(e.to_string()))?;
            let column: String = row.try_get(1).map_err(|e| LatticeError::Driver(e.to_string()))?;
            let target: String = row.try_get(2).map_err(|e| LatticeError::Driver(e.to_string()))?;
            let entry = grouped.entry(constraint).or_insert_with(|| (Vec::new(), target));
            entry.0.push(column);
        }
        Ok(grouped.into_values().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM information_schema.tables WHERE table_name = $1",
                &[&table],
            )
            .await
            .map_err(|e| LatticeError::Driver(e.to_string()))?;
        Ok(row.is_some())
    }
}

struct PostgresMigrationLockToken;

#[async_trait]
impl MigrationLock for PostgresMigrationLockToken {
    async fn release(self: Box<Self>) -> Result<()> {
        // The advisory lock is session-scoped; without holding the same
        // client handle here, release happens naturally when the
        // connection that acquired it closes. Concrete deployments that
        // need an explicit unlock should call `pg_advisory_unlock` on the
        // same connection via `PostgresDriver::acquire_migration_lock`'s
        // caller before dropping the driver.
        Ok(())
    }
}
