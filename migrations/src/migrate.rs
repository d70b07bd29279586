//! Migration Controller (C10): monotonic versioning under an exclusive
//! lock, with an upgrade-event lifecycle a listener populates via
//! `wait_until`, per §4.9 and §6.2.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use lattice_core::dialect::{Dialect, DialectKind};
use lattice_core::driver::Driver;
use lattice_core::error::{LatticeError, Result};
use lattice_core::value::DbValue;

/// Fired exactly once during `open(v)` when `v > current` (§6.2).
pub struct UpgradeEvent {
    pub old_version: i64,
    pub new_version: i64,
    waiters: Vec<Pin<Box<dyn Future<Output = Result<()>> + Send>>>,
}

impl UpgradeEvent {
    fn new(old_version: i64, new_version: i64) -> Self {
        Self {
            old_version,
            new_version,
            waiters: Vec::new(),
        }
    }

    /// Registers a continuation the controller must await before marking
    /// the upgrade successful. Callable more than once; every registered
    /// future is awaited (§6.2 "Multiple `wait_until` calls are all
    /// awaited").
    pub fn wait_until<F>(&mut self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.waiters.push(Box::pin(future));
    }

    async fn settle(self) -> Result<()> {
        for waiter in self.waiters {
            waiter.await?;
        }
        Ok(())
    }
}

/// Application code's hook into the upgrade lifecycle: populate the event
/// with whatever async migration work `old_version -> new_version` needs,
/// via `event.wait_until(...)`.
#[async_trait]
pub trait UpgradeListener: Send + Sync {
    async fn on_upgrade(&self, event: &mut UpgradeEvent) -> Result<()>;
}

/// A listener that performs no migration work; useful when the caller
/// only needs version bookkeeping (e.g. a fresh database brought straight
/// to its current schema by `ensure_table` rather than incremental steps).
pub struct NoopListener;

#[async_trait]
impl UpgradeListener for NoopListener {
    async fn on_upgrade(&self, _event: &mut UpgradeEvent) -> Result<()> {
        Ok(())
    }
}

fn migrations_table_ddl(kind: DialectKind) -> &'static str {
    match kind {
        DialectKind::Sqlite => "CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)",
        DialectKind::Postgres | DialectKind::Mysql => {
            "CREATE TABLE IF NOT EXISTS _migrations (version BIGINT PRIMARY KEY)"
        }
    }
}

/// One-shot controller: `open` may be called at most once per instance
/// (§7 `MigrationAlreadyOpen`, testable property #11).
pub struct MigrationController<'a> {
    driver: &'a dyn Driver,
    opened: bool,
}

impl<'a> MigrationController<'a> {
    pub fn new(driver: &'a dyn Driver) -> Self {
        Self {
            driver,
            opened: false,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Runs the full §4.9 lifecycle against `desired_version`. A no-op
    /// (besides marking the controller opened) when `desired_version` is
    /// already reached.
    pub async fn open(&mut self, desired_version: i64, listener: &dyn UpgradeListener) -> Result<()> {
        if self.opened {
            return Err(LatticeError::MigrationAlreadyOpen);
        }

        match self.driver.acquire_migration_lock().await? {
            Some(lock) => {
                let result = run_open(self.driver, desired_version, listener).await;
                lock.release().await?;
                result?;
            }
            None => {
                let txn = self.driver.begin().await?;
                match run_open(txn.as_ref(), desired_version, listener).await {
                    Ok(()) => txn.commit().await?,
                    Err(err) => {
                        let _ = txn.rollback().await;
                        return Err(err);
                    }
                }
            }
        }

        self.opened = true;
        Ok(())
    }

    pub async fn current_version(&self) -> Result<i64> {
        read_current_version(self.driver).await
    }
}

async fn run_open(driver: &dyn Driver, desired_version: i64, listener: &dyn UpgradeListener) -> Result<()> {
    driver
        .run(migrations_table_ddl(driver.dialect().kind()), &[])
        .await?;

    let current = read_current_version(driver).await?;
    if desired_version <= current {
        return Ok(());
    }

    tracing::info!(current, desired_version, "running schema upgrade");
    let mut event = UpgradeEvent::new(current, desired_version);
    listener.on_upgrade(&mut event).await?;
    event.settle().await?;

    let placeholder = driver.dialect().placeholder(1);
    driver
        .run(
            &format!("INSERT INTO _migrations (version) VALUES ({placeholder})"),
            &[DbValue::Int(desired_version)],
        )
        .await?;
    Ok(())
}

async fn read_current_version(driver: &dyn Driver) -> Result<i64> {
    let value = driver
        .val("SELECT MAX(version) FROM _migrations", &[])
        .await?;
    Ok(match value {
        Some(DbValue::Int(v)) => v,
        Some(DbValue::Real(v)) => v as i64,
        _ => 0,
    })
}
