//! Migration controller (C10) and ensure engine (C11): schema lifecycle
//! management layered on top of `lattice-core`'s driver contract.

mod ensure;
mod migrate;

pub use ensure::{copy_column, ensure_constraints, ensure_table, EnsureOutcome};
pub use migrate::{MigrationController, NoopListener, UpgradeEvent, UpgradeListener};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use lattice_core::dialect::{DeclaredType, Dialect, DialectKind};
    use lattice_core::driver::{Driver, MigrationLock, Row};
    use lattice_core::error::Result;
    use lattice_core::value::{Builtin, DbValue};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug, Default, Clone, Copy)]
    struct FakeDialect;

    impl Dialect for FakeDialect {
        fn kind(&self) -> DialectKind {
            DialectKind::Sqlite
        }
        fn quote_identifier(&self, ident: &str) -> String {
            format!("\"{ident}\"")
        }
        fn placeholder(&self, index: usize) -> String {
            format!("?{index}")
        }
        fn resolve_builtin(&self, builtin: Builtin) -> String {
            match builtin {
                Builtin::CurrentTimestamp => "CURRENT_TIMESTAMP".into(),
                Builtin::CurrentDate => "CURRENT_DATE".into(),
                Builtin::CurrentTime => "CURRENT_TIME".into(),
                Builtin::Raw(s) => s.into(),
            }
        }
        fn supports_returning(&self) -> bool {
            true
        }
        fn column_type_sql(&self, _ty: DeclaredType) -> &'static str {
            "TEXT"
        }
        fn supports_online_foreign_key_add(&self) -> bool {
            false
        }
    }

    /// An in-memory fake standing in for a real driver: tracks the single
    /// `_migrations` row count and whether a lock was taken, with no actual
    /// SQL parsing.
    struct FakeDriver {
        dialect: FakeDialect,
        version: Mutex<Option<i64>>,
        lock_taken: AtomicBool,
        has_native_lock: bool,
    }

    impl FakeDriver {
        fn new(has_native_lock: bool) -> Self {
            Self {
                dialect: FakeDialect,
                version: Mutex::new(None),
                lock_taken: AtomicBool::new(false),
                has_native_lock,
            }
        }
    }

    struct FakeLock;
    #[async_trait]
    impl MigrationLock for FakeLock {
        async fn release(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn dialect(&self) -> &dyn Dialect {
            &self.dialect
        }

        async fn all(&self, _sql: &str, _params: &[DbValue]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn get(&self, _sql: &str, _params: &[DbValue]) -> Result<Option<Row>> {
            Ok(None)
        }

        async fn run(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
            if sql.starts_with("INSERT INTO _migrations") {
                if let Some(DbValue::Int(v)) = params.first() {
                    *self.version.lock().await = Some(*v);
                }
            }
            Ok(1)
        }

        async fn val(&self, sql: &str, _params: &[DbValue]) -> Result<Option<DbValue>> {
            if sql.starts_with("SELECT MAX(version)") {
                return Ok(self.version.lock().await.map(DbValue::Int));
            }
            Ok(None)
        }

        fn supports_returning(&self) -> bool {
            true
        }

        async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
            if self.has_native_lock {
                self.lock_taken.store(true, Ordering::SeqCst);
                Ok(Some(Box::new(FakeLock)))
            } else {
                Ok(None)
            }
        }

        async fn begin(&self) -> Result<Box<dyn Driver>> {
            Err(lattice_core::error::LatticeError::DialectUnsupported {
                dialect: "fake",
                capability: "transaction",
            })
        }

        async fn list_columns(&self, _table: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn list_unique_constraints(&self, _table: &str) -> Result<Vec<Vec<String>>> {
            Ok(Vec::new())
        }
        async fn list_foreign_keys(&self, _table: &str) -> Result<Vec<(Vec<String>, String)>> {
            Ok(Vec::new())
        }
        async fn table_exists(&self, _table: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct RecordingListener {
        invoked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UpgradeListener for RecordingListener {
        async fn on_upgrade(&self, event: &mut UpgradeEvent) -> Result<()> {
            let invoked = self.invoked.clone();
            event.wait_until(async move {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn opens_and_runs_the_listener_on_first_upgrade() {
        let driver = FakeDriver::new(true);
        let mut controller = MigrationController::new(&driver);
        let invoked = Arc::new(AtomicBool::new(false));
        let listener = RecordingListener {
            invoked: invoked.clone(),
        };

        controller.open(3, &listener).await.unwrap();

        assert!(invoked.load(Ordering::SeqCst));
        assert!(driver.lock_taken.load(Ordering::SeqCst));
        assert_eq!(controller.current_version().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reopening_the_same_controller_is_rejected() {
        let driver = FakeDriver::new(true);
        let mut controller = MigrationController::new(&driver);
        controller.open(1, &NoopListener).await.unwrap();

        let err = controller.open(2, &NoopListener).await.unwrap_err();
        assert!(matches!(err, lattice_core::error::LatticeError::MigrationAlreadyOpen));
    }

    #[tokio::test]
    async fn opening_at_or_below_current_version_skips_the_listener() {
        let driver = FakeDriver::new(true);
        *driver.version.lock().await = Some(5);
        let mut controller = MigrationController::new(&driver);
        let invoked = Arc::new(AtomicBool::new(false));
        let listener = RecordingListener {
            invoked: invoked.clone(),
        };

        controller.open(5, &listener).await.unwrap();

        assert!(!invoked.load(Ordering::SeqCst));
    }
}
