//! Thin facade tying one [`Driver`] connection to the mutation and query
//! engines, and exposing the transaction boundary described in §5
//! ("Transactions"): a caller-supplied closure runs against a
//! connection-scoped driver, committed on `Ok` and rolled back on `Err`.

use std::future::Future;
use std::pin::Pin;

use crate::codec::DialectCodec;
use crate::driver::Driver;
use crate::error::Result;
use crate::mutate::Engine as MutationEngine;
use crate::query::QueryEngine;

pub struct Database {
    driver: Box<dyn Driver>,
    codec: Box<dyn DialectCodec>,
}

impl Database {
    pub fn new(driver: Box<dyn Driver>, codec: Box<dyn DialectCodec>) -> Self {
        Self { driver, codec }
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn mutate(&self) -> MutationEngine<'_> {
        MutationEngine::new(self.driver.as_ref(), self.codec.as_ref())
    }

    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self.driver.as_ref(), self.codec.as_ref())
    }

    /// Runs `f` against a connection scoped to a single transaction,
    /// committing on success and rolling back on any error the closure
    /// returns. A driver that doesn't support `begin` (§6.1 default) makes
    /// every call fail with `DialectUnsupported`.
    ///
    /// `f` returns a boxed future rather than an `async fn`/closure body
    /// directly — the usual workaround for a callback that borrows its
    /// argument across an `.await`, since a plain `FnOnce(Scoped<'_>) ->
    /// impl Future` can't express that the returned future borrows the
    /// same lifetime the argument was given.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(Scoped<'c>) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>,
    {
        let txn = self.driver.begin().await?;
        let scoped = Scoped {
            driver: txn.as_ref(),
            codec: self.codec.as_ref(),
        };
        match f(scoped).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(err)
            }
        }
    }
}

/// The driver/codec pair handed to a `transaction` closure, scoped to the
/// transaction's single underlying connection.
pub struct Scoped<'a> {
    driver: &'a dyn Driver,
    codec: &'a dyn DialectCodec,
}

impl<'a> Scoped<'a> {
    pub fn mutate(&self) -> MutationEngine<'a> {
        MutationEngine::new(self.driver, self.codec)
    }

    pub fn query(&self) -> QueryEngine<'a> {
        QueryEngine::new(self.driver, self.codec)
    }

    pub fn driver(&self) -> &'a dyn Driver {
        self.driver
    }
}
