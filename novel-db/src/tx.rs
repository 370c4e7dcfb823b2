//! Transaction Helper (C8, spec §4.5).
//!
//! `with_tx` opens a transaction, runs the caller's closure against it, and
//! commits on success or rolls back on any error — mirroring the Helix
//! stack's `TransactionManager::execute_in_transaction`. The difference
//! from that pattern is the after-commit queue: publishes to C3/C4 queued
//! during the closure only fire once `commit()` has actually returned
//! `Ok`, so a caller can never observe a publish for a transaction that
//! got rolled back.

use std::future::Future;
use std::pin::Pin;

use novel_core::error::NovelError;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A transaction scope handed to `with_tx` closures. Transactions obtained
/// from a `PgPool` own their pooled connection, so this carries no
/// borrowed lifetime back to the pool.
pub struct Tx {
    pub inner: Transaction<'static, Postgres>,
    after_commit: Vec<BoxFuture<'static, ()>>,
}

impl Tx {
    /// Queue a side-effect (an outbound C3/C4 publish, typically) to run
    /// strictly after this transaction commits. Never call this from a
    /// path that might still roll back — the whole point is that queued
    /// work only happens once the database state it depends on is durable.
    pub fn queue_after_commit<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.after_commit.push(Box::pin(fut));
    }

    /// Borrow the underlying connection the way repositories expect it:
    /// as a `sqlx::PgExecutor`.
    pub fn executor(&mut self) -> &mut sqlx::PgConnection {
        &mut self.inner
    }
}

/// Run `f` inside a transaction. On `Ok`, commits then flushes queued
/// after-commit side-effects (swallowing their individual failures — those
/// are the caller's concern via whatever publisher warned). On `Err`,
/// rolls back and returns the error untouched; queued side-effects are
/// dropped without running.
pub async fn with_tx<T, F>(pool: &PgPool, f: F) -> Result<T, NovelError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, Result<T, NovelError>>,
{
    let inner = pool
        .begin()
        .await
        .map_err(|e| NovelError::Transaction(e.to_string()))?;
    let mut ctx = Tx { inner, after_commit: Vec::new() };

    debug!("transaction opened");
    let outcome = f(&mut ctx).await;

    match outcome {
        Ok(value) => {
            ctx.inner
                .commit()
                .await
                .map_err(|e| NovelError::Transaction(e.to_string()))?;
            debug!("transaction committed");
            for fut in ctx.after_commit {
                fut.await;
            }
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "rolling back transaction");
            if let Err(rollback_err) = ctx.inner.rollback().await {
                error!(error = %rollback_err, "failed to roll back transaction");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    // `with_tx` needs a live Postgres connection to exercise end to end;
    // the ordering guarantee it provides (publish only after commit) is
    // covered at the call sites in novel-story/novel-game/novel-retry via
    // a mocked publisher, since those don't need a real pool.
}
