//! # Unit of Work
//!
//! A [`UnitOfWork`] opens scoped transactions over sessions produced by a
//! [`SessionFactory`]. Every repository operation runs inside exactly one
//! [`Scope`]: it commits when the operation returns `Ok` and rolls back when it
//! returns `Err`, before the error reaches the caller.
//!
//! ## Nesting
//!
//! Calling [`ScopeHandle::begin`] while a scope is open does not open a second
//! transaction. The nested scope shares its parent's session and is bracketed by
//! a savepoint:
//!
//! | Depth | begin | commit | rollback |
//! |-------|-------|--------|----------|
//! | 0 | `BEGIN` | `COMMIT` | `ROLLBACK` |
//! | n > 0 | `SAVEPOINT sp` | `RELEASE sp` | `ROLLBACK TO sp` |
//!
//! Only depth zero ever commits the physical transaction, so a nested failure
//! undoes the nested work while the outer scope still decides the final outcome.
//!
//! ## Closing
//!
//! A scope is closed on every path. Handles cloned out of it fail with
//! [`RepositoryError::Scope`] afterwards. A root scope dropped before it finished
//! (the owning future was cancelled, or a panic unwound through it) aborts its
//! session synchronously, which discards the transaction.
//!
//! A nested scope dropped before it finished cannot await its rollback. Its
//! savepoint is queued instead and rolled back the next time the session is
//! locked, which always happens before the root commits. Cancelled nested work
//! therefore never reaches the store.

use crate::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// One connection-level transaction context, as provided by the delegate store.
#[async_trait]
pub trait Session: Send + 'static {
    async fn begin(&mut self) -> RepositoryResult<()>;

    async fn commit(&mut self) -> RepositoryResult<()>;

    async fn rollback(&mut self) -> RepositoryResult<()>;

    async fn savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    async fn release_savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    /// Discards the open transaction without awaiting. Called when a scope is
    /// dropped before it finished.
    fn abort(&mut self) {}
}

/// Borrows sessions from the store's pool.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    async fn open(&self) -> RepositoryResult<Self::Session>;
}

/// Opens root scopes. Cheap to clone; repositories each hold one.
pub struct UnitOfWork<S: Session> {
    factory: Arc<dyn SessionFactory<Session = S>>,
}

impl<S: Session> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<S: Session> UnitOfWork<S> {
    pub fn new<F>(factory: F) -> Self
    where
        F: SessionFactory<Session = S>,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Opens a session and starts a transaction on it.
    pub async fn begin(&self) -> RepositoryResult<Scope<S>> {
        let mut session = self.factory.open().await?;
        session.begin().await?;

        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(scope = id, "Unit of work opened");
        Ok(Scope::root(id, session))
    }

    /// Runs `op` in a fresh root scope. See [`Scope::run`].
    pub async fn run<T, F, Fut>(&self, op: F) -> RepositoryResult<T>
    where
        F: FnOnce(ScopeHandle<S>) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.begin().await?.run(op).await
    }
}

struct ScopeState<S> {
    id: u64,
    session: Mutex<S>,
    closed: AtomicBool,
    savepoints: AtomicU64,
    /// Savepoints of nested scopes dropped unfinished, with their sequence number.
    abandoned: std::sync::Mutex<Vec<(u64, String)>>,
}

impl<S: Session> ScopeState<S> {
    fn abandon(&self, savepoint: &str) {
        let n = savepoint
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(u64::MAX);
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((n, savepoint.to_string()));
    }

    /// Rolls back to the oldest abandoned savepoint, which also undoes every
    /// younger one.
    async fn discard_abandoned(&self, session: &mut S) -> RepositoryResult<()> {
        let oldest = {
            let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
            let oldest = abandoned.iter().min_by_key(|(n, _)| *n).map(|(_, name)| name.clone());
            abandoned.clear();
            oldest
        };
        if let Some(name) = oldest {
            warn!(scope = self.id, savepoint = %name, "Rolling back abandoned nested scope");
            session.rollback_to_savepoint(&name).await?;
        }
        Ok(())
    }
}

/// Cloneable access to an open scope's session.
pub struct ScopeHandle<S: Session> {
    state: Arc<ScopeState<S>>,
    closed: Arc<AtomicBool>,
    depth: u32,
}

impl<S: Session> Clone for ScopeHandle<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            closed: self.closed.clone(),
            depth: self.depth,
        }
    }
}

impl<S: Session> std::fmt::Debug for ScopeHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.state.id)
            .field("depth", &self.depth)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<S: Session> ScopeHandle<S> {
    /// Id shared by the root scope and everything nested in it.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.state.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RepositoryError::Scope(format!(
                "scope {} (depth {}) is closed",
                self.state.id, self.depth
            )))
        }
    }

    /// Locks the session for one adapter call.
    pub async fn session(&self) -> RepositoryResult<MutexGuard<'_, S>> {
        self.ensure_open()?;
        let mut guard = self.state.session.lock().await;
        // The scope may have closed while we waited for the lock.
        self.ensure_open()?;
        self.state.discard_abandoned(&mut guard).await?;
        Ok(guard)
    }

    /// Opens a nested scope bracketed by a savepoint on this scope's session.
    pub async fn begin(&self) -> RepositoryResult<Scope<S>> {
        let n = self.state.savepoints.fetch_add(1, Ordering::Relaxed) + 1;
        let depth = self.depth + 1;
        let name = format!("sp_{depth}_{n}");
        self.session().await?.savepoint(&name).await?;

        debug!(scope = self.state.id, depth, savepoint = %name, "Nested scope opened");
        Ok(Scope {
            handle: ScopeHandle {
                state: self.state.clone(),
                closed: Arc::new(AtomicBool::new(false)),
                depth,
            },
            savepoint: Some(name),
            finished: false,
        })
    }

    /// Runs `op` in a nested scope. See [`Scope::run`].
    pub async fn run<T, F, Fut>(&self, op: F) -> RepositoryResult<T>
    where
        F: FnOnce(ScopeHandle<S>) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.begin().await?.run(op).await
    }
}

/// An open transaction (depth 0) or savepoint (depth > 0).
///
/// Consumed by [`run`](Scope::run), [`commit`](Scope::commit) or
/// [`rollback`](Scope::rollback), so a scope finishes at most once.
pub struct Scope<S: Session> {
    handle: ScopeHandle<S>,
    savepoint: Option<String>,
    finished: bool,
}

impl<S: Session> Scope<S> {
    fn root(id: u64, session: S) -> Self {
        Self {
            handle: ScopeHandle {
                state: Arc::new(ScopeState {
                    id,
                    session: Mutex::new(session),
                    closed: AtomicBool::new(false),
                    savepoints: AtomicU64::new(0),
                    abandoned: std::sync::Mutex::new(Vec::new()),
                }),
                closed: Arc::new(AtomicBool::new(false)),
                depth: 0,
            },
            savepoint: None,
            finished: false,
        }
    }

    pub fn handle(&self) -> ScopeHandle<S> {
        self.handle.clone()
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn depth(&self) -> u32 {
        self.handle.depth
    }

    /// Runs `op` with a handle to this scope, then commits on `Ok` or rolls back
    /// on `Err`. The error `op` returned is what the caller sees, even when the
    /// rollback fails as well.
    pub async fn run<T, F, Fut>(mut self, op: F) -> RepositoryResult<T>
    where
        F: FnOnce(ScopeHandle<S>) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        match op(self.handle.clone()).await {
            Ok(value) => {
                self.finish_commit().await?;
                Ok(value)
            }
            Err(err) => {
                debug!(scope = self.id(), depth = self.depth(), error = %err, "Operation failed, rolling back");
                if let Err(rollback_err) = self.finish_rollback().await {
                    warn!(scope = self.id(), depth = self.depth(), error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    pub async fn commit(mut self) -> RepositoryResult<()> {
        self.finish_commit().await
    }

    pub async fn rollback(mut self) -> RepositoryResult<()> {
        self.finish_rollback().await
    }

    async fn finish_commit(&mut self) -> RepositoryResult<()> {
        let scope = self.id();
        let mut session = self.handle.session().await?;
        let result = match &self.savepoint {
            None => match session.commit().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(scope, error = %err, "Commit failed, rolling back");
                    if let Err(rollback_err) = session.rollback().await {
                        warn!(scope, error = %rollback_err, "Rollback after failed commit failed");
                    }
                    Err(err)
                }
            },
            Some(name) => match session.release_savepoint(name).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    if let Err(rollback_err) = session.rollback_to_savepoint(name).await {
                        warn!(scope, savepoint = %name, error = %rollback_err, "Rollback to savepoint failed");
                    }
                    Err(err)
                }
            },
        };
        drop(session);
        self.close();
        if result.is_ok() {
            debug!(scope, depth = self.depth(), "Scope committed");
        }
        result
    }

    async fn finish_rollback(&mut self) -> RepositoryResult<()> {
        let mut session = self.handle.session().await?;
        let result = match &self.savepoint {
            None => session.rollback().await,
            Some(name) => session.rollback_to_savepoint(name).await,
        };
        drop(session);
        self.close();
        debug!(scope = self.id(), depth = self.depth(), "Scope rolled back");
        result
    }

    fn close(&mut self) {
        self.finished = true;
        self.handle.closed.store(true, Ordering::Release);
        if self.handle.depth == 0 {
            self.handle.state.closed.store(true, Ordering::Release);
        }
    }
}

impl<S: Session> Drop for Scope<S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let scope = self.id();
        let depth = self.depth();
        self.close();
        if depth == 0 {
            match self.handle.state.session.try_lock() {
                Ok(mut session) => session.abort(),
                Err(_) => debug!(scope, "Session busy while dropping scope"),
            }
            warn!(scope, "Scope dropped before finishing, transaction aborted");
        } else if let Some(name) = &self.savepoint {
            self.handle.state.abandon(name);
            debug!(scope, depth, savepoint = %name, "Nested scope dropped before finishing, rollback queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSessionFactory, SessionCall, SessionOp};

    #[tokio::test]
    async fn test_ok_commits_and_err_rolls_back() {
        let factory = MockSessionFactory::new();
        let uow = UnitOfWork::new(factory.clone());

        let value = uow.run(|_| async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(
            factory.ops(),
            vec![SessionOp::Open, SessionOp::Begin, SessionOp::Commit]
        );

        factory.clear();
        let err = uow
            .run(|_| async { Err::<(), _>(RepositoryError::Backend("boom".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::Backend("boom".into()));
        assert_eq!(
            factory.ops(),
            vec![SessionOp::Open, SessionOp::Begin, SessionOp::Rollback]
        );
    }

    #[tokio::test]
    async fn test_nested_scope_uses_savepoints() {
        let factory = MockSessionFactory::new();
        let uow = UnitOfWork::new(factory.clone());

        uow.run(|outer| async move {
            outer.run(|_| async { Ok(()) }).await?;
            let failed = outer
                .run(|inner| async move {
                    assert_eq!(inner.depth(), 1);
                    Err::<(), _>(RepositoryError::Backend("inner".into()))
                })
                .await;
            assert!(failed.is_err());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(
            factory.calls(),
            vec![
                SessionCall::Open,
                SessionCall::Begin,
                SessionCall::Savepoint("sp_1_1".into()),
                SessionCall::ReleaseSavepoint("sp_1_1".into()),
                SessionCall::Savepoint("sp_1_2".into()),
                SessionCall::RollbackToSavepoint("sp_1_2".into()),
                SessionCall::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_fails_after_close() {
        let uow = UnitOfWork::new(MockSessionFactory::new());
        let leaked = uow.run(|scope| async move { Ok(scope) }).await.unwrap();

        assert!(!leaked.is_open());
        assert!(matches!(leaked.session().await, Err(RepositoryError::Scope(_))));
        assert!(leaked.begin().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_and_surfaces() {
        let factory = MockSessionFactory::new();
        factory.fail_next(SessionOp::Commit, RepositoryError::Backend("disk full".into()));
        let uow = UnitOfWork::new(factory.clone());

        let err = uow.run(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err, RepositoryError::Backend("disk full".into()));
        assert_eq!(
            factory.ops(),
            vec![
                SessionOp::Open,
                SessionOp::Begin,
                SessionOp::Commit,
                SessionOp::Rollback
            ]
        );
        factory.verify();
    }

    #[tokio::test]
    async fn test_dropped_scope_aborts() {
        let factory = MockSessionFactory::new();
        let uow = UnitOfWork::new(factory.clone());

        let scope = uow.begin().await.unwrap();
        let handle = scope.handle();
        drop(scope);

        assert!(!handle.is_open());
        assert_eq!(factory.ops().last(), Some(&SessionOp::Abort));
    }
}
