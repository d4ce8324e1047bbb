//! # Test Doubles
//!
//! Two doubles for testing code that sits on top of repositories without a
//! store behind it:
//!
//! - [`MockSessionFactory`] records every session call in order and can inject a
//!   failure into the next call of a given kind.
//! - [`MockAdapter`] answers adapter calls from a queue of expectations, in the
//!   order they were declared.
//!
//! | | MockAdapter | MemoryDatabase |
//! |---|---|---|
//! | **State** | None, answers are scripted | Real rows, transactions |
//! | **Determinism** | Fully scripted | Deterministic per test |
//! | **Error injection** | `return_err` on any call | Constraint violations only |
//! | **Use case** | Logic *around* the repository | Repository behaviour end to end |
//!
//! ## Example
//!
//! ```rust
//! use ormrepo::mock::{MockAdapter, MockSessionFactory, SessionOp};
//! use ormrepo::{Entity, RepositoryError, UnitOfWork};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Tag { id: Option<i64>, label: String }
//!
//! impl Entity for Tag {
//!     type Id = i64;
//!     const TABLE: &'static str = "tags";
//!     const PRIMARY_KEY: &'static [&'static str] = &["id"];
//!     const COLUMNS: &'static [&'static str] = &["id", "label"];
//!     fn id(&self) -> Option<i64> { self.id }
//!     fn assign_id(&mut self, id: i64) { self.id = Some(id); }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     use ormrepo::EntityAdapter;
//!
//!     let sessions = MockSessionFactory::new();
//!     let adapter = MockAdapter::<Tag>::new();
//!     adapter.expect_get(1).return_err(RepositoryError::Backend("timeout".into()));
//!
//!     let uow = UnitOfWork::new(sessions.clone());
//!     let result = uow.run(|scope| async move { adapter.get(&scope, &1).await }).await;
//!
//!     assert!(matches!(result, Err(RepositoryError::Backend(_))));
//!     assert_eq!(sessions.ops().last(), Some(&SessionOp::Rollback));
//! }
//! ```

use crate::entity::{Entity, EntityAdapter, Fields};
use crate::error::{RepositoryError, RepositoryResult};
use crate::query::QuerySpec;
use crate::session::{ScopeHandle, Session, SessionFactory};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Kind of a recorded session call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Open,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    ReleaseSavepoint,
    RollbackToSavepoint,
    Abort,
}

/// A recorded session call, with the savepoint name where there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Open,
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
    Abort,
}

impl SessionCall {
    pub fn op(&self) -> SessionOp {
        match self {
            SessionCall::Open => SessionOp::Open,
            SessionCall::Begin => SessionOp::Begin,
            SessionCall::Commit => SessionOp::Commit,
            SessionCall::Rollback => SessionOp::Rollback,
            SessionCall::Savepoint(_) => SessionOp::Savepoint,
            SessionCall::ReleaseSavepoint(_) => SessionOp::ReleaseSavepoint,
            SessionCall::RollbackToSavepoint(_) => SessionOp::RollbackToSavepoint,
            SessionCall::Abort => SessionOp::Abort,
        }
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<SessionCall>>,
    failures: Mutex<VecDeque<(SessionOp, RepositoryError)>>,
}

impl Recorder {
    fn record(&self, call: SessionCall) -> RepositoryResult<()> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);
        let mut failures = self.failures.lock().unwrap();
        match failures.iter().position(|(kind, _)| *kind == op) {
            Some(index) => match failures.remove(index) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

/// Session factory that records calls instead of talking to a store.
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    recorder: Arc<Recorder>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of kind `op` fail with `error` (after recording it).
    pub fn fail_next(&self, op: SessionOp, error: RepositoryError) {
        self.recorder
            .failures
            .lock()
            .unwrap()
            .push_back((op, error));
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.recorder.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<SessionOp> {
        self.calls().iter().map(SessionCall::op).collect()
    }

    pub fn clear(&self) {
        self.recorder.calls.lock().unwrap().clear();
    }

    /// Panics if an injected failure was never triggered.
    pub fn verify(&self) {
        let failures = self.recorder.failures.lock().unwrap();
        if !failures.is_empty() {
            panic!(
                "Not all injected failures were triggered. {} remaining",
                failures.len()
            );
        }
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn open(&self) -> RepositoryResult<MockSession> {
        self.recorder.record(SessionCall::Open)?;
        Ok(MockSession {
            recorder: self.recorder.clone(),
        })
    }
}

pub struct MockSession {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Session for MockSession {
    async fn begin(&mut self) -> RepositoryResult<()> {
        self.recorder.record(SessionCall::Begin)
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        self.recorder.record(SessionCall::Commit)
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        self.recorder.record(SessionCall::Rollback)
    }

    async fn savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        self.recorder.record(SessionCall::Savepoint(name.to_string()))
    }

    async fn release_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        self.recorder
            .record(SessionCall::ReleaseSavepoint(name.to_string()))
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        self.recorder
            .record(SessionCall::RollbackToSavepoint(name.to_string()))
    }

    fn abort(&mut self) {
        let _ = self.recorder.record(SessionCall::Abort);
    }
}

enum Expectation<E: Entity> {
    Execute(RepositoryResult<Vec<E>>),
    Count(RepositoryResult<u64>),
    Get { id: E::Id, response: RepositoryResult<Option<E>> },
    Insert(RepositoryResult<E>),
    ApplyPatch(RepositoryResult<E>),
    Remove(RepositoryResult<()>),
}

impl<E: Entity> Expectation<E> {
    fn name(&self) -> &'static str {
        match self {
            Expectation::Execute(_) => "execute",
            Expectation::Count(_) => "count",
            Expectation::Get { .. } => "get",
            Expectation::Insert(_) => "insert",
            Expectation::ApplyPatch(_) => "apply_patch",
            Expectation::Remove(_) => "remove",
        }
    }
}

type Queue<E> = Arc<Mutex<VecDeque<Expectation<E>>>>;

/// Entity adapter scripted with expectations.
///
/// Every call still acquires the scope's session, so calls through a closed
/// scope fail exactly like they would against a real adapter.
pub struct MockAdapter<E: Entity> {
    expectations: Queue<E>,
    specs: Arc<Mutex<Vec<QuerySpec>>>,
}

impl<E: Entity> Clone for MockAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            expectations: self.expectations.clone(),
            specs: self.specs.clone(),
        }
    }
}

impl<E: Entity> Default for MockAdapter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> MockAdapter<E> {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            specs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect_execute(&self) -> ExpectationBuilder<E, Vec<E>> {
        ExpectationBuilder::new(self.expectations.clone(), Expectation::Execute)
    }

    pub fn expect_count(&self) -> ExpectationBuilder<E, u64> {
        ExpectationBuilder::new(self.expectations.clone(), Expectation::Count)
    }

    /// Expects a `get` for exactly `id`.
    pub fn expect_get(&self, id: E::Id) -> ExpectationBuilder<E, Option<E>> {
        ExpectationBuilder::new(self.expectations.clone(), move |response| {
            Expectation::Get { id, response }
        })
    }

    pub fn expect_insert(&self) -> ExpectationBuilder<E, E> {
        ExpectationBuilder::new(self.expectations.clone(), Expectation::Insert)
    }

    pub fn expect_apply_patch(&self) -> ExpectationBuilder<E, E> {
        ExpectationBuilder::new(self.expectations.clone(), Expectation::ApplyPatch)
    }

    pub fn expect_remove(&self) -> ExpectationBuilder<E, ()> {
        ExpectationBuilder::new(self.expectations.clone(), Expectation::Remove)
    }

    /// Specifications received by `execute` and `count`, in call order.
    pub fn received_specs(&self) -> Vec<QuerySpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let exps = self.expectations.lock().unwrap();
        if !exps.is_empty() {
            let pending: Vec<&str> = exps.iter().map(Expectation::name).collect();
            panic!(
                "Not all expectations were met. {} remaining: {:?}",
                exps.len(),
                pending
            );
        }
    }

    fn next(&self, call: &str) -> Expectation<E> {
        match self.expectations.lock().unwrap().pop_front() {
            Some(expectation) => expectation,
            None => panic!("Unexpected {call} call on {} adapter", E::TABLE),
        }
    }
}

/// Builder returned by the `expect_*` methods.
pub struct ExpectationBuilder<E: Entity, R> {
    expectations: Queue<E>,
    make: Box<dyn FnOnce(RepositoryResult<R>) -> Expectation<E> + Send>,
}

impl<E: Entity, R> ExpectationBuilder<E, R> {
    fn new<F>(expectations: Queue<E>, make: F) -> Self
    where
        F: FnOnce(RepositoryResult<R>) -> Expectation<E> + Send + 'static,
    {
        Self {
            expectations,
            make: Box::new(make),
        }
    }

    /// Sets the expectation to return a successful result.
    pub fn return_ok(self, value: R) {
        let expectation = (self.make)(Ok(value));
        self.expectations.lock().unwrap().push_back(expectation);
    }

    /// Sets the expectation to return an error.
    pub fn return_err(self, error: RepositoryError) {
        let expectation = (self.make)(Err(error));
        self.expectations.lock().unwrap().push_back(expectation);
    }
}

#[async_trait]
impl<E: Entity> EntityAdapter<E> for MockAdapter<E> {
    type Session = MockSession;

    async fn execute(
        &self,
        scope: &ScopeHandle<MockSession>,
        spec: &QuerySpec,
    ) -> RepositoryResult<Vec<E>> {
        drop(scope.session().await?);
        self.specs.lock().unwrap().push(spec.clone());
        match self.next("execute") {
            Expectation::Execute(response) => response,
            other => panic!("Expected {} call, got execute", other.name()),
        }
    }

    async fn count(&self, scope: &ScopeHandle<MockSession>, spec: &QuerySpec) -> RepositoryResult<u64> {
        drop(scope.session().await?);
        self.specs.lock().unwrap().push(spec.clone());
        match self.next("count") {
            Expectation::Count(response) => response,
            other => panic!("Expected {} call, got count", other.name()),
        }
    }

    async fn get(&self, scope: &ScopeHandle<MockSession>, id: &E::Id) -> RepositoryResult<Option<E>> {
        drop(scope.session().await?);
        match self.next("get") {
            Expectation::Get { id: expected, response } => {
                assert_eq!(&expected, id, "get called with an unexpected id");
                response
            }
            other => panic!("Expected {} call, got get", other.name()),
        }
    }

    async fn insert(&self, scope: &ScopeHandle<MockSession>, _entity: E) -> RepositoryResult<E> {
        drop(scope.session().await?);
        match self.next("insert") {
            Expectation::Insert(response) => response,
            other => panic!("Expected {} call, got insert", other.name()),
        }
    }

    async fn apply_patch(
        &self,
        scope: &ScopeHandle<MockSession>,
        _entity: E,
        _fields: &Fields,
    ) -> RepositoryResult<E> {
        drop(scope.session().await?);
        match self.next("apply_patch") {
            Expectation::ApplyPatch(response) => response,
            other => panic!("Expected {} call, got apply_patch", other.name()),
        }
    }

    async fn remove(&self, scope: &ScopeHandle<MockSession>, _entity: &E) -> RepositoryResult<()> {
        drop(scope.session().await?);
        match self.next("remove") {
            Expectation::Remove(response) => response,
            other => panic!("Expected {} call, got remove", other.name()),
        }
    }
}
