mod support;

use ormrepo::memory::MemoryDatabase;
use ormrepo::mock::{MockSessionFactory, SessionCall, SessionOp};
use ormrepo::{Patch, RepositoryError, UnitOfWork};
use std::time::Duration;
use support::{new_user, uow, user_repo};

/// Nested scopes map onto savepoints and only the root commits.
#[tokio::test]
async fn test_nested_scopes_use_savepoints() {
    let sessions = MockSessionFactory::new();
    let uow = UnitOfWork::new(sessions.clone());

    uow.run(|scope| async move {
        assert_eq!(scope.depth(), 0);
        scope
            .run(|inner| async move {
                assert_eq!(inner.depth(), 1);
                inner.run(|innermost| async move {
                    assert_eq!(innermost.depth(), 2);
                    Ok(())
                })
                .await
            })
            .await?;
        scope
            .run(|_| async { Err::<(), _>(RepositoryError::Backend("boom".into())) })
            .await
            .unwrap_err();
        Ok(())
    })
    .await
    .expect("Failed to run unit of work");

    assert_eq!(
        sessions.calls(),
        vec![
            SessionCall::Open,
            SessionCall::Begin,
            SessionCall::Savepoint("sp_1_1".into()),
            SessionCall::Savepoint("sp_2_2".into()),
            SessionCall::ReleaseSavepoint("sp_2_2".into()),
            SessionCall::ReleaseSavepoint("sp_1_1".into()),
            SessionCall::Savepoint("sp_1_3".into()),
            SessionCall::RollbackToSavepoint("sp_1_3".into()),
            SessionCall::Commit,
        ]
    );
    sessions.verify();
}

/// A failed commit is rolled back and reported.
#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let sessions = MockSessionFactory::new();
    sessions.fail_next(SessionOp::Commit, RepositoryError::Backend("disk full".into()));
    let uow = UnitOfWork::new(sessions.clone());

    let err = uow.run(|_| async { Ok(()) }).await.unwrap_err();
    assert_eq!(err, RepositoryError::Backend("disk full".into()));
    assert_eq!(
        sessions.ops(),
        vec![SessionOp::Open, SessionOp::Begin, SessionOp::Commit, SessionOp::Rollback]
    );
    sessions.verify();
}

/// The operation's error wins over a rollback error.
#[tokio::test]
async fn test_operation_error_survives_failed_rollback() {
    let sessions = MockSessionFactory::new();
    sessions.fail_next(SessionOp::Rollback, RepositoryError::Backend("gone".into()));
    let uow = UnitOfWork::new(sessions.clone());

    let err = uow
        .run(|_| async { Err::<(), _>(RepositoryError::Conflict { entity: "users", detail: "dup".into() }) })
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict { .. }));
    sessions.verify();
}

/// Handles kept past the end of their scope fail instead of touching the session.
#[tokio::test]
async fn test_handles_fail_after_scope_closes() {
    let db = MemoryDatabase::new();
    let uow = uow(&db);

    let leaked = uow
        .run(|scope| async move { Ok(scope.clone()) })
        .await
        .expect("Failed to run unit of work");
    assert!(!leaked.is_open());
    assert!(matches!(leaked.session().await, Err(RepositoryError::Scope(_))));
    assert!(matches!(leaked.begin().await, Err(RepositoryError::Scope(_))));

    let users = user_repo(&db);
    let err = users.create_in(&leaked, new_user("Ann", 30)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Scope(_)));
    assert_eq!(db.row_count("users"), 0);
}

/// Uncommitted writes are visible inside their own scope only.
#[tokio::test]
async fn test_scope_isolation() {
    let db = MemoryDatabase::new();
    let users = user_repo(&db);
    let uow = uow(&db);

    let writer = uow.begin().await.expect("Failed to begin scope");
    let handle = writer.handle();
    users
        .create_in(&handle, new_user("Bo", 40))
        .await
        .expect("Failed to create user");

    assert!(users.get_by_id_in(&handle, &1).await.expect("Failed to get").is_some());
    assert_eq!(users.get_by_id(&1).await.expect("Failed to get"), None);

    writer.commit().await.expect("Failed to commit");
    assert!(users.get_by_id(&1).await.expect("Failed to get").is_some());
}

/// An explicit rollback discards every write in the scope.
#[tokio::test]
async fn test_explicit_rollback() {
    let db = MemoryDatabase::new();
    let users = user_repo(&db);
    users.create(new_user("Cy", 20)).await.expect("Failed to create user");

    let scope = users.unit_of_work().begin().await.expect("Failed to begin scope");
    let handle = scope.handle();
    users
        .update_in(&handle, &1, Patch::new().set("age", 21))
        .await
        .expect("Failed to update user");
    users.create_in(&handle, new_user("Di", 22)).await.expect("Failed to create user");
    assert!(users.delete_in(&handle, &1).await.expect("Failed to delete user"));
    scope.rollback().await.expect("Failed to roll back");

    let cy = users.require_by_id(&1).await.expect("Failed to get user");
    assert_eq!(cy.age, 20);
    assert_eq!(db.row_count("users"), 1);
}

/// A root scope dropped unfinished aborts its session.
#[tokio::test]
async fn test_dropped_scope_aborts() {
    let sessions = MockSessionFactory::new();
    let uow = UnitOfWork::new(sessions.clone());

    let scope = uow.begin().await.expect("Failed to begin scope");
    let handle = scope.handle();
    drop(scope);

    assert!(!handle.is_open());
    assert_eq!(sessions.ops().last(), Some(&SessionOp::Abort));
}

/// A nested scope dropped unfinished is rolled back before the root commits.
#[tokio::test]
async fn test_dropped_nested_scope_rolls_back_its_savepoint() {
    let sessions = MockSessionFactory::new();
    let uow = UnitOfWork::new(sessions.clone());

    let root = uow.begin().await.expect("Failed to begin scope");
    let nested = root.handle().begin().await.expect("Failed to begin nested scope");
    let nested_handle = nested.handle();
    drop(nested);

    assert!(!nested_handle.is_open());
    assert!(root.handle().is_open());
    root.commit().await.expect("Failed to commit");

    assert_eq!(
        sessions.calls(),
        vec![
            SessionCall::Open,
            SessionCall::Begin,
            SessionCall::Savepoint("sp_1_1".into()),
            SessionCall::RollbackToSavepoint("sp_1_1".into()),
            SessionCall::Commit,
        ]
    );
}

/// Cancelling a nested unit discards its writes while the outer unit commits.
#[tokio::test]
async fn test_cancelled_nested_scope_discards_writes() {
    let db = MemoryDatabase::new();
    let users = user_repo(&db);
    let repo = &users;

    users
        .unit_of_work()
        .run(|scope| async move {
            repo.create_in(&scope, new_user("Kept", 30)).await?;
            let cancelled = tokio::time::timeout(
                Duration::from_millis(20),
                scope.run(|nested| async move {
                    repo.create_in(&nested, new_user("Ghost", 40)).await?;
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }),
            )
            .await;
            assert!(cancelled.is_err(), "the nested unit should have timed out");
            Ok(())
        })
        .await
        .expect("Failed to run unit of work");

    let rows = db.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Kept");
}
