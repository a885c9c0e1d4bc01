use dupguard_core::{
    ConnectionSource, CreationConfig, CreationError, CreationOutcome, CreationPhase,
    CreationRequest, DuplicateReason, LockStrategy, ProcessMutex, ResourceCreationService,
    Serializer, SqliteStore, TransactionScope,
};
use rusqlite::TransactionBehavior;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const STRATEGIES: [LockStrategy; 2] = [LockStrategy::StoreLock, LockStrategy::ProcessMutex];

fn setup(
    dir: &tempfile::TempDir,
    strategy: LockStrategy,
) -> (Arc<SqliteStore>, ResourceCreationService) {
    let config = CreationConfig {
        strategy,
        ..CreationConfig::default()
    };
    let store = Arc::new(
        SqliteStore::open(dir.path().join("resources.db"), config.lock_wait_timeout()).unwrap(),
    );
    let service = ResourceCreationService::from_config(store.clone(), &config);
    (store, service)
}

fn request(name: &str) -> CreationRequest {
    CreationRequest::new(name, format!("{name} content"))
}

#[test]
fn create_then_reject_same_name() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().unwrap();
        let (_store, service) = setup(&dir, strategy);

        let created = service.create(&request("item-0")).unwrap();
        let id = created.created_id().expect("first creation should succeed");

        let rejected = service.create(&request("item-0")).unwrap();
        assert_eq!(
            rejected,
            CreationOutcome::Rejected {
                name: "item-0".to_string(),
                reason: DuplicateReason::DuplicateName,
            }
        );

        let stored = service.get_resource(id).unwrap().unwrap();
        assert_eq!(stored.name, "item-0");
        assert_eq!(stored.content, "item-0 content");
        assert_eq!(service.count_resources().unwrap(), 1);
    }
}

#[test]
fn two_racing_creators_of_one_name_yield_one_created_one_rejected() {
    for strategy in STRATEGIES {
        for _ in 0..5 {
            let dir = tempfile::tempdir().unwrap();
            let (_store, service) = setup(&dir, strategy);
            let service = Arc::new(service);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let service = Arc::clone(&service);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        service.create(&request("race")).unwrap()
                    })
                })
                .collect();
            let outcomes: Vec<CreationOutcome> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            let created = outcomes.iter().filter(|o| o.is_created()).count();
            assert_eq!(created, 1, "strategy {strategy:?}: {outcomes:?}");
            assert_eq!(service.count_resources().unwrap(), 1);
        }
    }
}

#[test]
fn five_concurrent_creators_of_race_produce_exactly_one_resource() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().unwrap();
        let (_store, service) = setup(&dir, strategy);
        let service = Arc::new(service);
        let barrier = Arc::new(Barrier::new(5));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    service.create(&request("race")).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<CreationOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_created()).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| !o.is_created()).count(), 4);
        assert!(service.exists_by_name("race").unwrap());
        assert_eq!(service.count_resources().unwrap(), 1);
    }
}

#[test]
fn existing_name_is_always_rejected_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, service) = setup(&dir, LockStrategy::StoreLock);
    service.create(&request("taken")).unwrap();
    let service = Arc::new(service);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.create(&request("taken")).unwrap())
        })
        .collect();

    for handle in handles {
        assert!(!handle.join().unwrap().is_created());
    }
    assert_eq!(service.count_resources().unwrap(), 1);
}

#[test]
fn distinct_names_all_succeed_with_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, service) = setup(&dir, LockStrategy::StoreLock);

    let ids: HashSet<_> = (0..10)
        .map(|i| {
            service
                .create(&request(&format!("item-{i}")))
                .unwrap()
                .created_id()
                .unwrap()
        })
        .collect();

    assert_eq!(ids.len(), 10);
    let names: Vec<String> = service
        .list_resources()
        .unwrap()
        .into_iter()
        .map(|resource| resource.name)
        .collect();
    assert_eq!(names.len(), 10);
    assert_eq!(names[0], "item-0");
}

#[test]
fn held_store_lock_fails_with_lock_timeout_instead_of_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let config = CreationConfig {
        lock_wait_timeout_ms: 50,
        ..CreationConfig::default()
    };
    let store = Arc::new(
        SqliteStore::open(dir.path().join("resources.db"), config.lock_wait_timeout()).unwrap(),
    );
    let service = ResourceCreationService::from_config(store.clone(), &config);

    let blocker = store.connect().unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = service.create(&request("blocked")).unwrap_err();
    assert!(err.is_lock_timeout(), "unexpected error: {err}");
    assert!(matches!(
        err,
        CreationError::Store {
            phase: CreationPhase::Begin,
            ..
        }
    ));

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert!(service.create(&request("blocked")).unwrap().is_created());
}

#[test]
fn joined_creation_commits_or_rolls_back_with_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let (store, service) = setup(&dir, LockStrategy::StoreLock);

    let mut conn = store.connect().unwrap();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .unwrap();
    let outcome = service
        .create_in(TransactionScope::Joined(&tx), &request("joined-rolled-back"))
        .unwrap();
    assert!(outcome.is_created());
    tx.rollback().unwrap();
    assert!(!service.exists_by_name("joined-rolled-back").unwrap());

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .unwrap();
    service
        .create_in(TransactionScope::Joined(&tx), &request("joined-committed"))
        .unwrap();
    let duplicate = service
        .create_in(TransactionScope::Joined(&tx), &request("joined-committed"))
        .unwrap();
    assert!(!duplicate.is_created());
    tx.commit().unwrap();

    assert!(service.exists_by_name("joined-committed").unwrap());
    assert_eq!(service.count_resources().unwrap(), 1);
}

#[test]
fn joined_creation_with_process_mutex_is_refused_before_touching_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let (store, service) = setup(&dir, LockStrategy::ProcessMutex);

    let mut conn = store.connect().unwrap();
    let tx = conn.transaction().unwrap();
    let err = service
        .create_in(TransactionScope::Joined(&tx), &request("joined"))
        .unwrap_err();
    assert!(matches!(err, CreationError::LockOrderViolation));
    tx.commit().unwrap();

    assert_eq!(service.count_resources().unwrap(), 0);
}

#[test]
fn services_built_separately_share_the_process_mutex() {
    for _ in 0..10 {
        let dir = tempfile::tempdir().unwrap();
        let config = CreationConfig {
            strategy: LockStrategy::ProcessMutex,
            ..CreationConfig::default()
        };
        let store = Arc::new(
            SqliteStore::open(dir.path().join("resources.db"), config.lock_wait_timeout())
                .unwrap(),
        );
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = ResourceCreationService::from_config(store.clone(), &config);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    service.create(&request("race"))
                })
            })
            .collect();
        let outcomes: Vec<CreationOutcome> = handles
            .into_iter()
            .map(|h| h.join().unwrap().expect("no store error expected"))
            .collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_created()).count(), 1);
        assert!(outcomes.contains(&CreationOutcome::Rejected {
            name: "race".to_string(),
            reason: DuplicateReason::DuplicateName,
        }));
    }
}

#[test]
fn held_process_mutex_fails_with_lock_timeout_instead_of_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let config = CreationConfig {
        strategy: LockStrategy::ProcessMutex,
        lock_wait_timeout_ms: 50,
        ..CreationConfig::default()
    };
    let store = Arc::new(
        SqliteStore::open(dir.path().join("resources.db"), config.lock_wait_timeout()).unwrap(),
    );
    let service = ResourceCreationService::from_config(store.clone(), &config);

    let holder = ProcessMutex::new(Duration::from_secs(5));
    let permit = holder.acquire().unwrap();
    let err = service.create(&request("blocked")).unwrap_err();
    drop(permit);

    assert!(matches!(err, CreationError::SerializerTimeout(_)));
    assert!(err.is_lock_timeout());
    assert_eq!(err.code(), "lock_wait_timeout");
    assert_eq!(service.count_resources().unwrap(), 0);

    let patient = ResourceCreationService::from_config(
        store,
        &CreationConfig {
            strategy: LockStrategy::ProcessMutex,
            ..CreationConfig::default()
        },
    );
    assert!(patient.create(&request("blocked")).unwrap().is_created());
}

#[test]
fn failed_insert_is_a_store_error_and_leaves_no_row() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().unwrap();
        let (store, service) = setup(&dir, strategy);
        service.create(&request("kept")).unwrap();

        store
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_blocked BEFORE INSERT ON resources
                 WHEN NEW.name = 'blocked'
                 BEGIN
                     SELECT RAISE(ABORT, 'blocked name');
                 END;",
            )
            .unwrap();

        let err = service.create(&request("blocked")).unwrap_err();
        assert!(
            matches!(
                err,
                CreationError::Store {
                    phase: CreationPhase::Insert,
                    ..
                }
            ),
            "strategy {strategy:?}: {err}"
        );
        assert_eq!(err.code(), "store_failure");
        assert!(!err.is_lock_timeout());

        assert!(!service.exists_by_name("blocked").unwrap());
        assert_eq!(service.count_resources().unwrap(), 1);
        assert!(service.create(&request("other")).unwrap().is_created());
    }
}
