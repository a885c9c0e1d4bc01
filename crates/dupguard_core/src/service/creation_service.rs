//! Single resource creation with a duplicate-name check.
//!
//! # Responsibility
//! - Run check-then-insert for one request inside an explicit scope.
//! - Own the lock acquisition order between the serializer and the store.
//!
//! # Invariants
//! - Serializer permit first, store transaction second; the permit is
//!   dropped only after the transaction committed or rolled back.
//! - A duplicate name is an `Ok(CreationOutcome::Rejected)`, never an error.
//! - A rejection never leaves a partial write behind.
//! - `Joined` scopes are refused when the serializer is process-global.

use crate::config::CreationConfig;
use crate::db::transaction::{run_in_scope, Completion, LockMode, ScopeError, TransactionScope};
use crate::db::{ConnectionSource, DbError};
use crate::model::outcome::{CreationOutcome, DuplicateReason};
use crate::model::resource::{CreationRequest, Resource, ResourceId};
use crate::repo::resource_repo::{RepoError, ResourceRepository, SqliteResourceRepository};
use crate::sync::serializer::{Serializer, SerializerError};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

pub type CreationResult<T> = Result<T, CreationError>;

/// Step of the creation state machine at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Begin,
    Lookup,
    Insert,
    Commit,
    Rollback,
    Read,
}

impl CreationPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Lookup => "lookup",
            Self::Insert => "insert",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Read => "read",
        }
    }
}

/// Infrastructure failure of a creation call.
///
/// Distinct from `CreationOutcome::Rejected`: callers can always tell a
/// store problem apart from a business rejection.
#[derive(Debug)]
pub enum CreationError {
    /// No connection to the store could be opened.
    Unavailable(DbError),
    Store {
        phase: CreationPhase,
        source: RepoError,
    },
    /// The process-wide creation lock was not granted in time.
    SerializerTimeout(SerializerError),
    /// `TransactionScope::Joined` on a connection without an open transaction.
    NoActiveTransaction,
    /// `Joined` scope with a process-global serializer: the caller's
    /// transaction would be open before the mutex is taken.
    LockOrderViolation,
}

impl CreationError {
    /// Returns whether the call failed because a lock wait ran out.
    pub fn is_lock_timeout(&self) -> bool {
        match self {
            Self::SerializerTimeout(_) => true,
            Self::Unavailable(err) => err.is_busy(),
            Self::Store { source, .. } => source.is_busy(),
            Self::NoActiveTransaction | Self::LockOrderViolation => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "store_unavailable",
            Self::Store { .. } if self.is_lock_timeout() => "lock_wait_timeout",
            Self::Store { .. } => "store_failure",
            Self::SerializerTimeout(_) => "lock_wait_timeout",
            Self::NoActiveTransaction => "no_active_transaction",
            Self::LockOrderViolation => "lock_order_violation",
        }
    }

    fn from_scope(value: ScopeError<CreationError>) -> Self {
        match value {
            ScopeError::Connect(err) => Self::Unavailable(err),
            ScopeError::Begin(err) => Self::Store {
                phase: CreationPhase::Begin,
                source: err.into(),
            },
            ScopeError::NoActiveTransaction => Self::NoActiveTransaction,
            ScopeError::Body(err) => err,
            ScopeError::Commit(err) => Self::Store {
                phase: CreationPhase::Commit,
                source: err.into(),
            },
            ScopeError::Rollback(err) => Self::Store {
                phase: CreationPhase::Rollback,
                source: err.into(),
            },
        }
    }
}

impl Display for CreationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(err) => write!(f, "resource store unavailable: {err}"),
            Self::Store { phase, source } => {
                write!(f, "resource store failed during {}: {source}", phase.label())
            }
            Self::SerializerTimeout(err) => write!(f, "{err}"),
            Self::NoActiveTransaction => {
                write!(f, "joined creation requires an open caller transaction")
            }
            Self::LockOrderViolation => write!(
                f,
                "joined creation cannot take the process creation lock inside an open transaction"
            ),
        }
    }
}

impl Error for CreationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable(err) => Some(err),
            Self::Store { source, .. } => Some(source),
            Self::SerializerTimeout(err) => Some(err),
            Self::NoActiveTransaction | Self::LockOrderViolation => None,
        }
    }
}

/// Creates one resource per call, refusing duplicate names.
pub struct ResourceCreationService {
    source: Arc<dyn ConnectionSource>,
    serializer: Arc<dyn Serializer>,
    lock_mode: LockMode,
}

impl ResourceCreationService {
    /// Creates a service from explicit collaborators.
    ///
    /// Pairing `NoopSerializer` with `LockMode::Deferred` leaves nothing
    /// excluding concurrent creators; use `from_config` unless a test needs
    /// that.
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        serializer: Arc<dyn Serializer>,
        lock_mode: LockMode,
    ) -> Self {
        Self {
            source,
            serializer,
            lock_mode,
        }
    }

    /// Creates a service using the strategy and lock-wait bound in `config`.
    pub fn from_config(source: Arc<dyn ConnectionSource>, config: &CreationConfig) -> Self {
        Self::new(
            source,
            config.strategy.serializer(config.lock_wait_timeout()),
            config.strategy.lock_mode(),
        )
    }

    /// Creates one resource in its own, independent transaction.
    pub fn create(&self, request: &CreationRequest) -> CreationResult<CreationOutcome> {
        self.create_in(TransactionScope::New, request)
    }

    /// Creates one resource inside the given transaction scope.
    ///
    /// # Errors
    /// - `LockOrderViolation` for `Joined` with a process-global serializer.
    /// - `NoActiveTransaction` for `Joined` on an autocommit connection.
    /// - Store failures of any phase, including lock-wait timeouts.
    pub fn create_in(
        &self,
        scope: TransactionScope<'_>,
        request: &CreationRequest,
    ) -> CreationResult<CreationOutcome> {
        let started_at = Instant::now();
        if matches!(scope, TransactionScope::Joined(_)) && self.serializer.is_global() {
            warn!(
                "event=resource_create module=service status=error scope=joined error_code=lock_order_violation"
            );
            return Err(CreationError::LockOrderViolation);
        }

        let permit = self
            .serializer
            .acquire()
            .map_err(CreationError::SerializerTimeout)?;
        let result = run_in_scope(self.source.as_ref(), scope, self.lock_mode, |conn| {
            check_then_insert(conn, request)
        })
        .map_err(CreationError::from_scope);
        drop(permit);

        match &result {
            Ok(CreationOutcome::Created { .. }) => debug!(
                "event=resource_create module=service status=ok state=committed scope={} serializer={} lock_mode={} name_len={} duration_ms={}",
                scope.label(),
                self.serializer.label(),
                self.lock_mode.label(),
                request.name.len(),
                started_at.elapsed().as_millis()
            ),
            Ok(CreationOutcome::Rejected { .. }) => debug!(
                "event=resource_create module=service status=rejected state=rolled_back reason=duplicate_name scope={} serializer={} lock_mode={} name_len={} duration_ms={}",
                scope.label(),
                self.serializer.label(),
                self.lock_mode.label(),
                request.name.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=resource_create module=service status=error scope={} serializer={} lock_mode={} duration_ms={} error_code={} error={}",
                scope.label(),
                self.serializer.label(),
                self.lock_mode.label(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }

        result
    }

    pub fn get_resource(&self, id: ResourceId) -> CreationResult<Option<Resource>> {
        self.read(|repo| repo.get_resource(id))
    }

    pub fn exists_by_name(&self, name: &str) -> CreationResult<bool> {
        self.read(|repo| repo.exists_by_name(name))
    }

    pub fn count_resources(&self) -> CreationResult<u64> {
        self.read(|repo| repo.count_resources())
    }

    pub fn list_resources(&self) -> CreationResult<Vec<Resource>> {
        self.read(|repo| repo.list_resources())
    }

    fn read<T>(
        &self,
        query: impl FnOnce(&SqliteResourceRepository<'_>) -> Result<T, RepoError>,
    ) -> CreationResult<T> {
        let conn = self.source.connect().map_err(CreationError::Unavailable)?;
        let repo = SqliteResourceRepository::new(&conn);
        query(&repo).map_err(|source| CreationError::Store {
            phase: CreationPhase::Read,
            source,
        })
    }
}

fn check_then_insert(
    conn: &Connection,
    request: &CreationRequest,
) -> Result<Completion<CreationOutcome>, CreationError> {
    let repo = SqliteResourceRepository::new(conn);

    let existing = repo
        .find_by_name_for_update(&request.name)
        .map_err(|source| CreationError::Store {
            phase: CreationPhase::Lookup,
            source,
        })?;
    if existing.is_some() {
        return Ok(Completion::Rollback(CreationOutcome::Rejected {
            name: request.name.clone(),
            reason: DuplicateReason::DuplicateName,
        }));
    }

    let resource = Resource::new(request.name.as_str(), request.content.as_str());
    let id = repo
        .insert_resource(&resource)
        .map_err(|source| CreationError::Store {
            phase: CreationPhase::Insert,
            source,
        })?;

    info!("event=resource_insert module=service status=ok resource_id={id}");
    Ok(Completion::Commit(CreationOutcome::Created { id }))
}

#[cfg(test)]
mod tests {
    use super::{CreationError, CreationPhase, ResourceCreationService};
    use crate::db::transaction::{LockMode, TransactionScope};
    use crate::db::{open_db_in_memory, ConnectionSource, DbError, DbResult};
    use crate::model::outcome::CreationOutcome;
    use crate::model::resource::CreationRequest;
    use crate::repo::resource_repo::RepoError;
    use crate::sync::serializer::{NoopSerializer, ProcessMutex};
    use rusqlite::Connection;
    use std::sync::Arc;
    use std::time::Duration;

    struct Offline;

    impl ConnectionSource for Offline {
        fn connect(&self) -> DbResult<Connection> {
            Err(DbError::Sqlite(rusqlite::Error::InvalidPath(
                "offline".into(),
            )))
        }
    }

    fn joined_service() -> ResourceCreationService {
        ResourceCreationService::new(
            Arc::new(Offline),
            Arc::new(NoopSerializer),
            LockMode::Exclusive,
        )
    }

    #[test]
    fn joined_creation_rejects_second_use_of_name() {
        let mut conn = open_db_in_memory().unwrap();
        let service = joined_service();
        let tx = conn.transaction().unwrap();

        let first = service
            .create_in(
                TransactionScope::Joined(&tx),
                &CreationRequest::new("item-0", "a"),
            )
            .unwrap();
        let second = service
            .create_in(
                TransactionScope::Joined(&tx),
                &CreationRequest::new("item-0", "b"),
            )
            .unwrap();
        tx.commit().unwrap();

        assert!(first.is_created());
        assert!(matches!(second, CreationOutcome::Rejected { ref name, .. } if name == "item-0"));
    }

    #[test]
    fn joined_with_process_mutex_is_refused() {
        let mut conn = open_db_in_memory().unwrap();
        let service = ResourceCreationService::new(
            Arc::new(Offline),
            Arc::new(ProcessMutex::new(Duration::from_millis(50))),
            LockMode::Deferred,
        );
        let tx = conn.transaction().unwrap();

        let err = service
            .create_in(
                TransactionScope::Joined(&tx),
                &CreationRequest::new("item-0", "a"),
            )
            .unwrap_err();
        assert!(matches!(err, CreationError::LockOrderViolation));
    }

    #[test]
    fn joined_without_transaction_is_an_error() {
        let conn = open_db_in_memory().unwrap();
        let err = joined_service()
            .create_in(
                TransactionScope::Joined(&conn),
                &CreationRequest::new("item-0", "a"),
            )
            .unwrap_err();
        assert!(matches!(err, CreationError::NoActiveTransaction));
    }

    #[test]
    fn offline_store_is_an_infrastructure_error() {
        let err = joined_service()
            .create(&CreationRequest::new("item-0", "a"))
            .unwrap_err();
        assert!(matches!(err, CreationError::Unavailable(_)));
        assert_eq!(err.code(), "store_unavailable");
        assert!(!err.is_lock_timeout());
    }

    #[test]
    fn busy_store_errors_count_as_lock_timeouts() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = CreationError::Store {
            phase: CreationPhase::Begin,
            source: RepoError::from(busy),
        };
        assert!(err.is_lock_timeout());
        assert_eq!(err.code(), "lock_wait_timeout");
    }
}
