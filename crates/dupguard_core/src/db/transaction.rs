//! Explicit transaction scopes for store interactions.
//!
//! # Responsibility
//! - Model propagation (`New` vs `Joined`) as a value passed by the caller.
//! - Guarantee exactly one commit or rollback per scope.
//!
//! # Invariants
//! - `New` opens its own connection; nothing it does is visible to, or
//!   rolled back by, any other scope.
//! - `Joined` never commits the caller's transaction. It only releases or
//!   rolls back to its own savepoint.
//! - A body error always rolls the scope back before it is returned.

use super::{ConnectionSource, DbError};
use log::{debug, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const JOINED_SAVEPOINT: &str = "dupguard_scope";

/// Transaction propagation chosen by the caller.
#[derive(Debug, Clone, Copy)]
pub enum TransactionScope<'a> {
    /// Run in a brand-new, independent transaction on a fresh connection.
    New,
    /// Run inside the caller's open transaction on this connection.
    ///
    /// The caller's transaction should be `TransactionBehavior::Immediate`.
    /// A deferred one takes the write lock only at the insert, so a lost
    /// race surfaces as a busy error instead of a duplicate rejection.
    Joined(&'a Connection),
}

impl TransactionScope<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Joined(_) => "joined",
        }
    }
}

/// How a `New` scope acquires the store lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `BEGIN IMMEDIATE`: take the store write lock before the first read,
    /// so a lookup blocks every concurrent writer until this scope ends.
    Exclusive,
    /// `BEGIN DEFERRED`: locks are taken lazily by the first write.
    Deferred,
}

impl LockMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Deferred => "deferred",
        }
    }

    fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Exclusive => TransactionBehavior::Immediate,
            Self::Deferred => TransactionBehavior::Deferred,
        }
    }
}

/// How a scope body wants its work finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Commit(T),
    Rollback(T),
}

/// Failure of a scope, tagged with where it happened.
#[derive(Debug)]
pub enum ScopeError<E> {
    /// No connection could be obtained for a `New` scope.
    Connect(DbError),
    /// The transaction or savepoint could not be opened.
    Begin(DbError),
    /// `Joined` was requested on a connection in autocommit mode.
    NoActiveTransaction,
    /// The body failed; the scope was rolled back.
    Body(E),
    Commit(DbError),
    Rollback(DbError),
}

impl<E: Display> Display for ScopeError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "failed to connect to store: {err}"),
            Self::Begin(err) => write!(f, "failed to begin transaction: {err}"),
            Self::NoActiveTransaction => {
                write!(f, "joined scope requires an open caller transaction")
            }
            Self::Body(err) => write!(f, "{err}"),
            Self::Commit(err) => write!(f, "failed to commit transaction: {err}"),
            Self::Rollback(err) => write!(f, "failed to roll back transaction: {err}"),
        }
    }
}

impl<E: Error + 'static> Error for ScopeError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connect(err) | Self::Begin(err) | Self::Commit(err) | Self::Rollback(err) => {
                Some(err)
            }
            Self::Body(err) => Some(err),
            Self::NoActiveTransaction => None,
        }
    }
}

/// Runs `body` inside the requested scope and finishes it exactly once.
///
/// `lock_mode` applies to `New` only; a `Joined` scope inherits whatever
/// locks the caller's transaction already holds.
pub fn run_in_scope<S, T, E, F>(
    source: &S,
    scope: TransactionScope<'_>,
    lock_mode: LockMode,
    body: F,
) -> Result<T, ScopeError<E>>
where
    S: ConnectionSource + ?Sized,
    F: FnOnce(&Connection) -> Result<Completion<T>, E>,
{
    match scope {
        TransactionScope::New => run_new(source, lock_mode, body),
        TransactionScope::Joined(conn) => run_joined(conn, body),
    }
}

fn run_new<S, T, E, F>(source: &S, lock_mode: LockMode, body: F) -> Result<T, ScopeError<E>>
where
    S: ConnectionSource + ?Sized,
    F: FnOnce(&Connection) -> Result<Completion<T>, E>,
{
    let mut conn = source.connect().map_err(ScopeError::Connect)?;
    let tx = conn
        .transaction_with_behavior(lock_mode.behavior())
        .map_err(|err| ScopeError::Begin(err.into()))?;
    debug!(
        "event=tx_begin module=db scope=new lock_mode={}",
        lock_mode.label()
    );

    match body(&tx) {
        Ok(Completion::Commit(value)) => {
            tx.commit().map_err(|err| ScopeError::Commit(err.into()))?;
            debug!("event=tx_end module=db scope=new status=committed");
            Ok(value)
        }
        Ok(Completion::Rollback(value)) => {
            tx.rollback()
                .map_err(|err| ScopeError::Rollback(err.into()))?;
            debug!("event=tx_end module=db scope=new status=rolled_back");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(
                    "event=tx_end module=db scope=new status=error error_code=rollback_failed error={}",
                    rollback_err
                );
            }
            Err(ScopeError::Body(err))
        }
    }
}

fn run_joined<T, E, F>(conn: &Connection, body: F) -> Result<T, ScopeError<E>>
where
    F: FnOnce(&Connection) -> Result<Completion<T>, E>,
{
    if conn.is_autocommit() {
        return Err(ScopeError::NoActiveTransaction);
    }

    conn.execute_batch(&format!("SAVEPOINT {JOINED_SAVEPOINT};"))
        .map_err(|err| ScopeError::Begin(err.into()))?;
    debug!("event=tx_begin module=db scope=joined");

    match body(conn) {
        Ok(Completion::Commit(value)) => {
            release_savepoint(conn).map_err(ScopeError::Commit)?;
            debug!("event=tx_end module=db scope=joined status=released");
            Ok(value)
        }
        Ok(Completion::Rollback(value)) => {
            rollback_savepoint(conn).map_err(ScopeError::Rollback)?;
            debug!("event=tx_end module=db scope=joined status=rolled_back");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = rollback_savepoint(conn) {
                warn!(
                    "event=tx_end module=db scope=joined status=error error_code=rollback_failed error={}",
                    rollback_err
                );
            }
            Err(ScopeError::Body(err))
        }
    }
}

fn release_savepoint(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(&format!("RELEASE {JOINED_SAVEPOINT};"))?;
    Ok(())
}

fn rollback_savepoint(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "ROLLBACK TO {JOINED_SAVEPOINT}; RELEASE {JOINED_SAVEPOINT};"
    ))?;
    Ok(())
}
