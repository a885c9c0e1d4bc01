//! Duplicate-safe concurrent resource creation.
//!
//! This crate is the single source of truth for the name-uniqueness
//! invariant: `ResourceCreationService` owns the locking policy and
//! `BatchCreationService` fans requests out over it.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, CreationConfig, LockStrategy};
pub use db::transaction::{LockMode, TransactionScope};
pub use db::{ConnectionSource, DbError, DbResult, SqliteStore};
pub use logging::{
    default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget, LoggingError,
};
pub use model::outcome::{
    BatchOutcome, BatchSummary, CreationOutcome, DuplicateReason, RejectReason,
};
pub use model::resource::{CreationRequest, Resource, ResourceId};
pub use repo::resource_repo::{RepoError, RepoResult, ResourceRepository, SqliteResourceRepository};
pub use service::batch_service::BatchCreationService;
pub use service::creation_service::{
    CreationError, CreationPhase, CreationResult, ResourceCreationService,
};
pub use sync::serializer::{
    NoopSerializer, ProcessMutex, SerialPermit, Serializer, SerializerError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
