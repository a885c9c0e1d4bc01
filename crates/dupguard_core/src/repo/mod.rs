//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repositories run on whatever connection or transaction they are given;
//!   transaction boundaries belong to `db::transaction`.

pub mod resource_repo;
