//! Domain model for duplicate-safe resource creation.
//!
//! # Responsibility
//! - Define the persisted `Resource` and the caller-facing request shape.
//! - Define outcome values for single and batch creation.
//!
//! # Invariants
//! - Every resource is identified by a stable `ResourceId`.
//! - Duplicate rejections are values, never errors.

pub mod outcome;
pub mod resource;
