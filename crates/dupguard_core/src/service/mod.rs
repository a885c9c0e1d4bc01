//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and transaction scopes into creation APIs.
//! - Keep CLI and other adapters decoupled from storage details.

pub mod batch_service;
pub mod creation_service;
