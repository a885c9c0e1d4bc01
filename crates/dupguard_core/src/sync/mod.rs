//! In-process synchronization primitives for creation paths.

pub mod serializer;
