//! Process-level serialization of creation critical sections.
//!
//! # Responsibility
//! - Provide the injectable `Serializer` capability used by creation paths.
//! - Bound how long a caller may wait for the process-wide lock.
//!
//! # Invariants
//! - A permit is acquired before any store transaction begins and dropped
//!   only after that transaction has finished.
//! - Every `ProcessMutex` in the process guards the same lock.
//! - `ProcessMutex` never waits longer than its configured timeout.

use log::warn;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

static CREATION_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Failure to enter the critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializerError {
    Timeout { waited: Duration },
}

impl Display for SerializerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { waited } => write!(
                f,
                "timed out after {} ms waiting for the process creation lock",
                waited.as_millis()
            ),
        }
    }
}

impl Error for SerializerError {}

/// Proof of being inside the critical section; released on drop.
pub struct SerialPermit<'a> {
    _guard: Option<MutexGuard<'a, ()>>,
}

impl SerialPermit<'_> {
    /// A permit that excludes nothing.
    pub fn unguarded() -> Self {
        Self { _guard: None }
    }
}

/// Capability that decides which creations may run at the same time.
pub trait Serializer: Send + Sync {
    fn acquire(&self) -> Result<SerialPermit<'_>, SerializerError>;

    /// Whether holding a permit excludes every other creation in the process.
    fn is_global(&self) -> bool;

    fn label(&self) -> &'static str;
}

/// Lets every creation through; exclusion is left to the store lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSerializer;

impl Serializer for NoopSerializer {
    fn acquire(&self) -> Result<SerialPermit<'_>, SerializerError> {
        Ok(SerialPermit::unguarded())
    }

    fn is_global(&self) -> bool {
        false
    }

    fn label(&self) -> &'static str {
        "noop"
    }
}

/// Handle on the one creation lock shared by the whole process.
///
/// Instances differ only in how long they wait; any two of them exclude
/// each other.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMutex {
    wait_timeout: Duration,
}

impl ProcessMutex {
    pub fn new(wait_timeout: Duration) -> Self {
        Self { wait_timeout }
    }
}

impl Serializer for ProcessMutex {
    fn acquire(&self) -> Result<SerialPermit<'_>, SerializerError> {
        let started_at = Instant::now();
        match CREATION_LOCK.try_lock_for(self.wait_timeout) {
            Some(guard) => Ok(SerialPermit {
                _guard: Some(guard),
            }),
            None => {
                let waited = started_at.elapsed();
                warn!(
                    "event=serializer_acquire module=sync status=error error_code=lock_wait_timeout waited_ms={}",
                    waited.as_millis()
                );
                Err(SerializerError::Timeout { waited })
            }
        }
    }

    fn is_global(&self) -> bool {
        true
    }

    fn label(&self) -> &'static str {
        "process_mutex"
    }
}
