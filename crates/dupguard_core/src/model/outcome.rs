//! Creation outcome shapes.
//!
//! # Responsibility
//! - Represent duplicate rejections as ordinary values, not errors.
//! - Give batch callers one outcome per request, including store failures.
//!
//! # Invariants
//! - A single-creation outcome never carries an infrastructure failure;
//!   those travel as `CreationError`.
//! - A batch outcome at position `i` always answers request `i`.

use super::resource::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Why a single creation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// A committed resource already uses this name.
    DuplicateName,
}

impl Display for DuplicateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "duplicate name"),
        }
    }
}

/// Result of one `ResourceCreationService` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreationOutcome {
    Created { id: ResourceId },
    Rejected { name: String, reason: DuplicateReason },
}

impl CreationOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn created_id(&self) -> Option<ResourceId> {
        match self {
            Self::Created { id } => Some(*id),
            Self::Rejected { .. } => None,
        }
    }
}

/// Why a batch item did not produce a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateName,
    /// Store problem isolated to this item (outage, lock timeout, write failure).
    Infrastructure(String),
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "duplicate name"),
            Self::Infrastructure(message) => write!(f, "infrastructure error: {message}"),
        }
    }
}

/// Per-item result of `BatchCreationService::create_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Created { id: ResourceId },
    Rejected { name: String, reason: RejectReason },
}

impl BatchOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                reason: RejectReason::DuplicateName,
                ..
            }
        )
    }

    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                reason: RejectReason::Infrastructure(_),
                ..
            }
        )
    }

    pub fn created_id(&self) -> Option<ResourceId> {
        match self {
            Self::Created { id } => Some(*id),
            Self::Rejected { .. } => None,
        }
    }
}

impl From<CreationOutcome> for BatchOutcome {
    fn from(value: CreationOutcome) -> Self {
        match value {
            CreationOutcome::Created { id } => Self::Created { id },
            CreationOutcome::Rejected {
                name,
                reason: DuplicateReason::DuplicateName,
            } => Self::Rejected {
                name,
                reason: RejectReason::DuplicateName,
            },
        }
    }
}

/// Counts derived from one batch result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub created: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut summary, outcome| {
                summary.total += 1;
                match outcome {
                    BatchOutcome::Created { .. } => summary.created += 1,
                    BatchOutcome::Rejected {
                        reason: RejectReason::DuplicateName,
                        ..
                    } => summary.duplicates += 1,
                    BatchOutcome::Rejected {
                        reason: RejectReason::Infrastructure(_),
                        ..
                    } => summary.failed += 1,
                }
                summary
            })
    }
}
