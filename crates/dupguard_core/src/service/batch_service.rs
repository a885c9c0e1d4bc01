//! Concurrent batch creation.
//!
//! # Responsibility
//! - Fan a batch of requests out to `ResourceCreationService` on a bounded
//!   pool of scoped worker threads.
//! - Collect exactly one outcome per request, in request order.
//!
//! # Invariants
//! - `create_batch(requests).len() == requests.len()`, positions aligned.
//! - A failing or panicking unit only affects its own position.
//! - No decision is made here beyond mapping single outcomes 1:1.

use crate::config::CreationConfig;
use crate::db::ConnectionSource;
use crate::model::outcome::{BatchOutcome, BatchSummary, RejectReason};
use crate::model::resource::CreationRequest;
use crate::service::creation_service::ResourceCreationService;
use log::{error, info};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

/// Batch facade over a shared single-creation service.
pub struct BatchCreationService {
    creator: Arc<ResourceCreationService>,
    max_concurrency: usize,
}

impl BatchCreationService {
    /// `max_concurrency` is clamped to at least one worker.
    pub fn new(creator: Arc<ResourceCreationService>, max_concurrency: usize) -> Self {
        Self {
            creator,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(source: Arc<dyn ConnectionSource>, config: &CreationConfig) -> Self {
        Self::new(
            Arc::new(ResourceCreationService::from_config(source, config)),
            config.max_concurrency,
        )
    }

    pub fn creator(&self) -> &ResourceCreationService {
        &self.creator
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Creates every request concurrently and returns outcomes in input order.
    ///
    /// Blocks until every unit has finished.
    pub fn create_batch(&self, requests: &[CreationRequest]) -> Vec<BatchOutcome> {
        if requests.is_empty() {
            return Vec::new();
        }

        let batch_id = Uuid::new_v4();
        let started_at = Instant::now();
        let workers = self.max_concurrency.min(requests.len());
        info!(
            "event=batch_create module=service status=start batch_id={batch_id} size={} workers={workers}",
            requests.len()
        );

        let cursor = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel::<(usize, BatchOutcome)>();
        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(request) = requests.get(index) else {
                        break;
                    };
                    if sender.send((index, self.run_unit(request))).is_err() {
                        break;
                    }
                });
            }
        });
        drop(sender);

        let mut slots: Vec<Option<BatchOutcome>> = vec![None; requests.len()];
        for (index, outcome) in receiver {
            slots[index] = Some(outcome);
        }

        let outcomes: Vec<BatchOutcome> = slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    infrastructure_rejection(request, "creation unit reported no outcome")
                })
            })
            .collect();

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            "event=batch_create module=service status=ok batch_id={batch_id} size={} created={} duplicates={} failed={} duration_ms={}",
            summary.total,
            summary.created,
            summary.duplicates,
            summary.failed,
            started_at.elapsed().as_millis()
        );
        outcomes
    }

    /// Same as `create_batch`, plus the outcome counts.
    pub fn create_batch_with_summary(
        &self,
        requests: &[CreationRequest],
    ) -> (Vec<BatchOutcome>, BatchSummary) {
        let outcomes = self.create_batch(requests);
        let summary = BatchSummary::from_outcomes(&outcomes);
        (outcomes, summary)
    }

    fn run_unit(&self, request: &CreationRequest) -> BatchOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.creator.create(request))) {
            Ok(Ok(outcome)) => outcome.into(),
            Ok(Err(err)) => infrastructure_rejection(request, err.to_string()),
            Err(_) => {
                error!("event=batch_unit module=service status=error error_code=unit_panicked");
                infrastructure_rejection(request, "creation unit panicked")
            }
        }
    }
}

fn infrastructure_rejection(request: &CreationRequest, message: impl Into<String>) -> BatchOutcome {
    BatchOutcome::Rejected {
        name: request.name.clone(),
        reason: RejectReason::Infrastructure(message.into()),
    }
}
