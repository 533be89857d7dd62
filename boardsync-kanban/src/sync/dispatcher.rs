//! Drives recorded mutations through a [`SyncAdapter`]

use super::adapter::{SyncAdapter, SyncFailure};
use crate::error::KanbanError;
use crate::store::{DispatchRequest, OptimisticStore, Resolution};
use crate::types::{EntityRef, RequestId};
use boardsync_common::{with_timeout, RetryConfig, RetryManager, TimeoutError};
use boardsync_config::SyncConfig;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default bound on a single persistence call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters for persistence traffic
#[derive(Debug, Default)]
pub struct SyncStats {
    pub submitted: AtomicU64,
    pub confirmed: AtomicU64,
    pub rejected: AtomicU64,
    pub retries: AtomicU64,
    pub timeouts: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    pub submitted: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub retries: u64,
    pub timeouts: u64,
}

impl SyncStats {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u32) {
        self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Result of delivering one request, after retries
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub request_id: RequestId,
    pub entity: EntityRef,
    /// Calls made, including the first
    pub attempts: u32,
    /// `PersistenceRejected` or `PersistenceTimeout` on failure
    pub outcome: Result<(), KanbanError>,
}

/// What the user is told about an entity after a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// The entity was reverted
    RolledBack,
    /// The entity kept a newer local edit and needs a resync
    Conflict,
}

/// One user-visible failure
#[derive(Debug, Clone, PartialEq)]
pub struct SyncNotice {
    pub entity: EntityRef,
    pub kind: NoticeKind,
    pub error: KanbanError,
}

/// Outcome of [`SyncDispatcher::drain`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub delivered: usize,
    pub confirmed: usize,
    /// At most one notice per entity, first failure wins
    pub notices: IndexMap<EntityRef, SyncNotice>,
}

impl DrainReport {
    pub fn notice_for(&self, entity: &EntityRef) -> Option<&SyncNotice> {
        self.notices.get(entity)
    }

    pub fn is_clean(&self) -> bool {
        self.notices.is_empty()
    }

    fn add(&mut self, resolution: Resolution, error: KanbanError) {
        let kind = match resolution {
            Resolution::RolledBack(_) => NoticeKind::RolledBack,
            Resolution::Conflict(_) => NoticeKind::Conflict,
            Resolution::Superseded(_) => return,
        };
        let entity = resolution.entity().clone();
        self.notices.entry(entity.clone()).or_insert(SyncNotice {
            entity,
            kind,
            error,
        });
    }
}

/// Sends ready mutations to the backend with a per-call timeout and
/// exponential backoff, then feeds the results back into the store.
pub struct SyncDispatcher<A: SyncAdapter> {
    adapter: A,
    retry: RetryManager,
    timeout: Duration,
    stats: SyncStats,
}

impl<A: SyncAdapter> SyncDispatcher<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            retry: RetryManager::new(),
            timeout: DEFAULT_TIMEOUT,
            stats: SyncStats::default(),
        }
    }

    /// Build a dispatcher using the retry and timeout settings from configuration
    pub fn from_config(adapter: A, config: &SyncConfig) -> Self {
        Self::new(adapter)
            .with_retry(config.retry_config())
            .with_timeout(config.timeout())
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryManager::with_config(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Deliver one request, retrying transient failures and timeouts.
    ///
    /// A call that times out is abandoned locally; the backend may still
    /// apply it.
    pub async fn deliver(&self, request: &DispatchRequest) -> Delivery {
        self.stats.record_submitted();
        let started = Instant::now();
        let name = request.op.name();

        let adapter = &self.adapter;
        let stats = &self.stats;
        let timeout = self.timeout;
        let op = &request.op;

        let (result, attempts) = self
            .retry
            .retry_counted(name, move || async move {
                match with_timeout(adapter.execute(op), timeout).await {
                    Ok(()) => Ok(()),
                    Err(TimeoutError::Operation(failure)) => Err(failure),
                    Err(TimeoutError::Timeout { duration }) => {
                        stats.record_timeout();
                        Err(SyncFailure::Timeout {
                            elapsed_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                        })
                    }
                }
            })
            .await;
        self.stats.record_retries(attempts.saturating_sub(1));

        let outcome = match result {
            Ok(()) => {
                self.stats.record_confirmed();
                debug!(
                    request = %request.request_id,
                    op = name,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "delivered"
                );
                Ok(())
            }
            Err(failure) => {
                self.stats.record_rejected();
                let error = match failure {
                    SyncFailure::Timeout { .. } => KanbanError::PersistenceTimeout {
                        request: request.request_id.to_string(),
                        attempts,
                    },
                    other => KanbanError::PersistenceRejected {
                        request: request.request_id.to_string(),
                        reason: other.to_string(),
                    },
                };
                warn!(request = %request.request_id, op = name, attempts, %error, "delivery failed");
                Err(error)
            }
        };

        Delivery {
            request_id: request.request_id.clone(),
            entity: request.op.entity(),
            attempts,
            outcome,
        }
    }

    /// Deliver everything the store has ready until nothing is left.
    ///
    /// The store lock is held only to take requests and to apply results, so
    /// local edits can continue while calls are outstanding. Each batch is
    /// delivered concurrently.
    pub async fn drain(&self, store: &Mutex<OptimisticStore>) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            let batch = store.lock().await.take_ready();
            if batch.is_empty() {
                break;
            }
            debug!(requests = batch.len(), "delivering batch");

            let deliveries = join_all(batch.iter().map(|request| self.deliver(request))).await;

            let mut store = store.lock().await;
            for delivery in deliveries {
                report.delivered += 1;
                match delivery.outcome {
                    Ok(()) => {
                        if store.on_confirmed(&delivery.request_id) {
                            report.confirmed += 1;
                        }
                    }
                    Err(error) => {
                        match store.on_rejected(&delivery.request_id, &error.to_string()) {
                            Ok(resolution) => report.add(resolution, error),
                            Err(unknown) => {
                                warn!(entity = %delivery.entity, %unknown, "rejection for a resolved request");
                            }
                        }
                    }
                }
            }
        }

        if !report.is_clean() {
            info!(
                delivered = report.delivered,
                failed = report.notices.len(),
                "drain finished with failures"
            );
        }
        report
    }
}
