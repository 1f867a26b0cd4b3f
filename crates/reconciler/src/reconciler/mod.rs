//! Reconcile state machine for one resource kind.
//!
//! One pass reads the latest record, observes the remote resource, applies
//! the differ's plan in order, and records the outcome in status:
//! - `sync`: create, update and tag convergence
//! - `delete`: guarded deletion and finalizer release
//!
//! Phases: Pending → Creating → Synced → Updating → Deleting → Deleted, with
//! Backoff after retryable failures and Failed after permanent ones.

mod delete;
mod sync;


use crate::backoff::ExponentialBackoff;
use crate::cache::ObservedCache;
use crate::conditions;
use crate::error::{ErrorKind, ReconcileError, StoreError};
use crate::kind::KindConfig;
use crate::references::ReferenceSet;
use crate::scheduler::ReconcileTask;
use crate::store::{ResourceKey, ResourceRecord, ResourceStore};
use chrono::Utc;
use cloud_client::{BackendAdapter, ObservedState};
use crds::{ReconcilePhase, ResourceMetadata, ResourceStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables shared by every reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub backoff_min_seconds: u64,
    pub backoff_max_seconds: u64,
    /// Status writes attempted before a version conflict is given up on
    pub status_write_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            backoff_min_seconds: crate::backoff::DEFAULT_MIN_SECONDS,
            backoff_max_seconds: crate::backoff::DEFAULT_MAX_SECONDS,
            status_write_attempts: 3,
        }
    }
}

/// What the scheduler should do with the key after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do until the next event or resync
    Done,
    RequeueAfter(Duration),
    /// Remote resource confirmed gone and the record released
    Released,
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(config: &ReconcilerConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(config.backoff_min_seconds, config.backoff_max_seconds),
            error_count: 0,
        }
    }
}

/// Remote state accumulated while a pass runs, kept even when the pass fails
/// so a created id is never lost
#[derive(Debug, Default)]
struct Pass {
    observed: Option<ObservedState>,
    /// The previously recorded remote resource is known to be gone
    remote_gone: bool,
}

/// Drives records of one kind toward their desired state.
pub struct Reconciler {
    pub(crate) backend: Arc<dyn BackendAdapter>,
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) kind: KindConfig,
    pub(crate) references: ReferenceSet,
    config: ReconcilerConfig,
    /// Error count tracking per resource
    backoff_states: Arc<Mutex<HashMap<ResourceKey, BackoffState>>>,
    /// Consecutive NotFound reads of a known id, per resource
    read_misses: Arc<Mutex<HashMap<ResourceKey, u32>>>,
    observed: ObservedCache,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("kind", &self.kind.kind)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        backend: Arc<dyn BackendAdapter>,
        store: Arc<dyn ResourceStore>,
        kind: KindConfig,
        references: ReferenceSet,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            backend,
            store,
            kind,
            references,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            read_misses: Arc::new(Mutex::new(HashMap::new())),
            observed: ObservedCache::new(),
        }
    }

    pub fn kind(&self) -> &KindConfig {
        &self.kind
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Last remote snapshot seen for `key`; advisory only
    pub fn observed(&self) -> &ObservedCache {
        &self.observed
    }

    /// Runs one reconcile pass for the task's resource.
    ///
    /// Failures of the remote service are recorded in status and turned into
    /// a requeue; only failures to read or write the store itself are returned.
    pub async fn reconcile(&self, task: &ReconcileTask) -> Result<ReconcileOutcome, ReconcileError> {
        let key = &task.key;
        let Some(mut record) = self.store.get(key).await? else {
            debug!("{} {} no longer exists, forgetting it", self.kind.kind, key);
            self.forget(key);
            return Ok(ReconcileOutcome::Done);
        };

        let last_seen = match self.observed.age(key, Utc::now()) {
            Some(age) => format!("{}s ago", age.as_secs()),
            None => "never".to_string(),
        };
        debug!(
            "Reconciling {} {} ({:?}, attempt {}, generation {}, last observed {})",
            self.kind.kind, key, task.reason, task.attempt, record.generation, last_seen
        );

        if record.deletion_requested {
            return self.reconcile_delete(record).await;
        }

        if record.status.phase == ReconcilePhase::Failed && !record.generation_changed() {
            debug!(
                "{} {} failed permanently at generation {}, waiting for a spec change",
                self.kind.kind, key, record.generation
            );
            return Ok(ReconcileOutcome::Done);
        }

        if !record.has_finalizer {
            record.resource_version = self.store.ensure_finalizer(&record).await?;
            record.has_finalizer = true;
        }

        let mut pass = Pass::default();
        let result = self.sync(&record, &mut pass).await;
        self.finish(&record, pass, result, ReconcilePhase::Synced).await
    }

    /// Records a pass outcome in status and decides when to look again
    async fn finish(
        &self,
        record: &ResourceRecord,
        pass: Pass,
        result: Result<Option<Duration>, ReconcileError>,
        success_phase: ReconcilePhase,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = &record.key;
        let now = Utc::now();
        let mut status = record.status.clone();

        match &pass.observed {
            Some(observed) => {
                record_remote(&mut status, observed);
                self.observed.insert(key, observed.clone());
            }
            None if pass.remote_gone => {
                clear_remote(&mut status);
                self.observed.remove(key);
            }
            None => {}
        }

        // backoff delay when this pass already counted a failure
        let mut counted = None;
        let outcome = match result {
            Ok(requeue) => {
                self.reset_error(key);
                status.phase = success_phase;
                status.attempts = 0;
                if success_phase == ReconcilePhase::Synced {
                    conditions::report_synced(&mut status, now);
                    status.observed_generation = Some(record.generation);
                }
                conditions::report_ready(&mut status, &self.kind, pass.observed.as_ref(), now);
                match requeue {
                    Some(delay) => ReconcileOutcome::RequeueAfter(delay),
                    None => ReconcileOutcome::Done,
                }
            }
            Err(e) if e.is_permanent() => {
                let (delay, attempts) = self.increment_error(key);
                counted = Some(delay);
                error!(
                    "❌ {} {} failed permanently: {} (generation {})",
                    self.kind.kind, key, e, record.generation
                );
                status.phase = ReconcilePhase::Failed;
                status.attempts = attempts;
                status.observed_generation = Some(record.generation);
                conditions::report_failed(&mut status, &e, now);
                if record.deletion_requested {
                    // the finalizer is held until absence is confirmed, so keep trying slowly
                    ReconcileOutcome::RequeueAfter(Duration::from_secs(self.config.backoff_max_seconds))
                } else {
                    ReconcileOutcome::Done
                }
            }
            Err(e) => {
                let (delay, attempts) = self.increment_error(key);
                counted = Some(delay);
                match e.kind() {
                    ErrorKind::Timeout => warn!(
                        "⏱️ {} {} timed out: {} (attempt {}, retrying in {:?})",
                        self.kind.kind, key, e, attempts, delay
                    ),
                    _ => warn!(
                        "⚠️ {} {} failed: {} (attempt {}, retrying in {:?})",
                        self.kind.kind, key, e, attempts, delay
                    ),
                }
                status.phase = ReconcilePhase::Backoff;
                status.attempts = attempts;
                conditions::report_retrying(&mut status, &e, attempts, now);
                ReconcileOutcome::RequeueAfter(delay)
            }
        };

        if let Err(e) = self.write_status(record, &status).await {
            return Err(match counted {
                Some(retry_after) => ReconcileError::StatusWrite {
                    source: Box::new(e),
                    retry_after,
                },
                None => e,
            });
        }
        Ok(outcome)
    }

    /// Compare-and-swap status write, re-reading the version on conflict
    async fn write_status(&self, record: &ResourceRecord, status: &ResourceStatus) -> Result<(), ReconcileError> {
        if *status == record.status {
            debug!("{} {} status unchanged, skipping write", self.kind.kind, record.key);
            return Ok(());
        }

        let mut version = record.resource_version.clone();
        let mut attempt = 1;
        loop {
            match self.store.update_status(&record.key, &version, status).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict(msg)) if attempt < self.config.status_write_attempts => {
                    debug!(
                        "Status write for {} {} conflicted ({}), re-reading",
                        self.kind.kind, record.key, msg
                    );
                    attempt += 1;
                    match self.store.get(&record.key).await? {
                        Some(fresh) => version = fresh.resource_version,
                        None => return Ok(()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Records a failure and returns the delay before the next attempt and the new attempt count
    pub fn increment_error(&self, key: &ResourceKey) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(key.clone())
                    .or_insert_with(|| BackoffState::new(&self.config));
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(self.config.backoff_min_seconds), 1)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, key: &ResourceKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.error_count = 0;
                state.backoff.reset();
            }
        }
    }

    pub fn error_count(&self, key: &ResourceKey) -> u32 {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|states| states.get(key).map(|s| s.error_count))
            .unwrap_or(0)
    }

    fn forget(&self, key: &ResourceKey) {
        self.observed.remove(key);
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
        if let Ok(mut misses) = self.read_misses.lock() {
            misses.remove(key);
        }
    }

    /// Counts a NotFound read of a known id; returns the consecutive total
    fn record_read_miss(&self, key: &ResourceKey) -> u32 {
        match self.read_misses.lock() {
            Ok(mut misses) => {
                let count = misses.entry(key.clone()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 1,
        }
    }

    fn clear_read_misses(&self, key: &ResourceKey) {
        if let Ok(mut misses) = self.read_misses.lock() {
            misses.remove(key);
        }
    }

    fn log_released(&self, key: &ResourceKey) {
        info!("✅ {} {} deleted remotely, finalizer released", self.kind.kind, key);
    }
}

/// Copies remote-generated fields into status
fn record_remote(status: &mut ResourceStatus, observed: &ObservedState) {
    status.id = Some(observed.id.clone());
    status.e_tag = observed.e_tag.clone();
    status.remote_state = observed.lifecycle_state.clone();
    if observed.last_modified_time.is_some() {
        status.last_modified_time = observed.last_modified_time;
    }
    if let Some(arn) = &observed.arn {
        let metadata = status.resource_metadata.get_or_insert_with(ResourceMetadata::default);
        metadata.arn = Some(arn.clone());
    }
}

fn clear_remote(status: &mut ResourceStatus) {
    status.id = None;
    status.e_tag = None;
    status.remote_state = None;
    status.last_modified_time = None;
    status.resource_metadata = None;
}
