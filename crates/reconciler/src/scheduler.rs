//! Work queue and worker pool
//!
//! Watch events, self-requeues and the periodic resync all feed one queue.
//! A key is handed to at most one worker at a time; an event for a key that
//! is already being reconciled marks it dirty and it is queued again as soon
//! as the running pass finishes. Delayed requeues go through
//! `kube_runtime::scheduler`, so a key has at most one pending timer and the
//! earliest one wins.

use crate::error::ReconcileError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ResourceKey;
use futures::channel::mpsc;
use futures::future::join_all;
use futures::StreamExt;
use kube_runtime::scheduler::{scheduler, ScheduleRequest};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shortest resync period the scheduler accepts
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Why a pass was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    SpecChanged,
    Requeue,
    DeleteRequested,
    Resync,
}

/// One unit of work for the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTask {
    pub key: ResourceKey,
    pub reason: TriggerReason,
    /// Consecutive self-requeues that led to this task
    pub attempt: u32,
}

impl ReconcileTask {
    pub fn new(key: ResourceKey, reason: TriggerReason) -> Self {
        Self {
            key,
            reason,
            attempt: 0,
        }
    }

    /// Follow-up task for the same key
    pub fn requeue(&self) -> Self {
        Self {
            key: self.key.clone(),
            reason: TriggerReason::Requeue,
            attempt: self.attempt + 1,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ReconcileTask>,
    queued: HashSet<ResourceKey>,
    in_flight: HashSet<ResourceKey>,
    /// Keys that got a new task while in flight
    dirty: HashMap<ResourceKey, ReconcileTask>,
    /// Tasks waiting for their timer
    delayed: HashMap<ResourceKey, ReconcileTask>,
    shutdown: bool,
}

/// Deduplicating queue with single-writer-per-key semantics
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    timers: mpsc::UnboundedSender<ScheduleRequest<ResourceKey>>,
    /// Taken by [`WorkQueue::run_timers`]
    due: Mutex<Option<mpsc::UnboundedReceiver<ScheduleRequest<ResourceKey>>>>,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.len())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (timers, due) = mpsc::unbounded();
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            timers,
            due: Mutex::new(Some(due)),
        }
    }

    /// Queues a task unless one for the same key is already pending
    pub fn add(&self, task: ReconcileTask) {
        let Ok(mut state) = self.state.lock() else {
            warn!("Work queue lock poisoned, dropping task for {}", task.key);
            return;
        };
        if state.shutdown {
            return;
        }
        if state.in_flight.contains(&task.key) {
            state.dirty.entry(task.key.clone()).or_insert(task);
            return;
        }
        if state.queued.insert(task.key.clone()) {
            state.pending.push_back(task);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queues a task once `delay` has passed.
    ///
    /// A key already waiting for a timer keeps the earlier deadline and the
    /// newer task. Timers only fire while [`WorkQueue::run_timers`] runs.
    pub fn add_after(&self, task: ReconcileTask, delay: Duration) {
        if delay.is_zero() {
            self.add(task);
            return;
        }
        let key = task.key.clone();
        {
            let Ok(mut state) = self.state.lock() else {
                warn!("Work queue lock poisoned, dropping delayed task for {}", key);
                return;
            };
            if state.shutdown {
                return;
            }
            state.delayed.insert(key.clone(), task);
        }
        let request = ScheduleRequest {
            message: key,
            run_at: Instant::now() + delay,
        };
        if let Err(e) = self.timers.unbounded_send(request) {
            debug!("Timer channel closed, dropping requeue of {}", e.into_inner().message);
        }
    }

    /// Moves delayed tasks into the queue as their timers expire.
    ///
    /// Runs until the queue is shut down; only one caller can drive the timers.
    pub async fn run_timers(&self) {
        let requests = self.due.lock().ok().and_then(|mut due| due.take());
        let Some(requests) = requests else {
            warn!("Work queue timers are already being driven");
            return;
        };
        let due = scheduler(requests);
        tokio::pin!(due);
        while let Some(key) = due.next().await {
            let task = self.state.lock().ok().and_then(|mut state| state.delayed.remove(&key));
            if let Some(task) = task {
                self.add(task);
            }
        }
    }

    /// Tasks waiting for a timer
    pub fn delayed(&self) -> usize {
        self.state.lock().map(|s| s.delayed.len()).unwrap_or(0)
    }

    /// Waits for the next task and marks its key in flight.
    ///
    /// Returns `None` after [`WorkQueue::shutdown`].
    pub async fn next(&self) -> Option<ReconcileTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().ok()?;
                if state.shutdown {
                    return None;
                }
                if let Some(task) = state.pending.pop_front() {
                    state.queued.remove(&task.key);
                    state.in_flight.insert(task.key.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(task);
                }
            }

            notified.await;
        }
    }

    /// Marks a key's pass finished, re-queueing it if it went dirty meanwhile
    pub fn done(&self, key: &ResourceKey) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.in_flight.remove(key);
        if let Some(task) = state.dirty.remove(key) {
            if !state.shutdown && state.queued.insert(key.clone()) {
                state.pending.push_back(task);
                drop(state);
                self.notify.notify_one();
            }
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.shutdown = true;
            state.pending.clear();
            state.queued.clear();
            state.dirty.clear();
            state.delayed.clear();
        }
        self.timers.close_channel();
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().map(|s| s.shutdown).unwrap_or(true)
    }

    /// Tasks waiting for a worker
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// How often every known record is re-queued to catch drift
    pub resync_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(300),
        }
    }
}

/// Cheap handle for feeding the queue from event sources
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    queue: Arc<WorkQueue>,
}

impl SchedulerHandle {
    pub fn enqueue(&self, key: ResourceKey, reason: TriggerReason) {
        self.queue.add(ReconcileTask::new(key, reason));
    }

    /// Stops the workers once their current passes finish
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }
}

/// Runs reconcile passes for one kind on a bounded worker pool.
#[derive(Debug)]
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, mut config: SchedulerConfig) -> Self {
        if config.resync_interval < MIN_RESYNC_INTERVAL {
            warn!(
                "Resync interval {:?} is too short, using {:?}",
                config.resync_interval, MIN_RESYNC_INTERVAL
            );
            config.resync_interval = MIN_RESYNC_INTERVAL;
        }
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            config,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Runs until the queue is shut down
    pub async fn run(self) {
        let workers = self.config.workers.max(1);
        info!(
            "Starting {} scheduler with {} workers (resync every {:?})",
            self.reconciler.kind().kind,
            workers,
            self.config.resync_interval
        );

        let resync = tokio::spawn(resync_loop(
            Arc::clone(&self.reconciler),
            Arc::clone(&self.queue),
            self.config.resync_interval,
        ));
        let timers = {
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move { queue.run_timers().await })
        };

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.queue),
                ))
            })
            .collect::<Vec<_>>();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Scheduler worker panicked: {}", e);
            }
        }
        for (name, task) in [("resync", resync), ("timer", timers)] {
            if !task.is_finished() {
                task.abort();
            }
            match task.await {
                Err(e) if e.is_panic() => error!("Scheduler {} task panicked: {}", name, e),
                _ => {}
            }
        }
        info!("{} scheduler stopped", self.reconciler.kind().kind);
    }
}

async fn worker(id: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>) {
    debug!("Worker {} started", id);
    while let Some(task) = queue.next().await {
        let key = task.key.clone();
        match reconciler.reconcile(&task).await {
            Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                debug!("Requeueing {} in {:?}", key, delay);
                queue.add_after(task.requeue(), delay);
            }
            Ok(ReconcileOutcome::Done) | Ok(ReconcileOutcome::Released) => {}
            Err(e) => {
                let (delay, attempts) = failure_delay(&reconciler, &key, &e);
                error!(
                    "Reconcile of {} failed: {} (attempt {}, retrying in {:?})",
                    key, e, attempts, delay
                );
                queue.add_after(task.requeue(), delay);
            }
        }
        queue.done(&key);
    }
    debug!("Worker {} stopped", id);
}

/// Delay before retrying a pass that returned an error, and the attempt count.
///
/// A failure already counted when its status was recorded is not counted again.
fn failure_delay(reconciler: &Reconciler, key: &ResourceKey, error: &ReconcileError) -> (Duration, u32) {
    match error.retry_after() {
        Some(delay) => (delay, reconciler.error_count(key)),
        None => reconciler.increment_error(key),
    }
}

async fn resync_loop(reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if queue.is_shutdown() {
            return;
        }
        match reconciler.store().list().await {
            Ok(keys) => {
                debug!("Resync: queueing {} {} records", keys.len(), reconciler.kind().kind);
                for key in keys {
                    queue.add(ReconcileTask::new(key, TriggerReason::Resync));
                }
            }
            Err(e) => warn!("Resync of {} failed: {}", reconciler.kind().kind, e),
        }
    }
}
