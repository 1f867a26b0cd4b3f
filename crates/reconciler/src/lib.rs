//! Generic declarative reconciler core
//!
//! Drives remote resources toward the desired state declared in a
//! [`ResourceStore`], one [`KindConfig`] per resource kind. Per-kind behavior
//! (immutable fields, delete guards, ready lifecycle states) is data, not
//! code, so a single [`Reconciler`] implementation serves every kind.
//!
//! # Example
//!
//! ```no_run
//! use cloud_client::{HttpBackend, RetryPolicy, RetryingBackend};
//! use reconciler::{KindConfig, Reconciler, ReconcilerConfig, ReferenceSet, Scheduler, SchedulerConfig};
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn reconciler::ResourceStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new(
//!     "http://cloud-api:8080".to_string(),
//!     "your-api-token".to_string(),
//!     "distributions",
//! )?;
//! let backend = Arc::new(RetryingBackend::new(backend, RetryPolicy::default()));
//!
//! let reconciler = Reconciler::new(
//!     backend,
//!     store,
//!     KindConfig::distributions(),
//!     ReferenceSet::new(),
//!     ReconcilerConfig::default(),
//! );
//! let scheduler = Scheduler::new(Arc::new(reconciler), SchedulerConfig::default());
//! let handle = scheduler.handle();
//! tokio::spawn(scheduler.run());
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`differ`]: desired vs observed → ordered remote operations
//! - [`reconciler`]: the per-resource state machine
//! - [`conditions`]: `Synced` / `Ready` condition reporting
//! - [`scheduler`]: deduplicating work queue, worker pool and resync
//! - [`wait`]: convergence waiters with distinct timeouts

pub mod backoff;
pub mod cache;
pub mod conditions;
pub mod differ;
pub mod error;
pub mod kind;
pub mod reconciler;
pub mod references;
pub mod scheduler;
pub mod store;
pub mod wait;

pub use backoff::ExponentialBackoff;
pub use cache::ObservedCache;
pub use differ::RemoteOperation;
pub use error::{ErrorKind, ReconcileError, StoreError};
pub use kind::{ConvergenceSignal, DeleteGuard, KindConfig, KindTable};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use references::{ReferenceResource, ReferenceSet};
pub use scheduler::{ReconcileTask, Scheduler, SchedulerConfig, SchedulerHandle, TriggerReason, WorkQueue};
pub use store::{DesiredState, ResourceKey, ResourceRecord, ResourceStore, FINALIZER};
#[cfg(any(test, feature = "test-util"))]
pub use store::MemoryStore;
pub use wait::{WaitConfig, WaitError};
