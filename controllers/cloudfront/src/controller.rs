//! Main controller implementation.
//!
//! The controller runs one scheduler and one watcher per managed CRD:
//! - CachePolicy: plain CRUD cache policies
//! - Distribution: asynchronously deployed, disabled before deletion
//!
//! Both share the remote service connection settings, the kind table and
//! the bootstrap references.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_store::KubeStore;
use crate::resource::ManagedResource;
use crate::watcher::watch_resource;
use cloud_client::{HttpBackend, RetryPolicy, RetryingBackend};
use crds::{CachePolicy, Distribution};
use kube::{Api, Client};
use reconciler::{
    KindTable, Reconciler, ReconcilerConfig, ReferenceSet, Scheduler, SchedulerConfig, SchedulerHandle,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for remote CDN resources.
pub struct Controller {
    schedulers: Vec<SchedulerHandle>,
    cache_policy_scheduler: JoinHandle<()>,
    cache_policy_watcher: JoinHandle<Result<(), ControllerError>>,
    distribution_scheduler: JoinHandle<()>,
    distribution_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("schedulers", &self.schedulers.len())
            .finish_non_exhaustive()
    }
}

/// Shared setup for every kind
struct Wiring {
    client: Client,
    config: ControllerConfig,
    kinds: KindTable,
    references: ReferenceSet,
}

impl Wiring {
    /// Builds the reconciler and scheduler for `K` and spawns its watcher
    fn start<K: ManagedResource>(
        &self,
        resource_name: &'static str,
    ) -> Result<(SchedulerHandle, JoinHandle<()>, JoinHandle<Result<(), ControllerError>>), ControllerError> {
        let kind = self.kinds.get(K::BACKEND_KIND)?.clone();

        let http = HttpBackend::new(
            self.config.backend_url.clone(),
            self.config.backend_token.clone(),
            K::BACKEND_KIND,
        )?;
        let policy = RetryPolicy {
            call_timeout: self.config.call_timeout,
            ..RetryPolicy::default()
        };
        let backend = Arc::new(RetryingBackend::new(http, policy));
        let store = Arc::new(KubeStore::<K>::new(self.client.clone(), self.config.namespace.clone()));

        let reconciler = Reconciler::new(
            backend,
            store,
            kind,
            self.references.clone(),
            ReconcilerConfig {
                backoff_min_seconds: self.config.backoff_min_seconds,
                backoff_max_seconds: self.config.backoff_max_seconds,
                ..ReconcilerConfig::default()
            },
        );
        let scheduler = Scheduler::new(
            Arc::new(reconciler),
            SchedulerConfig {
                workers: self.config.workers,
                resync_interval: self.config.resync_interval,
            },
        );
        let handle = scheduler.handle();
        let scheduler_task = tokio::spawn(scheduler.run());

        let api: Api<K> = match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let watcher_handle = handle.clone();
        let watcher_task =
            tokio::spawn(async move { watch_resource(api, watcher_handle, resource_name).await });

        Ok((handle, scheduler_task, watcher_task))
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing CloudFront Controller");

        // Create Kubernetes client
        let client = Client::try_default().await?;

        let kinds = match &config.kind_config_path {
            Some(path) => {
                info!("Loading kind table from {}", path);
                KindTable::load(path)?
            }
            None => KindTable::builtin(),
        };
        let references = match &config.references_path {
            Some(path) => {
                info!("Loading bootstrap references from {}", path);
                ReferenceSet::load(path)?
            }
            None => ReferenceSet::new(),
        };
        info!("✅ {} resource kinds configured", kinds.len());

        let wiring = Wiring {
            client,
            config,
            kinds,
            references,
        };
        let (cache_policies, cache_policy_scheduler, cache_policy_watcher) =
            wiring.start::<CachePolicy>("CachePolicy")?;
        let (distributions, distribution_scheduler, distribution_watcher) =
            wiring.start::<Distribution>("Distribution")?;

        Ok(Self {
            schedulers: vec![cache_policies, distributions],
            cache_policy_scheduler,
            cache_policy_watcher,
            distribution_scheduler,
            distribution_watcher,
        })
    }

    /// Runs the controller until a watcher exits or shutdown is requested.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("CloudFront Controller running");

        // a scheduler handle that already completed must not be awaited again
        let (result, stopped) = tokio::select! {
            result = &mut self.cache_policy_watcher => (flatten("CachePolicy", result), None),
            result = &mut self.distribution_watcher => (flatten("Distribution", result), None),
            result = &mut self.cache_policy_scheduler => {
                (Err(scheduler_stopped("CachePolicy", result)), Some("CachePolicy"))
            }
            result = &mut self.distribution_scheduler => {
                (Err(scheduler_stopped("Distribution", result)), Some("Distribution"))
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                (Ok(()), None)
            }
        };

        // let in-flight passes finish before exiting
        for handle in &self.schedulers {
            handle.shutdown();
        }
        self.cache_policy_watcher.abort();
        self.distribution_watcher.abort();
        let schedulers = [
            ("CachePolicy", self.cache_policy_scheduler),
            ("Distribution", self.distribution_scheduler),
        ];
        for (name, task) in schedulers {
            if stopped == Some(name) {
                continue;
            }
            if let Err(e) = task.await {
                error!("{} scheduler failed during shutdown: {}", name, e);
            }
        }

        if let Err(e) = &result {
            error!("Controller stopped: {}", e);
        }
        result
    }
}

fn flatten(
    name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", name, e)))?
}

fn scheduler_stopped(name: &str, result: Result<(), tokio::task::JoinError>) -> ControllerError {
    match result {
        Ok(()) => ControllerError::Watch(format!("{} scheduler stopped", name)),
        Err(e) => ControllerError::Watch(format!("{} scheduler panicked: {}", name, e)),
    }
}
