//! Kubernetes resource watchers.
//!
//! Each watcher turns the event stream of one CRD into reconcile tasks. A
//! status-only update does not enqueue anything; a spec change (new
//! generation) or a deletion request does. The periodic resync in the
//! scheduler covers anything a restarted watch might have missed.

use crate::error::ControllerError;
use crate::resource::{resource_key, ManagedResource};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use reconciler::{ResourceKey, SchedulerHandle, TriggerReason};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Decides whether an observed object needs a pass
#[derive(Debug, Default)]
pub struct EventFilter {
    seen_generations: HashMap<ResourceKey, i64>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trigger for `obj`, or `None` for status-only updates
    pub fn trigger<K: ManagedResource>(&mut self, obj: &K) -> Option<(ResourceKey, TriggerReason)> {
        let key = resource_key(obj);
        if obj.meta().deletion_timestamp.is_some() {
            self.seen_generations.remove(&key);
            return Some((key, TriggerReason::DeleteRequested));
        }
        let generation = obj.meta().generation.unwrap_or(0);
        match self.seen_generations.insert(key.clone(), generation) {
            Some(previous) if previous == generation => None,
            _ => Some((key, TriggerReason::SpecChanged)),
        }
    }
}

/// Watches one CRD and feeds its scheduler until the stream ends
pub async fn watch_resource<K: ManagedResource>(
    api: Api<K>,
    handle: SchedulerHandle,
    resource_name: &str,
) -> Result<(), ControllerError> {
    info!("Starting {} watcher", resource_name);
    let mut filter = EventFilter::new();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .touched_objects()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(obj) => match filter.trigger(&obj) {
                Some((key, reason)) => {
                    debug!("{} {} changed ({:?}), enqueueing", resource_name, obj.name_any(), reason);
                    handle.enqueue(key, reason);
                }
                None => debug!("Ignoring status-only update of {} {}", resource_name, obj.name_any()),
            },
            Err(e) => error!("{} watch error: {}", resource_name, e),
        }
    }

    Err(ControllerError::Watch(format!("{} watch stream ended", resource_name)))
}
