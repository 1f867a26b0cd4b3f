//! Create, update and tag convergence

use super::{Pass, Reconciler};
use crate::differ::{self, RemoteOperation};
use crate::error::ReconcileError;
use crate::store::{DesiredState, ResourceRecord};
use cloud_client::{CreateRequest, ObservedState};
use std::time::Duration;
use tracing::{debug, info};

impl Reconciler {
    /// Observes the remote resource, plans and applies the plan.
    ///
    /// Returns a requeue delay when the resource is still settling.
    pub(super) async fn sync(
        &self,
        record: &ResourceRecord,
        pass: &mut Pass,
    ) -> Result<Option<Duration>, ReconcileError> {
        let desired = DesiredState::new(
            self.references.resolve(&record.desired.config)?,
            record.desired.tags.clone(),
        );
        if !desired.config.is_object() {
            return Err(ReconcileError::InvalidSpec(format!(
                "{} {} config must be an object",
                self.kind.kind, record.key
            )));
        }

        pass.observed = self.observe(record, pass).await?;

        let ops = differ::plan(&self.kind, &desired, pass.observed.as_ref());
        if ops.is_empty() {
            debug!("{} {} is in sync", self.kind.kind, record.key);
        } else {
            debug!(
                "{} {} plan: {:?}",
                self.kind.kind,
                record.key,
                ops.iter().map(RemoteOperation::name).collect::<Vec<_>>()
            );
        }

        for op in ops {
            self.apply(record, op, pass).await?;
        }

        let settled = pass
            .observed
            .as_ref()
            .is_some_and(|o| self.kind.is_ready_state(o.lifecycle_state.as_deref()));
        Ok(if settled { None } else { Some(self.kind.ready_requeue()) })
    }

    /// Reads the remote resource by recorded id, or adopts one created
    /// earlier with this record's idempotency token
    async fn observe(
        &self,
        record: &ResourceRecord,
        pass: &mut Pass,
    ) -> Result<Option<ObservedState>, ReconcileError> {
        let found = match &record.status.id {
            Some(id) => match self.backend.read(id).await {
                Ok(observed) => {
                    self.clear_read_misses(&record.key);
                    observed
                }
                Err(e) if e.is_not_found() => {
                    let misses = self.record_read_miss(&record.key);
                    if misses > self.kind.max_read_misses {
                        self.clear_read_misses(&record.key);
                        pass.remote_gone = true;
                        return Err(ReconcileError::StaleId(format!(
                            "{} {} not found after {} consecutive reads",
                            self.kind.kind, id, misses
                        )));
                    }
                    return Err(ReconcileError::ReadMiss(format!(
                        "{} {} not found ({} of {} tolerated misses)",
                        self.kind.kind, id, misses, self.kind.max_read_misses
                    )));
                }
                Err(e) => return Err(e.into()),
            },
            None => {
                let token = record.idempotency_token();
                match self.backend.find_by_token(&token).await? {
                    Some(existing) => {
                        info!(
                            "Adopting existing {} {} for {} (token {})",
                            self.kind.kind, existing.id, record.key, token
                        );
                        existing
                    }
                    None => return Ok(None),
                }
            }
        };

        let mut observed = found;
        if let Some(arn) = observed.arn.clone() {
            observed.tags = self.backend.list_tags(&arn).await?;
        }
        Ok(Some(observed))
    }

    async fn apply(
        &self,
        record: &ResourceRecord,
        op: RemoteOperation,
        pass: &mut Pass,
    ) -> Result<(), ReconcileError> {
        match op {
            RemoteOperation::Create { config, mut tags } => {
                tags.extend(self.kind.system_tags(&record.key));
                let request = CreateRequest {
                    config,
                    tags,
                    idempotency_token: record.idempotency_token(),
                };
                info!("Creating {} for {}", self.kind.kind, record.key);
                let created = self.backend.create(&request).await?;
                info!("✅ Created {} {} for {}", self.kind.kind, created.id, record.key);
                pass.observed = Some(created);
                pass.remote_gone = false;
            }
            RemoteOperation::Update(delta) => {
                let current = self.current(pass)?;
                self.ensure_modifiable(current)?;
                info!(
                    "Updating {} {} for {}: {:?}",
                    self.kind.kind,
                    current.id,
                    record.key,
                    delta.paths()
                );
                let mut updated = self
                    .backend
                    .update(&current.id, &delta, current.e_tag.as_deref())
                    .await?;
                if updated.tags.is_empty() {
                    updated.tags = current.tags.clone();
                }
                pass.observed = Some(updated);
            }
            RemoteOperation::SetTags(tags) => {
                let current = self.current(pass)?;
                let arn = Self::arn_of(current)?;
                debug!("Setting {} tags on {}", tags.len(), arn);
                self.backend.set_tags(&arn, &tags).await?;
                if let Some(observed) = pass.observed.as_mut() {
                    for tag in tags {
                        match observed.tags.iter_mut().find(|t| t.key == tag.key) {
                            Some(existing) => existing.value = tag.value,
                            None => observed.tags.push(tag),
                        }
                    }
                }
            }
            RemoteOperation::RemoveTags(keys) => {
                let current = self.current(pass)?;
                let arn = Self::arn_of(current)?;
                debug!("Removing tags {:?} from {}", keys, arn);
                self.backend.remove_tags(&arn, &keys).await?;
                if let Some(observed) = pass.observed.as_mut() {
                    observed.tags.retain(|t| !keys.contains(&t.key));
                }
            }
            RemoteOperation::Delete => {
                let current = self.current(pass)?.clone();
                info!(
                    "Replacing {} {} for {}: an immutable field changed",
                    self.kind.kind, current.id, record.key
                );
                self.delete_remote(&current).await?;
                pass.observed = None;
                pass.remote_gone = true;
            }
            RemoteOperation::Confirm(guards) => {
                let current = self.current(pass)?.clone();
                pass.observed = Some(self.confirm_guards(&current.id, &guards).await?);
            }
        }
        Ok(())
    }

    fn current<'a>(&self, pass: &'a Pass) -> Result<&'a ObservedState, ReconcileError> {
        pass.observed.as_ref().ok_or_else(|| {
            ReconcileError::ReadMiss(format!("no observed {} to modify", self.kind.kind))
        })
    }

    fn arn_of(observed: &ObservedState) -> Result<String, ReconcileError> {
        observed.arn.clone().ok_or_else(|| {
            ReconcileError::ReadMiss(format!("{} has no ARN yet", observed.id))
        })
    }

    /// Modifying a resource in a transitional lifecycle state is refused remotely
    pub(super) fn ensure_modifiable(&self, observed: &ObservedState) -> Result<(), ReconcileError> {
        if self.kind.is_ready_state(observed.lifecycle_state.as_deref()) {
            return Ok(());
        }
        Err(ReconcileError::NotReady(format!(
            "{} {} is {}",
            self.kind.kind,
            observed.id,
            observed.lifecycle_state.as_deref().unwrap_or("in an unknown state")
        )))
    }
}
