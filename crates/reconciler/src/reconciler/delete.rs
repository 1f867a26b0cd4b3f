//! Guarded deletion
//!
//! A record is released only after a remote read confirms the resource is
//! gone. Kinds with delete guards get the guard update and a confirmed
//! re-read strictly before the delete call.

use super::{Pass, ReconcileOutcome, Reconciler};
use crate::differ::{self, RemoteOperation};
use crate::error::ReconcileError;
use crate::kind::DeleteGuard;
use crate::store::ResourceRecord;
use cloud_client::{CloudError, ObservedState};
use crds::ReconcilePhase;
use tokio::time::Instant;
use tracing::{debug, info};

impl Reconciler {
    pub(super) async fn reconcile_delete(
        &self,
        record: ResourceRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !record.has_finalizer {
            debug!("{} {} has no finalizer, nothing to clean up", self.kind.kind, record.key);
            self.forget(&record.key);
            return Ok(ReconcileOutcome::Done);
        }

        let mut pass = Pass::default();
        match self.delete_pass(&record, &mut pass).await {
            Ok(true) => {
                self.store.release(&record).await?;
                self.log_released(&record.key);
                self.forget(&record.key);
                Ok(ReconcileOutcome::Released)
            }
            Ok(false) => {
                debug!(
                    "{} {} delete accepted, waiting for the remote resource to disappear",
                    self.kind.kind, record.key
                );
                let requeue = Some(self.kind.ready_requeue());
                self.finish(&record, pass, Ok(requeue), ReconcilePhase::Deleting).await
            }
            Err(e) => self.finish(&record, pass, Err(e), ReconcilePhase::Deleting).await,
        }
    }

    /// Returns true once the remote resource is confirmed absent
    async fn delete_pass(&self, record: &ResourceRecord, pass: &mut Pass) -> Result<bool, ReconcileError> {
        let observed = match &record.status.id {
            Some(id) => match self.backend.read(id).await {
                Ok(observed) => Some(observed),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
            // a create may have succeeded without its id being recorded
            None => self.backend.find_by_token(&record.idempotency_token()).await?,
        };
        let Some(observed) = observed else {
            return Ok(true);
        };
        pass.observed = Some(observed.clone());

        info!("Deleting {} {} for {}", self.kind.kind, observed.id, record.key);
        self.delete_remote(&observed).await?;

        match self.backend.read(&observed.id).await {
            Err(e) if e.is_not_found() => Ok(true),
            Ok(still_there) => {
                pass.observed = Some(still_there);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Executes the kind's delete plan against one remote resource
    pub(super) async fn delete_remote(&self, observed: &ObservedState) -> Result<(), ReconcileError> {
        let mut current = observed.clone();
        for op in differ::plan_delete(&self.kind, &current) {
            match op {
                RemoteOperation::Update(delta) => {
                    self.ensure_modifiable(&current)?;
                    info!(
                        "Applying delete guard to {} {}: {:?}",
                        self.kind.kind,
                        current.id,
                        delta.paths()
                    );
                    current = self
                        .backend
                        .update(&current.id, &delta, current.e_tag.as_deref())
                        .await?;
                }
                RemoteOperation::Confirm(guards) => {
                    current = self.confirm_guards(&current.id, &guards).await?;
                }
                RemoteOperation::Delete => {
                    self.ensure_modifiable(&current)?;
                    match self.backend.delete(&current.id, current.e_tag.as_deref()).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(CloudError::Conflict(message)) => {
                            return Err(ReconcileError::GuardViolation(message));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                other => {
                    debug!("Ignoring {} in delete plan", other.name());
                }
            }
        }
        Ok(())
    }

    /// Re-reads until every guard holds and the resource is settled, up to
    /// the kind's guard wait ceiling
    pub(super) async fn confirm_guards(
        &self,
        id: &str,
        guards: &[DeleteGuard],
    ) -> Result<ObservedState, ReconcileError> {
        let deadline = Instant::now() + self.kind.guard_wait();
        loop {
            let current = self.backend.read(id).await?;
            let guarded = guards.iter().all(|g| g.is_satisfied_by(&current.config));
            if guarded && self.kind.is_ready_state(current.lifecycle_state.as_deref()) {
                debug!("Delete guards confirmed on {} {}", self.kind.kind, id);
                return Ok(current);
            }
            if Instant::now() >= deadline {
                return Err(ReconcileError::Timeout(format!(
                    "delete guards on {} {} not confirmed within {:?} (state {})",
                    self.kind.kind,
                    id,
                    self.kind.guard_wait(),
                    current.lifecycle_state.as_deref().unwrap_or("unknown")
                )));
            }
            tokio::time::sleep(self.kind.poll_interval()).await;
        }
    }
}
