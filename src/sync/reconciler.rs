// file: src/sync/reconciler.rs
// version: 1.0.0
// guid: 3c9f5e17-b2a8-4d40-8e6b-0a7d4f2c91b5

//! Applies sync plans to an image store

use super::{DesiredArtifact, ImageStore, RetryPolicy, SyncAction, SyncPlan, SyncPolicy, SyncReport};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Drives an [`ImageStore`] towards the desired artifacts, region by region
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    pub policy: SyncPolicy,
    pub retry: RetryPolicy,
    /// Log the plan without applying it
    pub dry_run: bool,
}

impl Reconciler {
    pub fn new(policy: SyncPolicy, retry: RetryPolicy, dry_run: bool) -> Self {
        Self {
            policy,
            retry,
            dry_run,
        }
    }

    /// Reconcile every region; failures are recorded and the run continues
    pub async fn run(
        &self,
        store: &dyn ImageStore,
        desired_by_region: &BTreeMap<String, Vec<DesiredArtifact>>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        for (region, desired) in desired_by_region {
            report.merge(self.reconcile_region(store, region, desired).await);
        }
        report.log_summary(store.name());
        report
    }

    /// Reconcile one region
    pub async fn reconcile_region(
        &self,
        store: &dyn ImageStore,
        region: &str,
        desired: &[DesiredArtifact],
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let label = format!("list {} in {}", store.name(), region);

        let existing = match self.retry.run(&label, || store.list(region)).await {
            Ok(existing) => existing,
            Err(e) => {
                report.record_failure(region, "", SyncAction::List, e);
                return report;
            }
        };

        let plan = SyncPlan::compute(desired, &existing, self.policy);
        report.unchanged = plan.unchanged.len();
        log_plan(store.name(), region, &plan);

        if self.dry_run {
            info!("dry run: no changes applied to {} in {}", store.name(), region);
            return report;
        }

        for artifact in &plan.delete {
            let label = format!("delete {} in {}", artifact.name, region);
            match self.retry.run(&label, || store.delete(region, artifact)).await {
                Ok(()) => {
                    info!("deleted {} {} ({}) in {}", store.name(), artifact.name, artifact.id, region);
                    report.deleted += 1;
                }
                Err(e) => report.record_failure(region, &artifact.name, SyncAction::Delete, e),
            }
        }

        for artifact in &plan.repair {
            let label = format!("repair {} in {}", artifact.name, region);
            match self.retry.run(&label, || store.repair(region, artifact)).await {
                Ok(()) => {
                    info!("repaired {} {} ({}) in {}", store.name(), artifact.name, artifact.id, region);
                    report.repaired += 1;
                }
                Err(e) => report.record_failure(region, &artifact.name, SyncAction::Repair, e),
            }
        }

        // create is not idempotent and runs once
        for (artifact, replacement) in &plan.recreate {
            let label = format!("delete {} in {}", artifact.name, region);
            if let Err(e) = self.retry.run(&label, || store.delete(region, artifact)).await {
                report.record_failure(region, &artifact.name, SyncAction::Recreate, e);
                continue;
            }
            match store.create(region, replacement).await {
                Ok(id) => {
                    info!("recreated {} {} ({}) in {}", store.name(), replacement.name, id, region);
                    report.recreated += 1;
                }
                Err(e) => report.record_failure(region, &replacement.name, SyncAction::Recreate, e),
            }
        }

        for artifact in &plan.create {
            match store.create(region, artifact).await {
                Ok(id) => {
                    info!("created {} {} ({}) in {}", store.name(), artifact.name, id, region);
                    report.created += 1;
                }
                Err(e) => report.record_failure(region, &artifact.name, SyncAction::Create, e),
            }
        }

        report
    }
}

fn log_plan(store: &str, region: &str, plan: &SyncPlan) {
    if plan.is_empty() {
        info!("{} in {} is up to date ({} artifacts)", store, region, plan.unchanged.len());
        return;
    }
    for artifact in &plan.delete {
        warn!("{} {} in {} will be deleted", store, artifact.name, region);
    }
    for artifact in &plan.repair {
        info!("{} {} in {} will be repaired", store, artifact.name, region);
    }
    for (artifact, _) in &plan.recreate {
        info!(
            "{} {} in {} will be recreated ({:?})",
            store, artifact.name, region, artifact.state
        );
    }
    for artifact in &plan.create {
        info!("{} {} in {} will be created", store, artifact.name, region);
    }
    for name in &plan.unchanged {
        debug!("{} {} in {} is unchanged", store, name, region);
    }
}
