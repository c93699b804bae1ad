// file: src/sync/report.rs
// version: 1.0.0
// guid: e7b2a4c8-93d1-4f56-a0e9-6c18d5b3f207

//! Outcome of a reconciliation run

use serde::Serialize;
use std::fmt;
use tracing::{error, info};

/// What the reconciler was doing when something failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    List,
    Create,
    Recreate,
    Repair,
    Delete,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncAction::List => "list",
            SyncAction::Create => "create",
            SyncAction::Recreate => "recreate",
            SyncAction::Repair => "repair",
            SyncAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One failed store operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub region: String,
    /// Artifact name; empty for region-wide failures
    pub name: String,
    pub action: SyncAction,
    pub error: String,
}

/// Counts and failures of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub recreated: usize,
    pub repaired: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    /// True only when nothing failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(
        &mut self,
        region: &str,
        name: &str,
        action: SyncAction,
        error: impl fmt::Display,
    ) {
        error!("{} of {} in {} failed: {}", action, name, region, error);
        self.failures.push(SyncFailure {
            region: region.to_string(),
            name: name.to_string(),
            action,
            error: error.to_string(),
        });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.recreated += other.recreated;
        self.repaired += other.repaired;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.failures.extend(other.failures);
    }

    /// `Err` naming the store when anything failed
    pub fn into_result(self, store: &str) -> crate::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(crate::error::ImageSyncError::SyncFailed {
                store: store.to_string(),
                failures: self.failures.len(),
            })
        }
    }

    /// Log the totals
    pub fn log_summary(&self, store: &str) {
        info!(
            "{} sync: {} created, {} recreated, {} repaired, {} deleted, {} unchanged, {} failed",
            store,
            self.created,
            self.recreated,
            self.repaired,
            self.deleted,
            self.unchanged,
            self.failures.len()
        );
        for failure in &self.failures {
            error!(
                "  {} {} in {}: {}",
                failure.action, failure.name, failure.region, failure.error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_success() {
        let mut total = SyncReport {
            created: 1,
            ..Default::default()
        };
        assert!(total.is_success());

        let mut other = SyncReport {
            deleted: 2,
            ..Default::default()
        };
        other.record_failure("eu-de", "bigip-a", SyncAction::Create, "boom");

        total.merge(other);
        assert_eq!(total.created, 1);
        assert_eq!(total.deleted, 2);
        assert!(!total.is_success());
        assert_eq!(total.failures[0].action.to_string(), "create");
    }

    #[test]
    fn test_into_result() {
        assert!(SyncReport::default().into_result("VPC image").is_ok());

        let mut report = SyncReport::default();
        report.record_failure("us-south", "", SyncAction::List, "timeout");
        let err = report.into_result("VPC image").unwrap_err();
        assert_eq!(err.to_string(), "VPC image sync finished with 1 failed operations");
    }
}
