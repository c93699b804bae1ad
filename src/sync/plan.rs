// file: src/sync/plan.rs
// version: 1.0.0
// guid: 8d2e4f60-7a1b-4c93-b5e8-0f6a2c9d1e73

//! Pure computation of what a region needs

use super::{ArtifactState, DesiredArtifact, RemoteArtifact};
use std::collections::{HashMap, HashSet};

/// Knobs controlling which changes a plan may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Replace artifacts that already exist
    pub update: bool,
    /// Delete managed artifacts that are not expected
    pub delete_orphans: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            update: false,
            delete_orphans: true,
        }
    }
}

impl From<crate::config::SyncOptions> for SyncPolicy {
    fn from(options: crate::config::SyncOptions) -> Self {
        Self {
            update: options.update_images,
            delete_orphans: options.delete_orphans,
        }
    }
}

/// Changes needed to make one region match the expected artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Expected artifacts missing remotely
    pub create: Vec<DesiredArtifact>,
    /// Expected artifacts that exist and must be replaced
    pub recreate: Vec<(RemoteArtifact, DesiredArtifact)>,
    /// Managed artifacts to remove: orphans and duplicates
    pub delete: Vec<RemoteArtifact>,
    /// Expected artifacts that exist but need their publication fixed
    pub repair: Vec<RemoteArtifact>,
    /// Names already in the desired state
    pub unchanged: Vec<String>,
}

impl SyncPlan {
    /// Compare expected artifacts with what a store listed.
    ///
    /// Expected names are unique; a repeated expected name is ignored after
    /// its first occurrence. Unmanaged artifacts never appear in `delete`,
    /// `recreate` or `repair`. A broken managed artifact is recreated even
    /// when `update` is off. Artifacts flagged `keep_when_orphaned` are only
    /// ever deleted as part of a recreate.
    pub fn compute(
        expected: &[DesiredArtifact],
        existing: &[RemoteArtifact],
        policy: SyncPolicy,
    ) -> Self {
        let mut by_name: HashMap<&str, Vec<&RemoteArtifact>> = HashMap::new();
        for artifact in existing {
            by_name.entry(artifact.name.as_str()).or_default().push(artifact);
        }

        let mut plan = SyncPlan::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for desired in expected {
            if !seen.insert(desired.name.as_str()) {
                continue;
            }

            let Some(matches) = by_name.get(desired.name.as_str()) else {
                plan.create.push(desired.clone());
                continue;
            };

            // keep a healthy copy over a broken one when there are duplicates
            let keep = matches
                .iter()
                .position(|a| a.state != ArtifactState::Broken)
                .unwrap_or(0);
            let Some(first) = matches.get(keep).copied() else {
                plan.create.push(desired.clone());
                continue;
            };

            plan.delete.extend(
                matches
                    .iter()
                    .enumerate()
                    .filter(|(i, a)| *i != keep && a.is_disposable())
                    .map(|(_, a)| RemoteArtifact::clone(a)),
            );

            if !first.managed {
                plan.unchanged.push(desired.name.clone());
            } else if policy.update || first.state == ArtifactState::Broken {
                plan.recreate.push((first.clone(), desired.clone()));
            } else if first.state == ArtifactState::Unpublished {
                plan.repair.push(first.clone());
            } else {
                plan.unchanged.push(desired.name.clone());
            }
        }

        if policy.delete_orphans {
            plan.delete.extend(
                existing
                    .iter()
                    .filter(|a| a.is_disposable() && !seen.contains(a.name.as_str()))
                    .cloned(),
            );
        }

        plan
    }

    /// True when applying the plan changes nothing
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.recreate.is_empty()
            && self.delete.is_empty()
            && self.repair.is_empty()
    }
}
