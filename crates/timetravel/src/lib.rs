//! Time travel: materializes the snapshot as it existed at a past moment by
//! composing the version store and the snapshot store.

#![forbid(unsafe_code)]

use chrona_core::{Resource, Result, Snapshot};
use chrona_store::SnapshotStore;
use chrona_vcs::VersionStore;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub struct Engine {
    vcs: VersionStore,
    store: SnapshotStore,
}

impl Engine {
    pub fn new(vcs: VersionStore, store: SnapshotStore) -> Self {
        Self { vcs, store }
    }

    /// The snapshot as it existed at `target`: resolves the newest commit at
    /// or before that instant and materializes it.
    pub fn snapshot_at(&self, target: DateTime<Utc>) -> Result<Snapshot> {
        info!(target = %target.to_rfc3339(), "time-travel: looking up snapshot");
        let commit_hash = self.vcs.find_commit_at_or_before(target)?;
        self.snapshot_by_commit(&commit_hash)
    }

    /// Materialize a specific commit. The working tree is restored to the
    /// configured branch on every exit path, including errors.
    pub fn snapshot_by_commit(&self, commit_hash: &str) -> Result<Snapshot> {
        info!(commit = %short(commit_hash), "time-travel: checking out snapshot");
        self.vcs.checkout_at(commit_hash)?;

        let result = self.store.read().map(|mut snapshot| {
            snapshot.metadata.commit_hash = commit_hash.to_string();
            snapshot
        });

        if let Err(e) = self.vcs.checkout_branch() {
            warn!(error = %e, "failed to return to branch");
        }
        result
    }

    /// Snapshots at the two ends of a time range, for comparison.
    pub fn compare_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(Snapshot, Snapshot)> {
        info!(from = %from.to_rfc3339(), to = %to.to_rfc3339(), "time-travel: comparing time range");
        let from_snapshot = self.snapshot_at(from)?;
        let to_snapshot = self.snapshot_at(to)?;
        Ok((from_snapshot, to_snapshot))
    }

    /// Resources at `target`, optionally filtered by kind and namespace.
    pub fn list_resources_at(
        &self,
        target: DateTime<Utc>,
        kind: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>> {
        let snapshot = self.snapshot_at(target)?;
        Ok(snapshot
            .resources
            .into_iter()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .filter(|r| namespace.map_or(true, |ns| r.namespace == ns))
            .collect())
    }

    pub fn vcs(&self) -> &VersionStore {
        &self.vcs
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
