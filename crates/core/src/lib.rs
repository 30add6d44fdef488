//! Chrona core types: the snapshot data model shared by every crate.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized cluster object as observed at capture time.
///
/// An empty `namespace` denotes a cluster-scoped resource. `spec` and `data`
/// are free-form nested documents; `raw` retains the full post-strip object
/// for faithful serialization and is never encoded as a field of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip)]
    pub raw: Option<Value>,
}

impl Resource {
    /// Build a Resource from a raw manifest tree (`apiVersion`/`kind`/
    /// `metadata`/...). Returns `None` when `metadata.name` is missing.
    /// Empty label/annotation mappings are treated as absent.
    pub fn from_raw_manifest(raw: Value) -> Option<Self> {
        let meta = raw.get("metadata")?;
        let name = meta.get("name")?.as_str()?.to_string();
        let namespace = meta
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let api_version = raw
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = raw.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        let labels = meta.get("labels").and_then(string_map).filter(|m| !m.is_empty());
        let annotations = meta.get("annotations").and_then(string_map).filter(|m| !m.is_empty());
        let spec = raw.get("spec").filter(|v| v.is_object()).cloned();
        let data = raw.get("data").filter(|v| v.is_object()).cloned();
        Some(Self {
            api_version,
            kind,
            namespace,
            name,
            labels,
            annotations,
            spec,
            data,
            raw: Some(raw),
        })
    }

    /// Stable identity of this resource within a snapshot:
    /// `namespace/Kind/name`, or `Kind/name` when cluster-scoped.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}", self.kind, self.name)
        } else {
            format!("{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// A complete point-in-time capture of cluster state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// When and how a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub timestamp: DateTime<Utc>,
    pub cluster_name: String,
    pub context: String,
    pub resource_count: usize,
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Populated after the snapshot lands in the version store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_hash: String,
}

/// Kind of drift detected for one resource identity.
///
/// The declaration order is the report sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriftKind {
    Added,
    Removed,
    Modified,
}

/// A change to one field of a modified resource. Either side may be absent
/// when a key appeared or disappeared inside a nested mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// One drifted resource between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEntry {
    #[serde(rename = "type")]
    pub kind: DriftKind,
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_diffs: Vec<FieldDiff>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub total_resources: usize,
    pub added_resources: usize,
    pub removed_resources: usize,
    pub modified_resources: usize,
    pub unchanged_resources: usize,
}

/// Result of comparing two snapshots. Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub timestamp: DateTime<Utc>,
    pub base_ref: String,
    pub target_ref: String,
    pub summary: DriftSummary,
    #[serde(default)]
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.entries.is_empty()
    }
}

/// One recorded snapshot in the version store's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub commit_hash: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub resource_count: usize,
    pub author: String,
}

/// Typed errors surfaced by the subsystems. The CLI layer decides exit
/// codes; no subsystem exits the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),
    #[error("cluster connect: {0}")]
    ClusterConnect(String),
    #[error("cluster list: {0}")]
    ClusterList(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("store: {0}")]
    Store(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("scheduler: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn string_map(v: &Value) -> Option<BTreeMap<String, String>> {
    let obj = v.as_object()?;
    let mut out = BTreeMap::new();
    for (k, val) in obj {
        out.insert(k.clone(), val.as_str()?.to_string());
    }
    Some(out)
}

pub mod prelude {
    pub use super::{
        DriftEntry, DriftKind, DriftReport, DriftSummary, Error, FieldDiff, HistoryEntry,
        Resource, Result, Snapshot, SnapshotMetadata,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(kind: &str, namespace: &str, name: &str) -> Resource {
        Resource {
            api_version: "v1".into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            labels: None,
            annotations: None,
            spec: None,
            data: None,
            raw: None,
        }
    }

    #[test]
    fn full_name_namespaced() {
        assert_eq!(bare("Deployment", "prod", "api").full_name(), "prod/Deployment/api");
    }

    #[test]
    fn full_name_cluster_scoped() {
        assert_eq!(bare("ClusterRole", "", "admin").full_name(), "ClusterRole/admin");
    }

    #[test]
    fn drift_kind_sort_order() {
        assert!(DriftKind::Added < DriftKind::Removed);
        assert!(DriftKind::Removed < DriftKind::Modified);
    }

    #[test]
    fn metadata_encodes_camel_case_and_omits_empty_commit() {
        let meta = SnapshotMetadata {
            timestamp: Utc::now(),
            cluster_name: "kind-dev".into(),
            context: "kind-dev".into(),
            resource_count: 3,
            namespaces: vec!["default".into()],
            commit_hash: String::new(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("clusterName"));
        assert!(json.contains("resourceCount"));
        assert!(!json.contains("commitHash"));
    }

    #[test]
    fn drift_kind_encodes_uppercase() {
        assert_eq!(serde_json::to_string(&DriftKind::Added).unwrap(), "\"ADDED\"");
    }
}
