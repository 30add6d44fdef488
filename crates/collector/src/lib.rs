//! Cluster collection and normalization: turns live objects into a
//! deterministic, noise-free snapshot.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use chrona_config::Config;
use chrona_core::{Error, Resource, Result, Snapshot, SnapshotMetadata};
use chrono::Utc;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed mapping of friendly resource names to their API coordinates.
struct GvrEntry {
    group: &'static str,
    version: &'static str,
    kind: &'static str,
    plural: &'static str,
}

static RESOURCE_MAPPING: Lazy<HashMap<&'static str, GvrEntry>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut put = |name, group, version, kind, plural| {
        m.insert(name, GvrEntry { group, version, kind, plural });
    };
    put("deployments", "apps", "v1", "Deployment", "deployments");
    put("statefulsets", "apps", "v1", "StatefulSet", "statefulsets");
    put("daemonsets", "apps", "v1", "DaemonSet", "daemonsets");
    put("services", "", "v1", "Service", "services");
    put("configmaps", "", "v1", "ConfigMap", "configmaps");
    put("secrets", "", "v1", "Secret", "secrets");
    put("persistentvolumeclaims", "", "v1", "PersistentVolumeClaim", "persistentvolumeclaims");
    put("serviceaccounts", "", "v1", "ServiceAccount", "serviceaccounts");
    put("ingresses", "networking.k8s.io", "v1", "Ingress", "ingresses");
    put("networkpolicies", "networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies");
    put("cronjobs", "batch", "v1", "CronJob", "cronjobs");
    put("roles", "rbac.authorization.k8s.io", "v1", "Role", "roles");
    put("rolebindings", "rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings");
    put("clusterroles", "rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles");
    put(
        "clusterrolebindings",
        "rbac.authorization.k8s.io",
        "v1",
        "ClusterRoleBinding",
        "clusterrolebindings",
    );
    m
});

/// Annotations that churn on every server round trip.
const NOISY_ANNOTATIONS: [&str; 2] = [
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
];

/// Connects to one cluster and captures the configured resource kinds.
pub struct Collector {
    client: Client,
    cluster_name: String,
    context: String,
    config: Config,
}

impl Collector {
    /// Build a client from the configured kubeconfig and context.
    /// Connection and auth failures are fatal.
    pub async fn connect(config: &Config) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(&config.kubeconfig)
            .map_err(|e| Error::ClusterConnect(format!("reading {}: {}", config.kubeconfig, e)))?;

        let context = if config.context.is_empty() {
            kubeconfig.current_context.clone().unwrap_or_default()
        } else {
            config.context.clone()
        };
        let cluster_name = cluster_name_for(&kubeconfig, &context);

        let options = KubeConfigOptions {
            context: (!context.is_empty()).then(|| context.clone()),
            ..KubeConfigOptions::default()
        };
        let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::ClusterConnect(format!("building client config: {}", e)))?;
        let client = Client::try_from(client_config)
            .map_err(|e| Error::ClusterConnect(format!("creating client: {}", e)))?;

        info!(cluster = %cluster_name, context = %context, "cluster client ready");
        Ok(Self { client, cluster_name, context, config: config.clone() })
    }

    /// Capture the current state of all configured resource kinds.
    ///
    /// One kind failing to list is a warning, not an abort; the snapshot is a
    /// best-effort observation and partial progress beats atomicity.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        let t0 = std::time::Instant::now();
        let mut resources: Vec<Resource> = Vec::new();
        let mut namespaces: BTreeSet<String> = BTreeSet::new();

        for friendly in &self.config.snapshot.resource_types {
            let Some(entry) = RESOURCE_MAPPING.get(friendly.as_str()) else {
                warn!(resource = %friendly, "unknown resource type, skipping");
                continue;
            };
            let gvk = GroupVersionKind::gvk(entry.group, entry.version, entry.kind);
            let ar = ApiResource::from_gvk_with_plural(&gvk, entry.plural);
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

            let list_params = ListParams::default();
            let list = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::ClusterList("capture cancelled".to_string()));
                }
                res = api.list(&list_params) => res,
            };
            let list = match list {
                Ok(l) => l,
                Err(e) => {
                    warn!(resource = %friendly, error = %e, "failed to list resource");
                    counter!("collect_list_errors_total", 1u64);
                    continue;
                }
            };

            let mut count = 0usize;
            for obj in list.items {
                let mut raw = match serde_json::to_value(&obj) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(resource = %friendly, error = %e, "skipping malformed object");
                        continue;
                    }
                };
                // List responses omit per-item type metadata; restore it from
                // the kind mapping so identity survives serialization.
                if let Some(obj) = raw.as_object_mut() {
                    let api_version = if entry.group.is_empty() {
                        entry.version.to_string()
                    } else {
                        format!("{}/{}", entry.group, entry.version)
                    };
                    obj.entry("apiVersion").or_insert(Value::String(api_version));
                    obj.entry("kind").or_insert(Value::String(entry.kind.to_string()));
                }
                let Some(res) = normalize(raw, &self.config.snapshot.strip_fields) else {
                    warn!(resource = %friendly, "skipping object without metadata.name");
                    continue;
                };
                if !namespace_allowed(
                    &res.namespace,
                    &self.config.snapshot.namespaces,
                    &self.config.snapshot.exclude_namespaces,
                ) {
                    continue;
                }
                if !res.namespace.is_empty() {
                    namespaces.insert(res.namespace.clone());
                }
                resources.push(res);
                count += 1;
            }
            debug!(resource = %friendly, count, "collected resources");
        }

        let metadata = SnapshotMetadata {
            timestamp: Utc::now(),
            cluster_name: self.cluster_name.clone(),
            context: self.context.clone(),
            resource_count: resources.len(),
            namespaces: namespaces.into_iter().collect(),
            commit_hash: String::new(),
        };
        counter!("collect_objects_total", metadata.resource_count as u64);
        histogram!("collect_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            total = metadata.resource_count,
            namespaces = metadata.namespaces.len(),
            took_ms = %t0.elapsed().as_millis(),
            "snapshot collection completed"
        );
        Ok(Snapshot { metadata, resources })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }
}

/// Resolve the cluster label for the active context from the kubeconfig.
fn cluster_name_for(kubeconfig: &Kubeconfig, context: &str) -> String {
    kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context)
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Normalize one raw object: strip volatile fields, clean noisy annotations
/// inside the raw tree, then extract the normalized Resource. Returns `None`
/// when the object has no `metadata.name`.
pub fn normalize(mut raw: Value, strip_paths: &[String]) -> Option<Resource> {
    for path in strip_paths {
        strip_path(&mut raw, path);
    }
    clean_annotations(&mut raw);
    Resource::from_raw_manifest(raw)
}

/// Remove one dotted path (e.g. `.metadata.managedFields`) from a raw tree.
/// Missing intermediate keys are a no-op.
fn strip_path(raw: &mut Value, path: &str) {
    let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
    let mut node = raw;
    while let Some(seg) = segments.next() {
        let Some(obj) = node.as_object_mut() else { return };
        if segments.peek().is_none() {
            obj.remove(seg);
            return;
        }
        match obj.get_mut(seg) {
            Some(next) => node = next,
            None => return,
        }
    }
}

/// Drop known-noisy annotations from the raw tree; an annotation mapping
/// left empty is removed entirely so it reads back as absent.
fn clean_annotations(raw: &mut Value) {
    let Some(meta) = raw.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    let emptied = match meta.get_mut("annotations").and_then(Value::as_object_mut) {
        Some(annos) => {
            for key in NOISY_ANNOTATIONS {
                annos.remove(key);
            }
            annos.is_empty()
        }
        None => return,
    };
    if emptied {
        meta.remove("annotations");
    }
}

/// Deny-list wins; a non-empty allow-list then restricts to its members.
fn namespace_allowed(namespace: &str, allow: &[String], deny: &[String]) -> bool {
    if deny.iter().any(|d| d == namespace) {
        return false;
    }
    if !allow.is_empty() && !allow.iter().any(|a| a == namespace) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_strips() -> Vec<String> {
        chrona_config::SnapshotConfig::default().strip_fields
    }

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "nginx",
                "namespace": "default",
                "uid": "8b9c7e9a-0000-0000-0000-000000000000",
                "resourceVersion": "12345",
                "generation": 4,
                "managedFields": [{"manager": "kubectl"}],
                "labels": {"app": "nginx"},
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{...}",
                    "team": "platform"
                }
            },
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3}
        })
    }

    #[test]
    fn stripping_is_a_fixed_point() {
        let res = normalize(deployment(), &default_strips()).unwrap();
        let raw = res.raw.as_ref().unwrap();
        let meta = raw.get("metadata").unwrap().as_object().unwrap();
        assert!(!meta.contains_key("managedFields"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("uid"));
        assert!(!meta.contains_key("generation"));
        assert!(raw.get("status").is_none());

        // Normalizing the already-normalized raw changes nothing.
        let again = normalize(raw.clone(), &default_strips()).unwrap();
        assert_eq!(again.raw, res.raw);
    }

    #[test]
    fn noisy_annotations_are_dropped() {
        let res = normalize(deployment(), &default_strips()).unwrap();
        let annos = res.annotations.unwrap();
        assert_eq!(annos.len(), 1);
        assert_eq!(annos.get("team").map(String::as_str), Some("platform"));
        // The retained raw mapping agrees with the cleaned view.
        let raw_annos = res.raw.unwrap()["metadata"]["annotations"].clone();
        assert_eq!(raw_annos, json!({"team": "platform"}));
    }

    #[test]
    fn all_noisy_annotations_means_absent() {
        let mut obj = deployment();
        obj["metadata"]["annotations"] = json!({
            "kubectl.kubernetes.io/last-applied-configuration": "{...}"
        });
        let res = normalize(obj, &default_strips()).unwrap();
        assert!(res.annotations.is_none());
        assert!(res.raw.unwrap()["metadata"].get("annotations").is_none());
    }

    #[test]
    fn spec_and_data_are_extracted() {
        let res = normalize(deployment(), &default_strips()).unwrap();
        assert_eq!(res.spec, Some(json!({"replicas": 3})));
        assert!(res.data.is_none());

        let cm = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "default"},
            "data": {"key": "value"}
        });
        let res = normalize(cm, &default_strips()).unwrap();
        assert_eq!(res.data, Some(json!({"key": "value"})));
        assert!(res.spec.is_none());
    }

    #[test]
    fn object_without_name_is_rejected() {
        let obj = json!({"apiVersion": "v1", "kind": "Service", "metadata": {}});
        assert!(normalize(obj, &default_strips()).is_none());
    }

    #[test]
    fn strip_path_tolerates_missing_segments() {
        let mut obj = json!({"metadata": {"name": "x"}});
        strip_path(&mut obj, ".metadata.managedFields");
        strip_path(&mut obj, ".status.conditions");
        assert_eq!(obj, json!({"metadata": {"name": "x"}}));
    }

    #[test]
    fn namespace_policy_deny_wins() {
        let allow = vec!["default".to_string(), "kube-system".to_string()];
        let deny = vec!["kube-system".to_string()];
        assert!(namespace_allowed("default", &allow, &deny));
        assert!(!namespace_allowed("kube-system", &allow, &deny));
        assert!(!namespace_allowed("staging", &allow, &deny));
        // Empty allow-list admits everything not denied.
        assert!(namespace_allowed("staging", &[], &deny));
    }

    #[test]
    fn mapping_covers_configured_defaults() {
        for friendly in chrona_config::SnapshotConfig::default().resource_types {
            assert!(
                RESOURCE_MAPPING.contains_key(friendly.as_str()),
                "no GVR mapping for {}",
                friendly
            );
        }
        assert!(RESOURCE_MAPPING.get("unknown-kind").is_none());
    }

    #[test]
    fn mapping_places_kinds_in_expected_groups() {
        let ing = RESOURCE_MAPPING.get("ingresses").unwrap();
        assert_eq!(ing.group, "networking.k8s.io");
        let svc = RESOURCE_MAPPING.get("services").unwrap();
        assert_eq!(svc.group, "");
        let cj = RESOURCE_MAPPING.get("cronjobs").unwrap();
        assert_eq!((cj.group, cj.version, cj.plural), ("batch", "v1", "cronjobs"));
    }
}
