//! Configuration loading: defaults, YAML file, `CHRONA_*` environment
//! overrides. Flag overrides are applied by the CLI on top of this.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use chrona_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ENV_PREFIX: &str = "CHRONA";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kubeconfig: String,
    pub context: String,
    pub snapshot: SnapshotConfig,
    pub git: GitConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

/// What to capture and where the snapshot tree lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub output_dir: String,
    pub resource_types: Vec<String>,
    /// Allow-list; empty means all namespaces.
    pub namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    /// Dotted paths removed from raw objects before serialization.
    pub strip_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub author_name: String,
    pub author_email: String,
    pub commit_message_prefix: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            context: String::new(),
            snapshot: SnapshotConfig::default(),
            git: GitConfig::default(),
            watch: WatchConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: "./infra-snapshots".to_string(),
            resource_types: [
                "deployments",
                "services",
                "configmaps",
                "secrets",
                "ingresses",
                "statefulsets",
                "daemonsets",
                "cronjobs",
                "persistentvolumeclaims",
                "networkpolicies",
                "serviceaccounts",
                "roles",
                "rolebindings",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            namespaces: Vec::new(),
            exclude_namespaces: ["kube-system", "kube-public", "kube-node-lease"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            strip_fields: [
                ".metadata.managedFields",
                ".metadata.resourceVersion",
                ".metadata.uid",
                ".metadata.generation",
                ".status",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: "GitOps-Time-Machine".to_string(),
            author_email: "gitops-tm@automated".to_string(),
            commit_message_prefix: "[snapshot]".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { schedule: "*/5 * * * *".to_string() }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "text".to_string() }
    }
}

/// Load configuration: file (explicit path, or `./config.yaml` when present),
/// then environment overrides. A missing explicit file is an error; a missing
/// implicit one just means defaults.
pub fn load(cfg_file: Option<&Path>) -> Result<Config> {
    let mut cfg = match cfg_file {
        Some(path) => from_file(path)?,
        None => {
            let implicit = Path::new("config.yaml");
            if implicit.exists() {
                from_file(implicit)?
            } else {
                Config::default()
            }
        }
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
}

fn from_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
    let cfg: Config = serde_yaml::from_str(&text)
        .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "config file loaded");
    Ok(cfg)
}

impl Config {
    /// Apply `CHRONA_*` overrides. The option surface is closed, so each key
    /// is mapped explicitly; list-valued keys split on commas.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |suffix: &str| lookup(&format!("{}_{}", ENV_PREFIX, suffix));

        if let Some(v) = var("KUBECONFIG") {
            self.kubeconfig = v;
        }
        if let Some(v) = var("CONTEXT") {
            self.context = v;
        }
        if let Some(v) = var("SNAPSHOT_OUTPUT_DIR") {
            self.snapshot.output_dir = v;
        }
        if let Some(v) = var("SNAPSHOT_RESOURCE_TYPES") {
            self.snapshot.resource_types = split_list(&v);
        }
        if let Some(v) = var("SNAPSHOT_NAMESPACES") {
            self.snapshot.namespaces = split_list(&v);
        }
        if let Some(v) = var("SNAPSHOT_EXCLUDE_NAMESPACES") {
            self.snapshot.exclude_namespaces = split_list(&v);
        }
        if let Some(v) = var("SNAPSHOT_STRIP_FIELDS") {
            self.snapshot.strip_fields = split_list(&v);
        }
        if let Some(v) = var("GIT_AUTHOR_NAME") {
            self.git.author_name = v;
        }
        if let Some(v) = var("GIT_AUTHOR_EMAIL") {
            self.git.author_email = v;
        }
        if let Some(v) = var("GIT_COMMIT_MESSAGE_PREFIX") {
            self.git.commit_message_prefix = v;
        }
        if let Some(v) = var("GIT_BRANCH") {
            self.git.branch = v;
        }
        if let Some(v) = var("WATCH_SCHEDULE") {
            self.watch.schedule = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log.format = v;
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_kubeconfig() -> String {
    if let Ok(env) = std::env::var("KUBECONFIG") {
        if !env.is_empty() {
            return env;
        }
    }
    match std::env::var_os("HOME") {
        Some(home) => {
            let mut p = PathBuf::from(home);
            p.push(".kube");
            p.push("config");
            p.to_string_lossy().to_string()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = Config::default();
        assert_eq!(cfg.snapshot.output_dir, "./infra-snapshots");
        assert_eq!(cfg.git.branch, "main");
        assert_eq!(cfg.watch.schedule, "*/5 * * * *");
        assert_eq!(cfg.log.level, "info");
        assert!(cfg.snapshot.resource_types.contains(&"deployments".to_string()));
        // Cluster-scoped RBAC kinds are opt-in.
        assert!(!cfg.snapshot.resource_types.contains(&"clusterroles".to_string()));
        assert_eq!(
            cfg.snapshot.exclude_namespaces,
            vec!["kube-system", "kube-public", "kube-node-lease"]
        );
    }

    #[test]
    fn partial_file_merges_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "snapshot:\n  output_dir: /tmp/snaps\ngit:\n  branch: trunk").unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.snapshot.output_dir, "/tmp/snaps");
        assert_eq!(cfg.git.branch, "trunk");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.git.commit_message_prefix, "[snapshot]");
        assert_eq!(cfg.watch.schedule, "*/5 * * * *");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/chrona.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| match key {
            "CHRONA_SNAPSHOT_OUTPUT_DIR" => Some("/var/lib/chrona".to_string()),
            "CHRONA_SNAPSHOT_NAMESPACES" => Some("default, staging".to_string()),
            "CHRONA_LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        });
        assert_eq!(cfg.snapshot.output_dir, "/var/lib/chrona");
        assert_eq!(cfg.snapshot.namespaces, vec!["default", "staging"]);
        assert_eq!(cfg.log.format, "json");
    }

    #[test]
    fn comma_list_drops_empty_segments() {
        assert_eq!(split_list("a,,b, "), vec!["a", "b"]);
    }
}
