//! Snapshot store: serializes a snapshot to a deterministic directory tree
//! of YAML manifests and reads it back.
//!
//! Layout, rooted at the configured output directory:
//!
//! ```text
//! <root>/.git/                                   (owned by the version store)
//! <root>/_metadata.yaml
//! <root>/_cluster/<kind-lower>/<safe-name>.yaml  (cluster-scoped)
//! <root>/<namespace>/<kind-lower>/<safe-name>.yaml
//! ```

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrona_core::{Error, Resource, Result, Snapshot, SnapshotMetadata};
use serde_json::Value;
use tracing::{info, warn};

pub const METADATA_FILE: &str = "_metadata.yaml";
const CLUSTER_DIR: &str = "_cluster";
const GIT_DIR: &str = ".git";

/// Characters that cannot appear in a manifest file name.
const UNSAFE_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a snapshot. The tree is cleaned first (everything but the
    /// version-store directory) so resources deleted from the cluster
    /// actually disappear and the next commit records their removal.
    ///
    /// Individual resource write failures are logged and skipped; the write
    /// as a whole succeeds once metadata is on disk.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        info!(root = %self.root.display(), "writing snapshot to disk");
        self.clean_tree()?;
        self.write_metadata(&snapshot.metadata)?;

        let mut written = 0usize;
        for resource in &snapshot.resources {
            match self.write_resource(resource) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(resource = %resource.full_name(), error = %e, "failed to write resource");
                }
            }
        }
        info!(resources = written, "snapshot written to disk");
        Ok(())
    }

    /// Load the snapshot currently materialized in the tree. The resource
    /// count is recomputed from what was actually decoded.
    pub fn read(&self) -> Result<Snapshot> {
        let metadata_path = self.root.join(METADATA_FILE);
        let text = fs::read_to_string(&metadata_path)
            .map_err(|e| Error::Store(format!("reading {}: {}", metadata_path.display(), e)))?;
        let mut metadata: SnapshotMetadata = serde_yaml::from_str(&text)
            .map_err(|e| Error::Serialization(format!("parsing snapshot metadata: {}", e)))?;

        let mut resources = Vec::new();
        self.read_dir_recursive(&self.root, &mut resources)?;
        metadata.resource_count = resources.len();
        Ok(Snapshot { metadata, resources })
    }

    fn clean_tree(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::Store(format!("creating {}: {}", self.root.display(), e)))?;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| Error::Store(format!("listing {}: {}", self.root.display(), e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Store(format!("listing output dir: {}", e)))?;
            if entry.file_name() == GIT_DIR {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| Error::Store(format!("removing {}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    fn write_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        let text = serde_yaml::to_string(metadata)
            .map_err(|e| Error::Serialization(format!("encoding snapshot metadata: {}", e)))?;
        fs::write(self.root.join(METADATA_FILE), text)
            .map_err(|e| Error::Store(format!("writing {}: {}", METADATA_FILE, e)))
    }

    fn write_resource(&self, resource: &Resource) -> Result<()> {
        let dir = self.resource_dir(resource);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Store(format!("creating {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}.yaml", sanitize_filename(&resource.name)));

        // Prefer the retained raw mapping for fidelity.
        let text = match &resource.raw {
            Some(raw) => serde_yaml::to_string(raw),
            None => serde_yaml::to_string(resource),
        }
        .map_err(|e| Error::Serialization(format!("encoding {}: {}", resource.full_name(), e)))?;

        fs::write(&path, text)
            .map_err(|e| Error::Store(format!("writing {}: {}", path.display(), e)))
    }

    fn resource_dir(&self, resource: &Resource) -> PathBuf {
        let kind = resource.kind.to_lowercase();
        if resource.namespace.is_empty() {
            self.root.join(CLUSTER_DIR).join(kind)
        } else {
            self.root.join(&resource.namespace).join(kind)
        }
    }

    fn read_dir_recursive(&self, dir: &Path, out: &mut Vec<Resource>) -> Result<()> {
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::Store(format!("listing {}: {}", dir.display(), e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Store(format!("listing snapshot tree: {}", e)))?;
            let path = entry.path();
            let name = entry.file_name();
            if path.is_dir() {
                if name == GIT_DIR {
                    continue;
                }
                self.read_dir_recursive(&path, out)?;
                continue;
            }
            if name == METADATA_FILE
                || path.extension().and_then(|e| e.to_str()) != Some("yaml")
            {
                continue;
            }
            match read_resource_file(&path) {
                Ok(resource) => out.push(resource),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable manifest");
                }
            }
        }
        Ok(())
    }
}

/// Parse one manifest file. Files written from the raw mapping carry their
/// identity under `.metadata`; files written from the normalized struct
/// carry it at the top level. Both decode to the same Resource.
fn read_resource_file(path: &Path) -> Result<Resource> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Store(format!("reading {}: {}", path.display(), e)))?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::Serialization(format!("parsing {}: {}", path.display(), e)))?;

    if value.get("metadata").map_or(false, Value::is_object) {
        return Resource::from_raw_manifest(value).ok_or_else(|| {
            Error::Serialization(format!("{}: manifest missing metadata.name", path.display()))
        });
    }
    serde_json::from_value(value)
        .map_err(|e| Error::Serialization(format!("decoding {}: {}", path.display(), e)))
}

/// Replace characters that are invalid in file names.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}
