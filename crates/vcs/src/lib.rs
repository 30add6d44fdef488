//! Version store: wraps the snapshot tree as a git repository with
//! timestamped commits, time-to-commit resolution, and checkout.
//!
//! Commits are anchored on **author time**, which is set to the snapshot's
//! capture timestamp. History and time resolution read author time too, so
//! the log stays chronological even when catch-up commits are created under
//! a skewed wall clock.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use chrona_config::GitConfig;
use chrona_core::{Error, HistoryEntry, Result, SnapshotMetadata};
use chrono::{DateTime, TimeZone, Utc};
use git2::{build::CheckoutBuilder, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature, Time};
use metrics::counter;
use tracing::{debug, info};

pub struct VersionStore {
    repo: Repository,
    config: GitConfig,
}

impl VersionStore {
    /// Open the repository at `path`, initializing a fresh one on the
    /// configured branch when the directory is not a repository yet.
    pub fn open_or_init(path: impl AsRef<Path>, config: &GitConfig) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Store(format!("creating {}: {}", path.display(), e)))?;

        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => {
                let mut opts = RepositoryInitOptions::new();
                opts.initial_head(&config.branch);
                let repo = Repository::init_opts(path, &opts)
                    .map_err(|e| Error::Store(format!("initializing repository: {}", e)))?;
                info!(path = %path.display(), branch = %config.branch, "initialized snapshot repository");
                repo
            }
        };
        Ok(Self { repo, config: config.clone() })
    }

    pub fn path(&self) -> PathBuf {
        self.repo.workdir().unwrap_or_else(|| self.repo.path()).to_path_buf()
    }

    /// Stage every tree change and commit it with the snapshot's capture
    /// timestamp as author time. Returns the empty string, without error,
    /// when the tree is unchanged: "no drift, nothing to record".
    pub fn commit(&self, metadata: &SnapshotMetadata) -> Result<String> {
        let mut index = self
            .repo
            .index()
            .map_err(|e| Error::Store(format!("opening index: {}", e)))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(|e| Error::Store(format!("staging changes: {}", e)))?;
        index
            .update_all(["*"].iter(), None)
            .map_err(|e| Error::Store(format!("staging removals: {}", e)))?;
        let tree_id = index
            .write_tree()
            .map_err(|e| Error::Store(format!("writing tree: {}", e)))?;

        let parent = self.head_commit()?;
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                info!("no changes detected, skipping commit");
                return Ok(String::new());
            }
        }
        index.write().map_err(|e| Error::Store(format!("writing index: {}", e)))?;

        let message = format!(
            "{} {} — {} resources across {} namespaces",
            self.config.commit_message_prefix,
            metadata.timestamp.to_rfc3339(),
            metadata.resource_count,
            metadata.namespaces.len(),
        );
        let when = Time::new(metadata.timestamp.timestamp(), 0);
        let signature = Signature::new(&self.config.author_name, &self.config.author_email, &when)
            .map_err(|e| Error::Store(format!("building signature: {}", e)))?;
        let tree = self
            .repo
            .find_tree(tree_id)
            .map_err(|e| Error::Store(format!("finding tree: {}", e)))?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)
            .map_err(|e| Error::Store(format!("creating commit: {}", e)))?;

        counter!("vcs_commits_total", 1u64);
        let hash = oid.to_string();
        info!(commit = %&hash[..8], resources = metadata.resource_count, "snapshot committed");
        Ok(hash)
    }

    /// Newest-first history by author time. `limit` of zero means all.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .walk_commits()?
            .into_iter()
            .map(|commit| {
                let message = commit.message().unwrap_or_default().trim_end().to_string();
                HistoryEntry {
                    commit_hash: commit.id().to_string(),
                    timestamp: time_to_utc(commit.author().when()),
                    resource_count: resource_count_from_message(&message),
                    author: commit.author().name().unwrap_or_default().to_string(),
                    message,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if limit > 0 {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// The commit with the largest author time at or before `target`.
    pub fn find_commit_at_or_before(&self, target: DateTime<Utc>) -> Result<String> {
        let mut best: Option<(Oid, DateTime<Utc>)> = None;
        for commit in self.walk_commits()? {
            let when = time_to_utc(commit.author().when());
            if when <= target && best.map_or(true, |(_, bt)| when > bt) {
                best = Some((commit.id(), when));
            }
        }
        match best {
            Some((oid, when)) => {
                debug!(commit = %oid, at = %when.to_rfc3339(), "resolved target time");
                Ok(oid.to_string())
            }
            None => Err(Error::NotFound(format!(
                "no snapshot found at or before {}",
                target.to_rfc3339()
            ))),
        }
    }

    /// Detached checkout of a commit. Callers that read the working tree
    /// afterwards must restore the branch via [`checkout_branch`].
    ///
    /// [`checkout_branch`]: VersionStore::checkout_branch
    pub fn checkout_at(&self, commit_hash: &str) -> Result<()> {
        let oid = Oid::from_str(commit_hash)
            .map_err(|e| Error::NotFound(format!("invalid commit hash {}: {}", commit_hash, e)))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|e| Error::NotFound(format!("unknown commit {}: {}", commit_hash, e)))?;
        self.repo
            .set_head_detached(commit.id())
            .map_err(|e| Error::Store(format!("detaching head: {}", e)))?;
        self.force_checkout_head()
    }

    /// Restore the working tree to the configured branch head.
    pub fn checkout_branch(&self) -> Result<()> {
        self.repo
            .set_head(&format!("refs/heads/{}", self.config.branch))
            .map_err(|e| Error::Store(format!("switching to branch {}: {}", self.config.branch, e)))?;
        self.force_checkout_head()
    }

    /// Total number of commits; zero for an empty repository.
    pub fn commit_count(&self) -> Result<usize> {
        Ok(self.walk_commits()?.len())
    }

    fn force_checkout_head(&self) -> Result<()> {
        let mut opts = CheckoutBuilder::new();
        opts.force().remove_untracked(true);
        self.repo
            .checkout_head(Some(&mut opts))
            .map_err(|e| Error::Store(format!("checking out working tree: {}", e)))
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => {
                let commit = head
                    .peel_to_commit()
                    .map_err(|e| Error::Store(format!("resolving HEAD: {}", e)))?;
                Ok(Some(commit))
            }
            // Unborn branch on a fresh repository.
            Err(_) => Ok(None),
        }
    }

    fn walk_commits(&self) -> Result<Vec<git2::Commit<'_>>> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| Error::Store(format!("starting log walk: {}", e)))?;
        walk.push_head()
            .map_err(|e| Error::Store(format!("seeding log walk: {}", e)))?;
        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid.map_err(|e| Error::Store(format!("walking log: {}", e)))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| Error::Store(format!("loading commit {}: {}", oid, e)))?;
            commits.push(commit);
        }
        Ok(commits)
    }
}

fn time_to_utc(time: Time) -> DateTime<Utc> {
    Utc.timestamp_opt(time.seconds(), 0).single().unwrap_or_default()
}

/// Decode the resource count embedded in a commit message of the form
/// `<prefix> <timestamp> — <N> resources across <M> namespaces`; zero when
/// the message has some other shape.
fn resource_count_from_message(message: &str) -> usize {
    let mut previous: Option<&str> = None;
    for token in message.split_whitespace() {
        if token == "resources" {
            if let Some(n) = previous.and_then(|p| p.parse::<usize>().ok()) {
                return n;
            }
        }
        previous = Some(token);
    }
    0
}
