#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use chrona_config::GitConfig;
use chrona_core::{Error, SnapshotMetadata};
use chrona_vcs::VersionStore;
use chrono::{DateTime, TimeZone, Utc};

fn metadata(timestamp: DateTime<Utc>, resource_count: usize) -> SnapshotMetadata {
    SnapshotMetadata {
        timestamp,
        cluster_name: "test-cluster".into(),
        context: "test-context".into(),
        resource_count,
        namespaces: vec!["default".into()],
        commit_hash: String::new(),
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn init_then_commit_then_skip_when_clean() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();
    assert_eq!(store.commit_count().unwrap(), 0);

    write_file(dir.path(), "_metadata.yaml", "resourceCount: 1\n");
    write_file(dir.path(), "default/service/web.yaml", "kind: Service\n");

    let first = store.commit(&metadata(at(10), 1)).unwrap();
    assert!(!first.is_empty());
    assert_eq!(store.commit_count().unwrap(), 1);

    // Unchanged tree: empty hash, history does not advance.
    let second = store.commit(&metadata(at(11), 1)).unwrap();
    assert!(second.is_empty());
    assert_eq!(store.commit_count().unwrap(), 1);
}

#[test]
fn reopening_an_existing_repository_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = GitConfig::default();
    {
        let store = VersionStore::open_or_init(dir.path(), &cfg).unwrap();
        write_file(dir.path(), "_metadata.yaml", "resourceCount: 0\n");
        store.commit(&metadata(at(10), 0)).unwrap();
    }
    let store = VersionStore::open_or_init(dir.path(), &cfg).unwrap();
    assert_eq!(store.commit_count().unwrap(), 1);
}

#[test]
fn history_is_newest_first_with_limit_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();

    write_file(dir.path(), "_metadata.yaml", "gen: 1\n");
    store.commit(&metadata(at(9), 5)).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 2\n");
    store.commit(&metadata(at(10), 7)).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 3\n");
    store.commit(&metadata(at(11), 9)).unwrap();

    let all = store.history(0).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].timestamp, at(11));
    assert_eq!(all[2].timestamp, at(9));
    assert_eq!(all[0].resource_count, 9);
    assert_eq!(all[0].author, "GitOps-Time-Machine");
    assert!(all[0].message.starts_with("[snapshot]"));

    let limited = store.history(2).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].timestamp, at(11));
    assert_eq!(limited[1].timestamp, at(10));
}

#[test]
fn history_orders_by_author_time_even_when_commits_land_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();

    // A catch-up commit recorded later in the chain but carrying an earlier
    // capture timestamp must not disturb chronological ordering.
    write_file(dir.path(), "_metadata.yaml", "gen: 1\n");
    store.commit(&metadata(at(12), 1)).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 2\n");
    let backfill = store.commit(&metadata(at(11), 2)).unwrap();

    let entries = store.history(0).unwrap();
    assert_eq!(entries[0].timestamp, at(12));
    assert_eq!(entries[1].timestamp, at(11));

    // Time resolution follows author time too.
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 11, 30, 0).unwrap();
    assert_eq!(store.find_commit_at_or_before(t).unwrap(), backfill);
}

#[test]
fn find_commit_resolves_largest_author_time_at_or_before_target() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();

    write_file(dir.path(), "_metadata.yaml", "gen: 1\n");
    let c1 = store.commit(&metadata(at(9), 1)).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 2\n");
    let c2 = store.commit(&metadata(at(10), 2)).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 3\n");
    let c3 = store.commit(&metadata(at(11), 3)).unwrap();

    // Anywhere in [t2, t3) resolves to the middle commit.
    assert_eq!(store.find_commit_at_or_before(at(10)).unwrap(), c2);
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
    assert_eq!(store.find_commit_at_or_before(t).unwrap(), c2);
    assert_eq!(store.find_commit_at_or_before(at(11)).unwrap(), c3);
    assert_eq!(store.find_commit_at_or_before(at(9)).unwrap(), c1);

    let err = store
        .find_commit_at_or_before(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn checkout_at_materializes_old_tree_and_branch_restores_head() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();

    write_file(dir.path(), "default/service/web.yaml", "replicas: 3\n");
    let old = store.commit(&metadata(at(10), 1)).unwrap();
    write_file(dir.path(), "default/service/web.yaml", "replicas: 5\n");
    store.commit(&metadata(at(11), 1)).unwrap();

    store.checkout_at(&old).unwrap();
    let content = fs::read_to_string(dir.path().join("default/service/web.yaml")).unwrap();
    assert!(content.contains("replicas: 3"));

    store.checkout_branch().unwrap();
    let content = fs::read_to_string(dir.path().join("default/service/web.yaml")).unwrap();
    assert!(content.contains("replicas: 5"));
}

#[test]
fn checkout_of_unknown_commit_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open_or_init(dir.path(), &GitConfig::default()).unwrap();
    write_file(dir.path(), "_metadata.yaml", "gen: 1\n");
    store.commit(&metadata(at(10), 0)).unwrap();

    let missing = "0123456789abcdef0123456789abcdef01234567";
    assert!(matches!(store.checkout_at(missing), Err(Error::NotFound(_))));
    assert!(matches!(store.checkout_at("not-a-hash"), Err(Error::NotFound(_))));
}
