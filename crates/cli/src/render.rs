//! Human-readable output for the terminal. Plain prints only; structured
//! output goes through `-o json` instead.

use chrona_core::{HistoryEntry, SnapshotMetadata};

pub fn snapshot_summary(metadata: &SnapshotMetadata) {
    println!();
    println!("Snapshot captured");
    println!("  Time:       {}", metadata.timestamp.to_rfc3339());
    println!("  Cluster:    {}", metadata.cluster_name);
    println!("  Context:    {}", metadata.context);
    println!("  Resources:  {}", metadata.resource_count);
    println!("  Namespaces: {}", metadata.namespaces.len());
    if !metadata.commit_hash.is_empty() {
        println!("  Commit:     {}", short(&metadata.commit_hash));
    }
    println!();
}

pub fn history_table(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No snapshots recorded yet.");
        return;
    }
    println!("{:<10} {:<25} {:>9}  {}", "COMMIT", "TIME", "RESOURCES", "AUTHOR");
    for entry in entries {
        println!(
            "{:<10} {:<25} {:>9}  {}",
            short(&entry.commit_hash),
            entry.timestamp.to_rfc3339(),
            entry.resource_count,
            entry.author,
        );
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
