//! Drift analysis: deep structural comparison of two snapshots with
//! deterministic output ordering.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrona_core::{
    DriftEntry, DriftKind, DriftReport, DriftSummary, FieldDiff, Resource, Snapshot,
};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

/// Compare two snapshots. Pure function of its inputs: repeated invocation
/// yields byte-identical reports.
pub fn compare(base: &Snapshot, target: &Snapshot) -> DriftReport {
    let base_index = index_resources(&base.resources);
    let target_index = index_resources(&target.resources);

    let mut entries: Vec<DriftEntry> = Vec::new();

    for (name, base_res) in &base_index {
        if !target_index.contains_key(name) {
            entries.push(DriftEntry {
                kind: DriftKind::Removed,
                resource: (*base_res).clone(),
                field_diffs: Vec::new(),
            });
        }
    }
    for (name, target_res) in &target_index {
        if !base_index.contains_key(name) {
            entries.push(DriftEntry {
                kind: DriftKind::Added,
                resource: (*target_res).clone(),
                field_diffs: Vec::new(),
            });
        }
    }
    for (name, base_res) in &base_index {
        if let Some(target_res) = target_index.get(name) {
            let diffs = compare_resources(base_res, target_res);
            if !diffs.is_empty() {
                entries.push(DriftEntry {
                    kind: DriftKind::Modified,
                    resource: (*target_res).clone(),
                    field_diffs: diffs,
                });
            }
        }
    }

    // Load-bearing sort: downstream output must be byte-stable per input pair.
    entries.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.resource.full_name().cmp(&b.resource.full_name()))
    });

    let mut summary = DriftSummary {
        total_resources: target_index.len(),
        ..DriftSummary::default()
    };
    for entry in &entries {
        match entry.kind {
            DriftKind::Added => summary.added_resources += 1,
            DriftKind::Removed => summary.removed_resources += 1,
            DriftKind::Modified => summary.modified_resources += 1,
        }
    }
    summary.unchanged_resources =
        base_index.len() - summary.removed_resources - summary.modified_resources;

    info!(
        added = summary.added_resources,
        removed = summary.removed_resources,
        modified = summary.modified_resources,
        "drift analysis completed"
    );

    DriftReport {
        timestamp: Utc::now(),
        base_ref: base.metadata.commit_hash.clone(),
        target_ref: target.metadata.commit_hash.clone(),
        summary,
        entries,
    }
}

fn index_resources(resources: &[Resource]) -> BTreeMap<String, &Resource> {
    resources.iter().map(|r| (r.full_name(), r)).collect()
}

/// Field-level comparison of one resource pair. Labels and annotations diff
/// as whole mappings; `spec` and `data` recurse key by key.
fn compare_resources(base: &Resource, target: &Resource) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if base.labels != target.labels {
        diffs.push(FieldDiff {
            path: ".metadata.labels".to_string(),
            old_value: map_value(&base.labels),
            new_value: map_value(&target.labels),
        });
    }
    if base.annotations != target.annotations {
        diffs.push(FieldDiff {
            path: ".metadata.annotations".to_string(),
            old_value: map_value(&base.annotations),
            new_value: map_value(&target.annotations),
        });
    }
    deep_compare(".spec", base.spec.as_ref(), target.spec.as_ref(), &mut diffs);
    deep_compare(".data", base.data.as_ref(), target.data.as_ref(), &mut diffs);
    diffs
}

fn map_value(map: &Option<BTreeMap<String, String>>) -> Option<Value> {
    map.as_ref().map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
}

/// Recursive keyed comparison of two optional mappings. Absent and empty
/// mappings are the same thing; sequences and scalars compare as leaves.
fn deep_compare(prefix: &str, base: Option<&Value>, target: Option<&Value>, out: &mut Vec<FieldDiff>) {
    let empty = serde_json::Map::new();
    let base_map = base.and_then(Value::as_object).unwrap_or(&empty);
    let target_map = target.and_then(Value::as_object).unwrap_or(&empty);

    // Object maps are BTreeMap-backed, so the key walk is deterministic.
    let mut keys: Vec<&String> = base_map.keys().collect();
    for k in target_map.keys() {
        if !base_map.contains_key(k) {
            keys.push(k);
        }
    }
    keys.sort();

    for key in keys {
        let path = format!("{}.{}", prefix, key);
        match (base_map.get(key), target_map.get(key)) {
            (None, Some(new)) => out.push(FieldDiff {
                path,
                old_value: None,
                new_value: Some(new.clone()),
            }),
            (Some(old), None) => out.push(FieldDiff {
                path,
                old_value: Some(old.clone()),
                new_value: None,
            }),
            (Some(old), Some(new)) => {
                if old.is_object() && new.is_object() {
                    deep_compare(&path, Some(old), Some(new), out);
                } else if old != new {
                    out.push(FieldDiff {
                        path,
                        old_value: Some(old.clone()),
                        new_value: Some(new.clone()),
                    });
                }
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }
}

/// Human-readable rendering of a drift report.
pub fn render_report(report: &DriftReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Drift Report — {}", report.timestamp.to_rfc3339());
    let _ = writeln!(out, "{}", "═".repeat(60));
    let _ = writeln!(out);
    let _ = writeln!(out, "  Total Resources: {}", report.summary.total_resources);
    let _ = writeln!(out, "  Added:           {}", report.summary.added_resources);
    let _ = writeln!(out, "  Removed:         {}", report.summary.removed_resources);
    let _ = writeln!(out, "  Modified:        {}", report.summary.modified_resources);
    let _ = writeln!(out, "  Unchanged:       {}", report.summary.unchanged_resources);
    let _ = writeln!(out);

    if !report.has_drift() {
        let _ = writeln!(out, "No drift detected.");
        return out;
    }

    for entry in &report.entries {
        let name = entry.resource.full_name();
        match entry.kind {
            DriftKind::Added => {
                let _ = writeln!(out, "  [+] ADDED    {}", name);
            }
            DriftKind::Removed => {
                let _ = writeln!(out, "  [-] REMOVED  {}", name);
            }
            DriftKind::Modified => {
                let _ = writeln!(out, "  [~] MODIFIED {}", name);
                for diff in &entry.field_diffs {
                    let _ = writeln!(out, "      • {}", diff.path);
                    let _ = writeln!(out, "        old: {}", render_value(&diff.old_value));
                    let _ = writeln!(out, "        new: {}", render_value(&diff.new_value));
                }
            }
        }
    }
    out
}

fn render_value(value: &Option<Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "(absent)".to_string(),
    }
}
