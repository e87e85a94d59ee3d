use std::collections::BTreeMap;
use std::io::{self, Write};

use render_profile_core::protocol::{Severity, SharedStr, TrendFlags};
use render_profile_core::{Comparison, MergedId, ProfileEntry, QueryView, SlotDiff, ViewNode};
use serde::Serialize;

const INDENT: &str = "  ";

/// Write the profile list and the filtered comparison tree as plain text.
pub fn write_text<W: Write>(
    out: &mut W,
    profiles: &[ProfileEntry],
    comparison: &Comparison,
    view: &QueryView,
) -> io::Result<()> {
    let baseline = comparison.diff.baseline();
    writeln!(out, "Profiles:")?;
    for (slot, entry) in profiles.iter().enumerate() {
        let meta = entry.tree.meta();
        write!(out, "{INDENT}[{slot}] {}", entry.label)?;
        if slot == baseline {
            write!(out, " (baseline)")?;
        }
        write!(out, "  {}", meta.source_format)?;
        if let Some(host) = &meta.host {
            write!(out, "  host={host}")?;
        }
        for (key, value) in &meta.attributes {
            write!(out, "  {key}={value}")?;
        }
        if meta.crashed {
            write!(out, "  CRASHED")?;
        }
        writeln!(out)?;
    }
    for warning in profiles.iter().flat_map(|p| p.tree.warnings()) {
        writeln!(out, "{INDENT}warning: {warning}")?;
    }
    for warning in &comparison.warnings {
        writeln!(out, "{INDENT}warning: {warning}")?;
    }
    writeln!(out)?;

    if view.is_empty() {
        writeln!(out, "No nodes match.")?;
        return Ok(());
    }
    for root in &view.roots {
        write_node(out, comparison, root, 0)?;
    }
    Ok(())
}

fn write_node<W: Write>(
    out: &mut W,
    comparison: &Comparison,
    node: &ViewNode,
    depth: usize,
) -> io::Result<()> {
    let indent = INDENT.repeat(depth);
    let merged = &comparison.merged;
    let result = comparison.diff.get(node.id);
    writeln!(
        out,
        "{indent}{}  [{}{}]",
        merged.node(node.id).key(),
        result.severity,
        trend_marker(result.trends)
    )?;

    let baseline = comparison.diff.baseline();
    for metric in &comparison.metrics {
        let sums = slot_sums(comparison, node.id, metric);
        if sums.iter().all(Option::is_none) {
            continue;
        }
        write!(out, "{indent}{INDENT}{INDENT}{metric:<14}")?;
        for (slot, sum) in sums.iter().enumerate() {
            if slot > 0 {
                write!(out, " |")?;
            }
            match sum {
                Some(value) => write!(out, " {value:>12.3}")?,
                None => write!(out, " {:>12}", "-")?,
            }
            if slot == baseline {
                continue;
            }
            if let Some(delta) = result.metric(slot, metric) {
                write!(out, " ({}, {})", delta.relative, delta.severity)?;
            }
        }
        writeln!(out)?;
    }

    for child in &node.children {
        write_node(out, comparison, child, depth + 1)?;
    }
    Ok(())
}

fn trend_marker(trends: TrendFlags) -> &'static str {
    match (trends.regressed, trends.improved) {
        (true, true) => ", mixed",
        (true, false) => ", regression",
        (false, true) => ", improvement",
        (false, false) => "",
    }
}

fn slot_sums(comparison: &Comparison, id: MergedId, metric: &str) -> Vec<Option<f64>> {
    (0..comparison.merged.slot_count())
        .map(|slot| {
            comparison
                .aggregates
                .result(&comparison.merged, id, slot)
                .and_then(|r| r.sum(metric))
        })
        .collect()
}

#[derive(Serialize)]
struct JsonComparison<'a> {
    labels: &'a [String],
    baseline: usize,
    nodes: Vec<JsonNode<'a>>,
}

#[derive(Serialize)]
struct JsonNode<'a> {
    name: String,
    severity: Severity,
    subtree_severity: Severity,
    trends: TrendFlags,
    /// Subtree sums per metric, one entry per slot.
    sums: BTreeMap<&'a SharedStr, Vec<Option<f64>>>,
    slots: &'a [Option<SlotDiff>],
    children: Vec<JsonNode<'a>>,
}

/// Write the filtered comparison tree as pretty-printed JSON.
pub fn write_json<W: Write>(out: &mut W, comparison: &Comparison, view: &QueryView) -> io::Result<()> {
    let doc = JsonComparison {
        labels: &comparison.labels,
        baseline: comparison.diff.baseline(),
        nodes: view.roots.iter().map(|n| json_node(comparison, n)).collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)
}

fn json_node<'a>(comparison: &'a Comparison, node: &ViewNode) -> JsonNode<'a> {
    let result = comparison.diff.get(node.id);
    let sums = comparison
        .metrics
        .iter()
        .map(|metric| (metric, slot_sums(comparison, node.id, metric)))
        .filter(|(_, sums)| sums.iter().any(Option::is_some))
        .collect();
    JsonNode {
        name: comparison.merged.node(node.id).key().to_string(),
        severity: result.severity,
        subtree_severity: result.subtree_severity,
        trends: result.trends,
        sums,
        slots: &result.slots,
        children: node.children.iter().map(|c| json_node(comparison, c)).collect(),
    }
}
