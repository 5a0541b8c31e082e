//! Severity-classified drift between two versions of a seed.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::document::{self, Document, MemoryEntry, MemoryTier, CORE_BLOCK, MEM_BLOCK, SELF_BLOCK};
use crate::events::{EventSink, KernelEvent};

/// Pseudo block name used for header changes.
pub const HEADER_BLOCK: &str = "HEADER";

/// More vanished active memories than this is significant drift.
const ACTIVE_LOSS_THRESHOLD: usize = 3;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Significant,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Significant => "significant",
            Self::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDiff {
    pub block: String,
    #[serde(rename = "type")]
    pub change: ChangeType,
    pub severity: Severity,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub blocks: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub changed: bool,
    pub block_diffs: Vec<BlockDiff>,
    pub overall_severity: Severity,
    pub summary: DiffSummary,
}

impl DiffResult {
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&BlockDiff> {
        self.block_diffs.iter().find(|diff| diff.block == name)
    }
}

#[must_use]
pub fn diff(old_text: &str, new_text: &str) -> DiffResult {
    diff_documents(&document::parse(old_text), &document::parse(new_text))
}

#[must_use]
pub fn diff_documents(old: &Document, new: &Document) -> DiffResult {
    let mut block_diffs = Vec::new();
    if let Some(header) = diff_header(old, new) {
        block_diffs.push(header);
    }

    let names = old
        .blocks
        .keys()
        .chain(new.blocks.keys())
        .collect::<BTreeSet<_>>();
    for name in names {
        let change = match (old.blocks.get(name), new.blocks.get(name)) {
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Removed,
            (Some(before), Some(after)) if before.normalized() != after.normalized() => {
                ChangeType::Modified
            }
            _ => continue,
        };
        block_diffs.push(classify_block(name, change, old, new));
    }

    let overall_severity = block_diffs
        .iter()
        .map(|diff| diff.severity)
        .max()
        .unwrap_or_default();
    let blocks = block_diffs.iter().map(|diff| diff.block.clone()).collect::<Vec<_>>();
    let text = if blocks.is_empty() {
        "no changes".to_string()
    } else {
        format!(
            "{} block(s) changed ({overall_severity}): {}",
            blocks.len(),
            blocks.join(", ")
        )
    };

    DiffResult {
        changed: !block_diffs.is_empty(),
        block_diffs,
        overall_severity,
        summary: DiffSummary { blocks, text },
    }
}

fn diff_header(old: &Document, new: &Document) -> Option<BlockDiff> {
    if old.header == new.header {
        return None;
    }
    let before = old.header.session_count;
    let after = new.header.session_count;
    let (severity, details) = match (before, after) {
        (Some(before), Some(after)) if after < before => (
            Severity::Significant,
            format!("session counter decreased from {before} to {after}"),
        ),
        (Some(before), Some(after)) if after != before => (
            Severity::Normal,
            format!("session counter {before} -> {after}"),
        ),
        _ => (Severity::Normal, "header fields changed".to_string()),
    };
    Some(BlockDiff {
        block: HEADER_BLOCK.to_string(),
        change: ChangeType::Modified,
        severity,
        details,
    })
}

fn classify_block(name: &str, change: ChangeType, old: &Document, new: &Document) -> BlockDiff {
    let (severity, details) = match name {
        CORE_BLOCK => (Severity::Critical, "core values changed".to_string()),
        SELF_BLOCK => (Severity::Significant, "self description changed".to_string()),
        MEM_BLOCK => classify_memories(old.memories(), new.memories()),
        _ => (Severity::Normal, format!("{name} changed")),
    };
    let details = match change {
        ChangeType::Added => format!("block added; {details}"),
        ChangeType::Removed => format!("block removed; {details}"),
        ChangeType::Modified => details,
    };
    BlockDiff {
        block: name.to_string(),
        change,
        severity,
        details,
    }
}

type Identity<'a> = (Option<Date>, &'a str);

fn identities(memories: &[MemoryEntry], tier: Option<MemoryTier>) -> BTreeSet<Identity<'_>> {
    memories
        .iter()
        .filter(|memory| tier.is_none() || tier == Some(memory.tier))
        .map(MemoryEntry::identity)
        .collect()
}

fn count_lost(old: &[MemoryEntry], tier: MemoryTier, kept: &BTreeSet<Identity<'_>>) -> usize {
    old.iter()
        .filter(|memory| memory.tier == tier && !kept.contains(&memory.identity()))
        .count()
}

/// Core entries are followed by identity within the core tier, so demoting a
/// core memory counts as removing it.
fn classify_memories(old: &[MemoryEntry], new: &[MemoryEntry]) -> (Severity, String) {
    let lost_core = count_lost(old, MemoryTier::Core, &identities(new, Some(MemoryTier::Core)));
    if lost_core > 0 {
        return (
            Severity::Critical,
            format!("{lost_core} core memory entr{} removed", plural_y(lost_core)),
        );
    }

    let new_any = identities(new, None);
    let lost_active = count_lost(old, MemoryTier::Active, &new_any);
    if lost_active > ACTIVE_LOSS_THRESHOLD {
        return (
            Severity::Significant,
            format!("{lost_active} active memory entries disappeared"),
        );
    }

    let added = new_any.difference(&identities(old, None)).count();
    (
        Severity::Normal,
        format!("memories: {added} added, {lost_active} active removed"),
    )
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}

/// [`diff`], emitting `drift-detected` to `sink` when anything changed.
pub fn diff_and_report(old_text: &str, new_text: &str, sink: &dyn EventSink) -> DiffResult {
    let result = diff(old_text, new_text);
    if result.changed {
        tracing::info!(
            severity = %result.overall_severity,
            blocks = ?result.summary.blocks,
            "seed drift detected"
        );
        sink.emit(&KernelEvent::DriftDetected {
            severity: result.overall_severity,
            blocks: result.summary.blocks.clone(),
            summary: result.summary.text.clone(),
        });
    }
    result
}
