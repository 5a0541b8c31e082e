//! Schema migration of seed documents.
//!
//! Versions form a graph of registered single-step transformations. A document
//! behind the target version is backed up verbatim, walked along the shortest
//! chain of steps, validated, and only then persisted.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::document::{self, MemoryTier, MEM_BLOCK};
use crate::store::{self, StoreError};
use crate::tokenizer;
use crate::validate::{self, ValidationIssue, ValidationLimits};

pub const CURRENT_VERSION: &str = "0.3";

/// Tag attached to memory lines that carry none.
const DEFAULT_MEMORY_TAG: &str = "[active|c:0.50]";

pub type StepFn = fn(&str) -> String;

#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub from: String,
    pub to: String,
    pub description: String,
    pub apply: StepFn,
}

impl MigrationStep {
    #[must_use]
    pub fn new(from: &str, to: &str, description: &str, apply: StepFn) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            description: description.to_string(),
            apply,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub from: String,
    pub to: String,
    pub description: String,
}

impl From<&MigrationStep> for StepSummary {
    fn from(step: &MigrationStep) -> Self {
        Self {
            from: step.from.clone(),
            to: step.to.clone(),
            description: step.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    steps: BTreeMap<(String, String), MigrationStep>,
}

impl MigrationRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(MigrationStep::new(
            "0.1",
            "0.2",
            "add missing condensed date and session counter to the header",
            complete_header,
        ));
        registry.register(MigrationStep::new(
            "0.2",
            "0.3",
            "attach a default active tag to untagged memory lines",
            tag_untagged_memories,
        ));
        registry
    }

    /// Register a step, replacing any step with the same `(from, to)` pair.
    pub fn register(&mut self, step: MigrationStep) {
        self.steps.insert((step.from.clone(), step.to.clone()), step);
    }

    #[must_use]
    pub fn knows(&self, version: &str) -> bool {
        self.steps
            .keys()
            .any(|(from, to)| from == version || to == version)
    }

    /// Lowest known version by numeric component order.
    #[must_use]
    pub fn oldest_version(&self) -> Option<&str> {
        self.steps
            .keys()
            .flat_map(|(from, to)| [from.as_str(), to.as_str()])
            .min_by_key(|version| version_key(version))
    }

    /// Shortest chain of steps from `from` to `to`; empty when equal.
    #[must_use]
    pub fn chain(&self, from: &str, to: &str) -> Option<Vec<&MigrationStep>> {
        if from == to {
            return Some(Vec::new());
        }
        let mut previous: BTreeMap<&str, &MigrationStep> = BTreeMap::new();
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(version) = queue.pop_front() {
            for step in self.steps.values().filter(|step| step.from == version) {
                if !seen.insert(step.to.as_str()) {
                    continue;
                }
                previous.insert(step.to.as_str(), step);
                if step.to == to {
                    let mut chain = Vec::new();
                    let mut cursor = to;
                    while let Some(step) = previous.get(cursor) {
                        chain.push(*step);
                        cursor = step.from.as_str();
                    }
                    chain.reverse();
                    return Some(chain);
                }
                queue.push_back(step.to.as_str());
            }
        }
        None
    }
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no migration path from version {from} to {to}")]
    NoPath { from: String, to: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write backup before migrating: {0}")]
    Backup(#[source] StoreError),
    #[error("migration step {from} -> {to} panicked; original kept (backup at {backup_path})")]
    StepPanicked {
        from: String,
        to: String,
        backup_path: PathBuf,
    },
    #[error(
        "migrated content failed validation with {} error(s); original kept (backup at {backup_path})",
        .errors.len()
    )]
    InvalidResult {
        errors: Vec<ValidationIssue>,
        backup_path: PathBuf,
    },
    #[error("failed to persist migrated content; original kept (backup at {backup_path}): {source}")]
    Persist {
        backup_path: PathBuf,
        #[source]
        source: StoreError,
    },
}

impl MigrationError {
    /// Backup written before the failure, if the failure came after it.
    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            Self::StepPanicked { backup_path, .. }
            | Self::InvalidResult { backup_path, .. }
            | Self::Persist { backup_path, .. } => Some(backup_path),
            Self::NoPath { .. } | Self::Read { .. } | Self::Backup(_) => None,
        }
    }
}

/// What a migration would do, without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub current_version: String,
    pub target_version: String,
    pub pending_steps: Vec<StepSummary>,
    /// True when the version was missing or unknown and the oldest was assumed.
    pub inferred_version: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub migrated: bool,
    pub from_version: String,
    pub to_version: String,
    pub content: String,
    pub backup_path: Option<PathBuf>,
    pub backup_digest: Option<String>,
    pub applied_steps: Vec<StepSummary>,
}

#[derive(Debug, Clone)]
pub struct Migrator {
    registry: MigrationRegistry,
    target_version: String,
    backup_dir: PathBuf,
    limits: ValidationLimits,
}

impl Migrator {
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: MigrationRegistry::builtin(),
            target_version: CURRENT_VERSION.to_string(),
            backup_dir: backup_dir.into(),
            limits: ValidationLimits::default(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: MigrationRegistry, target_version: &str) -> Self {
        self.registry = registry;
        self.target_version = target_version.to_string();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    /// # Errors
    /// Returns [`MigrationError::NoPath`] when no chain reaches the target.
    pub fn plan(&self, text: &str) -> Result<MigrationPlan, MigrationError> {
        let detected = document::parse(text).header.version;
        if detected.as_deref() == Some(self.target_version.as_str()) {
            return Ok(MigrationPlan {
                current_version: self.target_version.clone(),
                target_version: self.target_version.clone(),
                pending_steps: Vec::new(),
                inferred_version: false,
            });
        }

        let known = detected.filter(|version| self.registry.knows(version));
        let inferred_version = known.is_none();
        let current_version = match known {
            Some(version) => version,
            None => self
                .registry
                .oldest_version()
                .map(ToString::to_string)
                .ok_or_else(|| MigrationError::NoPath {
                    from: "unknown".to_string(),
                    to: self.target_version.clone(),
                })?,
        };
        let chain = self
            .registry
            .chain(&current_version, &self.target_version)
            .ok_or_else(|| MigrationError::NoPath {
                from: current_version.clone(),
                to: self.target_version.clone(),
            })?;

        Ok(MigrationPlan {
            pending_steps: chain.into_iter().map(StepSummary::from).collect(),
            current_version,
            target_version: self.target_version.clone(),
            inferred_version,
        })
    }

    /// Migrate `text` in memory, writing the pre-migration backup as
    /// `<label>.v<version>.<timestamp>.bak`.
    ///
    /// # Errors
    /// Returns an error when no path exists, the backup cannot be written, a
    /// step panics, or the result fails validation. The caller's content is
    /// never modified; use the backup path in the error to inspect it.
    pub fn migrate_content(
        &self,
        text: &str,
        label: &str,
    ) -> Result<MigrationOutcome, MigrationError> {
        let plan = self.plan(text)?;
        if plan.pending_steps.is_empty() {
            return Ok(MigrationOutcome {
                migrated: false,
                from_version: plan.current_version,
                to_version: plan.target_version,
                content: text.to_string(),
                backup_path: None,
                backup_digest: None,
                applied_steps: Vec::new(),
            });
        }

        let backup_path = self.write_backup(text, label, &plan.current_version)?;
        let backup_digest = store::sha256_digest(text.as_bytes());
        tracing::info!(
            from = %plan.current_version,
            to = %plan.target_version,
            backup = %backup_path.display(),
            "migrating seed document"
        );

        let chain = self
            .registry
            .chain(&plan.current_version, &plan.target_version)
            .unwrap_or_default();
        let mut content = text.to_string();
        for step in chain {
            let applied = catch_unwind(AssertUnwindSafe(|| (step.apply)(&content)));
            let Ok(next) = applied else {
                tracing::error!(
                    from = %step.from,
                    to = %step.to,
                    "migration step panicked; keeping original"
                );
                return Err(MigrationError::StepPanicked {
                    from: step.from.clone(),
                    to: step.to.clone(),
                    backup_path,
                });
            };
            content = set_version(&next, &step.to);
            tracing::debug!(
                from = %step.from,
                to = %step.to,
                step = %step.description,
                "applied migration step"
            );
        }

        let validation = validate::validate_with(&content, &self.limits);
        if !validation.valid {
            tracing::error!(
                errors = validation.errors.len(),
                backup = %backup_path.display(),
                "migrated seed failed validation; keeping original"
            );
            return Err(MigrationError::InvalidResult {
                errors: validation.errors,
                backup_path,
            });
        }

        Ok(MigrationOutcome {
            migrated: true,
            from_version: plan.current_version,
            to_version: plan.target_version,
            content,
            backup_path: Some(backup_path),
            backup_digest: Some(backup_digest),
            applied_steps: plan.pending_steps,
        })
    }

    /// Migrate the document at `path` in place.
    ///
    /// # Errors
    /// As [`Migrator::migrate_content`], plus read and persist failures. On
    /// every error after the backup is written the file holds its original
    /// bytes.
    pub fn migrate_file(&self, path: &Path) -> Result<MigrationOutcome, MigrationError> {
        let original = std::fs::read_to_string(path).map_err(|source| MigrationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("seed");

        let outcome = self.migrate_content(&original, label)?;
        if !outcome.migrated {
            return Ok(outcome);
        }

        if let Err(source) = store::write_atomic(path, outcome.content.as_bytes()) {
            restore_original(path, &original);
            return Err(MigrationError::Persist {
                backup_path: outcome.backup_path.clone().unwrap_or_default(),
                source,
            });
        }
        tracing::info!(path = %path.display(), to = %outcome.to_version, "seed document migrated");
        Ok(outcome)
    }

    fn write_backup(
        &self,
        text: &str,
        label: &str,
        version: &str,
    ) -> Result<PathBuf, MigrationError> {
        let now = OffsetDateTime::now_utc();
        let stamp = now
            .format(format_description!(
                "[year][month][day]T[hour][minute][second][subsecond digits:3]Z"
            ))
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        let path = self.backup_dir.join(format!("{label}.v{version}.{stamp}.bak"));
        store::write_atomic(&path, text.as_bytes()).map_err(MigrationError::Backup)?;
        Ok(path)
    }
}

/// Put the in-memory original back if the live file no longer matches it.
fn restore_original(path: &Path, original: &str) {
    let intact = std::fs::read_to_string(path).is_ok_and(|current| current == original);
    if intact {
        return;
    }
    if let Err(err) = store::write_atomic(path, original.as_bytes()) {
        tracing::error!(
            path = %path.display(),
            error = %err,
            "failed to restore original seed content"
        );
    }
}

/// Split text into lines keeping their terminators.
fn lines_with_endings(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
}

fn header_end(text: &str) -> usize {
    let scan = tokenizer::scan_blocks(text);
    scan.header.len()
}

/// Rewrite the protocol line's version token, adding a `#SEED` line if the
/// document has none.
#[must_use]
pub fn set_version(text: &str, version: &str) -> String {
    let header_len = header_end(text);
    let mut out = String::with_capacity(text.len() + 8);
    let mut replaced = false;
    let mut offset = 0;
    for line in lines_with_endings(text) {
        let in_header = offset < header_len;
        offset += line.len();
        if replaced || !in_header {
            out.push_str(line);
            continue;
        }
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];
        let mut tokens = body.split_whitespace();
        match tokens.next() {
            Some(first) if first.starts_with('#') && !first.contains(':') && first.len() > 1 => {
                let rest = tokens
                    .skip_while(|token| token.starts_with(['v', 'V']))
                    .collect::<Vec<_>>();
                out.push_str(first);
                out.push_str(" v");
                out.push_str(version);
                for token in rest {
                    out.push(' ');
                    out.push_str(token);
                }
                out.push_str(ending);
                replaced = true;
            }
            _ => out.push_str(line),
        }
    }
    if replaced {
        out
    } else {
        format!("#SEED v{version}\n{text}")
    }
}

/// `0.1 -> 0.2`: ensure the header carries condensed and session markers.
/// The condensed date defaults to the born date and sessions to zero; the
/// marker spelling follows the one used for `born`.
fn complete_header(text: &str) -> String {
    let header = document::parse(text).header;
    let header_len = header_end(text);
    let localized = text[..header_len].contains("#geboren:");
    let mut missing = Vec::new();
    if header.last_consolidated.is_none() {
        if let Some(born) = header.created_at {
            let marker = if localized { "verdichtet" } else { "condensed" };
            missing.push(format!("#{marker}:{born}"));
        }
    }
    if header.session_count.is_none() {
        let marker = if localized { "sitzungen" } else { "sessions" };
        missing.push(format!("#{marker}:0"));
    }
    if missing.is_empty() {
        return text.to_string();
    }
    let addition = missing.join(" ");

    let mut out = String::with_capacity(text.len() + addition.len() + 2);
    let mut offset = 0;
    let mut inserted = false;
    let mut protocol_line_end = None;
    for line in lines_with_endings(text) {
        let start = offset;
        offset += line.len();
        let body = line.trim_end_matches(['\r', '\n']);
        if !inserted && start < header_len {
            if body.contains("#born:") || body.contains("#geboren:") {
                out.push_str(body);
                out.push(' ');
                out.push_str(&addition);
                out.push_str(&line[body.len()..]);
                inserted = true;
                continue;
            }
            if protocol_line_end.is_none() && body.trim_start().starts_with('#') {
                protocol_line_end = Some(start + line.len());
            }
        }
        out.push_str(line);
    }
    if inserted {
        return out;
    }
    let at = protocol_line_end.unwrap_or(0);
    let separator = if at > 0 && !text[..at].ends_with('\n') { "\n" } else { "" };
    format!("{}{separator}{addition}\n{}", &text[..at], &text[at..])
}

/// `0.2 -> 0.3`: prefix every untagged memory line with the default tag.
fn tag_untagged_memories(text: &str) -> String {
    let scan = tokenizer::scan_blocks(text);
    let Some(mem) = scan
        .blocks
        .iter()
        .find(|block| document::canonical_block_name(block.name) == MEM_BLOCK)
    else {
        return text.to_string();
    };
    let range = mem.body_range.clone();

    let mut body = String::with_capacity(range.len() + 64);
    for line in lines_with_endings(&text[range.clone()]) {
        let trimmed = line.trim_start();
        let tagged = tokenizer::split_tag(trimmed)
            .and_then(|(tag, _)| tokenizer::split_facets(tag).next())
            .and_then(MemoryTier::parse)
            .is_some();
        if trimmed.trim().is_empty() || tagged {
            body.push_str(line);
        } else {
            let indent = &line[..line.len() - trimmed.len()];
            body.push_str(indent);
            body.push_str(DEFAULT_MEMORY_TAG);
            body.push_str(trimmed);
        }
    }
    format!("{}{body}{}", &text[..range.start], &text[range.end..])
}
