//! Consistency layer for seed identity documents.
//!
//! A seed is a small block-structured text file. This crate parses and
//! validates seeds, classifies drift between versions, migrates old formats
//! behind a backup, rolls back to the last valid revision when writes keep
//! failing, and rate-limits mood changes.

pub mod config;
pub mod diff;
pub mod document;
pub mod drift;
pub mod events;
pub mod history;
pub mod migrate;
pub mod recovery;
pub mod status;
pub mod store;
pub mod tokenizer;
pub mod validate;

pub use config::{ConfigError, KernelConfig, MigrationConfig, RecoveryConfig};
pub use diff::{diff, diff_and_report, BlockDiff, ChangeType, DiffResult, Severity};
pub use document::{parse, Block, Document, Header, MemoryEntry, MemoryTier};
pub use drift::{Affect, ClampReason, DriftConfig, DriftLimiter, DriftState, DriftUpdate};
pub use events::{EventSink, JsonlSink, KernelEvent, MemorySink, NullSink, TracingSink};
pub use history::{HistoryError, InMemoryHistory, Revision, VersionHistory};
pub use migrate::{
    MigrationError, MigrationOutcome, MigrationPlan, MigrationRegistry, MigrationStep, Migrator,
    CURRENT_VERSION,
};
pub use recovery::{
    ConsolidationOutcome, RecoveryController, RecoveryFailureReason, RecoveryMode,
    RecoveryOutcome, RecoveryState, WriteKind,
};
pub use status::{summarize, SeedStatus};
pub use validate::{
    validate, validate_and_report, validate_with, IssueCode, ValidationIssue, ValidationLimits,
    ValidationResult,
};
