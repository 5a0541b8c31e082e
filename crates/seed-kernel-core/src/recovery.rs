//! Write acceptance with escalating recovery.
//!
//! The controller is a circuit breaker with three states:
//!
//! ```text
//! Normal --failure--> Recovering --failures >= threshold--> MechanicalOnly
//!   ^                     |                                      |
//!   +------success--------+                                      |
//!   +---------------------------- reset() -----------------------+
//! ```
//!
//! Only [`RecoveryController::reset`] leaves `MechanicalOnly`; successful
//! writes there clear the failure counter but keep the mode.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use crate::diff::{self, DiffResult};
use crate::events::{EventSink, KernelEvent};
use crate::history::{HistoryError, VersionHistory};
use crate::migrate::{MigrationError, MigrationOutcome, Migrator};
use crate::store;
use crate::validate::{self, ValidationIssue, ValidationLimits};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    #[default]
    Normal,
    Recovering,
    MechanicalOnly,
}

impl RecoveryMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Recovering => "recovering",
            Self::MechanicalOnly => "mechanical_only",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryState {
    pub consecutive_failures: u32,
    pub mode: RecoveryMode,
}

impl RecoveryState {
    #[must_use]
    pub fn in_recovery_mode(&self) -> bool {
        self.mode == RecoveryMode::MechanicalOnly
    }
}

/// Origin of a proposed rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    /// Produced by the generation process; suppressed in mechanical-only mode.
    Generative,
    /// Programmatic or derived update; always considered.
    Mechanical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryFailureReason {
    NoHistory,
    NoValidCommit,
    WriteFailed,
}

impl RecoveryFailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoHistory => "no-history",
            Self::NoValidCommit => "no-valid-commit",
            Self::WriteFailed => "write-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered { revision_id: String },
    Failed { reason: RecoveryFailureReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Accepted {
        diff: DiffResult,
        warnings: Vec<ValidationIssue>,
        revision_id: Option<String>,
    },
    /// Generative write suppressed while mechanical-only.
    Skipped { mode: RecoveryMode },
    Rejected {
        errors: Vec<ValidationIssue>,
        state: RecoveryState,
        /// Present when the live document also needed recovery.
        recovery: Option<RecoveryOutcome>,
    },
    /// Valid candidate that could not be written; the live document is unchanged.
    Aborted { reason: String },
}

#[derive(Debug, Default)]
struct ControllerState {
    recovery: RecoveryState,
    last_accepted: Option<String>,
}

/// Owns write acceptance for one document.
pub struct RecoveryController {
    document_path: PathBuf,
    history: Arc<dyn VersionHistory>,
    sink: Arc<dyn EventSink>,
    config: RecoveryConfig,
    limits: ValidationLimits,
    migrator: Option<Migrator>,
    inner: Mutex<ControllerState>,
}

impl RecoveryController {
    #[must_use]
    pub fn new(
        document_path: impl Into<PathBuf>,
        history: Arc<dyn VersionHistory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            document_path: document_path.into(),
            history,
            sink,
            config: RecoveryConfig::default(),
            limits: ValidationLimits::default(),
            migrator: None,
            inner: Mutex::new(ControllerState::default()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Migrate the live document on [`RecoveryController::load_live`].
    #[must_use]
    pub fn with_migrator(mut self, migrator: Migrator) -> Self {
        self.migrator = Some(migrator);
        self
    }

    /// Resume from a previously persisted state.
    #[must_use]
    pub fn with_state(self, state: RecoveryState) -> Self {
        self.inner.lock().recovery = state;
        self
    }

    #[must_use]
    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.inner.lock().recovery
    }

    #[must_use]
    pub fn in_recovery_mode(&self) -> bool {
        self.state().in_recovery_mode()
    }

    /// Bring the live document up to the current schema version.
    ///
    /// Returns `Ok(None)` when no migrator is attached, the document does not
    /// exist, or it is already current.
    ///
    /// # Errors
    /// Returns the [`MigrationError`]; the live document keeps its original
    /// bytes in that case.
    pub fn load_live(&self) -> Result<Option<MigrationOutcome>, MigrationError> {
        let Some(migrator) = &self.migrator else {
            return Ok(None);
        };
        let mut inner = self.inner.lock();
        if !self.document_path.exists() {
            return Ok(None);
        }
        match migrator.migrate_file(&self.document_path) {
            Ok(outcome) if outcome.migrated => {
                self.sink.emit(&KernelEvent::Migrated {
                    from_version: outcome.from_version.clone(),
                    to_version: outcome.to_version.clone(),
                    backup_path: outcome.backup_path.clone(),
                });
                inner.last_accepted = Some(outcome.content.clone());
                Ok(Some(outcome))
            }
            Ok(_) => Ok(None),
            Err(err) => {
                tracing::error!(
                    path = %self.document_path.display(),
                    error = %err,
                    "failed to migrate live seed"
                );
                self.sink.emit(&KernelEvent::MigrationFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Validate `candidate` and, if acceptable, make it the live document.
    pub fn consolidate(&self, candidate: &str, kind: WriteKind) -> ConsolidationOutcome {
        let mut inner = self.inner.lock();
        if kind == WriteKind::Generative && inner.recovery.in_recovery_mode() {
            tracing::debug!(
                path = %self.document_path.display(),
                "generative write skipped in mechanical-only mode"
            );
            return ConsolidationOutcome::Skipped {
                mode: inner.recovery.mode,
            };
        }

        let validation = validate::validate_and_report(candidate, &self.limits, self.sink.as_ref());
        if !validation.valid {
            self.record_failure(&mut inner.recovery);
            let live_ok = self
                .read_live()
                .is_some_and(|live| validate::validate_with(&live, &self.limits).valid);
            let recovery = (!live_ok).then(|| self.recover_locked(&mut inner));
            return ConsolidationOutcome::Rejected {
                errors: validation.errors,
                state: inner.recovery,
                recovery,
            };
        }

        let previous = inner.last_accepted.clone().or_else(|| self.read_live());
        if let Err(err) = store::write_atomic(&self.document_path, candidate.as_bytes()) {
            tracing::error!(
                path = %self.document_path.display(),
                error = %err,
                "failed to write accepted seed"
            );
            return ConsolidationOutcome::Aborted {
                reason: err.to_string(),
            };
        }

        let diff = previous
            .map(|old| diff::diff_and_report(&old, candidate, self.sink.as_ref()))
            .unwrap_or_default();
        let message = format!("consolidate: {}", diff.summary.text);
        let revision_id = match self.commit(&message) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(error = %err, "accepted seed was not recorded in version history");
                None
            }
        };

        inner.recovery.consecutive_failures = 0;
        if inner.recovery.mode == RecoveryMode::Recovering {
            inner.recovery.mode = RecoveryMode::Normal;
        }
        inner.last_accepted = Some(candidate.to_string());
        tracing::info!(
            path = %self.document_path.display(),
            severity = %diff.overall_severity,
            mode = inner.recovery.mode.as_str(),
            "seed consolidation accepted"
        );

        ConsolidationOutcome::Accepted {
            diff,
            warnings: validation.warnings,
            revision_id,
        }
    }

    /// Validate the live document as written by an external writer; an invalid
    /// or missing document counts as a failure and triggers recovery.
    ///
    /// Returns `None` when the live document is healthy.
    pub fn verify_live(&self) -> Option<RecoveryOutcome> {
        let mut inner = self.inner.lock();
        let live = self.read_live();
        let valid = live.as_deref().is_some_and(|text| {
            validate::validate_and_report(text, &self.limits, self.sink.as_ref()).valid
        });
        if valid {
            inner.last_accepted = live;
            return None;
        }
        self.record_failure(&mut inner.recovery);
        Some(self.recover_locked(&mut inner))
    }

    /// Restore the newest historically valid revision over the live document.
    pub fn recover(&self) -> RecoveryOutcome {
        let mut inner = self.inner.lock();
        self.recover_locked(&mut inner)
    }

    /// Leave mechanical-only mode and clear the failure counter.
    pub fn reset(&self) -> RecoveryState {
        let mut inner = self.inner.lock();
        let previous = std::mem::take(&mut inner.recovery);
        tracing::info!(previous_mode = previous.mode.as_str(), "recovery state reset");
        self.sink.emit(&KernelEvent::RecoveryReset {});
        previous
    }

    fn record_failure(&self, state: &mut RecoveryState) {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.mode == RecoveryMode::MechanicalOnly {
            return;
        }
        if state.consecutive_failures >= self.config.failure_threshold {
            state.mode = RecoveryMode::MechanicalOnly;
            tracing::warn!(
                consecutive_failures = state.consecutive_failures,
                "entering mechanical-only mode; generative rewrites suspended until reset"
            );
            self.sink.emit(&KernelEvent::RecoveryModeEntered {
                consecutive_failures: state.consecutive_failures,
            });
        } else {
            state.mode = RecoveryMode::Recovering;
        }
    }

    fn recover_locked(&self, inner: &mut ControllerState) -> RecoveryOutcome {
        let path = self.document_path.clone();
        let limit = self.config.history_limit;
        let listed = self.call_history(move |history| history.list_revisions(&path, limit));
        let revisions = match listed {
            Ok(revisions) if !revisions.is_empty() => revisions,
            Ok(_) => return self.recovery_failed(RecoveryFailureReason::NoHistory),
            Err(err) => {
                tracing::warn!(error = %err, "version history unavailable during recovery");
                return self.recovery_failed(RecoveryFailureReason::NoHistory);
            }
        };

        for revision in revisions {
            let path = self.document_path.clone();
            let id = revision.id.clone();
            let read = self.call_history(move |history| history.read_revision_content(&path, &id));
            let content = match read {
                Ok(content) => content,
                Err(err) => {
                    tracing::debug!(
                        revision = %revision.id,
                        error = %err,
                        "skipping unreadable revision"
                    );
                    continue;
                }
            };
            if !validate::validate_with(&content, &self.limits).valid {
                tracing::debug!(revision = %revision.id, "skipping invalid revision");
                continue;
            }
            if let Err(err) = store::write_atomic(&self.document_path, content.as_bytes()) {
                tracing::error!(error = %err, "failed to restore seed from history");
                return self.recovery_failed(RecoveryFailureReason::WriteFailed);
            }

            inner.last_accepted = Some(content);
            tracing::info!(
                revision = %revision.id,
                path = %self.document_path.display(),
                "seed recovered from history"
            );
            self.sink.emit(&KernelEvent::Recovered {
                from_revision: revision.id.clone(),
            });
            return RecoveryOutcome::Recovered {
                revision_id: revision.id,
            };
        }
        self.recovery_failed(RecoveryFailureReason::NoValidCommit)
    }

    fn recovery_failed(&self, reason: RecoveryFailureReason) -> RecoveryOutcome {
        tracing::error!(
            reason = reason.as_str(),
            path = %self.document_path.display(),
            "seed recovery failed"
        );
        self.sink.emit(&KernelEvent::RecoveryFailed { reason });
        RecoveryOutcome::Failed { reason }
    }

    fn commit(&self, message: &str) -> Result<String, HistoryError> {
        let path = self.document_path.clone();
        let message = message.to_string();
        self.call_history(move |history| history.commit(&path, &message))
    }

    /// Run one history call on a helper thread, giving up after the configured
    /// timeout. A timed-out call is abandoned, not cancelled.
    fn call_history<T, F>(&self, call: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn VersionHistory) -> Result<T, HistoryError> + Send + 'static,
    {
        let timeout = self.config.history_timeout();
        let history = Arc::clone(&self.history);
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("seed-history".to_string())
            .spawn(move || {
                let _ = sender.send(call(history.as_ref()));
            })?;
        receiver
            .recv_timeout(timeout)
            .map_err(|_| HistoryError::Timeout(timeout))?
    }

    fn read_live(&self) -> Option<String> {
        std::fs::read_to_string(&self.document_path).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::document::fixtures::VALID_SEED;
    use crate::events::MemorySink;
    use crate::history::{InMemoryHistory, Revision};

    const GARBAGE: &str = "@CORE{\n}";

    struct Fixture {
        dir: TempDir,
        path: PathBuf,
        history: Arc<InMemoryHistory>,
        sink: Arc<MemorySink>,
        controller: RecoveryController,
    }

    fn fixture() -> Result<Fixture> {
        let dir = tempdir()?;
        let path = dir.path().join("SEED.md");
        std::fs::write(&path, VALID_SEED)?;
        let history = Arc::new(InMemoryHistory::new());
        let sink = Arc::new(MemorySink::new());
        let controller = RecoveryController::new(&path, history.clone(), sink.clone());
        Ok(Fixture {
            dir,
            path,
            history,
            sink,
            controller,
        })
    }

    struct SlowHistory;

    impl VersionHistory for SlowHistory {
        fn list_revisions(&self, _path: &Path, _limit: usize) -> Result<Vec<Revision>, HistoryError> {
            thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        }

        fn read_revision_content(&self, _path: &Path, id: &str) -> Result<String, HistoryError> {
            Err(HistoryError::NotFound(id.to_string()))
        }

        fn commit(&self, _path: &Path, _message: &str) -> Result<String, HistoryError> {
            Err(HistoryError::Unavailable("read-only".to_string()))
        }
    }

    // Test IDs: TREC-001
    #[test]
    fn threshold_failures_enter_mechanical_only_once() -> Result<()> {
        let fx = fixture()?;
        for expected in 1..=4_u32 {
            let outcome = fx.controller.consolidate(GARBAGE, WriteKind::Mechanical);
            assert!(matches!(outcome, ConsolidationOutcome::Rejected { recovery: None, .. }));
            assert_eq!(fx.controller.state().consecutive_failures, expected);
        }
        assert!(fx.controller.in_recovery_mode());
        assert_eq!(fx.sink.count("recovery-mode-entered"), 1);
        assert_eq!(fx.sink.count("validation-failed"), 4);
        assert_eq!(std::fs::read_to_string(&fx.path)?, VALID_SEED);

        let previous = fx.controller.reset();
        assert_eq!(previous.mode, RecoveryMode::MechanicalOnly);
        assert_eq!(fx.controller.state(), RecoveryState::default());
        assert!(!fx.controller.in_recovery_mode());
        assert_eq!(fx.sink.count("recovery-reset"), 1);
        Ok(())
    }

    // Test IDs: TREC-002
    #[test]
    fn below_threshold_is_recovering_and_success_returns_to_normal() -> Result<()> {
        let fx = fixture()?;
        let _ = fx.controller.consolidate(GARBAGE, WriteKind::Generative);
        assert_eq!(fx.controller.state().mode, RecoveryMode::Recovering);

        let outcome = fx.controller.consolidate(VALID_SEED, WriteKind::Generative);
        assert!(matches!(outcome, ConsolidationOutcome::Accepted { .. }));
        assert_eq!(fx.controller.state(), RecoveryState::default());
        Ok(())
    }

    // Test IDs: TREC-003
    #[test]
    fn mechanical_only_skips_generative_and_keeps_mode_after_success() -> Result<()> {
        let fx = fixture()?;
        for _ in 0..3 {
            let _ = fx.controller.consolidate(GARBAGE, WriteKind::Generative);
        }
        assert!(fx.controller.in_recovery_mode());

        let candidate = VALID_SEED.replace("#sessions:42", "#sessions:43");
        assert_eq!(
            fx.controller.consolidate(&candidate, WriteKind::Generative),
            ConsolidationOutcome::Skipped {
                mode: RecoveryMode::MechanicalOnly
            }
        );
        assert_eq!(std::fs::read_to_string(&fx.path)?, VALID_SEED);

        let outcome = fx.controller.consolidate(&candidate, WriteKind::Mechanical);
        assert!(matches!(outcome, ConsolidationOutcome::Accepted { .. }));
        assert_eq!(std::fs::read_to_string(&fx.path)?, candidate);
        let state = fx.controller.state();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.mode, RecoveryMode::MechanicalOnly);
        Ok(())
    }

    // Test IDs: TREC-004
    #[test]
    fn recovery_restores_newest_valid_revision() -> Result<()> {
        let fx = fixture()?;
        let valid_id = fx.history.record(&fx.path, VALID_SEED, "good");
        fx.history.record(&fx.path, GARBAGE, "broken");
        std::fs::write(&fx.path, GARBAGE)?;

        let outcome = fx.controller.recover();
        assert_eq!(
            outcome,
            RecoveryOutcome::Recovered {
                revision_id: valid_id.clone()
            }
        );
        assert_eq!(std::fs::read_to_string(&fx.path)?, VALID_SEED);
        assert_eq!(
            fx.sink.events().last(),
            Some(&KernelEvent::Recovered {
                from_revision: valid_id
            })
        );
        Ok(())
    }

    // Test IDs: TREC-005
    #[test]
    fn recovery_failure_reasons() -> Result<()> {
        let fx = fixture()?;
        assert_eq!(
            fx.controller.recover(),
            RecoveryOutcome::Failed {
                reason: RecoveryFailureReason::NoHistory
            }
        );

        fx.history.record(&fx.path, GARBAGE, "broken");
        assert_eq!(
            fx.controller.recover(),
            RecoveryOutcome::Failed {
                reason: RecoveryFailureReason::NoValidCommit
            }
        );
        assert_eq!(fx.sink.count("recovery-failed"), 2);
        assert_eq!(std::fs::read_to_string(&fx.path)?, VALID_SEED);
        Ok(())
    }

    // Test IDs: TREC-006
    #[test]
    fn corrupted_live_document_is_recovered_on_rejection() -> Result<()> {
        let fx = fixture()?;
        let valid_id = fx.history.record(&fx.path, VALID_SEED, "good");
        std::fs::write(&fx.path, "truncated @CORE{")?;

        let outcome = fx.controller.consolidate(GARBAGE, WriteKind::Generative);
        let ConsolidationOutcome::Rejected { recovery, state, .. } = outcome else {
            return Err(anyhow!("expected rejection, got {outcome:?}"));
        };
        assert_eq!(
            recovery,
            Some(RecoveryOutcome::Recovered {
                revision_id: valid_id
            })
        );
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(std::fs::read_to_string(&fx.path)?, VALID_SEED);
        Ok(())
    }

    // Test IDs: TREC-007
    #[test]
    fn verify_live_counts_failures_and_recovers() -> Result<()> {
        let fx = fixture()?;
        assert_eq!(fx.controller.verify_live(), None);

        let valid_id = fx.history.record(&fx.path, VALID_SEED, "good");
        std::fs::remove_file(&fx.path)?;
        assert_eq!(
            fx.controller.verify_live(),
            Some(RecoveryOutcome::Recovered {
                revision_id: valid_id
            })
        );
        assert_eq!(fx.controller.state().consecutive_failures, 1);
        assert!(fx.path.exists());
        Ok(())
    }

    // Test IDs: TREC-008
    #[test]
    fn accepted_write_is_diffed_and_committed() -> Result<()> {
        let fx = fixture()?;
        let candidate = VALID_SEED.replace("2:curiosity_as_default", "2:obedience");
        let outcome = fx.controller.consolidate(&candidate, WriteKind::Generative);
        let ConsolidationOutcome::Accepted { diff, revision_id, .. } = outcome else {
            return Err(anyhow!("expected acceptance, got {outcome:?}"));
        };
        assert_eq!(diff.overall_severity, crate::diff::Severity::Critical);
        assert!(revision_id.is_some());
        assert_eq!(fx.history.revision_count(&fx.path), 1);
        assert_eq!(fx.sink.count("drift-detected"), 1);
        Ok(())
    }

    // Test IDs: TREC-009
    #[test]
    fn history_timeout_is_treated_as_no_history() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("SEED.md");
        let sink = Arc::new(MemorySink::new());
        let controller = RecoveryController::new(&path, Arc::new(SlowHistory), sink.clone())
            .with_config(RecoveryConfig {
                history_timeout_ms: 20,
                ..RecoveryConfig::default()
            });
        assert_eq!(
            controller.recover(),
            RecoveryOutcome::Failed {
                reason: RecoveryFailureReason::NoHistory
            }
        );
        assert_eq!(sink.count("recovery-failed"), 1);
        Ok(())
    }

    // Test IDs: TREC-010
    #[test]
    fn controllers_do_not_share_state() -> Result<()> {
        let first = fixture()?;
        let second = fixture()?;
        for _ in 0..3 {
            let _ = first.controller.consolidate(GARBAGE, WriteKind::Generative);
        }
        assert!(first.controller.in_recovery_mode());
        assert_eq!(second.controller.state(), RecoveryState::default());
        Ok(())
    }

    // Test IDs: TREC-012
    #[test]
    fn load_live_migrates_behind_documents_once() -> Result<()> {
        let fx = fixture()?;
        let v02 = VALID_SEED.replacen("v0.3", "v0.2", 1);
        std::fs::write(&fx.path, &v02)?;
        let backups = fx.dir.path().join("backups");
        let controller = RecoveryController::new(&fx.path, fx.history.clone(), fx.sink.clone())
            .with_migrator(Migrator::new(&backups));

        let outcome = controller
            .load_live()?
            .ok_or_else(|| anyhow!("expected a migration"))?;
        assert_eq!(outcome.from_version, "0.2");
        let live = std::fs::read_to_string(&fx.path)?;
        assert!(live.starts_with("#SEED v0.3"));
        assert_eq!(fx.sink.count("migrated"), 1);
        assert_eq!(std::fs::read_dir(&backups)?.count(), 1);

        assert_eq!(controller.load_live()?, None);
        assert_eq!(fx.sink.count("migrated"), 1);
        Ok(())
    }

    // Test IDs: TREC-013
    #[test]
    fn load_live_failure_keeps_document() -> Result<()> {
        let fx = fixture()?;
        std::fs::write(&fx.path, GARBAGE)?;
        let controller = RecoveryController::new(&fx.path, fx.history.clone(), fx.sink.clone())
            .with_migrator(Migrator::new(fx.dir.path().join("backups")));

        assert!(matches!(
            controller.load_live(),
            Err(MigrationError::InvalidResult { .. })
        ));
        assert_eq!(std::fs::read_to_string(&fx.path)?, GARBAGE);
        assert_eq!(fx.sink.count("migration-failed"), 1);

        let plain = RecoveryController::new(&fx.path, fx.history.clone(), fx.sink.clone());
        assert_eq!(plain.load_live()?, None);
        Ok(())
    }

    // Test IDs: TREC-011
    #[test]
    fn persisted_state_resumes() -> Result<()> {
        let fx = fixture()?;
        let tripped = RecoveryState {
            consecutive_failures: 3,
            mode: RecoveryMode::MechanicalOnly,
        };
        let encoded = serde_json::to_string(&tripped)?;
        let decoded: RecoveryState = serde_json::from_str(&encoded)?;
        let controller = RecoveryController::new(&fx.path, fx.history.clone(), fx.sink.clone())
            .with_state(decoded);
        assert!(controller.in_recovery_mode());
        Ok(())
    }
}
