//! Structured events for an external audit sink.
//!
//! Sinks are fire-and-forget: `emit` cannot fail and must not block the
//! caller on slow storage for longer than a single append.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::diff::Severity;
use crate::drift::Affect;
use crate::recovery::RecoveryFailureReason;
use crate::validate::ValidationIssue;

/// Entries kept by in-memory buffers before the oldest is dropped.
pub const RING_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum KernelEvent {
    ValidationFailed {
        errors: Vec<ValidationIssue>,
    },
    DriftDetected {
        severity: Severity,
        blocks: Vec<String>,
        summary: String,
    },
    RecoveryModeEntered {
        consecutive_failures: u32,
    },
    Recovered {
        from_revision: String,
    },
    RecoveryFailed {
        reason: RecoveryFailureReason,
    },
    RecoveryReset {},
    Migrated {
        from_version: String,
        to_version: String,
        backup_path: Option<PathBuf>,
    },
    MigrationFailed {
        error: String,
    },
    MoodClamped {
        reason: String,
        requested: Affect,
        applied: Affect,
    },
    MoodChanged {
        mood: String,
        previous_mood: String,
        trigger: String,
    },
}

impl KernelEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation-failed",
            Self::DriftDetected { .. } => "drift-detected",
            Self::RecoveryModeEntered { .. } => "recovery-mode-entered",
            Self::Recovered { .. } => "recovered",
            Self::RecoveryFailed { .. } => "recovery-failed",
            Self::RecoveryReset {} => "recovery-reset",
            Self::Migrated { .. } => "migrated",
            Self::MigrationFailed { .. } => "migration-failed",
            Self::MoodClamped { .. } => "mood-clamped",
            Self::MoodChanged { .. } => "mood-changed",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &KernelEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &KernelEvent) {}
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T) {
    if buffer.len() >= RING_BUFFER_SIZE {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

/// Keeps the most recent events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<VecDeque<KernelEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<KernelEvent> {
        self.events.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|event| event.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &KernelEvent) {
        push_bounded(&mut self.events.lock(), event.clone());
    }
}

/// Forwards each event to `tracing` as one structured record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &KernelEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(
            target: "seed_kernel::events",
            event = event.name(),
            %payload,
            "kernel event"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLine {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub event: KernelEvent,
}

/// Appends events as JSON lines. Lines that cannot be written are kept in a
/// bounded in-memory fallback buffer and retried on the next successful write.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    fallback: Mutex<VecDeque<AuditLine>>,
}

impl JsonlSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn fallback_entries(&self) -> Vec<AuditLine> {
        self.fallback.lock().iter().cloned().collect()
    }

    fn append(&self, lines: &[AuditLine]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut buffer = Vec::new();
        for line in lines {
            serde_json::to_writer(&mut buffer, line)?;
            buffer.push(b'\n');
        }
        file.write_all(&buffer)?;
        file.flush()
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &KernelEvent) {
        let line = AuditLine {
            timestamp: OffsetDateTime::now_utc(),
            event: event.clone(),
        };
        let mut fallback = self.fallback.lock();
        let mut pending = fallback.drain(..).collect::<Vec<_>>();
        pending.push(line);
        if let Err(err) = self.append(&pending) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                buffered = pending.len(),
                "failed to append kernel event; keeping it in memory"
            );
            for line in pending {
                push_bounded(&mut fallback, line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;

    fn reset_event() -> KernelEvent {
        KernelEvent::RecoveryReset {}
    }

    // Test IDs: TEVT-001
    #[test]
    fn events_serialize_with_kebab_case_tag() -> Result<()> {
        let value = serde_json::to_value(KernelEvent::RecoveryModeEntered {
            consecutive_failures: 3,
        })?;
        assert_eq!(value["event"], "recovery-mode-entered");
        assert_eq!(value["consecutive_failures"], 3);

        let reset = serde_json::to_value(reset_event())?;
        assert_eq!(reset["event"], reset_event().name());
        Ok(())
    }

    // Test IDs: TEVT-002
    #[test]
    fn memory_sink_is_bounded() {
        let sink = MemorySink::new();
        for failures in 0..105_u32 {
            sink.emit(&KernelEvent::RecoveryModeEntered {
                consecutive_failures: failures,
            });
        }
        let events = sink.events();
        assert_eq!(events.len(), RING_BUFFER_SIZE);
        assert_eq!(
            events.first(),
            Some(&KernelEvent::RecoveryModeEntered {
                consecutive_failures: 5
            })
        );
        assert_eq!(sink.count("recovery-mode-entered"), RING_BUFFER_SIZE);
    }

    // Test IDs: TEVT-003
    #[test]
    fn jsonl_sink_appends_lines() -> Result<()> {
        let dir = tempdir()?;
        let sink = JsonlSink::new(dir.path().join("events.jsonl"));
        sink.emit(&reset_event());
        sink.emit(&KernelEvent::Recovered {
            from_revision: "abc1234".to_string(),
        });

        let written = std::fs::read_to_string(sink.path())?;
        let lines = written
            .lines()
            .map(serde_json::from_str::<AuditLine>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].event.name(), "recovered");
        assert!(sink.fallback_entries().is_empty());
        Ok(())
    }

    // Test IDs: TEVT-004
    #[test]
    fn jsonl_sink_falls_back_to_memory_when_unwritable() -> Result<()> {
        let dir = tempdir()?;
        let sink = JsonlSink::new(dir.path().join("missing").join("events.jsonl"));
        sink.emit(&reset_event());
        sink.emit(&reset_event());
        assert_eq!(sink.fallback_entries().len(), 2);
        Ok(())
    }
}
