//! Bounded drift of the two-dimensional affect state (valence, energy).
//!
//! Each update passes through, in order: a per-tick clamp, the remaining
//! per-hour budget, baseline gravity (only when far from baseline), and a hard
//! clamp to the legal ranges.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::events::{EventSink, KernelEvent};

const WINDOW: Duration = Duration::HOUR;

/// Slack for float accumulation when comparing against the hour budget.
const BUDGET_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Affect {
    pub valence: f64,
    pub energy: f64,
}

impl Affect {
    #[must_use]
    pub const fn new(valence: f64, energy: f64) -> Self {
        Self { valence, energy }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffectRange {
    pub min: f64,
    pub max: f64,
}

impl AffectRange {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Position of `value` inside the range as 0..=1.
    fn fraction(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub per_tick_cap: f64,
    /// Ceiling on cumulative applied magnitude per dimension per rolling hour.
    pub per_hour_cap: f64,
    pub gravity_threshold: f64,
    pub gravity_pull: f64,
    pub history_len: usize,
    pub baseline: Affect,
    pub valence_range: AffectRange,
    pub energy_range: AffectRange,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            per_tick_cap: 0.3,
            per_hour_cap: 0.6,
            gravity_threshold: 0.5,
            gravity_pull: 0.02,
            history_len: 20,
            baseline: Affect::new(0.0, 0.5),
            valence_range: AffectRange::new(-1.0, 1.0),
            energy_range: AffectRange::new(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClampReason {
    PerTick,
    PerHour,
}

impl ClampReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerTick => "per-tick limit",
            Self::PerHour => "per-hour limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub trigger: String,
    pub requested: Affect,
    pub applied: Affect,
    pub state: Affect,
    pub mood: String,
}

/// Magnitudes applied at one instant, for the rolling hour budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyDelta {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub valence: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftState {
    pub current: Affect,
    pub baseline: Affect,
    pub mood: String,
    pub history: VecDeque<HistoryEntry>,
    pub hourly_log: VecDeque<HourlyDelta>,
}

impl DriftState {
    #[must_use]
    pub fn new(config: &DriftConfig) -> Self {
        Self {
            current: config.baseline,
            baseline: config.baseline,
            mood: mood_label(config.baseline, config).to_string(),
            history: VecDeque::new(),
            hourly_log: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftUpdate {
    pub requested: Affect,
    pub applied: Affect,
    pub previous: Affect,
    pub state: Affect,
    pub mood: String,
    /// Limits that cut the request down, in the order they were applied.
    pub clamped: Vec<ClampReason>,
}

/// Discrete label for a point on the 3x3 valence/energy grid.
#[must_use]
pub fn mood_label(affect: Affect, config: &DriftConfig) -> &'static str {
    const LABELS: [[&str; 3]; 3] = [
        ["down", "uneasy", "tense"],
        ["tired", "neutral", "alert"],
        ["calm", "content", "excited"],
    ];
    let band = |fraction: f64| {
        if fraction < 1.0 / 3.0 {
            0
        } else if fraction > 2.0 / 3.0 {
            2
        } else {
            1
        }
    };
    let valence = band(config.valence_range.fraction(affect.valence));
    let energy = band(config.energy_range.fraction(affect.energy));
    LABELS[valence][energy]
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn clamp_magnitude(value: f64, cap: f64) -> f64 {
    value.clamp(-cap, cap)
}

/// `value` limited to what is left of the hour budget.
fn within_budget(value: f64, cap: f64, used: f64) -> f64 {
    let remaining = (cap - used).max(0.0);
    if value.abs() <= remaining + BUDGET_TOLERANCE {
        value
    } else {
        clamp_magnitude(value, remaining)
    }
}

fn gravity(value: f64, baseline: f64, threshold: f64, pull: f64) -> f64 {
    let offset = value - baseline;
    if offset.abs() > threshold {
        value - offset.signum() * pull.min(offset.abs())
    } else {
        value
    }
}

pub struct DriftLimiter {
    config: DriftConfig,
    sink: Arc<dyn EventSink>,
    state: Mutex<DriftState>,
}

impl DriftLimiter {
    #[must_use]
    pub fn new(config: DriftConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(DriftState::new(&config)),
            config,
            sink,
        }
    }

    /// Resume from a persisted state.
    #[must_use]
    pub fn with_state(self, state: DriftState) -> Self {
        *self.state.lock() = state;
        self
    }

    #[must_use]
    pub fn state(&self) -> DriftState {
        self.state.lock().clone()
    }

    #[must_use]
    pub fn current(&self) -> Affect {
        self.state.lock().current
    }

    pub fn update(&self, valence_delta: f64, energy_delta: f64, trigger: &str) -> DriftUpdate {
        self.update_at(valence_delta, energy_delta, trigger, OffsetDateTime::now_utc())
    }

    /// [`DriftLimiter::update`] with an explicit clock.
    pub fn update_at(
        &self,
        valence_delta: f64,
        energy_delta: f64,
        trigger: &str,
        now: OffsetDateTime,
    ) -> DriftUpdate {
        let config = &self.config;
        let requested = Affect::new(finite_or_zero(valence_delta), finite_or_zero(energy_delta));

        let mut state = self.state.lock();
        while state
            .hourly_log
            .front()
            .is_some_and(|entry| now - entry.at >= WINDOW)
        {
            state.hourly_log.pop_front();
        }
        let (used_valence, used_energy) = state
            .hourly_log
            .iter()
            .fold((0.0, 0.0), |(valence, energy), entry| {
                (valence + entry.valence, energy + entry.energy)
            });

        let tick = Affect::new(
            clamp_magnitude(requested.valence, config.per_tick_cap),
            clamp_magnitude(requested.energy, config.per_tick_cap),
        );
        let applied = Affect::new(
            within_budget(tick.valence, config.per_hour_cap, used_valence),
            within_budget(tick.energy, config.per_hour_cap, used_energy),
        );
        // One entry per limit that fired, each with its own before and after.
        let clamps = [
            (ClampReason::PerTick, requested, tick),
            (ClampReason::PerHour, tick, applied),
        ]
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .collect::<Vec<_>>();

        let previous = state.current;
        let baseline = state.baseline;
        let next = Affect::new(
            config.valence_range.clamp(gravity(
                previous.valence + applied.valence,
                baseline.valence,
                config.gravity_threshold,
                config.gravity_pull,
            )),
            config.energy_range.clamp(gravity(
                previous.energy + applied.energy,
                baseline.energy,
                config.gravity_threshold,
                config.gravity_pull,
            )),
        );

        if applied.valence != 0.0 || applied.energy != 0.0 {
            state.hourly_log.push_back(HourlyDelta {
                at: now,
                valence: applied.valence.abs(),
                energy: applied.energy.abs(),
            });
        }

        let mood = mood_label(next, config).to_string();
        let previous_mood = std::mem::replace(&mut state.mood, mood.clone());
        state.current = next;
        state.history.push_back(HistoryEntry {
            at: now,
            trigger: trigger.to_string(),
            requested,
            applied,
            state: next,
            mood: mood.clone(),
        });
        while state.history.len() > config.history_len {
            state.history.pop_front();
        }
        drop(state);

        for &(reason, before, after) in &clamps {
            tracing::debug!(trigger, reason = reason.as_str(), "affect update clamped");
            self.sink.emit(&KernelEvent::MoodClamped {
                reason: reason.as_str().to_string(),
                requested: before,
                applied: after,
            });
        }
        if mood != previous_mood {
            tracing::info!(trigger, %mood, %previous_mood, "mood changed");
            self.sink.emit(&KernelEvent::MoodChanged {
                mood: mood.clone(),
                previous_mood,
                trigger: trigger.to_string(),
            });
        }

        DriftUpdate {
            requested,
            applied,
            previous,
            state: next,
            mood,
            clamped: clamps.into_iter().map(|(reason, _, _)| reason).collect(),
        }
    }
}
