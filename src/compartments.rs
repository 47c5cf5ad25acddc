use std::collections::BTreeMap;
use chrono::Duration;
use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::time::Timestamp;

pub type Volume = i64;

pub const DEFAULT_THRESHOLD: Volume = 80;
pub const DEFAULT_COMPARTMENTS: [&str; 4] = ["botol", "kaleng", "kertas", "lainnya"];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deref)]
#[serde(transparent)]
pub struct CompartmentId(String);

impl CompartmentId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn display_name(&self) -> String {
        display_name(&self.0)
    }
}

impl From<&str> for CompartmentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human readable name of a compartment, unknown identifiers are returned as is.
pub fn display_name(id: &str) -> String {
    let name = match id {
        "botol" => "Botol",
        "kaleng" => "Kaleng",
        "kertas" => "Kertas",
        "lainnya" => "Lainnya",
        other => other,
    };
    name.to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompartmentReading {
    pub compartment: CompartmentId,
    pub volume: Volume,
}

impl CompartmentReading {
    pub fn new<C: Into<CompartmentId>>(compartment: C, volume: Volume) -> Self {
        Self { compartment: compartment.into(), volume }
    }
}

/// One batch of volume readings keyed by compartment, as delivered by the feed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deref, DerefMut)]
pub struct Volumes(BTreeMap<CompartmentId, Volume>);

impl Volumes {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn readings(&self) -> impl Iterator<Item = CompartmentReading> + '_ {
        self.0.iter().map(|(compartment, volume)| CompartmentReading {
            compartment: compartment.clone(),
            volume: *volume,
        })
    }

    /// Overwrites the volumes present in `update`, keeping the others.
    pub fn merge(&mut self, update: &Volumes) {
        for (compartment, volume) in update.iter() {
            self.0.insert(compartment.clone(), *volume);
        }
    }
}

impl<C: Into<CompartmentId>> FromIterator<(C, Volume)> for Volumes {
    fn from_iter<T: IntoIterator<Item = (C, Volume)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(compartment, volume)| (compartment.into(), volume)).collect())
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CompartmentState {
    pub last_volume: Option<Volume>,
    pub last_notified_at: Option<Timestamp>,
}

/// When a compartment that is at or above the threshold is worth a notification.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotifyPolicy {
    /// Only on the transition from below to at/above the threshold.
    EdgeTriggered,
    /// Rising edge, then again every `interval_secs` while the compartment stays full.
    EdgeTriggeredWithRenotify { interval_secs: u64 },
    /// Whenever full, at most once per `window_ms`.
    Cooldown { window_ms: u64 },
    /// Every reading at/above the threshold, no suppression.
    EveryReading,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self::EdgeTriggered
    }
}

impl NotifyPolicy {

    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::EdgeTriggeredWithRenotify { .. } | Self::Cooldown { .. })
    }

    /// Window of the time based policies. `None` for the others and for
    /// windows too large to be represented.
    pub fn window(&self) -> Option<Duration> {
        match *self {
            Self::EdgeTriggeredWithRenotify { interval_secs } =>
                i64::try_from(interval_secs).ok().and_then(Duration::try_seconds),
            Self::Cooldown { window_ms } =>
                i64::try_from(window_ms).ok().and_then(Duration::try_milliseconds),
            Self::EdgeTriggered | Self::EveryReading => None,
        }
    }

}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub fire: bool,
    pub state: CompartmentState,
}

#[derive(Clone, Copy, Debug)]
pub struct Evaluator {
    threshold: Volume,
    policy: NotifyPolicy,
}

impl Evaluator {
    pub fn new(threshold: Volume, policy: NotifyPolicy) -> Self {
        Self { threshold, policy }
    }

    pub fn threshold(&self) -> Volume {
        self.threshold
    }

    pub fn policy(&self) -> NotifyPolicy {
        self.policy
    }

    /// Decides whether `reading` must be notified given the compartment's previous state.
    ///
    /// A compartment never seen before counts as empty, so a first reading
    /// already at the threshold fires. The returned state always carries the
    /// new reading's volume; `last_notified_at` moves to `now` only on fire.
    pub fn evaluate(&self, state: &CompartmentState, reading: &CompartmentReading, now: Timestamp) -> Evaluation {
        let is_full = reading.volume >= self.threshold;
        let was_full = state.last_volume.unwrap_or(0) >= self.threshold;

        let fire = is_full && match self.policy {
            NotifyPolicy::EdgeTriggered => !was_full,
            NotifyPolicy::EdgeTriggeredWithRenotify { .. } =>
                !was_full || elapsed_at_least(state.last_notified_at, now, self.policy.window()),
            NotifyPolicy::Cooldown { .. } =>
                elapsed_at_least(state.last_notified_at, now, self.policy.window()),
            NotifyPolicy::EveryReading => true,
        };

        let last_notified_at = if fire { Some(now) } else { state.last_notified_at };

        Evaluation {
            fire,
            state: CompartmentState {
                last_volume: Some(reading.volume),
                last_notified_at,
            },
        }
    }
}

// an unrepresentable window never elapses
fn elapsed_at_least(last: Option<Timestamp>, now: Timestamp, window: Option<Duration>) -> bool {
    match (last, window) {
        (None, _) => true,
        (Some(last), Some(window)) => now.since(&last) >= window,
        (Some(_), None) => false,
    }
}
