use chrono::Duration;
use compound_duration::format_dhms;
use serde::{Serialize,Deserialize};
use std::ops::Deref;

type TimestampInner = chrono::DateTime<chrono::Local>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(TimestampInner);

impl Deref for Timestamp {
    type Target = TimestampInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<TimestampInner> for Timestamp {
    fn from(inner: TimestampInner) -> Self {
        Self(inner)
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Local::now())
    }

    /// Time elapsed from `earlier` to `self`, clamped at zero so clock
    /// adjustments never produce a negative age.
    pub fn since(&self, earlier: &Timestamp) -> Duration {
        self.0.signed_duration_since(earlier.0).max(Duration::zero())
    }

    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LastSeenDuration(Duration);

impl LastSeenDuration {
    pub fn new(seen_timestamp: &Timestamp) -> Self {
        Self::between(seen_timestamp, &Timestamp::now())
    }

    pub fn between(seen_timestamp: &Timestamp, now: &Timestamp) -> Self {
        Self(now.since(seen_timestamp))
    }
}

impl std::fmt::Display for LastSeenDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(format_dhms(self.0.num_seconds()).as_str())
    }
}

impl Deref for LastSeenDuration {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_is_clamped_at_zero() {
        let earlier = Timestamp::now();
        let later = earlier.plus(Duration::seconds(90));
        assert_eq!(later.since(&earlier), Duration::seconds(90));
        assert_eq!(earlier.since(&later), Duration::zero());
    }

    #[test]
    fn last_seen_duration_is_human_readable() {
        let seen = Timestamp::now();
        let now = seen.plus(Duration::seconds(3 * 60 + 5));
        assert_eq!(LastSeenDuration::between(&seen, &now).to_string(), format_dhms(185i64));
    }
}
