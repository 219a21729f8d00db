//! Timestamps used as message identity and subscription cursors.
//!
//! A [`Timestamp`] is a local wall-clock instant truncated to microseconds.
//! Its text form `YYYY-MM-DDTHH:MM:SS.ffffff` is fixed-width, so ordering the
//! strings (or the sled keys built from them) orders the instants.

use std::fmt;
use std::sync::Mutex;

use chrono::{Local, NaiveDate, NaiveDateTime, SubsecRound, TimeDelta};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Floor used as the cursor of a subscription that has seen nothing yet.
    pub fn epoch() -> Self {
        Self(NaiveDateTime::default())
    }

    /// Current local time, truncated to the stored precision. Local time
    /// repeats an hour when daylight saving ends; [`Clock`] keeps issued
    /// stamps increasing across that.
    pub fn now() -> Self {
        Self(Local::now().naive_local().trunc_subsecs(6))
    }

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self(dt.trunc_subsecs(6))
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s, PARSE_FORMAT).map(Self::from_naive)
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }

    /// `self - delta`, saturating at the epoch floor.
    pub fn minus(&self, delta: std::time::Duration) -> Self {
        TimeDelta::from_std(delta)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or_else(Self::epoch)
            .max(Self::epoch())
    }

    fn next_tick(&self) -> Self {
        Self(self.0 + TimeDelta::microseconds(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Hands out strictly increasing timestamps.
///
/// The wall clock can repeat a microsecond (two publishes in one tick) or step
/// backwards; either way the next value is bumped one microsecond past the
/// last one issued. A store seeds its clock with the newest stamp on disk, so
/// this also holds across a restart.
#[derive(Debug)]
pub struct Clock {
    last: Mutex<Timestamp>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Timestamp::epoch()),
        }
    }

    pub fn now(&self) -> Timestamp {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Timestamp::now();
        let issued = if now > *last { now } else { last.next_tick() };
        *last = issued;
        issued
    }

    /// Never issue anything at or before `seen` from now on.
    pub fn advance_past(&self, seen: Timestamp) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = (*last).max(seen);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
