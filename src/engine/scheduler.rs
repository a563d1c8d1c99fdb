//! Time-slot scheduler.
//!
//! The only place where UTC instants are converted to local civil time.
//! Everything else in the crate works in `DateTime<Utc>`.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rand::Rng;
use serde::Serialize;
use std::str::FromStr;

use crate::error::ConfigError;

/// Days searched ahead when looking for an untaken slot
const FREE_SLOT_HORIZON_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPriority {
    Peak,
    Standard,
    Low,
}

impl FromStr for SlotPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "peak" => Ok(SlotPriority::Peak),
            "standard" => Ok(SlotPriority::Standard),
            "low" => Ok(SlotPriority::Low),
            other => Err(format!("unknown slot priority '{}'", other)),
        }
    }
}

/// A daily posting time in local civil time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub hour: u32,
    pub minute: u32,
    /// Personas allowed in this slot; empty means all
    pub personas: Vec<String>,
    pub priority: SlotPriority,
}

impl ScheduleSlot {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ConfigError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidSlot { hour, minute });
        }
        Ok(Self {
            hour,
            minute,
            personas: Vec::new(),
            priority: SlotPriority::Standard,
        })
    }

    pub fn with_priority(mut self, priority: SlotPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_personas(mut self, personas: Vec<String>) -> Self {
        self.personas = personas;
        self
    }

    pub fn allows(&self, persona: &str) -> bool {
        self.personas.is_empty() || self.personas.iter().any(|p| p == persona)
    }

    fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Parses `HH:MM[@priority][=persona|persona]`, e.g. `17:00@peak=analyst|educator`.
impl FromStr for ScheduleSlot {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: "SCHEDULE_SLOTS",
            reason,
        };

        let (head, personas) = match s.trim().split_once('=') {
            Some((head, list)) => (
                head,
                list.split('|')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            None => (s.trim(), Vec::new()),
        };
        let (time, priority) = match head.split_once('@') {
            Some((time, tier)) => (time, tier.parse::<SlotPriority>().map_err(invalid)?),
            None => (head, SlotPriority::Standard),
        };
        let (h, m) = time
            .split_once(':')
            .ok_or_else(|| invalid(format!("'{}' is not HH:MM", time)))?;
        let hour = h.trim().parse::<u32>().map_err(|e| invalid(e.to_string()))?;
        let minute = m.trim().parse::<u32>().map_err(|e| invalid(e.to_string()))?;

        Ok(ScheduleSlot::new(hour, minute)?
            .with_priority(priority)
            .with_personas(personas))
    }
}

/// When the next orchestration run should happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextRun {
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub delay: std::time::Duration,
    pub jitter_secs: i64,
}

#[derive(Debug, Clone)]
pub struct SlotScheduler {
    slots: Vec<ScheduleSlot>,
    weekdays: Vec<Weekday>,
    offset: FixedOffset,
    buffer: Duration,
    max_jitter: Duration,
    skip_probability: f64,
}

impl SlotScheduler {
    pub fn new(
        mut slots: Vec<ScheduleSlot>,
        weekdays: Vec<Weekday>,
        offset: FixedOffset,
    ) -> Result<Self, ConfigError> {
        if slots.is_empty() {
            return Err(ConfigError::EmptySlotTable);
        }
        if weekdays.is_empty() {
            return Err(ConfigError::NoEligibleWeekdays);
        }
        slots.sort_by_key(|s| (s.hour, s.minute));
        slots.dedup_by_key(|s| (s.hour, s.minute));

        Ok(Self {
            slots,
            weekdays,
            offset,
            buffer: Duration::minutes(5),
            max_jitter: Duration::minutes(3),
            skip_probability: 0.12,
        })
    }

    /// 08:00, 12:00, 17:00 and 20:00 on weekdays, peaks at noon and 17:00.
    pub fn default_slots() -> Vec<ScheduleSlot> {
        [(8, SlotPriority::Standard), (12, SlotPriority::Peak), (17, SlotPriority::Peak), (20, SlotPriority::Low)]
            .into_iter()
            .map(|(hour, priority)| ScheduleSlot {
                hour,
                minute: 0,
                personas: Vec::new(),
                priority,
            })
            .collect()
    }

    pub fn default_weekdays() -> Vec<Weekday> {
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_skip_probability(mut self, p: f64) -> Self {
        self.skip_probability = p.clamp(0.0, 1.0);
        self
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        Utc.from_utc_datetime(&(local - Duration::seconds(self.offset.local_minus_utc() as i64)))
    }

    /// Slot occurrences on eligible days, in time order, starting with the
    /// local day of `from`.
    fn occurrences(&self, from: DateTime<Utc>, days: i64) -> impl Iterator<Item = (DateTime<Utc>, &ScheduleSlot)> + '_ {
        let start = from.with_timezone(&self.offset).date_naive();
        (0..=days)
            .filter_map(move |d| start.checked_add_signed(Duration::days(d)))
            .filter(move |date| self.weekdays.contains(&date.weekday()))
            .flat_map(move |date| self.slots.iter().map(move |slot| (self.to_utc(date, slot.time()), slot)))
    }

    /// First slot strictly after `now + buffer`.
    pub fn next_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let threshold = now + self.buffer;
        self.occurrences(threshold, 7)
            .map(|(at, _)| at)
            .find(|at| *at > threshold)
            // Unreachable with a non-empty weekday set
            .unwrap_or(threshold + Duration::days(7))
    }

    /// First slot after `now + buffer` that is not in `taken` and allows
    /// `persona`.
    pub fn next_free_slot(
        &self,
        now: DateTime<Utc>,
        taken: &[DateTime<Utc>],
        persona: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let threshold = now + self.buffer;
        self.occurrences(threshold, FREE_SLOT_HORIZON_DAYS)
            .filter(|(at, _)| *at > threshold)
            .filter(|(_, slot)| persona.is_none_or(|p| slot.allows(p)))
            .map(|(at, _)| at)
            .find(|at| !taken.contains(at))
    }

    /// Next run = min(next slot, earliest pending continuation) plus jitter.
    pub fn next_run<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        earliest_pending: Option<DateTime<Utc>>,
        rng: &mut R,
    ) -> NextRun {
        let slot = self.next_slot(now);
        let base = match earliest_pending {
            Some(pending) if pending < slot => pending.max(now),
            _ => slot,
        };

        let max_jitter = self.max_jitter.num_seconds().max(0);
        let jitter_secs = if max_jitter > 0 {
            rng.random_range(0..=max_jitter)
        } else {
            0
        };
        let at = base + Duration::seconds(jitter_secs);

        NextRun {
            at,
            delay: (at - now).to_std().unwrap_or_default(),
            jitter_secs,
        }
    }

    /// Randomized generation skip
    pub fn roll_skip<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.skip_probability > 0.0 && rng.random_bool(self.skip_probability)
    }
}
