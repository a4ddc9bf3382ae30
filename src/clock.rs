use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike, Utc};

use crate::model::{Minutes, Span};

/// India Standard Time, +05:30, no DST.
pub const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Source of "now". Everything time-dependent takes one of these instead of
/// calling the system clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Business hours and slot grid, in one fixed local timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub slot_minutes: u32,
    pub offset: FixedOffset,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).expect("09:00 is a valid time"),
            close: NaiveTime::from_hms_opt(19, 0, 0).expect("19:00 is a valid time"),
            slot_minutes: 30,
            offset: FixedOffset::east_opt(IST_OFFSET_SECS).expect("+05:30 is a valid offset"),
        }
    }
}

impl TimeWindow {
    /// Inclusive on both ends: a booking may end exactly at closing time.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.open <= t && t <= self.close
    }

    pub fn is_aligned(&self, t: NaiveTime) -> bool {
        t.second() == 0 && t.nanosecond() == 0 && minutes_of_day(t) % self.slot_minutes == 0
    }

    pub fn business_span(&self) -> Span {
        Span::new(minutes_of_day(self.open), minutes_of_day(self.close))
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }
}

pub fn minutes_of_day(t: NaiveTime) -> Minutes {
    t.hour() * 60 + t.minute()
}

pub fn fmt_hm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
