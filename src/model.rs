use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::{fmt_hm, minutes_of_day};

/// Minutes since local midnight.
pub type Minutes = u32;

pub type RoomId = String;

/// Half-open interval `[start, end)` in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minutes) -> bool {
        self.start <= t && t < self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Bookings need approver sign-off before they commit.
    pub gated: bool,
}

impl Room {
    pub fn new(id: &str, name: &str, gated: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            gated,
        }
    }
}

/// Three meeting rooms and the gated board room.
pub fn default_rooms() -> Vec<Room> {
    vec![
        Room::new("mr1", "Meeting Room 1", false),
        Room::new("mr2", "Meeting Room 2", false),
        Room::new("mr3", "Meeting Room 3", false),
        Room::new("br", "Board Room", true),
    ]
}

/// What a requester asks for. Becomes a [`Reservation`] once the engine
/// stamps it with the room name and creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub room_id: RoomId,
    pub date: NaiveDate,
    #[serde(with = "hm")]
    pub start: NaiveTime,
    #[serde(with = "hm")]
    pub end: NaiveTime,
    pub booked_by: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub room_id: RoomId,
    pub room_name: String,
    pub date: NaiveDate,
    #[serde(with = "hm")]
    pub start: NaiveTime,
    #[serde(with = "hm")]
    pub end: NaiveTime,
    pub booked_by: String,
    pub title: String,
    pub created_at: DateTime<FixedOffset>,
}

impl Reservation {
    /// Only meaningful once `start < end` has been validated.
    pub fn span(&self) -> Span {
        Span {
            start: minutes_of_day(self.start),
            end: minutes_of_day(self.end),
        }
    }

    pub fn same_slot_group(&self, other: &Reservation) -> bool {
        self.room_id == other.room_id && self.date == other.date
    }

    pub fn label(&self) -> String {
        format!(
            "{} {} {}-{}",
            self.room_name,
            self.date,
            fmt_hm(self.start),
            fmt_hm(self.end)
        )
    }
}

/// Why a pending approval went away without committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Committed,
    ApprovalConflict,
    DeliveryFailed,
    Abandoned,
    Swept,
}

/// Published on the per-room notify hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingEvent {
    Committed(Reservation),
    ApprovalRequested {
        session_id: Ulid,
        room_id: RoomId,
        date: NaiveDate,
        span: Span,
    },
    ApprovalCleared {
        session_id: Ulid,
        room_id: RoomId,
        reason: ClearReason,
    },
    Imported {
        count: usize,
    },
}

/// `HH:MM` on the wire, seconds accepted on input.
pub(crate) mod hm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hm(&raw).map_err(serde::de::Error::custom)
    }
}

pub fn parse_hm(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M").or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
}
