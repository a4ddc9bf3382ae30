use chrono::{NaiveDate, NaiveDateTime};

use crate::clock::fmt_hm;
use crate::limits::STARTING_SOON_MIN;
use crate::model::*;

use super::availability::{free_spans, slots_in};
use super::{Engine, ValidationError};

/// Occupancy of one room at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomStatus {
    Occupied {
        current: Reservation,
        next: Option<Reservation>,
    },
    Available {
        next: Option<Reservation>,
        /// `next` begins within `STARTING_SOON_MIN` minutes.
        starting_soon: bool,
    },
}

impl RoomStatus {
    pub fn label(&self) -> String {
        match self {
            RoomStatus::Occupied { current, .. } => {
                format!("Occupied {}-{}", fmt_hm(current.start), fmt_hm(current.end))
            }
            RoomStatus::Available { next: Some(n), starting_soon } => format!(
                "{} Next: {}-{}",
                if *starting_soon { "Starting soon." } else { "Available." },
                fmt_hm(n.start),
                fmt_hm(n.end)
            ),
            RoomStatus::Available { next: None, .. } => "Available all day".to_string(),
        }
    }
}

impl Engine {
    pub async fn snapshot(&self) -> Vec<Reservation> {
        self.reservations.read().await.clone()
    }

    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    /// Reservations for one room and date, sorted by start.
    pub async fn reservations_for(&self, room_id: &str, date: NaiveDate) -> Vec<Reservation> {
        let guard = self.reservations.read().await;
        let mut rows: Vec<Reservation> = guard
            .iter()
            .filter(|r| r.room_id == room_id && r.date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.start);
        rows
    }

    /// What is happening in `room_id` at local time `now`, looking only at `date`.
    pub async fn room_status(
        &self,
        room_id: &str,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<RoomStatus, ValidationError> {
        if self.room(room_id).is_none() {
            return Err(ValidationError::UnknownRoom(room_id.to_string()));
        }
        let rows = self.reservations_for(room_id, date).await;

        let mut current = None;
        let mut next = None;
        for row in rows {
            let starts = date.and_time(row.start);
            let ends = date.and_time(row.end);
            if current.is_none() && starts <= now && now < ends {
                current = Some(row);
            } else if starts > now && next.is_none() {
                next = Some(row);
            }
        }

        Ok(match current {
            Some(current) => RoomStatus::Occupied { current, next },
            None => {
                let starting_soon = next.as_ref().is_some_and(|n| {
                    let lead = date.and_time(n.start) - now;
                    lead.num_seconds() > 0 && lead.num_minutes() <= STARTING_SOON_MIN as i64
                });
                RoomStatus::Available { next, starting_soon }
            }
        })
    }

    /// Bookable slots left in `room_id` on `date`.
    pub async fn free_slots(&self, room_id: &str, date: NaiveDate) -> Result<Vec<Span>, ValidationError> {
        if self.room(room_id).is_none() {
            return Err(ValidationError::UnknownRoom(room_id.to_string()));
        }
        let booked: Vec<Span> = self
            .reservations_for(room_id, date)
            .await
            .iter()
            .filter(|r| r.start < r.end)
            .map(Reservation::span)
            .collect();
        Ok(slots_in(&self.window, &free_spans(&self.window, &booked)))
    }
}
