use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate, validate_batch, validate_request};
use super::{Engine, EngineError, ValidationError};

impl Engine {
    /// Turn a request into a reservation stamped with the room's display
    /// name and `created_at`. Does not look at other reservations.
    pub fn build(
        &self,
        request: &BookingRequest,
        created_at: DateTime<FixedOffset>,
    ) -> Result<Reservation, ValidationError> {
        validate_request(request)?;
        let room = self
            .room(&request.room_id)
            .ok_or_else(|| ValidationError::UnknownRoom(request.room_id.clone()))?;
        Ok(Reservation {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
            date: request.date,
            start: request.start,
            end: request.end,
            booked_by: request.booked_by.trim().to_string(),
            title: request.title.trim().to_string(),
            created_at,
        })
    }

    /// Validate against the current set without committing.
    pub async fn check(&self, candidate: &Reservation) -> Result<(), ValidationError> {
        if self.room(&candidate.room_id).is_none() {
            return Err(ValidationError::UnknownRoom(candidate.room_id.clone()));
        }
        let guard = self.reservations.read().await;
        validate(candidate, &guard, &self.window)
    }

    /// Validate and append in one critical section. Two concurrent commits for
    /// overlapping slots cannot both succeed.
    pub async fn commit(&self, candidate: Reservation) -> Result<Reservation, EngineError> {
        if self.room(&candidate.room_id).is_none() {
            return Err(ValidationError::UnknownRoom(candidate.room_id.clone()).into());
        }
        let mut guard = self.reservations.write().await;
        if let Err(e) = validate(&candidate, &guard, &self.window) {
            debug!("commit rejected for {}: {e}", candidate.label());
            return Err(e.into());
        }

        let mut next = guard.clone();
        next.push(candidate.clone());
        self.rewrite(&mut guard, next).await?;
        drop(guard);

        info!("committed {}", candidate.label());
        metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        self.notify
            .send(&candidate.room_id, &BookingEvent::Committed(candidate.clone()));
        Ok(candidate)
    }

    /// Replace the whole set. All-or-nothing: one bad row or one overlap
    /// rejects the batch and leaves the store untouched.
    pub async fn bulk_import(&self, batch: Vec<Reservation>) -> Result<usize, EngineError> {
        if batch.len() > MAX_IMPORT_BATCH {
            return Err(ValidationError::BatchTooLarge(batch.len()).into());
        }
        if let Some(row) = batch.iter().find(|r| self.room(&r.room_id).is_none()) {
            return Err(ValidationError::UnknownRoom(row.room_id.clone()).into());
        }
        validate_batch(&batch, &self.window)?;

        let count = batch.len();
        let mut guard = self.reservations.write().await;
        self.rewrite(&mut guard, batch).await?;
        drop(guard);

        info!("imported {count} reservations");
        let event = BookingEvent::Imported { count };
        for room in &self.rooms {
            self.notify.send(&room.id, &event);
        }
        Ok(count)
    }
}
