use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::clock::TimeWindow;
use crate::model::*;

use super::error::ValidationError;

/// Shape checks that need no other reservation: order, business hours, slot grid.
pub fn validate_shape(candidate: &Reservation, window: &TimeWindow) -> Result<(), ValidationError> {
    if candidate.end <= candidate.start {
        return Err(ValidationError::EndBeforeStart);
    }
    if !window.contains(candidate.start) || !window.contains(candidate.end) {
        return Err(ValidationError::OutsideBusinessHours {
            open: window.business_span(),
        });
    }
    if !window.is_aligned(candidate.start) || !window.is_aligned(candidate.end) {
        return Err(ValidationError::Misaligned {
            slot_minutes: window.slot_minutes,
        });
    }
    Ok(())
}

/// Accept or reject `candidate` against already-committed reservations.
/// Checks run in a fixed order and the first failure wins.
pub fn validate(
    candidate: &Reservation,
    existing: &[Reservation],
    window: &TimeWindow,
) -> Result<(), ValidationError> {
    validate_shape(candidate, window)?;
    let span = candidate.span();
    for other in existing.iter().filter(|r| r.same_slot_group(candidate)) {
        if other.end <= other.start {
            // Rows that never passed validation cannot overlap anything.
            continue;
        }
        if span.overlaps(&other.span()) {
            return Err(ValidationError::Conflict(other.span()));
        }
    }
    Ok(())
}

/// Validate a whole batch as a standalone set: every row must be well-formed
/// and no two rows in the same (room, date) group may overlap.
pub fn validate_batch(batch: &[Reservation], window: &TimeWindow) -> Result<(), ValidationError> {
    for row in batch {
        validate_shape(row, window)?;
    }

    let mut groups: BTreeMap<(&str, NaiveDate), Vec<Span>> = BTreeMap::new();
    for row in batch {
        groups
            .entry((row.room_id.as_str(), row.date))
            .or_default()
            .push(row.span());
    }

    for ((room_id, date), spans) in &groups {
        for i in 0..spans.len() {
            for j in (i + 1)..spans.len() {
                if spans[i].overlaps(&spans[j]) {
                    return Err(ValidationError::BatchOverlap {
                        room_id: room_id.to_string(),
                        date: *date,
                        first: spans[i],
                        second: spans[j],
                    });
                }
            }
        }
    }
    Ok(())
}

/// Field checks on a request before it becomes a reservation.
pub fn validate_request(request: &BookingRequest) -> Result<(), ValidationError> {
    use crate::limits::*;
    if request.booked_by.trim().is_empty() {
        return Err(ValidationError::MissingField("booked_by"));
    }
    if request.title.trim().is_empty() {
        return Err(ValidationError::MissingField("title"));
    }
    if request.booked_by.len() > MAX_NAME_LEN {
        return Err(ValidationError::FieldTooLong("booked_by"));
    }
    if request.title.len() > MAX_TITLE_LEN {
        return Err(ValidationError::FieldTooLong("title"));
    }
    Ok(())
}

/// True when no two reservations in the set overlap within a (room, date) group.
pub fn is_conflict_free(rows: &[Reservation]) -> bool {
    rows.iter().enumerate().all(|(i, a)| {
        rows[i + 1..]
            .iter()
            .filter(|b| a.same_slot_group(b))
            .all(|b| !a.span().overlaps(&b.span()))
    })
}
