use chrono::NaiveDate;

use crate::model::{RoomId, Span};

/// Why a candidate reservation (or batch) was refused. Nothing is mutated
/// when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EndBeforeStart,
    OutsideBusinessHours { open: Span },
    Misaligned { slot_minutes: u32 },
    Conflict(Span),
    BatchOverlap {
        room_id: RoomId,
        date: NaiveDate,
        first: Span,
        second: Span,
    },
    UnknownRoom(RoomId),
    MissingField(&'static str),
    FieldTooLong(&'static str),
    BatchTooLarge(usize),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EndBeforeStart => write!(f, "end before start"),
            ValidationError::OutsideBusinessHours { open } => {
                write!(f, "outside business hours {open}")
            }
            ValidationError::Misaligned { slot_minutes } => {
                write!(f, "misaligned to slot grid ({slot_minutes}-minute slots)")
            }
            ValidationError::Conflict(span) => write!(f, "conflict with {span}"),
            ValidationError::BatchOverlap {
                room_id,
                date,
                first,
                second,
            } => write!(f, "overlap in {room_id} on {date}: {first} vs {second}"),
            ValidationError::UnknownRoom(id) => write!(f, "unknown room: {id}"),
            ValidationError::MissingField(name) => write!(f, "missing field: {name}"),
            ValidationError::FieldTooLong(name) => write!(f, "field too long: {name}"),
            ValidationError::BatchTooLarge(n) => write!(f, "batch too large: {n} rows"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    Store(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "{e}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}
