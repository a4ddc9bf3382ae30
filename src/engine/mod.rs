mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, slots_in, subtract_intervals};
pub use conflict::{is_conflict_free, validate, validate_batch, validate_request, validate_shape};
pub use error::{EngineError, ValidationError};
pub use queries::RoomStatus;

use std::io;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::TimeWindow;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::ReservationStore;

/// The booking conflict engine. Sole owner of committed reservations.
///
/// `reservations` mirrors the store. It is replaced only while holding its
/// write lock and only after `replace_all` succeeded, so validation and the
/// rewrite it guards form one critical section and no stale cache survives a
/// write.
pub struct Engine {
    rooms: Vec<Room>,
    window: TimeWindow,
    store: Arc<dyn ReservationStore>,
    reservations: RwLock<Vec<Reservation>>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        rooms: Vec<Room>,
        window: TimeWindow,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let loaded = store.load_all()?;
        if !is_conflict_free(&loaded) {
            warn!("loaded reservation set contains overlaps; new bookings will still be checked");
        }
        info!("engine loaded {} reservations for {} rooms", loaded.len(), rooms.len());
        Ok(Self {
            rooms,
            window,
            store,
            reservations: RwLock::new(loaded),
            notify,
        })
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Persist `next` and swap it into the cache. Caller holds the write lock,
    /// so writes stay serialized; the file I/O runs on the blocking pool.
    async fn rewrite(&self, cache: &mut Vec<Reservation>, next: Vec<Reservation>) -> Result<(), EngineError> {
        let started = std::time::Instant::now();
        let store = self.store.clone();
        let next = tokio::task::spawn_blocking(move || store.replace_all(&next).map(|()| next))
            .await
            .map_err(|e| EngineError::Store(format!("store writer task failed: {e}")))?
            .map_err(|e| EngineError::Store(e.to_string()))?;
        metrics::histogram!(crate::observability::STORE_REWRITE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        *cache = next;
        Ok(())
    }
}
