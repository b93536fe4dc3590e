//! Overlap detection between a candidate interval and a worker's booked appointments.
//!
//! Intervals are half-open, `[start, end)`: an appointment ending at 10:00 and
//! one starting at 10:00 do not overlap.

use crate::{backend::BookingBackend, error::BackendError, types::Appointment};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// First appointment among `existing` that blocks `[start, end)` for `worker_id`.
/// Appointments of other workers and non-blocking statuses are ignored.
pub fn find_conflict<'a>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    worker_id: Uuid,
    existing: impl IntoIterator<Item = &'a Appointment>,
) -> Option<&'a Appointment> {
    existing.into_iter().find(|appointment| {
        appointment.worker_id == worker_id
            && appointment.status.is_blocking()
            && intervals_overlap(start, end, appointment.starts_at, appointment.ends_at)
    })
}

/// Looks up the worker's active appointments in the backend and checks `[start, end)` against them.
pub fn overlaps<B: BookingBackend>(
    backend: &B,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    worker_id: Uuid,
) -> Result<bool, BackendError> {
    let candidates = backend.active_appointments(worker_id, start, end)?;
    Ok(find_conflict(start, end, worker_id, &candidates).is_some())
}
