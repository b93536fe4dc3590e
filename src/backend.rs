use crate::{
    error::BackendError,
    types::{Appointment, AppointmentDraft, AppointmentStatus, Availability, Service, Specialty, Worker},
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use std::collections::BTreeSet;
use uuid::Uuid;

pub trait BookingBackend: Clone + Send + Sync + 'static {
    /// All workers, ordered by id.
    fn workers(&self) -> Result<Vec<Worker>, BackendError>;
    fn worker(&self, id: Uuid) -> Result<Option<Worker>, BackendError>;
    fn add_worker(&self, name: String, specialties: BTreeSet<Specialty>) -> Result<Worker, BackendError>;

    fn services(&self) -> Result<Vec<Service>, BackendError>;
    fn service(&self, id: Uuid) -> Result<Option<Service>, BackendError>;
    /// Fails with `Duplicate` when a service with the same type and duration exists.
    fn add_service(&self, kind: Specialty, duration_minutes: u32) -> Result<Service, BackendError>;

    /// Windows of a worker ordered by day and start time, optionally limited to one day.
    fn availabilities(
        &self,
        worker_id: Uuid,
        day_of_week: Option<Weekday>,
    ) -> Result<Vec<Availability>, BackendError>;
    fn add_availability(
        &self,
        worker_id: Uuid,
        day_of_week: Weekday,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Availability, BackendError>;
    fn remove_availability(&self, id: Uuid) -> Result<(), BackendError>;

    fn appointment(&self, id: Uuid) -> Result<Option<Appointment>, BackendError>;
    /// PENDING/CONFIRMED appointments of a worker intersecting `[from, to)`, ordered by start.
    fn active_appointments(
        &self,
        worker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError>;
    fn user_appointments(&self, user_id: Uuid) -> Result<Vec<Appointment>, BackendError>;
    /// Appointments of any worker and status starting in `[from, to)`, ordered by start.
    fn appointments_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError>;
    /// Re-checks for conflicts and inserts as one atomic step. Fails with `SlotTaken`
    /// when another active appointment of the worker overlaps the draft.
    fn book_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, BackendError>;
    /// Moves an active appointment to `worker_id` and `[starts_at, ends_at)`. The conflict
    /// check ignores the appointment itself and runs atomically with the update. Fails with
    /// `NotFound` when the appointment is missing or no longer active.
    fn reschedule_appointment(
        &self,
        id: Uuid,
        worker_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Appointment, BackendError>;
    fn set_appointment_status(&self, id: Uuid, status: AppointmentStatus) -> Result<(), BackendError>;
    /// Marks every PENDING/CONFIRMED appointment that ended at or before `now` as COMPLETED.
    /// Appointments still in progress keep blocking their worker.
    fn complete_finished_appointments(&self, now: DateTime<Utc>) -> Result<usize, BackendError>;
}
