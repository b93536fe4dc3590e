use crate::{
    backend::BookingBackend,
    conflict::{find_conflict, intervals_overlap},
    error::BackendError,
    types::{
        Appointment, AppointmentDraft, AppointmentStatus, Availability, Service, Specialty, Worker,
    },
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Bookings {
    workers: BTreeMap<Uuid, Worker>,
    services: BTreeMap<Uuid, Service>,
    availabilities: BTreeMap<Uuid, Availability>,
    appointments: BTreeMap<Uuid, Appointment>,
}

/// In-memory backend. Everything is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct LocalBookings {
    bookings: Arc<Mutex<Bookings>>,
}

impl LocalBookings {
    fn bookings(&self) -> Result<MutexGuard<'_, Bookings>, BackendError> {
        self.bookings
            .lock()
            .map_err(|_| BackendError::Unavailable("in-memory store lock poisoned".into()))
    }
}

impl BookingBackend for LocalBookings {
    fn workers(&self) -> Result<Vec<Worker>, BackendError> {
        Ok(self.bookings()?.workers.values().cloned().collect())
    }

    fn worker(&self, id: Uuid) -> Result<Option<Worker>, BackendError> {
        Ok(self.bookings()?.workers.get(&id).cloned())
    }

    fn add_worker(&self, name: String, specialties: BTreeSet<Specialty>) -> Result<Worker, BackendError> {
        let worker = Worker {
            id: Uuid::new_v4(),
            name,
            specialties,
        };
        self.bookings()?.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    fn services(&self) -> Result<Vec<Service>, BackendError> {
        let mut services: Vec<Service> = self.bookings()?.services.values().cloned().collect();
        services.sort_by_key(|service| (service.kind, service.duration_minutes));
        Ok(services)
    }

    fn service(&self, id: Uuid) -> Result<Option<Service>, BackendError> {
        Ok(self.bookings()?.services.get(&id).cloned())
    }

    fn add_service(&self, kind: Specialty, duration_minutes: u32) -> Result<Service, BackendError> {
        if duration_minutes < Service::MIN_DURATION_MINUTES {
            return Err(BackendError::InvalidInput(format!(
                "Service duration must be at least {} minutes",
                Service::MIN_DURATION_MINUTES
            )));
        }

        let mut bookings = self.bookings()?;
        let exists = bookings
            .services
            .values()
            .any(|service| service.kind == kind && service.duration_minutes == duration_minutes);
        if exists {
            return Err(BackendError::Duplicate);
        }

        let service = Service {
            id: Uuid::new_v4(),
            kind,
            duration_minutes,
        };
        bookings.services.insert(service.id, service.clone());
        Ok(service)
    }

    fn availabilities(
        &self,
        worker_id: Uuid,
        day_of_week: Option<Weekday>,
    ) -> Result<Vec<Availability>, BackendError> {
        let mut availabilities: Vec<Availability> = self
            .bookings()?
            .availabilities
            .values()
            .filter(|availability| availability.worker_id == worker_id)
            .filter(|availability| day_of_week.map_or(true, |day| availability.day_of_week == day))
            .cloned()
            .collect();
        availabilities.sort_by_key(|availability| {
            (
                availability.day_of_week.num_days_from_monday(),
                availability.start_time,
            )
        });
        Ok(availabilities)
    }

    fn add_availability(
        &self,
        worker_id: Uuid,
        day_of_week: Weekday,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Availability, BackendError> {
        if start_time >= end_time {
            return Err(BackendError::InvalidInput(
                "Availability must start before it ends".into(),
            ));
        }

        let mut bookings = self.bookings()?;
        if !bookings.workers.contains_key(&worker_id) {
            return Err(BackendError::NotFound);
        }

        let availability = Availability {
            id: Uuid::new_v4(),
            worker_id,
            day_of_week,
            start_time,
            end_time,
        };
        bookings
            .availabilities
            .insert(availability.id, availability.clone());
        Ok(availability)
    }

    fn remove_availability(&self, id: Uuid) -> Result<(), BackendError> {
        match self.bookings()?.availabilities.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound),
        }
    }

    fn appointment(&self, id: Uuid) -> Result<Option<Appointment>, BackendError> {
        Ok(self.bookings()?.appointments.get(&id).cloned())
    }

    fn active_appointments(
        &self,
        worker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError> {
        let mut appointments: Vec<Appointment> = self
            .bookings()?
            .appointments
            .values()
            .filter(|appointment| appointment.worker_id == worker_id)
            .filter(|appointment| appointment.status.is_blocking())
            .filter(|appointment| {
                intervals_overlap(from, to, appointment.starts_at, appointment.ends_at)
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.starts_at);
        Ok(appointments)
    }

    fn user_appointments(&self, user_id: Uuid) -> Result<Vec<Appointment>, BackendError> {
        let mut appointments: Vec<Appointment> = self
            .bookings()?
            .appointments
            .values()
            .filter(|appointment| appointment.is_owned_by(user_id))
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.starts_at);
        Ok(appointments)
    }

    fn appointments_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError> {
        let mut appointments: Vec<Appointment> = self
            .bookings()?
            .appointments
            .values()
            .filter(|appointment| appointment.starts_at >= from && appointment.starts_at < to)
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| (appointment.starts_at, appointment.worker_id));
        Ok(appointments)
    }

    fn book_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, BackendError> {
        // Check and insert under one lock so concurrent bookings serialize.
        let mut bookings = self.bookings()?;

        if let Some(existing) = find_conflict(
            draft.starts_at,
            draft.ends_at,
            draft.worker_id,
            bookings.appointments.values(),
        ) {
            debug!(appointment = %existing.id, worker = %draft.worker_id, "Slot already taken");
            return Err(BackendError::SlotTaken);
        }

        let appointment = draft.into_appointment(Uuid::new_v4());
        bookings
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    fn reschedule_appointment(
        &self,
        id: Uuid,
        worker_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Appointment, BackendError> {
        let mut bookings = self.bookings()?;
        let active = bookings
            .appointments
            .get(&id)
            .is_some_and(|appointment| appointment.status.is_blocking());
        if !active || !bookings.workers.contains_key(&worker_id) {
            return Err(BackendError::NotFound);
        }

        let others = bookings
            .appointments
            .values()
            .filter(|appointment| appointment.id != id);
        if let Some(existing) = find_conflict(starts_at, ends_at, worker_id, others) {
            debug!(appointment = %existing.id, worker = %worker_id, "Slot already taken");
            return Err(BackendError::SlotTaken);
        }

        let appointment = bookings.appointments.get_mut(&id).ok_or(BackendError::NotFound)?;
        appointment.worker_id = worker_id;
        appointment.starts_at = starts_at;
        appointment.ends_at = ends_at;
        Ok(appointment.clone())
    }

    fn set_appointment_status(&self, id: Uuid, status: AppointmentStatus) -> Result<(), BackendError> {
        match self.bookings()?.appointments.get_mut(&id) {
            Some(appointment) => {
                appointment.status = status;
                Ok(())
            }
            None => Err(BackendError::NotFound),
        }
    }

    fn complete_finished_appointments(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let mut bookings = self.bookings()?;
        let mut completed = 0;
        for appointment in bookings.appointments.values_mut() {
            if appointment.status.is_blocking() && appointment.ends_at <= now {
                appointment.status = AppointmentStatus::Completed;
                completed += 1;
            }
        }
        Ok(completed)
    }
}
