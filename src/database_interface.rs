use crate::{
    backend::BookingBackend,
    conflict::find_conflict,
    error::BackendError,
    schema::{appointments, availabilities, services, worker_specialties, workers},
    types::{
        Appointment, AppointmentDraft, AppointmentStatus, Availability, GuestContact, Requester,
        Service, Specialty, Worker, BLOCKING_STATUSES,
    },
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use diesel::{
    prelude::*,
    result::{ConnectionError, DatabaseErrorKind, Error as DieselError},
    sql_types::Text,
};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, error};
use uuid::Uuid;

const NO_OVERLAP_CONSTRAINT: &str = "appointments_no_overlap";

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = workers)]
struct WorkerRow {
    id: Uuid,
    name: String,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = worker_specialties)]
struct SpecialtyRow {
    worker_id: Uuid,
    specialty: String,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = services)]
struct ServiceRow {
    id: Uuid,
    kind: String,
    duration_minutes: i32,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = availabilities)]
struct AvailabilityRow {
    id: Uuid,
    worker_id: Uuid,
    day_of_week: i16,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = appointments)]
struct AppointmentRow {
    id: Uuid,
    worker_id: Uuid,
    service_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: String,
    user_id: Option<Uuid>,
    guest_first_name: Option<String>,
    guest_last_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
}

fn worker_from_rows(row: WorkerRow, specialties: &[SpecialtyRow]) -> Result<Worker, BackendError> {
    let specialties = specialties
        .iter()
        .filter(|specialty| specialty.worker_id == row.id)
        .map(|specialty| specialty.specialty.parse::<Specialty>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(BackendError::Corrupt)?;
    Ok(Worker {
        id: row.id,
        name: row.name,
        specialties,
    })
}

impl TryFrom<ServiceRow> for Service {
    type Error = BackendError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(Service {
            id: row.id,
            kind: row.kind.parse().map_err(BackendError::Corrupt)?,
            duration_minutes: u32::try_from(row.duration_minutes)
                .map_err(|_| BackendError::Corrupt(format!("Negative duration in service {}", row.id)))?,
        })
    }
}

impl TryFrom<AvailabilityRow> for Availability {
    type Error = BackendError;

    fn try_from(row: AvailabilityRow) -> Result<Self, Self::Error> {
        let day_of_week = u8::try_from(row.day_of_week)
            .ok()
            .and_then(|day| Weekday::try_from(day).ok())
            .ok_or_else(|| BackendError::Corrupt(format!("Invalid day of week {}", row.day_of_week)))?;
        Ok(Availability {
            id: row.id,
            worker_id: row.worker_id,
            day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = BackendError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let requester = match (row.user_id, row.guest_first_name, row.guest_email, row.guest_phone) {
            (Some(user_id), _, _, _) => Requester::Identified { user_id },
            (None, Some(first_name), Some(email), Some(phone)) => Requester::Guest(GuestContact {
                first_name,
                last_name: row.guest_last_name,
                email,
                phone,
            }),
            _ => {
                return Err(BackendError::Corrupt(format!(
                    "Appointment {} has neither an owner nor a guest contact",
                    row.id
                )))
            }
        };
        Ok(Appointment {
            id: row.id,
            worker_id: row.worker_id,
            service_id: row.service_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            status: row.status.parse().map_err(BackendError::Corrupt)?,
            requester,
        })
    }
}

impl From<&Appointment> for AppointmentRow {
    fn from(appointment: &Appointment) -> Self {
        let guest = match &appointment.requester {
            Requester::Guest(guest) => Some(guest),
            Requester::Identified { .. } => None,
        };
        AppointmentRow {
            id: appointment.id,
            worker_id: appointment.worker_id,
            service_id: appointment.service_id,
            starts_at: appointment.starts_at,
            ends_at: appointment.ends_at,
            status: appointment.status.as_str().into(),
            user_id: appointment.requester.user_id(),
            guest_first_name: guest.map(|guest| guest.first_name.clone()),
            guest_last_name: guest.and_then(|guest| guest.last_name.clone()),
            guest_email: guest.map(|guest| guest.email.clone()),
            guest_phone: guest.map(|guest| guest.phone.clone()),
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, BackendError>
where
    T: TryFrom<R, Error = BackendError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Translates constraint violations into the backend's domain errors.
fn map_write_error(err: DieselError) -> BackendError {
    match &err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => BackendError::Duplicate,
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => BackendError::NotFound,
        DieselError::DatabaseError(_, info) if info.constraint_name() == Some(NO_OVERLAP_CONSTRAINT) => {
            BackendError::SlotTaken
        }
        _ => BackendError::Database(err),
    }
}

fn blocking_codes() -> Vec<&'static str> {
    BLOCKING_STATUSES.iter().map(AppointmentStatus::as_str).collect()
}

fn load_active_appointments(
    connection: &mut PgConnection,
    worker_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Appointment>, BackendError> {
    let rows = appointments::table
        .filter(appointments::worker_id.eq(worker_id))
        .filter(appointments::status.eq_any(blocking_codes()))
        .filter(appointments::starts_at.lt(to))
        .filter(appointments::ends_at.gt(from))
        .order(appointments::starts_at.asc())
        .select(AppointmentRow::as_select())
        .load(connection)?;
    collect(rows)
}

#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BackendError> {
        self.connection.lock().map_err(|_| {
            error!("Database connection lock poisoned");
            BackendError::Unavailable("database connection lock poisoned".into())
        })
    }

    #[cfg(test)]
    fn clear(&self) {
        let mut connection = self.connection().unwrap();
        diesel::delete(appointments::table).execute(&mut *connection).unwrap();
        diesel::delete(availabilities::table).execute(&mut *connection).unwrap();
        diesel::delete(services::table).execute(&mut *connection).unwrap();
        diesel::delete(worker_specialties::table).execute(&mut *connection).unwrap();
        diesel::delete(workers::table).execute(&mut *connection).unwrap();
    }
}

impl BookingBackend for DatabaseInterface {
    fn workers(&self) -> Result<Vec<Worker>, BackendError> {
        let mut connection = self.connection()?;
        let rows = workers::table
            .order(workers::id.asc())
            .select(WorkerRow::as_select())
            .load(&mut *connection)?;
        let specialties = worker_specialties::table
            .select(SpecialtyRow::as_select())
            .load(&mut *connection)?;

        rows.into_iter()
            .map(|row| worker_from_rows(row, &specialties))
            .collect()
    }

    fn worker(&self, id: Uuid) -> Result<Option<Worker>, BackendError> {
        let mut connection = self.connection()?;
        let Some(row) = workers::table
            .find(id)
            .select(WorkerRow::as_select())
            .first(&mut *connection)
            .optional()?
        else {
            return Ok(None);
        };
        let specialties = worker_specialties::table
            .filter(worker_specialties::worker_id.eq(id))
            .select(SpecialtyRow::as_select())
            .load(&mut *connection)?;
        worker_from_rows(row, &specialties).map(Some)
    }

    fn add_worker(&self, name: String, specialties: BTreeSet<Specialty>) -> Result<Worker, BackendError> {
        let mut connection = self.connection()?;
        let worker = Worker {
            id: Uuid::new_v4(),
            name,
            specialties,
        };

        connection.transaction::<_, BackendError, _>(|connection| {
            diesel::insert_into(workers::table)
                .values(WorkerRow {
                    id: worker.id,
                    name: worker.name.clone(),
                })
                .execute(connection)
                .map_err(map_write_error)?;

            let specialty_rows: Vec<SpecialtyRow> = worker
                .specialties
                .iter()
                .map(|specialty| SpecialtyRow {
                    worker_id: worker.id,
                    specialty: specialty.as_str().into(),
                })
                .collect();
            if !specialty_rows.is_empty() {
                diesel::insert_into(worker_specialties::table)
                    .values(&specialty_rows)
                    .execute(connection)
                    .map_err(map_write_error)?;
            }
            Ok(())
        })?;

        Ok(worker)
    }

    fn services(&self) -> Result<Vec<Service>, BackendError> {
        let mut connection = self.connection()?;
        let rows = services::table
            .order((services::kind.asc(), services::duration_minutes.asc()))
            .select(ServiceRow::as_select())
            .load(&mut *connection)?;
        collect(rows)
    }

    fn service(&self, id: Uuid) -> Result<Option<Service>, BackendError> {
        let mut connection = self.connection()?;
        services::table
            .find(id)
            .select(ServiceRow::as_select())
            .first(&mut *connection)
            .optional()?
            .map(Service::try_from)
            .transpose()
    }

    fn add_service(&self, kind: Specialty, duration_minutes: u32) -> Result<Service, BackendError> {
        if duration_minutes < Service::MIN_DURATION_MINUTES {
            return Err(BackendError::InvalidInput(format!(
                "Service duration must be at least {} minutes",
                Service::MIN_DURATION_MINUTES
            )));
        }
        let duration = i32::try_from(duration_minutes)
            .map_err(|_| BackendError::InvalidInput("Service duration is too long".into()))?;

        let mut connection = self.connection()?;
        let row = ServiceRow {
            id: Uuid::new_v4(),
            kind: kind.as_str().into(),
            duration_minutes: duration,
        };
        diesel::insert_into(services::table)
            .values(&row)
            .execute(&mut *connection)
            .map_err(map_write_error)?;
        Service::try_from(row)
    }

    fn availabilities(
        &self,
        worker_id: Uuid,
        day_of_week: Option<Weekday>,
    ) -> Result<Vec<Availability>, BackendError> {
        let mut connection = self.connection()?;
        let mut query = availabilities::table
            .filter(availabilities::worker_id.eq(worker_id))
            .into_boxed();
        if let Some(day) = day_of_week {
            query = query.filter(availabilities::day_of_week.eq(day.num_days_from_monday() as i16));
        }
        let rows = query
            .order((availabilities::day_of_week.asc(), availabilities::start_time.asc()))
            .select(AvailabilityRow::as_select())
            .load(&mut *connection)?;
        collect(rows)
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

        let mut connection = self.connection()?;
        let row = AvailabilityRow {
            id: Uuid::new_v4(),
            worker_id,
            day_of_week: day_of_week.num_days_from_monday() as i16,
            start_time,
            end_time,
        };
        diesel::insert_into(availabilities::table)
            .values(&row)
            .execute(&mut *connection)
            .map_err(map_write_error)?;
        Availability::try_from(row)
    }

    fn remove_availability(&self, id: Uuid) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        match diesel::delete(availabilities::table.find(id)).execute(&mut *connection)? {
            0 => Err(BackendError::NotFound),
            _ => Ok(()),
        }
    }

    fn appointment(&self, id: Uuid) -> Result<Option<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        appointments::table
            .find(id)
            .select(AppointmentRow::as_select())
            .first(&mut *connection)
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    fn active_appointments(
        &self,
        worker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        load_active_appointments(&mut connection, worker_id, from, to)
    }

    fn user_appointments(&self, user_id: Uuid) -> Result<Vec<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        let rows = appointments::table
            .filter(appointments::user_id.eq(user_id))
            .order(appointments::starts_at.asc())
            .select(AppointmentRow::as_select())
            .load(&mut *connection)?;
        collect(rows)
    }

    fn appointments_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        let rows = appointments::table
            .filter(appointments::starts_at.ge(from))
            .filter(appointments::starts_at.lt(to))
            .order((appointments::starts_at.asc(), appointments::worker_id.asc()))
            .select(AppointmentRow::as_select())
            .load(&mut *connection)?;
        collect(rows)
    }

    fn book_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;

        connection.transaction::<_, BackendError, _>(|connection| {
            // Serializes bookings per worker across processes until commit.
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(draft.worker_id.to_string())
                .execute(connection)?;

            let existing =
                load_active_appointments(connection, draft.worker_id, draft.starts_at, draft.ends_at)?;
            if let Some(taken) = find_conflict(draft.starts_at, draft.ends_at, draft.worker_id, &existing) {
                debug!(appointment = %taken.id, worker = %draft.worker_id, "Slot already taken");
                return Err(BackendError::SlotTaken);
            }

            let appointment = draft.into_appointment(Uuid::new_v4());
            diesel::insert_into(appointments::table)
                .values(AppointmentRow::from(&appointment))
                .execute(connection)
                .map_err(map_write_error)?;
            Ok(appointment)
        })
    }

    fn reschedule_appointment(
        &self,
        id: Uuid,
        worker_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;

        connection.transaction::<_, BackendError, _>(|connection| {
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(worker_id.to_string())
                .execute(connection)?;

            let mut appointment: Appointment = appointments::table
                .find(id)
                .select(AppointmentRow::as_select())
                .for_update()
                .first::<AppointmentRow>(connection)
                .optional()?
                .ok_or(BackendError::NotFound)?
                .try_into()?;
            if !appointment.status.is_blocking() {
                return Err(BackendError::NotFound);
            }

            let existing = load_active_appointments(connection, worker_id, starts_at, ends_at)?;
            let others = existing.iter().filter(|other| other.id != id);
            if let Some(taken) = find_conflict(starts_at, ends_at, worker_id, others) {
                debug!(appointment = %taken.id, worker = %worker_id, "Slot already taken");
                return Err(BackendError::SlotTaken);
            }

            diesel::update(appointments::table.find(id))
                .set((
                    appointments::worker_id.eq(worker_id),
                    appointments::starts_at.eq(starts_at),
                    appointments::ends_at.eq(ends_at),
                ))
                .execute(connection)
                .map_err(map_write_error)?;
            appointment.worker_id = worker_id;
            appointment.starts_at = starts_at;
            appointment.ends_at = ends_at;
            Ok(appointment)
        })
    }

    fn set_appointment_status(&self, id: Uuid, status: AppointmentStatus) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let updated = diesel::update(appointments::table.find(id))
            .set(appointments::status.eq(status.as_str()))
            .execute(&mut *connection)
            .map_err(map_write_error)?;
        match updated {
            0 => Err(BackendError::NotFound),
            _ => Ok(()),
        }
    }

    fn complete_finished_appointments(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let mut connection = self.connection()?;
        let completed = diesel::update(
            appointments::table
                .filter(appointments::status.eq_any(blocking_codes()))
                .filter(appointments::ends_at.le(now)),
        )
        .set(appointments::status.eq(AppointmentStatus::Completed.as_str()))
        .execute(&mut *connection)?;
        Ok(completed)
    }
}
