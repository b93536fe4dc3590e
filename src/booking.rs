//! Booking validation, placement and cancellation.
//!
//! Validation collects every applicable error instead of stopping at the first
//! one. The overlap rule is the exception: it only runs once the start time,
//! the horizon and the worker reference are known to be valid. The backend
//! repeats the overlap check atomically with the insert, so a slot taken by a
//! concurrent request after validation is still rejected.

use crate::{
    backend::BookingBackend,
    cancellation::can_cancel,
    configuration::BookingPolicy,
    conflict,
    error::{BackendError, FieldError},
    identity::Identity,
    notification::ContactInfo,
    types::{
        is_qualified, Appointment, AppointmentDraft, AppointmentStatus, GuestContact, Requester, Service,
        Worker,
    },
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

pub const REQUIRED: &str = "This field is required.";
pub const FIRST_NAME_REQUIRED: &str = "First name is required.";
pub const EMAIL_REQUIRED: &str = "Email is required.";
pub const PHONE_REQUIRED: &str = "Phone is required.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const INVALID_PHONE: &str =
    "Phone must have the format '+[country code] [number]', e.g. +34 600111222.";
pub const INVALID_DATE: &str = "Enter a valid date (YYYY-MM-DD).";
pub const INVALID_TIME: &str = "Enter a valid time (HH:MM).";
pub const INVALID_SERVICE: &str = "Select a valid service.";
pub const IN_THE_PAST: &str = "You cannot book in the past.";
pub const NONEXISTENT_TIME: &str = "The selected time does not exist in the business timezone.";
pub const INVALID_WORKER: &str = "The selected worker is not valid.";
pub const WORKER_NOT_QUALIFIED: &str = "The selected worker does not offer this service.";
pub const SLOT_TAKEN: &str =
    "This time slot is already booked or overlaps with another appointment.";

lazy_static! {
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+\d{1,5} \d{1,15}$").unwrap();
}

fn horizon_exceeded(policy: &BookingPolicy) -> String {
    format!(
        "Bookings are only allowed up to {} days in advance.",
        policy.horizon_days
    )
}

/// Raw booking request as submitted by the client.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BookingForm {
    pub service_id: Option<String>,
    pub worker_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    /// Book as a guest even when signed in.
    #[serde(default)]
    pub as_guest: bool,
    #[validate(length(max = 100, message = "Ensure this value has at most 100 characters."))]
    pub guest_first_name: Option<String>,
    #[validate(length(max = 100, message = "Ensure this value has at most 100 characters."))]
    pub guest_last_name: Option<String>,
    #[validate(email(code = "invalid_email"))]
    pub guest_email: Option<String>,
    #[validate(regex(path = *PHONE_REGEX, code = "invalid_phone"))]
    pub guest_phone: Option<String>,
}

impl BookingForm {
    /// Trims every text field and treats blank values as absent.
    fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        }

        Self {
            service_id: clean(self.service_id),
            worker_id: clean(self.worker_id),
            date: clean(self.date),
            time: clean(self.time),
            as_guest: self.as_guest,
            guest_first_name: clean(self.guest_first_name),
            guest_last_name: clean(self.guest_last_name),
            guest_email: clean(self.guest_email),
            guest_phone: clean(self.guest_phone),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking request is invalid")]
    Invalid(Vec<FieldError>),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment starts too soon to be cancelled")]
    TooLate,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A booking that passed every rule, together with what a confirmation needs.
#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub draft: AppointmentDraft,
    pub worker: Worker,
    pub service: Service,
    pub contact: ContactInfo,
}

#[derive(Debug, Clone)]
pub struct PlacedBooking {
    pub appointment: Appointment,
    pub worker: Worker,
    pub service: Service,
    pub contact: ContactInfo,
}

pub fn validation_field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| FieldError {
                field: Some(field.to_string()),
                message: match (&error.message, &*error.code) {
                    (Some(message), _) => message.to_string(),
                    (None, "invalid_email") => INVALID_EMAIL.to_string(),
                    (None, "invalid_phone") => INVALID_PHONE.to_string(),
                    (None, code) => code.to_string(),
                },
            })
        })
        .collect()
}

fn required<'a>(value: &'a Option<String>, field: &str, message: &str, errors: &mut Vec<FieldError>) -> Option<&'a str> {
    if value.is_none() {
        errors.push(FieldError::field(field, message));
    }
    value.as_deref()
}

fn parse_uuid(value: &Option<String>, field: &str, invalid: &str, errors: &mut Vec<FieldError>) -> Option<Uuid> {
    let value = required(value, field, REQUIRED, errors)?;
    match Uuid::parse_str(value) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(FieldError::field(field, invalid));
            None
        }
    }
}

fn parse_date(value: &Option<String>, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
    let value = required(value, "date", REQUIRED, errors)?;
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(FieldError::field("date", INVALID_DATE));
            None
        }
    }
}

fn parse_time(value: &Option<String>, errors: &mut Vec<FieldError>) -> Option<NaiveTime> {
    let value = required(value, "time", REQUIRED, errors)?;
    match NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
    {
        Ok(time) => Some(time),
        Err(_) => {
            errors.push(FieldError::field("time", INVALID_TIME));
            None
        }
    }
}

/// Runs every booking rule against `form` and returns a draft ready to be persisted.
pub fn validate_booking<B: BookingBackend>(
    backend: &B,
    form: BookingForm,
    identity: &Identity,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<ValidatedBooking, BookingError> {
    let form = form.normalized();
    let mut errors = match form.validate() {
        Ok(()) => Vec::new(),
        Err(validation) => validation_field_errors(&validation),
    };

    let service_id = parse_uuid(&form.service_id, "service_id", INVALID_SERVICE, &mut errors);
    let worker_id = parse_uuid(&form.worker_id, "worker_id", INVALID_WORKER, &mut errors);
    let date = parse_date(&form.date, &mut errors);
    let time = parse_time(&form.time, &mut errors);

    // Signed-in callers book for themselves unless they explicitly book as a guest.
    let guest = if identity.is_authenticated() && !form.as_guest {
        None
    } else {
        let first_name = required(&form.guest_first_name, "guest_first_name", FIRST_NAME_REQUIRED, &mut errors);
        let email = required(&form.guest_email, "guest_email", EMAIL_REQUIRED, &mut errors);
        let phone = required(&form.guest_phone, "guest_phone", PHONE_REQUIRED, &mut errors);
        match (first_name, email, phone) {
            (Some(first_name), Some(email), Some(phone)) => Some(Some(GuestContact {
                first_name: first_name.into(),
                last_name: form.guest_last_name.clone(),
                email: email.into(),
                phone: phone.into(),
            })),
            _ => Some(None),
        }
    };

    let service = match service_id {
        Some(id) => {
            let service = backend.service(id)?;
            if service.is_none() {
                errors.push(FieldError::field("service_id", INVALID_SERVICE));
            }
            service
        }
        None => None,
    };

    let mut schedulable = true;

    let starts_at = match (date, time) {
        (Some(date), Some(time)) => {
            match policy.timezone.from_local_datetime(&date.and_time(time)).earliest() {
                Some(local) => Some(local.with_timezone(&Utc)),
                None => {
                    errors.push(FieldError::form(NONEXISTENT_TIME));
                    None
                }
            }
        }
        _ => None,
    };
    match starts_at {
        Some(starts_at) if starts_at <= now => {
            errors.push(FieldError::form(IN_THE_PAST));
            schedulable = false;
        }
        Some(starts_at) if starts_at > now + policy.horizon() => {
            errors.push(FieldError::form(&horizon_exceeded(policy)));
            schedulable = false;
        }
        Some(_) => {}
        None => schedulable = false,
    }

    let worker = match worker_id {
        Some(id) => {
            let worker = backend.worker(id)?;
            if worker.is_none() {
                errors.push(FieldError::form(INVALID_WORKER));
                schedulable = false;
            }
            worker
        }
        None => {
            schedulable = false;
            None
        }
    };

    if let (Some(worker), Some(service)) = (&worker, &service) {
        if !is_qualified(worker, service) {
            errors.push(FieldError::form(WORKER_NOT_QUALIFIED));
        }
    }

    if let (true, Some(starts_at), Some(worker), Some(service)) = (schedulable, starts_at, &worker, &service) {
        if conflict::overlaps(backend, starts_at, starts_at + service.duration(), worker.id)? {
            errors.push(FieldError::form(SLOT_TAKEN));
        }
    }

    match (errors.is_empty(), starts_at, worker, service, guest) {
        (true, Some(starts_at), Some(worker), Some(service), guest) => {
            let (requester, status, contact) = match (guest, &identity.user) {
                (Some(Some(guest)), _) => {
                    let contact = ContactInfo {
                        first_name: guest.first_name.clone(),
                        email: Some(guest.email.clone()),
                        phone: Some(guest.phone.clone()),
                    };
                    (Requester::Guest(guest), AppointmentStatus::Confirmed, contact)
                }
                (None, Some(user)) => {
                    let contact = ContactInfo {
                        first_name: user.first_name.clone().unwrap_or_default(),
                        email: user.email.clone(),
                        phone: user.phone.clone(),
                    };
                    (
                        Requester::Identified { user_id: user.id },
                        AppointmentStatus::Pending,
                        contact,
                    )
                }
                _ => return Err(BookingError::Invalid(vec![FieldError::form(REQUIRED)])),
            };

            let draft = AppointmentDraft {
                worker_id: worker.id,
                service_id: service.id,
                starts_at,
                ends_at: starts_at + service.duration(),
                status,
                requester,
            };
            Ok(ValidatedBooking {
                draft,
                worker,
                service,
                contact,
            })
        }
        _ => Err(BookingError::Invalid(errors)),
    }
}

/// Validates `form` and persists the appointment. A slot taken between
/// validation and insert is reported like any other overlap.
pub fn place_booking<B: BookingBackend>(
    backend: &B,
    form: BookingForm,
    identity: &Identity,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<PlacedBooking, BookingError> {
    let validated = validate_booking(backend, form, identity, policy, now)?;

    let appointment = match backend.book_appointment(validated.draft) {
        Ok(appointment) => appointment,
        Err(BackendError::SlotTaken) => {
            warn!(worker = %validated.worker.id, "Slot taken by a concurrent booking");
            return Err(BookingError::Invalid(vec![FieldError::form(SLOT_TAKEN)]));
        }
        Err(err) => return Err(err.into()),
    };
    info!(
        appointment = %appointment.id,
        worker = %appointment.worker_id,
        starts_at = %appointment.starts_at,
        status = %appointment.status,
        "Appointment booked"
    );

    Ok(PlacedBooking {
        appointment,
        worker: validated.worker,
        service: validated.service,
        contact: validated.contact,
    })
}

/// Cancels an appointment on behalf of its owner, honouring the notice period.
pub fn cancel_appointment<B: BookingBackend>(
    backend: &B,
    id: Uuid,
    identity: &Identity,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<(), CancelError> {
    let user_id = identity.user_id().ok_or(CancelError::NotFound)?;
    let appointment = backend
        .appointment(id)?
        .filter(|appointment| appointment.is_owned_by(user_id))
        .filter(|appointment| appointment.status.is_blocking())
        .ok_or(CancelError::NotFound)?;

    if !can_cancel(&appointment, now, policy.cancellation_notice) {
        return Err(CancelError::TooLate);
    }

    backend.set_appointment_status(id, AppointmentStatus::Cancelled)?;
    info!(appointment = %id, "Appointment cancelled by owner");
    Ok(())
}

/// Staff request to move an appointment. Without `worker_id` the current worker is kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RescheduleForm {
    pub date: Option<String>,
    pub time: Option<String>,
    pub worker_id: Option<String>,
}

/// Moves an active appointment to a new local date and time, keeping its length.
///
/// Staff may reschedule beyond the booking horizon, but not into the past. The overlap
/// check ignores the appointment being moved and runs atomically in the backend.
pub fn reschedule_booking<B: BookingBackend>(
    backend: &B,
    id: Uuid,
    form: RescheduleForm,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<Appointment, BookingError> {
    let appointment = backend
        .appointment(id)?
        .filter(|appointment| appointment.status.is_blocking())
        .ok_or(BackendError::NotFound)?;

    let mut errors = Vec::new();
    let date = parse_date(&form.date, &mut errors);
    let time = parse_time(&form.time, &mut errors);
    let worker_id = match form.worker_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(_) => parse_uuid(&form.worker_id, "worker_id", INVALID_WORKER, &mut errors),
        None => Some(appointment.worker_id),
    };

    let starts_at = match (date, time) {
        (Some(date), Some(time)) => {
            match policy.timezone.from_local_datetime(&date.and_time(time)).earliest() {
                Some(local) => Some(local.with_timezone(&Utc)),
                None => {
                    errors.push(FieldError::form(NONEXISTENT_TIME));
                    None
                }
            }
        }
        _ => None,
    };
    if matches!(starts_at, Some(starts_at) if starts_at <= now) {
        errors.push(FieldError::form(IN_THE_PAST));
    }

    let worker = match worker_id {
        Some(id) => {
            let worker = backend.worker(id)?;
            if worker.is_none() {
                errors.push(FieldError::form(INVALID_WORKER));
            }
            worker
        }
        None => None,
    };
    if let Some(worker) = &worker {
        if let Some(service) = backend.service(appointment.service_id)? {
            if !is_qualified(worker, &service) {
                errors.push(FieldError::form(WORKER_NOT_QUALIFIED));
            }
        }
    }

    let (true, Some(starts_at), Some(worker)) = (errors.is_empty(), starts_at, worker) else {
        return Err(BookingError::Invalid(errors));
    };
    let ends_at = starts_at + (appointment.ends_at - appointment.starts_at);

    match backend.reschedule_appointment(id, worker.id, starts_at, ends_at) {
        Ok(moved) => {
            info!(
                appointment = %id,
                worker = %moved.worker_id,
                starts_at = %moved.starts_at,
                "Appointment rescheduled"
            );
            Ok(moved)
        }
        Err(BackendError::SlotTaken) => Err(BookingError::Invalid(vec![FieldError::form(SLOT_TAKEN)])),
        Err(err) => Err(err.into()),
    }
}

/// Every worker with their PENDING, CONFIRMED and COMPLETED appointments starting on the
/// local `date`, ordered by start time.
pub fn daily_schedule<B: BookingBackend>(
    backend: &B,
    date: NaiveDate,
    policy: &BookingPolicy,
) -> Result<Vec<(Worker, Vec<Appointment>)>, BackendError> {
    // Wide enough to cover the local day under any UTC offset.
    let from = (date - chrono::Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    let to = (date + chrono::Duration::days(2)).and_time(NaiveTime::MIN).and_utc();
    let appointments: Vec<_> = backend
        .appointments_starting_between(from, to)?
        .into_iter()
        .filter(|appointment| appointment.status != AppointmentStatus::Cancelled)
        .filter(|appointment| appointment.starts_at.with_timezone(&policy.timezone).date_naive() == date)
        .collect();

    Ok(backend
        .workers()?
        .into_iter()
        .map(|worker| {
            let mut own: Vec<_> = appointments
                .iter()
                .filter(|appointment| appointment.worker_id == worker.id)
                .cloned()
                .collect();
            own.sort_by_key(|appointment| appointment.starts_at);
            (worker, own)
        })
        .collect())
}

/// Active appointments of the user that have not started yet, soonest first.
pub fn upcoming_appointments<B: BookingBackend>(
    backend: &B,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Appointment>, BackendError> {
    let mut appointments: Vec<_> = backend
        .user_appointments(user_id)?
        .into_iter()
        .filter(|appointment| appointment.status.is_blocking() && appointment.starts_at >= now)
        .collect();
    appointments.sort_by_key(|appointment| appointment.starts_at);
    Ok(appointments)
}

/// Completed appointments of the user, most recent first.
pub fn appointment_history<B: BookingBackend>(
    backend: &B,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Appointment>, BackendError> {
    let mut appointments: Vec<_> = backend
        .user_appointments(user_id)?
        .into_iter()
        .filter(|appointment| {
            appointment.status == AppointmentStatus::Completed && appointment.starts_at < now
        })
        .collect();
    appointments.sort_by_key(|appointment| std::cmp::Reverse(appointment.starts_at));
    Ok(appointments)
}
