use crate::{
    backend::BookingBackend,
    booking::{
        appointment_history, cancel_appointment, daily_schedule, place_booking, reschedule_booking,
        upcoming_appointments, validation_field_errors, BookingError, BookingForm, CancelError,
        RescheduleForm,
    },
    clock::Clock,
    configuration::Configuration,
    error::{AppError, AppResult, BackendError},
    identity::Identity,
    notification::{dispatch_confirmation, Confirmation, Notifier},
    slot_generator::generate_slots,
    types::{Appointment, AppointmentStatus, Availability, Service, Specialty, Worker},
};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

#[derive(Clone)]
pub struct AppState<B, C> {
    pub backend: B,
    pub configuration: C,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Deserialize)]
struct SlotQuery {
    service_id: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotView {
    time: String,
    worker_id: Uuid,
    worker_name: String,
}

#[derive(Debug, Serialize)]
struct ServiceView {
    id: Uuid,
    kind: Specialty,
    name: String,
    duration_minutes: u32,
}

impl From<Service> for ServiceView {
    fn from(service: Service) -> Self {
        Self {
            id: service.id,
            kind: service.kind,
            name: service.display_name(),
            duration_minutes: service.duration_minutes,
        }
    }
}

#[derive(Debug, Serialize)]
struct AppointmentView {
    id: Uuid,
    service: String,
    worker_id: Uuid,
    worker_name: String,
    date: String,
    time: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: AppointmentStatus,
    guest: bool,
}

#[derive(Debug, Serialize)]
struct WorkerScheduleView {
    worker_id: Uuid,
    worker_name: String,
    appointments: Vec<AppointmentView>,
}

#[derive(Debug, Serialize)]
struct ScheduleView {
    date: String,
    workers: Vec<WorkerScheduleView>,
}

#[derive(Debug, Serialize)]
struct AvailabilityView {
    id: Uuid,
    worker_id: Uuid,
    day_of_week: u32,
    start_time: String,
    end_time: String,
}

impl From<Availability> for AvailabilityView {
    fn from(availability: Availability) -> Self {
        Self {
            id: availability.id,
            worker_id: availability.worker_id,
            day_of_week: availability.day_of_week.num_days_from_monday(),
            start_time: availability.start_time.format("%H:%M").to_string(),
            end_time: availability.end_time.format("%H:%M").to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
struct AddWorkerRequest {
    #[validate(length(min = 1, max = 100, message = "Name must have between 1 and 100 characters."))]
    name: String,
    #[serde(default)]
    specialties: Vec<Specialty>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
struct AddServiceRequest {
    kind: Specialty,
    #[validate(range(min = 15, message = "Service duration must be at least 15 minutes."))]
    duration_minutes: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
struct AddAvailabilityRequest {
    worker_id: Uuid,
    /// 0 is Monday.
    #[validate(range(max = 6, message = "Day of week must be between 0 (Monday) and 6 (Sunday)."))]
    day_of_week: u8,
    start_time: String,
    end_time: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoveAvailabilityRequest {
    id: Uuid,
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Invalid(errors) => AppError::Validation(errors),
            BookingError::Backend(err) => AppError::Backend(err),
        }
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::NotFound => AppError::NotFound("appointment".into()),
            CancelError::TooLate => AppError::TooLate,
            CancelError::Backend(err) => AppError::Backend(err),
        }
    }
}

fn validate<T: Validate>(request: &T) -> AppResult<()> {
    request
        .validate()
        .map_err(|errors| AppError::Validation(validation_field_errors(&errors)))
}

fn parse_time_of_day(value: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| AppError::BadRequest(format!("Invalid time of day: {value}")))
}

fn appointment_view<B: BookingBackend>(
    backend: &B,
    appointment: Appointment,
    tz: Tz,
) -> Result<AppointmentView, BackendError> {
    let service = backend
        .service(appointment.service_id)?
        .map(|service| service.display_name())
        .unwrap_or_default();
    let worker_name = backend
        .worker(appointment.worker_id)?
        .map(|worker| worker.name)
        .unwrap_or_default();
    let local = appointment.starts_at.with_timezone(&tz);

    Ok(AppointmentView {
        id: appointment.id,
        service,
        worker_id: appointment.worker_id,
        worker_name,
        date: local.format("%Y-%m-%d").to_string(),
        time: local.format("%H:%M").to_string(),
        starts_at: appointment.starts_at,
        ends_at: appointment.ends_at,
        status: appointment.status,
        guest: appointment.requester.is_guest(),
    })
}

fn appointment_views<B: BookingBackend>(
    backend: &B,
    appointments: Vec<Appointment>,
    tz: Tz,
) -> Result<Vec<AppointmentView>, BackendError> {
    appointments
        .into_iter()
        .map(|appointment| appointment_view(backend, appointment, tz))
        .collect()
}

pub fn create_app<B: BookingBackend, C: Configuration>(state: AppState<B, C>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/available_slots", get(get_available_slots::<B, C>))
        .route("/services", get(get_services::<B, C>))
        .route("/workers", get(get_workers::<B, C>))
        .route("/appointments", post(create_appointment::<B, C>))
        .route("/appointments/upcoming", get(get_upcoming::<B, C>))
        .route("/appointments/history", get(get_history::<B, C>))
        .route("/appointments/:id", get(get_appointment::<B, C>))
        .route("/appointments/:id/cancel", post(cancel::<B, C>));

    let admin = Router::new()
        .route("/admin/workers", post(add_worker::<B, C>))
        .route("/admin/services", post(add_service::<B, C>))
        .route("/admin/availability", post(add_availability::<B, C>))
        .route("/admin/availability/remove", post(remove_availability::<B, C>))
        .route("/admin/workers/:id/availability", get(get_availability::<B, C>))
        .route("/admin/appointments/:id/cancel", post(admin_cancel::<B, C>))
        .route("/admin/appointments/:id/reschedule", post(admin_reschedule::<B, C>))
        .route("/admin/schedule", get(get_schedule::<B, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<B, C>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
}

async fn admin_auth<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if let Some(auth_header) = request.headers().get(ADMIN_PASSWORD_HEADER) {
        if auth_header.to_str().unwrap_or("") != state.configuration.admin_password() {
            return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
        }
    } else {
        return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string()));
    }
    Ok(next.run(request).await)
}

/// Malformed or unknown parameters yield an empty list rather than an error.
async fn get_available_slots<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Query(query): Query<SlotQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (Some(service_id), Some(date)) = (query.service_id, query.date) else {
        return Err(AppError::BadRequest("service_id and date are required".into()));
    };

    let service = match Uuid::parse_str(&service_id) {
        Ok(id) => state.backend.service(id)?,
        Err(_) => None,
    };
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok();
    let (Some(service), Some(date)) = (service, date) else {
        return Ok(Json(json!({ "slots": [] })));
    };

    let policy = state.configuration.booking_policy();
    let slots: Vec<SlotView> = generate_slots(&state.backend, &service, date, state.clock.now(), &policy)?
        .into_iter()
        .map(|slot| SlotView {
            time: slot.time().format("%H:%M").to_string(),
            worker_id: slot.worker_id,
            worker_name: slot.worker_name,
        })
        .collect();
    Ok(Json(json!({ "slots": slots })))
}

async fn get_services<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
) -> AppResult<Json<Vec<ServiceView>>> {
    let services = state.backend.services()?;
    Ok(Json(services.into_iter().map(ServiceView::from).collect()))
}

async fn get_workers<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
) -> AppResult<Json<Vec<Worker>>> {
    let mut workers = state.backend.workers()?;
    workers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(Json(workers))
}

async fn create_appointment<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    identity: Identity,
    Json(form): Json<BookingForm>,
) -> AppResult<impl IntoResponse> {
    let policy = state.configuration.booking_policy();
    let placed = place_booking(&state.backend, form, &identity, &policy, state.clock.now())?;

    dispatch_confirmation(
        state.notifier.clone(),
        Confirmation {
            business_name: state.configuration.business_name(),
            contact: placed.contact,
            service_name: placed.service.display_name(),
            worker_name: placed.worker.name,
            starts_at: placed.appointment.starts_at.with_timezone(&policy.timezone),
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "appointment_id": placed.appointment.id })),
    ))
}

async fn get_upcoming<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    identity: Identity,
) -> AppResult<Json<Vec<AppointmentView>>> {
    let user_id = identity.user_id().ok_or(AppError::Unauthorized)?;
    let appointments = upcoming_appointments(&state.backend, user_id, state.clock.now())?;
    let tz = state.configuration.business_timezone();
    Ok(Json(appointment_views(&state.backend, appointments, tz)?))
}

async fn get_history<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    identity: Identity,
) -> AppResult<Json<Vec<AppointmentView>>> {
    let user_id = identity.user_id().ok_or(AppError::Unauthorized)?;
    let appointments = appointment_history(&state.backend, user_id, state.clock.now())?;
    let tz = state.configuration.business_timezone();
    Ok(Json(appointment_views(&state.backend, appointments, tz)?))
}

/// Appointments with an owner are only visible to that owner.
async fn get_appointment<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AppointmentView>> {
    let appointment = state
        .backend
        .appointment(id)?
        .filter(|appointment| match appointment.requester.user_id() {
            Some(owner) => identity.user_id() == Some(owner),
            None => true,
        })
        .ok_or_else(|| AppError::NotFound("appointment".into()))?;

    let tz = state.configuration.business_timezone();
    Ok(Json(appointment_view(&state.backend, appointment, tz)?))
}

async fn cancel<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let policy = state.configuration.booking_policy();
    cancel_appointment(&state.backend, id, &identity, &policy, state.clock.now())?;
    Ok(Json(json!({ "success": true })))
}

async fn add_worker<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Json(request): Json<AddWorkerRequest>,
) -> AppResult<impl IntoResponse> {
    validate(&request)?;
    let worker: Worker = state
        .backend
        .add_worker(request.name, request.specialties.into_iter().collect())?;
    info!(worker = %worker.id, name = %worker.name, "Worker added");
    Ok((StatusCode::CREATED, Json(worker)))
}

async fn add_service<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Json(request): Json<AddServiceRequest>,
) -> AppResult<impl IntoResponse> {
    validate(&request)?;
    let service = state
        .backend
        .add_service(request.kind, request.duration_minutes)?;
    info!(service = %service.id, name = %service.display_name(), "Service added");
    Ok((StatusCode::CREATED, Json(ServiceView::from(service))))
}

async fn add_availability<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Json(request): Json<AddAvailabilityRequest>,
) -> AppResult<impl IntoResponse> {
    validate(&request)?;
    let day_of_week = Weekday::try_from(request.day_of_week)
        .map_err(|_| AppError::BadRequest("Invalid day of week".into()))?;
    let start_time = parse_time_of_day(&request.start_time)?;
    let end_time = parse_time_of_day(&request.end_time)?;

    let availability = state
        .backend
        .add_availability(request.worker_id, day_of_week, start_time, end_time)?;
    info!(
        worker = %availability.worker_id,
        day = %availability.day_of_week,
        start = %availability.start_time,
        end = %availability.end_time,
        "Availability added"
    );
    Ok((StatusCode::CREATED, Json(AvailabilityView::from(availability))))
}

async fn remove_availability<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Json(request): Json<RemoveAvailabilityRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.backend.remove_availability(request.id)?;
    info!(availability = %request.id, "Availability removed");
    Ok(Json(json!({ "success": true })))
}

async fn get_availability<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Path(worker_id): Path<Uuid>,
) -> AppResult<Json<Vec<AvailabilityView>>> {
    if state.backend.worker(worker_id)?.is_none() {
        return Err(AppError::NotFound("worker".into()));
    }
    let windows = state.backend.availabilities(worker_id, None)?;
    Ok(Json(windows.into_iter().map(AvailabilityView::from).collect()))
}

/// Staff cancellation ignores the notice period.
async fn admin_cancel<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .backend
        .appointment(id)?
        .filter(|appointment| appointment.status.is_blocking())
        .ok_or_else(|| AppError::NotFound("appointment".into()))?;
    state
        .backend
        .set_appointment_status(id, AppointmentStatus::Cancelled)?;
    info!(appointment = %id, "Appointment cancelled by staff");
    Ok(Json(json!({ "success": true })))
}

async fn admin_reschedule<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Path(id): Path<Uuid>,
    Json(form): Json<RescheduleForm>,
) -> AppResult<Json<AppointmentView>> {
    let policy = state.configuration.booking_policy();
    let moved = reschedule_booking(&state.backend, id, form, &policy, state.clock.now())?;
    Ok(Json(appointment_view(&state.backend, moved, policy.timezone)?))
}

/// A missing or malformed date shows today's schedule.
async fn get_schedule<B: BookingBackend, C: Configuration>(
    State(state): State<AppState<B, C>>,
    Query(query): Query<ScheduleQuery>,
) -> AppResult<Json<ScheduleView>> {
    let policy = state.configuration.booking_policy();
    let date = query
        .date
        .and_then(|date| NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok())
        .unwrap_or_else(|| state.clock.now().with_timezone(&policy.timezone).date_naive());

    let workers = daily_schedule(&state.backend, date, &policy)?
        .into_iter()
        .map(|(worker, appointments)| {
            Ok(WorkerScheduleView {
                worker_id: worker.id,
                worker_name: worker.name,
                appointments: appointment_views(&state.backend, appointments, policy.timezone)?,
            })
        })
        .collect::<Result<Vec<_>, BackendError>>()?;

    Ok(Json(ScheduleView {
        date: date.format("%Y-%m-%d").to_string(),
        workers,
    }))
}
