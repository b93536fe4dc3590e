use crate::{
    backend::BookingBackend,
    booking::BookingForm,
    clock::Clock,
    configuration::Configuration,
    types::{Service, Specialty, Worker},
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::Mutex;

pub const ADMIN_PASSWORD: &str = "123";

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

/// UTC instant of a wall clock time in `tz`.
pub fn at_local(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    tz.from_local_datetime(&date.and_time(time(hour, minute)))
        .unwrap()
        .with_timezone(&Utc)
}

pub fn seed_service<B: BookingBackend>(backend: &B, kind: Specialty, duration_minutes: u32) -> Service {
    backend.add_service(kind, duration_minutes).unwrap()
}

pub fn seed_worker<B: BookingBackend>(
    backend: &B,
    name: &str,
    specialties: &[Specialty],
    windows: &[(Weekday, NaiveTime, NaiveTime)],
) -> Worker {
    let worker = backend
        .add_worker(name.into(), specialties.iter().copied().collect())
        .unwrap();
    for (day, start, end) in windows {
        backend
            .add_availability(worker.id, *day, *start, *end)
            .unwrap();
    }
    worker
}

pub fn guest_form(service: &Service, worker: &Worker, date: NaiveDate, start: NaiveTime) -> BookingForm {
    BookingForm {
        service_id: Some(service.id.to_string()),
        worker_id: Some(worker.id.to_string()),
        date: Some(date.format("%Y-%m-%d").to_string()),
        time: Some(start.format("%H:%M").to_string()),
        as_guest: true,
        guest_first_name: Some("Ana".into()),
        guest_last_name: Some("Lopez".into()),
        guest_email: Some("ana@example.com".into()),
        guest_phone: Some("+34 600111222".into()),
    }
}

pub struct FixedClock(pub Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Clone)]
pub struct TestConfiguration {
    pub timezone: Tz,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Madrid,
        }
    }
}

impl Configuration for TestConfiguration {
    fn business_name(&self) -> String {
        "NATURSUR".into()
    }

    fn admin_password(&self) -> String {
        ADMIN_PASSWORD.into()
    }

    fn port(&self) -> String {
        "0".into()
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn business_timezone(&self) -> Tz {
        self.timezone
    }

    fn booking_horizon_days(&self) -> i64 {
        30
    }

    fn cancellation_notice_hours(&self) -> i64 {
        12
    }

    fn completion_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }
}
