//! Turns recurring weekly windows into concrete bookable slots for one date.

use crate::{
    backend::BookingBackend,
    configuration::BookingPolicy,
    conflict::find_conflict,
    error::BackendError,
    types::{is_qualified, Appointment, Availability, Service, Worker},
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub worker_id: Uuid,
    pub worker_name: String,
    pub start: DateTime<Tz>,
}

impl Slot {
    pub fn time(&self) -> NaiveTime {
        self.start.time()
    }
}

/// Bookable slots for `service` on the local `date`, ordered by start time and then worker id.
///
/// Dates before today or beyond the booking horizon yield no slots. On the current
/// day, windows that already began start at `now` rounded up to the next multiple
/// of the service duration counted from the top of the hour.
pub fn generate_slots<B: BookingBackend>(
    backend: &B,
    service: &Service,
    date: NaiveDate,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<Vec<Slot>, BackendError> {
    let tz = policy.timezone;
    let local_now = now.with_timezone(&tz).naive_local();
    let today = local_now.date();

    if date < today || date > today + Duration::days(policy.horizon_days) {
        debug!(%date, %today, "Requested date outside of the booking horizon");
        return Ok(vec![]);
    }

    let earliest = (date == today).then(|| round_up_to_boundary(local_now, service.duration_minutes));

    // Wide enough to cover the local day under any UTC offset.
    let search_from = (date - Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    let search_to = (date + Duration::days(2)).and_time(NaiveTime::MIN).and_utc();

    let mut slots = Vec::new();
    for worker in backend
        .workers()?
        .into_iter()
        .filter(|worker| is_qualified(worker, service))
    {
        let windows = backend.availabilities(worker.id, Some(date.weekday()))?;
        if windows.is_empty() {
            continue;
        }
        let taken = backend.active_appointments(worker.id, search_from, search_to)?;

        for window in &windows {
            slots.extend(window_slots(
                &worker,
                window,
                date,
                service.duration(),
                earliest.filter(|_| date.and_time(window.start_time) < local_now),
                tz,
                &taken,
            ));
        }
    }

    slots.sort_by(|a, b| a.start.cmp(&b.start).then(a.worker_id.cmp(&b.worker_id)));
    slots.dedup_by(|a, b| a.worker_id == b.worker_id && a.start == b.start);
    Ok(slots)
}

fn window_slots(
    worker: &Worker,
    window: &Availability,
    date: NaiveDate,
    duration: Duration,
    earliest: Option<NaiveDateTime>,
    tz: Tz,
    taken: &[Appointment],
) -> Vec<Slot> {
    let window_end = date.and_time(window.end_time);
    let mut current = date.and_time(window.start_time);
    if let Some(earliest) = earliest {
        current = current.max(earliest);
    }

    let mut slots = Vec::new();
    while current + duration <= window_end {
        if let Some(start) = local_instant(tz, current) {
            let start_utc = start.with_timezone(&Utc);
            let free = find_conflict(start_utc, start_utc + duration, worker.id, taken).is_none();
            if free {
                slots.push(Slot {
                    worker_id: worker.id,
                    worker_name: worker.name.clone(),
                    start,
                });
            }
        }
        current += duration;
    }
    slots
}

/// `None` for local times skipped by a DST transition.
fn local_instant(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local).earliest()
}

/// Rounds `now` up to the next multiple of `duration_minutes` past the top of the hour.
/// A partial minute counts as a full one, so the result is never before `now`.
pub fn round_up_to_boundary(now: NaiveDateTime, duration_minutes: u32) -> NaiveDateTime {
    let mut minute = now
        .with_second(0)
        .and_then(|time| time.with_nanosecond(0))
        .unwrap_or(now);
    if minute < now {
        minute += Duration::minutes(1);
    }

    let duration = i64::from(duration_minutes.max(1));
    let past_hour = i64::from(minute.minute());
    minute + Duration::minutes((duration - past_hour % duration) % duration)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        local_bookings::LocalBookings,
        testutils::{at_local, seed_service, seed_worker, time},
        types::{AppointmentDraft, AppointmentStatus, Requester, Specialty},
    };
    use chrono::Weekday;
    use chrono_tz::Europe::Madrid;
    use test_case::test_case;

    fn policy() -> BookingPolicy {
        BookingPolicy {
            timezone: Madrid,
            ..BookingPolicy::default()
        }
    }

    // 2030-01-07 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn book(backend: &LocalBookings, worker_id: Uuid, start: DateTime<Utc>, minutes: i64) -> Appointment {
        backend
            .book_appointment(AppointmentDraft {
                worker_id,
                service_id: Uuid::new_v4(),
                starts_at: start,
                ends_at: start + Duration::minutes(minutes),
                status: AppointmentStatus::Confirmed,
                requester: Requester::Identified {
                    user_id: Uuid::new_v4(),
                },
            })
            .unwrap()
    }

    fn times(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|slot| slot.time().format("%H:%M").to_string()).collect()
    }

    #[test]
    fn full_day_yields_sixteen_half_hour_slots() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::NutritionalAdvice, 30);
        seed_worker(
            &backend,
            "Marta",
            &[Specialty::NutritionalAdvice],
            &[(Weekday::Mon, time(9, 0), time(17, 0))],
        );
        let now = at_local(Madrid, monday() - Duration::days(3), 10, 0);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(slots.len(), 16);
        assert_eq!(times(&slots).first().unwrap(), "09:00");
        assert_eq!(times(&slots).last().unwrap(), "16:30");
        assert!(slots.iter().all(|slot| slot.worker_name == "Marta"));
    }

    #[test]
    fn same_day_starts_at_next_boundary() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::NutritionalAdvice, 30);
        seed_worker(
            &backend,
            "Marta",
            &[Specialty::NutritionalAdvice],
            &[(Weekday::Mon, time(9, 0), time(17, 0))],
        );
        let now = at_local(Madrid, monday(), 9, 12);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(times(&slots).first().unwrap(), "09:30");
        assert_eq!(slots.len(), 15);
    }

    #[test]
    fn same_day_window_already_over_contributes_nothing() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::NutritionalAdvice, 30);
        seed_worker(
            &backend,
            "Marta",
            &[Specialty::NutritionalAdvice],
            &[
                (Weekday::Mon, time(9, 0), time(12, 0)),
                (Weekday::Mon, time(16, 0), time(18, 0)),
            ],
        );
        let now = at_local(Madrid, monday(), 11, 40);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(times(&slots), vec!["16:00", "16:30", "17:00", "17:30"]);
    }

    #[test_case(30, true ; "last day of the horizon")]
    #[test_case(31, false ; "one day past the horizon")]
    #[test_case(-1, false ; "yesterday")]
    fn horizon_bounds(days_ahead: i64, expect_slots: bool) {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::Other, 60);
        let every_day: Vec<_> = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(|day| (day, time(9, 0), time(13, 0)))
        .collect();
        seed_worker(&backend, "Pablo", &[Specialty::Other], &every_day);
        let now = at_local(Madrid, monday(), 8, 0);

        let slots = generate_slots(
            &backend,
            &service,
            monday() + Duration::days(days_ahead),
            now,
            &policy(),
        )
        .unwrap();

        assert_eq!(!slots.is_empty(), expect_slots);
    }

    #[test]
    fn booked_and_cancelled_appointments() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::NutritionalAdvice, 30);
        let worker = seed_worker(
            &backend,
            "Marta",
            &[Specialty::NutritionalAdvice],
            &[(Weekday::Mon, time(9, 0), time(11, 0))],
        );
        let now = at_local(Madrid, monday() - Duration::days(1), 12, 0);

        // 60 minute appointment at 09:15 blocks 09:00, 09:30 and 10:00.
        book(&backend, worker.id, at_local(Madrid, monday(), 9, 15), 60);
        let cancelled = book(&backend, worker.id, at_local(Madrid, monday(), 10, 30), 30);
        backend
            .set_appointment_status(cancelled.id, AppointmentStatus::Cancelled)
            .unwrap();

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(times(&slots), vec!["10:30"]);
    }

    #[test]
    fn appointment_ending_at_slot_start_does_not_block() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::NutritionalAdvice, 30);
        let worker = seed_worker(
            &backend,
            "Marta",
            &[Specialty::NutritionalAdvice],
            &[(Weekday::Mon, time(9, 0), time(10, 30))],
        );
        let now = at_local(Madrid, monday() - Duration::days(1), 12, 0);
        book(&backend, worker.id, at_local(Madrid, monday(), 8, 0), 60);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(times(&slots), vec!["09:00", "09:30", "10:00"]);
    }

    #[test]
    fn only_qualified_workers_and_ties_ordered_by_worker_id() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::ParMagnetic, 60);
        let window = [(Weekday::Mon, time(9, 0), time(11, 0))];
        let first = seed_worker(&backend, "Luis", &[Specialty::ParMagnetic], &window);
        let second = seed_worker(
            &backend,
            "Elena",
            &[Specialty::ParMagnetic, Specialty::Other],
            &window,
        );
        seed_worker(&backend, "Nora", &[Specialty::Other], &window);
        let now = at_local(Madrid, monday() - Duration::days(1), 12, 0);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        let (low, high) = if first.id < second.id {
            (first.id, second.id)
        } else {
            (second.id, first.id)
        };
        let order: Vec<_> = slots.iter().map(|slot| (slot.time(), slot.worker_id)).collect();
        assert_eq!(
            order,
            vec![
                (time(9, 0), low),
                (time(9, 0), high),
                (time(10, 0), low),
                (time(10, 0), high)
            ]
        );
    }

    #[test]
    fn no_workers_or_no_windows_is_empty() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::Other, 30);
        let now = at_local(Madrid, monday() - Duration::days(1), 12, 0);
        assert!(generate_slots(&backend, &service, monday(), now, &policy())
            .unwrap()
            .is_empty());

        seed_worker(
            &backend,
            "Pablo",
            &[Specialty::Other],
            &[(Weekday::Tue, time(9, 0), time(13, 0))],
        );
        assert!(generate_slots(&backend, &service, monday(), now, &policy())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn leftover_shorter_than_duration_is_dropped() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::Other, 45);
        seed_worker(
            &backend,
            "Pablo",
            &[Specialty::Other],
            &[(Weekday::Mon, time(9, 0), time(10, 0))],
        );
        let now = at_local(Madrid, monday() - Duration::days(1), 12, 0);

        let slots = generate_slots(&backend, &service, monday(), now, &policy()).unwrap();

        assert_eq!(times(&slots), vec!["09:00"]);
    }

    #[test]
    fn slot_spanning_spring_forward_ends_an_hour_later() {
        let backend = LocalBookings::default();
        let service = seed_service(&backend, Specialty::Other, 60);
        let worker = seed_worker(
            &backend,
            "Pablo",
            &[Specialty::Other],
            &[(Weekday::Sun, time(1, 0), time(4, 0))],
        );
        // Clocks jump from 02:00 to 03:00 in Madrid.
        let sunday = NaiveDate::from_ymd_opt(2030, 3, 31).unwrap();
        let now = at_local(Madrid, sunday - Duration::days(1), 12, 0);

        let slots = generate_slots(&backend, &service, sunday, now, &policy()).unwrap();
        assert_eq!(times(&slots), vec!["01:00", "03:00"]);

        // 01:00 CET lasts until 00:00 + 1h UTC, so an appointment at 00:30 UTC blocks it.
        let utc = |hour, minute| Utc.with_ymd_and_hms(2030, 3, 31, hour, minute, 0).unwrap();
        book(&backend, worker.id, utc(0, 30), 15);

        let slots = generate_slots(&backend, &service, sunday, now, &policy()).unwrap();
        assert_eq!(times(&slots), vec!["03:00"]);
    }

    #[test_case((9, 12, 0), 30, (9, 30) ; "rounds up to half hour")]
    #[test_case((9, 30, 0), 30, (9, 30) ; "already on boundary")]
    #[test_case((9, 30, 20), 30, (10, 0) ; "partial minute past boundary")]
    #[test_case((9, 12, 0), 45, (9, 45) ; "45 minutes from top of hour")]
    #[test_case((9, 50, 0), 45, (10, 30) ; "wall clock minutes not window offset")]
    #[test_case((9, 12, 0), 90, (10, 30) ; "longer than an hour")]
    #[test_case((23, 59, 30), 15, (0, 0) ; "crosses midnight")]
    fn test_round_up_to_boundary(now: (u32, u32, u32), duration: u32, expected: (u32, u32)) {
        let now = monday().and_hms_opt(now.0, now.1, now.2).unwrap();
        let rounded = round_up_to_boundary(now, duration);
        assert_eq!(rounded.time(), time(expected.0, expected.1));
        assert!(rounded >= now);
    }
}
