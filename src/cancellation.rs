use crate::types::Appointment;
use chrono::{DateTime, Duration, Utc};

/// An appointment may be cancelled while its start lies strictly more than `notice` ahead of `now`.
pub fn can_cancel(appointment: &Appointment, now: DateTime<Utc>, notice: Duration) -> bool {
    appointment.starts_at > now + notice
}
