use chrono::Duration;
use chrono_tz::Tz;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn business_name(&self) -> String;
    fn admin_password(&self) -> String;
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    fn business_timezone(&self) -> Tz;
    fn booking_horizon_days(&self) -> i64;
    fn cancellation_notice_hours(&self) -> i64;
    fn completion_interval(&self) -> std::time::Duration;

    fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            timezone: self.business_timezone(),
            horizon_days: self.booking_horizon_days(),
            cancellation_notice: Duration::hours(self.cancellation_notice_hours()),
        }
    }
}

/// Business rules shared by slot generation, booking validation and cancellation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingPolicy {
    pub timezone: Tz,
    pub horizon_days: i64,
    pub cancellation_notice: Duration,
}

impl BookingPolicy {
    pub fn horizon(&self) -> Duration {
        Duration::days(self.horizon_days)
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Madrid,
            horizon_days: 30,
            cancellation_notice: Duration::hours(12),
        }
    }
}
