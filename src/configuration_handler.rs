use crate::configuration::Configuration;
use chrono_tz::Tz;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "booking_engine", about = "Appointment booking engine")]
pub struct ConfigurationHandler {
    /// Name used in confirmation messages
    #[arg(long, env = "BUSINESS_NAME", default_value = "NATURSUR")]
    business_name: String,

    /// Password expected in the `x-admin-password` header
    #[arg(long, env = "ADMIN_PASSWORD")]
    admin_password: String,

    #[arg(long, env = "PORT", default_value = "3000")]
    port: String,

    /// PostgreSQL connection string. Bookings are kept in memory when absent.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// IANA name of the timezone availability windows are declared in
    #[arg(long, env = "BUSINESS_TIMEZONE", default_value = "Europe/Madrid", value_parser = parse_timezone)]
    business_timezone: Tz,

    #[arg(long, env = "BOOKING_HORIZON_DAYS", default_value_t = 30)]
    booking_horizon_days: i64,

    #[arg(long, env = "CANCELLATION_NOTICE_HOURS", default_value_t = 12)]
    cancellation_notice_hours: i64,

    /// Seconds between two sweeps marking finished appointments as completed
    #[arg(long, env = "COMPLETION_INTERVAL_SECS", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    completion_interval_secs: u64,
}

fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>()
        .map_err(|_| format!("'{name}' is not a known IANA timezone"))
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn business_name(&self) -> String {
        self.business_name.clone()
    }

    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn business_timezone(&self) -> Tz {
        self.business_timezone
    }

    fn booking_horizon_days(&self) -> i64 {
        self.booking_horizon_days
    }

    fn cancellation_notice_hours(&self) -> i64 {
        self.cancellation_notice_hours
    }

    fn completion_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.completion_interval_secs)
    }
}
