use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};
use uuid::Uuid;

/// Service type code shared by a worker's qualifications and a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Specialty {
    OsteopathyMassage,
    ParMagnetic,
    EmotionalTechniques,
    NutritionalAdvice,
    Other,
}

impl Specialty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::OsteopathyMassage => "OSTEOPATHY_MASSAGE",
            Specialty::ParMagnetic => "PAR_MAGNETIC",
            Specialty::EmotionalTechniques => "EMOTIONAL_TECHNIQUES",
            Specialty::NutritionalAdvice => "NUTRITIONAL_ADVICE",
            Specialty::Other => "OTHER",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Specialty::OsteopathyMassage => "Osteopathy and Holistic Massage",
            Specialty::ParMagnetic => "Balanced Biomagnetic Pair",
            Specialty::EmotionalTechniques => "Adapted Emotional Techniques",
            Specialty::NutritionalAdvice => "Nutritional Advice",
            Specialty::Other => "Other",
        }
    }
}

impl FromStr for Specialty {
    type Err = String;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "OSTEOPATHY_MASSAGE" => Ok(Specialty::OsteopathyMassage),
            "PAR_MAGNETIC" => Ok(Specialty::ParMagnetic),
            "EMOTIONAL_TECHNIQUES" => Ok(Specialty::EmotionalTechniques),
            "NUTRITIONAL_ADVICE" => Ok(Specialty::NutritionalAdvice),
            "OTHER" => Ok(Specialty::Other),
            other => Err(format!("Unknown specialty code: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub specialties: BTreeSet<Specialty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub kind: Specialty,
    pub duration_minutes: u32,
}

impl Service {
    pub const MIN_DURATION_MINUTES: u32 = 15;

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn display_name(&self) -> String {
        format!("{} ({} min)", self.kind.label(), self.duration_minutes)
    }
}

/// A worker is qualified for a service when its specialty set holds the service's type code.
pub fn is_qualified(worker: &Worker, service: &Service) -> bool {
    worker.specialties.contains(&service.kind)
}

/// Recurring weekly window in the business timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// Statuses that occupy a worker's time.
pub const BLOCKING_STATUSES: [AppointmentStatus; 2] =
    [AppointmentStatus::Pending, AppointmentStatus::Confirmed];

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_blocking(&self) -> bool {
        BLOCKING_STATUSES.contains(self)
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "PENDING" => Ok(AppointmentStatus::Pending),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("Unknown appointment status: {other}")),
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
}

/// Who an appointment belongs to. Exactly one of the two is ever recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requester {
    Identified { user_id: Uuid },
    Guest(GuestContact),
}

impl Requester {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Requester::Identified { user_id } => Some(*user_id),
            Requester::Guest(_) => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Requester::Guest(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub service_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub requester: Requester,
}

impl Appointment {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.requester.user_id() == Some(user_id)
    }
}

/// An appointment that passed validation and is ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub worker_id: Uuid,
    pub service_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub requester: Requester,
}

impl AppointmentDraft {
    pub fn into_appointment(self, id: Uuid) -> Appointment {
        Appointment {
            id,
            worker_id: self.worker_id,
            service_id: self.service_id,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            status: self.status,
            requester: self.requester,
        }
    }
}
