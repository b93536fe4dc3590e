//! Best-effort booking confirmations over email and SMS.
//!
//! Delivery runs on background tasks. Failures are logged and never reach the
//! booking requester.

use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync + 'static {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError>;
    fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        info!(%to, %subject, %body, "Email confirmation");
        Ok(())
    }

    fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        info!(%to, %body, "SMS confirmation");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub first_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Confirmation {
    pub business_name: String,
    pub contact: ContactInfo,
    pub service_name: String,
    pub worker_name: String,
    pub starts_at: DateTime<Tz>,
}

impl Confirmation {
    pub fn email_subject(&self) -> String {
        format!("Appointment confirmation - {}", self.business_name)
    }

    pub fn email_body(&self) -> String {
        format!(
            "Hello {name},\n\n\
             Your appointment has been booked.\n\n\
             Details:\n\
             - Service: {service}\n\
             - Specialist: {worker}\n\
             - Date: {date}\n\
             - Time: {time}\n\n\
             If you need to cancel, please do so at least 12 hours in advance.\n\n\
             See you soon!\n\
             The {business} team\n",
            name = self.contact.first_name,
            service = self.service_name,
            worker = self.worker_name,
            date = self.starts_at.format("%d/%m/%Y"),
            time = self.starts_at.format("%H:%M"),
            business = self.business_name,
        )
    }

    pub fn sms_body(&self) -> String {
        format!(
            "{}: Hello {}, your appointment on {} at {} with {} is confirmed.",
            self.business_name,
            self.contact.first_name,
            self.starts_at.format("%d/%m"),
            self.starts_at.format("%H:%M"),
            self.worker_name,
        )
    }
}

/// Sends the email and the SMS on independent blocking tasks. Channels without
/// a contact address are skipped. The handle is only useful for tests.
pub fn dispatch_confirmation(notifier: Arc<dyn Notifier>, confirmation: Confirmation) -> JoinHandle<()> {
    let confirmation = Arc::new(confirmation);

    let email = {
        let notifier = notifier.clone();
        let confirmation = confirmation.clone();
        tokio::task::spawn_blocking(move || {
            let Some(to) = confirmation.contact.email.as_deref() else {
                return;
            };
            if let Err(err) =
                notifier.send_email(to, &confirmation.email_subject(), &confirmation.email_body())
            {
                error!(?err, %to, "Failed to send confirmation email");
            }
        })
    };

    let sms = tokio::task::spawn_blocking(move || {
        let Some(to) = confirmation.contact.phone.as_deref() else {
            return;
        };
        if let Err(err) = notifier.send_sms(to, &confirmation.sms_body()) {
            error!(?err, %to, "Failed to send confirmation SMS");
        }
    });

    tokio::spawn(async move {
        let (email, sms) = tokio::join!(email, sms);
        if let Err(err) = email.and(sms) {
            error!(?err, "Notification task panicked");
        }
    })
}
