//! Relay between the platform notifier and the in-app notification center.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use loantrack_common::{ApplicationId, Result};

use crate::center::{NewNotification, NotificationCenter};

/// Title used for inbound notifications that carry none.
pub const DEFAULT_INBOUND_TITLE: &str = "New Notification";

/// A notification handed to the platform for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// When to show it; `None` shows it immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<DateTime<Utc>>,
}

/// Platform notification service.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Schedule a notification and return the platform's id for it.
    async fn schedule(&self, notification: &LocalNotification) -> Result<String>;

    /// Cancel one scheduled notification.
    async fn cancel(&self, id: &str) -> Result<()>;

    /// Cancel every scheduled notification.
    async fn cancel_all(&self) -> Result<()>;
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn schedule(&self, notification: &LocalNotification) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        match notification.trigger {
            Some(at) => info!("Notification {} scheduled for {}: {}", id, at, notification.title),
            None => info!("Notification {}: {} - {}", id, notification.title, notification.body),
        }
        Ok(id)
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        info!("Notification {} cancelled", id);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        info!("All scheduled notifications cancelled");
        Ok(())
    }
}

/// Schedules platform notifications and mirrors them into the center.
#[derive(Clone)]
pub struct NotificationRelay {
    notifier: Arc<dyn Notifier>,
    center: Arc<RwLock<NotificationCenter>>,
}

impl NotificationRelay {
    pub fn new(notifier: Arc<dyn Notifier>, center: Arc<RwLock<NotificationCenter>>) -> Self {
        Self { notifier, center }
    }

    /// The center notifications are recorded in.
    pub fn center(&self) -> Arc<RwLock<NotificationCenter>> {
        self.center.clone()
    }

    /// Schedule a notification, then record it in the center.
    ///
    /// Nothing is recorded when scheduling fails.
    pub async fn schedule_local_notification(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        data: Option<serde_json::Value>,
        trigger: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let notification = LocalNotification {
            title: title.into(),
            body: body.into(),
            data,
            trigger,
        };

        let id = match self.notifier.schedule(&notification).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to schedule notification: {}", e);
                return Err(e);
            }
        };

        let mut recorded = NewNotification::new(notification.title, notification.body);
        recorded.data = notification.data;
        self.center.write().await.add(recorded);
        debug!("Scheduled notification {}", id);
        Ok(id)
    }

    /// Record a notification delivered by the platform while running.
    /// Returns the center's id for it.
    pub async fn relay_inbound(&self, title: Option<&str>, body: Option<&str>) -> String {
        let title = title.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_INBOUND_TITLE);
        let notification = NewNotification::new(title, body.unwrap_or_default());
        self.center.write().await.add(notification)
    }

    /// Cancel one scheduled notification. Failures are logged only.
    pub async fn cancel(&self, id: &str) {
        if let Err(e) = self.notifier.cancel(id).await {
            error!("Failed to cancel notification {}: {}", id, e);
        }
    }

    /// Cancel every scheduled notification. Failures are logged only.
    pub async fn cancel_all(&self) {
        if let Err(e) = self.notifier.cancel_all().await {
            error!("Failed to cancel all notifications: {}", e);
        }
    }

    /// Tell the applicant their application status changed.
    pub async fn loan_status_update(&self, application_id: &ApplicationId, status: &str) -> Result<String> {
        self.schedule_local_notification(
            "Loan Application Update",
            status_message(status),
            Some(serde_json::json!({ "applicationId": application_id, "status": status })),
            None,
        )
        .await
    }

    /// Remind the applicant to upload outstanding documents.
    pub async fn document_reminder(&self, application_id: &ApplicationId) -> Result<String> {
        self.schedule_local_notification(
            "Document Upload Required",
            "Please upload the required documents to complete your loan application.",
            Some(serde_json::json!({ "applicationId": application_id, "type": "document_reminder" })),
            None,
        )
        .await
    }

    /// Remind the applicant of an upcoming instalment.
    pub async fn payment_reminder(&self, amount: u64, due_date: NaiveDate) -> Result<String> {
        let due = due_date.format("%Y-%m-%d").to_string();
        self.schedule_local_notification(
            "Payment Reminder",
            format!(
                "Your EMI payment of \u{20b9}{} is due on {}.",
                group_thousands(amount),
                due
            ),
            Some(serde_json::json!({ "type": "payment_reminder", "amount": amount, "dueDate": due })),
            None,
        )
        .await
    }
}

/// Body text for an application status.
pub fn status_message(status: &str) -> &'static str {
    match status {
        "approved" => "Your loan application has been approved!",
        "rejected" => "Your loan application has been rejected.",
        "clarification" => "Your loan application requires clarification.",
        "pending" => "Your loan application is under review.",
        _ => "Your loan application status has been updated.",
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
