//! In-app notification list with unread tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use loantrack_common::Error;

/// How a notification is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "success" => Ok(Severity::Success),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(Error::InvalidInput(format!("Unknown severity: {}", other))),
        }
    }
}

/// Content of a notification before it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: Severity::Info,
            data: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A recorded notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Notifications newest first, with a cached unread count.
///
/// The unread count always equals the number of notifications with
/// `is_read == false`. It is not stored; loading a center counts it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredCenter")]
pub struct NotificationCenter {
    notifications: Vec<Notification>,
    #[serde(skip_serializing)]
    unread: usize,
    enabled: bool,
    last_notification_at: Option<DateTime<Utc>>,
}

/// Serialized form of a center.
#[derive(Deserialize)]
struct StoredCenter {
    #[serde(default)]
    notifications: Vec<Notification>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    last_notification_at: Option<DateTime<Utc>>,
}

fn enabled_by_default() -> bool {
    true
}

impl From<StoredCenter> for NotificationCenter {
    fn from(stored: StoredCenter) -> Self {
        let unread = stored.notifications.iter().filter(|n| !n.is_read).count();
        Self {
            notifications: stored.notifications,
            unread,
            enabled: stored.enabled,
            last_notification_at: stored.last_notification_at,
        }
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    /// Create an empty, enabled center.
    pub fn new() -> Self {
        Self {
            notifications: Vec::new(),
            unread: 0,
            enabled: true,
            last_notification_at: None,
        }
    }

    /// Record a notification as unread at the front of the list.
    /// Returns the assigned id.
    pub fn add(&mut self, new: NewNotification) -> String {
        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            body: new.body,
            severity: new.severity,
            timestamp: Utc::now(),
            is_read: false,
            data: new.data,
        };
        let id = notification.id.clone();
        self.last_notification_at = Some(notification.timestamp);
        self.notifications.insert(0, notification);
        self.unread += 1;
        id
    }

    /// Mark one notification read. Returns whether anything changed.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Mark every notification read.
    pub fn mark_all_as_read(&mut self) {
        self.notifications.iter_mut().for_each(|n| n.is_read = true);
        self.unread = 0;
    }

    /// Delete a notification. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.notifications.iter().position(|n| n.id == id) else {
            return false;
        };
        if !self.notifications.remove(index).is_read {
            self.unread = self.unread.saturating_sub(1);
        }
        true
    }

    /// Delete every notification.
    pub fn clear_all(&mut self) {
        self.notifications.clear();
        self.unread = 0;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    /// Time of the most recently added notification.
    pub fn last_notification_at(&self) -> Option<DateTime<Utc>> {
        self.last_notification_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_is_newest_first_and_unread() {
        let mut center = NotificationCenter::new();
        let first = center.add(NewNotification::new("Welcome", "Thanks for registering"));
        let second = center.add(
            NewNotification::new("Loan Application Approved", "Check your dashboard")
                .with_severity(Severity::Success),
        );

        assert_eq!(center.notifications()[0].id, second);
        assert_eq!(center.notifications()[1].id, first);
        assert_eq!(center.unread_count(), 2);
        assert!(center.last_notification_at().is_some());
    }

    #[test]
    fn test_mark_as_read_is_idempotent() {
        let mut center = NotificationCenter::new();
        let id = center.add(NewNotification::new("a", "b"));

        assert!(center.mark_as_read(&id));
        assert!(!center.mark_as_read(&id));
        assert!(!center.mark_as_read("missing"));
        assert_eq!(center.unread_count(), 0);
    }

    #[test]
    fn test_remove_adjusts_unread() {
        let mut center = NotificationCenter::new();
        let read = center.add(NewNotification::new("a", "b"));
        let unread = center.add(NewNotification::new("c", "d"));
        center.mark_as_read(&read);

        assert!(center.remove(&read));
        assert_eq!(center.unread_count(), 1);
        assert!(center.remove(&unread));
        assert_eq!(center.unread_count(), 0);
        assert!(!center.remove(&unread));
    }

    #[test]
    fn test_mark_all_and_clear() {
        let mut center = NotificationCenter::new();
        center.add(NewNotification::new("a", "b"));
        center.add(NewNotification::new("c", "d"));

        center.mark_all_as_read();
        assert_eq!(center.unread_count(), 0);
        assert!(center.notifications().iter().all(|n| n.is_read));

        center.clear_all();
        assert!(center.notifications().is_empty());
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
        let parsed: NewNotification = serde_json::from_str(r#"{"title":"t","body":"b"}"#).unwrap();
        assert_eq!(parsed.severity, Severity::Info);
    }

    #[test]
    fn test_loading_recounts_unread() {
        let mut center = NotificationCenter::new();
        let read = center.add(NewNotification::new("a", "b"));
        let unread = center.add(NewNotification::new("c", "d"));
        center.mark_as_read(&read);

        let mut blob = serde_json::to_value(&center).unwrap();
        assert!(blob.get("unread").is_none());
        blob["unread"] = serde_json::json!(0);

        let mut loaded: NotificationCenter = serde_json::from_value(blob).unwrap();
        assert_eq!(loaded.unread_count(), 1);
        assert!(loaded.is_enabled());
        assert!(loaded.mark_as_read(&unread));
        assert_eq!(loaded.unread_count(), 0);
        assert!(loaded.remove(&unread));
        assert_eq!(loaded.unread_count(), 0);
    }

    #[test]
    fn test_loading_minimal_blob() {
        let loaded: NotificationCenter = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, NotificationCenter::new());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Read(usize),
        ReadAll,
        Remove(usize),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Add),
            3 => (0usize..8).prop_map(Op::Read),
            1 => Just(Op::ReadAll),
            2 => (0usize..8).prop_map(Op::Remove),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_unread_count_matches(ops in proptest::collection::vec(op_strategy(), 0..50)) {
            let mut center = NotificationCenter::new();
            for op in ops {
                let pick = |i: usize, c: &NotificationCenter| {
                    c.notifications().get(i).map(|n| n.id.clone())
                };
                match op {
                    Op::Add => { center.add(NewNotification::new("t", "b")); }
                    Op::Read(i) => if let Some(id) = pick(i, &center) { center.mark_as_read(&id); },
                    Op::ReadAll => center.mark_all_as_read(),
                    Op::Remove(i) => if let Some(id) = pick(i, &center) { center.remove(&id); },
                    Op::Clear => center.clear_all(),
                }
                let unread = center.notifications().iter().filter(|n| !n.is_read).count();
                prop_assert_eq!(center.unread_count(), unread);
            }
        }
    }
}
