//! LoanTrack notifications
//!
//! In-app notification center plus a relay that schedules platform
//! notifications and mirrors them into the center.

pub mod center;
pub mod relay;

pub use center::{NewNotification, Notification, NotificationCenter, Severity};
pub use relay::{LocalNotification, LogNotifier, NotificationRelay, Notifier, DEFAULT_INBOUND_TITLE};
