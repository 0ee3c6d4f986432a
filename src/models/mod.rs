pub mod appointment;
pub mod notification;
pub mod owner;
pub mod service;

pub use appointment::{Appointment, AppointmentStatus};
pub use notification::{NotificationPayload, PushSubscription};
pub use owner::{BreakWindow, CalendarRules, Owner};
pub use service::Service;
