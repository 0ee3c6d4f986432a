pub mod booking;
pub mod notifications;
pub mod reminders;
pub mod slots;
