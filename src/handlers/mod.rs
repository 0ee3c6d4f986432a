pub mod admin;
pub mod availability;
pub mod bookings;
pub mod health;
pub mod jobs;
pub mod push;
