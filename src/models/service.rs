use serde::{Deserialize, Serialize};

/// Appointment type offered by an owner; the booking path resolves
/// duration and price from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub duration_minutes: i32,
    pub price: Option<f64>,
}
