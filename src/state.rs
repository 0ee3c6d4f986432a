use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::services::booking::DayLocks;
use crate::services::notifications::push::PushProvider;
use crate::services::notifications::sms::SmsProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub sms: Box<dyn SmsProvider>,
    pub push: Box<dyn PushProvider>,
    pub day_locks: DayLocks,
    pub clock: Arc<dyn Clock>,
}
