pub mod push;
pub mod sms;

use std::time::Duration;

use crate::db::queries;
use crate::models::NotificationPayload;
use crate::state::AppState;
use push::PushError;

/// Credits consumed per delivered SMS.
pub const SMS_COST: i64 = 2;

/// Bound on any single transport attempt so a hung provider never stalls
/// the booking or reminder path that triggered it.
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsOutcome {
    Sent,
    SkippedDisabled,
    SkippedInsufficientCredits,
    Failed,
}

impl SmsOutcome {
    pub fn was_sent(&self) -> bool {
        matches!(self, SmsOutcome::Sent)
    }
}

/// Credit-gated SMS on behalf of an owner. Skips are silent outcomes,
/// never errors: a missing toggle or an empty balance must not surface
/// as a booking or reminder failure.
///
/// The debit is an atomic decrement-if-sufficient taken before the
/// transport call; a failed send refunds it, so the balance drops by
/// exactly SMS_COST per delivered message and never goes negative.
pub async fn send_owner_sms(state: &AppState, owner_id: &str, to: &str, body: &str) -> SmsOutcome {
    {
        let db = state.db.lock().unwrap();

        let enabled = match queries::get_owner(&db, owner_id) {
            Ok(Some(owner)) => owner.sms_notifications_enabled,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(owner = %owner_id, error = %e, "owner lookup failed, skipping SMS");
                false
            }
        };
        if !enabled {
            tracing::debug!(owner = %owner_id, "SMS notifications disabled, skipping");
            return SmsOutcome::SkippedDisabled;
        }

        match queries::debit_credits(&db, owner_id, SMS_COST) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(owner = %owner_id, "insufficient credits, skipping SMS");
                return SmsOutcome::SkippedInsufficientCredits;
            }
            Err(e) => {
                tracing::warn!(owner = %owner_id, error = %e, "credit debit failed, skipping SMS");
                return SmsOutcome::Failed;
            }
        }
    }

    let result = tokio::time::timeout(TRANSPORT_TIMEOUT, state.sms.send_sms(to, body)).await;

    match result {
        Ok(Ok(())) => SmsOutcome::Sent,
        Ok(Err(e)) => {
            tracing::warn!(owner = %owner_id, to = %to, error = %e, "SMS send failed");
            refund(state, owner_id);
            SmsOutcome::Failed
        }
        Err(_) => {
            tracing::warn!(owner = %owner_id, to = %to, "SMS send timed out");
            refund(state, owner_id);
            SmsOutcome::Failed
        }
    }
}

fn refund(state: &AppState, owner_id: &str) {
    let db = state.db.lock().unwrap();
    if let Err(e) = queries::add_credits(&db, owner_id, SMS_COST) {
        tracing::error!(owner = %owner_id, error = %e, "failed to refund SMS credit");
    }
}

/// Best-effort push to every endpoint registered for one phone number.
/// Endpoints are attempted independently; a permanently gone endpoint is
/// deregistered on the spot. Returns the number of successful deliveries.
pub async fn push_to_user(state: &AppState, phone: &str, payload: &NotificationPayload) -> usize {
    let subscriptions = {
        let db = state.db.lock().unwrap();
        match queries::get_push_subscriptions(&db, phone) {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(phone = %phone, error = %e, "push subscription lookup failed");
                return 0;
            }
        }
    };

    let mut delivered = 0;
    for sub in subscriptions {
        let result =
            tokio::time::timeout(TRANSPORT_TIMEOUT, state.push.send_push(&sub, payload)).await;

        match result {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(PushError::Gone)) => {
                tracing::info!(phone = %phone, endpoint = %sub.endpoint, "removing gone push endpoint");
                let db = state.db.lock().unwrap();
                if let Err(e) = queries::remove_push_subscription(&db, sub.id) {
                    tracing::warn!(error = %e, "failed to remove push subscription");
                }
            }
            Ok(Err(PushError::Transport(e))) => {
                tracing::warn!(phone = %phone, endpoint = %sub.endpoint, error = %e, "push delivery failed");
            }
            Err(_) => {
                tracing::warn!(phone = %phone, endpoint = %sub.endpoint, "push delivery timed out");
            }
        }
    }
    delivered
}
