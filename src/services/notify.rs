use std::sync::Arc;

use crate::db::queries;
use crate::models::{LiveEvent, Notification};
use crate::state::AppState;

pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: &'a str,
    pub title: String,
    pub body: String,
    pub booking_id: Option<&'a str>,
    pub dedupe_key: Option<String>,
}

pub async fn notify(state: &Arc<AppState>, new: NewNotification<'_>) -> Option<Notification> {
    let stored = {
        let db = state.db();
        queries::insert_notification(
            &db,
            new.user_id,
            new.kind,
            &new.title,
            &new.body,
            new.booking_id,
            new.dedupe_key.as_deref(),
        )
        .and_then(|n| Ok((n, queries::get_user(&db, new.user_id)?)))
    };

    let (notification, user) = match stored {
        Ok((Some(n), user)) => (n, user),
        Ok((None, _)) => return None,
        Err(e) => {
            tracing::error!(error = %e, user_id = new.user_id, kind = new.kind, "failed to record notification");
            return None;
        }
    };

    // No receivers is fine
    let _ = state
        .events_tx
        .send(LiveEvent::Notification(notification.clone()));

    if let Some(phone) = user.and_then(|u| u.phone).filter(|p| !p.is_empty()) {
        let text = format!("{}: {}", notification.title, notification.body);
        match state.messaging.send_message(&phone, &text).await {
            Ok(()) => {
                let db = state.db();
                if let Err(e) = queries::mark_notification_delivered(&db, notification.id) {
                    tracing::warn!(error = %e, "failed to mark notification delivered");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, id = notification.id, "failed to deliver notification sms");
            }
        }
    }

    Some(notification)
}
