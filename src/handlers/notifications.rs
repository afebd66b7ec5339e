use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::auth::{authenticate, user_for_token};
use crate::models::{LiveEvent, Notification};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
}

// GET /api/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let user = authenticate(&state, &headers)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let db = state.db();
    Ok(Json(queries::list_notifications(&db, &user.id, query.unread, limit)?))
}

// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let db = state.db();
    if !queries::mark_notification_read(&db, &user.id, id)? {
        return Err(AppError::NotFound("notification".to_string()));
    }
    Ok(Json(json!({"ok": true})))
}

// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let db = state.db();
    let updated = queries::mark_all_notifications_read(&db, &user.id)?;
    Ok(Json(json!({"ok": true, "updated": updated})))
}

fn sse_event(event: &LiveEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().data(data).event(event.event_name())
}

#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
    pub last_id: Option<i64>,
}

// GET /api/events?token=&last_id=
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    let token = query.token.as_deref().unwrap_or("");
    let user = user_for_token(&state, token)?;
    let last_id = query.last_id.unwrap_or(0);

    // Subscribe before the catch-up read so nothing falls in between
    let rx = state.events_tx.subscribe();
    let catchup = {
        let db = state.db();
        queries::notifications_since(&db, &user.id, last_id)?
    };
    let newest_caught_up = catchup.last().map_or(last_id, |n| n.id);

    let catchup_stream = tokio_stream::iter(
        catchup
            .into_iter()
            .map(|n| Ok::<_, Infallible>(sse_event(&LiveEvent::Notification(n)))),
    );

    let user_id = user.id;
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.recipient() == user_id => match &event {
            LiveEvent::Notification(n) if n.id <= newest_caught_up => None,
            _ => Some(Ok(sse_event(&event))),
        },
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event stream lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}
