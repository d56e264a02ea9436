use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::routes::api::ApiError;
use crate::state::{AppState, OutlineEvent, PlanSession};

/// Streams a plan's dissolved outlines: the latest known set first, then
/// every recomputation published after an edit.
pub async fn plan_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = state
        .plan(&id)
        .ok_or_else(|| ApiError::PlanNotFound(id.clone()))?;
    // Subscribe before reading the latest event so nothing published in
    // between is missed.
    let rx = session.outline_tx.subscribe();

    let stream = async_stream::stream! {
        if let Some(event) = latest_event(&session).await {
            yield Ok(event);
        }

        let mut stream = BroadcastStream::new(rx);
        while let Some(result) = stream.next().await {
            match result {
                Ok(event) => {
                    if let Some(event) = outline_event(&event) {
                        yield Ok(event);
                    }
                }
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        plan = %session.id,
                        skipped_events = skipped,
                        "SSE client lagged behind outline broadcast; resending latest outlines"
                    );
                    if let Some(event) = latest_event(&session).await {
                        yield Ok(event);
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    ))
}

async fn latest_event(session: &Arc<PlanSession>) -> Option<Event> {
    let latest = session.latest_outlines.read().await.clone()?;
    outline_event(&latest)
}

fn outline_event(event: &OutlineEvent) -> Option<Event> {
    let Some(payload) = event_payload(event.json.as_ref()) else {
        warn!(
            revision = event.revision,
            "outline payload is not valid utf-8; dropping SSE event"
        );
        return None;
    };
    Some(
        Event::default()
            .id(event.revision.to_string())
            .event("outlines")
            .data(payload),
    )
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}
