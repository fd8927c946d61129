use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};

use crate::AppState;
use crate::auth;
use crate::error::AppError;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events))
}

#[derive(Deserialize)]
struct EventsQuery {
    /// `EventSource` cannot set headers, so the token may come as a query
    /// parameter instead.
    token: Option<String>,
}

/// Server-sent events for the authenticated user.
async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let header_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(auth::bearer_token)
        .transpose()?;
    let token = header_token
        .or(query.token.as_deref())
        .ok_or_else(|| AppError::Unauthorized("missing session token".into()))?;
    let user = auth::authenticate(&state.pool, token).await?;
    tracing::debug!(user_id = %user.user_id, "realtime listener connected");

    let stream = state.events.subscribe(user.user_id).map(|event| {
        Event::default()
            .event(event.kind.as_str())
            .json_data(&event.payload)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::super::testing::TestApp;

    async fn status_for(app: &TestApp, uri: &str, authorization: Option<&str>) -> StatusCode {
        let mut req = Request::builder().uri(uri);
        if let Some(value) = authorization {
            req = req.header("authorization", value);
        }
        // only the head is awaited; the event stream itself never ends
        app.router()
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn token_from_header_or_query() {
        let app = TestApp::new().await;
        let (_, token) = app.user("alice", &[]).await;

        for header in [format!("Bearer {token}"), format!("bearer  {token}")] {
            assert_eq!(
                status_for(&app, "/v1/events", Some(&header)).await,
                StatusCode::OK
            );
        }
        assert_eq!(
            status_for(&app, &format!("/v1/events?token={token}"), None).await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(&app, "/v1/events", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&app, "/v1/events?token=stale", None).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
