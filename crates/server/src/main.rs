use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use bridge::Bridge;
use chatwoot::{ChatwootClient, ChatwootConfig};
use futures::future::join_all;
use matrix_client::{MatrixClientConfig, MatrixMediaClient};
use serde::Deserialize;
use shared::{
    domain::{RoomId, UserId},
    error::{ApiError, ErrorCode},
    events::{InboundEvent, RawEvent},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

const MAX_TRANSACTION_BYTES: usize = 16 * 1024 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings()?;
    settings.validate()?;

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; check the path and its permissions"
        );
        error
    })?;

    let timeout = Duration::from_secs(settings.http_timeout_seconds);
    let chatwoot = ChatwootClient::new(ChatwootConfig {
        base_url: settings.chatwoot_base_url.clone(),
        account_id: settings.chatwoot_account_id,
        inbox_id: settings.chatwoot_inbox_id,
        access_token: settings.chatwoot_access_token.clone(),
        timeout,
    })?;
    let media = MatrixMediaClient::new(MatrixClientConfig {
        homeserver_url: settings.homeserver_url.clone(),
        access_token: settings.as_token.clone(),
        timeout,
    })?;
    let bridge = Bridge::new(
        UserId::new(settings.bot_user_id.clone()),
        Arc::new(storage.clone()),
        Arc::new(chatwoot),
        Arc::new(media),
    );

    let state = AppState {
        bridge: Arc::new(bridge),
        storage,
        hs_token: Arc::from(settings.hs_token.as_str()),
    };
    let app = build_router(state);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, bot_user_id = %settings.bot_user_id, "bridge listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/_matrix/app/v1/transactions/:txn_id", put(push_transaction))
        .route("/transactions/:txn_id", put(push_transaction))
        .fallback(unknown_endpoint)
        .layer(RequestBodyLimitLayer::new(MAX_TRANSACTION_BYTES))
        .with_state(state)
}

fn api_error(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(code, message)))
}

async fn healthz(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.storage.health_check().await.map_err(|e| {
        api_error(StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Internal, e.to_string())
    })?;
    Ok("ok")
}

async fn unknown_endpoint() -> (StatusCode, Json<ApiError>) {
    api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "unknown endpoint")
}

fn presented_token<'a>(headers: &'a HeaderMap, query: &'a TokenQuery) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or(query.access_token.as_deref())
}

fn authorize(state: &AppState, headers: &HeaderMap, query: &TokenQuery) -> ApiResult<()> {
    match presented_token(headers, query) {
        Some(token) if token == state.hs_token.as_ref() => Ok(()),
        _ => Err(api_error(
            StatusCode::FORBIDDEN,
            ErrorCode::Forbidden,
            "invalid homeserver token",
        )),
    }
}

async fn push_transaction(
    State(state): State<AppState>,
    Path(txn_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers, &query)?;

    let transaction: Transaction = serde_json::from_slice(&body).map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, ErrorCode::BadJson, e.to_string())
    })?;
    debug!(%txn_id, events = transaction.events.len(), "received transaction");

    let events = transaction
        .events
        .into_iter()
        .filter_map(|value| decode_event(&txn_id, value))
        .collect();

    join_all(group_by_room(events).into_iter().map(|queue| {
        let bridge = &state.bridge;
        async move {
            for event in queue {
                dispatch(bridge, event).await;
            }
        }
    }))
    .await;
    Ok(Json(serde_json::json!({})))
}

fn decode_event(txn_id: &str, value: serde_json::Value) -> Option<InboundEvent> {
    let raw = match serde_json::from_value::<RawEvent>(value) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(%txn_id, %error, "skipping malformed event");
            return None;
        }
    };
    let (event_id, room_id) = (raw.event_id.clone(), raw.room_id.clone());
    InboundEvent::from_raw(raw).unwrap_or_else(|error| {
        warn!(%txn_id, %event_id, %room_id, %error, "dropping undecodable event");
        None
    })
}

/// Rooms run concurrently; events of one room keep their delivery order.
fn group_by_room(events: Vec<InboundEvent>) -> Vec<Vec<InboundEvent>> {
    let mut rooms: Vec<(RoomId, Vec<InboundEvent>)> = Vec::new();
    for event in events {
        match rooms.iter_mut().find(|(room_id, _)| room_id == event.room_id()) {
            Some((_, queue)) => queue.push(event),
            None => rooms.push((event.room_id().clone(), vec![event])),
        }
    }
    rooms.into_iter().map(|(_, queue)| queue).collect()
}

async fn dispatch(bridge: &Bridge, event: InboundEvent) {
    match event {
        InboundEvent::Message(message) => bridge.on_message(&message).await,
        InboundEvent::Redaction(redaction) => bridge.on_redaction(&redaction).await,
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
