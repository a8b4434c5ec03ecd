pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod loader;
pub mod payload;
pub mod phone;
pub mod template;
pub mod transport;
pub mod types;
pub mod webhook;
pub mod ws;

pub use config::Config;

use self::config::{load_config, resolve_database_url, TransportConfig};
use self::db::{DbKind, MessageRecord};
use self::dispatch::{DispatchPlan, RunRequest};
use self::error::DispatchError;
use self::jobs::RunRegistry;
use self::payload::{MessageContent, PayloadBuilder};
use self::transport::{CloudApiTransport, TemplateSource, Transport};
use self::types::{ContactRow, InboundMessage, RunConfiguration, RunResult};
use self::ws::WsEvent;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::AnyPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub const AUTH_HEADER: &str = "X-Wa-Dispatch-Token";
const DEFAULT_PREVIEW_ROWS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: AnyPool,
    pub transport: Option<Arc<dyn Transport>>,
    pub templates: Option<Arc<dyn TemplateSource>>,
    pub runs: RunRegistry,
    pub ws_tx: broadcast::Sender<WsEvent>,
    pub db_kind: DbKind,
}

impl AppState {
    pub fn payload_builder(&self) -> PayloadBuilder {
        PayloadBuilder::new(
            self.config.dispatch.language_code.clone(),
            self.config.fixtures.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    pub csv_path: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRunRequest {
    pub csv_path: String,
    #[serde(flatten)]
    pub request: RunRequest,
    pub interval_seconds: Option<u64>,
    pub daily_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub messages: i64,
    pub active_run: Option<String>,
    pub transport_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Conversation key for a phone number: digits without the leading `+`.
pub fn peer_key(phone: &str) -> String {
    phone.trim().trim_start_matches('+').to_string()
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    let config = load_config();
    let provider = match TransportConfig::from_whatsapp(&config.whatsapp) {
        Ok(transport_config) => Some(Arc::new(CloudApiTransport::new(transport_config)?)),
        Err(err) => {
            warn!("sending disabled: {err}");
            None
        }
    };
    let transport = provider.clone().map(|p| p as Arc<dyn Transport>);
    let templates = provider.map(|p| p as Arc<dyn TemplateSource>);
    create_app_with(config, transport, templates).await
}

pub async fn create_app_with(
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    templates: Option<Arc<dyn TemplateSource>>,
) -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let (ws_tx, _) = broadcast::channel(100);
    let (runs, updates) = RunRegistry::new();
    tokio::spawn(jobs::start_run_updater(runs.clone(), updates, ws_tx.clone()));

    let state = AppState {
        config,
        pool,
        transport,
        templates,
        runs,
        ws_tx,
        db_kind,
    };

    let authed_routes = Router::new()
        .route("/v1/conversations", get(list_conversations))
        .route("/v1/conversations/:peer/messages", get(list_messages))
        .route("/v1/conversations/:peer/read", post(mark_read))
        .route("/v1/messages/send", post(send_message))
        .route("/v1/templates", get(list_templates))
        .route("/v1/bulk/preview", post(bulk_preview))
        .route("/v1/bulk/runs", post(start_run))
        .route("/v1/bulk/runs/:run_id", get(get_run))
        .route("/v1/bulk/runs/:run_id/stop", post(stop_run))
        .route("/v1/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/webhook", get(webhook_verify).post(webhook_ingest));

    let app = Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state.clone());

    Ok((state, app))
}

async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(token) = state.config.auth.token.as_ref() {
        let header = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
        if header != Some(token.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(req).await
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({"error": message.to_string()}))).into_response()
}

fn dispatch_error_response(err: &DispatchError) -> Response {
    let status = match err {
        DispatchError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err)
}

fn transport_missing() -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "WhatsApp credentials are not configured",
    )
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let messages = db::count_messages(&state.pool, state.db_kind)
        .await
        .unwrap_or(0);
    Json(StatusResponse {
        messages,
        active_run: state.runs.active().await,
        transport_configured: state.transport.is_some(),
    })
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    let token = state.config.auth.token.clone();
    ws.on_upgrade(move |socket| ws::handle_ws(socket, rx, token))
}

async fn list_conversations(State(state): State<AppState>, Query(page): Query<Pagination>) -> impl IntoResponse {
    let limit = page.limit.unwrap_or(100).min(500);
    let offset = page.offset.unwrap_or(0);
    match db::list_conversations(&state.pool, state.db_kind, limit, offset).await {
        Ok(conversations) => Json(conversations).into_response(),
        Err(err) => {
            error!("list_conversations error: {err:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

async fn list_messages(
    State(state): State<AppState>,
    Path(peer): Path<String>,
    Query(page): Query<Pagination>,
) -> impl IntoResponse {
    let limit = page.limit.unwrap_or(200).min(500);
    let offset = page.offset.unwrap_or(0);
    match db::list_messages(&state.pool, state.db_kind, &peer_key(&peer), limit, offset).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => {
            error!("list_messages error: {err:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

async fn mark_read(State(state): State<AppState>, Path(peer): Path<String>) -> impl IntoResponse {
    match db::mark_conversation_read(&state.pool, state.db_kind, &peer_key(&peer)).await {
        Ok(updated) => Json(json!({"updated": updated})).into_response(),
        Err(err) => {
            error!("mark_read error: {err:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

/// Sends one free-text message and records it as outbound.
async fn send_text(state: &AppState, to: &str, text: &str) -> anyhow::Result<MessageRecord> {
    let transport = state
        .transport
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("WhatsApp credentials are not configured"))?;
    let phone = phone::normalize_phone(to, &state.config.dispatch.country_prefix)
        .ok_or_else(|| DispatchError::Validation("recipient phone is empty".to_string()))?;
    let envelope = state.payload_builder().text(&phone, text)?;
    let receipt = transport.submit(&envelope).await?;

    let peer = peer_key(&phone);
    let record = MessageRecord::outbound(Some(receipt.message_id), &peer, text, "text");
    db::insert_message(&state.pool, state.db_kind, &record).await?;
    db::mark_conversation_answered(&state.pool, state.db_kind, &peer).await?;
    let _ = state.ws_tx.send(WsEvent::message(&record));
    Ok(record)
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    if state.transport.is_none() {
        return transport_missing();
    }
    match send_text(&state, &req.to, &req.text).await {
        Ok(record) => Json(SendMessageResponse {
            message_id: record.whatsapp_id.unwrap_or(record.id),
            status: record.status,
        })
        .into_response(),
        Err(err) => {
            error!("send_message error: {err:?}");
            let status = if err.downcast_ref::<DispatchError>().is_some() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::BAD_GATEWAY
            };
            error_response(status, err)
        }
    }
}

async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    let Some(source) = state.templates.as_ref() else {
        return transport_missing();
    };
    match source.fetch_templates().await {
        Ok(templates) => Json(templates).into_response(),
        Err(err) => {
            error!("list_templates error: {err:?}");
            error_response(StatusCode::BAD_GATEWAY, err)
        }
    }
}

async fn bulk_preview(Json(req): Json<PreviewRequest>) -> impl IntoResponse {
    match loader::load(&req.csv_path).await {
        Ok(table) => Json(PreviewResponse {
            rows: loader::preview(&table, req.limit.unwrap_or(DEFAULT_PREVIEW_ROWS)),
            total_rows: table.rows.len(),
            columns: table.columns,
        })
        .into_response(),
        Err(err) => dispatch_error_response(&err),
    }
}

async fn start_run(State(state): State<AppState>, Json(req): Json<BulkRunRequest>) -> impl IntoResponse {
    let Some(transport) = state.transport.clone() else {
        return transport_missing();
    };

    let defaults = state.config.dispatch.run_configuration();
    let run_config = RunConfiguration {
        interval_seconds: req.interval_seconds.unwrap_or(defaults.interval_seconds),
        daily_limit: req.daily_limit.unwrap_or(defaults.daily_limit),
    };
    if let Err(err) = dispatch::validate_run_configuration(&run_config) {
        return dispatch_error_response(&err);
    }

    let table = match loader::load(&req.csv_path).await {
        Ok(table) => table,
        Err(err) => return dispatch_error_response(&err),
    };

    let plan = match dispatch::plan(
        &req.request,
        state.payload_builder(),
        &state.config.dispatch.country_prefix,
        state.templates.as_deref(),
    )
    .await
    {
        Ok(plan) => plan,
        Err(err) => return dispatch_error_response(&err),
    };

    let (run_id, stop) = match state.runs.try_begin().await {
        Ok(started) => started,
        Err(conflict) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "a bulk run is already active",
                    "active_run_id": conflict.active_run_id,
                })),
            )
                .into_response()
        }
    };

    info!(run_id = %run_id, rows = table.rows.len(), csv = %req.csv_path, "bulk run accepted");
    let task_state = state.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let state = task_state;
        state.runs.mark_running(&task_run_id).await;
        let on_progress = state.runs.progress_callback(&task_run_id);
        let outcome = dispatch::run(
            &table.rows,
            &plan,
            run_config,
            transport.as_ref(),
            on_progress,
            &stop,
        )
        .await;

        if let Ok(result) = outcome.as_ref() {
            if let Err(err) = store_sent_outcomes(&state, &plan, &table.rows, result).await {
                error!(run_id = %task_run_id, "failed to store sent messages: {err:?}");
            }
        }
        state
            .runs
            .finish(&task_run_id, outcome.map_err(|err| err.to_string()))
            .await;
    });

    (StatusCode::ACCEPTED, Json(json!({"run_id": run_id}))).into_response()
}

/// Records every SENT row of a finished run as an outbound message.
async fn store_sent_outcomes(
    state: &AppState,
    plan: &DispatchPlan,
    rows: &[ContactRow],
    result: &RunResult,
) -> anyhow::Result<()> {
    for outcome in result.outcomes.iter().filter(|o| o.is_sent()) {
        let Some(row) = rows.iter().find(|r| r.index == outcome.row_index) else {
            continue;
        };
        let (body, message_type) = match plan.content_for(row) {
            MessageContent::Text(text) => (text, "text"),
            MessageContent::Template { name, .. } => (format!("[template] {name}"), "template"),
        };
        let record = MessageRecord::outbound(
            outcome.provider_message_id.clone(),
            &peer_key(&outcome.phone),
            &body,
            message_type,
        );
        db::insert_message(&state.pool, state.db_kind, &record).await?;
    }
    Ok(())
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    match state.runs.get(&run_id).await {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stop_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    if state.runs.stop(&run_id).await {
        Json(json!({"run_id": run_id, "stopping": true})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn webhook_verify(
    State(state): State<AppState>,
    Query(query): Query<webhook::VerifyQuery>,
) -> impl IntoResponse {
    match webhook::verify(&query, state.config.whatsapp.verify_token.as_deref()) {
        webhook::VerifyOutcome::Verified(challenge) => {
            info!("webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        webhook::VerifyOutcome::Forbidden => {
            warn!("webhook verification failed: invalid token");
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
        webhook::VerifyOutcome::BadRequest => {
            warn!("webhook verification failed: missing parameters");
            (StatusCode::BAD_REQUEST, "Bad Request").into_response()
        }
    }
}

async fn webhook_ingest(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut processed = 0usize;
    for inbound in webhook::parse_inbound(&payload) {
        match handle_inbound(&state, &inbound).await {
            Ok(true) => processed += 1,
            Ok(false) => {}
            Err(err) => {
                error!("webhook inbound error: {err:?}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, err);
            }
        }
    }
    Json(json!({"status": "success", "processed": processed})).into_response()
}

/// Stores a new inbound message and fires its auto-reply. Returns false for duplicates.
async fn handle_inbound(state: &AppState, inbound: &InboundMessage) -> anyhow::Result<bool> {
    let record = MessageRecord::inbound(
        &inbound.whatsapp_id,
        &peer_key(&inbound.sender),
        inbound.recipient.clone(),
        inbound.sender_name.clone(),
        &inbound.text,
        &inbound.message_type,
    );
    if !db::insert_inbound_once(&state.pool, state.db_kind, &record).await? {
        return Ok(false);
    }
    let _ = state.ws_tx.send(WsEvent::message(&record));

    if let Some(reply) = webhook::auto_reply_for(inbound, &state.config.auto_replies) {
        if let Err(err) = send_text(state, &inbound.sender, reply).await {
            error!(peer = %record.peer, "auto-reply failed: {err:?}");
        }
    }
    Ok(true)
}
