//! HTTP/WebSocket server exposing the query service and the live
//! subscription channel.

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    broadcast::{BroadcastRegistry, Subscriber},
    catalog::{CatalogInfo, Expert, ExpertCatalog, LexicalCatalog},
    error::ServiceError,
    generator::{AnswerGenerator, ChatCompletionGenerator, UnconfiguredGenerator},
    persistence::{DurableStore, NoopStore, SledStore},
    service::QueryService,
    settings::{ServerConfig, Settings},
    store::{AssignedExpert, ExpertResponse, QueryRecord, QuerySummary, QueryStore},
};

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
    pub registry: Arc<BroadcastRegistry>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(
        service: Arc<QueryService>,
        registry: Arc<BroadcastRegistry>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            service,
            registry,
            channel_capacity,
        }
    }
}

#[derive(Deserialize)]
struct SubmitQueryRequest {
    question: String,
}

#[derive(Serialize)]
struct SubmitQueryResponse {
    query_id: Uuid,
    experts: Vec<AssignedExpert>,
    llm_answer: String,
}

#[derive(Deserialize)]
struct SubmitResponseRequest {
    expert_id: String,
    expert_name: String,
    response: String,
}

#[derive(Deserialize)]
struct AddExpertRequest {
    name: String,
    expertise: String,
    description: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    query_count: usize,
    expert_count: usize,
}

/// Create the HTTP router with all endpoints and middleware.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let cors = create_cors_layer(server);
    let body_limit = RequestBodyLimitLayer::new(server.max_request_size_mb * 1024 * 1024);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/query", post(submit_query))
        .route("/query/:id", get(get_query))
        .route("/query/:id/expert_response", post(submit_expert_response))
        .route("/query_list", get(query_list))
        .route("/all_answers", get(all_answers))
        .route("/queries", delete(clear_queries))
        .route("/ws/query/:id", get(ws_query))
        .route("/experts", post(add_expert).get(list_experts).delete(clear_experts))
        .route("/experts/info", get(experts_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(body_limit)
}

fn create_cors_layer(server: &ServerConfig) -> CorsLayer {
    if !server.enable_cors {
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    if server.cors_origins.contains(&"*".to_string()) {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = server
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "expert relay is up and running" }))
}

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ServiceError> {
    let info = state.service.collection_info().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        query_count: state.service.query_count(),
        expert_count: info.expert_count,
    }))
}

#[instrument(skip(state, request))]
async fn submit_query(
    State(state): State<AppState>,
    Json(request): Json<SubmitQueryRequest>,
) -> Result<Json<SubmitQueryResponse>, ServiceError> {
    let record = state.service.submit_query(request.question).await?;
    Ok(Json(SubmitQueryResponse {
        query_id: record.id,
        experts: record.assigned_experts,
        llm_answer: record.llm_answer,
    }))
}

#[instrument(skip(state))]
async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueryRecord>, ServiceError> {
    Ok(Json(state.service.get_query(id)?))
}

#[instrument(skip(state, request))]
async fn submit_expert_response(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitResponseRequest>,
) -> Result<(StatusCode, Json<ExpertResponse>), ServiceError> {
    let response = state
        .service
        .submit_expert_response(id, request.expert_id, request.expert_name, request.response)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn query_list(State(state): State<AppState>) -> Json<Vec<QuerySummary>> {
    Json(state.service.list_queries())
}

async fn all_answers(State(state): State<AppState>) -> Json<Vec<QueryRecord>> {
    Json(state.service.list_queries_with_responses())
}

#[instrument(skip(state))]
async fn clear_queries(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.service.clear_all();
    Json(json!({ "detail": format!("cleared {cleared} queries") }))
}

#[instrument(skip(state, request))]
async fn add_expert(
    State(state): State<AppState>,
    Json(request): Json<AddExpertRequest>,
) -> Result<(StatusCode, Json<Expert>), ServiceError> {
    let expert = state
        .service
        .add_expert(request.name, request.expertise, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(expert)))
}

async fn list_experts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let experts = state.service.list_experts().await?;
    Ok(Json(json!({ "experts": experts })))
}

async fn experts_info(State(state): State<AppState>) -> Result<Json<CatalogInfo>, ServiceError> {
    Ok(Json(state.service.collection_info().await?))
}

#[instrument(skip(state))]
async fn clear_experts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state.service.clear_experts().await?;
    Ok(Json(json!({ "detail": "all experts deleted" })))
}

/// Open a live subscription on a query id.
///
/// The channel is push-only: inbound payloads are ignored, and the socket
/// stays open until the client disconnects.
async fn ws_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.service.get_query(id).is_err() {
        return ServiceError::NotFound(format!("unknown query id {id}")).into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| {
        subscriber_loop(socket, id, state.registry.clone(), state.channel_capacity)
    })
}

async fn subscriber_loop(
    socket: WebSocket,
    query_id: Uuid,
    registry: Arc<BroadcastRegistry>,
    channel_capacity: usize,
) {
    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(channel_capacity);
    registry.subscribe(query_id, Subscriber::new(connection_id, tx));
    info!(%query_id, %connection_id, "live subscriber connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(%query_id, "failed to serialize push event: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // push-only channel, inbound ignored
                    Some(Err(_)) => break,
                }
            }
        }
    }

    registry.unsubscribe(query_id, connection_id);
    info!(%query_id, %connection_id, "live subscriber disconnected");
}

/// Wire up the collaborators from settings and build the shared state.
pub async fn build_state(settings: &Settings) -> Result<AppState> {
    let store = Arc::new(QueryStore::new());
    let registry = Arc::new(BroadcastRegistry::new());

    let catalog = Arc::new(LexicalCatalog::new(settings.catalog.collection_name.clone()));
    if let Some(seed) = &settings.catalog.seed_file {
        if seed.exists() {
            catalog
                .seed_from_file(seed)
                .await
                .with_context(|| format!("failed to seed catalog from {seed:?}"))?;
        } else {
            warn!("catalog seed file not found: {:?}", seed);
        }
    }

    let generator: Arc<dyn AnswerGenerator> = if settings.llm.api_key.is_some() {
        Arc::new(ChatCompletionGenerator::from_config(&settings.llm)?)
    } else {
        warn!("no LLM API key configured, using unconfigured generator");
        Arc::new(UnconfiguredGenerator)
    };

    let durable: Arc<dyn DurableStore> = if settings.storage.enable_mirror {
        Arc::new(
            SledStore::open(&settings.storage.db_path)
                .with_context(|| format!("failed to open durable store at {:?}", settings.storage.db_path))?,
        )
    } else {
        warn!("durable mirror disabled");
        Arc::new(NoopStore)
    };

    let service = Arc::new(QueryService::new(
        store,
        registry.clone(),
        catalog as Arc<dyn ExpertCatalog>,
        generator,
        durable,
        settings.catalog.top_k,
    ));

    Ok(AppState {
        service,
        registry,
        channel_capacity: settings.broadcast.channel_capacity,
    })
}

/// Start the HTTP server and wait for a shutdown signal.
pub async fn serve(settings: &Settings, addr_override: Option<SocketAddr>) -> Result<()> {
    let state = build_state(settings).await?;
    let app = create_router(state, &settings.server);

    let addr = match addr_override {
        Some(addr) => addr,
        None => format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .context("invalid server address")?,
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or Ctrl+C).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down gracefully");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C, shutting down gracefully");
    }
}
