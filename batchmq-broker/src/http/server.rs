use std::{future::Future, net::SocketAddr};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use batchmq_models::Message;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::{
    http::types::{ApiResponse, HeapQuery, ReturnQuery},
    in_memory::MessageBroker,
    BrokerError, HeapType, QueueRead,
};

const DEFAULT_PAGE_SIZE: usize = 100;
/// One week.
pub const MAX_RETURN_DELAY_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Limits applied by the network adapter on top of the engine.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub max_messages: usize,
    /// Delay, in milliseconds, applied to `/wip/return` without `?delay=`.
    pub returned_delivery_delay: i64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_messages: 1_000_000,
            returned_delivery_delay: 5_000,
        }
    }
}

#[derive(Clone)]
struct AppState {
    broker: MessageBroker,
    settings: ServerSettings,
}

pub fn router(broker: MessageBroker, settings: ServerSettings) -> Router {
    Router::new()
        .route("/q/bulk", post(enqueue_bulk))
        .route("/q/claim", post(claim))
        .route("/wip/ack/:id", delete(ack))
        .route("/wip/heartbeat/:id", post(heartbeat))
        .route("/wip/return/:id", post(return_to_queue))
        .route("/heap/:heap/:op", get(read_heap))
        .route("/heap/:heap", delete(delete_heap))
        .route("/ks", get(list_keyspaces))
        .with_state(AppState { broker, settings })
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    broker: MessageBroker,
    settings: ServerSettings,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("broker network adapter listening on {}", addr);
    }
    axum::serve(listener, router(broker, settings))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn run_server<F>(
    addr: SocketAddr,
    broker: MessageBroker,
    settings: ServerSettings,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker, settings, shutdown).await
}

async fn enqueue_bulk(State(state): State<AppState>, Json(msgs): Json<Vec<Message>>) -> Response {
    let adding = msgs.len();
    match state.broker.enqueue_bulk(msgs, state.settings.max_messages) {
        Ok(ids) => {
            debug!("enqueued {} message(s)", adding);
            json_response(StatusCode::OK, ApiResponse::data(ids))
        }
        Err(err) => error_response(err),
    }
}

async fn claim(State(state): State<AppState>, claim_comment: String) -> Response {
    match state.broker.claim(&claim_comment) {
        Ok(msg) => json_response(
            StatusCode::OK,
            ApiResponse {
                data: msg,
                error: String::new(),
            },
        ),
        Err(err) => error_response(err),
    }
}

async fn ack(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(state.broker.ack(id))
}

async fn heartbeat(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(state.broker.heartbeat(id))
}

async fn return_to_queue(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<ReturnQuery>,
) -> Response {
    let delay = query
        .delay
        .unwrap_or(state.settings.returned_delivery_delay);
    if !(0..=MAX_RETURN_DELAY_MILLIS).contains(&delay) {
        return error_response(BrokerError::InvalidArgument(format!(
            "return delay {delay} out of range 0..={MAX_RETURN_DELAY_MILLIS}"
        )));
    }
    respond(state.broker.return_to_queue(id, delay))
}

async fn read_heap(
    State(state): State<AppState>,
    Path((heap, op)): Path<(String, String)>,
    Query(query): Query<HeapQuery>,
) -> Response {
    let heap = match heap.parse::<HeapType>() {
        Ok(heap) => heap,
        Err(err) => return error_response(err),
    };
    let filter = query.filter();

    if op == "count" {
        return json_response(StatusCode::OK, ApiResponse::data(state.broker.count(heap, &filter)));
    }

    let msgs = match op.parse::<QueueRead>() {
        Ok(QueueRead::Filter) => state.broker.filter(heap, &filter),
        Ok(read) => state.broker.head_tail(
            heap,
            read,
            query.from.unwrap_or(0),
            query.count.unwrap_or(DEFAULT_PAGE_SIZE),
        ),
        Err(err) => return error_response(err),
    };
    json_response(StatusCode::OK, ApiResponse::data(msgs))
}

async fn delete_heap(
    State(state): State<AppState>,
    Path(heap): Path<String>,
    Query(query): Query<HeapQuery>,
) -> Response {
    match heap.parse::<HeapType>() {
        Ok(heap) => {
            let deleted = state.broker.delete(heap, &query.filter());
            info!("deleted {} message(s) from {}", deleted, heap);
            json_response(StatusCode::OK, ApiResponse::data(deleted))
        }
        Err(err) => error_response(err),
    }
}

async fn list_keyspaces(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, ApiResponse::data(state.broker.list_keyspaces()))
}

fn respond(result: Result<(), BrokerError>) -> Response {
    match result {
        Ok(()) => json_response(StatusCode::OK, ApiResponse::<()>::data(())),
        Err(err) => error_response(err),
    }
}

fn error_response(err: BrokerError) -> Response {
    let status = match err {
        BrokerError::NotFound { .. } => StatusCode::NOT_FOUND,
        BrokerError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("{}", err);
    json_response(status, ApiResponse::<()>::error(err.to_string()))
}

fn json_response<T>(status: StatusCode, payload: T) -> Response
where
    T: Serialize,
{
    (status, Json(payload)).into_response()
}
