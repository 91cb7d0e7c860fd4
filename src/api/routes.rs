//! Route handlers for the chain's public surface.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::chain::ChainManager;
use crate::model::FullSignedBlock;
use crate::store::BlockStore;

#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<ChainManager>,
    pub store: Arc<dyn BlockStore>,
    pub block_broadcast: broadcast::Sender<FullSignedBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ChainQuery {
    pub hash: Option<String>,
    pub timestamp: Option<String>,
    pub height: Option<String>,
}

/// `GET /v1/chain` — looks a block up by exactly one of `hash`, `timestamp`,
/// or `height`; `400` if none is given or a numeric field fails to parse.
async fn get_chain(State(state): State<AppState>, Query(query): Query<ChainQuery>) -> Response {
    if let Some(hash) = query.hash {
        return match state.store.get_block(&hash).await {
            Ok(Some(block)) => Json(block).into_response(),
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(err) => {
                warn!(error = %err, "chain lookup by hash failed");
                StatusCode::NOT_ACCEPTABLE.into_response()
            }
        };
    }

    if let Some(raw) = query.timestamp {
        let Ok(timestamp) = raw.parse::<u64>() else {
            return (StatusCode::BAD_REQUEST, "invalid timestamp").into_response();
        };
        return match state.store.find_by_timestamp(timestamp).await {
            Ok(Some(block)) => Json(block).into_response(),
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(err) => {
                warn!(error = %err, "chain lookup by timestamp failed");
                StatusCode::NOT_ACCEPTABLE.into_response()
            }
        };
    }

    if let Some(raw) = query.height {
        let Ok(height) = raw.parse::<u64>() else {
            return (StatusCode::BAD_REQUEST, "invalid height").into_response();
        };
        return match state.store.find_by_height(height).await {
            Ok(Some(block)) => Json(block).into_response(),
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(err) => {
                warn!(error = %err, "chain lookup by height failed");
                StatusCode::NOT_ACCEPTABLE.into_response()
            }
        };
    }

    (
        StatusCode::BAD_REQUEST,
        "one of hash, timestamp, or height is required",
    )
        .into_response()
}

/// `GET /v1/latest` — the 10 most recent blocks as of now.
async fn get_latest(State(state): State<AppState>) -> Response {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs();

    match state.store.get_latest_blocks(now, 10).await {
        Ok(blocks) => Json(blocks).into_response(),
        Err(err) => {
            warn!(error = %err, "latest-blocks lookup failed");
            StatusCode::NOT_ACCEPTABLE.into_response()
        }
    }
}

/// `GET /v1/socket/latest` — upgrades to a websocket that streams every
/// committed block as JSON.
async fn socket_latest(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_blocks(socket, state.block_broadcast.subscribe()))
}

async fn push_blocks(mut socket: WebSocket, mut rx: broadcast::Receiver<FullSignedBlock>) {
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(block) => {
                        let payload = serde_json::to_string(&block).unwrap_or_else(|_| "{}".to_string());
                        if socket.send(Message::Text(payload)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => return,
                    _ => {}
                }
            }
        }
    }
}

/// Rejects every method but `GET` on the endpoints that only ever read.
async fn get_only(req: axum::extract::Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    next.run(req).await
}

async fn health_check() -> &'static str {
    "ok"
}

pub fn app_router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route("/v1/chain", get(get_chain))
        .route("/v1/latest", get(get_latest))
        .layer(middleware::from_fn(get_only));

    Router::new()
        .merge(data_routes)
        .route("/v1/socket/latest", get(socket_latest))
        .route("/health", get(health_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteBlockStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteBlockStore::in_memory().unwrap());
        let chain = Arc::new(ChainManager::new(store.clone()));
        let (tx, _) = broadcast::channel(16);
        AppState {
            chain,
            store,
            block_broadcast: tx,
        }
    }

    #[tokio::test]
    async fn chain_with_no_query_param_is_bad_request() {
        let app = app_router(state());
        let response = app
            .oneshot(Request::builder().uri("/v1/chain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chain_with_unknown_hash_is_not_found() {
        let app = app_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/chain?hash=nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chain_with_invalid_height_is_bad_request() {
        let app = app_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/chain?height=not-a-number")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_to_chain_is_not_acceptable() {
        let app = app_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chain?hash=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl BlockStore for FailingStore {
        async fn store_block(&self, _block: &FullSignedBlock) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_block(&self, _hash: &str) -> anyhow::Result<Option<FullSignedBlock>> {
            Err(anyhow::anyhow!("corrupt block bytes"))
        }
        async fn find_by_timestamp(&self, _timestamp: u64) -> anyhow::Result<Option<FullSignedBlock>> {
            Err(anyhow::anyhow!("corrupt block bytes"))
        }
        async fn find_by_height(&self, _height: u64) -> anyhow::Result<Option<FullSignedBlock>> {
            Err(anyhow::anyhow!("corrupt block bytes"))
        }
        async fn get_latest_blocks(
            &self,
            _up_to: u64,
            _limit: usize,
        ) -> anyhow::Result<Vec<FullSignedBlock>> {
            Err(anyhow::anyhow!("corrupt block bytes"))
        }
        async fn store_value(&self, _key: &str, _value: Vec<u8>) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_value(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            unimplemented!()
        }
    }

    fn failing_state() -> AppState {
        let store: Arc<dyn BlockStore> = Arc::new(FailingStore);
        let chain = Arc::new(ChainManager::new(store.clone()));
        let (tx, _) = broadcast::channel(16);
        AppState {
            chain,
            store,
            block_broadcast: tx,
        }
    }

    #[tokio::test]
    async fn chain_with_store_failure_is_not_acceptable() {
        let app = app_router(failing_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/chain?hash=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn latest_is_empty_array_with_no_blocks_committed() {
        let app = app_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
