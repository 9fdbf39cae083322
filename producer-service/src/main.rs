// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chess_common::{ChessMove, ChessMoveMessage, DEFAULT_MOVES_TOPIC, SubmitMoveResponse};
use chrono::Utc;
use lambda_http::run as lambda_run;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    publisher: Arc<dyn MovePublisher>,
}

#[async_trait]
trait MovePublisher: Send + Sync {
    async fn publish(&self, message: &ChessMoveMessage) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct KafkaMovePublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaMovePublisher {
    fn from_env() -> anyhow::Result<Self> {
        let bootstrap_servers = std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .ok()
            .unwrap_or_else(|| "kafka:9092".to_string());
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("failed to create Kafka move producer")?;
        let topic = std::env::var("CHESS_MOVES_TOPIC")
            .ok()
            .unwrap_or_else(|| DEFAULT_MOVES_TOPIC.to_string());
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl MovePublisher for KafkaMovePublisher {
    async fn publish(&self, message: &ChessMoveMessage) -> anyhow::Result<()> {
        let payload = message.encode().context("failed to encode move message")?;
        // Keyed by game so all moves of one game land on one partition, in order.
        let key = message.game_id().to_string();
        self.producer
            .send(
                FutureRecord::to(&self.topic).key(&key).payload(&payload),
                std::time::Duration::from_secs(5),
            )
            .await
            .map_err(|(error, _)| anyhow::anyhow!("Kafka publish failed: {error:?}"))?;

        info!(
            game_id = %message.game_id(),
            move_id = %message.move_id(),
            mv = %message.mv(),
            topic = %self.topic,
            "move published to Kafka"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "producer_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState {
        publisher: Arc::new(KafkaMovePublisher::from_env()?),
    };

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running producer-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("PRODUCER_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "producer-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "failed to listen for shutdown signal");
            }
            info!("producer-service shutting down");
        })
        .await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/moves", post(submit_move_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "producer-service"}))
}

async fn submit_move_handler(
    State(state): State<AppState>,
    request: Result<Json<ChessMove>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitMoveResponse>), ApiError> {
    let Json(chess_move) =
        request.map_err(|e| ApiError::bad_request(format!("invalid move request: {e}")))?;
    validate_move(&chess_move)?;

    let message = chess_move.into_message(Utc::now());
    state
        .publisher
        .publish(&message)
        .await
        .map_err(|e| ApiError::internal(format!("failed to publish move: {e}")))?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitMoveResponse {
            accepted: true,
            move_id: message.move_id(),
            game_id: message.game_id(),
            queued_at: message.published_at,
        }),
    ))
}

/// Rejects submissions that can never be applied; board rules are checked
/// by the consumer.
fn validate_move(chess_move: &ChessMove) -> Result<(), ApiError> {
    if chess_move.id.is_nil() {
        return Err(ApiError::bad_request("id is required"));
    }
    if chess_move.game_id.is_nil() {
        return Err(ApiError::bad_request("game_id is required"));
    }
    if chess_move.mv.trim().is_empty() {
        return Err(ApiError::bad_request("move is required"));
    }
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
