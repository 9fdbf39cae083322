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

mod board;
mod delivery;
mod error;
mod game;
mod provider;
mod store;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chess_common::DEFAULT_MOVES_TOPIC;
use rdkafka::{
    Message, Offset,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    delivery::{
        DeadLetterSink, Delivery, DeliveryHandler, KafkaDeadLetterSink, MessagePosition,
        MoveProcessor, Settlement,
    },
    provider::GameProvider,
    store::{DynamoGameStore, GameStore, InMemoryGameStore},
};

#[derive(Clone)]
struct ConsumerSettings {
    bootstrap_servers: String,
    moves_topic: String,
    dead_letter_topic: Option<String>,
    consumer_group_id: String,
    max_redeliveries: u32,
    redelivery_backoff: Duration,
    store_timeout: Duration,
    dynamodb_endpoint: Option<String>,
    use_dynamodb: bool,
    games_table: String,
    store_key_prefix: String,
}

impl ConsumerSettings {
    fn from_env() -> anyhow::Result<Self> {
        let dynamodb_endpoint = std::env::var("DYNAMODB_ENDPOINT").ok();
        Ok(Self {
            bootstrap_servers: std::env::var("KAFKA_BOOTSTRAP_SERVERS")
                .ok()
                .unwrap_or_else(|| "kafka:9092".to_string()),
            moves_topic: std::env::var("CHESS_MOVES_TOPIC")
                .ok()
                .unwrap_or_else(|| DEFAULT_MOVES_TOPIC.to_string()),
            dead_letter_topic: std::env::var("CHESS_MOVES_DLQ_TOPIC")
                .ok()
                .filter(|topic| !topic.trim().is_empty()),
            consumer_group_id: std::env::var("CONSUMER_GROUP_ID")
                .ok()
                .unwrap_or_else(|| "chess-consumer-v1".to_string()),
            max_redeliveries: parse_env("MAX_REDELIVERIES", 5)?,
            redelivery_backoff: Duration::from_millis(parse_env("REDELIVERY_BACKOFF_MS", 500)?),
            store_timeout: Duration::from_millis(parse_env("STORE_TIMEOUT_MS", 5000)?),
            use_dynamodb: dynamodb_endpoint.is_some() || std::env::var("AWS_REGION").is_ok(),
            dynamodb_endpoint,
            games_table: std::env::var("GAMES_TABLE")
                .ok()
                .unwrap_or_else(|| "chess_games".to_string()),
            store_key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_default(),
        })
    }
}

#[derive(Clone)]
struct HttpState {
    provider: Arc<GameProvider>,
    cancel: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "consumer_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = ConsumerSettings::from_env()?;

    let store: Arc<dyn GameStore> = if settings.use_dynamodb {
        Arc::new(
            DynamoGameStore::connect(
                settings.dynamodb_endpoint.as_deref(),
                settings.games_table.clone(),
                &settings.store_key_prefix,
            )
            .await,
        )
    } else {
        warn!("DynamoDB not configured; game boards are kept in memory only");
        Arc::new(InMemoryGameStore::default())
    };
    let provider = Arc::new(GameProvider::new(store, settings.store_timeout));

    let dead_letters = match settings.dead_letter_topic.clone() {
        Some(topic) => {
            info!(topic = %topic, "dead-letter topic enabled");
            Some(Arc::new(KafkaDeadLetterSink::new(&settings.bootstrap_servers, topic)?)
                as Arc<dyn DeadLetterSink>)
        }
        None => None,
    };
    let deliveries = Arc::new(DeliveryHandler::new(
        MoveProcessor::new(provider.clone()),
        dead_letters,
        settings.max_redeliveries,
    ));

    let cancel = CancellationToken::new();
    let consumer = {
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Any exit of the consumer, including a panic, shuts the service down.
            let _shutdown = cancel.clone().drop_guard();
            run_move_consumer(settings, deliveries, cancel).await
        })
    };

    let app = build_router(HttpState {
        provider,
        cancel: cancel.clone(),
    });
    let bind_addr = parse_bind_addr("CONSUMER_BIND", "0.0.0.0:8081")?;
    info!(%bind_addr, "consumer-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    match consumer.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(error = %error, "move consumer stopped with error"),
        Err(error) => warn!(error = %error, "move consumer task failed"),
    }
    info!("consumer-service shut down");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(error = %error, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/games/{game_id}/board", get(board_handler))
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

fn parse_env<T>(var_name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().context(format!("invalid {var_name}")),
        Err(_) => Ok(default),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "consumer-service"}))
}

async fn board_handler(
    State(state): State<HttpState>,
    Path(game_id): Path<String>,
) -> Result<Response, ApiError> {
    let game_id = Uuid::parse_str(&game_id)
        .map_err(|_| ApiError::bad_request(format!("invalid game id: {game_id}")))?;

    let board = state
        .provider
        .board(&state.cancel, game_id)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("failed to load board: {e}")))?
        .ok_or_else(|| ApiError::not_found(format!("game {game_id} not found")))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        board.to_string(),
    )
        .into_response())
}

async fn run_move_consumer(
    settings: ConsumerSettings,
    deliveries: Arc<DeliveryHandler>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &settings.bootstrap_servers)
        .set("group.id", &settings.consumer_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .context("failed to create Kafka consumer in consumer-service")?;

    consumer
        .subscribe(&[&settings.moves_topic])
        .context("failed to subscribe to chess move topic")?;
    info!(topic = %settings.moves_topic, "consumer-service Kafka consumer subscribed");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            received = consumer.recv() => match received {
                Ok(message) => message,
                Err(error) => {
                    warn!(?error, "consumer-service Kafka receive error");
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    continue;
                }
            },
        };

        let position = MessagePosition {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        };
        let delivery = Delivery {
            position: &position,
            key: message.key(),
            payload: message.payload().unwrap_or_default(),
        };

        match deliveries.handle(&cancel, delivery).await {
            Settlement::Commit => {
                if let Err(error) = consumer.commit_message(&message, CommitMode::Async) {
                    warn!(?error, offset = position.offset, "failed to commit chess move message");
                }
            }
            Settlement::Redeliver => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.redelivery_backoff) => {}
                }
                if let Err(error) = consumer.seek(
                    &position.topic,
                    position.partition,
                    Offset::Offset(position.offset),
                    Duration::from_secs(5),
                ) {
                    warn!(?error, offset = position.offset, "failed to rewind partition for redelivery");
                }
            }
            Settlement::Stop => break,
        }
    }

    info!("consumer-service Kafka consumer stopped");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
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
