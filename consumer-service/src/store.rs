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

use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{Client as DynamoClient, error::DisplayErrorContext, types::AttributeValue};
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::StoreError;

/// Key-value persistence of rendered boards, keyed by game id.
///
/// `get` yields `None` for a key that was never written; only transport
/// problems are errors. `put` is an unconditional upsert.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct DynamoGameStore {
    client: DynamoClient,
    table_name: String,
    key_prefix: String,
}

impl DynamoGameStore {
    pub async fn connect(endpoint: Option<&str>, table_name: String, key_prefix: &str) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let key_prefix = normalize_key_prefix(key_prefix);

        info!(table_name = %table_name, key_prefix = %key_prefix, "DynamoDB game store enabled");
        Self {
            client: DynamoClient::new(&config),
            table_name,
            key_prefix,
        }
    }

    fn item_key(&self, key: &str) -> AttributeValue {
        AttributeValue::S(format!("{}{}", self.key_prefix, key))
    }
}

#[async_trait]
impl GameStore for DynamoGameStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("game_id", self.item_key(key))
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| {
                StoreError::Transport(format!(
                    "failed to read game board: {}",
                    DisplayErrorContext(&error)
                ))
            })?;

        Ok(output
            .item()
            .and_then(|item| item.get("board"))
            .and_then(|value| value.as_s().ok())
            .cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("game_id", self.item_key(key))
            .item("board", AttributeValue::S(value.to_string()))
            .item("updated_at", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await
            .map_err(|error| {
                StoreError::Transport(format!(
                    "failed to write game board: {}",
                    DisplayErrorContext(&error)
                ))
            })?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryGameStore {
    boards: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.boards.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.boards
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Runs a store call, giving up when `cancel` fires or `timeout` elapses.
///
/// Dropping the call future aborts the in-flight request.
pub async fn bounded<T>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => {
            outcome.map_err(|_| StoreError::TimedOut(timeout))?
        }
    }
}

pub fn normalize_key_prefix(prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_returns_none_for_missing_keys() {
        let store = InMemoryGameStore::default();
        assert_eq!(store.get("missing").await, Ok(None));

        store.put("game", "board").await.unwrap();
        store.put("game", "newer board").await.unwrap();
        assert_eq!(store.get("game").await, Ok(Some("newer board".to_string())));
    }

    #[tokio::test]
    async fn bounded_passes_through_completed_calls() {
        let cancel = CancellationToken::new();
        let value = bounded(&cancel, Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(value, Ok(7));

        let failed: Result<(), _> = bounded(&cancel, Duration::from_secs(1), async {
            Err(StoreError::Transport("refused".to_string()))
        })
        .await;
        assert_eq!(failed, Err(StoreError::Transport("refused".to_string())));
    }

    #[tokio::test]
    async fn bounded_surfaces_cancellation_promptly() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), _> =
            bounded(&cancel, Duration::from_secs(30), std::future::pending()).await;
        assert_eq!(result, Err(StoreError::Cancelled));
    }

    #[tokio::test]
    async fn bounded_times_out_hung_calls() {
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(10);
        let result: Result<(), _> = bounded(&cancel, timeout, std::future::pending()).await;
        assert_eq!(result, Err(StoreError::TimedOut(timeout)));
    }

    #[test]
    fn key_prefix_is_normalized_with_trailing_slash() {
        assert_eq!(normalize_key_prefix(""), "");
        assert_eq!(normalize_key_prefix("chess"), "chess/");
        assert_eq!(normalize_key_prefix("chess/"), "chess/");
    }
}
