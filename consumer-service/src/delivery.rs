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

//! Delivery contract between the move queue and [`GameProvider`].
//!
//! The queue delivers at least once. Each delivery is settled as one of:
//! commit (applied, or a duplicate of a move already applied here),
//! redeliver (transient store failure, bounded by `max_redeliveries`),
//! dead-letter (undecodable payloads, rejected moves, exhausted retries) or
//! stop (shutdown while the store call was in flight; left uncommitted).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use chess_common::{ChessMoveMessage, DecodeError};
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{board::Board, error::HandleMoveError, provider::GameProvider};

const APPLIED_MOVES_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub position: &'a MessagePosition,
    pub key: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub position: MessagePosition,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub reason: String,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: &DeadLetter) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Applied {
        game_id: Uuid,
        move_id: Uuid,
        board: Board,
    },
    Duplicate {
        game_id: Uuid,
        move_id: Uuid,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Handle(#[from] HandleMoveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Commit,
    Redeliver,
    Stop,
}

type MoveKey = (Uuid, Uuid);

/// Recently applied `(game_id, move_id)` pairs, oldest evicted first, plus
/// the pairs currently being handled.
struct AppliedMoves {
    ids: HashSet<MoveKey>,
    order: VecDeque<MoveKey>,
    in_flight: HashSet<MoveKey>,
    capacity: usize,
}

impl AppliedMoves {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            in_flight: HashSet::new(),
            capacity,
        }
    }

    fn reserve(&mut self, key: MoveKey) -> bool {
        if self.ids.contains(&key) {
            return false;
        }
        self.in_flight.insert(key)
    }

    fn release(&mut self, key: &MoveKey) {
        self.in_flight.remove(key);
    }

    fn complete(&mut self, key: MoveKey) {
        self.in_flight.remove(&key);
        if !self.ids.insert(key) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Decodes a move message and hands it to the provider at most once per
/// game and move id, as far as this process remembers.
pub struct MoveProcessor {
    provider: Arc<GameProvider>,
    applied: Mutex<AppliedMoves>,
}

impl MoveProcessor {
    pub fn new(provider: Arc<GameProvider>) -> Self {
        Self::with_capacity(provider, APPLIED_MOVES_CAPACITY)
    }

    fn with_capacity(provider: Arc<GameProvider>, capacity: usize) -> Self {
        Self {
            provider,
            applied: Mutex::new(AppliedMoves::new(capacity)),
        }
    }

    pub async fn process(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let message = ChessMoveMessage::decode(payload)?;
        let game_id = message.game_id();
        let move_id = message.move_id();
        let key = (game_id, move_id);

        if !self.applied.lock().await.reserve(key) {
            return Ok(DeliveryOutcome::Duplicate { game_id, move_id });
        }

        info!(
            game_id = %game_id,
            move_id = %move_id,
            mv = %message.mv(),
            sent_at = %message.chess_move.sent_at,
            published_at = %message.published_at,
            "chess move received"
        );
        let result = self
            .provider
            .handle_move(cancel, game_id, message.mv())
            .await;

        let mut applied = self.applied.lock().await;
        match result {
            Ok(board) => {
                applied.complete(key);
                Ok(DeliveryOutcome::Applied {
                    game_id,
                    move_id,
                    board,
                })
            }
            Err(error) => {
                applied.release(&key);
                Err(error.into())
            }
        }
    }
}

/// Settles each delivery against the redelivery budget and dead-letter sink.
pub struct DeliveryHandler {
    processor: MoveProcessor,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    max_redeliveries: u32,
    attempts: Mutex<HashMap<MessagePosition, u32>>,
}

impl DeliveryHandler {
    pub fn new(
        processor: MoveProcessor,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
        max_redeliveries: u32,
    ) -> Self {
        Self {
            processor,
            dead_letters,
            max_redeliveries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, cancel: &CancellationToken, delivery: Delivery<'_>) -> Settlement {
        let error = match self.processor.process(cancel, delivery.payload).await {
            Ok(DeliveryOutcome::Applied {
                game_id,
                move_id,
                board,
            }) => {
                info!(game_id = %game_id, move_id = %move_id, offset = delivery.position.offset, "chess move applied");
                debug!(game_id = %game_id, board = %board, "board after move");
                self.attempts.lock().await.remove(delivery.position);
                return Settlement::Commit;
            }
            Ok(DeliveryOutcome::Duplicate { game_id, move_id }) => {
                info!(game_id = %game_id, move_id = %move_id, offset = delivery.position.offset, "duplicate chess move skipped");
                self.attempts.lock().await.remove(delivery.position);
                return Settlement::Commit;
            }
            Err(error) => error,
        };

        match &error {
            DeliveryError::Handle(handle) if handle.is_cancelled() => {
                info!(offset = delivery.position.offset, "move handling cancelled; leaving message uncommitted");
                return Settlement::Stop;
            }
            DeliveryError::Handle(handle) if handle.is_transient() => {
                let attempt = self.record_attempt(delivery.position).await;
                if attempt <= self.max_redeliveries {
                    warn!(
                        error = %error,
                        attempt,
                        max_redeliveries = self.max_redeliveries,
                        offset = delivery.position.offset,
                        "transient failure handling chess move; redelivering"
                    );
                    return Settlement::Redeliver;
                }
            }
            _ => {}
        }

        let transient = matches!(&error, DeliveryError::Handle(handle) if handle.is_transient());
        if transient && self.dead_letters.is_none() {
            // Only poison messages may be dropped; a store outage must not lose moves.
            warn!(
                error = %error,
                offset = delivery.position.offset,
                "redeliveries exhausted and no dead-letter topic configured; redelivering"
            );
            return Settlement::Redeliver;
        }

        let reason = if transient {
            format!("redeliveries exhausted: {error}")
        } else {
            error.to_string()
        };
        self.dead_letter(delivery, reason).await
    }

    async fn record_attempt(&self, position: &MessagePosition) -> u32 {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts.entry(position.clone()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    async fn dead_letter(&self, delivery: Delivery<'_>, reason: String) -> Settlement {
        let Some(sink) = self.dead_letters.as_ref() else {
            warn!(reason = %reason, offset = delivery.position.offset, "no dead-letter topic configured; dropping poison message");
            self.attempts.lock().await.remove(delivery.position);
            return Settlement::Commit;
        };

        let letter = DeadLetter {
            position: delivery.position.clone(),
            key: delivery.key.map(<[u8]>::to_vec),
            payload: delivery.payload.to_vec(),
            reason,
        };
        match sink.dead_letter(&letter).await {
            Ok(()) => {
                warn!(reason = %letter.reason, offset = letter.position.offset, "chess move dead-lettered");
                self.attempts.lock().await.remove(delivery.position);
                Settlement::Commit
            }
            Err(error) => {
                warn!(error = %error, offset = letter.position.offset, "failed to dead-letter chess move; redelivering");
                Settlement::Redeliver
            }
        }
    }
}

#[derive(Clone)]
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(bootstrap_servers: &str, topic: String) -> anyhow::Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("failed to create Kafka dead-letter producer")?;
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn dead_letter(&self, letter: &DeadLetter) -> anyhow::Result<()> {
        let partition = letter.position.partition.to_string();
        let offset = letter.position.offset.to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "x-dead-letter-reason",
                value: Some(&letter.reason),
            })
            .insert(Header {
                key: "x-original-topic",
                value: Some(&letter.position.topic),
            })
            .insert(Header {
                key: "x-original-partition",
                value: Some(&partition),
            })
            .insert(Header {
                key: "x-original-offset",
                value: Some(&offset),
            });

        let mut record = FutureRecord::to(&self.topic)
            .payload(&letter.payload)
            .headers(headers);
        if let Some(key) = letter.key.as_ref() {
            record = record.key(key);
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(error, _)| anyhow::anyhow!("Kafka dead-letter publish failed: {error:?}"))?;
        Ok(())
    }
}
