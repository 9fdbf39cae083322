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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MOVES_TOPIC: &str = "chess.moves.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChessMove {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub game_id: Uuid,
    #[serde(rename = "move")]
    pub mv: String,
}

impl ChessMove {
    pub fn into_message(self, published_at: DateTime<Utc>) -> ChessMoveMessage {
        ChessMoveMessage {
            chess_move: self,
            published_at,
        }
    }
}

/// Queue envelope carried between the producer and the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChessMoveMessage {
    #[serde(flatten)]
    pub chess_move: ChessMove,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message payload is empty")]
    EmptyPayload,
    #[error("malformed move message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ChessMoveMessage {
    pub fn game_id(&self) -> Uuid {
        self.chess_move.game_id
    }

    pub fn move_id(&self) -> Uuid {
        self.chess_move.id
    }

    pub fn mv(&self) -> &str {
        &self.chess_move.mv
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMoveResponse {
    pub accepted: bool,
    pub move_id: Uuid,
    pub game_id: Uuid,
    pub queued_at: DateTime<Utc>,
}
