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

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("invalid move")]
    InvalidMove,
    #[error("invalid square")]
    InvalidSquare,
    #[error("square is empty")]
    SquareEmpty,
    #[error("pieces are of the same color")]
    SameColor,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),
    #[error("store call cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum HandleMoveError {
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandleMoveError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Transport(_) | StoreError::TimedOut(_))
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Store(StoreError::Cancelled))
    }
}
