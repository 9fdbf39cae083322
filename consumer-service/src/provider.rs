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

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{
    board::Board,
    error::{HandleMoveError, StoreError},
    game::Game,
    store::{GameStore, bounded},
};

/// Applies moves to persisted games with a read-modify-write per move.
///
/// Moves for the same game id are serialised within this process. There is
/// no version check against the store, so two processes applying moves to
/// one game concurrently can still overwrite each other.
pub struct GameProvider {
    store: Arc<dyn GameStore>,
    store_timeout: Duration,
    game_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl GameProvider {
    pub fn new(store: Arc<dyn GameStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            game_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn game_lock(&self, game_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.game_locks.lock().await;
        locks
            .entry(game_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the game's lock entry once no other task holds or awaits it.
    async fn release_game_lock(&self, game_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.game_locks.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&game_id);
        }
    }

    pub async fn board(
        &self,
        cancel: &CancellationToken,
        game_id: Uuid,
    ) -> Result<Option<Board>, StoreError> {
        let key = game_id.to_string();
        let stored = bounded(cancel, self.store_timeout, self.store.get(&key)).await?;
        Ok(stored
            .filter(|text| !text.is_empty())
            .map(|text| Board::from_text(&text)))
    }

    /// Applies `mv` to the game and persists the result.
    ///
    /// A game with no stored board starts from the standard position. The
    /// store is written only when the move is accepted.
    pub async fn handle_move(
        &self,
        cancel: &CancellationToken,
        game_id: Uuid,
        mv: &str,
    ) -> Result<Board, HandleMoveError> {
        let lock = self.game_lock(game_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_and_persist(cancel, game_id, mv).await
        };
        self.release_game_lock(game_id, lock).await;
        result
    }

    async fn apply_and_persist(
        &self,
        cancel: &CancellationToken,
        game_id: Uuid,
        mv: &str,
    ) -> Result<Board, HandleMoveError> {
        let board = self
            .board(cancel, game_id)
            .await?
            .unwrap_or_else(Board::starting);
        let mut game = Game::new(game_id, board);
        game.apply_move(mv)?;

        let key = game.id().to_string();
        let text = game.board().to_string();
        bounded(cancel, self.store_timeout, self.store.put(&key, &text)).await?;
        debug!(game_id = %game_id, mv = %mv, "game board persisted");
        Ok(*game.board())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::MoveError, store::InMemoryGameStore};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum StoreCall {
        Get(String),
        Put(String, String),
    }

    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryGameStore,
        calls: StdMutex<Vec<StoreCall>>,
        fail_get: bool,
        hang_put: bool,
        get_delay: Option<Duration>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().unwrap().clone()
        }

        fn puts(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, StoreCall::Put(..)))
                .count()
        }
    }

    #[async_trait]
    impl GameStore for RecordingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(StoreCall::Get(key.to_string()));
            if let Some(delay) = self.get_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_get {
                return Err(StoreError::Transport("connection refused".to_string()));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(StoreCall::Put(key.to_string(), value.to_string()));
            if self.hang_put {
                std::future::pending::<()>().await;
            }
            self.inner.put(key, value).await
        }
    }

    fn provider(store: Arc<RecordingStore>) -> GameProvider {
        GameProvider::new(store, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn new_game_starts_from_the_standard_position() {
        let store = Arc::new(RecordingStore::default());
        let provider = provider(store.clone());
        let cancel = CancellationToken::new();
        let game_id = Uuid::new_v4();

        let board = provider.handle_move(&cancel, game_id, "e2e4").await.unwrap();

        let expected = Board::starting().apply_move("e2e4").unwrap();
        assert_eq!(board, expected);
        assert_eq!(
            store.get(&game_id.to_string()).await,
            Ok(Some(expected.to_string()))
        );
        assert_eq!(
            store.calls()[..2],
            [
                StoreCall::Get(game_id.to_string()),
                StoreCall::Put(game_id.to_string(), expected.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn stored_board_is_loaded_before_applying_the_move() {
        let store = Arc::new(RecordingStore::default());
        let game_id = Uuid::new_v4();
        let stored = Board::from_text("\n\n\n\n\n     ♘\n\n");
        store
            .inner
            .put(&game_id.to_string(), &stored.to_string())
            .await
            .unwrap();
        let provider = provider(store.clone());

        let board = provider
            .handle_move(&CancellationToken::new(), game_id, "f3e5")
            .await
            .unwrap();

        assert_eq!(board, Board::from_text("\n\n\n    ♘\n\n\n\n"));
    }

    #[tokio::test]
    async fn empty_stored_text_counts_as_not_started() {
        let store = Arc::new(RecordingStore::default());
        let game_id = Uuid::new_v4();
        store.inner.put(&game_id.to_string(), "").await.unwrap();
        let provider = provider(store);

        let board = provider
            .handle_move(&CancellationToken::new(), game_id, "a2a4")
            .await
            .unwrap();
        assert_eq!(board, Board::starting().apply_move("a2a4").unwrap());
    }

    #[tokio::test]
    async fn rejected_move_is_never_written() {
        let store = Arc::new(RecordingStore::default());
        let provider = provider(store.clone());
        let game_id = Uuid::new_v4();

        let err = provider
            .handle_move(&CancellationToken::new(), game_id, "a3a4")
            .await
            .unwrap_err();

        assert!(matches!(err, HandleMoveError::Move(MoveError::SquareEmpty)));
        assert_eq!(store.calls(), vec![StoreCall::Get(game_id.to_string())]);
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn store_read_failure_propagates_without_write() {
        let store = Arc::new(RecordingStore {
            fail_get: true,
            ..Default::default()
        });
        let provider = provider(store.clone());

        let err = provider
            .handle_move(&CancellationToken::new(), Uuid::new_v4(), "e2e4")
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_a_hung_write() {
        let store = Arc::new(RecordingStore {
            hang_put: true,
            ..Default::default()
        });
        let provider = provider(store.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = provider
            .handle_move(&cancel, Uuid::new_v4(), "e2e4")
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn hung_write_times_out() {
        let store = Arc::new(RecordingStore {
            hang_put: true,
            ..Default::default()
        });
        let provider = GameProvider::new(store, Duration::from_millis(20));

        let err = provider
            .handle_move(&CancellationToken::new(), Uuid::new_v4(), "e2e4")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HandleMoveError::Store(StoreError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_moves_for_one_game_do_not_lose_updates() {
        let store = Arc::new(RecordingStore {
            get_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let provider = Arc::new(provider(store.clone()));
        let game_id = Uuid::new_v4();

        let tasks: Vec<_> = ["a2a3", "h2h3", "b1c3"]
            .into_iter()
            .map(|mv| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    provider
                        .handle_move(&CancellationToken::new(), game_id, mv)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let board = provider
            .board(&CancellationToken::new(), game_id)
            .await
            .unwrap()
            .unwrap();
        let expected = Board::starting()
            .apply_move("a2a3")
            .and_then(|b| b.apply_move("h2h3"))
            .and_then(|b| b.apply_move("b1c3"))
            .unwrap();
        assert_eq!(board, expected);
        assert!(provider.game_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn game_locks_are_released_after_each_move() {
        let provider = provider(Arc::new(RecordingStore::default()));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            provider
                .handle_move(&cancel, Uuid::new_v4(), "e2e4")
                .await
                .unwrap();
        }
        let err = provider
            .handle_move(&cancel, Uuid::new_v4(), "zz")
            .await
            .unwrap_err();

        assert!(matches!(err, HandleMoveError::Move(MoveError::InvalidMove)));
        assert!(provider.game_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn board_is_none_for_unknown_games() {
        let provider = provider(Arc::new(RecordingStore::default()));
        let board = provider
            .board(&CancellationToken::new(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(board, None);
    }
}
