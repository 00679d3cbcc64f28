//! Game persistence

use crate::error::{PickupError, Result};
use crate::game::model::Game;
use crate::types::GameId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage backend for games
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Persist a newly created game
    async fn insert(&self, game: Game) -> Result<()>;

    /// Look up a game by ID
    async fn find(&self, game_id: GameId) -> Result<Option<Game>>;

    /// Persist an updated game
    async fn save(&self, game: &Game) -> Result<()>;

    /// All games, in no particular order
    async fn all(&self) -> Result<Vec<Game>>;

    /// The non-terminal game the player takes part in, if any
    async fn active_game_for_player(&self, player_id: &str) -> Result<Option<Game>>;

    /// Highest game number handed out so far
    async fn max_game_number(&self) -> Result<u64>;
}

/// In-memory game store
#[derive(Debug, Default)]
pub struct InMemoryGameStore {
    games: RwLock<HashMap<GameId, Game>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<GameId, Game>>> {
        self.games.read().map_err(|_| {
            PickupError::InternalError {
                message: "Failed to acquire game store lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<GameId, Game>>> {
        self.games.write().map_err(|_| {
            PickupError::InternalError {
                message: "Failed to acquire game store lock".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn insert(&self, game: Game) -> Result<()> {
        self.write()?.insert(game.id, game);
        Ok(())
    }

    async fn find(&self, game_id: GameId) -> Result<Option<Game>> {
        Ok(self.read()?.get(&game_id).cloned())
    }

    async fn save(&self, game: &Game) -> Result<()> {
        self.write()?.insert(game.id, game.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Game>> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn active_game_for_player(&self, player_id: &str) -> Result<Option<Game>> {
        Ok(self
            .read()?
            .values()
            .find(|game| !game.state.is_terminal() && game.involves(player_id))
            .cloned())
    }

    async fn max_game_number(&self) -> Result<u64> {
        Ok(self.read()?.values().map(|g| g.number).max().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::GameState;
    use crate::types::{GamePlayer, PlayerStatus};
    use crate::utils::{current_timestamp, generate_game_id};

    fn game(number: u64, player_id: &str) -> Game {
        Game::new(
            generate_game_id(),
            number,
            current_timestamp(),
            "cp_badlands".to_string(),
            vec![GamePlayer {
                player_id: player_id.to_string(),
                game_class: "medic".to_string(),
                team_id: 0,
                status: PlayerStatus::Active,
            }],
        )
    }

    #[tokio::test]
    async fn test_insert_find_and_save() {
        let store = InMemoryGameStore::new();
        let mut stored = game(1, "p1");
        let id = stored.id;
        store.insert(stored.clone()).await.unwrap();

        assert_eq!(store.find(id).await.unwrap().unwrap().number, 1);
        assert!(store.find(generate_game_id()).await.unwrap().is_none());

        stored.state = GameState::Started;
        store.save(&stored).await.unwrap();
        assert_eq!(
            store.find(id).await.unwrap().unwrap().state,
            GameState::Started
        );
    }

    #[tokio::test]
    async fn test_active_game_lookup_skips_terminal_games() {
        let store = InMemoryGameStore::new();
        let mut ended = game(1, "p1");
        ended.state = GameState::Ended;
        store.insert(ended).await.unwrap();
        assert!(store
            .active_game_for_player("p1")
            .await
            .unwrap()
            .is_none());

        store.insert(game(2, "p1")).await.unwrap();
        let active = store.active_game_for_player("p1").await.unwrap().unwrap();
        assert_eq!(active.number, 2);
        assert!(store
            .active_game_for_player("p2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_max_game_number() {
        let store = InMemoryGameStore::new();
        assert_eq!(store.max_game_number().await.unwrap(), 0);
        store.insert(game(3, "p1")).await.unwrap();
        store.insert(game(7, "p2")).await.unwrap();
        assert_eq!(store.max_game_number().await.unwrap(), 7);
    }
}
