use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AppRepository, CharacterRepository, StoreError, TokenStore};
use crate::models::{App, Character, CharacterId, DelegatedToken};

/// DashMap-backed store used by the test suites.
#[derive(Clone, Default)]
pub struct MemoryStore {
    apps: Arc<DashMap<i64, App>>,
    characters: Arc<DashMap<CharacterId, Character>>,
    tokens: Arc<DashMap<CharacterId, DelegatedToken>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_app(&self, app: App) {
        self.apps.insert(app.id, app);
    }

    pub fn insert_character(&self, character: Character) {
        self.characters.insert(character.id, character);
    }

    pub fn insert_token(&self, token: DelegatedToken) {
        self.tokens.insert(token.character_id, token);
    }

    pub fn token(&self, character_id: CharacterId) -> Option<DelegatedToken> {
        self.tokens.get(&character_id).map(|t| t.clone())
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `save` fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AppRepository for MemoryStore {
    async fn find_app(&self, id: i64) -> Result<Option<App>, StoreError> {
        Ok(self.apps.get(&id).map(|a| a.clone()))
    }
}

#[async_trait]
impl CharacterRepository for MemoryStore {
    async fn find_character(&self, id: CharacterId) -> Result<Option<Character>, StoreError> {
        Ok(self.characters.get(&id).map(|c| c.clone()))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn get(&self, character_id: CharacterId) -> Result<Option<DelegatedToken>, StoreError> {
        Ok(self
            .tokens
            .get(&character_id)
            .filter(|t| !t.refresh_token.is_empty())
            .map(|t| t.clone()))
    }

    async fn save(&self, token: &DelegatedToken) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        if !self.characters.contains_key(&token.character_id) {
            return Err(StoreError::UnknownCharacter(token.character_id));
        }
        self.tokens.insert(token.character_id, token.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn character(id: CharacterId) -> Character {
        Character {
            id,
            name: format!("C{id}"),
            valid_token: Some(true),
        }
    }

    fn token(id: CharacterId, refresh: &str) -> DelegatedToken {
        DelegatedToken {
            character_id: id,
            access_token: "at".into(),
            refresh_token: refresh.into(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_treats_empty_refresh_token_as_missing() {
        let store = MemoryStore::new();
        store.insert_character(character(1));
        store.insert_token(token(1, ""));
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_requires_known_character() {
        let store = MemoryStore::new();
        let err = store.save(&token(5, "rt")).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownCharacter(5)));

        store.insert_character(character(5));
        store.save(&token(5, "rt")).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get(5).await.unwrap().unwrap().refresh_token, "rt");
    }

    #[tokio::test]
    async fn test_failing_saves_surface_database_error() {
        let store = MemoryStore::new();
        store.insert_character(character(5));
        store.fail_saves(true);
        let err = store.save(&token(5, "rt")).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(store.save_count(), 0);
    }
}
