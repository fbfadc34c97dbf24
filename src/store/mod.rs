//! Storage collaborators: applications, characters and their delegated tokens.
//!
//! Each concern is a trait so the gateway can run against Postgres in
//! production and against [`memory::MemoryStore`] in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{App, Character, CharacterId, DelegatedToken};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("character {0} does not exist")]
    UnknownCharacter(CharacterId),
}

#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn find_app(&self, id: i64) -> Result<Option<App>, StoreError>;
}

#[async_trait]
pub trait CharacterRepository: Send + Sync {
    /// Eagerly loads the character record, `None` when unknown.
    async fn find_character(&self, id: CharacterId) -> Result<Option<Character>, StoreError>;
}

/// Per-character OAuth token persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// `None` when the character is unknown or has no refresh token recorded.
    async fn get(&self, character_id: CharacterId) -> Result<Option<DelegatedToken>, StoreError>;

    /// Single atomic write of the whole token triple.
    async fn save(&self, token: &DelegatedToken) -> Result<(), StoreError>;
}
