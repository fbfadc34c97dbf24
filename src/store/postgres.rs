use async_trait::async_trait;
use sqlx::PgPool;

use super::{AppRepository, CharacterRepository, StoreError, TokenStore};
use crate::models::app::AppRow;
use crate::models::character::TokenRow;
use crate::models::{App, Character, CharacterId, DelegatedToken};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Input for `esi-gateway app add`.
pub struct NewApp {
    pub name: String,
    pub secret_hash: String,
    pub roles: Vec<String>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- App Operations --

    pub async fn insert_app(&self, app: &NewApp) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO apps (name, secret_hash, roles) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&app.name)
        .bind(&app.secret_hash)
        .bind(&app.roles)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    // -- Character Operations --

    /// Creates or replaces a character together with its token triple.
    pub async fn upsert_character(
        &self,
        character: &Character,
        token: &DelegatedToken,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO characters (id, name, access_token, refresh_token, expires, valid_token)
               VALUES ($1, $2, $3, $4, $5, TRUE)
               ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name,
                   access_token = EXCLUDED.access_token,
                   refresh_token = EXCLUDED.refresh_token,
                   expires = EXCLUDED.expires,
                   valid_token = TRUE"#,
        )
        .bind(character.id)
        .bind(&character.name)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AppRepository for PgStore {
    async fn find_app(&self, id: i64) -> Result<Option<App>, StoreError> {
        let row = sqlx::query_as::<_, AppRow>(
            "SELECT id, name, secret_hash, roles FROM apps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(App::from))
    }
}

#[async_trait]
impl CharacterRepository for PgStore {
    async fn find_character(&self, id: CharacterId) -> Result<Option<Character>, StoreError> {
        let row = sqlx::query_as::<_, Character>(
            "SELECT id, name, valid_token FROM characters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn get(&self, character_id: CharacterId) -> Result<Option<DelegatedToken>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, access_token, refresh_token, expires FROM characters WHERE id = $1",
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(TokenRow::into_token))
    }

    async fn save(&self, token: &DelegatedToken) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE characters SET access_token = $2, refresh_token = $3, expires = $4 WHERE id = $1",
        )
        .bind(token.character_id)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownCharacter(token.character_id));
        }
        Ok(())
    }
}
