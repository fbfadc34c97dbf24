use chrono::{DateTime, TimeZone, Utc};

/// EVE character id as issued by CCP.
pub type CharacterId = i64;

/// Local record of an EVE character known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    /// Cleared by the account side when a refresh is rejected upstream.
    pub valid_token: Option<bool>,
}

/// One character's OAuth grant: access token, refresh token and expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedToken {
    pub character_id: CharacterId,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl DelegatedToken {
    /// The access token is trusted until its expiry, compared at second precision.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.timestamp() <= now.timestamp()
    }

    /// Applies a refresh result. An empty refresh token keeps the stored one.
    pub fn refreshed(&self, access_token: String, refresh_token: String, expires_at: DateTime<Utc>) -> Self {
        let refresh_token = if refresh_token.is_empty() {
            self.refresh_token.clone()
        } else {
            refresh_token
        };
        Self {
            character_id: self.character_id,
            access_token,
            refresh_token,
            expires_at,
        }
    }
}

/// Row shape of the token columns in the `characters` table.
#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub id: CharacterId,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires: Option<i64>,
}

impl TokenRow {
    /// `None` when no refresh token is on file.
    pub fn into_token(self) -> Option<DelegatedToken> {
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty())?;
        let expires_at = self
            .expires
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Some(DelegatedToken {
            character_id: self.id,
            access_token: self.access_token.unwrap_or_default(),
            refresh_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires: i64) -> DelegatedToken {
        DelegatedToken {
            character_id: 123,
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: Utc.timestamp_opt(expires, 0).unwrap(),
        }
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc.timestamp_opt(1_519_933_545, 0).unwrap();
        assert!(token(1_519_933_545).is_expired_at(now));
        assert!(token(1_519_933_544).is_expired_at(now));
        assert!(!token(1_519_933_546).is_expired_at(now));
    }

    #[test]
    fn test_refreshed_keeps_refresh_token_when_empty() {
        let new_expiry = Utc.timestamp_opt(1_519_933_900, 0).unwrap();
        let updated = token(1_519_933_545).refreshed("new-token".into(), String::new(), new_expiry);
        assert_eq!(updated.access_token, "new-token");
        assert_eq!(updated.refresh_token, "rt");
        assert_eq!(updated.expires_at, new_expiry);

        let rotated = token(1).refreshed("a".into(), "rt2".into(), new_expiry);
        assert_eq!(rotated.refresh_token, "rt2");
    }

    #[test]
    fn test_token_row_without_refresh_token_is_not_found() {
        let row = TokenRow {
            id: 1,
            access_token: Some("at".into()),
            refresh_token: Some(String::new()),
            expires: Some(10),
        };
        assert!(row.into_token().is_none());

        let row = TokenRow {
            id: 1,
            access_token: None,
            refresh_token: Some("rt".into()),
            expires: None,
        };
        let token = row.into_token().unwrap();
        assert_eq!(token.access_token, "");
        assert_eq!(token.expires_at, DateTime::<Utc>::UNIX_EPOCH);
    }
}
