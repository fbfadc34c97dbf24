//! Keeps delegated access tokens usable.
//!
//! A token is only refreshed once its expiry has passed. Refreshes for the
//! same character are serialized through a per-character lease so that
//! concurrent requests do not burn the refresh token twice.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::sso::{RefreshError, SsoClient};
use super::Clock;
use crate::models::{CharacterId, DelegatedToken};
use crate::store::TokenStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Stored token was still valid, or another request refreshed it meanwhile.
    Current(String),
    Refreshed(String),
    /// Refresh failed for a transient reason; the old access token is all we have.
    Stale { access_token: String, reason: String },
    /// The identity provider rejected the refresh token.
    InvalidGrant,
}

impl Resolved {
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Resolved::Current(token) | Resolved::Refreshed(token) => Some(token),
            Resolved::Stale { access_token, .. } => Some(access_token),
            Resolved::InvalidGrant => None,
        }
    }
}

pub struct TokenRefresher {
    sso: SsoClient,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    leases: DashMap<CharacterId, Arc<Mutex<()>>>,
    lease_timeout: Duration,
}

impl TokenRefresher {
    pub fn new(
        sso: SsoClient,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            sso,
            store,
            clock,
            leases: DashMap::new(),
            lease_timeout,
        }
    }

    pub async fn resolve(&self, token: DelegatedToken) -> Resolved {
        if !token.is_expired_at(self.clock.now()) {
            return Resolved::Current(token.access_token);
        }

        let character_id = token.character_id;
        let lease = Arc::clone(&self.leases.entry(character_id).or_default());

        let guard = match tokio::time::timeout(self.lease_timeout, Arc::clone(&lease).lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!(
                    character_id,
                    "Timed out waiting for in-flight token refresh, refreshing anyway"
                );
                None
            }
        };

        let resolved = self.refresh_under_lease(token).await;

        drop(guard);
        drop(lease);
        self.leases
            .remove_if(&character_id, |_, lease| Arc::strong_count(lease) == 1);

        resolved
    }

    async fn refresh_under_lease(&self, token: DelegatedToken) -> Resolved {
        let character_id = token.character_id;

        // The previous lease holder may already have stored a fresh token.
        let current = match self.store.get(character_id).await {
            Ok(Some(stored)) if !stored.is_expired_at(self.clock.now()) => {
                tracing::debug!(character_id, "Token refreshed by a concurrent request");
                return Resolved::Current(stored.access_token);
            }
            Ok(Some(stored)) => stored,
            Ok(None) => token,
            Err(e) => {
                tracing::warn!(character_id, "Failed to re-read token before refresh: {}", e);
                token
            }
        };

        match self.sso.refresh(&current.refresh_token, self.clock.now()).await {
            Ok(tokens) => {
                let updated =
                    current.refreshed(tokens.access_token, tokens.refresh_token, tokens.expires_at);
                match self.store.save(&updated).await {
                    Ok(()) => tracing::debug!(
                        character_id,
                        expires_at = %updated.expires_at,
                        "Refreshed access token"
                    ),
                    Err(e) => tracing::error!(
                        character_id,
                        critical = true,
                        "Failed to save refreshed token: {}",
                        e
                    ),
                }
                Resolved::Refreshed(updated.access_token)
            }
            Err(RefreshError::InvalidGrant(reason)) => {
                tracing::info!(character_id, %reason, "Refresh token rejected");
                Resolved::InvalidGrant
            }
            Err(e) => {
                tracing::error!(character_id, "Token refresh failed: {}", e);
                Resolved::Stale {
                    access_token: current.access_token,
                    reason: e.to_string(),
                }
            }
        }
    }

    #[cfg(test)]
    fn lease_count(&self) -> usize {
        self.leases.len()
    }
}
