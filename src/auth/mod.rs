//! Authentication on both sides of the gateway: inbound application
//! credentials and outbound delegated character tokens.

pub mod app_auth;
pub mod refresher;
pub mod sso;

use chrono::{DateTime, Utc};

pub use app_auth::require_esi_app;
pub use refresher::{Resolved, TokenRefresher};
pub use sso::{RefreshError, RefreshedTokens, SsoClient};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
