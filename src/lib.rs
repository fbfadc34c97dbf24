//! ESI gateway: lets registered applications call authenticated EVE Swagger
//! Interface routes on behalf of characters whose tokens the gateway holds.

pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;

use auth::{SsoClient, SystemClock, TokenRefresher};
use config::Config;
use proxy::error_limit::ErrorBudgetGate;
use proxy::paths::{PublicPaths, ESI_PREFIX};
use proxy::upstream::UpstreamClient;
use store::{AppRepository, CharacterRepository, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub apps: Arc<dyn AppRepository>,
    pub characters: Arc<dyn CharacterRepository>,
    pub tokens: Arc<dyn TokenStore>,
    pub refresher: TokenRefresher,
    pub upstream: UpstreamClient,
    pub error_limit: ErrorBudgetGate,
    pub public_paths: PublicPaths,
}

impl AppState {
    pub fn new(
        config: Config,
        apps: Arc<dyn AppRepository>,
        characters: Arc<dyn CharacterRepository>,
        tokens: Arc<dyn TokenStore>,
    ) -> anyhow::Result<Self> {
        let public_paths =
            PublicPaths::new(&config.public_paths[..]).context("invalid public path pattern")?;
        let error_limit = ErrorBudgetGate::new(config.error_limit_threshold);
        let upstream = UpstreamClient::new(&config, public_paths.clone(), error_limit.clone())?;
        let refresher = TokenRefresher::new(
            SsoClient::new(&config)?,
            Arc::clone(&tokens),
            Arc::new(SystemClock),
            config.refresh_lease_timeout,
        );

        Ok(Self {
            config,
            apps,
            characters,
            tokens,
            refresher,
            upstream,
            error_limit,
            public_paths,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let esi = Router::new()
        .route(
            ESI_PREFIX,
            get(proxy::handler::esi_handler).post(proxy::handler::esi_handler),
        )
        .route(
            &format!("{ESI_PREFIX}/*path"),
            get(proxy::handler::esi_handler).post(proxy::handler::esi_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_esi_app,
        ));

    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .merge(esi)
        .with_state(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
