use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::{Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use uuid::Uuid;

use super::paths::{is_rooted_path, EsiTarget};
use super::relay::relay;
use super::upstream::{ForwardError, ForwardRequest, ResultKind};
use crate::auth::Resolved;
use crate::errors::GatewayError;
use crate::models::{App, CharacterId};
use crate::AppState;

/// Main ESI proxy handler: authenticated app in, relayed ESI response out.
#[tracing::instrument(skip_all, fields(req_id = %Uuid::new_v4(), app_id = app.id, method = %method))]
pub async fn esi_handler(
    State(state): State<Arc<AppState>>,
    Extension(app): Extension<App>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let result = proxy_esi(&state, &app, method, &uri, body).await;
    if let Err(e) = &result {
        log_rejection(&app, e);
    }
    result
}

async fn proxy_esi(
    state: &AppState,
    app: &App,
    method: Method,
    uri: &Uri,
    body: Bytes,
) -> Result<Response, GatewayError> {
    // -- 1. Error budget --
    if state.error_limit.is_exhausted() {
        return Err(GatewayError::ErrorLimitReached);
    }

    // -- 2. Validate path --
    let target = EsiTarget::from_uri(uri);
    if target.path.is_empty() {
        return Err(GatewayError::EmptyPath);
    }
    if !is_rooted_path(&target.path) {
        return Err(GatewayError::InvalidPath);
    }
    if state.public_paths.is_public(&target.path) {
        return Err(GatewayError::PublicPath);
    }
    let raw_character = target
        .character
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(GatewayError::MissingDatasource)?;

    // -- 3. Resolve character --
    let character_id: CharacterId = raw_character
        .parse()
        .map_err(|_| GatewayError::CharacterNotFound)?;
    let character = state
        .characters
        .find_character(character_id)
        .await?
        .ok_or(GatewayError::CharacterNotFound)?;

    // -- 4. Load token --
    let token = state
        .tokens
        .get(character.id)
        .await?
        .ok_or(GatewayError::NoToken)?;

    // -- 5. Make sure the access token is usable --
    let resolved = state.refresher.resolve(token).await;
    if let Resolved::Stale { reason, .. } = &resolved {
        tracing::warn!(
            character_id = character.id,
            %reason,
            "Forwarding expired access token for {}",
            app
        );
    }
    let access_token = resolved
        .access_token()
        .map(str::to_owned)
        .ok_or(GatewayError::NoToken)?;

    // -- 6. Forward --
    let request = ForwardRequest {
        body: (method != Method::GET).then_some(body),
        method,
        path: target.path,
        params: target.params,
        access_token,
    };
    let result = match state.upstream.forward(request).await {
        Ok(result) => result,
        Err(ForwardError::PublicPath(_)) => return Err(GatewayError::PublicPath),
        Err(ForwardError::InvalidPath(_)) => return Err(GatewayError::InvalidPath),
    };

    if result.kind == ResultKind::TransportFailure {
        tracing::error!(character_id = character.id, "ESI call for {} failed", app);
    }

    // -- 7. Relay --
    Ok(relay(result))
}

fn log_rejection(app: &App, err: &GatewayError) {
    match err {
        GatewayError::ErrorLimitReached => {
            tracing::warn!("{} refused: ESI error limit reached", app)
        }
        GatewayError::NoToken => tracing::info!("{} refused: {}", app, err),
        // Logged with full context when converted into a response.
        GatewayError::Store(_) | GatewayError::Internal(_) => {}
        _ => tracing::debug!("{} refused: {}", app, err),
    }
}
