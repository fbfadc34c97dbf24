use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::GatewayError;
use crate::models::{App, Role};
use crate::AppState;

/// Hex-encoded SHA-256, the form in which application secrets are stored.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reads `Authorization: Bearer base64(<app id>:<secret>)`.
pub fn parse_credentials(headers: &HeaderMap) -> Option<(i64, String)> {
    let encoded = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.trim().parse().ok()?, secret.to_string()))
}

fn verify_secret(app: &App, secret: &str) -> bool {
    hash_secret(secret)
        .as_bytes()
        .ct_eq(app.secret_hash.as_bytes())
        .into()
}

/// Admits only applications holding the `app-esi` role. The authenticated
/// [`App`] is stored in the request extensions for the handler.
pub async fn require_esi_app(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some((app_id, secret)) = parse_credentials(req.headers()) else {
        tracing::debug!("ESI request without usable application credentials");
        return Err(GatewayError::Forbidden);
    };

    let app = match state.apps.find_app(app_id).await? {
        Some(app) if verify_secret(&app, &secret) => app,
        _ => {
            tracing::warn!(app_id, "ESI request with invalid application credentials");
            return Err(GatewayError::Forbidden);
        }
    };

    if !app.has_role(&Role::AppEsi) {
        tracing::info!("{} lacks the app-esi role", app);
        return Err(GatewayError::Forbidden);
    }

    req.extensions_mut().insert(app);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_parse_credentials() {
        let encoded = STANDARD.encode("7:s3cr:et");
        assert_eq!(
            parse_credentials(&headers(&format!("Bearer {encoded}"))),
            Some((7, "s3cr:et".to_string()))
        );
    }

    #[test]
    fn test_parse_credentials_rejects_garbage() {
        assert_eq!(parse_credentials(&HeaderMap::new()), None);
        assert_eq!(parse_credentials(&headers("Basic Nzpz")), None);
        assert_eq!(parse_credentials(&headers("Bearer !!!")), None);
        let no_colon = STANDARD.encode("7secret");
        assert_eq!(parse_credentials(&headers(&format!("Bearer {no_colon}"))), None);
        let bad_id = STANDARD.encode("seven:secret");
        assert_eq!(parse_credentials(&headers(&format!("Bearer {bad_id}"))), None);
    }

    #[test]
    fn test_verify_secret() {
        let app = App {
            id: 1,
            name: "Test".into(),
            secret_hash: hash_secret("correct"),
            roles: vec![Role::AppEsi],
        };
        assert!(verify_secret(&app, "correct"));
        assert!(!verify_secret(&app, "wrong"));
        assert_eq!(app.secret_hash.len(), 64);
    }
}
