use std::time::Duration;

use anyhow::Context;

use crate::proxy::paths::DEFAULT_PUBLIC_PATHS;

/// Immutable gateway configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Base URL of ESI, without a trailing slash.
    pub esi_host: String,
    /// Upstream server datasource appended to every forwarded request.
    pub esi_datasource: String,
    pub sso_token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub upstream_timeout: Duration,
    /// Requests are refused while the remaining ESI error budget is at or below this.
    pub error_limit_threshold: i64,
    /// Longest wait for another request's in-flight refresh of the same character.
    pub refresh_lease_timeout: Duration,
    /// Regex patterns of public ESI routes, without the version segment.
    pub public_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/esi_gateway".into(),
            esi_host: "https://esi.evetech.net".into(),
            esi_datasource: "tranquility".into(),
            sso_token_url: "https://login.eveonline.com/v2/oauth/token".into(),
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: format!("esi-gateway/{}", env!("CARGO_PKG_VERSION")),
            upstream_timeout: Duration::from_secs(30),
            error_limit_threshold: 20,
            refresh_lease_timeout: Duration::from_secs(10),
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let client_id = std::env::var("EVE_CLIENT_ID").unwrap_or_default();
    let client_secret = std::env::var("EVE_CLIENT_SECRET").unwrap_or_default();
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        eprintln!("⚠️  EVE_CLIENT_ID / EVE_CLIENT_SECRET not set, token refresh will fail.");
    }

    let public_paths = match std::env::var("ESI_PUBLIC_PATHS_FILE") {
        Ok(path) => load_public_paths(&path)?,
        Err(_) => defaults.public_paths,
    };

    Ok(Config {
        port: env_parse("ESI_GATEWAY_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        esi_host: std::env::var("ESI_HOST")
            .map(|h| h.trim_end_matches('/').to_string())
            .unwrap_or(defaults.esi_host),
        esi_datasource: std::env::var("ESI_DATASOURCE").unwrap_or(defaults.esi_datasource),
        sso_token_url: std::env::var("EVE_SSO_TOKEN_URL").unwrap_or(defaults.sso_token_url),
        client_id,
        client_secret,
        user_agent: std::env::var("ESI_USER_AGENT").unwrap_or(defaults.user_agent),
        upstream_timeout: Duration::from_secs(env_parse("ESI_UPSTREAM_TIMEOUT_SECS", 30)),
        error_limit_threshold: env_parse("ESI_ERROR_LIMIT_THRESHOLD", defaults.error_limit_threshold),
        refresh_lease_timeout: Duration::from_secs(env_parse("ESI_REFRESH_LEASE_SECS", 10)),
        public_paths,
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Reads a YAML list of public path patterns.
pub fn load_public_paths(path: &str) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read public path list {path}"))?;
    parse_public_paths(&raw).with_context(|| format!("invalid public path list {path}"))
}

fn parse_public_paths(raw: &str) -> anyhow::Result<Vec<String>> {
    let paths: Vec<String> = serde_yaml::from_str(raw)?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.esi_datasource, "tranquility");
        assert_eq!(cfg.error_limit_threshold, 20);
        assert!(!cfg.public_paths.is_empty());
        assert!(!cfg.esi_host.ends_with('/'));
    }

    #[test]
    fn test_parse_public_paths_yaml() {
        let paths = parse_public_paths("- /status/\n- /alliances/[0-9]+/\n").unwrap();
        assert_eq!(paths, vec!["/status/", "/alliances/[0-9]+/"]);
        assert!(parse_public_paths("status: 1").is_err());
    }
}
