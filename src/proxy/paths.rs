//! Inbound path parsing and the public-route deny list.

use axum::http::Uri;
use regex::Regex;

/// Mount point of the gateway endpoint.
pub const ESI_PREFIX: &str = "/api/app/v1/esi";

/// Query parameter carrying the character id (gateway sense of "datasource").
pub const CHARACTER_PARAM: &str = "datasource";

/// Query parameter carrying the whole ESI path and query as one encoded string.
pub const PATH_QUERY_PARAM: &str = "esi-path-query";

/// ESI routes that need no authentication. Matched without the version segment.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/alliances/",
    "/alliances/[0-9]+/",
    "/alliances/[0-9]+/corporations/",
    "/alliances/[0-9]+/icons/",
    "/characters/[0-9]+/",
    "/characters/[0-9]+/corporationhistory/",
    "/characters/[0-9]+/portrait/",
    "/characters/affiliation/",
    "/contracts/public/[0-9]+/",
    "/contracts/public/bids/[0-9]+/",
    "/contracts/public/items/[0-9]+/",
    "/corporations/[0-9]+/",
    "/corporations/[0-9]+/alliancehistory/",
    "/corporations/[0-9]+/icons/",
    "/corporations/npccorps/",
    "/dogma/attributes/",
    "/dogma/attributes/[0-9]+/",
    "/dogma/dynamic/items/[0-9]+/[0-9]+/",
    "/dogma/effects/",
    "/dogma/effects/[0-9]+/",
    "/fw/leaderboards/",
    "/fw/leaderboards/characters/",
    "/fw/leaderboards/corporations/",
    "/fw/stats/",
    "/fw/systems/",
    "/fw/wars/",
    "/incursions/",
    "/industry/facilities/",
    "/industry/systems/",
    "/insurance/prices/",
    "/killmails/[0-9]+/[0-9a-f]+/",
    "/loyalty/stores/[0-9]+/offers/",
    "/markets/[0-9]+/history/",
    "/markets/[0-9]+/orders/",
    "/markets/[0-9]+/types/",
    "/markets/groups/",
    "/markets/groups/[0-9]+/",
    "/markets/prices/",
    "/opportunities/groups/",
    "/opportunities/groups/[0-9]+/",
    "/opportunities/tasks/",
    "/opportunities/tasks/[0-9]+/",
    "/route/[0-9]+/[0-9]+/",
    "/sovereignty/campaigns/",
    "/sovereignty/map/",
    "/sovereignty/structures/",
    "/status/",
    "/universe/(ancestries|bloodlines|categories|constellations|factions|graphics|groups|races|regions|systems|types)/",
    "/universe/(categories|constellations|graphics|groups|regions|systems|types)/[0-9]+/",
    "/universe/(asteroid_belts|moons|planets|schematics|stargates|stars|stations)/[0-9]+/",
    "/universe/ids/",
    "/universe/names/",
    "/universe/structures/",
    "/universe/system_jumps/",
    "/universe/system_kills/",
    "/wars/",
    "/wars/[0-9]+/",
    "/wars/[0-9]+/killmails/",
];

/// Compiled public-route patterns, each anchored at both ends.
#[derive(Debug, Clone)]
pub struct PublicPaths {
    patterns: Vec<Regex>,
}

impl PublicPaths {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^{}$", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// `esi_path` includes the version segment (`/latest/status/`) and maybe a query.
    pub fn is_public(&self, esi_path: &str) -> bool {
        let path = esi_path.split('?').next().unwrap_or_default();
        let unversioned = strip_version(path);
        self.patterns.iter().any(|re| re.is_match(unversioned))
    }
}

/// Drops the leading `/v1`, `/latest`, ... segment. Paths with a single segment are kept.
fn strip_version(path: &str) -> &str {
    match path.get(1..).and_then(|rest| rest.find('/')) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// ESI paths are appended to the configured host, so they must start with
/// exactly one `/`. Anything else could move the request to another host.
pub fn is_rooted_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//")
}

/// What the caller asked the gateway to forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsiTarget {
    /// Upstream path, possibly with its own query when given via `esi-path-query`.
    pub path: String,
    /// Caller query parameters to forward, the character selector excluded.
    pub params: Vec<(String, String)>,
    /// Raw value of the character selector, if present.
    pub character: Option<String>,
}

impl EsiTarget {
    /// Supports both `/api/app/v1/esi/<path>?...` and `/api/app/v1/esi?esi-path-query=...`.
    pub fn from_uri(uri: &Uri) -> Self {
        let query: Vec<(String, String)> = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let character = query
            .iter()
            .find(|(k, _)| k == CHARACTER_PARAM)
            .map(|(_, v)| v.clone());

        let embedded = uri
            .path()
            .strip_prefix(ESI_PREFIX)
            .filter(|rest| rest.len() > 1);

        match embedded {
            Some(path) => Self {
                path: path.to_string(),
                params: query
                    .into_iter()
                    .filter(|(k, _)| k != CHARACTER_PARAM)
                    .collect(),
                character,
            },
            None => Self {
                path: query
                    .iter()
                    .find(|(k, _)| k == PATH_QUERY_PARAM)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
                params: Vec::new(),
                character,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PublicPaths {
        PublicPaths::new(DEFAULT_PUBLIC_PATHS).unwrap()
    }

    #[test]
    fn test_public_paths_ignore_version_segment() {
        let paths = defaults();
        assert!(paths.is_public("/latest/status/"));
        assert!(paths.is_public("/v4/alliances/99000006/"));
        assert!(paths.is_public("/v1/universe/types/587/?language=en"));
        assert!(!paths.is_public("/latest/characters/96061222/stats/"));
        assert!(!paths.is_public("/v3/characters/96061222/assets/"));
        assert!(!paths.is_public("/v2/universe/structures/1022734985679/"));
    }

    #[test]
    fn test_public_paths_are_anchored() {
        let paths = PublicPaths::new(&["/status/"]).unwrap();
        assert!(paths.is_public("/latest/status/"));
        assert!(!paths.is_public("/latest/status/extra/"));
        assert!(!paths.is_public("/status/"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(PublicPaths::new(&["/bad/(unclosed/"]).is_err());
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("/v3/characters/1/"), "/characters/1/");
        assert_eq!(strip_version("/status"), "/status");
        assert_eq!(strip_version(""), "");
    }

    #[test]
    fn test_rooted_paths() {
        assert!(is_rooted_path("/v3/characters/1/assets/"));
        assert!(is_rooted_path("/v1/characters/1/@x/"));
        assert!(!is_rooted_path("@127.0.0.1:8080/v1/steal/"));
        assert!(!is_rooted_path(".evil.com/v1/steal/"));
        assert!(!is_rooted_path("//evil.com/v1/steal/"));
        assert!(!is_rooted_path("v3/characters/1/assets/"));
    }

    #[test]
    fn test_target_from_embedded_path() {
        let uri: Uri = "/api/app/v1/esi/v3/characters/96061222/assets/?page=1&datasource=123"
            .parse()
            .unwrap();
        let target = EsiTarget::from_uri(&uri);
        assert_eq!(target.path, "/v3/characters/96061222/assets/");
        assert_eq!(target.params, vec![("page".to_string(), "1".to_string())]);
        assert_eq!(target.character.as_deref(), Some("123"));
    }

    #[test]
    fn test_target_from_path_query_param() {
        let uri: Uri = "/api/app/v1/esi?esi-path-query=%2Fv3%2Fcharacters%2F96061222%2Fassets%2F%3Fpage%3D1&datasource=123"
            .parse()
            .unwrap();
        let target = EsiTarget::from_uri(&uri);
        assert_eq!(target.path, "/v3/characters/96061222/assets/?page=1");
        assert!(target.params.is_empty());
        assert_eq!(target.character.as_deref(), Some("123"));
    }

    #[test]
    fn test_target_without_path_is_empty() {
        let target = EsiTarget::from_uri(&"/api/app/v1/esi".parse().unwrap());
        assert_eq!(target, EsiTarget::default());

        let target = EsiTarget::from_uri(&"/api/app/v1/esi/?datasource=1".parse().unwrap());
        assert!(target.path.is_empty());
        assert_eq!(target.character.as_deref(), Some("1"));
    }
}
