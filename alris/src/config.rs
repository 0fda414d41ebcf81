//! Client configuration from the environment.

use std::path::PathBuf;

/// Directory under the home directory for persisted client state.
pub const DATA_DIR: &str = ".alris";

/// Default command API endpoint for local development.
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Runtime configuration for the client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the command gateway.
    pub api_url: String,
    /// Base URL of the identity provider, if configured.
    pub auth_url: Option<String>,
    /// Publishable API key sent with identity-provider requests.
    pub auth_key: Option<String>,
}

impl Config {
    /// Load configuration from `ALRIS_API_URL`, `ALRIS_AUTH_URL`, and
    /// `ALRIS_AUTH_KEY`.
    pub fn from_env() -> Self {
        let api_url = std::env::var("ALRIS_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| DEFAULT_API_URL.to_string(), |v| normalize_base(&v));

        let auth_url = std::env::var("ALRIS_AUTH_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| normalize_base(&v));

        let auth_key = std::env::var("ALRIS_AUTH_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Self {
            api_url,
            auth_url,
            auth_key,
        }
    }

    /// Data directory for persisted client state (`~/.alris`).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DATA_DIR))
    }
}

/// Strip trailing slashes so URL joins stay single-slashed.
fn normalize_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize_base("http://localhost:8000/"), "http://localhost:8000");
        assert_eq!(normalize_base(" https://api.alris.app "), "https://api.alris.app");
        assert_eq!(normalize_base("https://api.alris.app"), "https://api.alris.app");
    }
}
