//! Application configuration loaded from environment variables.
//!
//! Values may also come from a `.env` file next to the binary. The remote
//! endpoint and its public key are optional; without them the engine runs
//! purely on on-device storage.

use crate::services::backend::BackendPreference;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default table holding one progress row per user.
pub const DEFAULT_PROGRESS_TABLE: &str = "user_progress";

/// Default debounce interval for progress writes.
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 5_000;

/// Endpoint and public key of the relational-API backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project URL without trailing slash
    pub url: String,
    /// Public API key sent as the `apikey` header
    pub anon_key: String,
}

/// Configuration consumed by the sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote credentials, present only when both URL and key are set
    pub remote: Option<RemoteConfig>,
    /// Table that stores progress documents
    pub progress_table: String,
    /// Which persistence backend to use
    pub backend: BackendPreference,
    /// Directory for on-device storage
    pub data_dir: PathBuf,
    /// Delay before a dirty progress document is written
    pub save_debounce: Duration,
    /// Timeout for every HTTP call
    pub http_timeout: Duration,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            remote: None,
            progress_table: DEFAULT_PROGRESS_TABLE.to_string(),
            backend: BackendPreference::Local,
            data_dir: PathBuf::from(".lingua"),
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| normalize_value(lookup(name).as_deref()))
        };

        let url = read(&["LINGUA_REMOTE_URL", "SUPABASE_URL"])
            .map(|u| u.trim_end_matches('/').to_string());
        let anon_key = read(&["LINGUA_REMOTE_ANON_KEY", "SUPABASE_ANON_KEY"]);

        if let Some(url) = &url {
            warn_on_suspicious_url(url);
        }

        let remote = match (url, anon_key) {
            (Some(url), Some(anon_key)) => Some(RemoteConfig { url, anon_key }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("Remote backend only partially configured, ignoring it");
                None
            }
            (None, None) => None,
        };

        let backend = match read(&["LINGUA_DATA_BACKEND"]) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %value, "Unknown data backend, using auto-detection");
                BackendPreference::Auto
            }),
            None => BackendPreference::Auto,
        };

        Self {
            remote,
            progress_table: read(&["LINGUA_PROGRESS_TABLE"])
                .unwrap_or_else(|| DEFAULT_PROGRESS_TABLE.to_string()),
            backend,
            data_dir: read(&["LINGUA_DATA_DIR"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".lingua")),
            save_debounce: Duration::from_millis(
                read(&["LINGUA_SAVE_DEBOUNCE_MS"])
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_SAVE_DEBOUNCE_MS),
            ),
            http_timeout: Duration::from_secs(
                read(&["LINGUA_HTTP_TIMEOUT_SECS"])
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
            ),
        }
    }

    /// True when remote credentials are available.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

/// Trim a raw value and treat blanks and `undefined`/`null` as absent.
fn normalize_value(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("undefined")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return None;
    }
    Some(trimmed.to_string())
}

fn warn_on_suspicious_url(url: &str) {
    if url.contains("your-project") {
        tracing::warn!(url = %url, "Remote URL still points at the placeholder project");
    }
    let malformed = url.ends_with("://")
        || url.contains("://http")
        || !(url.starts_with("http://") || url.starts_with("https://"));
    if malformed {
        tracing::warn!(url = %url, "Remote URL looks malformed, expected https://<project>.<host>");
    }
}
