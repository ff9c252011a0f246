use std::env;

/// Runtime configuration, read once at startup from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secret the Messenger platform echoes back on webhook verification.
    pub verify_token: String,
    /// Page access token for outbound Graph API calls.
    pub page_access_token: String,
    /// Admin secret gating the `/users` listing. Unset means always denied.
    pub admin_secret: Option<String>,
    /// Path of the SQLite document store.
    pub db_path: String,
    /// Directory the voice blobs are written to.
    pub voices_dir: String,
    /// Timeout applied to every outbound HTTP request.
    pub http_timeout_secs: u64,
    /// Base URL of the Messenger Graph API.
    pub graph_api_base: String,
    /// Port the webhook server binds to.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            verify_token: env_or("FB_VERIFY_TOKEN", "default"),
            page_access_token: env_or("FB_PAGE_ACCESS_TOKEN", "default"),
            admin_secret: env::var("SECRET").ok(),
            db_path: env_or("WEAVER_DB_PATH", "data/weaver.db"),
            voices_dir: env_or("WEAVER_VOICES_DIR", "voices"),
            http_timeout_secs: env::var("WEAVER_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            graph_api_base: env_or("GRAPH_API_BASE", "https://graph.facebook.com/v19.0"),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
