use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub cache: CacheConfig,

    /// Upstream credentials. Never written back to disk.
    #[serde(skip_serializing)]
    pub providers: ProvidersConfig,

    pub scheduler: SchedulerConfig,

    pub workers: WorkersConfig,

    pub proxy: ProxyConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// `development` or `production` (`APP_ENV`)
    pub env: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 4)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Settings consumed only by collaborators outside the core
    /// (image store, mailer, cookie domain, desktop releases).
    #[serde(skip_serializing)]
    pub extra: HashMap<String, String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            log_level: "info".to_string(),
            worker_threads: 4,
            extra: HashMap::new(),
        }
    }
}

impl GeneralConfig {
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    /// `*` allows any origin.
    pub allowed_origins: Vec<String>,

    pub frontend_url: String,

    pub api_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            frontend_url: "http://localhost:3000".to_string(),
            api_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string (`DATABASE_URL`). Required.
    #[serde(skip_serializing)]
    pub url: String,

    /// Maximum database connections (default: 10)
    pub max_connections: u32,

    /// Minimum database connections (default: 2)
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every read goes straight to the source (`USE_CACHE`).
    pub enabled: bool,

    /// `host:port` of the Redis server (`REDIS_ADDR`)
    pub redis_addr: String,

    #[serde(skip_serializing)]
    pub redis_password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_addr: "localhost:6379".to_string(),
            redis_password: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn redis_url(&self) -> String {
        match self.redis_password.as_deref() {
            Some(password) if !password.is_empty() => {
                format!(
                    "redis://:{}@{}",
                    urlencoding::encode(password),
                    self.redis_addr
                )
            }
            _ => format!("redis://{}", self.redis_addr),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub myanimelist_client_id: String,

    pub myanimelist_client_secret: String,

    pub anilist_client_id: String,

    pub anilist_client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Delta scrape of the recently-updated page
    pub delta_cron: String,

    /// OAuth token refresh
    pub token_refresh_cron: String,

    /// Retry scan over failed library syncs
    pub library_retry_cron: String,

    /// Run both seeding phases on start when the catalog is empty
    pub bootstrap_on_empty: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delta_cron: "0 0 * * * *".to_string(),
            token_refresh_cron: "0 0 0 * * *".to_string(),
            library_retry_cron: "0 0 */6 * * *".to_string(),
            bootstrap_on_empty: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Bound on concurrent detail fetches while seeding (default: 20)
    pub scrape_concurrency: usize,

    pub refresher_workers: usize,

    pub refresher_queue_capacity: usize,

    /// Metadata older than this is refreshed (default: 30 days)
    pub metadata_ttl_days: u32,

    /// MAL requests per minute (default: 60)
    pub mal_requests_per_minute: u32,

    pub library_retry_concurrency: usize,

    pub bulk_chunk_size: usize,

    pub bulk_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            scrape_concurrency: 20,
            refresher_workers: 20,
            refresher_queue_capacity: 1000,
            metadata_ttl_days: 30,
            mal_requests_per_minute: 60,
            library_retry_concurrency: 5,
            bulk_chunk_size: 100,
            bulk_workers: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream timeout for proxied playlist and segment requests
    pub upstream_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub key_path: String,

    /// Upper bound for uploaded id files in bytes (default: 1 MiB)
    pub max_upload_bytes: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            key_path: "tmp/admin.key".to_string(),
            max_upload_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "aniways".to_string());

        Self {
            metrics_enabled: false,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

const EXTRA_ENV_KEYS: &[&str] = &[
    "CLOUDINARY_NAME",
    "CLOUDINARY_API_KEY",
    "CLOUDINARY_API_SECRET",
    "COOKIE_DOMAIN",
    "RESEND_API_KEY",
    "RESEND_FROM_EMAIL",
    "DESKTOP_RELEASE_KEY",
];

impl Config {
    /// Loads defaults, then the first config file found, then `.env`, then
    /// the process environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from: {}", path.display());
        }

        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        for path in &Self::config_paths() {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("aniways").join("config.toml"));
        }

        paths
    }

    /// Overlays environment variables. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = get("APP_ENV") {
            self.general.env = env;
        }
        if let Some(port) = get("APP_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("APP_PORT is not a valid port: {port}"))?;
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(url) = get("FRONTEND_URL") {
            self.server.frontend_url = url;
        }
        if let Some(url) = get("API_URL") {
            self.server.api_url = url;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(addr) = get("REDIS_ADDR") {
            self.cache.redis_addr = addr;
        }
        if let Some(password) = get("REDIS_PASSWORD") {
            self.cache.redis_password = Some(password);
        }
        if let Some(flag) = get("USE_CACHE") {
            self.cache.enabled = parse_bool(&flag)
                .with_context(|| format!("USE_CACHE is not a boolean: {flag}"))?;
        }
        if let Some(v) = get("MYANIMELIST_CLIENT_ID") {
            self.providers.myanimelist_client_id = v;
        }
        if let Some(v) = get("MYANIMELIST_CLIENT_SECRET") {
            self.providers.myanimelist_client_secret = v;
        }
        if let Some(v) = get("ANILIST_CLIENT_ID") {
            self.providers.anilist_client_id = v;
        }
        if let Some(v) = get("ANILIST_CLIENT_SECRET") {
            self.providers.anilist_client_secret = v;
        }
        for key in EXTRA_ENV_KEYS {
            if let Some(v) = get(key) {
                self.general.extra.insert((*key).to_string(), v);
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL must be set");
        }

        if self.server.enabled && self.server.port == 0 {
            anyhow::bail!("APP_PORT must be > 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database pool minimum ({}) exceeds maximum ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        let w = &self.workers;
        if w.scrape_concurrency == 0
            || w.refresher_workers == 0
            || w.library_retry_concurrency == 0
            || w.bulk_workers == 0
            || w.bulk_chunk_size == 0
        {
            anyhow::bail!("Worker counts must be > 0");
        }

        if w.refresher_queue_capacity == 0 {
            anyhow::bail!("Refresher queue capacity must be > 0");
        }

        if w.mal_requests_per_minute == 0 {
            anyhow::bail!("MAL request rate must be > 0");
        }

        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.allowed_origins, vec!["*"]);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 2);
        assert_eq!(config.workers.refresher_queue_capacity, 1000);
        assert_eq!(config.admin.key_path, "tmp/admin.key");
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[workers]"));
        assert!(!toml_str.contains("client_secret"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [workers]
            bulk_workers = 4
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.workers.bulk_workers, 4);
        assert_eq!(config.workers.bulk_chunk_size, 100);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env(env_of(&[
                ("APP_PORT", "9000"),
                ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
                ("DATABASE_URL", "postgres://localhost/aniways"),
                ("USE_CACHE", "false"),
                ("REDIS_PASSWORD", "p@ss"),
                ("COOKIE_DOMAIN", ".example"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.database.url, "postgres://localhost/aniways");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.redis_url(), "redis://:p%40ss@localhost:6379");
        assert_eq!(
            config.general.extra.get("COOKIE_DOMAIN").map(String::as_str),
            Some(".example")
        );
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_env(env_of(&[("APP_PORT", "abc")])).is_err());
    }

    #[test]
    fn validate_requires_database_url() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.database.url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());

        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }
}
