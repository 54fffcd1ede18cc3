use crate::error::{Error, Result};
use crate::llm::Provider;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub employees: EmployeesConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on non-public routes. Unset means open access.
    #[serde(default = "default_api_token")]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: default_api_token(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid listen address {}: {e}", self.host)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra log destination next to stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Redis Stack connection and key layout.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_user_key_pattern")]
    pub user_key_pattern: String,
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
    #[serde(default = "default_tariff_prefix")]
    pub tariff_prefix: String,
    #[serde(default = "default_address_index")]
    pub address_index: String,
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            user_key_pattern: default_user_key_pattern(),
            address_prefix: default_address_prefix(),
            tariff_prefix: default_tariff_prefix(),
            address_index: default_address_index(),
            scan_count: default_scan_count(),
            batch_size: default_batch_size(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
        }
    }
}

/// 1C employee directory.
#[derive(Debug, Clone, Deserialize)]
pub struct EmployeesConfig {
    #[serde(default = "default_employees_url")]
    pub base_url: String,
    #[serde(default = "default_employees_timeout")]
    pub timeout_secs: u64,
    /// Telegram ids answered locally instead of asking 1C.
    #[serde(default)]
    pub overrides: Vec<EmployeeOverride>,
}

impl Default for EmployeesConfig {
    fn default() -> Self {
        Self {
            base_url: default_employees_url(),
            timeout_secs: default_employees_timeout(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeOverride {
    pub telegram_id: i64,
    pub fio: String,
    pub job_title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
    /// Fallback order when the requested model fails.
    #[serde(default = "default_order")]
    pub order: Vec<String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_proxy")]
    pub proxy: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            order: default_order(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_ai_timeout(),
            proxy: default_proxy(),
        }
    }
}

/// One entry of the `[[ai.models]]` catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub provider: Provider,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    /// Route this model's traffic through `ai.proxy`.
    #[serde(default)]
    pub use_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// Defaults
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_api_token() -> Option<String> {
    env_nonempty("CORE_API_TOKEN")
}
fn default_log_level() -> String {
    env_nonempty("LOG_LEVEL").unwrap_or_else(|| "info".into())
}
fn default_redis_url() -> String {
    if let Some(url) = env_nonempty("REDIS_URL") {
        return url;
    }
    let host = env_nonempty("REDIS_HOST").unwrap_or_else(|| "localhost".into());
    let port = env_nonempty("REDIS_PORT").unwrap_or_else(|| "6379".into());
    let auth = match (env_nonempty("REDIS_LOGIN"), env_nonempty("REDIS_PASSWORD")) {
        (Some(user), Some(password)) => format!("{user}:{password}@"),
        (None, Some(password)) => format!(":{password}@"),
        _ => String::new(),
    };
    format!("redis://{auth}{host}:{port}")
}
fn default_user_key_pattern() -> String {
    "login:*".into()
}
fn default_address_prefix() -> String {
    "adds:".into()
}
fn default_tariff_prefix() -> String {
    "terrtar:".into()
}
fn default_address_index() -> String {
    "idx:adds".into()
}
fn default_scan_count() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    1024
}
fn default_search_limit() -> usize {
    40
}
fn default_database_url() -> String {
    if let Some(url) = env_nonempty("DATABASE_URL") {
        return url;
    }
    let host = env_nonempty("POSTGRES_HOST").unwrap_or_else(|| "localhost".into());
    let port = env_nonempty("POSTGRES_PORT").unwrap_or_else(|| "5432".into());
    let user = env_nonempty("POSTGRES_USER").unwrap_or_else(|| "postgres".into());
    let db = env_nonempty("POSTGRES_DB").unwrap_or_else(|| "postgres".into());
    match env_nonempty("POSTGRES_PASSWORD") {
        Some(password) => format!("postgres://{user}:{password}@{host}:{port}/{db}"),
        None => format!("postgres://{user}@{host}:{port}/{db}"),
    }
}
fn default_pool_size() -> usize {
    16
}
fn default_employees_url() -> String {
    "http://server1c.freedom1.ru/UNF_CRM_WS/hs/Grafana/anydata".into()
}
fn default_employees_timeout() -> u64 {
    10
}
fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            name: "mistral-large-latest".into(),
            provider: Provider::Mistral,
            api_key_env: None,
            base_url: None,
            use_proxy: false,
        },
        ModelConfig {
            name: "deepseek/deepseek-chat-v3-0324:free".into(),
            provider: Provider::OpenRouter,
            api_key_env: None,
            base_url: None,
            use_proxy: false,
        },
        ModelConfig {
            name: "gpt-4o-mini".into(),
            provider: Provider::OpenAi,
            api_key_env: None,
            base_url: None,
            use_proxy: true,
        },
    ]
}
fn default_order() -> Vec<String> {
    vec![
        "mistral-large-latest".into(),
        "deepseek/deepseek-chat-v3-0324:free".into(),
        "gpt-4o-mini".into(),
    ]
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_ai_timeout() -> u64 {
    120
}
fn default_proxy() -> Option<String> {
    env_nonempty("PROXY")
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp_files")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Like [`Config::load`], but a missing file yields the env-derived defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;

        if self.redis.batch_size == 0 || self.redis.scan_count == 0 {
            return Err(Error::config(
                "redis.batch_size and redis.scan_count must be positive",
            ));
        }
        if self.ai.retry_attempts == 0 {
            return Err(Error::config("ai.retry_attempts must be at least 1"));
        }

        let mut names = HashSet::new();
        for model in &self.ai.models {
            if !names.insert(model.name.as_str()) {
                return Err(Error::config(format!(
                    "model '{}' is listed twice in ai.models",
                    model.name
                )));
            }
        }
        if let Some(unknown) = self.ai.order.iter().find(|m| !names.contains(m.as_str())) {
            return Err(Error::config(format!(
                "ai.order references unknown model '{unknown}'"
            )));
        }
        Ok(())
    }
}
