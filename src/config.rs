//! Settings of the cosmos binaries.
//!
//! Every cosmos binary reads its settings from the process environment. A `.env`
//! file is loaded first when present, then `envy` deserializes the variables into
//! a type-safe [`Config`].

use serde::Deserialize;

/// Output style of the tracing subscriber, selected by `LOG_FORMATTER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatter {
    #[default]
    Json,
    Brief,
    Console,
}

/// Settings shared by the API server, the task worker and the scheduler.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string. When unset the URL is built
///   from the `POSTGRES_*` variables.
/// - `SERVER_PORT`: HTTP server port, defaults to 8000
/// - `API_PREFIX`: path prefix of every API router, defaults to `/api`
/// - `VELA_API_AUTH_TOKEN` / `POLARIS_API_AUTH_TOKEN`: shared secrets of the
///   transactions/campaigns APIs and of the accounts API
/// - `LOG_FORMATTER`, `SQL_DEBUG`: logging output
/// - `TASK_LEASE_SECONDS`: how long a claimed task stays `IN_PROGRESS` before
///   another worker may reclaim it
/// - `*_SCHEDULE_SECONDS`: periods of the scheduler jobs
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_user")]
    pub postgres_user: String,

    #[serde(default)]
    pub postgres_password: String,

    #[serde(default = "default_postgres_db")]
    pub postgres_db: String,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    #[serde(default)]
    pub log_formatter: LogFormatter,

    #[serde(default)]
    pub sql_debug: bool,

    #[serde(default)]
    pub vela_api_auth_token: String,

    #[serde(default)]
    pub polaris_api_auth_token: String,

    #[serde(default = "default_public_url")]
    pub public_url: String,

    #[serde(default = "default_reward_base_url")]
    pub pre_loaded_reward_base_url: String,

    #[serde(default = "default_requeue_backoff")]
    pub reward_issuance_requeue_backoff_seconds: i64,

    #[serde(default = "default_max_retries")]
    pub task_max_retries: i32,

    #[serde(default = "default_backoff_base")]
    pub task_retry_backoff_base: i64,

    #[serde(default = "default_poll_interval")]
    pub task_poll_interval_seconds: u64,

    #[serde(default = "default_pending_rewards_schedule")]
    pub pending_rewards_schedule_seconds: u64,

    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,

    #[serde(default = "default_task_lease")]
    pub task_lease_seconds: i64,

    #[serde(default = "default_daily_schedule")]
    pub reset_balances_schedule_seconds: u64,

    #[serde(default = "default_daily_schedule")]
    pub task_cleanup_schedule_seconds: u64,

    #[serde(default = "default_task_retention")]
    pub task_cleanup_retention_days: i32,

    // Accepted for compatibility with existing deployments; nothing reads them.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub prometheus_multiproc_dir: Option<String>,
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_user() -> String {
    "postgres".to_string()
}

fn default_postgres_db() -> String {
    "cosmos".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_port() -> u16 {
    8000
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_reward_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_requeue_backoff() -> i64 {
    3600
}

fn default_max_retries() -> i32 {
    6
}

fn default_backoff_base() -> i64 {
    3
}

fn default_poll_interval() -> u64 {
    5
}

fn default_pending_rewards_schedule() -> u64 {
    3600
}

fn default_callback_timeout() -> u64 {
    5
}

fn default_task_lease() -> i64 {
    300
}

fn default_daily_schedule() -> u64 {
    86_400
}

fn default_task_retention() -> i32 {
    180
}

impl Config {
    /// Read the process environment, after a `.env` file if one exists.
    ///
    /// # Errors
    ///
    /// An `envy` error naming the first variable that does not parse.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    /// Build a configuration from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(vars.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    /// PostgreSQL connection string, explicit or assembled from parts.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.postgres_user,
                self.postgres_password,
                self.postgres_host,
                self.postgres_port,
                self.postgres_db
            ),
        }
    }

    /// API prefix without a trailing slash.
    pub fn api_prefix(&self) -> &str {
        self.api_prefix.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = Config::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.api_prefix(), "/api");
        assert_eq!(config.log_formatter, LogFormatter::Json);
        assert_eq!(config.task_max_retries, 6);
        assert_eq!(config.task_lease_seconds, 300);
        assert_eq!(config.reset_balances_schedule_seconds, 86_400);
        assert_eq!(config.task_cleanup_retention_days, 180);
        assert!(!config.sql_debug);
        assert_eq!(
            config.database_url(),
            "postgres://postgres:@localhost:5432/cosmos"
        );
    }

    #[test]
    fn explicit_database_url_wins_over_parts() {
        let config = Config::from_vars([
            ("DATABASE_URL", "postgres://u:p@db/other"),
            ("POSTGRES_PASSWORD", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.database_url(), "postgres://u:p@db/other");
    }

    #[test]
    fn parses_formatter_and_tokens() {
        let config = Config::from_vars([
            ("LOG_FORMATTER", "brief"),
            ("SQL_DEBUG", "true"),
            ("VELA_API_AUTH_TOKEN", "vela-secret"),
            ("API_PREFIX", "/bpl/"),
        ])
        .unwrap();
        assert_eq!(config.log_formatter, LogFormatter::Brief);
        assert!(config.sql_debug);
        assert_eq!(config.vela_api_auth_token, "vela-secret");
        assert_eq!(config.api_prefix(), "/bpl");
    }
}
