use std::net::SocketAddr;
use std::time::Duration;
use structopt::StructOpt;

/// server settings, from flags or the environment (`.env` is loaded first)
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "gymkeeper-server", about = "gym management api")]
pub struct Config {
    /// postgres connection string; the in-memory store is used when absent
    #[structopt(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[structopt(long, env = "BIND_ADDR", default_value = "127.0.0.1:3030")]
    pub bind_addr: SocketAddr,

    #[structopt(long, env = "ADVICE_API_URL", default_value = "https://api.mistral.ai/v1/chat/completions")]
    pub advice_api_url: String,

    /// weekly suggestions are always empty without a key
    #[structopt(long, env = "ADVICE_API_KEY", hide_env_values = true)]
    pub advice_api_key: Option<String>,

    #[structopt(long, env = "ADVICE_MODEL", default_value = "mistral-medium")]
    pub advice_model: String,

    #[structopt(long, env = "ADVICE_TIMEOUT_SECS", default_value = "30")]
    pub advice_timeout_secs: u64,

    /// window of `GET /api/ai-workout/suggest/{id}` when `historyDays` is not given
    #[structopt(long, env = "SUGGESTION_HISTORY_DAYS", default_value = "30")]
    pub suggestion_history_days: u32,

    #[structopt(long, env = "WEEKLY_WINDOW_DAYS", default_value = "7")]
    pub weekly_window_days: u32,

    /// tracing filter directive, e.g. "gymkeeper=debug,warp=info"
    #[structopt(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn advice_timeout(&self) -> Duration {
        Duration::from_secs(self.advice_timeout_secs)
    }
}
