#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub api_addr: String,
    pub api_key: String,
    pub encryption_key: String,
    pub worker_id: String,

    pub max_retries: u32,
    pub attempts_cap: i32,
    pub stale_after_secs: i64,
    pub heartbeat_ttl_secs: i64,
    pub consume_block_secs: u64,

    pub stagehand_url: String,
    pub stagehand_timeout_ms: u64,

    pub sms: SmsConfig,

    pub log_json: bool,
    pub migrate_on_startup: bool,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub default_to: Option<String>,
    pub api_base: String,
}

impl SmsConfig {
    pub fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some() && self.from_number.is_some()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let encryption_key = std::env::var("ENCRYPTION_KEY")
            .map_err(|_| anyhow::anyhow!("ENCRYPTION_KEY is missing"))?;

        let api_addr = std::env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let api_key = std::env::var("PROFILE_INGEST_API_KEY")
            .map_err(|_| anyhow::anyhow!("PROFILE_INGEST_API_KEY is missing"))?;

        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let max_retries = env_parse("MAX_RETRIES").unwrap_or(3);
        let attempts_cap = env_parse("ATTEMPTS_CAP").unwrap_or(3);
        let stale_after_secs = env_parse("STALE_AFTER_SECS").unwrap_or(600).clamp(30, 3600);
        let heartbeat_ttl_secs = env_parse("HEARTBEAT_TTL_SECS").unwrap_or(120).clamp(10, 600);
        let consume_block_secs = env_parse("CONSUME_BLOCK_SECS").unwrap_or(5).clamp(1, 5);

        let stagehand_url =
            std::env::var("STAGEHAND_URL").unwrap_or_else(|_| "http://localhost:3100".to_string());
        let stagehand_timeout_ms = env_parse("STAGEHAND_TIMEOUT").unwrap_or(30_000);

        let sms = SmsConfig {
            account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            from_number: env_opt("SMS_FROM"),
            // Strip inline comments some env files carry after the number.
            default_to: env_opt("SMS_TO")
                .map(|v| v.split('#').next().unwrap_or("").trim().to_string())
                .filter(|v| !v.is_empty()),
            api_base: std::env::var("SMS_API_BASE")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
        };

        let log_json = env_bool("LOG_JSON").unwrap_or(false);
        let migrate_on_startup = env_bool("MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            redis_url,
            api_addr,
            api_key,
            encryption_key,
            worker_id,
            max_retries,
            attempts_cap,
            stale_after_secs,
            heartbeat_ttl_secs,
            consume_block_secs,
            stagehand_url,
            stagehand_timeout_ms,
            sms,
            log_json,
            migrate_on_startup,
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
