#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub worker_id: String,

    pub max_retries: u32,
    pub max_steps: u32,
    pub max_field_attempts: u32,
    pub task_deadline_secs: u64,
    pub consume_block_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_grace_secs: u64,

    pub stagehand_url: String,
    pub stagehand_timeout_ms: u64,

    pub log_json: bool,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "automation-1".to_string());

        let max_retries = env_parse("MAX_RETRIES").unwrap_or(3);
        let max_steps = env_parse("MAX_STEPS").unwrap_or(10).clamp(1, 50);
        let max_field_attempts = env_parse("MAX_FIELD_ATTEMPTS").unwrap_or(3).clamp(1, 10);
        let task_deadline_secs = env_parse("TASK_DEADLINE_SECS").unwrap_or(300);
        let consume_block_secs = env_parse("CONSUME_BLOCK_SECS").unwrap_or(5).clamp(1, 5);
        let heartbeat_interval_secs = env_parse("HEARTBEAT_INTERVAL_SECS").unwrap_or(30);
        let shutdown_grace_secs = env_parse("SHUTDOWN_GRACE_SECS").unwrap_or(60);

        let stagehand_url =
            std::env::var("STAGEHAND_URL").unwrap_or_else(|_| "http://localhost:3100".to_string());
        let stagehand_timeout_ms = env_parse("STAGEHAND_TIMEOUT").unwrap_or(30_000);

        let log_json = std::env::var("LOG_JSON")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            redis_url,
            worker_id,
            max_retries,
            max_steps,
            max_field_attempts,
            task_deadline_secs,
            consume_block_secs,
            heartbeat_interval_secs,
            shutdown_grace_secs,
            stagehand_url,
            stagehand_timeout_ms,
            log_json,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
