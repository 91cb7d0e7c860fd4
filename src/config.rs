//! Process configuration, loaded entirely from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub collector_tick_secs: u64,
    pub round_cooldown_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./oracle.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "6877".to_string())
            .parse()
            .unwrap_or(6877);

        let collector_tick_secs = std::env::var("COLLECTOR_TICK_SECS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let round_cooldown_ms = std::env::var("ROUND_COOLDOWN_MS")
            .unwrap_or_else(|_| "1500".to_string())
            .parse()
            .unwrap_or(1500);

        Ok(Self {
            database_path,
            port,
            collector_tick_secs,
            round_cooldown_ms,
        })
    }
}
