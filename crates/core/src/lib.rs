pub mod domain;
pub mod engine;
pub mod market;
pub mod model;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub model_base_url: Option<String>,
        pub model_api_key: Option<String>,
        pub market_data_path: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                model_base_url: std::env::var("MODEL_BASE_URL").ok(),
                model_api_key: std::env::var("MODEL_API_KEY").ok(),
                market_data_path: std::env::var("MARKET_DATA_PATH").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_model_base_url(&self) -> anyhow::Result<&str> {
            self.model_base_url
                .as_deref()
                .context("MODEL_BASE_URL is required")
        }

        pub fn require_market_data_path(&self) -> anyhow::Result<&str> {
            self.market_data_path
                .as_deref()
                .context("MARKET_DATA_PATH is required")
        }
    }
}
