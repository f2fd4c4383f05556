use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

const FILE_NAME: &str = "rx_scraper";
const ENV_PREFIX: &str = "RX";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Runtime settings: defaults, then `rx_scraper.toml` if present, then `RX_*` env vars.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub db_path: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub user_agent: String,
    pub default_limit: usize,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name(FILE_NAME).required(false))
                .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .set_default("db_path", "data/rx.sqlite")?
            .set_default("timeout_secs", 30)?
            .set_default("concurrency", 5)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("default_limit", 15)?
            .build()?
            .try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_nothing_set() {
        let s = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(s.db_path, "data/rx.sqlite");
        assert_eq!(s.timeout(), Duration::from_secs(30));
        assert_eq!(s.concurrency, 5);
        assert_eq!(s.default_limit, 15);
        assert!(s.user_agent.contains("Chrome"));
    }

    #[test]
    fn env_overrides_file() {
        let file = File::from_str("db_path = \"/tmp/a.sqlite\"\nconcurrency = 8", FileFormat::Toml);
        let env: HashMap<String, String> = [("RX_CONCURRENCY".to_string(), "2".to_string())].into();
        let s = Settings::from_builder(
            Config::builder()
                .add_source(file)
                .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true).source(Some(env))),
        )
        .unwrap();
        assert_eq!(s.db_path, "/tmp/a.sqlite");
        assert_eq!(s.concurrency, 2);
        assert_eq!(s.timeout_secs, 30);
    }

    #[test]
    fn bad_number_is_an_error() {
        let file = File::from_str("timeout_secs = \"soon\"", FileFormat::Toml);
        assert!(Settings::from_builder(Config::builder().add_source(file)).is_err());
    }
}
