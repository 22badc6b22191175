use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Application configuration, loaded from `tranche.toml` in the working
/// directory (optional) with `TRANCHE_*` environment overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .set_default("db_path", "tranche.db")?
            .set_default("busy_timeout_ms", 5_000_i64)?
            .add_source(File::with_name("tranche").required(false))
            .add_source(Environment::with_prefix("TRANCHE").try_parsing(true))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("tranche.db"));
        assert_eq!(cfg.busy_timeout_ms, 5_000);
    }
}
