//! Base configuration shared by the pipeline services.
//!
//! Values layer in order: an optional `configuration` file, then
//! `APP__`-prefixed environment variables (`APP__PORT=9090`). Service
//! crates nest this under their own config and add their domain sections
//! (store backend, vault key, aggregator credentials, worker tuning).

use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP listen port. Port 0 asks the OS for a free one, which the test
    /// harness relies on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
