use std::env;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage_path: String,
    /// Base URL used to build public links to stored files.
    pub public_url: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let port = match lookup("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value: p })?,
            None => 3000,
        };

        Ok(Self {
            port,
            database_url: required("DATABASE_URL")?,
            storage_path: lookup("STORAGE_PATH").unwrap_or_else(|| "./data/storage".to_string()),
            public_url: lookup("PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            jwt_secret: required("JWT_SECRET")?,
        })
    }
}
