//! Database configuration from an environment file.
//!
//! The server reads a `.env` style file (`KEY=VALUE` lines, `#` comments,
//! unknown keys ignored) and lets real environment variables override it, so
//! deployments can keep credentials out of the file entirely.

use std::collections::HashMap;
use std::path::Path;

/// Connection settings for the Postgres store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            name: "chess-app".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl DbConfig {
    /// Loads configuration from `path`, falling back to defaults for keys
    /// the file does not set. A missing file is not an error; the defaults
    /// apply. Process environment variables win over file values.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let file_vars = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => parse_env(&contents),
            Err(_) => HashMap::new(),
        };

        let get = |key: &str| -> Option<String> {
            std::env::var(key).ok().or_else(|| file_vars.get(key).cloned())
        };

        let defaults = DbConfig::default();
        DbConfig {
            name: get("DB_NAME").unwrap_or(defaults.name),
            user: get("DB_USER").unwrap_or(defaults.user),
            password: get("DB_PASSWORD").unwrap_or(defaults.password),
            host: get("DB_HOST").unwrap_or(defaults.host),
            port: get("DB_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Postgres connection URL for sqlx.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped;
/// anything without `=` is ignored.
fn parse_env(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    vars
}
