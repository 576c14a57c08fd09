//! Daemon configuration, read from `<data_dir>/config.toml`.
//!
//! ```toml
//! port = 7611
//! session_ttl_hours = 720
//! bcrypt_cost = 12
//!
//! [[seed_users]]
//! first_name = "Ada"
//! last_name = "Lovelace"
//! email = "ada@example.com"
//! password = "changeme"
//! role = "admin"
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TabulaError;
use crate::types::Role;

pub const DEFAULT_PORT: u16 = 7611;
pub const DATA_DIR_NAME: &str = ".tabula";
pub const CONFIG_FILE: &str = "config.toml";
/// One hundred years.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365 * 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub session_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub seed_users: Vec<SeedUser>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            session_ttl_hours: 24 * 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            seed_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "seed_role")]
    pub role: Role,
}

fn seed_role() -> Role {
    Role::User
}

impl Config {
    pub fn load(data_dir: &Path) -> Result<Config, TabulaError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&path)
            .map_err(|e| TabulaError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::parse(&raw).map_err(|e| match e {
            TabulaError::Config(msg) => TabulaError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, TabulaError> {
        let config: Config = toml::from_str(raw).map_err(|e| TabulaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TabulaError> {
        if self.session_ttl_hours <= 0 {
            return Err(TabulaError::Config(
                "session_ttl_hours must be positive".to_string(),
            ));
        }
        if self.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(TabulaError::Config(format!(
                "session_ttl_hours must be at most {MAX_SESSION_TTL_HOURS}"
            )));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(TabulaError::Config(
                "bcrypt_cost must be between 4 and 31".to_string(),
            ));
        }
        Ok(())
    }
}

/// `./.tabula` under the given project directory.
pub fn data_dir_in(project_dir: &Path) -> PathBuf {
    project_dir.join(DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse("port = 9000\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_ttl_hours, 720);
        assert!(config.seed_users.is_empty());
    }

    #[test]
    fn seed_users_parse() {
        let config = Config::parse(
            r#"
            [[seed_users]]
            first_name = "Ada"
            last_name = "Lovelace"
            email = "ada@example.com"
            password = "hunter22"
            role = "admin"

            [[seed_users]]
            first_name = "Bob"
            last_name = "Builder"
            email = "bob@example.com"
            password = "canwefixit"
            "#,
        )
        .unwrap();
        assert_eq!(config.seed_users.len(), 2);
        assert_eq!(config.seed_users[0].role, Role::Admin);
        assert_eq!(config.seed_users[1].role, Role::User);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::parse("session_ttl_hours = 0"),
            Err(TabulaError::Config(_))
        ));
        assert!(matches!(
            Config::parse("session_ttl_hours = 9223372036854775807"),
            Err(TabulaError::Config(_))
        ));
        assert!(Config::parse(&format!("session_ttl_hours = {MAX_SESSION_TTL_HOURS}")).is_ok());
        assert!(matches!(
            Config::parse("bcrypt_cost = 2"),
            Err(TabulaError::Config(_))
        ));
        assert!(matches!(
            Config::parse("port = \"x\""),
            Err(TabulaError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "bcrypt_cost = 4\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.bcrypt_cost, 4);
    }
}
