use std::fmt;
use std::time::Duration;

use harvest_core::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};

/// Connection parameters for a PostgreSQL store.
///
/// Built from a `[postgres]` TOML table, from the libpq `PG*` environment
/// variables, or both (environment wins).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub connect_timeout_secs: u64,
    pub application_name: String,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            dbname: None,
            connect_timeout_secs: 10,
            application_name: "harvest".to_string(),
        }
    }
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl PgConfig {
    /// Defaults overridden by `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`, `PGDATABASE`.
    pub fn from_env() -> HarvestResult<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Override fields with whatever `lookup` returns for the `PG*` keys.
    pub fn apply_env<F>(mut self, lookup: F) -> HarvestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PGHOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PGPORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| HarvestError::Config(format!("PGPORT is not a port number: {}", port)))?;
        }
        if let Some(user) = lookup("PGUSER") {
            self.user = Some(user);
        }
        if let Some(password) = lookup("PGPASSWORD") {
            self.password = Some(password);
        }
        if let Some(dbname) = lookup("PGDATABASE") {
            self.dbname = Some(dbname);
        }
        Ok(self)
    }

    pub fn validate(&self) -> HarvestResult<()> {
        if self.host.trim().is_empty() {
            return Err(HarvestError::Config("postgres host is empty".to_string()));
        }
        Ok(())
    }

    /// The configured user, else the OS login name (`USER`, then `USERNAME`),
    /// as libpq does.
    pub fn effective_user<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.user
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| lookup("USER"))
            .or_else(|| lookup("USERNAME"))
            .filter(|u| !u.trim().is_empty())
    }

    /// `user@host:port/dbname`, safe to log
    pub fn display_name(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user.as_deref().unwrap_or(""),
            self.host,
            self.port,
            self.dbname.as_deref().unwrap_or("")
        )
    }

    pub(crate) fn to_client_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .application_name(&self.application_name)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        if let Some(user) = self.effective_user(|key| std::env::var(key).ok()) {
            config.user(&user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(dbname) = &self.dbname {
            config.dbname(dbname);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = PgConfig::default()
            .apply_env(env(&[
                ("PGHOST", "db.internal"),
                ("PGPORT", "6543"),
                ("PGUSER", "collector"),
                ("PGPASSWORD", "hunter2"),
                ("PGDATABASE", "personal"),
            ]))
            .unwrap();

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user.as_deref(), Some("collector"));
        assert_eq!(config.dbname.as_deref(), Some("personal"));
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_env_keeps_file_values() {
        let file = PgConfig {
            host: "from-file".to_string(),
            user: Some("file_user".to_string()),
            ..PgConfig::default()
        };
        let config = file.clone().apply_env(env(&[])).unwrap();
        assert_eq!(config, file);
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let result = PgConfig::default().apply_env(env(&[("PGPORT", "fifty")]));
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_user_is_optional() {
        PgConfig::default().validate().unwrap();
    }

    #[test]
    fn test_missing_user_falls_back_to_os_login() {
        let config = PgConfig::default();
        assert_eq!(
            config.effective_user(env(&[("USER", "alice")])).as_deref(),
            Some("alice")
        );
        assert_eq!(
            config.effective_user(env(&[("USERNAME", "bob")])).as_deref(),
            Some("bob")
        );
        assert_eq!(config.effective_user(env(&[])), None);

        let explicit = PgConfig {
            user: Some("collector".to_string()),
            ..PgConfig::default()
        };
        assert_eq!(
            explicit.effective_user(env(&[("USER", "alice")])).as_deref(),
            Some("collector")
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = PgConfig {
            password: Some("hunter2".to_string()),
            ..PgConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_display_name_omits_password() {
        let config = PgConfig {
            user: Some("me".to_string()),
            password: Some("hunter2".to_string()),
            dbname: Some("db".to_string()),
            ..PgConfig::default()
        };
        assert_eq!(config.display_name(), "postgres://me@localhost:5432/db");
    }

    #[test]
    fn test_toml_table_fills_defaults() {
        let config: PgConfig = toml::from_str("host = \"pg\"\nuser = \"u\"").unwrap();
        assert_eq!(config.host, "pg");
        assert_eq!(config.port, 5432);
    }
}
