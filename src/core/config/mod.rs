//! Layered configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, the TOML file
//! (`ambassador-hub.toml`, or the path in `AMBASSADOR_CONFIG`), `AMBASSADOR_*`
//! environment variables (nested keys joined with `__`, for example
//! `AMBASSADOR_BACKEND__URL`). The conventional BaaS variables
//! (`SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`, ...) only fill values that are
//! still empty, and CLI positional arguments override everything.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::security::sql_guard::validate_identifier;

pub const DEFAULT_CONFIG_FILE: &str = "ambassador-hub.toml";
pub const CONFIG_PATH_VAR: &str = "AMBASSADOR_CONFIG";
pub const ENV_PREFIX: &str = "AMBASSADOR_";

const URL_VARS: &[&str] = &["SUPABASE_URL", "VITE_SUPABASE_URL"];
const KEY_VARS: &[&str] = &["SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_SERVICE_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Load(Box::new(e))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub service_key: String,
    /// Remote procedure that runs arbitrary SQL text.
    pub rpc_function: String,
    /// Name of the single text parameter of `rpc_function`.
    pub rpc_param: String,
    pub schema: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            rpc_function: "exec_sql".to_string(),
            rpc_param: "sql".to_string(),
            schema: "public".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Direct Postgres connection, used only by the `postgres` feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
    /// How long a statement waits for a pooled connection.
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 2,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Shared secret for `/api/admin/*`; the admin routes refuse every call
    /// while it is unset.
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            admin_token: None,
        }
    }
}

impl AppConfig {
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Loads every layer from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        let mut config: AppConfig = Self::figment(&path).extract()?;
        config.fill_from_conventional_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Fills an empty URL or key from the variables the frontend and the
    /// operator scripts already export.
    pub fn fill_from_conventional_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| lookup(*n))
                .find(|v| !v.trim().is_empty())
        };

        if self.backend.url.trim().is_empty() {
            if let Some(url) = first(URL_VARS) {
                self.backend.url = url;
            }
        }
        if self.backend.service_key.trim().is_empty() {
            if let Some(key) = first(KEY_VARS) {
                self.backend.service_key = key;
            }
        }
    }

    pub fn with_overrides(mut self, url: Option<String>, key: Option<String>) -> Self {
        if let Some(url) = url {
            self.backend.url = url;
        }
        if let Some(key) = key {
            self.backend.service_key = key;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("backend.url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "backend.url",
                reason: format!("expected an http(s) URL, got {url}"),
            });
        }
        if self.backend.service_key.trim().is_empty() {
            return Err(ConfigError::Missing("backend.service_key"));
        }
        validate_identifier(&self.backend.rpc_function).map_err(|e| ConfigError::Invalid {
            field: "backend.rpc_function",
            reason: e.to_string(),
        })?;
        validate_identifier(&self.backend.rpc_param).map_err(|e| ConfigError::Invalid {
            field: "backend.rpc_param",
            reason: e.to_string(),
        })?;
        validate_identifier(&self.backend.schema).map_err(|e| ConfigError::Invalid {
            field: "backend.schema",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> AppConfig {
        AppConfig::default().with_overrides(
            Some("https://project.example.co".to_string()),
            Some("service-key".to_string()),
        )
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.backend.rpc_function, "exec_sql");
        assert_eq!(config.backend.rpc_param, "sql");
        assert_eq!(config.backend.schema, "public");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, None);
    }

    #[test]
    fn test_toml_file_layer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
url = "https://abc.example.co"
service_key = "from-file"
rpc_function = "run_sql"

[server]
port = 9090
"#
        )
        .unwrap();

        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.backend.url, "https://abc.example.co");
        assert_eq!(config.backend.rpc_function, "run_sql");
        assert_eq!(config.backend.rpc_param, "sql");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_conventional_env_fills_only_empty_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("VITE_SUPABASE_URL", "https://vite.example.co"),
            ("SUPABASE_SERVICE_KEY", "legacy-key"),
        ]);
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());

        let mut empty = AppConfig::default();
        empty.fill_from_conventional_env(lookup);
        assert_eq!(empty.backend.url, "https://vite.example.co");
        assert_eq!(empty.backend.service_key, "legacy-key");

        let mut preset = valid();
        preset.fill_from_conventional_env(lookup);
        assert_eq!(preset.backend.url, "https://project.example.co");
        assert_eq!(preset.backend.service_key, "service-key");
    }

    #[test]
    fn test_primary_variable_wins_over_alias() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SUPABASE_URL", "https://primary.example.co"),
            ("VITE_SUPABASE_URL", "https://vite.example.co"),
        ]);
        let mut config = AppConfig::default();
        config.fill_from_conventional_env(|n| vars.get(n).map(|v| v.to_string()));
        assert_eq!(config.backend.url, "https://primary.example.co");
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let missing_url = AppConfig::default();
        assert!(matches!(
            missing_url.validate(),
            Err(ConfigError::Missing("backend.url"))
        ));

        let bad_scheme = valid().with_overrides(Some("ftp://x".to_string()), None);
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::Invalid { field: "backend.url", .. })
        ));

        let mut bad_rpc = valid();
        bad_rpc.backend.rpc_function = "exec_sql; drop".to_string();
        assert!(matches!(
            bad_rpc.validate(),
            Err(ConfigError::Invalid { field: "backend.rpc_function", .. })
        ));
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(valid().bind_address(), "0.0.0.0:8080");
    }
}
