//! Runtime settings, layered: built-in defaults, then an optional settings
//! file, then `SEARCHLINK_*` environment variables (`__` separates nested
//! keys, e.g. `SEARCHLINK_SEARCH__ENDPOINT`).

use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;
use crate::gateway::GatewayConfig;

pub const ENV_PREFIX: &str = "SEARCHLINK";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Absent when no hosted search service is configured.
    #[serde(default)]
    pub search: Option<GatewayConfig>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DatabaseSettings {
    /// SQLite file; in-memory when absent.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: default_filter() }
    }
}

impl Settings {
    /// Loads settings from `file` (any format the `config` crate recognizes by
    /// extension; a missing file is skipped) and the environment.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().set_default("logging.filter", default_filter())?;
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Reads settings from TOML text only, ignoring the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_fall_back_to_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.logging.filter, "info");
        assert!(settings.search.is_none());
    }

    #[test]
    fn search_section_fills_gateway_defaults() {
        let settings = Settings::from_toml(
            r#"
            [database]
            path = "northwind.db"

            [search]
            endpoint = "https://example.search.windows.net"
            api_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(settings.database.path.as_deref(), Some("northwind.db"));
        let search = settings.search.unwrap();
        assert_eq!(search.api_key.as_deref(), Some("secret"));
        assert_eq!(search.key_field, "id");
        assert_eq!(search.top, 1000);
    }

    #[test]
    fn missing_files_are_skipped() {
        let settings = Settings::load(Some("does/not/exist/searchlink")).unwrap();
        assert_eq!(settings.logging.filter, "info");
    }
}
