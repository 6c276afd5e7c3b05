use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub match_file: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ThemeSourceType {
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThemesConfig {
    pub source_type: ThemeSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

/// Defaults offered when a new match is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    pub points_required: u32,
    pub round_seconds: u64,
    pub skip_penalty: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub auto_start_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub storage: StorageConfig,
    pub themes: ThemesConfig,
    pub rules: RulesConfig,
    pub engine: EngineConfig,
    pub ledger: LedgerConfig,
    pub player: PlayerConfig,
}

impl AppSettings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.engine.tick_interval_ms == 0 || self.engine.tick_interval_ms >= 1000 {
            return Err(ConfigError::InvalidValue(format!(
                "engine.tick_interval_ms must be in 1..1000, got {}",
                self.engine.tick_interval_ms
            )));
        }
        match self.themes.source_type {
            ThemeSourceType::File if self.themes.file_path.is_none() => {
                return Err(ConfigError::Missing("themes.file_path".to_string()));
            }
            ThemeSourceType::Http if self.themes.http_url.is_none() => {
                return Err(ConfigError::Missing("themes.http_url".to_string()));
            }
            _ => {}
        }
        Ok(self)
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let builder = Config::builder()
        .set_default("storage.match_file", "alias_match.json")?
        .set_default("themes.source_type", "file")?
        .set_default("themes.file_path", "themes.json")?
        .set_default("rules.points_required", 50)?
        .set_default("rules.round_seconds", 60)?
        .set_default("rules.skip_penalty", true)?
        .set_default("engine.tick_interval_ms", 100)?
        .set_default("engine.auto_start_delay_ms", 1500)?
        .set_default("ledger.request_timeout_secs", 5)?
        .set_default("player.id", "local")?
        .set_default("player.email", "local@localhost")?
        .set_default("player.display_name", "Local player")?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("ALIAS")
                .separator("__")
                .try_parsing(true),
        );

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    Ok(app_settings.validate()?)
}
