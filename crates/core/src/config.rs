use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SMART_DAYS: u32 = 90;
pub const DEFAULT_SMART_MAX_RELATIONS: u32 = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineSettings,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Engine-wide switches threaded into the matcher and the smart builders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineSettings {
    pub enabled: bool,
    pub exclude_outofstock: bool,
    pub debug: bool,
    pub smart_copurchase: bool,
    pub smart_trending: bool,
    pub smart_recently_viewed: bool,
    pub smart_similar: bool,
    pub smart_days: u32,
    pub smart_max_relations: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_outofstock: true,
            debug: false,
            smart_copurchase: false,
            smart_trending: false,
            smart_recently_viewed: false,
            smart_similar: false,
            smart_days: DEFAULT_SMART_DAYS,
            smart_max_relations: DEFAULT_SMART_MAX_RELATIONS,
        }
    }
}

impl EngineSettings {
    /// Lookback window; non-positive values fall back to the default.
    pub fn lookback_days(&self) -> u32 {
        if self.smart_days < 1 {
            DEFAULT_SMART_DAYS
        } else {
            self.smart_days
        }
    }

    pub fn max_relations(&self) -> usize {
        if self.smart_max_relations < 1 {
            DEFAULT_SMART_MAX_RELATIONS as usize
        } else {
            self.smart_max_relations as usize
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub engine_enabled: Option<bool>,
    pub engine_debug: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://shelfmatch.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineSettings::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shelfmatch.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            let settings = &mut self.engine;
            if let Some(enabled) = engine.enabled {
                settings.enabled = enabled;
            }
            if let Some(exclude_outofstock) = engine.exclude_outofstock {
                settings.exclude_outofstock = exclude_outofstock;
            }
            if let Some(debug) = engine.debug {
                settings.debug = debug;
            }
            if let Some(smart_copurchase) = engine.smart_copurchase {
                settings.smart_copurchase = smart_copurchase;
            }
            if let Some(smart_trending) = engine.smart_trending {
                settings.smart_trending = smart_trending;
            }
            if let Some(smart_recently_viewed) = engine.smart_recently_viewed {
                settings.smart_recently_viewed = smart_recently_viewed;
            }
            if let Some(smart_similar) = engine.smart_similar {
                settings.smart_similar = smart_similar;
            }
            if let Some(smart_days) = engine.smart_days {
                settings.smart_days = smart_days;
            }
            if let Some(smart_max_relations) = engine.smart_max_relations {
                settings.smart_max_relations = smart_max_relations;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHELFMATCH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHELFMATCH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SHELFMATCH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SHELFMATCH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SHELFMATCH_ENGINE_ENABLED") {
            self.engine.enabled = parse_bool("SHELFMATCH_ENGINE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_EXCLUDE_OUTOFSTOCK") {
            self.engine.exclude_outofstock =
                parse_bool("SHELFMATCH_ENGINE_EXCLUDE_OUTOFSTOCK", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_DEBUG") {
            self.engine.debug = parse_bool("SHELFMATCH_ENGINE_DEBUG", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_COPURCHASE") {
            self.engine.smart_copurchase = parse_bool("SHELFMATCH_ENGINE_SMART_COPURCHASE", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_TRENDING") {
            self.engine.smart_trending = parse_bool("SHELFMATCH_ENGINE_SMART_TRENDING", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_RECENTLY_VIEWED") {
            self.engine.smart_recently_viewed =
                parse_bool("SHELFMATCH_ENGINE_SMART_RECENTLY_VIEWED", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_SIMILAR") {
            self.engine.smart_similar = parse_bool("SHELFMATCH_ENGINE_SMART_SIMILAR", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_DAYS") {
            self.engine.smart_days = parse_u32("SHELFMATCH_ENGINE_SMART_DAYS", &value)?;
        }
        if let Some(value) = read_env("SHELFMATCH_ENGINE_SMART_MAX_RELATIONS") {
            self.engine.smart_max_relations =
                parse_u32("SHELFMATCH_ENGINE_SMART_MAX_RELATIONS", &value)?;
        }

        let log_level =
            read_env("SHELFMATCH_LOGGING_LEVEL").or_else(|| read_env("SHELFMATCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHELFMATCH_LOGGING_FORMAT").or_else(|| read_env("SHELFMATCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.engine_enabled {
            self.engine.enabled = enabled;
        }
        if let Some(debug) = overrides.engine_debug {
            self.engine.debug = debug;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shelfmatch.toml"), PathBuf::from("config/shelfmatch.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineSettings) -> Result<(), ConfigError> {
    if engine.smart_days > 3650 {
        return Err(ConfigError::Validation(
            "engine.smart_days must be at most 3650 (ten years of orders)".to_string(),
        ));
    }

    if engine.smart_max_relations > 500 {
        return Err(ConfigError::Validation(
            "engine.smart_max_relations must be at most 500".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    enabled: Option<bool>,
    exclude_outofstock: Option<bool>,
    debug: Option<bool>,
    smart_copurchase: Option<bool>,
    smart_trending: Option<bool>,
    smart_recently_viewed: Option<bool>,
    smart_similar: Option<bool>,
    smart_days: Option<u32>,
    smart_max_relations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
