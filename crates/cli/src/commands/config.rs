use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use shelfmatch_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ConfigLine {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path(explicit_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let engine = &config.engine;
    let fields: Vec<(&'static str, &'static str, String)> = vec![
        ("database.url", "SHELFMATCH_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "SHELFMATCH_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            "SHELFMATCH_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        ("engine.enabled", "SHELFMATCH_ENGINE_ENABLED", engine.enabled.to_string()),
        (
            "engine.exclude_outofstock",
            "SHELFMATCH_ENGINE_EXCLUDE_OUTOFSTOCK",
            engine.exclude_outofstock.to_string(),
        ),
        ("engine.debug", "SHELFMATCH_ENGINE_DEBUG", engine.debug.to_string()),
        (
            "engine.smart_copurchase",
            "SHELFMATCH_ENGINE_SMART_COPURCHASE",
            engine.smart_copurchase.to_string(),
        ),
        (
            "engine.smart_trending",
            "SHELFMATCH_ENGINE_SMART_TRENDING",
            engine.smart_trending.to_string(),
        ),
        (
            "engine.smart_recently_viewed",
            "SHELFMATCH_ENGINE_SMART_RECENTLY_VIEWED",
            engine.smart_recently_viewed.to_string(),
        ),
        ("engine.smart_similar", "SHELFMATCH_ENGINE_SMART_SIMILAR", engine.smart_similar.to_string()),
        ("engine.smart_days", "SHELFMATCH_ENGINE_SMART_DAYS", engine.lookback_days().to_string()),
        (
            "engine.smart_max_relations",
            "SHELFMATCH_ENGINE_SMART_MAX_RELATIONS",
            engine.max_relations().to_string(),
        ),
        ("logging.level", "SHELFMATCH_LOGGING_LEVEL", config.logging.level.clone()),
        (
            "logging.format",
            "SHELFMATCH_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ];

    let lines: Vec<ConfigLine> = fields
        .into_iter()
        .map(|(key, env_key, value)| ConfigLine { key, value, source: source(key, env_key) })
        .collect();

    let data = serde_json::to_value(&lines).ok();
    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        data,
    )
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("shelfmatch.toml"), PathBuf::from("config/shelfmatch.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
