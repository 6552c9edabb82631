use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub default_stale_secs: u64,
    pub cache_max_entries: usize,
    pub cache_gc_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".into(),
            request_timeout_secs: 30,
            default_stale_secs: 300,
            cache_max_entries: 256,
            cache_gc_secs: 1800,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_stale_time(&self) -> Duration {
        Duration::from_secs(self.default_stale_secs)
    }

    pub fn cache_gc_time(&self) -> Duration {
        Duration::from_secs(self.cache_gc_secs)
    }
}

/// Loads settings from `client.toml` in the working directory (if present) and
/// the process environment, in that order of precedence, lowest first.
pub fn load_settings() -> anyhow::Result<ClientSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let file_cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let parsed = toml::from_str::<HashMap<String, toml::Value>>(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        parsed
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect()
    } else {
        HashMap::new()
    };

    let settings = resolve_settings(&file_cfg, env)?;
    validate_base_url(&settings.api_base_url)?;
    Ok(settings)
}

fn resolve_settings(
    file_cfg: &HashMap<String, String>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    if let Some(v) = file_cfg.get("api_base_url") {
        settings.api_base_url = v.clone();
    }
    if let Some(v) = file_cfg.get("request_timeout_secs") {
        settings.request_timeout_secs = parse_field("request_timeout_secs", v)?;
    }
    if let Some(v) = file_cfg.get("default_stale_secs") {
        settings.default_stale_secs = parse_field("default_stale_secs", v)?;
    }
    if let Some(v) = file_cfg.get("cache_max_entries") {
        settings.cache_max_entries = parse_field("cache_max_entries", v)?;
    }
    if let Some(v) = file_cfg.get("cache_gc_secs") {
        settings.cache_gc_secs = parse_field("cache_gc_secs", v)?;
    }

    if let Some(v) = env("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = parse_field("APP__REQUEST_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = env("APP__DEFAULT_STALE_SECS") {
        settings.default_stale_secs = parse_field("APP__DEFAULT_STALE_SECS", &v)?;
    }
    if let Some(v) = env("APP__CACHE_MAX_ENTRIES") {
        settings.cache_max_entries = parse_field("APP__CACHE_MAX_ENTRIES", &v)?;
    }
    if let Some(v) = env("APP__CACHE_GC_SECS") {
        settings.cache_gc_secs = parse_field("APP__CACHE_GC_SECS", &v)?;
    }

    if settings.cache_max_entries == 0 {
        return Err(anyhow!("cache_max_entries must be at least 1"));
    }

    Ok(settings)
}

fn parse_field<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("invalid value '{raw}' for {name}"))
}

pub fn validate_base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid api base url '{raw}'"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "api base url must use http or https, got '{other}'"
        )),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
