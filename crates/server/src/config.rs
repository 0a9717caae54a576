use std::{collections::HashMap, fs, net::SocketAddr, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

pub const SETTINGS_FILE: &str = "bridge.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub homeserver_url: String,
    /// Token the bridge presents to the homeserver.
    pub as_token: String,
    /// Token the homeserver presents when pushing transactions.
    pub hs_token: String,
    pub bot_user_id: String,
    pub chatwoot_base_url: String,
    pub chatwoot_account_id: i64,
    pub chatwoot_inbox_id: i64,
    pub chatwoot_access_token: String,
    pub http_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:29320".into(),
            database_url: "sqlite://./data/bridge.db".into(),
            homeserver_url: "http://127.0.0.1:8008".into(),
            as_token: String::new(),
            hs_token: String::new(),
            bot_user_id: "@chatwoot:localhost".into(),
            chatwoot_base_url: "http://127.0.0.1:3000".into(),
            chatwoot_account_id: 1,
            chatwoot_inbox_id: 1,
            chatwoot_access_token: String::new(),
            http_timeout_seconds: 30,
        }
    }
}

const KEYS: &[&str] = &[
    "bind_addr",
    "database_url",
    "homeserver_url",
    "as_token",
    "hs_token",
    "bot_user_id",
    "chatwoot_base_url",
    "chatwoot_account_id",
    "chatwoot_inbox_id",
    "chatwoot_access_token",
    "http_timeout_seconds",
];

impl Settings {
    fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "bind_addr" => self.bind_addr = value.to_string(),
            "database_url" => self.database_url = value.to_string(),
            "homeserver_url" => self.homeserver_url = value.to_string(),
            "as_token" => self.as_token = value.to_string(),
            "hs_token" => self.hs_token = value.to_string(),
            "bot_user_id" => self.bot_user_id = value.to_string(),
            "chatwoot_base_url" => self.chatwoot_base_url = value.to_string(),
            "chatwoot_account_id" => self.chatwoot_account_id = parse_number(key, value)?,
            "chatwoot_inbox_id" => self.chatwoot_inbox_id = parse_number(key, value)?,
            "chatwoot_access_token" => self.chatwoot_access_token = value.to_string(),
            "http_timeout_seconds" => self.http_timeout_seconds = parse_number(key, value)?,
            _ => {}
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind_addr '{}'", self.bind_addr))?;
        if self.as_token.trim().is_empty() {
            bail!("as_token must be set");
        }
        if self.hs_token.trim().is_empty() {
            bail!("hs_token must be set");
        }
        if self.chatwoot_access_token.trim().is_empty() {
            bail!("chatwoot_access_token must be set");
        }
        if !self.bot_user_id.starts_with('@') || !self.bot_user_id.contains(':') {
            bail!(
                "bot_user_id '{}' is not a full user id like @bot:example.org",
                self.bot_user_id
            );
        }
        validate_http_url("homeserver_url", &self.homeserver_url)?;
        validate_http_url("chatwoot_base_url", &self.chatwoot_base_url)?;
        if self.chatwoot_account_id <= 0 || self.chatwoot_inbox_id <= 0 {
            bail!("chatwoot_account_id and chatwoot_inbox_id must be positive");
        }
        if self.http_timeout_seconds == 0 {
            bail!("http_timeout_seconds must be greater than zero");
        }
        Ok(())
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the flat key/value file (if present), then `BRIDGE_*` and
/// finally `APP__*` environment variables.
pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        let file_cfg = toml::from_str::<HashMap<String, String>>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", file.display()))?;
        for key in KEYS {
            if let Some(v) = file_cfg.get(*key) {
                settings.apply(key, v)?;
            }
        }
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }

    for prefix in ["BRIDGE_", "APP__"] {
        for key in KEYS {
            let name = format!("{prefix}{}", key.to_ascii_uppercase());
            if let Some(v) = env(&name) {
                settings.apply(key, &v)?;
            }
        }
    }

    Ok(settings)
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid number for {key}: '{value}'"))
}

fn validate_http_url(key: &str, value: &str) -> anyhow::Result<()> {
    let url = Url::parse(value).with_context(|| format!("invalid {key} '{value}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{key} must use http or https, got '{value}'");
    }
    Ok(())
}

/// Turns a bare file path into a `sqlite://` url; urls pass through unchanged.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
