use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{ClientError, ClientResult};

pub const SETTINGS_FILE: &str = "shop_client.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub success_status_ms: u64,
    pub failure_status_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            database_url: "sqlite://./data/shop_client.db".into(),
            request_timeout_secs: 10,
            poll_interval_ms: 5_000,
            settle_delay_ms: 300,
            success_status_ms: 3_000,
            failure_status_ms: 4_000,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn success_status_ttl(&self) -> Duration {
        Duration::from_millis(self.success_status_ms)
    }

    pub fn failure_status_ttl(&self) -> Duration {
        Duration::from_millis(self.failure_status_ms)
    }

    pub fn validate(&self) -> ClientResult<()> {
        let url = Url::parse(&self.api_base_url).map_err(|err| {
            ClientError::validation(format!(
                "api_base_url '{}' is not a valid url: {err}",
                self.api_base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::validation(format!(
                "api_base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::validation("request_timeout_secs must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ClientError::validation("poll_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Defaults, then `shop_client.toml` in the working directory, then `APP__*`
/// environment variables.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<ClientSettings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config: ignoring unreadable settings file"
                );
                ClientSettings::default()
            }
        },
        Err(_) => ClientSettings::default(),
    };

    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    override_number(&env, "APP__REQUEST_TIMEOUT_SECS", &mut settings.request_timeout_secs);
    override_number(&env, "APP__POLL_INTERVAL_MS", &mut settings.poll_interval_ms);
    override_number(&env, "APP__SETTLE_DELAY_MS", &mut settings.settle_delay_ms);
    override_number(&env, "APP__SUCCESS_STATUS_MS", &mut settings.success_status_ms);
    override_number(&env, "APP__FAILURE_STATUS_MS", &mut settings.failure_status_ms);

    settings
}

fn override_number(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    let Some(raw) = env(key) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = %raw, "config: ignoring non-numeric override"),
    }
}

/// Turns a bare path or `sqlite:` path into a `sqlite://` url. Creating the
/// parent directory is left to `Storage::new`.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
