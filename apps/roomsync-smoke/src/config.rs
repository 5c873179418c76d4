//! Environment-backed configuration for `roomsync-smoke`.

use std::{env, time::Duration};

use roomsync_core::{ConfigError, DEFAULT_POLL_INTERVAL_MS, UserRef};

const DEFAULT_RUN_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub endpoint: String,
    pub app_id: String,
    /// Sent as `x-api-token` on every request when present.
    pub api_token: Option<String>,
    pub room_id: String,
    pub user: UserRef,
    pub poll_interval_ms: u64,
    /// How long to poll before stopping.
    pub run_for: Duration,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let endpoint = required_trimmed_env("ROOMSYNC_ENDPOINT", &mut lookup)?;
        let app_id = required_trimmed_env("ROOMSYNC_APP_ID", &mut lookup)?;
        let room_id = required_trimmed_env("ROOMSYNC_ROOM_ID", &mut lookup)?;
        let user_id = required_trimmed_env("ROOMSYNC_USER_ID", &mut lookup)?;
        let api_token = optional_trimmed_env("ROOMSYNC_API_TOKEN", &mut lookup);

        let mut user = UserRef::new(user_id);
        if let Some(handle) = optional_trimmed_env("ROOMSYNC_USER_HANDLE", &mut lookup) {
            user = user.with_handle(handle);
        }

        let poll_interval_ms = parse_optional_u64(
            "ROOMSYNC_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            &mut lookup,
        )?;
        let run_secs = parse_optional_u64("ROOMSYNC_RUN_SECS", DEFAULT_RUN_SECS, &mut lookup)?;
        if run_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMSYNC_RUN_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            endpoint,
            app_id,
            api_token,
            room_id,
            user,
            poll_interval_ms,
            run_for: Duration::from_secs(run_secs),
        })
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing(key))
}

fn parse_optional_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
