//! Client configuration: defaults, environment overlay, and the
//! server-provided user overrides (`GET /api/config`).

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::CoreError;
use crate::integrity::SubmissionPolicy;

/// Default server base URL (the server's default port).
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5656";

/// Notification queue tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastConfig {
    /// Maximum simultaneously visible toasts.
    pub max_visible: usize,
    /// Cadence of the admission timer.
    pub admission_interval_ms: u64,
    /// Lifetime used when an entry does not specify one. `0` = persistent.
    pub default_duration_ms: u64,
    /// Vertical gap between stacked toasts.
    pub stack_gap_px: f64,
    /// Reveal delay added per stack position.
    pub reveal_stagger_ms: u64,
    /// Time a toast spends fading before it is removed.
    pub fade_out_ms: u64,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            max_visible: 5,
            admission_interval_ms: 1000,
            default_duration_ms: 1000,
            stack_gap_px: 10.0,
            reveal_stagger_ms: 100,
            fade_out_ms: 300,
        }
    }
}

/// Task polling tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub poll_interval_ms: u64,
    /// Total layout fetch attempts before giving up.
    pub layout_max_attempts: u32,
    /// Fixed delay between layout fetch attempts.
    pub layout_backoff_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            layout_max_attempts: 5,
            layout_backoff_ms: 500,
        }
    }
}

/// Everything a tab needs to talk to the server and drive its views.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base HTTP URL of the server. A `ws://` URL selects the WebSocket
    /// push transport; requests are still sent over HTTP.
    pub server_url: String,
    /// Directory for per-tab session files. `None` keeps state in memory.
    pub session_dir: Option<PathBuf>,
    /// Origin allowed to receive host-frame messages.
    pub host_origin: Option<String>,
    pub toasts: ToastConfig,
    pub polling: PollingConfig,
    /// 1-based index of the stage driven by item counters.
    pub acquisition_stage: Option<u32>,
    /// Maximum entries retained in the persistent log.
    pub persistent_log_cap: usize,
    /// Health polling cadence while offline.
    pub offline_poll_interval_ms: u64,
    pub submission_policy: SubmissionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_dir: None,
            host_origin: None,
            toasts: ToastConfig::default(),
            polling: PollingConfig::default(),
            acquisition_stage: Some(3),
            persistent_log_cap: 500,
            offline_poll_interval_ms: 5000,
            submission_policy: SubmissionPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `SOLASOLA_SERVER_URL`            | `http://localhost:5656`  |
    /// | `SOLASOLA_SESSION_DIR`           | unset (in-memory)        |
    /// | `SOLASOLA_HOST_ORIGIN`           | unset                    |
    /// | `SOLASOLA_MAX_VISIBLE_TOASTS`    | `5`                      |
    /// | `SOLASOLA_TOAST_DURATION_MS`     | `1000`                   |
    /// | `SOLASOLA_POLL_INTERVAL_MS`      | `2000`                   |
    /// | `SOLASOLA_LAYOUT_MAX_ATTEMPTS`   | `5`                      |
    /// | `SOLASOLA_LAYOUT_BACKOFF_MS`     | `500`                    |
    /// | `SOLASOLA_PERSISTENT_LOG_CAP`    | `500`                    |
    /// | `SOLASOLA_SUBMISSION_POLICY`     | `require_all_verified`   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let server_url = lookup("SOLASOLA_SERVER_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.server_url);

        let session_dir = lookup("SOLASOLA_SESSION_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let host_origin = lookup("SOLASOLA_HOST_ORIGIN").filter(|s| !s.trim().is_empty());

        let toasts = ToastConfig {
            max_visible: parse_var(&lookup, "SOLASOLA_MAX_VISIBLE_TOASTS", defaults.toasts.max_visible)?,
            default_duration_ms: parse_var(
                &lookup,
                "SOLASOLA_TOAST_DURATION_MS",
                defaults.toasts.default_duration_ms,
            )?,
            ..defaults.toasts
        };

        let polling = PollingConfig {
            poll_interval_ms: parse_var(
                &lookup,
                "SOLASOLA_POLL_INTERVAL_MS",
                defaults.polling.poll_interval_ms,
            )?,
            layout_max_attempts: parse_var(
                &lookup,
                "SOLASOLA_LAYOUT_MAX_ATTEMPTS",
                defaults.polling.layout_max_attempts,
            )?,
            layout_backoff_ms: parse_var(
                &lookup,
                "SOLASOLA_LAYOUT_BACKOFF_MS",
                defaults.polling.layout_backoff_ms,
            )?,
        };

        let persistent_log_cap =
            parse_var(&lookup, "SOLASOLA_PERSISTENT_LOG_CAP", defaults.persistent_log_cap)?;

        let submission_policy = parse_var(
            &lookup,
            "SOLASOLA_SUBMISSION_POLICY",
            defaults.submission_policy,
        )?;

        let config = Self {
            server_url,
            session_dir,
            host_origin,
            toasts,
            polling,
            persistent_log_cap,
            submission_policy,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply the server's user overrides on top of this configuration.
    pub fn apply_overrides(&mut self, overrides: &UserConfigOverrides) {
        if let Some(v) = overrides.max_visible_toasts {
            self.toasts.max_visible = v.max(1);
        }
        if let Some(v) = overrides.toast_admission_interval_ms {
            self.toasts.admission_interval_ms = v;
        }
        if let Some(v) = overrides.default_toast_duration_ms {
            self.toasts.default_duration_ms = v;
        }
        if let Some(v) = overrides.poll_interval_ms {
            self.polling.poll_interval_ms = v;
        }
        if let Some(v) = overrides.layout_max_attempts {
            self.polling.layout_max_attempts = v.max(1);
        }
        if let Some(v) = overrides.layout_retry_backoff_ms {
            self.polling.layout_backoff_ms = v;
        }
        if let Some(v) = overrides.persistent_log_cap {
            self.persistent_log_cap = v;
        }
        if let Some(v) = overrides.acquisition_stage {
            self.acquisition_stage = (v > 0).then_some(v);
        }
    }

    /// Reject settings that would stall the timers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.toasts.max_visible == 0 {
            return Err(CoreError::Validation(
                "At least one toast must be allowed on screen".to_string(),
            ));
        }
        if self.toasts.admission_interval_ms == 0 || self.polling.poll_interval_ms == 0 {
            return Err(CoreError::Validation(
                "Timer intervals must be greater than zero".to_string(),
            ));
        }
        if self.polling.layout_max_attempts == 0 {
            return Err(CoreError::Validation(
                "Layout fetch needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration served by `GET /api/config`. Unknown keys are
/// ignored; absent keys keep the current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UserConfigOverrides {
    pub max_visible_toasts: Option<usize>,
    pub toast_admission_interval_ms: Option<u64>,
    pub default_toast_duration_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub layout_max_attempts: Option<u32>,
    pub layout_retry_backoff_ms: Option<u64>,
    pub persistent_log_cap: Option<usize>,
    pub acquisition_stage: Option<u32>,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value: '{raw}'"))),
        _ => Ok(default),
    }
}
