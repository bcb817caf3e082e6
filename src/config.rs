//! Configuration types.
//!
//! The bind address comes from the command line. Everything else is read
//! from `HOOK_*` environment variables. Unset values fall back to defaults;
//! numeric values that fail to parse are errors.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Maps webhook POST requests to registered actions.
#[derive(Parser, Debug, Clone)]
#[command(name = "hook-dispatch", version, about, long_about = None)]
pub struct Cli {
    /// IP or DNS name this server will bind to
    pub address: String,

    /// Port number to bind to
    pub port: u16,
}

impl Cli {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Full handler configuration.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub ingress: IngressConfig,
    pub clone: CloneConfig,
    pub notify: NotifyConfig,
    /// Upper bound on a single action's `matches` + `act` (None = unbounded).
    pub action_timeout: Option<Duration>,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

/// GitHub caps webhook payloads at 25 MB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Source-address allow-list.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Address prefixes; `*` allows every source, an empty list denies all.
    pub allowed_prefixes: Vec<String>,
}

/// Settings for the clone action.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    /// Prepended to `<organization>/<name>` to form the clone URL.
    pub url_prefix: String,
    /// Directory clones land in.
    pub workdir: PathBuf,
    /// Upper bound on one `git clone` (None = unbounded).
    pub timeout: Option<Duration>,
}

/// Outbound mail settings.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Use STARTTLS/TLS against the relay.
    pub smtp_tls: bool,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Fixed sender address.
    pub from_address: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec!["*".to_string()],
        }
    }
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            url_prefix: "git@github.com:".to_string(),
            workdir: PathBuf::from("."),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            smtp_tls: false,
            username: None,
            password: None,
            from_address: "webhook-handler@localhost".to_string(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            ingress: IngressConfig::default(),
            clone: CloneConfig::default(),
            notify: NotifyConfig::default(),
            action_timeout: Some(Duration::from_secs(600)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl HandlerConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("{raw:?}: {e}"),
                    })
                })
                .transpose()
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };
        // 0 disables a timeout.
        let timeout = |key: &str, default: Option<Duration>| -> Result<_, ConfigError> {
            Ok(match number(key)? {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => default,
            })
        };

        let allowed_prefixes = match lookup("HOOK_ALLOWED_SOURCES") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.ingress.allowed_prefixes,
        };

        let workdir = match lookup("HOOK_WORKDIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        if !workdir.is_dir() {
            return Err(ConfigError::InvalidValue {
                key: "HOOK_WORKDIR".into(),
                message: format!("{} is not a directory", workdir.display()),
            });
        }

        let smtp_port = match lookup("HOOK_SMTP_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "HOOK_SMTP_PORT".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => defaults.notify.smtp_port,
        };

        let max_body_bytes = match number("HOOK_MAX_BODY_BYTES")? {
            Some(bytes) => usize::try_from(bytes).map_err(|e| ConfigError::InvalidValue {
                key: "HOOK_MAX_BODY_BYTES".into(),
                message: e.to_string(),
            })?,
            None => defaults.max_body_bytes,
        };

        let clone = CloneConfig {
            url_prefix: lookup("HOOK_CLONE_URL_PREFIX").unwrap_or(defaults.clone.url_prefix),
            workdir,
            timeout: timeout("HOOK_CLONE_TIMEOUT_SECS", defaults.clone.timeout)?,
        };

        let notify = NotifyConfig {
            enabled: flag("HOOK_NOTIFY_ENABLED", defaults.notify.enabled),
            smtp_host: lookup("HOOK_SMTP_HOST").unwrap_or(defaults.notify.smtp_host),
            smtp_port,
            smtp_tls: flag("HOOK_SMTP_TLS", defaults.notify.smtp_tls),
            username: lookup("HOOK_SMTP_USERNAME").filter(|s| !s.is_empty()),
            password: lookup("HOOK_SMTP_PASSWORD")
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            from_address: lookup("HOOK_MAIL_FROM").unwrap_or(defaults.notify.from_address),
        };

        Ok(Self {
            ingress: IngressConfig { allowed_prefixes },
            clone,
            notify,
            action_timeout: timeout("HOOK_ACTION_TIMEOUT_SECS", defaults.action_timeout)?,
            max_body_bytes,
        })
    }
}
