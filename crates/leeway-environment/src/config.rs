// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for leeway-environment.
//!
//! Every setting is a `LEEWAY_*` variable. Values come from the process
//! environment (after `.env` has been loaded by the binary) and fall back to
//! the ini file `/etc/opendrift-leeway-webgui.ini`, where each `key = value`
//! of any section provides `LEEWAY_{KEY}`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::mailbox::{ImapConfig, MailboxPollerConfig};
use crate::notifier::MailConfig;
use crate::queue::TaskQueueConfig;
use crate::retention::RetentionSweeperConfig;
use crate::server::ServerConfig;
use crate::tasks::SimulationConfig;

/// Prefix shared by all settings.
pub const ENV_PREFIX: &str = "LEEWAY_";

/// Ini file consulted for settings not present in the environment.
pub const DEFAULT_INI_PATH: &str = "/etc/opendrift-leeway-webgui.ini";

/// Flat view over `LEEWAY_*` settings.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: HashMap<String, String>,
}

impl Vars {
    /// Collect `LEEWAY_*` variables from the environment, then fill gaps from the ini file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut vars = Self::from_pairs(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)));
        let ini_path = vars
            .get("CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INI_PATH));
        if ini_path.is_file() {
            vars.merge_ini_file(&ini_path)?;
        } else {
            debug!(path = %ini_path.display(), "No ini file found");
        }
        Ok(vars)
    }

    /// Build from explicit `(name, value)` pairs; names carry the `LEEWAY_` prefix.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Add ini entries as `LEEWAY_{KEY}` without overriding existing values.
    pub fn merge_ini_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| ConfigError::Ini {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.merge_ini(&ini);
        Ok(())
    }

    /// Same as [`merge_ini_file`](Self::merge_ini_file) for inline ini text.
    pub fn merge_ini_str(&mut self, text: &str) -> Result<(), ConfigError> {
        let ini = ini::Ini::load_from_str(text).map_err(|e| ConfigError::Ini {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        self.merge_ini(&ini);
        Ok(())
    }

    fn merge_ini(&mut self, ini: &ini::Ini) {
        for (_, properties) in ini.iter() {
            for (key, value) in properties.iter() {
                self.values
                    .entry(format!("{ENV_PREFIX}{}", key.to_uppercase()))
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    /// Raw value of `LEEWAY_{name}`; blank values count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&format!("{ENV_PREFIX}{name}"))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Value or default.
    pub fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }

    /// Parse a value, falling back to `default` when unset.
    pub fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: format!("{ENV_PREFIX}{name}"),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Boolean, see [`strtobool`].
    pub fn bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => strtobool(raw).ok_or_else(|| ConfigError::Invalid {
                var: format!("{ENV_PREFIX}{name}"),
                value: raw.to_string(),
                reason: "expected one of y, yes, t, true, on, 1, n, no, f, false, off, 0"
                    .to_string(),
            }),
        }
    }

    /// Seconds as a [`Duration`].
    pub fn secs(&self, name: &str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default).map(Duration::from_secs)
    }
}

/// `y/yes/t/true/on/1` → true, `n/no/f/false/off/0` → false, case-insensitive.
pub fn strtobool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL, e.g. `sqlite:leeway.db?mode=rwc`.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Debug mode: console mail backend by default.
    pub debug: bool,
    /// HTTP surface settings.
    pub server: ServerConfig,
    /// Simulation execution settings.
    pub simulation: SimulationConfig,
    /// Job queue settings.
    pub queue: TaskQueueConfig,
    /// Retention sweeper settings.
    pub retention: RetentionSweeperConfig,
    /// Outbound mail settings.
    pub mail: MailConfig,
    /// Mailbox polling settings.
    pub mailbox: MailboxPollerConfig,
    /// IMAP account; `None` when no password is configured.
    pub imap: Option<ImapConfig>,
}

impl Config {
    /// Load configuration from the environment and the ini file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&Vars::from_env()?)
    }

    /// Build configuration from an explicit set of variables.
    pub fn from_vars(vars: &Vars) -> Result<Self, ConfigError> {
        let debug = vars.bool("DEBUG", false)?;
        let port: u16 = vars.parse("HTTP_PORT", 8000)?;
        let host: std::net::IpAddr = vars.parse("HTTP_HOST", std::net::IpAddr::from([0, 0, 0, 0]))?;

        let simulation = SimulationConfig::from_vars(vars)?;
        let mail = MailConfig::from_vars(vars, debug)?;
        let imap = ImapConfig::from_vars(vars, &mail)?;
        let mut mailbox = MailboxPollerConfig::from_vars(vars)?;
        if imap.is_none() {
            mailbox.enabled = false;
        }

        Ok(Self {
            database_url: vars.string("DATABASE_URL", "sqlite:leeway.db?mode=rwc"),
            http_addr: SocketAddr::new(host, port),
            debug,
            server: ServerConfig::from_vars(vars, simulation.output_dir())?,
            queue: TaskQueueConfig::from_vars(vars)?,
            retention: RetentionSweeperConfig::from_vars(vars)?,
            simulation,
            mail,
            mailbox,
            imap,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// A variable could not be parsed.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        /// Full variable name.
        var: String,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// An SMTP password is set but there is no sender address.
    #[error("LEEWAY_EMAIL_HOST_PASSWORD is set, but LEEWAY_SERVER_EMAIL is missing")]
    PasswordWithoutSender,

    /// The ini file exists but could not be read.
    #[error("Failed to load ini file {path}: {reason}")]
    Ini {
        /// File path.
        path: String,
        /// Loader message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MailBackend;
    use crate::runner::PrefetchMode;
    use leeway_core::RetentionAnchor;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        Vars::from_pairs(pairs.iter().map(|(k, v)| (format!("LEEWAY_{k}"), v.to_string())))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&Vars::default()).unwrap();
        assert_eq!(config.database_url, "sqlite:leeway.db?mode=rwc");
        assert_eq!(config.http_addr.port(), 8000);
        assert!(!config.debug);
        assert_eq!(config.simulation.number_drifters, 100);
        assert!(config.simulation.no_web);
        assert_eq!(config.simulation.prefetch_mode, PrefetchMode::Off);
        assert_eq!(config.queue.time_limit, Duration::from_secs(1800));
        assert_eq!(config.retention.max_age, Duration::from_secs(7 * 86400));
        assert_eq!(config.retention.anchor, RetentionAnchor::Submitted);
        assert!(config.retention.enabled);
        assert_eq!(config.mail.backend, MailBackend::Smtp);
        assert_eq!(config.mail.port, 587);
        assert!(config.mail.use_tls);
        assert!(!config.mail.use_ssl);
        assert!(config.imap.is_none());
        assert!(!config.mailbox.enabled);
        assert_eq!(
            config.server.allowed_hosts,
            vec![".localhost", "127.0.0.1", "[::1]"]
        );
    }

    #[test]
    fn test_debug_switches_mail_backend_to_console() {
        let config = Config::from_vars(&vars(&[("DEBUG", "yes")])).unwrap();
        assert!(config.debug);
        assert_eq!(config.mail.backend, MailBackend::Console);

        let config = Config::from_vars(&vars(&[("DEBUG", "on"), ("EMAIL_BACKEND", "smtp")])).unwrap();
        assert_eq!(config.mail.backend, MailBackend::Smtp);
    }

    #[test]
    fn test_strtobool() {
        for v in ["y", "YES", "t", "True", "on", "1"] {
            assert_eq!(strtobool(v), Some(true), "{v}");
        }
        for v in ["n", "No", "f", "FALSE", "off", "0"] {
            assert_eq!(strtobool(v), Some(false), "{v}");
        }
        assert_eq!(strtobool("maybe"), None);

        let err = Config::from_vars(&vars(&[("DEBUG", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn test_password_requires_server_email() {
        let err = Config::from_vars(&vars(&[("EMAIL_HOST_PASSWORD", "pw")])).unwrap_err();
        assert!(matches!(err, ConfigError::PasswordWithoutSender));

        let config = Config::from_vars(&vars(&[
            ("EMAIL_HOST_PASSWORD", "pw"),
            ("SERVER_EMAIL", "leeway@example.org"),
            ("EMAIL_HOST", "mail.example.org"),
        ]))
        .unwrap();
        assert_eq!(config.mail.user.as_deref(), Some("leeway@example.org"));
        let imap = config.imap.expect("imap configured with password");
        assert_eq!(imap.host, "mail.example.org");
        assert_eq!(imap.port, 993);
        assert_eq!(imap.user, "leeway@example.org");
        assert!(config.mailbox.enabled);
        assert_eq!(config.mailbox.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_allowed_hosts_are_appended_per_line() {
        let config =
            Config::from_vars(&vars(&[("ALLOWED_HOSTS", "leeway.example.org\n  .example.net \n")]))
                .unwrap();
        assert_eq!(
            config.server.allowed_hosts,
            vec![".localhost", "127.0.0.1", "[::1]", "leeway.example.org", ".example.net"]
        );
    }

    #[test]
    fn test_ini_does_not_override_environment() {
        let mut v = vars(&[("SIMULATION_RETENTION", "3")]);
        v.merge_ini_str(
            "[base]\nsimulation_retention = 14\ndebug = true\n[email]\nemail_port = 2525\n",
        )
        .unwrap();
        let config = Config::from_vars(&v).unwrap();
        assert_eq!(config.retention.max_age, Duration::from_secs(3 * 86400));
        assert!(config.debug);
        assert_eq!(config.mail.port, 2525);
    }

    #[test]
    fn test_invalid_number_reports_variable() {
        let err = Config::from_vars(&vars(&[("HTTP_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("LEEWAY_HTTP_PORT"), "{err}");
    }
}
