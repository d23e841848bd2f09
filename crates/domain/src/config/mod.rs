mod logging;
mod sessions;

pub use logging::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        self.sessions.validate()
    }
}

impl SessionsConfig {
    /// Issues in the `[sessions]` table.  Managers refuse to start while
    /// any of them is an error.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = self;

        let lifetimes = [
            ("sessions.server_lifetime_secs", s.server_lifetime_secs),
            ("sessions.messaging_lifetime_secs", s.messaging_lifetime_secs),
            ("sessions.client_lifetime_secs", s.client_lifetime_secs),
            ("sessions.api_session_expiry_secs", s.api_session_expiry_secs),
        ];
        for (field, secs) in lifetimes {
            if secs <= 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "lifetime must be greater than 0".into(),
                });
            }
        }

        // A margin at or above the lifetime renews on every call.
        if s.client_renewal_margin_secs < 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.client_renewal_margin_secs".into(),
                message: "margin must not be negative".into(),
            });
        } else if s.client_renewal_margin_secs >= s.client_lifetime_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.client_renewal_margin_secs".into(),
                message: "margin must be shorter than client_lifetime_secs".into(),
            });
        }

        if s.web_renewal_margin_secs < 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.web_renewal_margin_secs".into(),
                message: "margin must not be negative".into(),
            });
        }

        if s.sweep_interval_secs == Some(0) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.sweep_interval_secs".into(),
                message: "sweep interval must be greater than 0 (omit to disable)".into(),
            });
        }

        let mut seen = HashSet::new();
        for (i, site) in s.sites.iter().enumerate() {
            if site.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.sites[{i}].name"),
                    message: "site name must not be empty".into(),
                });
            } else if !seen.insert(site.name.as_str()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.sites[{i}].name"),
                    message: format!("duplicate site name {:?}", site.name),
                });
            }

            if site.login.url().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.sites[{i}].login.url"),
                    message: "login url must not be empty".into(),
                });
            }

            if site.effective_ttl_secs() <= 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.sites[{i}].ttl_secs"),
                    message: "ttl must be greater than 0".into(),
                });
            } else if site.effective_ttl_secs() <= s.web_renewal_margin_secs {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("sessions.sites[{i}].ttl_secs"),
                    message: "ttl is not longer than web_renewal_margin_secs; every call will log in"
                        .into(),
                });
            }

            if let SiteLoginConfig::Form {
                username_env,
                password_env,
                ..
            } = &site.login
            {
                if username_env.is_empty() || password_env.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("sessions.sites[{i}].login"),
                        message: "form logins need username_env and password_env".into(),
                    });
                }
            }
        }

        errors
    }
}
