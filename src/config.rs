//! Environment configuration. Every key is prefixed `ROOMGATE_`.
//!
//! Only the approver address is required. SMTP is all-or-nothing: host, user
//! and pass are set together or not at all. Without them the gated room cannot
//! deliver passcodes and its bookings are refused.

use std::path::PathBuf;
use std::time::Duration;

use crate::limits::*;
use crate::mailer::{SmtpSettings, is_email};
use crate::otp::OtpPolicy;
use crate::workflow::WorkflowSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub approver_email: String,
    pub approver_pin: Option<String>,
    pub smtp: Option<SmtpSettings>,
    pub brand: String,
    pub daily_limit: u32,
    pub max_pending: usize,
    pub delivery_timeout: Duration,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingApprover,
    InvalidApprover(String),
    Invalid { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingApprover => write!(f, "ROOMGATE_APPROVER_EMAIL is not set"),
            ConfigError::InvalidApprover(v) => write!(f, "approver address is not an email: {v}"),
            ConfigError::Invalid { key, value } => write!(f, "invalid {key}: {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let approver_email = var("ROOMGATE_APPROVER_EMAIL").ok_or(ConfigError::MissingApprover)?;
        if !is_email(&approver_email) {
            return Err(ConfigError::InvalidApprover(approver_email));
        }

        let smtp = match (
            var("ROOMGATE_SMTP_HOST"),
            var("ROOMGATE_SMTP_USER"),
            var("ROOMGATE_SMTP_PASS"),
        ) {
            (None, None, None) => None,
            (Some(host), Some(username), Some(password)) => Some(SmtpSettings {
                host,
                port: parse_or("ROOMGATE_SMTP_PORT", var("ROOMGATE_SMTP_PORT"), 465)?,
                from: var("ROOMGATE_SMTP_FROM").unwrap_or_else(|| username.clone()),
                username,
                password,
                from_name: var("ROOMGATE_SMTP_FROM_NAME").unwrap_or_else(|| "Room Booking".into()),
            }),
            (host, user, _) => {
                let key = if host.is_none() {
                    "ROOMGATE_SMTP_HOST"
                } else if user.is_none() {
                    "ROOMGATE_SMTP_USER"
                } else {
                    "ROOMGATE_SMTP_PASS"
                };
                return Err(ConfigError::Invalid {
                    key,
                    value: "missing; SMTP host, user and pass go together".into(),
                });
            }
        };

        let metrics_port = match var("ROOMGATE_METRICS_PORT") {
            None => None,
            Some(v) => Some(parse_or("ROOMGATE_METRICS_PORT", Some(v), 0u16)?),
        };

        Ok(Self {
            data_dir: PathBuf::from(var("ROOMGATE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            approver_email,
            approver_pin: var("ROOMGATE_APPROVER_PIN"),
            smtp,
            brand: var("ROOMGATE_BRAND").unwrap_or_else(|| "Room Booking".into()),
            daily_limit: parse_or("ROOMGATE_DAILY_LIMIT", var("ROOMGATE_DAILY_LIMIT"), OTP_DAILY_LIMIT)?,
            max_pending: parse_or("ROOMGATE_MAX_PENDING", var("ROOMGATE_MAX_PENDING"), MAX_PENDING_SESSIONS)?,
            delivery_timeout: Duration::from_secs(parse_or(
                "ROOMGATE_DELIVERY_TIMEOUT_SECS",
                var("ROOMGATE_DELIVERY_TIMEOUT_SECS"),
                DELIVERY_TIMEOUT_SECS,
            )?),
            metrics_port,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("reservations.snap")
    }

    pub fn rate_limit_path(&self) -> PathBuf {
        self.data_dir.join("otp_rate_limits.json")
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            approver: self.approver_email.clone(),
            max_pending: self.max_pending,
            delivery_timeout: self.delivery_timeout,
            abandon_grace: chrono::Duration::seconds(OTP_ABANDON_GRACE_SECS),
            policy: OtpPolicy::default(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}
