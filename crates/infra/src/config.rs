//! Configuration loading and representation.
//!
//! `Settings` is read once at startup and shared as `Arc<Settings>`. Values
//! come from environment variables; a `.env` file is loaded by the binary
//! before this runs.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Duration;
use serde::Serialize;
use thiserror::Error;

use portal_auth::SUPPORTED_ALGORITHMS;
use portal_auth::password::MIN_BCRYPT_COST;

pub const DEFAULT_APP_NAME: &str = "X-Road Collaboration Portal";
pub const DEFAULT_SECRET_KEY: &str = "change-me";
pub const DEFAULT_TOKEN_MINUTES: i64 = 480;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("setting '{name}' has invalid value '{value}': expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Source of raw setting values.
///
/// Lets tests supply variables without touching the process environment.
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvironmentProvider for HashMap<String, String> {
    fn get_var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Immutable application settings.
#[derive(Clone)]
pub struct Settings {
    pub app_name: String,
    pub secret_key: String,
    pub access_token_expire_minutes: i64,
    pub algorithm: String,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub upload_dir: PathBuf,
    /// Carried and reported only; no CORS layer is installed.
    pub cors_origins: Vec<String>,
    pub initial_admin_username: String,
    pub initial_admin_password: String,
    pub initial_admin_email: String,
    pub bcrypt_cost: u32,
    pub bind_addr: String,
}

impl core::fmt::Debug for Settings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("access_token_expire_minutes", &self.access_token_expire_minutes)
            .field("algorithm", &self.algorithm)
            .field("database", &self.database_url.as_ref().map(|_| "postgres"))
            .field("upload_dir", &self.upload_dir)
            .field("cors_origins", &self.cors_origins)
            .field("initial_admin_username", &self.initial_admin_username)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("bind_addr", &self.bind_addr)
            .finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            access_token_expire_minutes: DEFAULT_TOKEN_MINUTES,
            algorithm: "HS256".to_string(),
            database_url: None,
            upload_dir: PathBuf::from("storage/files"),
            cors_origins: Vec::new(),
            initial_admin_username: "admin".to_string(),
            initial_admin_password: "admin".to_string(),
            initial_admin_email: "admin@example.com".to_string(),
            bcrypt_cost: 12,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_provider(&SystemEnvironment)
    }

    pub fn from_provider(env: &dyn EnvironmentProvider) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            env.get_var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let access_token_expire_minutes = match env.get_var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Some(raw) => parse_positive_minutes(&raw)?,
            None => defaults.access_token_expire_minutes,
        };

        let algorithm = text("ALGORITHM", defaults.algorithm).to_ascii_uppercase();
        if !SUPPORTED_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(ConfigError::InvalidValue {
                name: "ALGORITHM",
                value: algorithm,
                expected: "one of HS256, HS384, HS512",
            });
        }

        let bcrypt_cost = match env.get_var("BCRYPT_COST") {
            Some(raw) => parse_cost(&raw)?,
            None => defaults.bcrypt_cost,
        };

        let settings = Self {
            app_name: text("APP_NAME", defaults.app_name),
            secret_key: text("SECRET_KEY", defaults.secret_key),
            access_token_expire_minutes,
            algorithm,
            database_url: env
                .get_var("DATABASE_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            upload_dir: PathBuf::from(text(
                "UPLOAD_DIR",
                defaults.upload_dir.to_string_lossy().into_owned(),
            )),
            cors_origins: env
                .get_var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            initial_admin_username: text("INITIAL_ADMIN_USERNAME", defaults.initial_admin_username),
            initial_admin_password: text("INITIAL_ADMIN_PASSWORD", defaults.initial_admin_password),
            initial_admin_email: text("INITIAL_ADMIN_EMAIL", defaults.initial_admin_email),
            bcrypt_cost,
            bind_addr: text("BIND_ADDR", defaults.bind_addr),
        };

        if settings.secret_key == DEFAULT_SECRET_KEY {
            tracing::warn!("SECRET_KEY not set; using insecure default");
        }
        Ok(settings)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::minutes(self.access_token_expire_minutes)
    }

    /// The subset safe to show to administrators.
    pub fn public_view(&self) -> PublicSettings {
        PublicSettings {
            app_name: self.app_name.clone(),
            access_token_expire_minutes: self.access_token_expire_minutes,
            upload_dir: self.upload_dir.to_string_lossy().into_owned(),
            cors_origins: self.cors_origins.clone(),
        }
    }
}

/// Settings as reported by the settings read; never carries secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicSettings {
    pub app_name: String,
    pub access_token_expire_minutes: i64,
    pub upload_dir: String,
    pub cors_origins: Vec<String>,
}

fn parse_positive_minutes(raw: &str) -> Result<i64, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            name: "ACCESS_TOKEN_EXPIRE_MINUTES",
            value: raw.to_string(),
            expected: "a positive integer",
        }),
    }
}

fn parse_cost(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(v) if (MIN_BCRYPT_COST..=31).contains(&v) => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            name: "BCRYPT_COST",
            value: raw.to_string(),
            expected: "an integer between 4 and 31",
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
