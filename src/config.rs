use anyhow::{bail, Context, Result};
use serde_derive::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::homewizard::DATA_ENDPOINT;
use crate::publisher::DEFAULT_UPDATE_INTERVAL;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_CUSTOM_NAME: &str = "Home Wizard Energy P1";
pub const DEFAULT_SIGN_OF_LIFE_MINUTES: i64 = 5;

/// Environment variable overriding `onpremise.host`.
pub const HOST_ENV: &str = "P1_HOST";

/// Role the meter plays in the energy system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Grid,
    PvInverter,
}

impl Role {
    pub const ALLOWED: [&'static str; 2] = ["pvinverter", "grid"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "grid" => Some(Role::Grid),
            "pvinverter" => Some(Role::PvInverter),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Grid => "grid",
            Role::PvInverter => "pvinverter",
        }
    }
}

/// How the meter is reached. Only the local API is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    OnPremise,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    general: RawGeneral,
    #[serde(default)]
    onpremise: RawOnPremise,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeneral {
    access_type: Option<String>,
    device_instance: Option<u32>,
    role: Option<String>,
    position: Option<i64>,
    custom_name: Option<String>,
    sign_of_life_minutes: Option<i64>,
    update_interval_ms: Option<u64>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOnPremise {
    host: Option<String>,
}

/// Validated service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub access_type: AccessType,
    pub host: String,
    pub device_instance: u32,
    pub role: Role,
    pub position: i64,
    pub custom_name: String,
    pub sign_of_life_minutes: i64,
    pub update_interval: Duration,
    pub log_level: String,
}

impl Config {
    /// Loads and validates the TOML file at `path`.
    ///
    /// A missing file is treated as empty. Outside development mode the
    /// required keys must then be present; in development mode they default.
    pub fn load(path: impl AsRef<Path>, dev_mode: bool) -> Result<Self> {
        let path = path.as_ref();
        let raw = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?
        } else {
            warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            RawConfig::default()
        };
        Self::from_raw(raw, env::var(HOST_ENV).ok(), dev_mode)
    }

    pub fn from_toml(content: &str, dev_mode: bool) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        Self::from_raw(raw, None, dev_mode)
    }

    fn from_raw(mut raw: RawConfig, host_override: Option<String>, dev_mode: bool) -> Result<Self> {
        if let Some(host) = host_override.filter(|h| !h.is_empty()) {
            raw.onpremise.host = Some(host);
        }
        if dev_mode {
            fill_dev_defaults(&mut raw);
        }

        let general = raw.general;
        let Some(access_type) = general.access_type else {
            bail!("Missing key 'access_type' in section 'general'");
        };
        let Some(device_instance) = general.device_instance else {
            bail!("Missing key 'device_instance' in section 'general'");
        };
        let Some(role) = general.role else {
            bail!("Missing key 'role' in section 'general'");
        };
        let Some(host) = raw.onpremise.host else {
            bail!("Missing key 'host' in section 'onpremise'");
        };

        let role = match Role::parse(&role) {
            Some(role) => role,
            None if dev_mode => {
                warn!("Invalid role '{role}', using 'grid' for development mode");
                Role::Grid
            }
            None => bail!(
                "Configured role '{role}' is not in the allowed list: {:?}",
                Role::ALLOWED
            ),
        };
        let access_type = match access_type.as_str() {
            "OnPremise" => AccessType::OnPremise,
            other => bail!("AccessType {other} is not supported"),
        };

        let update_interval = match general.update_interval_ms {
            Some(0) => bail!("update_interval_ms must be greater than zero"),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_UPDATE_INTERVAL,
        };

        Ok(Self {
            access_type,
            host,
            device_instance,
            role,
            position: general.position.unwrap_or(0),
            custom_name: general
                .custom_name
                .unwrap_or_else(|| DEFAULT_CUSTOM_NAME.to_string()),
            sign_of_life_minutes: general
                .sign_of_life_minutes
                .unwrap_or(DEFAULT_SIGN_OF_LIFE_MINUTES),
            update_interval,
            log_level: general.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Full URL of the meter's status endpoint.
    pub fn api_url(&self) -> String {
        match self.access_type {
            AccessType::OnPremise => format!("http://{}{}", self.host, DATA_ENDPOINT),
        }
    }

    /// `None` when liveness reporting is disabled (zero or negative minutes).
    pub fn liveness_interval(&self) -> Option<Duration> {
        u64::try_from(self.sign_of_life_minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes * 60))
    }
}

fn fill_dev_defaults(raw: &mut RawConfig) {
    let general = &mut raw.general;
    if general.device_instance.is_none() {
        warn!("Using default device_instance=42 for development mode");
        general.device_instance = Some(42);
    }
    if general.role.is_none() {
        warn!("Using default role=grid for development mode");
        general.role = Some("grid".to_string());
    }
    if general.access_type.is_none() {
        warn!("Using default access_type=OnPremise for development mode");
        general.access_type = Some("OnPremise".to_string());
    }
    if raw.onpremise.host.is_none() {
        warn!("Using default host=127.0.0.1 for development mode");
        raw.onpremise.host = Some("127.0.0.1".to_string());
    }
}
