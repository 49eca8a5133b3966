//! gateway-mediator configuration loading.
//!
//! TOML is the sole config source; only secrets come from outside the
//! file, via a credentials file path rather than inline values — the same
//! indirection the teacher's forwarder uses for `auth.token_file`.
//!
//! Default config path: `/etc/rusty-timer/gateway-mediator.toml`,
//! overridable with `--config` / `GATEWAY_MEDIATOR_CONFIG`.
//!
//! # Credentials file format
//! Two lines: username, then password. Both trimmed on read.

use cloud_client::Environment;
use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub cloud_environment: Environment,
    pub username: String,
    pub password: String,
    pub device: DeviceConfig,
    pub http: HttpConfig,
    pub mqtt: Option<MqttConfig>,
    pub hub: Option<HubConfig>,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Explicit endpoint paths; if empty, `discover` is consulted.
    pub endpoints: Vec<String>,
    pub discover: bool,
    pub discover_dir: String,
    pub discover_prefix: String,
    pub reset_threshold: u32,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub url: String,
    pub device_name: String,
    pub local_port: u16,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    cloud: Option<RawCloudConfig>,
    auth: Option<RawAuthConfig>,
    device: Option<RawDeviceConfig>,
    http: Option<RawHttpConfig>,
    mqtt: Option<RawMqttConfig>,
    hub: Option<RawHubConfig>,
}

#[derive(Debug, Deserialize)]
struct RawCloudConfig {
    environment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthConfig {
    credentials_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    endpoints: Option<Vec<String>>,
    discover: Option<bool>,
    discover_dir: Option<String>,
    discover_prefix: Option<String>,
    reset_threshold: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMqttConfig {
    broker_host: Option<String>,
    broker_port: Option<u16>,
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHubConfig {
    url: Option<String>,
    device_name: Option<String>,
    local_port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rusty-timer/gateway-mediator.toml";

pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(format!("reading config file '{}': {}", path.display(), e))
    })?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_cloud = raw
        .cloud
        .ok_or_else(|| ConfigError::MissingField("cloud".to_owned()))?;
    let environment_str = raw_cloud
        .environment
        .ok_or_else(|| ConfigError::MissingField("cloud.environment".to_owned()))?;
    let cloud_environment = match environment_str.to_ascii_uppercase().as_str() {
        "UAT" => Environment::Uat,
        "SANDBOX" => Environment::Sandbox,
        other => {
            return Err(ConfigError::InvalidValue(format!(
                "cloud.environment must be UAT or SANDBOX, got '{other}'"
            )))
        }
    };

    let raw_auth = raw
        .auth
        .ok_or_else(|| ConfigError::MissingField("auth".to_owned()))?;
    let credentials_file_path = raw_auth
        .credentials_file
        .ok_or_else(|| ConfigError::MissingField("auth.credentials_file".to_owned()))?;
    let (username, password) = read_credentials_file(&credentials_file_path)?;

    let raw_device = raw.device.unwrap_or(RawDeviceConfig {
        endpoints: None,
        discover: None,
        discover_dir: None,
        discover_prefix: None,
        reset_threshold: None,
    });
    let endpoints = raw_device.endpoints.unwrap_or_default();
    let discover = raw_device.discover.unwrap_or(endpoints.is_empty());
    if !discover && endpoints.is_empty() {
        return Err(ConfigError::InvalidValue(
            "no device endpoints configured and device.discover is false".to_owned(),
        ));
    }
    let device = DeviceConfig {
        endpoints,
        discover,
        discover_dir: raw_device.discover_dir.unwrap_or_else(|| "/dev".to_owned()),
        discover_prefix: raw_device
            .discover_prefix
            .unwrap_or_else(|| "ttyUSB".to_owned()),
        reset_threshold: raw_device.reset_threshold.unwrap_or(3),
    };

    let http = match raw.http {
        Some(h) => HttpConfig {
            bind: h.bind.unwrap_or_else(default_http_bind),
        },
        None => HttpConfig {
            bind: default_http_bind(),
        },
    };

    let mqtt = match raw.mqtt {
        Some(m) => Some(MqttConfig {
            broker_host: m
                .broker_host
                .ok_or_else(|| ConfigError::MissingField("mqtt.broker_host".to_owned()))?,
            broker_port: m.broker_port.unwrap_or(1883),
            device_id: m
                .device_id
                .ok_or_else(|| ConfigError::MissingField("mqtt.device_id".to_owned()))?,
        }),
        None => None,
    };

    let hub = match raw.hub {
        Some(h) => Some(HubConfig {
            url: h
                .url
                .ok_or_else(|| ConfigError::MissingField("hub.url".to_owned()))?,
            device_name: h.device_name.unwrap_or_else(|| "gateway-mediator".to_owned()),
            local_port: h.local_port.unwrap_or(5000),
        }),
        None => None,
    };

    Ok(GatewayConfig {
        schema_version,
        cloud_environment,
        username,
        password,
        device,
        http,
        mqtt,
        hub,
    })
}

fn default_http_bind() -> String {
    "0.0.0.0:8000".to_owned()
}

fn read_credentials_file(path: &str) -> Result<(String, String), ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading credentials file '{path}': {e}")))?;
    let mut lines = content.lines();
    let username = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ConfigError::InvalidValue(format!("credentials file '{path}' is missing a username line"))
        })?
        .to_owned();
    let password = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ConfigError::InvalidValue(format!("credentials file '{path}' is missing a password line"))
        })?
        .to_owned();
    Ok((username, password))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
