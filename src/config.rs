//! Connection settings

use crate::error::{AvrError, Result};
use serde::{Deserialize, Serialize};

/// Default receiver address
pub const DEFAULT_HOST: &str = "192.168.213.192";

/// Ports the receiver's control service may listen on, tried in order
pub const DEFAULT_PORTS: [u16; 5] = [23, 8102, 49152, 49153, 49154];

/// Base name of the optional config file (`pioneer-avr.toml`, `.json`, `.yaml`)
const CONFIG_FILE: &str = "pioneer-avr";

/// Environment variable prefix (`AVR_HOST`, `AVR_PORTS`)
const ENV_PREFIX: &str = "AVR";

/// Where to find the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvrConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Candidate ports, tried in order until one accepts
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

impl Default for AvrConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ports: default_ports(),
        }
    }
}

impl AvrConfig {
    /// Config for `host` with the default port list
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Replace the candidate port list
    pub fn with_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ports = ports.into();
        self
    }

    fn validate(self) -> Result<Self> {
        if self.host.trim().is_empty() {
            return Err(AvrError::Config(::config::ConfigError::Message(
                "host must not be empty".to_string(),
            )));
        }
        if self.ports.is_empty() {
            return Err(AvrError::Config(::config::ConfigError::Message(
                "at least one port is required".to_string(),
            )));
        }
        Ok(self)
    }
}

/// Load settings from defaults, then `pioneer-avr.*` in the working
/// directory if present, then `AVR_*` environment variables
/// (`AVR_PORTS` takes a comma separated list).
pub fn load_config() -> Result<AvrConfig> {
    build(
        ::config::File::with_name(CONFIG_FILE).required(false),
        ::config::Environment::with_prefix(ENV_PREFIX),
    )
}

type ConfigFile = ::config::File<::config::FileSourceFile, ::config::FileFormat>;

fn build(file: ConfigFile, env: ::config::Environment) -> Result<AvrConfig> {
    let defaults = AvrConfig::default();
    let ports: Vec<i64> = defaults.ports.iter().map(|&p| i64::from(p)).collect();

    let settings = ::config::Config::builder()
        .set_default("host", defaults.host)?
        .set_default("ports", ports)?
        .add_source(file)
        .add_source(
            env.try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ports"),
        )
        .build()?;

    let config: AvrConfig = settings.try_deserialize()?;
    config.validate()
}
