use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cwmp_sim::{EngineConfig, SimulatorOptions};

pub const DEFAULT_ACS_URL: &str = "http://127.0.0.1:7547/";
pub const DEFAULT_SERIAL_NUMBER: &str = "000000";

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    pub acs_url: Option<String>,
    pub serial_number: Option<String>,
    pub data_model: Option<PathBuf>,
    pub devices: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub default_inform_interval_secs: Option<u64>,
    pub ca_file: Option<PathBuf>,
}

impl SimulatorConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn acs_url(&self) -> &str {
        self.acs_url.as_deref().unwrap_or(DEFAULT_ACS_URL)
    }

    pub fn serial_number(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(DEFAULT_SERIAL_NUMBER)
    }

    pub fn devices(&self) -> u32 {
        self.devices.unwrap_or(1).max(1)
    }

    pub fn options(&self) -> SimulatorOptions {
        let defaults = EngineConfig::default();
        SimulatorOptions {
            engine: EngineConfig {
                request_timeout: self
                    .request_timeout_secs
                    .map_or(defaults.request_timeout, Duration::from_secs),
                default_inform_interval: self
                    .default_inform_interval_secs
                    .map_or(defaults.default_inform_interval, Duration::from_secs),
            },
            ca_file: self.ca_file.clone(),
        }
    }

    /// One serial per simulated device. A single device keeps the base serial;
    /// several get `-0001`, `-0002`, ... appended.
    pub fn device_serials(&self) -> Vec<String> {
        let base = self.serial_number();
        match self.devices() {
            1 => vec![base.to_string()],
            count => (1..=count).map(|index| format!("{base}-{index:04}")).collect(),
        }
    }
}
