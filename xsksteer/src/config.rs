use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use aya::programs::XdpFlags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::SteeringSettings;
use crate::error::Result;
use crate::layout::SocketLayout;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/xsksteer/xsksteer.toml";
pub const DEFAULT_PIN_PATH: &str = "/sys/fs/bpf/xsksteer";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interface: InterfaceConfig,
    pub steering: SteeringConfig,
    pub bpf: BpfConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub name: String,
    pub mode: XdpMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    pub sockets_per_queue: u32,
    pub queues: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BpfConfig {
    pub pin_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// How the XDP program is attached to the interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum XdpMode {
    /// Generic XDP, works on any driver
    #[default]
    Skb,
    /// Native driver XDP
    Driver,
    /// Offloaded to the NIC
    Hw,
}

impl XdpMode {
    pub fn flags(self) -> XdpFlags {
        match self {
            XdpMode::Skb => XdpFlags::SKB_MODE,
            XdpMode::Driver => XdpFlags::DRV_MODE,
            XdpMode::Hw => XdpFlags::HW_MODE,
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: "eth0".to_string(),
            mode: XdpMode::Skb,
        }
    }
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port: 1234,
            sockets_per_queue: 1,
            queues: vec![0],
        }
    }
}

impl Default for BpfConfig {
    fn default() -> Self {
        Self {
            pin_path: PathBuf::from(DEFAULT_PIN_PATH),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Reasons a configuration cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interface name is empty")]
    EmptyInterface,
    #[error("sockets_per_queue must be at least 1")]
    ZeroSocketsPerQueue,
    #[error("at least one receive queue must be listed")]
    NoQueues,
    #[error("queue {0} is listed more than once")]
    DuplicateQueue(u32),
    #[error("queue {queue} needs socket index {index}, beyond the {max}-slot table")]
    LayoutTooLarge { queue: u32, index: u64, max: u32 },
}

impl Config {
    /// Loads the configuration, falling back to defaults when `path` does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.interface.name.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }

        let mut seen = HashSet::new();
        for &queue in &self.steering.queues {
            if !seen.insert(queue) {
                return Err(ConfigError::DuplicateQueue(queue));
            }
        }

        self.layout().map(|_| ())
    }

    /// Values written into the configuration maps.
    pub fn settings(&self) -> SteeringSettings {
        SteeringSettings {
            sockets_per_queue: self.steering.sockets_per_queue,
            bound_address: self.steering.address,
            bound_port: self.steering.port,
        }
    }

    pub fn layout(&self) -> std::result::Result<SocketLayout, ConfigError> {
        SocketLayout::new(&self.steering.queues, self.steering.sockets_per_queue)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.interface.name, "eth0");
        assert_eq!(config.interface.mode, XdpMode::Skb);
        assert_eq!(config.steering.sockets_per_queue, 1);
        assert_eq!(config.steering.queues, vec![0]);
        assert_eq!(config.bpf.pin_path, PathBuf::from(DEFAULT_PIN_PATH));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[interface]
name = "veth0"
mode = "driver"

[steering]
address = "198.18.3.2"
port = 1234
sockets_per_queue = 2
queues = [0, 1, 2]

[bpf]
pin_path = "/sys/fs/bpf/test"

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.interface.name, "veth0");
        assert_eq!(config.interface.mode, XdpMode::Driver);
        assert_eq!(config.steering.address, Ipv4Addr::new(198, 18, 3, 2));
        assert_eq!(config.steering.port, 1234);
        assert_eq!(config.steering.sockets_per_queue, 2);
        assert_eq!(config.steering.queues, vec![0, 1, 2]);
        assert_eq!(config.bpf.pin_path, PathBuf::from("/sys/fs/bpf/test"));
        assert_eq!(config.logging.level, "debug");

        let settings = config.settings();
        assert_eq!(settings.sockets_per_queue, 2);
        assert_eq!(settings.bound_address, Ipv4Addr::new(198, 18, 3, 2));
        assert_eq!(settings.bound_port, 1234);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
[steering]
port = 9000
"#,
        )
        .unwrap();

        assert_eq!(config.steering.port, 9000);
        assert_eq!(config.steering.address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.interface.name, "eth0");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
[steering]
address = "198.18.3"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xsksteer.toml");

        let mut config = Config::default();
        config.interface.mode = XdpMode::Hw;
        config.steering.queues = vec![3, 1];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.interface.mode, XdpMode::Hw);
        assert_eq!(loaded.steering.queues, vec![3, 1]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.steering.sockets_per_queue = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSocketsPerQueue));

        let mut config = Config::default();
        config.steering.queues.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoQueues));

        let mut config = Config::default();
        config.steering.queues = vec![0, 1, 0];
        assert_eq!(config.validate(), Err(ConfigError::DuplicateQueue(0)));

        let mut config = Config::default();
        config.interface.name.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyInterface));

        let mut config = Config::default();
        config.steering.sockets_per_queue = 4;
        config.steering.queues = vec![255, 256];
        assert_eq!(
            config.validate(),
            Err(ConfigError::LayoutTooLarge {
                queue: 256,
                index: 1024,
                max: 1024
            })
        );
    }

    #[test]
    fn test_xdp_mode_flags() {
        assert_eq!(XdpMode::Skb.flags(), XdpFlags::SKB_MODE);
        assert_eq!(XdpMode::Driver.flags(), XdpFlags::DRV_MODE);
        assert_eq!(XdpMode::Hw.flags(), XdpFlags::HW_MODE);
    }
}
