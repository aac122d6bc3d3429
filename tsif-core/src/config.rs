use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{NetworkRange, Result, TsifError};

pub const DEFAULT_BOOT_CONFIG_PAYLOAD: &str = r#"#cloud-config
users:
- name: root
  lock_passwd: false
  hashed_passwd: $1$SaltSalt$YhgRYajLPrYevs14poKBQ0
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub network: NetworkSettings,
    pub boot_config: BootConfigSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub range: NetworkRange,
    pub switch_prefix: String,
    pub port_prefix: String,
    pub name_token_length: usize,
    pub guest_interface: String,
    pub nameserver: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfigSettings {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
    pub path: String,
    /// Overrides the URL handed to guests. Defaults to the switch gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub payload: String,
}

impl BootConfigSettings {
    /// URL a guest on `range` uses to fetch its first-boot configuration.
    pub fn url_for(&self, range: &NetworkRange) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}:{}{}",
                range.gateway(),
                self.listen_addr.port(),
                self.path
            ),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)
                .map_err(|e| TsifError::ConfigError(e.to_string()))?;
            config.validate()?;
            debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            debug!("{} not found, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content =
            serde_yaml::to_string(self).map_err(|e| TsifError::ConfigError(e.to_string()))?;
        std::fs::write(config_path, content)?;
        debug!("Saved configuration to {}", config_path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| TsifError::ConfigError("Cannot determine home directory".to_string()))?;
        Ok(home.join(".tsif").join("config.yaml"))
    }

    fn validate(&self) -> Result<()> {
        // Linux caps interface names at 15 bytes.
        for prefix in [&self.network.switch_prefix, &self.network.port_prefix] {
            if prefix.len() + 1 + self.network.name_token_length > 15 {
                return Err(TsifError::ConfigError(format!(
                    "link names with prefix '{prefix}' and a {}-character token exceed 15 bytes",
                    self.network.name_token_length
                )));
            }
        }

        if self.network.name_token_length == 0 {
            return Err(TsifError::ConfigError(
                "name_token_length must be at least 1".to_string(),
            ));
        }

        validate_boot_config_path(&self.boot_config.path)?;

        Ok(())
    }
}

/// Accepts only literal paths: the HTTP router treats `:`, `*` and braces
/// as capture syntax.
fn validate_boot_config_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| {
        TsifError::ConfigError(format!("boot config path '{path}' {reason}"))
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    if let Some(c) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~')))
    {
        return Err(invalid(&format!("contains unsupported character '{c}'")));
    }

    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            network: NetworkSettings {
                range: NetworkRange::new(Ipv4Addr::new(172, 23, 0, 1), 24)
                    .unwrap_or_else(|_| unreachable!("default range is valid")),
                switch_prefix: "br-ts".to_string(),
                port_prefix: "tap-ts".to_string(),
                name_token_length: 6,
                guest_interface: "eth0".to_string(),
                nameserver: Ipv4Addr::new(1, 1, 1, 1),
            },
            boot_config: BootConfigSettings {
                enabled: true,
                listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
                path: "/cloud-init".to_string(),
                url: None,
                payload: DEFAULT_BOOT_CONFIG_PAYLOAD.to_string(),
            },
        }
    }
}
