use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 54321;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for the WebSocket upgrade; empty means open
    #[serde(default)]
    pub master_password: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            master_password: String::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "peer_hub.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            hub: HubConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    /// Like `load`, but a missing file yields the defaults
    pub fn load_or_default(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        if Path::new(&config_path).exists() {
            Self::load(env)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply command-line / environment overrides on top of the file
    pub fn apply_overrides(&mut self, port: Option<u16>, master_password: Option<String>) {
        if let Some(port) = port {
            self.hub.port = port;
        }
        if let Some(password) = master_password {
            self.hub.master_password = password;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_yaml() {
        let cfg = AppConfig::from_yaml(
            r#"
log_level: debug
log_dir: /tmp/logs
log_file: hub.log
use_json: true
rotation: hourly
hub:
  host: 127.0.0.1
  port: 9000
  master_password: s3cret
"#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.use_json);
        assert_eq!(cfg.hub.port, 9000);
        assert_eq!(cfg.hub.master_password, "s3cret");
    }

    #[test]
    fn test_hub_section_defaults() {
        let cfg = AppConfig::from_yaml(
            "log_level: info\nlog_dir: ./logs\nlog_file: a.log\nuse_json: false\nrotation: never\n",
        )
        .unwrap();
        assert_eq!(cfg.hub.port, DEFAULT_PORT);
        assert!(cfg.hub.master_password.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(AppConfig::from_yaml("log_level: [").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(Some(1234), Some("pw".into()));
        assert_eq!(cfg.hub.port, 1234);
        assert_eq!(cfg.hub.master_password, "pw");

        cfg.apply_overrides(None, None);
        assert_eq!(cfg.hub.port, 1234);
    }
}
