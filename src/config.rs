use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::game::lobby::DropMode;
use crate::version::Version;

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: pso <data-root>".to_string());
        }
        Ok(Self {
            root: Path::new(&args[1]).to_path_buf(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub port: u16,
    pub version: String,
}

impl PortConfig {
    pub fn resolved_version(&self) -> Option<Version> {
        Version::from_name(&self.version)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyPortConfig {
    pub port: u16,
    pub version: String,
    /// `host:port` the proxy dials when the client's own config carries no
    /// destination (required for patch clients).
    #[serde(default)]
    pub default_destination: Option<String>,
}

impl ProxyPortConfig {
    pub fn resolved_version(&self) -> Option<Version> {
        Version::from_name(&self.version)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn default_exp_multiplier() -> u32 {
    1
}

fn default_rare_rate_scale() -> f32 {
    1.0
}

fn default_lobby_count() -> usize {
    15
}

fn default_drop_mode() -> DropMode {
    DropMode::SharedServer
}

fn default_key_pool_seeds() -> Vec<u64> {
    vec![0x0102_0304, 0x0B0B_0B0B, 0xDEAD_BEEF, 0x7777_0001]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub listen_ports: Vec<PortConfig>,
    #[serde(default)]
    pub proxy_ports: Vec<ProxyPortConfig>,
    #[serde(default = "default_drop_mode")]
    pub default_drop_mode: DropMode,
    #[serde(default = "default_exp_multiplier")]
    pub exp_multiplier: u32,
    #[serde(default = "default_rare_rate_scale")]
    pub rare_rate_scale: f32,
    #[serde(default)]
    pub allow_unregistered_users: bool,
    #[serde(default = "default_lobby_count")]
    pub lobby_count: usize,
    #[serde(default)]
    pub information_menu: Vec<MenuEntry>,
    #[serde(default)]
    pub quest_categories: Vec<String>,
    /// Minimum level to create a game, keyed by episode name, indexed by
    /// difficulty.
    #[serde(default)]
    pub min_levels: BTreeMap<String, Vec<u32>>,
    /// Quest-flag ranges clients may not modify, inclusive.
    #[serde(default)]
    pub blocked_quest_flag_ranges: Vec<(u16, u16)>,
    /// Seeds for the final-version private-key pool.
    #[serde(default = "default_key_pool_seeds")]
    pub key_pool_seeds: Vec<u64>,
    /// The port a proxied client is sent back to when its remote server
    /// goes away.
    #[serde(default)]
    pub proxy_return_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "pso".to_string(),
            listen_ports: vec![
                PortConfig { port: 9000, version: "v1".to_string() },
                PortConfig { port: 9001, version: "v2".to_string() },
                PortConfig { port: 9100, version: "pc-v2".to_string() },
                PortConfig { port: 9200, version: "console-a".to_string() },
                PortConfig { port: 9201, version: "ep3".to_string() },
                PortConfig { port: 9300, version: "console-b".to_string() },
                PortConfig { port: 12000, version: "final".to_string() },
            ],
            proxy_ports: Vec::new(),
            default_drop_mode: default_drop_mode(),
            exp_multiplier: default_exp_multiplier(),
            rare_rate_scale: default_rare_rate_scale(),
            allow_unregistered_users: true,
            lobby_count: default_lobby_count(),
            information_menu: Vec::new(),
            quest_categories: vec!["Retrieval".to_string(), "Extermination".to_string()],
            min_levels: BTreeMap::new(),
            blocked_quest_flag_ranges: Vec::new(),
            key_pool_seeds: default_key_pool_seeds(),
            proxy_return_port: 12000,
        }
    }
}

impl ServerConfig {
    pub fn load(root: &Path) -> Result<ServerConfig, String> {
        let path = root.join("config.json");
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ServerConfig::default());
            }
            Err(err) => return Err(format!("read {} failed: {}", path.display(), err)),
        };
        serde_json::from_str(&text).map_err(|err| format!("parse {} failed: {}", path.display(), err))
    }

    pub fn quest_flag_is_writable(&self, flag: u16) -> bool {
        !self
            .blocked_quest_flag_ranges
            .iter()
            .any(|(start, end)| (*start..=*end).contains(&flag))
    }

    pub fn min_level_for_game(&self, episode: u8, difficulty: u8) -> u32 {
        let key = format!("ep{}", episode);
        self.min_levels
            .get(&key)
            .and_then(|levels| levels.get(difficulty as usize).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_listen_version() {
        let config = ServerConfig::default();
        for port in &config.listen_ports {
            assert!(port.resolved_version().is_some(), "{}", port.version);
        }
    }

    #[test]
    fn config_parses_from_json() {
        let text = r#"{
            "name": "test",
            "listen_ports": [{"port": 9000, "version": "final"}],
            "proxy_ports": [{"port": 9010, "version": "final", "default_destination": "10.0.0.1:12000"}],
            "default_drop_mode": "private-server",
            "exp_multiplier": 3,
            "blocked_quest_flag_ranges": [[16, 31]],
            "min_levels": {"ep2": [0, 10, 40, 90]}
        }"#;
        let config: ServerConfig = serde_json::from_str(text).expect("parse");
        assert_eq!(config.exp_multiplier, 3);
        assert_eq!(config.default_drop_mode, DropMode::PrivateServer);
        assert_eq!(config.listen_ports.len(), 1);
        assert_eq!(
            config.proxy_ports[0].default_destination.as_deref(),
            Some("10.0.0.1:12000")
        );
        assert!(config.quest_flag_is_writable(15));
        assert!(!config.quest_flag_is_writable(20));
        assert_eq!(config.min_level_for_game(2, 3), 90);
        assert_eq!(config.min_level_for_game(1, 3), 0);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = ServerConfig::load(Path::new("/nonexistent/nowhere")).expect("load");
        assert_eq!(config.exp_multiplier, 1);
        assert!(!config.listen_ports.is_empty());
    }
}
