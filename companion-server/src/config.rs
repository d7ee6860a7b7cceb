//! Configuration for the companion service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Call transport settings.
    pub network: NetworkConfig,
    /// Secondary channel used for frame-buffer handoff.
    pub handoff: HandoffConfig,
    /// The attached target.
    pub target: TargetConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the call listener on.
    pub listen_addr: String,
    /// TCP port for call connections.
    pub port: u16,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Directory holding `<endpoint>.sock` sockets.
    pub socket_dir: PathBuf,
    /// Surface id reported as the main screen. Unset means the target
    /// exposes no frame buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Identifier of the attached device.
    pub udid: String,
    /// Attach a target logger. Operations that stream device output need one.
    pub attach_logger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".into(),
            port: 10882,
            max_connections: 16,
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir().join("companion"),
            surface_id: None,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            udid: "unattached".into(),
            attach_logger: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CompanionConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// `listen_addr:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.network.listen_addr, self.network.port)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&CompanionConfig::default()).unwrap();
        assert!(text.contains("port"));
        assert!(text.contains("socket_dir"));
        assert!(!text.contains("surface_id"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: CompanionConfig = toml::from_str(
            r#"
            [network]
            port = 9000

            [handoff]
            surface_id = 12
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.port, 9000);
        assert_eq!(cfg.network.listen_addr, "127.0.0.1");
        assert_eq!(cfg.handoff.surface_id, Some(12));
        assert!(cfg.target.attach_logger);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn written_default_loads_back() {
        let path = std::env::temp_dir().join(format!("companion-cfg-{}.toml", std::process::id()));
        CompanionConfig::write_default(&path).unwrap();
        let cfg = CompanionConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.network.max_connections, 16);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = CompanionConfig::load(Path::new("/definitely/not/here.toml"));
        assert_eq!(cfg.network.port, 10882);
    }
}
