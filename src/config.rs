use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default HTTP/WebSocket bind address for `toolhub serve`.
pub const DEFAULT_BIND: &str = "127.0.0.1:5181";

pub fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5181))
}

/// Default hub URL for `toolhub client`.
pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:5181/toolhub";

/// Session a client joins when none is configured.
pub const DEFAULT_SESSION: &str = "default-session";

/// Top-level config, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolhubConfig {
    /// Settings for `toolhub serve`.
    pub server: Option<ServerSection>,
    /// Settings for `toolhub client`.
    pub client: Option<ClientSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: Option<SocketAddr>,
    /// Default per-call deadline in seconds.
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSection {
    /// WebSocket URL of the hub, e.g. `ws://host:5181/toolhub`.
    pub hub_url: Option<String>,
    pub session_id: Option<String>,
    /// Reported to the hub for operators; defaults to the hostname.
    pub kernel_id: Option<String>,
    /// Where file-writing tools put their output.
    pub output_dir: Option<PathBuf>,
}

impl ToolhubConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Load from `explicit` if given (it must exist), otherwise from the
    /// default location if present, otherwise return defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path)?.ok_or_else(|| ConfigError::NotFound(path.to_path_buf())),
            None => match default_config_path() {
                Some(path) => Ok(Self::load(&path)?.unwrap_or_default()),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    pub fn client(&self) -> ClientSection {
        self.client.clone().unwrap_or_default()
    }
}

/// `<config_dir>/toolhub/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolhub").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    NotFound(PathBuf),
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "Config file not found: {}", path.display()),
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             Consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

/// Resolve the kernel id a client reports. Uses the configured value if
/// present, otherwise the system hostname.
pub fn resolve_kernel_id(configured: Option<&str>) -> String {
    if let Some(id) = configured {
        return id.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
