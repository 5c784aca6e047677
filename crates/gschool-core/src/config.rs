use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Block page used when neither the document nor a category names one
pub const DEFAULT_BLOCK_URL: &str = "https://blocked.gdistrict.org/Gschool%20block";

/// Public STUN server always offered to presentation clients
pub const GOOGLE_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Get the local data directory for gschool.
///
/// `GSCHOOL_DATA_DIR` overrides the platform default.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GSCHOOL_DATA_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("gschool");
    Ok(path)
}

/// File locations derived from the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub document: PathBuf,
    pub scenes: PathBuf,
    pub database: PathBuf,
    pub config: PathBuf,
}

impl DataPaths {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            document: data_dir.join("data.json"),
            scenes: data_dir.join("scenes.json"),
            database: data_dir.join("gschool.db"),
            config: data_dir.join("config.toml"),
        }
    }
}

/// Optional TURN relay handed to presentation clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Application configuration (`config.toml` in the data directory)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub default_block_url: String,
    /// Hosts that stay reachable while "Global Block All" is on
    pub always_allowed_hosts: Vec<String>,
    pub fetch_timeout_secs: u64,
    /// Presentation rooms idle longer than this are dropped
    pub presentation_ttl_secs: u64,
    pub turn: Option<TurnServer>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_block_url: DEFAULT_BLOCK_URL.to_string(),
            always_allowed_hosts: vec!["blocked.gdistrict.org".to_string()],
            fetch_timeout_secs: 3,
            presentation_ttl_secs: 3600,
            turn: None,
        }
    }
}

impl AppConfig {
    /// Load `config.toml` from `data_dir`; a missing file yields defaults.
    /// TURN settings from the environment take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = DataPaths::new(data_dir).config;
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))?
        } else {
            Self::default()
        };

        if let Some(turn) = turn_from_env() {
            log::debug!("Using TURN server from environment: {}", turn.url);
            config.turn = Some(turn);
        }
        Ok(config)
    }
}

fn turn_from_env() -> Option<TurnServer> {
    let read = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    Some(TurnServer {
        url: read("TURN_URL")?,
        username: read("TURN_USER")?,
        credential: read("TURN_PASS")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.default_block_url, DEFAULT_BLOCK_URL);
        assert_eq!(config.fetch_timeout_secs, 3);
        assert!(config
            .always_allowed_hosts
            .contains(&"blocked.gdistrict.org".to_string()));
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "default_block_url = \"https://block.example.org\"\npresentation_ttl_secs = 60\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.default_block_url, "https://block.example.org");
        assert_eq!(config.presentation_ttl_secs, 60);
        assert_eq!(config.fetch_timeout_secs, 3);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "fetch_timeout_secs = \"soon\"").unwrap();
        assert!(AppConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_data_paths() {
        let paths = DataPaths::new(Path::new("/srv/gschool"));
        assert_eq!(paths.document, Path::new("/srv/gschool/data.json"));
        assert_eq!(paths.scenes, Path::new("/srv/gschool/scenes.json"));
        assert_eq!(paths.database, Path::new("/srv/gschool/gschool.db"));
    }
}
