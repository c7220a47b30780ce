use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_LOG_FILTER: &str = "warn";

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    log_filter: Option<String>,
    sync: SyncSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncSection {
    server_url: Option<String>,
    api_key: Option<String>,
    owner_id: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    /// Overrides the owner id stored in the local database.
    pub owner_id: Option<String>,
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_filter: String,
    pub sync: SyncSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "stride").context("Could not determine home directory")?;
        Self::from_dirs(proj_dirs.data_dir(), proj_dirs.config_dir(), |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve settings from the given directories, then apply
    /// `STRIDE_*` overrides looked up through `env`.
    fn from_dirs(
        data_dir: &Path,
        config_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let config_path = config_dir.join("config.toml");
        let file = read_file_config(&config_path)?;

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let sync = SyncSettings {
            server_url: env("STRIDE_SERVER_URL").or(file.sync.server_url),
            api_key: env("STRIDE_API_KEY").or(file.sync.api_key),
            owner_id: env("STRIDE_OWNER").or(file.sync.owner_id),
        };
        let log_filter = env("STRIDE_LOG")
            .or(file.log_filter)
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Config {
            db_path: data_dir.join("stride.db"),
            data_dir,
            config_path,
            log_filter,
            sync,
        })
    }

    /// Load the server API key from disk, generating and printing a new one
    /// on first use.
    pub fn load_or_create_api_key(&self) -> Result<String> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok(key);
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Set STRIDE_API_KEY={key} on devices that sync with this server.");
        Ok(key)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}
