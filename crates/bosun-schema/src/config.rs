use crate::state::{AwsCredentials, AzureCredentials, GcpCredentials, Iaas};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tool config: {0}")]
    Parse(String),
    #[error("unknown iaas '{0}' (expected aws, gcp or azure)")]
    UnknownIaas(String),
    #[error("unknown load balancer type '{0}' (expected cf or concourse)")]
    UnknownLbKind(String),
    #[error("invalid environment name: {0}")]
    InvalidEnvName(String),
    #[error("invalid service account key: {0}")]
    InvalidServiceAccountKey(String),
    #[error("HOME not set")]
    HomeNotSet,
}

/// Inputs to `up` as supplied on the command line or via environment.
///
/// Credential blocks hold whatever the user passed. Empty fields are filled from
/// the stored state by the orchestrator before validation.
#[derive(Debug, Clone, Default)]
pub struct UpConfig {
    pub iaas: Option<Iaas>,
    pub name: Option<String>,
    pub no_director: bool,
    pub jumpbox: bool,
    pub force: bool,
    pub aws: AwsCredentials,
    pub gcp: GcpCredentials,
    pub azure: AzureCredentials,
}

impl UpConfig {
    pub fn new(iaas: Option<Iaas>) -> Self {
        Self {
            iaas,
            ..Self::default()
        }
    }
}

/// Read a GCP service account key file. The returned string is the file
/// contents, which must be a JSON object.
pub fn read_service_account_key(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::InvalidServiceAccountKey(format!("{}: {e}", path.display()))
    })?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| ConfigError::InvalidServiceAccountKey(format!("{}: {e}", path.display())))?;
    if !value.is_object() {
        return Err(ConfigError::InvalidServiceAccountKey(format!(
            "{}: expected a JSON object",
            path.display()
        )));
    }
    Ok(content)
}

/// External tool locations, read from `~/.config/bosun/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub terraform: String,
    pub bosh: String,
    pub aws: String,
    pub gcloud: String,
    pub ssh_keygen: String,
    /// Checkout of bosh-deployment providing `bosh.yml` and per-IAAS ops files.
    pub bosh_deployment_dir: Option<PathBuf>,
    /// Checkout of jumpbox-deployment providing `jumpbox.yml`.
    pub jumpbox_deployment_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            terraform: "terraform".to_owned(),
            bosh: "bosh".to_owned(),
            aws: "aws".to_owned(),
            gcloud: "gcloud".to_owned(),
            ssh_keygen: "ssh-keygen".to_owned(),
            bosh_deployment_dir: None,
            jumpbox_deployment_dir: None,
        }
    }
}

impl ToolConfig {
    /// Load from `BOSUN_CONFIG` if set, else the default path. A missing file
    /// yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = match std::env::var_os("BOSUN_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => default_config_path()?,
        };
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeNotSet)?;
    Ok(PathBuf::from(home).join(".config/bosun/config.toml"))
}
