//! Provisioning pipeline for bosun environments.
//!
//! This crate sequences the external collaborators from `bosun-infra` into the
//! checkpointed `up`, `destroy`, load-balancer and `rotate` workflows run by the
//! [`Engine`]. Each IAAS contributes a [`Provider`] (templates, variables, AZ
//! tables, cloud-config shape); the pipeline itself is IAAS-neutral. The crate
//! also holds the one-shot legacy stack migration, state queries and the
//! exclusive state-dir lock.

pub mod cloud_config;
pub mod concurrency;
pub mod credentials;
pub mod director;
pub mod engine;
pub mod infra;
pub mod keypair;
pub mod lifecycle;
pub mod migrate;
pub mod outputs;
pub mod provider;
pub mod query;

pub use cloud_config::{CloudConfig, CloudConfigManager};
pub use concurrency::{install_signal_handler, shutdown_requested, StateLock};
pub use credentials::{missing_credentials, validate_credentials};
pub use director::DirectorManager;
pub use engine::{Engine, LbRequest, UpOutcome};
pub use infra::InfraManager;
pub use keypair::{keypair_name, KeyPairManager};
pub use lifecycle::validate_transition;
pub use migrate::LegacyMigrator;
pub use outputs::Outputs;
pub use provider::{provider_for, Provider};
pub use query::{PrintEnv, Property};

use bosun_schema::Iaas;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(String),
    #[error("external tool failed: {0}")]
    Tool(#[from] bosun_infra::InfraError),
    #[error("output '{name}' missing from applier state; template and applier version may not match")]
    MissingOutput { name: String },
    #[error("legacy stack migration aborted: {0}")]
    MigrationAborted(String),
    #[error("validation error: region '{region}' has no known availability zones on {iaas}")]
    UnknownRegion { iaas: Iaas, region: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("config error: {0}")]
    Config(#[from] bosun_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] bosun_store::StoreError),
    #[error("state directory is locked by another bosun process: {0}")]
    Locked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cloud config rendering failed: {0}")]
    CloudConfig(String),
}

impl CoreError {
    /// Validation and precondition failures leave state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::MissingCredentials(_)
                | CoreError::Validation(_)
                | CoreError::UnknownRegion { .. }
                | CoreError::Config(_)
        )
    }

    /// Captured output of the external tool behind this error, if any.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            CoreError::Tool(e) => e.tool_output(),
            _ => None,
        }
    }
}
