//! Environment state document, identifiers, and configuration for bosun.
//!
//! This crate defines the schema layer: the persisted `State` document with its
//! per-IAAS credential blocks and per-resource sub-documents, environment
//! identifier generation (`generate_env_id`), and parsing of the `up`
//! configuration and the external tool configuration (`ToolConfig`).

pub mod config;
pub mod identity;
pub mod state;
pub mod types;

pub use config::{
    default_config_path, read_service_account_key, ConfigError, ToolConfig, UpConfig,
};
pub use identity::{generate_env_id, random_credential, validate_env_name};
pub use state::{
    AwsCredentials, AzureCredentials, Director, GcpCredentials, Iaas, InfraBackend, InfraState,
    Jumpbox, KeyPair, LbKind, LegacyStack, LoadBalancers, State, STATE_VERSION,
};
pub use types::{EnvId, StackName};
