use crate::config::ConfigError;
use crate::types::{EnvId, StackName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current state document schema version. Incremented on incompatible changes;
/// older documents are upgraded on load by the store's migration chain.
pub const STATE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Iaas {
    Aws,
    Gcp,
    Azure,
}

impl Iaas {
    pub const ALL: [Iaas; 3] = [Iaas::Aws, Iaas::Gcp, Iaas::Azure];

    pub fn as_str(self) -> &'static str {
        match self {
            Iaas::Aws => "aws",
            Iaas::Gcp => "gcp",
            Iaas::Azure => "azure",
        }
    }
}

impl fmt::Display for Iaas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Iaas {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Iaas::Aws),
            "gcp" => Ok(Iaas::Gcp),
            "azure" => Ok(Iaas::Azure),
            other => Err(ConfigError::UnknownIaas(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsCredentials {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GcpCredentials {
    /// Contents of the service account key JSON, not its path.
    #[serde(default)]
    pub service_account_key: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureCredentials {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub location: String,
}

/// SSH keypair used to reach the director VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPair {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
}

impl KeyPair {
    /// An empty keypair means "not yet created".
    pub fn is_empty(&self) -> bool {
        self.public_key.is_empty() && self.private_key.is_empty()
    }
}

/// Declarative applier state plus the outputs last read from it.
///
/// The state blob is authoritative for resource existence. Outputs are replaced
/// wholesale after every apply so removed resources never leave stale keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfraState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// blake3 fingerprint of the template and variables of the last successful apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

impl InfraState {
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Render an output as a plain string. Lists are joined with commas.
    pub fn output_str(&self, name: &str) -> Option<String> {
        self.outputs.get(name).and_then(value_to_string)
    }
}

pub(crate) fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// A CloudFormation stack that has not yet been imported into the declarative applier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyStack {
    pub name: StackName,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Director {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub manifest: String,
    /// Opaque state of the deployment tool (`bosh create-env --state`).
    #[serde(default)]
    pub deployment_state: serde_json::Value,
    /// Generated credentials (the deployment tool's vars store).
    #[serde(default)]
    pub credentials: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

impl Director {
    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
            && self.username.is_empty()
            && self.password.is_empty()
            && self.deployment_state.is_null()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jumpbox {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub deployment_state: serde_json::Value,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

impl Jumpbox {
    pub fn is_deployed(&self) -> bool {
        !self.deployment_state.is_null()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LbKind {
    Cf,
    Concourse,
}

impl fmt::Display for LbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LbKind::Cf => write!(f, "cf"),
            LbKind::Concourse => write!(f, "concourse"),
        }
    }
}

impl FromStr for LbKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cf" => Ok(LbKind::Cf),
            "concourse" => Ok(LbKind::Concourse),
            other => Err(ConfigError::UnknownLbKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancers {
    pub kind: LbKind,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Which infrastructure backend currently owns the environment's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraBackend {
    /// Nothing provisioned yet.
    Unprovisioned,
    /// Resources are owned by a CloudFormation stack.
    LegacyStack,
    /// Resources are owned by the declarative applier state.
    Declarative,
}

impl fmt::Display for InfraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfraBackend::Unprovisioned => write!(f, "unprovisioned"),
            InfraBackend::LegacyStack => write!(f, "legacy-stack"),
            InfraBackend::Declarative => write!(f, "declarative"),
        }
    }
}

/// The single persisted environment document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iaas: Option<Iaas>,
    #[serde(default)]
    pub env_id: EnvId,
    #[serde(default)]
    pub aws: AwsCredentials,
    #[serde(default)]
    pub gcp: GcpCredentials,
    #[serde(default)]
    pub azure: AzureCredentials,
    #[serde(default)]
    pub key_pair: KeyPair,
    #[serde(default)]
    pub infra: InfraState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_stack: Option<LegacyStack>,
    #[serde(default)]
    pub no_director: bool,
    #[serde(default)]
    pub director: Director,
    #[serde(default)]
    pub jumpbox: Jumpbox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lbs: Option<LoadBalancers>,
    /// Captured output of the most recent failed external tool run.
    #[serde(default)]
    pub latest_error: String,
    /// blake3 checksum for integrity verification. `None` for hand-written documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            iaas: None,
            env_id: EnvId::default(),
            aws: AwsCredentials::default(),
            gcp: GcpCredentials::default(),
            azure: AzureCredentials::default(),
            key_pair: KeyPair::default(),
            infra: InfraState::default(),
            legacy_stack: None,
            no_director: false,
            director: Director::default(),
            jumpbox: Jumpbox::default(),
            lbs: None,
            latest_error: String::new(),
            checksum: None,
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infra_backend(&self) -> InfraBackend {
        if self.legacy_stack.is_some() {
            InfraBackend::LegacyStack
        } else if self.infra.is_empty() {
            InfraBackend::Unprovisioned
        } else {
            InfraBackend::Declarative
        }
    }

    /// The region of the selected IAAS (the location, for Azure).
    pub fn region(&self) -> &str {
        match self.iaas {
            Some(Iaas::Aws) => &self.aws.region,
            Some(Iaas::Gcp) => &self.gcp.region,
            Some(Iaas::Azure) => &self.azure.location,
            None => "",
        }
    }

    /// Look up an infrastructure output, falling back to the legacy stack outputs
    /// for environments that have not been migrated yet.
    pub fn output(&self, name: &str) -> Option<String> {
        if let Some(v) = self.infra.output_str(name) {
            return Some(v);
        }
        self.legacy_stack
            .as_ref()
            .and_then(|s| s.outputs.get(name).cloned())
    }
}
