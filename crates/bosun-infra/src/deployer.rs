use crate::InfraError;
use bosun_schema::Iaas;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentKind {
    Director,
    Jumpbox,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Director => write!(f, "director"),
            DeploymentKind::Jumpbox => write!(f, "jumpbox"),
        }
    }
}

/// Input to one create-env or delete-env run.
#[derive(Debug, Clone)]
pub struct DeployInput {
    pub kind: DeploymentKind,
    pub iaas: Iaas,
    pub name: String,
    /// Ops files applied on top of the base manifest, relative to the
    /// deployment checkout (e.g. `gcp/cpi.yml`).
    pub ops_files: Vec<String>,
    /// Variables for interpolation: network, addresses, credentials.
    pub vars: BTreeMap<String, Value>,
    /// Deployment tool state from the previous run, `Null` when fresh.
    pub prior_state: Value,
    /// Vars store from the previous run. Values present here are reused
    /// rather than regenerated.
    pub prior_credentials: BTreeMap<String, Value>,
    pub prior_manifest: String,
}

impl DeployInput {
    pub fn new(kind: DeploymentKind, iaas: Iaas, name: impl Into<String>) -> Self {
        Self {
            kind,
            iaas,
            name: name.into(),
            ops_files: Vec::new(),
            vars: BTreeMap::new(),
            prior_state: Value::Null,
            prior_credentials: BTreeMap::new(),
            prior_manifest: String::new(),
        }
    }

    /// blake3 over kind, ops files and vars. Prior state is excluded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.ops_files.join("\n").as_bytes());
        hasher.update(&[0]);
        let vars = serde_json::to_string(&self.vars).unwrap_or_default();
        hasher.update(vars.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslKeyPair {
    pub ca: String,
    pub certificate: String,
    pub private_key: String,
}

impl SslKeyPair {
    /// Extract a certificate entry (`{ca, certificate, private_key}`) from a vars store.
    pub fn from_credentials(credentials: &BTreeMap<String, Value>, key: &str) -> Option<Self> {
        let entry = credentials.get(key)?;
        let field = |name: &str| {
            entry
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Some(Self {
            ca: field("ca"),
            certificate: field("certificate"),
            private_key: field("private_key"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeployOutput {
    pub manifest: String,
    pub state: Value,
    pub credentials: BTreeMap<String, Value>,
    pub ssl: SslKeyPair,
}

/// A failed deploy. `state` is what the tool wrote before failing.
#[derive(Debug)]
pub struct DeployFailure {
    pub state: Value,
    pub output: String,
    pub error: InfraError,
}

impl DeployFailure {
    pub fn new(state: Value, error: InfraError) -> Self {
        let output = error.tool_output().unwrap_or_default().to_owned();
        Self {
            state,
            output,
            error,
        }
    }
}

/// Director deployment tool (`bosh create-env`).
pub trait DirectorDeployer: Send + Sync {
    fn deploy(&self, input: &DeployInput) -> Result<DeployOutput, DeployFailure>;
    fn delete(&self, input: &DeployInput) -> Result<(), DeployFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ssl_from_vars_store() {
        let creds = BTreeMap::from([(
            "director_ssl".to_owned(),
            json!({ "ca": "CA", "certificate": "CERT", "private_key": "KEY" }),
        )]);
        let ssl = SslKeyPair::from_credentials(&creds, "director_ssl").unwrap();
        assert_eq!(ssl.ca, "CA");
        assert_eq!(ssl.certificate, "CERT");
        assert_eq!(ssl.private_key, "KEY");
        assert!(SslKeyPair::from_credentials(&creds, "jumpbox_ssl").is_none());
    }

    #[test]
    fn fingerprint_tracks_vars_not_state() {
        let mut a = DeployInput::new(DeploymentKind::Director, Iaas::Gcp, "bosh-e");
        a.vars.insert("internal_ip".to_owned(), json!("10.0.0.6"));
        let mut b = a.clone();
        b.prior_state = json!({ "director_id": "x" });
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.ops_files.push("gcp/cpi.yml".to_owned());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
