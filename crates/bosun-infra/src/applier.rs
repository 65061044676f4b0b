use crate::InfraError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything the declarative applier needs for one run.
#[derive(Debug, Clone, Default)]
pub struct ApplyInput {
    /// Complete HCL template.
    pub template: String,
    /// Template variables, written as `terraform.tfvars.json`.
    pub vars: BTreeMap<String, Value>,
    /// Provider credential file contents (the GCP service account key). When
    /// present it is written next to the template and `var.credentials`
    /// points at it.
    pub credentials: Option<String>,
    /// State blob from the previous run, empty for a fresh environment.
    pub prior_state: String,
}

impl ApplyInput {
    /// blake3 over template and variables. Credentials and prior state are
    /// excluded so rotating a key or re-reading state does not force an apply.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.template.as_bytes());
        hasher.update(&[0]);
        let vars = serde_json::to_string(&self.vars).unwrap_or_default();
        hasher.update(vars.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// A failed apply, destroy or import. `state` is whatever the tool managed to
/// write before failing, so progress can be persisted.
#[derive(Debug)]
pub struct ApplyFailure {
    pub state: String,
    pub output: String,
    pub error: InfraError,
}

impl ApplyFailure {
    pub fn new(state: String, error: InfraError) -> Self {
        let output = error.tool_output().unwrap_or_default().to_owned();
        Self {
            state,
            output,
            error,
        }
    }
}

impl std::fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

/// Binds an existing cloud resource to a template address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub address: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
}

impl PlanSummary {
    pub fn is_noop(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

/// Terraform-like declarative infrastructure tool.
pub trait Applier: Send + Sync {
    fn name(&self) -> &str;

    /// Reconcile infrastructure to `input.template`, starting from
    /// `input.prior_state`. Returns the new state blob.
    fn apply(&self, input: &ApplyInput) -> Result<String, ApplyFailure>;

    /// Tear down everything in `input.prior_state`. Returns the remaining
    /// state blob, normally empty.
    fn destroy(&self, input: &ApplyInput) -> Result<String, ApplyFailure>;

    /// Build a state blob that adopts existing resources without creating any.
    fn import(
        &self,
        input: &ApplyInput,
        bindings: &[ImportBinding],
    ) -> Result<String, ApplyFailure>;

    /// Compute the pending changes between `input.template` and `input.prior_state`.
    fn plan(&self, input: &ApplyInput) -> Result<PlanSummary, InfraError>;

    /// Read all root outputs from a state blob.
    fn outputs(&self, state: &str) -> Result<BTreeMap<String, Value>, InfraError> {
        parse_outputs(state)
    }
}

/// Parse root-module outputs from a terraform state document.
///
/// Handles both state format v4 (top-level `outputs`) and v3
/// (`modules[path == ["root"]].outputs`). An empty blob has no outputs.
pub fn parse_outputs(state: &str) -> Result<BTreeMap<String, Value>, InfraError> {
    if state.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let doc: Value =
        serde_json::from_str(state).map_err(|e| InfraError::parse("applier state", e))?;

    let outputs = match doc.get("outputs") {
        Some(outputs) => outputs,
        None => doc
            .get("modules")
            .and_then(Value::as_array)
            .and_then(|modules| {
                modules.iter().find(|m| {
                    m.get("path")
                        .and_then(Value::as_array)
                        .is_some_and(|p| p.len() == 1 && p[0] == "root")
                })
            })
            .and_then(|root| root.get("outputs"))
            .unwrap_or(&Value::Null),
    };

    let mut result = BTreeMap::new();
    if let Some(map) = outputs.as_object() {
        for (name, entry) in map {
            let value = entry.get("value").cloned().unwrap_or(Value::Null);
            result.insert(name.clone(), value);
        }
    }
    Ok(result)
}
