use crate::applier::{ApplyFailure, ApplyInput, Applier, ImportBinding, PlanSummary};
use crate::process::run_tool;
use crate::InfraError;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info};

const TEMPLATE_FILE: &str = "bosun.tf";
const VARS_FILE: &str = "terraform.tfvars.json";
const STATE_FILE: &str = "terraform.tfstate";
const CREDENTIALS_FILE: &str = "credentials.json";
const PLAN_FILE: &str = "bosun.tfplan";

/// Applier backed by the `terraform` binary.
///
/// Each call works in a fresh scratch directory holding the template,
/// variables, credentials, and the prior state. The directory is removed when
/// the call returns; the state blob travels back to the caller.
pub struct TerraformCli {
    binary: String,
    stream: bool,
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join(STATE_FILE)
    }

    /// Current state file contents. Missing file reads as empty.
    fn read_state(&self) -> String {
        fs::read_to_string(self.state_path()).unwrap_or_default()
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>, stream: bool) -> Self {
        Self {
            binary: binary.into(),
            stream,
        }
    }

    fn prepare(&self, input: &ApplyInput, with_prior_state: bool) -> Result<Workspace, InfraError> {
        let dir = tempfile::Builder::new().prefix("bosun-tf-").tempdir()?;
        fs::write(dir.path().join(TEMPLATE_FILE), &input.template)?;

        let mut vars = input.vars.clone();
        if let Some(ref credentials) = input.credentials {
            fs::write(dir.path().join(CREDENTIALS_FILE), credentials)?;
            vars.insert(
                "credentials".to_owned(),
                Value::String(CREDENTIALS_FILE.to_owned()),
            );
        }
        fs::write(
            dir.path().join(VARS_FILE),
            serde_json::to_string_pretty(&vars)?,
        )?;

        if with_prior_state && !input.prior_state.trim().is_empty() {
            fs::write(dir.path().join(STATE_FILE), &input.prior_state)?;
        }

        let ws = Workspace { dir };
        self.run(&ws, &["init", "-input=false", "-no-color"], "terraform init")?;
        Ok(ws)
    }

    fn command(&self, ws: &Workspace, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(ws.path()).args(args).env("TF_IN_AUTOMATION", "1");
        cmd
    }

    fn run(&self, ws: &Workspace, args: &[&str], tool: &str) -> Result<String, InfraError> {
        let run = run_tool(self.command(ws, args), self.stream)?.check(tool)?;
        Ok(run.stdout)
    }

    fn state_arg(ws: &Workspace) -> String {
        format!("-state={}", ws.state_path().display())
    }
}

impl Applier for TerraformCli {
    fn name(&self) -> &'static str {
        "terraform"
    }

    fn apply(&self, input: &ApplyInput) -> Result<String, ApplyFailure> {
        let ws = self
            .prepare(input, true)
            .map_err(|e| ApplyFailure::new(input.prior_state.clone(), e))?;
        info!("terraform apply in {}", ws.path().display());
        let state_arg = Self::state_arg(&ws);
        let result = self.run(
            &ws,
            &["apply", "-auto-approve", "-input=false", "-no-color", &state_arg],
            "terraform apply",
        );
        let state = ws.read_state();
        match result {
            Ok(_) => Ok(state),
            Err(e) => {
                // A failed apply may not have written state at all.
                let state = if state.is_empty() {
                    input.prior_state.clone()
                } else {
                    state
                };
                Err(ApplyFailure::new(state, e))
            }
        }
    }

    fn destroy(&self, input: &ApplyInput) -> Result<String, ApplyFailure> {
        if input.prior_state.trim().is_empty() {
            return Ok(String::new());
        }
        let ws = self
            .prepare(input, true)
            .map_err(|e| ApplyFailure::new(input.prior_state.clone(), e))?;
        info!("terraform destroy in {}", ws.path().display());
        let state_arg = Self::state_arg(&ws);
        let result = self.run(
            &ws,
            &["destroy", "-auto-approve", "-input=false", "-no-color", &state_arg],
            "terraform destroy",
        );
        let state = ws.read_state();
        match result {
            Ok(_) => Ok(String::new()),
            Err(e) => Err(ApplyFailure::new(state, e)),
        }
    }

    fn import(
        &self,
        input: &ApplyInput,
        bindings: &[ImportBinding],
    ) -> Result<String, ApplyFailure> {
        let ws = self
            .prepare(input, false)
            .map_err(|e| ApplyFailure::new(String::new(), e))?;
        let state_arg = Self::state_arg(&ws);
        for binding in bindings {
            debug!("terraform import {} {}", binding.address, binding.id);
            if let Err(e) = self.run(
                &ws,
                &[
                    "import",
                    "-input=false",
                    "-no-color",
                    &state_arg,
                    &binding.address,
                    &binding.id,
                ],
                "terraform import",
            ) {
                return Err(ApplyFailure::new(ws.read_state(), e));
            }
        }
        Ok(ws.read_state())
    }

    fn plan(&self, input: &ApplyInput) -> Result<PlanSummary, InfraError> {
        let ws = self.prepare(input, true)?;
        let state_arg = Self::state_arg(&ws);
        let out_arg = format!("-out={PLAN_FILE}");
        self.run(
            &ws,
            &["plan", "-input=false", "-no-color", &state_arg, &out_arg],
            "terraform plan",
        )?;
        let json = self.run(&ws, &["show", "-json", PLAN_FILE], "terraform show")?;
        parse_plan_json(&json)
    }
}

/// Count resource changes in `terraform show -json <plan>` output.
pub fn parse_plan_json(json: &str) -> Result<PlanSummary, InfraError> {
    let doc: Value = serde_json::from_str(json).map_err(|e| InfraError::parse("plan", e))?;
    let mut summary = PlanSummary::default();
    let changes = doc
        .get("resource_changes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for change in changes {
        let actions: Vec<&str> = change
            .pointer("/change/actions")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for action in actions {
            match action {
                "create" => summary.add += 1,
                "update" => summary.change += 1,
                "delete" => summary.destroy += 1,
                _ => {}
            }
        }
    }
    Ok(summary)
}
