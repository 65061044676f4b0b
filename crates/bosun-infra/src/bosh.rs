use crate::deployer::{
    DeployFailure, DeployInput, DeployOutput, DeploymentKind, DirectorDeployer, SslKeyPair,
};
use crate::process::run_tool;
use crate::InfraError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::info;

const VARS_STORE: &str = "vars-store.yml";
const VARS_FILE: &str = "vars-file.yml";
const STATE_FILE: &str = "state.json";
const MANIFEST_FILE: &str = "manifest.yml";

/// Deployment tool backed by the `bosh` CLI and local checkouts of
/// bosh-deployment and jumpbox-deployment.
pub struct BoshCli {
    binary: String,
    director_dir: Option<PathBuf>,
    jumpbox_dir: Option<PathBuf>,
    stream: bool,
}

impl BoshCli {
    pub fn new(
        binary: impl Into<String>,
        director_dir: Option<PathBuf>,
        jumpbox_dir: Option<PathBuf>,
        stream: bool,
    ) -> Self {
        Self {
            binary: binary.into(),
            director_dir,
            jumpbox_dir,
            stream,
        }
    }

    fn base_manifest(&self, kind: DeploymentKind) -> Result<PathBuf, InfraError> {
        match kind {
            DeploymentKind::Director => self
                .director_dir
                .as_ref()
                .map(|d| d.join("bosh.yml"))
                .ok_or_else(|| InfraError::NotConfigured("bosh_deployment_dir".to_owned())),
            DeploymentKind::Jumpbox => self
                .jumpbox_dir
                .as_ref()
                .map(|d| d.join("jumpbox.yml"))
                .ok_or_else(|| InfraError::NotConfigured("jumpbox_deployment_dir".to_owned())),
        }
    }

    fn workspace(&self, input: &DeployInput) -> Result<TempDir, InfraError> {
        let dir = tempfile::Builder::new().prefix("bosun-bosh-").tempdir()?;
        write_yaml(&dir.path().join(VARS_STORE), &input.prior_credentials)?;
        write_yaml(&dir.path().join(VARS_FILE), &input.vars)?;
        if !input.prior_state.is_null() {
            fs::write(
                dir.path().join(STATE_FILE),
                serde_json::to_string_pretty(&input.prior_state)?,
            )?;
        }
        Ok(dir)
    }

    fn bosh(&self, dir: &Path, args: &[&str], tool: &str) -> Result<String, InfraError> {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(dir).args(args).arg("--tty");
        Ok(run_tool(cmd, self.stream)?.check(tool)?.stdout)
    }

    fn interpolate(&self, dir: &Path, input: &DeployInput) -> Result<String, InfraError> {
        let base = self.base_manifest(input.kind)?;
        let root = base.parent().unwrap_or(Path::new("."));
        let mut args: Vec<String> = vec!["interpolate".to_owned(), base.display().to_string()];
        for ops in &input.ops_files {
            args.push("-o".to_owned());
            args.push(root.join(ops).display().to_string());
        }
        args.extend(
            ["--vars-store", VARS_STORE, "--vars-file", VARS_FILE]
                .iter()
                .map(ToString::to_string),
        );
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(dir).args(&argv);
        Ok(run_tool(cmd, self.stream)?.check("bosh interpolate")?.stdout)
    }

    fn read_state(dir: &Path, fallback: &Value) -> Value {
        fs::read_to_string(dir.join(STATE_FILE))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| fallback.clone())
    }
}

fn write_yaml(path: &Path, values: &BTreeMap<String, Value>) -> Result<(), InfraError> {
    let yaml = if values.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(values).map_err(|e| InfraError::parse("vars", e))?
    };
    fs::write(path, yaml)?;
    Ok(())
}

fn read_vars_store(path: &Path) -> Result<BTreeMap<String, Value>, InfraError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&content).map_err(|e| InfraError::parse("vars store", e))
}

impl DirectorDeployer for BoshCli {
    fn deploy(&self, input: &DeployInput) -> Result<DeployOutput, DeployFailure> {
        let fail = |e: InfraError| DeployFailure::new(input.prior_state.clone(), e);
        let ws = self.workspace(input).map_err(fail)?;
        let dir = ws.path();

        info!("bosh create-env {} ({})", input.name, input.kind);
        let manifest = self.interpolate(dir, input).map_err(fail)?;
        fs::write(dir.join(MANIFEST_FILE), &manifest).map_err(|e| fail(e.into()))?;

        let result = self.bosh(
            dir,
            &[
                "create-env",
                MANIFEST_FILE,
                "--state",
                STATE_FILE,
                "--vars-store",
                VARS_STORE,
                "--vars-file",
                VARS_FILE,
            ],
            "bosh create-env",
        );
        let state = Self::read_state(dir, &input.prior_state);
        if let Err(e) = result {
            return Err(DeployFailure::new(state, e));
        }

        let credentials =
            read_vars_store(&dir.join(VARS_STORE)).map_err(|e| DeployFailure::new(state.clone(), e))?;
        let ssl_key = match input.kind {
            DeploymentKind::Director => "director_ssl",
            DeploymentKind::Jumpbox => "jumpbox_ssl",
        };
        let ssl = SslKeyPair::from_credentials(&credentials, ssl_key).unwrap_or_default();

        Ok(DeployOutput {
            manifest,
            state,
            credentials,
            ssl,
        })
    }

    fn delete(&self, input: &DeployInput) -> Result<(), DeployFailure> {
        if input.prior_state.is_null() {
            return Ok(());
        }
        let fail = |e: InfraError| DeployFailure::new(input.prior_state.clone(), e);
        let ws = self.workspace(input).map_err(fail)?;
        let dir = ws.path();

        let manifest = if input.prior_manifest.is_empty() {
            self.interpolate(dir, input).map_err(fail)?
        } else {
            input.prior_manifest.clone()
        };
        fs::write(dir.join(MANIFEST_FILE), manifest).map_err(|e| fail(e.into()))?;

        info!("bosh delete-env {} ({})", input.name, input.kind);
        self.bosh(
            dir,
            &[
                "delete-env",
                MANIFEST_FILE,
                "--state",
                STATE_FILE,
                "--vars-store",
                VARS_STORE,
                "--vars-file",
                VARS_FILE,
            ],
            "bosh delete-env",
        )
        .map_err(|e| DeployFailure::new(Self::read_state(dir, &input.prior_state), e))?;
        Ok(())
    }
}
