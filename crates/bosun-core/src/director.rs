use crate::outputs::Outputs;
use crate::provider::{internal_network_vars, Provider, DIRECTOR_INTERNAL_IP, JUMPBOX_INTERNAL_IP};
use crate::CoreError;
use bosun_infra::{DeployFailure, DeployInput, DeploymentKind, DirectorDeployer};
use bosun_schema::{random_credential, Director, Jumpbox, State};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub fn director_name(env_id: &str) -> String {
    format!("bosh-{env_id}")
}

pub fn jumpbox_name(env_id: &str) -> String {
    format!("jumpbox-{env_id}")
}

/// Keep every credential already in `into`; only add new ones.
fn merge_credentials(into: &mut BTreeMap<String, Value>, from: BTreeMap<String, Value>) {
    for (key, value) in from {
        into.entry(key).or_insert(value);
    }
}

/// Deploys and deletes the director and, when enabled, its jumpbox.
///
/// The manager holds no state of its own: every input comes from `State` and
/// every result is written back to it, including the partial deployment-tool
/// state of a failed run.
pub struct DirectorManager<'a> {
    deployer: &'a dyn DirectorDeployer,
}

impl<'a> DirectorManager<'a> {
    pub fn new(deployer: &'a dyn DirectorDeployer) -> Self {
        Self { deployer }
    }

    /// Director API address: public unless the director sits behind a jumpbox.
    pub fn address(state: &State) -> Result<String, CoreError> {
        if state.jumpbox.enabled {
            Ok(format!("https://{DIRECTOR_INTERNAL_IP}:25555"))
        } else {
            Outputs::new(&state.infra.outputs).require("director_address")
        }
    }

    /// Generate admin credentials once. They are kept in state before the first
    /// deploy so a retried deploy reuses them.
    pub fn ensure_credentials(state: &mut State, rng: &mut dyn RngCore) {
        if state.director.username.is_empty() {
            state.director.username = random_credential(rng, "user-", 7);
        }
        if state.director.password.is_empty() {
            state.director.password = random_credential(rng, "p-", 15);
        }
    }

    pub fn director_input(provider: &dyn Provider, state: &State) -> Result<DeployInput, CoreError> {
        let outputs = Outputs::new(&state.infra.outputs);
        let name = director_name(&state.env_id);
        let mut input = DeployInput::new(DeploymentKind::Director, provider.iaas(), &name);
        input.ops_files = vec![
            provider.cpi_ops_file(),
            "uaa.yml".to_owned(),
            "credhub.yml".to_owned(),
            "jumpbox-user.yml".to_owned(),
        ];
        input.vars = provider.cpi_vars(state, &outputs)?;
        input.vars.extend(internal_network_vars(DIRECTOR_INTERNAL_IP));
        input.vars.insert("director_name".to_owned(), json!(name));
        input
            .vars
            .insert("admin_username".to_owned(), json!(state.director.username));
        input
            .vars
            .insert("admin_password".to_owned(), json!(state.director.password));
        if !state.jumpbox.enabled {
            input
                .ops_files
                .push("external-ip-not-recommended.yml".to_owned());
            input
                .vars
                .insert("external_ip".to_owned(), json!(outputs.require("external_ip")?));
        }
        input.prior_state = state.director.deployment_state.clone();
        input.prior_credentials = state.director.credentials.clone();
        input.prior_manifest = state.director.manifest.clone();
        Ok(input)
    }

    pub fn jumpbox_input(provider: &dyn Provider, state: &State) -> Result<DeployInput, CoreError> {
        let outputs = Outputs::new(&state.infra.outputs);
        let mut input = DeployInput::new(
            DeploymentKind::Jumpbox,
            provider.iaas(),
            jumpbox_name(&state.env_id),
        );
        input.ops_files = vec![provider.cpi_ops_file()];
        input.vars = provider.cpi_vars(state, &outputs)?;
        input.vars.extend(internal_network_vars(JUMPBOX_INTERNAL_IP));
        input
            .vars
            .insert("external_ip".to_owned(), json!(outputs.require("external_ip")?));
        input.prior_state = state.jumpbox.deployment_state.clone();
        input.prior_credentials = state.jumpbox.variables.clone();
        input.prior_manifest = state.jumpbox.manifest.clone();
        Ok(input)
    }

    /// A failed run leaves the deployment in an unknown state, so the recorded
    /// fingerprint no longer describes it and the next run must not skip.
    fn record_failure(
        state: &mut Value,
        fingerprint: &mut Option<String>,
        latest_error: &mut String,
        failure: DeployFailure,
    ) -> CoreError {
        if !failure.state.is_null() {
            *state = failure.state;
        }
        *fingerprint = None;
        *latest_error = failure.output;
        CoreError::Tool(failure.error)
    }

    /// Deploy the jumpbox if the environment has one. Returns whether the
    /// deployment tool ran.
    pub fn deploy_jumpbox(
        &self,
        provider: &dyn Provider,
        state: &mut State,
        force: bool,
    ) -> Result<bool, CoreError> {
        if !state.jumpbox.enabled {
            return Ok(false);
        }
        let input = Self::jumpbox_input(provider, state)?;
        let fingerprint = input.fingerprint();
        if !force
            && state.jumpbox.is_deployed()
            && state.jumpbox.input_fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            debug!("jumpbox unchanged");
            return Ok(false);
        }

        info!("deploying jumpbox {}", input.name);
        let output = self.deployer.deploy(&input).map_err(|failure| {
            Self::record_failure(
                &mut state.jumpbox.deployment_state,
                &mut state.jumpbox.input_fingerprint,
                &mut state.latest_error,
                failure,
            )
        })?;
        let external_ip = Outputs::new(&state.infra.outputs).require("external_ip")?;
        let jumpbox = &mut state.jumpbox;
        jumpbox.url = format!("{external_ip}:22");
        jumpbox.manifest = output.manifest;
        jumpbox.deployment_state = output.state;
        merge_credentials(&mut jumpbox.variables, output.credentials);
        jumpbox.input_fingerprint = Some(fingerprint);
        Ok(true)
    }

    /// Deploy the director. First deploys populate `state.director`; later
    /// ones refresh manifest and tool state but keep credentials and the CA.
    pub fn deploy(
        &self,
        provider: &dyn Provider,
        state: &mut State,
        rng: &mut dyn RngCore,
        force: bool,
    ) -> Result<bool, CoreError> {
        if state.no_director {
            debug!("no-director environment; skipping director deploy");
            return Ok(false);
        }
        Self::ensure_credentials(state, rng);
        let input = Self::director_input(provider, state)?;
        let fingerprint = input.fingerprint();
        if !force
            && !state.director.deployment_state.is_null()
            && state.director.input_fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            debug!("director unchanged");
            return Ok(false);
        }

        info!("deploying director {}", input.name);
        let address = Self::address(state)?;
        let output = self.deployer.deploy(&input).map_err(|failure| {
            Self::record_failure(
                &mut state.director.deployment_state,
                &mut state.director.input_fingerprint,
                &mut state.latest_error,
                failure,
            )
        })?;

        let director = &mut state.director;
        if director.name.is_empty() {
            director.name.clone_from(&input.name);
        }
        if director.address.is_empty() {
            director.address = address;
        }
        if director.ca_cert.is_empty() {
            director.ca_cert = output.ssl.ca;
            director.certificate = output.ssl.certificate;
            director.private_key = output.ssl.private_key;
        }
        merge_credentials(&mut director.credentials, output.credentials);
        director.manifest = output.manifest;
        director.deployment_state = output.state;
        director.input_fingerprint = Some(fingerprint);
        Ok(true)
    }

    fn delete_input(
        provider: &dyn Provider,
        kind: DeploymentKind,
        name: String,
        state: Value,
        credentials: &BTreeMap<String, Value>,
        manifest: &str,
    ) -> DeployInput {
        let mut input = DeployInput::new(kind, provider.iaas(), name);
        input.prior_state = state;
        input.prior_credentials = credentials.clone();
        input.prior_manifest = manifest.to_owned();
        input
    }

    /// Delete the director VM and clear `state.director`.
    pub fn delete(&self, provider: &dyn Provider, state: &mut State) -> Result<(), CoreError> {
        if state.director.deployment_state.is_null() {
            state.director = Director::default();
            return Ok(());
        }
        let input = Self::delete_input(
            provider,
            DeploymentKind::Director,
            director_name(&state.env_id),
            state.director.deployment_state.clone(),
            &state.director.credentials,
            &state.director.manifest,
        );
        info!("deleting director {}", input.name);
        self.deployer.delete(&input).map_err(|failure| {
            Self::record_failure(
                &mut state.director.deployment_state,
                &mut state.director.input_fingerprint,
                &mut state.latest_error,
                failure,
            )
        })?;
        state.director = Director::default();
        Ok(())
    }

    /// Delete the jumpbox VM. The `enabled` flag survives so a later `up` redeploys it.
    pub fn delete_jumpbox(&self, provider: &dyn Provider, state: &mut State) -> Result<(), CoreError> {
        let enabled = state.jumpbox.enabled;
        if !state.jumpbox.is_deployed() {
            state.jumpbox = Jumpbox {
                enabled,
                ..Jumpbox::default()
            };
            return Ok(());
        }
        let input = Self::delete_input(
            provider,
            DeploymentKind::Jumpbox,
            jumpbox_name(&state.env_id),
            state.jumpbox.deployment_state.clone(),
            &state.jumpbox.variables,
            &state.jumpbox.manifest,
        );
        info!("deleting jumpbox {}", input.name);
        self.deployer.delete(&input).map_err(|failure| {
            Self::record_failure(
                &mut state.jumpbox.deployment_state,
                &mut state.jumpbox.input_fingerprint,
                &mut state.latest_error,
                failure,
            )
        })?;
        state.jumpbox = Jumpbox {
            enabled,
            ..Jumpbox::default()
        };
        Ok(())
    }
}
