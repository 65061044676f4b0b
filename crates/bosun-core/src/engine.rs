use crate::cloud_config::CloudConfigManager;
use crate::concurrency::{shutdown_requested, StateLock};
use crate::credentials::validate_credentials;
use crate::director::DirectorManager;
use crate::infra::InfraManager;
use crate::keypair::KeyPairManager;
use crate::migrate::LegacyMigrator;
use crate::provider::{provider_for, Provider};
use crate::query::{self, PrintEnv, Property};
use crate::CoreError;
use bosun_infra::{InfraError, Toolchain};
use bosun_schema::{
    generate_env_id, validate_env_name, EnvId, Iaas, KeyPair, LbKind, LoadBalancers, State,
    UpConfig,
};
use bosun_store::{StateLayout, StateRepository, StateStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Load balancer settings requested by `create-lbs` / `update-lbs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbRequest {
    pub kind: LbKind,
    /// PEM contents, not paths.
    pub certificate: String,
    pub private_key: String,
    pub chain: Option<String>,
    pub domain: Option<String>,
}

impl LbRequest {
    pub fn new(kind: LbKind) -> Self {
        Self {
            kind,
            certificate: String::new(),
            private_key: String::new(),
            chain: None,
            domain: None,
        }
    }

    /// CF load balancers terminate TLS everywhere; on AWS every listener does.
    fn validate(&self, iaas: Iaas) -> Result<(), CoreError> {
        let needs_cert = self.kind == LbKind::Cf || iaas == Iaas::Aws;
        if needs_cert && (self.certificate.trim().is_empty() || self.private_key.trim().is_empty())
        {
            return Err(CoreError::Validation(format!(
                "{} load balancers on {iaas} require --cert and --key",
                self.kind
            )));
        }
        Ok(())
    }

    fn into_lbs(self) -> LoadBalancers {
        LoadBalancers {
            kind: self.kind,
            certificate: self.certificate,
            private_key: self.private_key,
            chain: self.chain,
            domain: self.domain,
        }
    }
}

/// What a successful `up` actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpOutcome {
    pub env_id: String,
    pub key_pair_created: bool,
    pub migrated: bool,
    pub infra_applied: bool,
    pub jumpbox_deployed: bool,
    pub director_deployed: bool,
    pub cloud_config_updated: bool,
}

impl UpOutcome {
    /// Whether any keypair, infrastructure or deployment was changed.
    pub fn changed_anything(&self) -> bool {
        self.key_pair_created
            || self.migrated
            || self.infra_applied
            || self.jumpbox_deployed
            || self.director_deployed
    }
}

fn overlay(target: &mut String, value: &str) {
    if !value.is_empty() {
        value.clone_into(target);
    }
}

fn interrupted(op: &str) -> Result<(), CoreError> {
    if shutdown_requested() {
        return Err(CoreError::Tool(InfraError::Interrupted(op.to_owned())));
    }
    Ok(())
}

/// Orchestrates the provisioning workflows for one state directory.
///
/// Every workflow is a fixed sequence of steps. After each step the state
/// document is saved, whether the step succeeded or not, so an interrupted or
/// failed run resumes from the last completed step. Mutating workflows hold
/// the state-dir lock for their whole duration.
pub struct Engine {
    layout: StateLayout,
    store: Box<dyn StateRepository>,
    tools: Toolchain,
    rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(state_dir: impl Into<std::path::PathBuf>, tools: Toolchain) -> Self {
        let layout = StateLayout::new(state_dir);
        let store = Box::new(StateStore::new(layout.clone()));
        Self::with_store(layout, store, tools, StdRng::from_entropy())
    }

    /// Engine over an arbitrary state repository and a caller-seeded RNG.
    pub fn with_store(
        layout: StateLayout,
        store: Box<dyn StateRepository>,
        tools: Toolchain,
        rng: StdRng,
    ) -> Self {
        Self {
            layout,
            store,
            tools,
            rng: Mutex::new(rng),
        }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.tools
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<StateLock, CoreError> {
        self.layout.initialize()?;
        StateLock::acquire_or_reject(&self.layout.lock_file())
    }

    /// Lock an existing environment and load its state.
    fn lock_existing(&self) -> Result<(StateLock, State), CoreError> {
        if !self.store.exists() {
            return Err(bosun_store::StoreError::NotFound(self.store.location()).into());
        }
        let lock = self.lock()?;
        Ok((lock, self.store.load()?))
    }

    pub fn load_state(&self) -> Result<State, CoreError> {
        Ok(self.store.load()?)
    }

    fn provider(state: &State) -> Result<Box<dyn Provider>, CoreError> {
        state
            .iaas
            .map(provider_for)
            .ok_or_else(|| CoreError::MissingCredentials(vec!["iaas".to_owned()]))
    }

    fn checkpoint(&self, state: &State) -> Result<(), CoreError> {
        self.store.save(state)?;
        debug!("checkpoint saved to {}", self.store.location());
        Ok(())
    }

    /// Run one pipeline step and checkpoint afterwards. A failed step is
    /// checkpointed too, so partial tool state survives; the step's own error
    /// wins over a failed save.
    fn step<T>(
        &self,
        name: &str,
        state: &mut State,
        run: impl FnOnce(&mut State) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        interrupted(name)?;
        debug!("step: {name}");
        match run(state) {
            Ok(value) => {
                self.checkpoint(state)?;
                Ok(value)
            }
            Err(e) => {
                if let Some(output) = e.tool_output() {
                    output.clone_into(&mut state.latest_error);
                }
                if let Err(save) = self.checkpoint(state) {
                    warn!("could not checkpoint after failed {name}: {save}");
                }
                Err(e)
            }
        }
    }

    /// Fold the requested configuration into `state` and validate the result.
    fn configure(&self, state: &mut State, config: &UpConfig) -> Result<(), CoreError> {
        match (state.iaas, config.iaas) {
            (Some(current), Some(requested)) if current != requested => {
                return Err(CoreError::Validation(format!(
                    "environment runs on {current}; moving it to {requested} is not supported"
                )));
            }
            (None, requested) => state.iaas = requested,
            _ => {}
        }

        overlay(&mut state.aws.access_key_id, &config.aws.access_key_id);
        overlay(&mut state.aws.secret_access_key, &config.aws.secret_access_key);
        overlay(&mut state.aws.region, &config.aws.region);
        overlay(&mut state.gcp.service_account_key, &config.gcp.service_account_key);
        overlay(&mut state.gcp.project_id, &config.gcp.project_id);
        overlay(&mut state.gcp.region, &config.gcp.region);
        overlay(&mut state.gcp.zone, &config.gcp.zone);
        overlay(&mut state.azure.subscription_id, &config.azure.subscription_id);
        overlay(&mut state.azure.tenant_id, &config.azure.tenant_id);
        overlay(&mut state.azure.client_id, &config.azure.client_id);
        overlay(&mut state.azure.client_secret, &config.azure.client_secret);
        overlay(&mut state.azure.location, &config.azure.location);
        validate_credentials(state)?;

        if state.env_id.is_empty() {
            state.env_id = match &config.name {
                Some(name) => {
                    validate_env_name(name)?;
                    EnvId::new(name.as_str())
                }
                None => generate_env_id(&mut *self.rng(), chrono::Utc::now()),
            };
        } else if let Some(name) = config.name.as_deref().filter(|n| *n != state.env_id.as_str()) {
            return Err(CoreError::Validation(format!(
                "environment is named {}, not {name}",
                state.env_id
            )));
        }

        if config.no_director && !state.no_director && !state.director.is_empty() {
            return Err(CoreError::Validation(
                "environment already has a director; --no-director cannot be applied".to_owned(),
            ));
        }
        if config.jumpbox && !state.jumpbox.enabled && !state.director.is_empty() {
            return Err(CoreError::Validation(
                "environment already has a director without a jumpbox; --jumpbox cannot be applied"
                    .to_owned(),
            ));
        }
        state.no_director |= config.no_director;
        state.jumpbox.enabled |= config.jumpbox;
        Ok(())
    }

    /// Create or converge the environment.
    pub fn up(&self, config: &UpConfig) -> Result<UpOutcome, CoreError> {
        let _lock = self.lock()?;
        let mut state = self.store.load_or_default()?;
        self.configure(&mut state, config)?;
        let provider = Self::provider(&state)?;
        provider.availability_zones(state.region())?;
        info!("up: {} environment {}", provider.iaas(), state.env_id);
        self.checkpoint(&state)?;

        let force = config.force;
        let keys = KeyPairManager::new(self.tools.keygen.as_ref(), self.tools.registry.as_ref());
        let migrator = LegacyMigrator::new(self.tools.stacks.as_ref(), self.tools.applier.as_ref());
        let infra = InfraManager::new(self.tools.applier.as_ref());
        let directors = DirectorManager::new(self.tools.deployer.as_ref());
        let mut outcome = UpOutcome {
            env_id: state.env_id.to_string(),
            ..UpOutcome::default()
        };

        outcome.key_pair_created = self.step("keypair", &mut state, |s| {
            let key_pair = keys.ensure(provider.as_ref(), s)?;
            let created = key_pair != s.key_pair;
            s.key_pair = key_pair;
            Ok(created)
        })?;
        outcome.migrated =
            self.step("migrate", &mut state, |s| migrator.migrate(provider.as_ref(), s))?;
        outcome.infra_applied =
            self.step("infra", &mut state, |s| infra.apply(provider.as_ref(), s, force))?;
        outcome.jumpbox_deployed = self.step("jumpbox", &mut state, |s| {
            directors.deploy_jumpbox(provider.as_ref(), s, force)
        })?;
        outcome.director_deployed = self.step("director", &mut state, |s| {
            directors.deploy(provider.as_ref(), s, &mut *self.rng(), force)
        })?;

        interrupted("cloud-config")?;
        outcome.cloud_config_updated = CloudConfigManager::new(self.tools.directors.as_ref())
            .update(provider.as_ref(), &state)?;
        if !state.latest_error.is_empty() {
            state.latest_error.clear();
            self.checkpoint(&state)?;
        }
        info!("up complete for {}", state.env_id);
        Ok(outcome)
    }

    /// Tear everything down in reverse order and delete the state document.
    pub fn destroy(&self) -> Result<(), CoreError> {
        let (_lock, mut state) = self.lock_existing()?;
        let provider = Self::provider(&state)?;
        validate_credentials(&state)?;
        info!("destroying {} environment {}", provider.iaas(), state.env_id);

        let keys = KeyPairManager::new(self.tools.keygen.as_ref(), self.tools.registry.as_ref());
        let infra = InfraManager::new(self.tools.applier.as_ref());
        let directors = DirectorManager::new(self.tools.deployer.as_ref());

        self.step("delete director", &mut state, |s| directors.delete(provider.as_ref(), s))?;
        self.step("delete jumpbox", &mut state, |s| {
            directors.delete_jumpbox(provider.as_ref(), s)
        })?;
        if let Some(legacy) = state.legacy_stack.clone() {
            self.step("delete legacy stack", &mut state, |s| {
                self.tools.stacks.delete(&s.aws, &legacy.name)?;
                s.legacy_stack = None;
                Ok(())
            })?;
        }
        self.step("destroy infra", &mut state, |s| infra.destroy(provider.as_ref(), s))?;
        self.step("delete keypair", &mut state, |s| {
            keys.delete(provider.as_ref(), s)?;
            s.key_pair = KeyPair::default();
            Ok(())
        })?;

        self.store.remove()?;
        info!("environment {} destroyed", state.env_id);
        Ok(())
    }

    fn lb_apply(
        &self,
        name: &str,
        provider: &dyn Provider,
        state: &mut State,
    ) -> Result<(), CoreError> {
        let infra = InfraManager::new(self.tools.applier.as_ref());
        self.step(name, state, |s| infra.apply(provider, s, false))?;
        CloudConfigManager::new(self.tools.directors.as_ref()).update(provider, state)?;
        Ok(())
    }

    fn lb_state(&self) -> Result<(StateLock, State, Box<dyn Provider>), CoreError> {
        let (lock, state) = self.lock_existing()?;
        let provider = Self::provider(&state)?;
        validate_credentials(&state)?;
        if !provider.supports_lbs() {
            return Err(CoreError::Precondition(format!(
                "load balancers are not supported on {}",
                provider.iaas()
            )));
        }
        if state.legacy_stack.is_some() {
            return Err(CoreError::Precondition(
                "environment still uses its legacy stack; run `bosun up` to migrate it first"
                    .to_owned(),
            ));
        }
        Ok((lock, state, provider))
    }

    /// Add load balancers. Re-running with the same kind resumes a failed create.
    pub fn create_lbs(&self, request: LbRequest) -> Result<(), CoreError> {
        let (_lock, mut state, provider) = self.lb_state()?;
        request.validate(provider.iaas())?;
        if let Some(existing) = &state.lbs {
            if existing.kind != request.kind {
                return Err(CoreError::Precondition(format!(
                    "{} load balancers already exist; delete them before creating {}",
                    existing.kind, request.kind
                )));
            }
        }
        info!("creating {} load balancers", request.kind);
        state.lbs = Some(request.into_lbs());
        self.lb_apply("create lbs", provider.as_ref(), &mut state)
    }

    /// Replace the certificate material of existing load balancers.
    pub fn update_lbs(&self, request: LbRequest) -> Result<(), CoreError> {
        let (_lock, mut state, provider) = self.lb_state()?;
        request.validate(provider.iaas())?;
        match &state.lbs {
            None => {
                return Err(CoreError::Precondition(
                    "no load balancers to update; use create-lbs".to_owned(),
                ))
            }
            Some(existing) if existing.kind != request.kind => {
                return Err(CoreError::Precondition(format!(
                    "existing load balancers are {}, not {}",
                    existing.kind, request.kind
                )))
            }
            Some(_) => {}
        }
        info!("updating {} load balancers", request.kind);
        state.lbs = Some(request.into_lbs());
        self.lb_apply("update lbs", provider.as_ref(), &mut state)
    }

    /// Remove load balancers. The director stops referencing them before the
    /// resources go away. Re-running after a failed delete converges the
    /// infrastructure again. Returns `false` when nothing needed to change.
    pub fn delete_lbs(&self) -> Result<bool, CoreError> {
        let (_lock, mut state) = self.lock_existing()?;
        let provider = Self::provider(&state)?;
        validate_credentials(&state)?;
        let had_lbs = match state.lbs.take() {
            Some(lbs) => {
                info!("deleting {} load balancers", lbs.kind);
                CloudConfigManager::new(self.tools.directors.as_ref())
                    .update(provider.as_ref(), &state)?;
                true
            }
            None if state.infra.is_empty() => {
                debug!("no load balancers to delete");
                return Ok(false);
            }
            None => false,
        };
        let infra = InfraManager::new(self.tools.applier.as_ref());
        let applied =
            self.step("delete lbs", &mut state, |s| infra.apply(provider.as_ref(), s, false))?;
        Ok(had_lbs || applied)
    }

    /// Replace the keypair and push it through infrastructure, jumpbox and director.
    pub fn rotate(&self) -> Result<(), CoreError> {
        let (_lock, mut state) = self.lock_existing()?;
        let provider = Self::provider(&state)?;
        validate_credentials(&state)?;

        let keys = KeyPairManager::new(self.tools.keygen.as_ref(), self.tools.registry.as_ref());
        let infra = InfraManager::new(self.tools.applier.as_ref());
        let directors = DirectorManager::new(self.tools.deployer.as_ref());

        self.step("rotate keypair", &mut state, |s| {
            s.key_pair = keys.rotate(provider.as_ref(), s)?;
            Ok(())
        })?;
        self.step("infra", &mut state, |s| infra.apply(provider.as_ref(), s, true))?;
        self.step("jumpbox", &mut state, |s| {
            directors.deploy_jumpbox(provider.as_ref(), s, true)
        })?;
        self.step("director", &mut state, |s| {
            directors.deploy(provider.as_ref(), s, &mut *self.rng(), true)
        })?;
        info!("rotated keypair for {}", state.env_id);
        Ok(())
    }

    pub fn query(&self, property: Property) -> Result<String, CoreError> {
        let state = self.load_state()?;
        query::query(&state, property, self.tools.stacks.as_ref())
    }

    pub fn ssh_key(&self) -> Result<String, CoreError> {
        query::ssh_key(&self.load_state()?)
    }

    pub fn print_env(&self) -> Result<PrintEnv, CoreError> {
        PrintEnv::from_state(&self.load_state()?)
    }

    pub fn lbs(&self) -> Result<Vec<(String, String)>, CoreError> {
        let state = self.load_state()?;
        query::lb_summary(Self::provider(&state)?.as_ref(), &state)
    }

    /// Cloud-config YAML for the current state, without applying it.
    pub fn cloud_config(&self) -> Result<String, CoreError> {
        let state = self.load_state()?;
        CloudConfigManager::generate(Self::provider(&state)?.as_ref(), &state)?.to_yaml()
    }

    pub fn latest_error(&self) -> Result<String, CoreError> {
        Ok(self.load_state()?.latest_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcp_config() -> UpConfig {
        let mut config = UpConfig::new(Some(Iaas::Gcp));
        config.gcp.service_account_key = "{}".to_owned();
        config.gcp.project_id = "proj".to_owned();
        config.gcp.region = "us-west1".to_owned();
        config.gcp.zone = "us-west1-a".to_owned();
        config
    }

    fn engine(dir: &std::path::Path) -> Engine {
        let layout = StateLayout::new(dir);
        let store = Box::new(StateStore::new(layout.clone()));
        Engine::with_store(layout, store, Toolchain::mock().0, StdRng::seed_from_u64(11))
    }

    #[test]
    fn configure_generates_env_id_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut state = State::new();
        engine.configure(&mut state, &gcp_config()).unwrap();
        let env_id = state.env_id.clone();
        assert!(env_id.starts_with("bosun-env-"));
        engine.configure(&mut state, &gcp_config()).unwrap();
        assert_eq!(state.env_id, env_id);
    }

    #[test]
    fn configure_rejects_rename_and_iaas_change() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut state = State::new();
        let mut config = gcp_config();
        config.name = Some("lake-one".to_owned());
        engine.configure(&mut state, &config).unwrap();
        assert_eq!(state.env_id.as_str(), "lake-one");

        config.name = Some("lake-two".to_owned());
        assert!(matches!(
            engine.configure(&mut state, &config),
            Err(CoreError::Validation(_))
        ));

        let mut aws = UpConfig::new(Some(Iaas::Aws));
        aws.aws.access_key_id = "a".to_owned();
        assert!(engine.configure(&mut state, &aws).is_err());
    }

    #[test]
    fn configure_keeps_stored_credentials_when_flags_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut state = State::new();
        engine.configure(&mut state, &gcp_config()).unwrap();
        engine.configure(&mut state, &UpConfig::default()).unwrap();
        assert_eq!(state.gcp.project_id, "proj");
    }

    #[test]
    fn missing_credentials_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let err = engine.up(&UpConfig::new(Some(Iaas::Aws))).unwrap_err();
        match err {
            CoreError::MissingCredentials(fields) => assert_eq!(fields.len(), 3),
            other => panic!("unexpected: {other}"),
        }
        assert!(!engine.store.exists());
    }

    #[test]
    fn lb_request_requires_certificate_for_cf() {
        let request = LbRequest::new(LbKind::Cf);
        assert!(request.validate(Iaas::Gcp).is_err());
        assert!(LbRequest::new(LbKind::Concourse).validate(Iaas::Gcp).is_ok());
        assert!(LbRequest::new(LbKind::Concourse).validate(Iaas::Aws).is_err());
    }

    #[test]
    fn queries_on_missing_state_name_the_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let err = engine.query(Property::EnvId).unwrap_err();
        assert!(err.to_string().contains("proper state dir"));
    }
}
