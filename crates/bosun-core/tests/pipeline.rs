//! End-to-end workflow tests against the mock toolchain.

use bosun_core::{CoreError, Engine, LbRequest, Property, StateLock};
use bosun_infra::mock::mock_output_value;
use bosun_infra::{DeploymentKind, MockHandles, PlanSummary, StackDescription, StackResource, Toolchain};
use bosun_schema::{Iaas, KeyPair, LbKind, LegacyStack, StackName, State, UpConfig};
use bosun_store::{StateLayout, StateRepository, StateStore, StoreError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// File-backed store that also keeps a copy of every checkpoint.
#[derive(Clone)]
struct RecordingStore {
    inner: Arc<StateStore>,
    saves: Arc<Mutex<Vec<State>>>,
}

impl RecordingStore {
    fn saves(&self) -> Vec<State> {
        self.saves.lock().unwrap().clone()
    }
}

impl StateRepository for RecordingStore {
    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn load(&self) -> Result<State, StoreError> {
        self.inner.load()
    }

    fn save(&self, state: &State) -> Result<(), StoreError> {
        self.saves.lock().unwrap().push(state.clone());
        self.inner.save(state)
    }

    fn remove(&self) -> Result<(), StoreError> {
        self.inner.remove()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

struct Harness {
    dir: TempDir,
    engine: Engine,
    mocks: MockHandles,
    store: RecordingStore,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(dir.path());
    let store = RecordingStore {
        inner: Arc::new(StateStore::new(layout.clone())),
        saves: Arc::default(),
    };
    let (tools, mocks) = Toolchain::mock();
    let engine = Engine::with_store(
        layout,
        Box::new(store.clone()),
        tools,
        StdRng::seed_from_u64(42),
    );
    Harness {
        dir,
        engine,
        mocks,
        store,
    }
}

fn gcp_config() -> UpConfig {
    let mut config = UpConfig::new(Some(Iaas::Gcp));
    config.name = Some("lake-tahoe".to_owned());
    config.gcp.service_account_key = "{\"type\": \"service_account\"}".to_owned();
    config.gcp.project_id = "proj".to_owned();
    config.gcp.region = "us-central1".to_owned();
    config.gcp.zone = "us-central1-a".to_owned();
    config
}

fn aws_credentials(state: &mut State) {
    state.iaas = Some(Iaas::Aws);
    state.aws.access_key_id = "AKIA".to_owned();
    state.aws.secret_access_key = "secret".to_owned();
    state.aws.region = "us-west-2".to_owned();
}

fn resource(logical: &str, physical: &str) -> StackResource {
    StackResource {
        logical_id: logical.to_owned(),
        physical_id: physical.to_owned(),
        resource_type: "AWS::EC2::Resource".to_owned(),
    }
}

/// An unmigrated AWS environment and the stack behind it.
fn legacy_aws(h: &Harness) -> State {
    let mut state = State::new();
    aws_credentials(&mut state);
    state.env_id = "lake-legacy".into();
    state.key_pair = KeyPair {
        name: "keypair-lake-legacy".to_owned(),
        public_key: "ssh-rsa OLD".to_owned(),
        private_key: "OLD KEY".to_owned(),
    };
    state.legacy_stack = Some(LegacyStack {
        name: StackName::from("stack-lake-legacy"),
        outputs: BTreeMap::from([("BOSHEIP".to_owned(), "192.0.2.50".to_owned())]),
    });
    h.mocks.stacks.add_stack(StackDescription {
        name: "stack-lake-legacy".to_owned(),
        outputs: BTreeMap::from([("BOSHEIP".to_owned(), "192.0.2.50".to_owned())]),
        resources: vec![
            resource("VPC", "vpc-1"),
            resource("VPCGatewayInternetGateway", "igw-1"),
            resource("VPCGatewayAttachment", "attach-1"),
            resource("BOSHSubnet", "subnet-b"),
            resource("BOSHEIP", "192.0.2.50"),
            resource("InternalRouteTable", "rtb-i"),
            resource("InternalSubnet1", "subnet-1"),
            resource("InternalSubnet1RouteTableAssociation", "rtbassoc-1"),
            resource("InternalSecurityGroupIngressTCPfromBOSH", "rule-1"),
        ],
    });
    state
}

/// Fields that must match between an uninterrupted and a resumed run.
fn converged(state: &State) -> (String, String, BTreeMap<String, serde_json::Value>, Vec<String>) {
    (
        state.env_id.to_string(),
        state.key_pair.name.clone(),
        state.infra.outputs.clone(),
        vec![
            state.director.address.clone(),
            state.director.username.clone(),
            state.director.password.clone(),
            state.director.ca_cert.clone(),
            state.jumpbox.url.clone(),
        ],
    )
}

#[test]
fn up_checkpoints_each_component_in_order() {
    let h = harness();
    let outcome = h.engine.up(&gcp_config()).unwrap();
    assert_eq!(outcome.env_id, "lake-tahoe");
    assert!(outcome.key_pair_created && outcome.infra_applied && outcome.director_deployed);

    let saves = h.store.saves();
    let first = |pred: &dyn Fn(&State) -> bool| saves.iter().position(|s| pred(s)).unwrap();
    let env = first(&|s| !s.env_id.is_empty());
    let key = first(&|s| !s.key_pair.is_empty());
    let infra = first(&|s| !s.infra.is_empty());
    let director = first(&|s| !s.director.address.is_empty());
    assert_eq!(env, 0);
    assert!(saves[env].key_pair.is_empty());
    assert!(env < key && key < infra && infra < director);
    assert!(saves[key].infra.is_empty());
    assert!(saves[infra].director.is_empty());

    let uploads = h.mocks.directors.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0.address, "https://203.0.113.10:25555");
    assert!(uploads[0].1.contains("us-central1-a"));
}

#[test]
fn second_up_changes_nothing() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let outcome = h.engine.up(&gcp_config()).unwrap();
    assert!(!outcome.changed_anything());
    assert_eq!(h.mocks.keys.generate_calls(), 1);
    assert_eq!(h.mocks.applier.apply_calls(), 1);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 1);
}

#[test]
fn forced_up_reapplies_and_redeploys() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let before = h.engine.load_state().unwrap();
    let mut config = gcp_config();
    config.force = true;
    h.engine.up(&config).unwrap();
    assert_eq!(h.mocks.applier.apply_calls(), 2);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 2);
    let after = h.engine.load_state().unwrap();
    assert_eq!(after.director.password, before.director.password);
    assert_eq!(after.director.ca_cert, before.director.ca_cert);
}

#[derive(Debug, Clone, Copy)]
enum FailAt {
    Keypair,
    Infra,
    Jumpbox,
    Director,
    CloudConfig,
}

impl FailAt {
    fn config(self) -> UpConfig {
        let mut config = gcp_config();
        // The deployer mock fails its next deploy, which is the jumpbox when one is enabled.
        config.jumpbox = !matches!(self, FailAt::Director);
        config
    }

    fn inject(self, mocks: &MockHandles) {
        match self {
            FailAt::Keypair => mocks.keys.fail_next_register(),
            FailAt::Infra => mocks.applier.fail_next_apply(Some("{\"partial\": true}".to_owned())),
            FailAt::Jumpbox | FailAt::Director => mocks.deployer.fail_next_deploy(),
            FailAt::CloudConfig => mocks.directors.fail_next_upload(),
        }
    }
}

#[test]
fn up_resumes_after_failure_at_every_step() {
    for fail_at in [
        FailAt::Keypair,
        FailAt::Infra,
        FailAt::Jumpbox,
        FailAt::Director,
        FailAt::CloudConfig,
    ] {
        let clean = harness();
        clean.engine.up(&fail_at.config()).unwrap();
        let expected = converged(&clean.engine.load_state().unwrap());

        let h = harness();
        fail_at.inject(&h.mocks);
        let err = h.engine.up(&fail_at.config()).unwrap_err();
        assert!(matches!(err, CoreError::Tool(_)), "{fail_at:?}: {err}");
        let partial = h.engine.load_state().unwrap();
        assert_eq!(partial.env_id.as_str(), "lake-tahoe", "{fail_at:?}");
        if !matches!(fail_at, FailAt::CloudConfig) {
            assert!(
                partial.latest_error.contains("injected"),
                "{fail_at:?}: {}",
                partial.latest_error
            );
        }

        h.engine.up(&fail_at.config()).unwrap();
        let resumed = h.engine.load_state().unwrap();
        assert_eq!(converged(&resumed), expected, "{fail_at:?}");
        assert!(resumed.latest_error.is_empty(), "{fail_at:?}");
        assert_eq!(h.mocks.directors.uploads().len(), 1, "{fail_at:?}");
    }
}

#[test]
fn failed_apply_persists_partial_state_and_skips_later_steps() {
    let h = harness();
    h.mocks
        .applier
        .fail_next_apply(Some("{\"partial\": true}".to_owned()));
    h.engine.up(&gcp_config()).unwrap_err();
    let state = h.engine.load_state().unwrap();
    assert!(!state.key_pair.is_empty());
    assert_eq!(state.infra.state, "{\"partial\": true}");
    assert!(state.director.address.is_empty());
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 0);
    assert_eq!(h.engine.latest_error().unwrap(), "injected apply failure");

    h.engine.up(&gcp_config()).unwrap();
    assert_eq!(h.mocks.keys.generate_calls(), 1);
    let input = h.mocks.applier.last_input().unwrap();
    assert_eq!(input.prior_state, "{\"partial\": true}");
}

#[test]
fn failed_forced_up_is_finished_by_a_plain_up() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let mut forced = gcp_config();
    forced.force = true;

    h.mocks
        .applier
        .fail_next_apply(Some("{\"partial\": true}".to_owned()));
    h.engine.up(&forced).unwrap_err();
    let outcome = h.engine.up(&gcp_config()).unwrap();
    assert!(outcome.infra_applied);
    assert_eq!(h.mocks.applier.apply_calls(), 3);
    assert!(!h.engine.load_state().unwrap().infra.state.contains("partial"));

    h.mocks.deployer.fail_next_deploy();
    h.engine.up(&forced).unwrap_err();
    let outcome = h.engine.up(&gcp_config()).unwrap();
    assert!(outcome.director_deployed);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 3);
}

#[test]
fn director_failure_does_not_reapply_infra() {
    let h = harness();
    h.mocks.deployer.fail_next_deploy();
    h.engine.up(&gcp_config()).unwrap_err();
    h.engine.up(&gcp_config()).unwrap();
    assert_eq!(h.mocks.applier.apply_calls(), 1);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 2);
}

#[test]
fn validation_failure_leaves_no_state() {
    let h = harness();
    let mut config = gcp_config();
    config.gcp.zone.clear();
    let err = h.engine.up(&config).unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("gcp zone"));
    assert!(h.store.saves().is_empty());

    let mut config = gcp_config();
    config.gcp.region = "mars-north1".to_owned();
    let err = h.engine.up(&config).unwrap_err();
    assert!(matches!(err, CoreError::UnknownRegion { .. }));
    assert!(h.store.saves().is_empty());
}

#[test]
fn destroy_removes_everything_in_reverse_order() {
    let h = harness();
    let mut config = gcp_config();
    config.jumpbox = true;
    h.engine.up(&config).unwrap();
    let before = h.store.saves().len();

    h.engine.destroy().unwrap();
    assert!(!h.dir.path().join("bosun-state.json").exists());
    assert_eq!(h.mocks.deployer.delete_calls(DeploymentKind::Director), 1);
    assert_eq!(h.mocks.deployer.delete_calls(DeploymentKind::Jumpbox), 1);
    assert_eq!(h.mocks.applier.destroy_calls(), 1);
    assert_eq!(h.mocks.keys.deregister_calls(), 1);

    let saves = &h.store.saves()[before..];
    assert!(saves[0].director.is_empty() && !saves[0].infra.is_empty());
    let last = saves.last().unwrap();
    assert!(last.infra.is_empty() && last.key_pair.is_empty());
    assert!(last.infra.outputs.is_empty());
}

#[test]
fn failed_destroy_keeps_state_for_retry() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    h.mocks.applier.fail_next_destroy();
    h.engine.destroy().unwrap_err();

    let state = h.engine.load_state().unwrap();
    assert!(state.director.is_empty());
    assert!(!state.infra.is_empty());
    assert!(!state.key_pair.is_empty());

    h.engine.destroy().unwrap();
    assert_eq!(h.mocks.deployer.delete_calls(DeploymentKind::Director), 1);
    assert!(h.engine.load_state().is_err());
}

#[test]
fn destroy_without_state_fails() {
    let h = harness();
    let err = h.engine.destroy().unwrap_err();
    assert!(err.to_string().contains("proper state dir"));
}

#[test]
fn concurrent_invocation_is_rejected() {
    let h = harness();
    let _held = StateLock::acquire_or_reject(&h.dir.path().join(".bosun.lock")).unwrap();
    let err = h.engine.up(&gcp_config()).unwrap_err();
    assert!(matches!(err, CoreError::Locked(_)));
}

#[test]
fn rotate_replaces_key_and_redeploys() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let old = h.engine.load_state().unwrap();

    h.engine.rotate().unwrap();
    let new = h.engine.load_state().unwrap();
    assert_ne!(new.key_pair.private_key, old.key_pair.private_key);
    assert_eq!(h.mocks.keys.generate_calls(), 2);
    assert_eq!(h.mocks.applier.apply_calls(), 2);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 2);
    assert_eq!(new.director.password, old.director.password);
}

#[test]
fn lb_round_trip_restores_outputs() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let before: BTreeSet<String> = h.engine.load_state().unwrap().infra.outputs.into_keys().collect();

    h.engine.create_lbs(LbRequest::new(LbKind::Concourse)).unwrap();
    let with_lbs = h.engine.load_state().unwrap();
    assert!(with_lbs.infra.outputs.contains_key("concourse_lb_ip"));
    let summary = h.engine.lbs().unwrap();
    assert!(summary.iter().any(|(name, _)| name == "concourse_target_pool"));
    let uploads = h.mocks.directors.uploads();
    assert!(uploads.last().unwrap().1.contains("concourse"));

    assert!(h.engine.delete_lbs().unwrap());
    let after: BTreeSet<String> = h.engine.load_state().unwrap().infra.outputs.into_keys().collect();
    assert_eq!(after, before);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 1);
    assert_eq!(h.mocks.keys.generate_calls(), 1);
    assert!(!h.engine.delete_lbs().unwrap());
}

#[test]
fn failed_lb_delete_is_finished_by_a_retry() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    h.engine.create_lbs(LbRequest::new(LbKind::Concourse)).unwrap();
    assert_eq!(h.mocks.applier.apply_calls(), 2);

    h.mocks
        .applier
        .fail_next_apply(Some("{\"partial\": true}".to_owned()));
    h.engine.delete_lbs().unwrap_err();
    let failed = h.engine.load_state().unwrap();
    assert!(failed.lbs.is_none());
    assert!(failed.infra.input_fingerprint.is_none());

    assert!(h.engine.delete_lbs().unwrap());
    assert_eq!(h.mocks.applier.apply_calls(), 4);
    let state = h.engine.load_state().unwrap();
    assert!(!state.infra.outputs.contains_key("concourse_lb_ip"));
    assert!(!state.infra.state.contains("partial"));

    assert!(!h.engine.delete_lbs().unwrap());
    assert_eq!(h.mocks.applier.apply_calls(), 4);
}

#[test]
fn cf_lbs_need_certificates_and_azure_has_none() {
    let h = harness();
    h.engine.up(&gcp_config()).unwrap();
    let err = h.engine.create_lbs(LbRequest::new(LbKind::Cf)).unwrap_err();
    assert!(err.is_validation());

    let mut request = LbRequest::new(LbKind::Cf);
    request.certificate = "CERT".to_owned();
    request.private_key = "KEY".to_owned();
    h.engine.create_lbs(request.clone()).unwrap();
    let state = h.engine.load_state().unwrap();
    assert!(state.infra.outputs.contains_key("router_lb_ip"));

    request.certificate = "CERT2".to_owned();
    h.engine.update_lbs(request).unwrap();
    assert_eq!(h.engine.load_state().unwrap().lbs.unwrap().certificate, "CERT2");
    assert!(h.engine.update_lbs(LbRequest::new(LbKind::Concourse)).is_err());
}

#[test]
fn legacy_stack_is_migrated_by_up() {
    let h = harness();
    let state = legacy_aws(&h);
    StateStore::new(StateLayout::new(h.dir.path())).save(&state).unwrap();

    let outcome = h.engine.up(&UpConfig::default()).unwrap();
    assert!(outcome.migrated);
    assert!(!outcome.key_pair_created);
    assert!(!outcome.infra_applied);
    assert_eq!(h.mocks.applier.import_calls(), 1);
    assert_eq!(h.mocks.applier.plan_calls(), 1);
    assert_eq!(h.mocks.applier.apply_calls(), 0);

    let state = h.engine.load_state().unwrap();
    assert!(state.legacy_stack.is_none());
    assert!(!state.infra.is_empty());
    assert_eq!(state.infra.outputs["vpc_id"], mock_output_value("vpc_id"));
    assert!(!state.director.address.is_empty());
}

#[test]
fn migration_with_drift_leaves_legacy_stack() {
    let h = harness();
    let state = legacy_aws(&h);
    StateStore::new(StateLayout::new(h.dir.path())).save(&state).unwrap();
    h.mocks.applier.set_plan(PlanSummary {
        add: 1,
        change: 0,
        destroy: 0,
    });

    let err = h.engine.up(&UpConfig::default()).unwrap_err();
    assert!(matches!(err, CoreError::MigrationAborted(_)));
    let state = h.engine.load_state().unwrap();
    assert!(state.legacy_stack.is_some());
    assert!(state.infra.is_empty());
    assert_eq!(h.mocks.applier.apply_calls(), 0);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 0);
}

#[test]
fn no_director_environment_answers_director_address() {
    let h = harness();
    let mut config = gcp_config();
    config.no_director = true;
    let outcome = h.engine.up(&config).unwrap();
    assert!(!outcome.director_deployed);
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Director), 0);
    assert!(h.mocks.directors.uploads().is_empty());

    assert_eq!(
        h.engine.query(Property::DirectorAddress).unwrap(),
        "https://203.0.113.10:25555"
    );
    assert_eq!(h.engine.query(Property::EnvId).unwrap(), "lake-tahoe");
    let err = h.engine.query(Property::DirectorPassword).unwrap_err();
    assert!(err.to_string().contains("does not manage this director"));
}

#[test]
fn no_director_on_legacy_aws_reads_stack_eip() {
    let h = harness();
    let mut state = legacy_aws(&h);
    state.no_director = true;
    state.legacy_stack.as_mut().unwrap().outputs.clear();
    StateStore::new(StateLayout::new(h.dir.path())).save(&state).unwrap();
    assert_eq!(
        h.engine.query(Property::DirectorAddress).unwrap(),
        "https://192.0.2.50:25555"
    );
    assert_eq!(h.mocks.stacks.describe_calls(), 1);
}

#[test]
fn jumpbox_environment_exports_proxy() {
    let h = harness();
    let mut config = gcp_config();
    config.jumpbox = true;
    h.engine.up(&config).unwrap();
    assert_eq!(h.mocks.deployer.deploy_calls(DeploymentKind::Jumpbox), 1);
    assert_eq!(
        h.engine.query(Property::JumpboxAddress).unwrap(),
        "203.0.113.10:22"
    );
    assert_eq!(
        h.engine.query(Property::DirectorAddress).unwrap(),
        "https://10.0.0.6:25555"
    );
    let env = h.engine.print_env().unwrap();
    assert!(env.jumpbox.is_some());
    assert!(h.engine.ssh_key().unwrap().contains("MOCK SSH KEY jumpbox-lake-tahoe"));
}

#[test]
fn azure_up_has_no_keypair_step() {
    let h = harness();
    let mut config = UpConfig::new(Some(Iaas::Azure));
    config.azure.subscription_id = "sub".to_owned();
    config.azure.tenant_id = "tenant".to_owned();
    config.azure.client_id = "client".to_owned();
    config.azure.client_secret = "secret".to_owned();
    config.azure.location = "westeurope".to_owned();
    h.engine.up(&config).unwrap();
    assert_eq!(h.mocks.keys.generate_calls(), 0);
    assert_eq!(h.mocks.applier.apply_calls(), 1);
    let yaml = h.engine.cloud_config().unwrap();
    assert!(yaml.contains("10.0.0.0/24"));
}
