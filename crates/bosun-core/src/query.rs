use crate::provider::aws::LEGACY_EIP_OUTPUT;
use crate::provider::Provider;
use crate::CoreError;
use bosun_infra::StackManager;
use bosun_schema::{Iaas, State};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A single value readable from the state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    EnvId,
    DirectorAddress,
    DirectorUsername,
    DirectorPassword,
    DirectorCaCert,
    JumpboxAddress,
}

impl Property {
    pub const ALL: [Property; 6] = [
        Property::EnvId,
        Property::DirectorAddress,
        Property::DirectorUsername,
        Property::DirectorPassword,
        Property::DirectorCaCert,
        Property::JumpboxAddress,
    ];

    /// Human-readable name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Property::EnvId => "environment id",
            Property::DirectorAddress => "director address",
            Property::DirectorUsername => "director username",
            Property::DirectorPassword => "director password",
            Property::DirectorCaCert => "director ca cert",
            Property::JumpboxAddress => "jumpbox address",
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Property::EnvId => "env-id",
            Property::DirectorAddress => "director-address",
            Property::DirectorUsername => "director-username",
            Property::DirectorPassword => "director-password",
            Property::DirectorCaCert => "director-ca-cert",
            Property::JumpboxAddress => "jumpbox-address",
        }
    }

    /// Answerable for an environment whose director bosun did not deploy.
    fn available_without_director(self) -> bool {
        matches!(self, Property::EnvId | Property::DirectorAddress)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for Property {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|p| p.command() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown property '{s}'")))
    }
}

fn not_managed() -> CoreError {
    CoreError::Precondition("Error bosun does not manage this director.".to_owned())
}

fn non_empty(property: &str, value: String) -> Result<String, CoreError> {
    if value.is_empty() {
        return Err(CoreError::Precondition(format!(
            "Could not retrieve {property}, please make sure you are targeting the proper state dir."
        )));
    }
    Ok(value)
}

/// Public director address for an environment without a managed director.
///
/// Unmigrated AWS environments carry the address as a stack output; the stack
/// is described when the output was not recorded in state.
fn external_director_address(state: &State, stacks: &dyn StackManager) -> Result<String, CoreError> {
    let ip = match (&state.legacy_stack, state.iaas) {
        (Some(legacy), Some(Iaas::Aws)) => match legacy.outputs.get(LEGACY_EIP_OUTPUT) {
            Some(ip) => ip.clone(),
            None => stacks
                .describe(&state.aws, &legacy.name)?
                .outputs
                .get(LEGACY_EIP_OUTPUT)
                .cloned()
                .unwrap_or_default(),
        },
        _ => state.infra.output_str("external_ip").unwrap_or_default(),
    };
    if ip.is_empty() {
        return Ok(ip);
    }
    Ok(format!("https://{ip}:25555"))
}

/// Read `property` from state, failing with a precondition error when it is
/// absent or the environment has no bosun-managed director.
pub fn query(state: &State, property: Property, stacks: &dyn StackManager) -> Result<String, CoreError> {
    if state.no_director && !property.available_without_director() {
        return Err(not_managed());
    }
    let value = match property {
        Property::EnvId => state.env_id.to_string(),
        Property::DirectorAddress if state.no_director => external_director_address(state, stacks)?,
        Property::DirectorAddress => state.director.address.clone(),
        Property::DirectorUsername => state.director.username.clone(),
        Property::DirectorPassword => state.director.password.clone(),
        Property::DirectorCaCert => state.director.ca_cert.clone(),
        Property::JumpboxAddress => state.jumpbox.url.clone(),
    };
    non_empty(property.label(), value)
}

/// Private key for reaching the environment: the jumpbox's when one is
/// deployed, otherwise the director keypair.
pub fn ssh_key(state: &State) -> Result<String, CoreError> {
    let key = if state.jumpbox.is_deployed() {
        state
            .jumpbox
            .variables
            .get("jumpbox_ssh")
            .and_then(|ssh| ssh.get("private_key"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    } else {
        state.key_pair.private_key.clone()
    };
    non_empty("ssh key", key)
}

/// Load balancer outputs as `(name, value)` pairs.
pub fn lb_summary(provider: &dyn Provider, state: &State) -> Result<Vec<(String, String)>, CoreError> {
    let Some(lbs) = &state.lbs else {
        return Err(CoreError::Precondition(
            "no load balancers are configured for this environment".to_owned(),
        ));
    };
    Ok(provider
        .lb_outputs(lbs.kind)
        .iter()
        .map(|name| {
            (
                (*name).to_owned(),
                state.infra.output_str(name).unwrap_or_default(),
            )
        })
        .collect())
}

/// Shell environment for targeting the director with the bosh CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintEnv {
    pub client: String,
    pub client_secret: String,
    pub ca_cert: String,
    pub environment: String,
    pub jumpbox: Option<JumpboxAccess>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpboxAccess {
    pub url: String,
    pub private_key: String,
}

impl PrintEnv {
    pub fn from_state(state: &State) -> Result<Self, CoreError> {
        if state.no_director {
            return Err(not_managed());
        }
        let jumpbox = if state.jumpbox.is_deployed() {
            Some(JumpboxAccess {
                url: non_empty("jumpbox address", state.jumpbox.url.clone())?,
                private_key: ssh_key(state)?,
            })
        } else {
            None
        };
        Ok(Self {
            client: non_empty("director username", state.director.username.clone())?,
            client_secret: non_empty("director password", state.director.password.clone())?,
            ca_cert: state.director.ca_cert.clone(),
            environment: non_empty("director address", state.director.address.clone())?,
            jumpbox,
        })
    }

    /// `export` lines. `key_path` is where the jumpbox private key was written.
    pub fn render(&self, key_path: Option<&Path>) -> String {
        let mut out = format!(
            "export BOSH_CLIENT={}\nexport BOSH_CLIENT_SECRET={}\nexport BOSH_CA_CERT='{}'\nexport BOSH_ENVIRONMENT={}\n",
            self.client,
            self.client_secret,
            self.ca_cert.trim_end(),
            self.environment
        );
        if let (Some(jumpbox), Some(path)) = (&self.jumpbox, key_path) {
            out.push_str(&format!(
                "export BOSH_ALL_PROXY=ssh+socks5://jumpbox@{}?private-key={}\n",
                jumpbox.url,
                path.display()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::provider_for;
    use bosun_infra::mock::MockStackManager;
    use bosun_infra::StackDescription;
    use bosun_schema::{LbKind, LegacyStack, LoadBalancers, StackName};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn deployed() -> State {
        let mut state = State::new();
        state.iaas = Some(Iaas::Gcp);
        state.env_id = "bosun-env-q".into();
        state.director.address = "https://203.0.113.10:25555".to_owned();
        state.director.username = "user-abc".to_owned();
        state.director.password = "p-secret".to_owned();
        state.director.ca_cert = "-----BEGIN CERTIFICATE-----\nCA\n-----END CERTIFICATE-----\n".to_owned();
        state
    }

    #[test]
    fn director_properties_read_from_state() {
        let stacks = MockStackManager::new();
        let state = deployed();
        assert_eq!(query(&state, Property::EnvId, &stacks).unwrap(), "bosun-env-q");
        assert_eq!(
            query(&state, Property::DirectorPassword, &stacks).unwrap(),
            "p-secret"
        );
        assert_eq!(
            query(&state, Property::DirectorAddress, &stacks).unwrap(),
            "https://203.0.113.10:25555"
        );
    }

    #[test]
    fn empty_property_names_the_state_dir() {
        let stacks = MockStackManager::new();
        let err = query(&deployed(), Property::JumpboxAddress, &stacks).unwrap_err();
        assert!(err
            .to_string()
            .contains("Could not retrieve jumpbox address, please make sure you are targeting the proper state dir."));
    }

    #[test]
    fn no_director_rejects_director_properties() {
        let stacks = MockStackManager::new();
        let mut state = deployed();
        state.no_director = true;
        let err = query(&state, Property::DirectorUsername, &stacks).unwrap_err();
        assert!(matches!(err, CoreError::Precondition(_)));
        assert!(err.to_string().contains("does not manage this director"));
        assert_eq!(query(&state, Property::EnvId, &stacks).unwrap(), "bosun-env-q");
    }

    #[test]
    fn no_director_address_on_gcp_uses_external_ip() {
        let stacks = MockStackManager::new();
        let mut state = deployed();
        state.no_director = true;
        state.director = Default::default();
        state
            .infra
            .outputs
            .insert("external_ip".to_owned(), json!("198.51.100.4"));
        assert_eq!(
            query(&state, Property::DirectorAddress, &stacks).unwrap(),
            "https://198.51.100.4:25555"
        );
    }

    #[test]
    fn no_director_address_on_legacy_aws_describes_the_stack() {
        let stacks = MockStackManager::new();
        stacks.add_stack(StackDescription {
            name: "stack-q".to_owned(),
            outputs: BTreeMap::from([(LEGACY_EIP_OUTPUT.to_owned(), "192.0.2.9".to_owned())]),
            resources: Vec::new(),
        });
        let mut state = State::new();
        state.iaas = Some(Iaas::Aws);
        state.no_director = true;
        state.legacy_stack = Some(LegacyStack {
            name: StackName::from("stack-q"),
            outputs: BTreeMap::new(),
        });
        assert_eq!(
            query(&state, Property::DirectorAddress, &stacks).unwrap(),
            "https://192.0.2.9:25555"
        );
        assert_eq!(stacks.describe_calls(), 1);
    }

    #[test]
    fn property_parses_from_command_name() {
        assert_eq!(
            "director-ca-cert".parse::<Property>().unwrap(),
            Property::DirectorCaCert
        );
        assert!("bosh-password".parse::<Property>().is_err());
    }

    #[test]
    fn ssh_key_prefers_jumpbox() {
        let mut state = deployed();
        state.key_pair.private_key = "DIRECTOR KEY".to_owned();
        assert_eq!(ssh_key(&state).unwrap(), "DIRECTOR KEY");
        state.jumpbox.deployment_state = json!({ "sha": "1" });
        state.jumpbox.variables.insert(
            "jumpbox_ssh".to_owned(),
            json!({ "private_key": "JUMPBOX KEY" }),
        );
        assert_eq!(ssh_key(&state).unwrap(), "JUMPBOX KEY");
    }

    #[test]
    fn print_env_exports_proxy_for_jumpbox() {
        let mut state = deployed();
        let env = PrintEnv::from_state(&state).unwrap();
        let rendered = env.render(None);
        assert!(rendered.contains("export BOSH_CLIENT=user-abc\n"));
        assert!(rendered.contains("export BOSH_CA_CERT='-----BEGIN CERTIFICATE-----\nCA\n-----END CERTIFICATE-----'\n"));
        assert!(!rendered.contains("BOSH_ALL_PROXY"));

        state.jumpbox.url = "203.0.113.10:22".to_owned();
        state.jumpbox.deployment_state = json!({ "sha": "1" });
        state
            .jumpbox
            .variables
            .insert("jumpbox_ssh".to_owned(), json!({ "private_key": "K" }));
        let env = PrintEnv::from_state(&state).unwrap();
        let rendered = env.render(Some(Path::new("/tmp/env/.bosun-jumpbox.key")));
        assert!(rendered.contains(
            "export BOSH_ALL_PROXY=ssh+socks5://jumpbox@203.0.113.10:22?private-key=/tmp/env/.bosun-jumpbox.key\n"
        ));
    }

    #[test]
    fn lb_summary_lists_configured_outputs() {
        let gcp = provider_for(Iaas::Gcp);
        let mut state = deployed();
        assert!(lb_summary(gcp.as_ref(), &state).is_err());
        state.lbs = Some(LoadBalancers {
            kind: LbKind::Concourse,
            certificate: String::new(),
            private_key: String::new(),
            chain: None,
            domain: None,
        });
        state
            .infra
            .outputs
            .insert("concourse_lb_ip".to_owned(), json!("203.0.113.77"));
        let summary = lb_summary(gcp.as_ref(), &state).unwrap();
        assert!(summary.contains(&("concourse_lb_ip".to_owned(), "203.0.113.77".to_owned())));
    }
}
