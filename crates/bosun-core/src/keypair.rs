use crate::provider::Provider;
use crate::CoreError;
use bosun_infra::{CloudCredentials, KeyGenerator, KeyPairRegistry};
use bosun_schema::{KeyPair, State};
use tracing::{info, warn};

/// Name the keypair is registered under at the IAAS.
pub fn keypair_name(env_id: &str) -> String {
    format!("keypair-{env_id}")
}

/// Creates, reconciles, rotates and deletes the director SSH keypair.
pub struct KeyPairManager<'a> {
    keygen: &'a dyn KeyGenerator,
    registry: &'a dyn KeyPairRegistry,
}

impl<'a> KeyPairManager<'a> {
    pub fn new(keygen: &'a dyn KeyGenerator, registry: &'a dyn KeyPairRegistry) -> Self {
        Self { keygen, registry }
    }

    fn credentials(state: &State) -> Result<CloudCredentials, CoreError> {
        CloudCredentials::from_state(state)
            .ok_or_else(|| CoreError::MissingCredentials(vec!["iaas".to_owned()]))
    }

    fn create(&self, state: &State) -> Result<KeyPair, CoreError> {
        let name = keypair_name(&state.env_id);
        let creds = Self::credentials(state)?;
        let generated = self.keygen.generate(&name)?;
        self.registry.register(&creds, &name, &generated.public_key)?;
        Ok(KeyPair {
            name,
            public_key: generated.public_key,
            private_key: generated.private_key,
        })
    }

    /// The state's keypair if it has one; otherwise a new one, registered with
    /// the IAAS. A registration left behind by an interrupted run has no
    /// private key in state and is replaced.
    pub fn ensure(&self, provider: &dyn Provider, state: &State) -> Result<KeyPair, CoreError> {
        if !state.key_pair.is_empty() || !provider.manages_keypair() {
            return Ok(state.key_pair.clone());
        }
        let name = keypair_name(&state.env_id);
        if self.registry.is_registered(&Self::credentials(state)?, &name)? {
            warn!("keypair {name} is registered but not in state; replacing it");
        }
        let key_pair = self.create(state)?;
        info!("created keypair {}", key_pair.name);
        Ok(key_pair)
    }

    /// Always generate a fresh keypair and replace the remote registration.
    pub fn rotate(&self, provider: &dyn Provider, state: &State) -> Result<KeyPair, CoreError> {
        if !provider.manages_keypair() {
            return Err(CoreError::Precondition(format!(
                "{} environments have no keypair to rotate",
                provider.iaas()
            )));
        }
        let key_pair = self.create(state)?;
        info!("rotated keypair {}", key_pair.name);
        Ok(key_pair)
    }

    pub fn delete(&self, provider: &dyn Provider, state: &State) -> Result<(), CoreError> {
        if state.key_pair.is_empty() || !provider.manages_keypair() {
            return Ok(());
        }
        let name = if state.key_pair.name.is_empty() {
            keypair_name(&state.env_id)
        } else {
            state.key_pair.name.clone()
        };
        self.registry.deregister(&Self::credentials(state)?, &name)?;
        info!("deleted keypair {name}");
        Ok(())
    }
}
