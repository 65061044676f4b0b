use crate::applier::Applier;
use crate::bosh::BoshCli;
use crate::deployer::DirectorDeployer;
use crate::director::{DirectorClientFactory, HttpDirectorClientFactory};
use crate::keypair::{CliKeyPairRegistry, KeyGenerator, KeyPairRegistry, SshKeygen};
use crate::mock::{MockApplier, MockDeployer, MockDirectorClients, MockKeys, MockStackManager};
use crate::stack::{CloudFormationCli, StackManager};
use crate::terraform::TerraformCli;
use crate::InfraError;
use bosun_schema::ToolConfig;

/// One implementation of every external collaborator the pipeline drives.
pub struct Toolchain {
    pub name: String,
    pub applier: Box<dyn Applier>,
    pub stacks: Box<dyn StackManager>,
    pub deployer: Box<dyn DirectorDeployer>,
    pub directors: Box<dyn DirectorClientFactory>,
    pub keygen: Box<dyn KeyGenerator>,
    pub registry: Box<dyn KeyPairRegistry>,
}

/// Handles onto the mocks inside a mock toolchain, for assertions.
#[derive(Clone, Default)]
pub struct MockHandles {
    pub applier: MockApplier,
    pub stacks: MockStackManager,
    pub deployer: MockDeployer,
    pub directors: MockDirectorClients,
    pub keys: MockKeys,
}

impl Toolchain {
    /// Real tools named in `tools`. With `stream`, tool output is echoed live.
    pub fn cli(tools: &ToolConfig, stream: bool) -> Self {
        Self {
            name: "cli".to_owned(),
            applier: Box::new(TerraformCli::new(&tools.terraform, stream)),
            stacks: Box::new(CloudFormationCli::new(&tools.aws, stream)),
            deployer: Box::new(BoshCli::new(
                &tools.bosh,
                tools.bosh_deployment_dir.clone(),
                tools.jumpbox_deployment_dir.clone(),
                stream,
            )),
            directors: Box::new(HttpDirectorClientFactory),
            keygen: Box::new(SshKeygen::new(&tools.ssh_keygen)),
            registry: Box::new(CliKeyPairRegistry::new(&tools.aws, &tools.gcloud)),
        }
    }

    pub fn mock() -> (Self, MockHandles) {
        let handles = MockHandles::default();
        let toolchain = Self {
            name: "mock".to_owned(),
            applier: Box::new(handles.applier.clone()),
            stacks: Box::new(handles.stacks.clone()),
            deployer: Box::new(handles.deployer.clone()),
            directors: Box::new(handles.directors.clone()),
            keygen: Box::new(handles.keys.clone()),
            registry: Box::new(handles.keys.clone()),
        };
        (toolchain, handles)
    }
}

pub fn select_toolchain(name: &str, tools: &ToolConfig, stream: bool) -> Result<Toolchain, InfraError> {
    match name {
        "cli" => Ok(Toolchain::cli(tools, stream)),
        "mock" => Ok(Toolchain::mock().0),
        other => Err(InfraError::ToolchainUnavailable(other.to_owned())),
    }
}
