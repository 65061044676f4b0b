//! External collaborators driven by the bosun pipeline.
//!
//! Every tool the pipeline touches sits behind a narrow trait: the declarative
//! `Applier` (terraform), the legacy `StackManager` (CloudFormation through the
//! aws CLI), the `DirectorDeployer` (bosh create-env), the director API
//! (`DirectorClient`), and SSH keypair generation and registration. Each trait
//! has a subprocess or HTTP implementation and a recording mock; a `Toolchain`
//! bundles one of each, selected by name.

pub mod applier;
pub mod bosh;
pub mod deployer;
pub mod director;
pub mod keypair;
pub mod mock;
pub mod prereq;
pub mod process;
pub mod stack;
pub mod terraform;
pub mod toolchain;

pub use applier::{
    parse_outputs, ApplyFailure, ApplyInput, Applier, ImportBinding, PlanSummary,
};
pub use deployer::{
    DeployFailure, DeployInput, DeployOutput, DeploymentKind, DirectorDeployer, SslKeyPair,
};
pub use director::{DirectorClient, DirectorClientFactory, DirectorEndpoint};
pub use keypair::{CloudCredentials, GeneratedKey, KeyGenerator, KeyPairRegistry};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};
pub use process::{install_signal_handler, shutdown_requested};
pub use stack::{StackDescription, StackManager, StackResource};
pub use toolchain::{select_toolchain, MockHandles, Toolchain};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("tool I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("{0} interrupted")]
    Interrupted(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },
    #[error("director API error: {0}")]
    Http(String),
    #[error("toolchain '{0}' is not available")]
    ToolchainUnavailable(String),
    #[error("{0} is not configured")]
    NotConfigured(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InfraError {
    pub(crate) fn parse(what: &str, reason: impl std::fmt::Display) -> Self {
        InfraError::Parse {
            what: what.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Captured tool output, if this error came from a failed tool run.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            InfraError::ToolFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
