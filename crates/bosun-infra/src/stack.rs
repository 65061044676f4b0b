use crate::process::run_tool;
use crate::InfraError;
use bosun_schema::AwsCredentials;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Command;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: String,
    pub resource_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub name: String,
    pub outputs: BTreeMap<String, String>,
    pub resources: Vec<StackResource>,
}

/// CloudFormation-like stack backend. Only used for environments that have
/// not been migrated to the declarative applier.
pub trait StackManager: Send + Sync {
    fn describe(&self, creds: &AwsCredentials, name: &str) -> Result<StackDescription, InfraError>;
    fn delete(&self, creds: &AwsCredentials, name: &str) -> Result<(), InfraError>;
}

/// Stack manager driving `aws cloudformation`.
pub struct CloudFormationCli {
    binary: String,
    stream: bool,
}

impl CloudFormationCli {
    pub fn new(binary: impl Into<String>, stream: bool) -> Self {
        Self {
            binary: binary.into(),
            stream,
        }
    }

    fn aws(&self, creds: &AwsCredentials, args: &[&str], tool: &str) -> Result<String, InfraError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .args(["--output", "json"])
            .env("AWS_ACCESS_KEY_ID", &creds.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key)
            .env("AWS_DEFAULT_REGION", &creds.region);
        let run = run_tool(cmd, self.stream)?;
        if run.code() != Some(0) && run.stderr.contains("does not exist") {
            return Err(InfraError::NotFound(format!("stack: {}", run.diagnostic())));
        }
        Ok(run.check(tool)?.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacks {
    #[serde(default)]
    stacks: Vec<StackJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackJson {
    stack_name: String,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputJson {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackResources {
    #[serde(default)]
    stack_resources: Vec<ResourceJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceJson {
    logical_resource_id: String,
    #[serde(default)]
    physical_resource_id: String,
    resource_type: String,
}

/// Combine `describe-stacks` and `describe-stack-resources` JSON.
pub fn parse_stack(stacks_json: &str, resources_json: &str) -> Result<StackDescription, InfraError> {
    let stacks: DescribeStacks =
        serde_json::from_str(stacks_json).map_err(|e| InfraError::parse("describe-stacks", e))?;
    let stack = stacks
        .stacks
        .into_iter()
        .next()
        .ok_or_else(|| InfraError::NotFound("stack".to_owned()))?;
    let resources: DescribeStackResources = serde_json::from_str(resources_json)
        .map_err(|e| InfraError::parse("describe-stack-resources", e))?;

    Ok(StackDescription {
        name: stack.stack_name,
        outputs: stack
            .outputs
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect(),
        resources: resources
            .stack_resources
            .into_iter()
            .map(|r| StackResource {
                logical_id: r.logical_resource_id,
                physical_id: r.physical_resource_id,
                resource_type: r.resource_type,
            })
            .collect(),
    })
}

impl StackManager for CloudFormationCli {
    fn describe(&self, creds: &AwsCredentials, name: &str) -> Result<StackDescription, InfraError> {
        let stacks = self.aws(
            creds,
            &["cloudformation", "describe-stacks", "--stack-name", name],
            "aws cloudformation describe-stacks",
        )?;
        let resources = self.aws(
            creds,
            &["cloudformation", "describe-stack-resources", "--stack-name", name],
            "aws cloudformation describe-stack-resources",
        )?;
        parse_stack(&stacks, &resources)
    }

    fn delete(&self, creds: &AwsCredentials, name: &str) -> Result<(), InfraError> {
        info!("deleting stack {name}");
        self.aws(
            creds,
            &["cloudformation", "delete-stack", "--stack-name", name],
            "aws cloudformation delete-stack",
        )?;
        self.aws(
            creds,
            &["cloudformation", "wait", "stack-delete-complete", "--stack-name", name],
            "aws cloudformation wait",
        )?;
        Ok(())
    }
}
