use crate::process::run_tool;
use crate::InfraError;
use bosun_schema::{AwsCredentials, AzureCredentials, GcpCredentials, Iaas, State};
use serde_json::Value;
use std::fs;
use std::process::Command;
use tracing::{debug, info};

/// Login user the GCP project metadata key is installed for.
const GCP_SSH_USER: &str = "vcap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub public_key: String,
    pub private_key: String,
}

pub trait KeyGenerator: Send + Sync {
    /// Generate a fresh RSA keypair. `comment` is embedded in the public key.
    fn generate(&self, comment: &str) -> Result<GeneratedKey, InfraError>;
}

/// The credential block for the selected IAAS.
#[derive(Debug, Clone)]
pub enum CloudCredentials {
    Aws(AwsCredentials),
    Gcp(GcpCredentials),
    Azure(AzureCredentials),
}

impl CloudCredentials {
    pub fn from_state(state: &State) -> Option<Self> {
        Some(match state.iaas? {
            Iaas::Aws => CloudCredentials::Aws(state.aws.clone()),
            Iaas::Gcp => CloudCredentials::Gcp(state.gcp.clone()),
            Iaas::Azure => CloudCredentials::Azure(state.azure.clone()),
        })
    }
}

/// Remote side of a keypair: where the IAAS learns the public key.
pub trait KeyPairRegistry: Send + Sync {
    fn is_registered(&self, creds: &CloudCredentials, name: &str) -> Result<bool, InfraError>;
    /// Register `public_key` under `name`, replacing any existing registration.
    fn register(
        &self,
        creds: &CloudCredentials,
        name: &str,
        public_key: &str,
    ) -> Result<(), InfraError>;
    fn deregister(&self, creds: &CloudCredentials, name: &str) -> Result<(), InfraError>;
}

/// `ssh-keygen` based generator.
pub struct SshKeygen {
    binary: String,
}

impl SshKeygen {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl KeyGenerator for SshKeygen {
    fn generate(&self, comment: &str) -> Result<GeneratedKey, InfraError> {
        let dir = tempfile::Builder::new().prefix("bosun-key-").tempdir()?;
        let key_path = dir.path().join("id_rsa");
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-q", "-t", "rsa", "-b", "4096", "-m", "PEM", "-N", "", "-C", comment, "-f"])
            .arg(&key_path);
        run_tool(cmd, false)?.check("ssh-keygen")?;
        Ok(GeneratedKey {
            public_key: fs::read_to_string(key_path.with_extension("pub"))?
                .trim()
                .to_owned(),
            private_key: fs::read_to_string(&key_path)?,
        })
    }
}

/// Registry driving the `aws` and `gcloud` CLIs.
pub struct CliKeyPairRegistry {
    aws: String,
    gcloud: String,
}

impl CliKeyPairRegistry {
    pub fn new(aws: impl Into<String>, gcloud: impl Into<String>) -> Self {
        Self {
            aws: aws.into(),
            gcloud: gcloud.into(),
        }
    }

    fn aws_command(&self, creds: &AwsCredentials) -> Command {
        let mut cmd = Command::new(&self.aws);
        cmd.env("AWS_ACCESS_KEY_ID", &creds.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key)
            .env("AWS_DEFAULT_REGION", &creds.region);
        cmd
    }

    /// Run gcloud against the project with the service account key supplied
    /// through a credential file override.
    fn gcloud(&self, creds: &GcpCredentials, args: &[&str], tool: &str) -> Result<String, InfraError> {
        let dir = tempfile::Builder::new().prefix("bosun-gcloud-").tempdir()?;
        let key_path = dir.path().join("service-account.json");
        fs::write(&key_path, &creds.service_account_key)?;
        let mut cmd = Command::new(&self.gcloud);
        cmd.args(args)
            .args(["--project", &creds.project_id, "--quiet"])
            .env("CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE", &key_path);
        Ok(run_tool(cmd, false)?.check(tool)?.stdout)
    }

    fn gcp_ssh_keys(&self, creds: &GcpCredentials) -> Result<Vec<String>, InfraError> {
        let json = self.gcloud(
            creds,
            &["compute", "project-info", "describe", "--format", "json"],
            "gcloud compute project-info describe",
        )?;
        parse_gcp_ssh_keys(&json)
    }

    fn set_gcp_ssh_keys(&self, creds: &GcpCredentials, keys: &[String]) -> Result<(), InfraError> {
        let dir = tempfile::Builder::new().prefix("bosun-ssh-keys-").tempdir()?;
        let path = dir.path().join("ssh-keys");
        fs::write(&path, keys.join("\n"))?;
        let arg = format!("ssh-keys={}", path.display());
        self.gcloud(
            creds,
            &[
                "compute",
                "project-info",
                "add-metadata",
                "--metadata-from-file",
                &arg,
            ],
            "gcloud compute project-info add-metadata",
        )?;
        Ok(())
    }
}

/// The `ssh-keys` project metadata entries, one per line.
pub fn parse_gcp_ssh_keys(project_info: &str) -> Result<Vec<String>, InfraError> {
    let doc: Value =
        serde_json::from_str(project_info).map_err(|e| InfraError::parse("project info", e))?;
    let items = doc
        .pointer("/commonInstanceMetadata/items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    Ok(items
        .iter()
        .filter(|item| item.get("key").and_then(Value::as_str) == Some("ssh-keys"))
        .filter_map(|item| item.get("value").and_then(Value::as_str))
        .flat_map(str::lines)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_owned)
        .collect())
}

/// A metadata entry belongs to `name` when the key comment matches.
fn gcp_entry_matches(entry: &str, name: &str) -> bool {
    entry.split_whitespace().last() == Some(name)
}

impl KeyPairRegistry for CliKeyPairRegistry {
    fn is_registered(&self, creds: &CloudCredentials, name: &str) -> Result<bool, InfraError> {
        match creds {
            CloudCredentials::Aws(aws) => {
                let mut cmd = self.aws_command(aws);
                cmd.args(["ec2", "describe-key-pairs", "--key-names", name, "--output", "json"]);
                let run = run_tool(cmd, false)?;
                if run.stderr.contains("InvalidKeyPair.NotFound") {
                    return Ok(false);
                }
                run.check("aws ec2 describe-key-pairs")?;
                Ok(true)
            }
            CloudCredentials::Gcp(gcp) => Ok(self
                .gcp_ssh_keys(gcp)?
                .iter()
                .any(|entry| gcp_entry_matches(entry, name))),
            CloudCredentials::Azure(_) => Err(InfraError::Unsupported(
                "azure has no keypair registry".to_owned(),
            )),
        }
    }

    fn register(
        &self,
        creds: &CloudCredentials,
        name: &str,
        public_key: &str,
    ) -> Result<(), InfraError> {
        match creds {
            CloudCredentials::Aws(aws) => {
                if self.is_registered(creds, name)? {
                    debug!("replacing existing aws keypair {name}");
                    self.deregister(creds, name)?;
                }
                let dir = tempfile::Builder::new().prefix("bosun-pub-").tempdir()?;
                let path = dir.path().join("key.pub");
                fs::write(&path, public_key)?;
                let material = format!("fileb://{}", path.display());
                let mut cmd = self.aws_command(aws);
                cmd.args([
                    "ec2",
                    "import-key-pair",
                    "--key-name",
                    name,
                    "--public-key-material",
                    &material,
                ]);
                run_tool(cmd, false)?.check("aws ec2 import-key-pair")?;
                info!("registered aws keypair {name}");
                Ok(())
            }
            CloudCredentials::Gcp(gcp) => {
                let mut keys: Vec<String> = self
                    .gcp_ssh_keys(gcp)?
                    .into_iter()
                    .filter(|entry| !gcp_entry_matches(entry, name))
                    .collect();
                keys.push(format!("{GCP_SSH_USER}:{}", with_comment(public_key, name)));
                self.set_gcp_ssh_keys(gcp, &keys)?;
                info!("registered gcp project ssh key {name}");
                Ok(())
            }
            CloudCredentials::Azure(_) => Err(InfraError::Unsupported(
                "azure has no keypair registry".to_owned(),
            )),
        }
    }

    fn deregister(&self, creds: &CloudCredentials, name: &str) -> Result<(), InfraError> {
        match creds {
            CloudCredentials::Aws(aws) => {
                let mut cmd = self.aws_command(aws);
                cmd.args(["ec2", "delete-key-pair", "--key-name", name]);
                run_tool(cmd, false)?.check("aws ec2 delete-key-pair")?;
                Ok(())
            }
            CloudCredentials::Gcp(gcp) => {
                let existing = self.gcp_ssh_keys(gcp)?;
                let kept: Vec<String> = existing
                    .iter()
                    .filter(|entry| !gcp_entry_matches(entry, name))
                    .cloned()
                    .collect();
                if kept.len() != existing.len() {
                    self.set_gcp_ssh_keys(gcp, &kept)?;
                }
                Ok(())
            }
            CloudCredentials::Azure(_) => Ok(()),
        }
    }
}

/// Replace the comment of an OpenSSH public key with `name`.
fn with_comment(public_key: &str, name: &str) -> String {
    let mut parts = public_key.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(kind), Some(body)) => format!("{kind} {body} {name}"),
        _ => format!("{} {name}", public_key.trim()),
    }
}
