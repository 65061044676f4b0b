use bosun_schema::{Iaas, ToolConfig};
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the external tools needed to provision `iaas`.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(iaas: Iaas, tools: &ToolConfig, with_director: bool) -> Vec<MissingPrereq> {
    let mut wanted: Vec<(&str, &'static str, &'static str)> = vec![(
        tools.terraform.as_str(),
        "declarative infrastructure",
        "https://developer.hashicorp.com/terraform/install",
    )];
    if with_director {
        wanted.push((
            tools.bosh.as_str(),
            "director deployment (create-env)",
            "https://bosh.io/docs/cli-v2-install/",
        ));
    }
    match iaas {
        Iaas::Aws => {
            wanted.push((
                tools.aws.as_str(),
                "keypair registration and legacy stacks",
                "https://aws.amazon.com/cli/",
            ));
            wanted.push((
                tools.ssh_keygen.as_str(),
                "director SSH keypair",
                "part of openssh (apt install openssh-client | dnf install openssh-clients)",
            ));
        }
        Iaas::Gcp => {
            wanted.push((
                tools.gcloud.as_str(),
                "project SSH key metadata",
                "https://cloud.google.com/sdk/docs/install",
            ));
            wanted.push((
                tools.ssh_keygen.as_str(),
                "director SSH keypair",
                "part of openssh (apt install openssh-client | dnf install openssh-clients)",
            ));
        }
        Iaas::Azure => {}
    }

    wanted
        .into_iter()
        .filter(|(name, _, _)| !command_exists(name))
        .map(|(name, purpose, install_hint)| MissingPrereq {
            name: name.to_owned(),
            purpose,
            install_hint,
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nbosun drives these tools to provision the environment.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "terraform".to_owned(),
            purpose: "declarative infrastructure",
            install_hint: "see hashicorp.com",
        };
        let s = format!("{m}");
        assert!(s.contains("terraform"));
        assert!(s.contains("declarative infrastructure"));
        assert!(s.contains("hashicorp"));
    }

    #[test]
    fn nonexistent_tools_are_reported() {
        let tools = ToolConfig {
            terraform: "/nonexistent/terraform".to_owned(),
            bosh: "/nonexistent/bosh".to_owned(),
            gcloud: "/nonexistent/gcloud".to_owned(),
            ssh_keygen: "/nonexistent/ssh-keygen".to_owned(),
            ..ToolConfig::default()
        };
        let missing = check_prereqs(Iaas::Gcp, &tools, true);
        let names: Vec<_> = missing.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "/nonexistent/terraform",
                "/nonexistent/bosh",
                "/nonexistent/gcloud",
                "/nonexistent/ssh-keygen"
            ]
        );

        let no_director = check_prereqs(Iaas::Azure, &tools, false);
        assert_eq!(no_director.len(), 1);
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![MissingPrereq {
            name: "bosh".to_owned(),
            purpose: "director deployment",
            install_hint: "bosh.io",
        }];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("bosh"));
    }
}
