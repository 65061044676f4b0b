use super::{lb_vars, lookup_zones, vm_types, Provider, Vars};
use crate::cloud_config::{
    ephemeral_disk_extensions, numbered_azs, Cidr, CloudConfig, Network, VmExtension,
    NETWORK_NAME,
};
use crate::keypair::keypair_name;
use crate::outputs::Outputs;
use crate::CoreError;
use bosun_schema::{Iaas, LbKind, State};
use serde_json::json;

const TEMPLATE: &str = include_str!("../../templates/aws.tf");
const LB_COMMON: &str = include_str!("../../templates/aws_lb_common.tf");
const CF_LB: &str = include_str!("../../templates/aws_lb_cf.tf");
const CONCOURSE_LB: &str = include_str!("../../templates/aws_lb_concourse.tf");

const ZONES: &[(&str, &[&str])] = &[
    (
        "us-east-1",
        &[
            "us-east-1a",
            "us-east-1b",
            "us-east-1c",
            "us-east-1d",
            "us-east-1e",
            "us-east-1f",
        ],
    ),
    ("us-east-2", &["us-east-2a", "us-east-2b", "us-east-2c"]),
    ("us-west-1", &["us-west-1b", "us-west-1c"]),
    (
        "us-west-2",
        &["us-west-2a", "us-west-2b", "us-west-2c", "us-west-2d"],
    ),
    ("ca-central-1", &["ca-central-1a", "ca-central-1b", "ca-central-1d"]),
    ("eu-west-1", &["eu-west-1a", "eu-west-1b", "eu-west-1c"]),
    ("eu-west-2", &["eu-west-2a", "eu-west-2b", "eu-west-2c"]),
    ("eu-central-1", &["eu-central-1a", "eu-central-1b", "eu-central-1c"]),
    ("ap-south-1", &["ap-south-1a", "ap-south-1b", "ap-south-1c"]),
    (
        "ap-southeast-1",
        &["ap-southeast-1a", "ap-southeast-1b", "ap-southeast-1c"],
    ),
    (
        "ap-southeast-2",
        &["ap-southeast-2a", "ap-southeast-2b", "ap-southeast-2c"],
    ),
    (
        "ap-northeast-1",
        &["ap-northeast-1a", "ap-northeast-1c", "ap-northeast-1d"],
    ),
    ("sa-east-1", &["sa-east-1a", "sa-east-1b", "sa-east-1c"]),
];

const INSTANCE_TYPES: &[(&str, &str)] = &[
    ("default", "m4.large"),
    ("minimal", "m3.medium"),
    ("sharedcpu", "t2.small"),
    ("small", "m4.large"),
    ("medium", "m4.xlarge"),
    ("large", "m4.2xlarge"),
    ("small-highmem", "r4.xlarge"),
];

const REQUIRED: &[&str] = &[
    "external_ip",
    "director_address",
    "vpc_id",
    "bosh_subnet_id",
    "bosh_subnet_availability_zone",
    "bosh_security_group",
    "internal_security_group",
    "internal_subnet_ids",
    "internal_subnet_cidrs",
];
const CF_OUTPUTS: &[&str] = &[
    "cf_router_lb_name",
    "cf_router_lb_url",
    "cf_router_lb_internal_security_group",
    "cf_ssh_lb_name",
    "cf_ssh_lb_url",
    "cf_ssh_lb_internal_security_group",
];
const CONCOURSE_OUTPUTS: &[&str] = &[
    "concourse_lb_name",
    "concourse_lb_url",
    "concourse_lb_internal_security_group",
];

/// Output of the legacy CloudFormation stack carrying the director's elastic IP.
pub const LEGACY_EIP_OUTPUT: &str = "BOSHEIP";

pub struct AwsProvider;

impl AwsProvider {
    fn elb_extension(
        name: &str,
        outputs: &Outputs<'_>,
        elb: &str,
        security_group: &str,
    ) -> Result<VmExtension, CoreError> {
        Ok(VmExtension {
            name: name.to_owned(),
            cloud_properties: json!({
                "elbs": [outputs.require(elb)?],
                "security_groups": [
                    outputs.require(security_group)?,
                    outputs.require("internal_security_group")?,
                ],
            }),
        })
    }

    fn lb_extensions(kind: LbKind, outputs: &Outputs<'_>) -> Result<Vec<VmExtension>, CoreError> {
        Ok(match kind {
            LbKind::Cf => vec![
                Self::elb_extension(
                    "cf-router-network-properties",
                    outputs,
                    "cf_router_lb_name",
                    "cf_router_lb_internal_security_group",
                )?,
                Self::elb_extension(
                    "diego-ssh-proxy-network-properties",
                    outputs,
                    "cf_ssh_lb_name",
                    "cf_ssh_lb_internal_security_group",
                )?,
            ],
            LbKind::Concourse => vec![Self::elb_extension(
                "lb",
                outputs,
                "concourse_lb_name",
                "concourse_lb_internal_security_group",
            )?],
        })
    }
}

impl Provider for AwsProvider {
    fn iaas(&self) -> Iaas {
        Iaas::Aws
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>, CoreError> {
        lookup_zones(Iaas::Aws, ZONES, region)
    }

    fn manages_keypair(&self) -> bool {
        true
    }

    fn supports_lbs(&self) -> bool {
        true
    }

    fn template(&self, lbs: Option<LbKind>) -> String {
        match lbs {
            None => TEMPLATE.to_owned(),
            Some(LbKind::Cf) => format!("{TEMPLATE}\n{LB_COMMON}\n{CF_LB}"),
            Some(LbKind::Concourse) => format!("{TEMPLATE}\n{LB_COMMON}\n{CONCOURSE_LB}"),
        }
    }

    fn template_vars(&self, state: &State) -> Result<Vars, CoreError> {
        let zones = self.availability_zones(&state.aws.region)?;
        let key_name = if state.key_pair.name.is_empty() {
            keypair_name(&state.env_id)
        } else {
            state.key_pair.name.clone()
        };
        let mut vars = Vars::from([
            ("env_id".to_owned(), json!(state.env_id.as_str())),
            ("access_key".to_owned(), json!(state.aws.access_key_id)),
            ("secret_key".to_owned(), json!(state.aws.secret_access_key)),
            ("region".to_owned(), json!(state.aws.region)),
            ("ssh_key_name".to_owned(), json!(key_name)),
            ("bosh_availability_zone".to_owned(), json!(zones[0])),
            ("availability_zones".to_owned(), json!(zones)),
        ]);
        if let Some(lbs) = &state.lbs {
            vars.extend(lb_vars(lbs, true));
        }
        Ok(vars)
    }

    fn required_outputs(&self) -> &'static [&'static str] {
        REQUIRED
    }

    fn lb_outputs(&self, kind: LbKind) -> &'static [&'static str] {
        match kind {
            LbKind::Cf => CF_OUTPUTS,
            LbKind::Concourse => CONCOURSE_OUTPUTS,
        }
    }

    fn cpi_vars(&self, state: &State, outputs: &Outputs<'_>) -> Result<Vars, CoreError> {
        Ok(Vars::from([
            ("access_key_id".to_owned(), json!(state.aws.access_key_id)),
            (
                "secret_access_key".to_owned(),
                json!(state.aws.secret_access_key),
            ),
            ("region".to_owned(), json!(state.aws.region)),
            (
                "az".to_owned(),
                json!(outputs.require("bosh_subnet_availability_zone")?),
            ),
            ("subnet_id".to_owned(), json!(outputs.require("bosh_subnet_id")?)),
            (
                "default_security_groups".to_owned(),
                json!([outputs.require("bosh_security_group")?]),
            ),
            ("default_key_name".to_owned(), json!(state.key_pair.name)),
            ("private_key".to_owned(), json!(state.key_pair.private_key)),
        ]))
    }

    fn cloud_config(&self, state: &State, outputs: &Outputs<'_>) -> Result<CloudConfig, CoreError> {
        let zones = self.availability_zones(&state.aws.region)?;
        let subnet_ids = outputs.list("internal_subnet_ids")?;
        let subnet_cidrs = outputs.list("internal_subnet_cidrs")?;
        let internal_group = outputs.require("internal_security_group")?;

        // One internal subnet per zone; extra zones without a subnet are dropped.
        let usable = zones.len().min(subnet_ids.len()).min(subnet_cidrs.len());
        let azs = numbered_azs(&zones[..usable], |zone| json!({ "availability_zone": zone }));
        let subnets = azs
            .iter()
            .zip(subnet_ids.iter().zip(&subnet_cidrs))
            .map(|(az, (id, cidr))| {
                Cidr::parse(cidr)?.subnet(
                    2,
                    63,
                    vec![az.name.clone()],
                    json!({ "subnet": id, "security_groups": [internal_group] }),
                )
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let mut extensions = ephemeral_disk_extensions(|gb| {
            json!({ "ephemeral_disk": { "size": gb * 1024, "type": "gp2" } })
        });
        if let Some(lbs) = &state.lbs {
            extensions.extend(Self::lb_extensions(lbs.kind, outputs)?);
        }

        Ok(CloudConfig::assemble(
            azs,
            vm_types(INSTANCE_TYPES, |instance| {
                json!({
                    "instance_type": instance,
                    "ephemeral_disk": { "size": 10240, "type": "gp2" },
                })
            }),
            &json!({ "type": "gp2" }),
            vec![Network {
                name: NETWORK_NAME.to_owned(),
                kind: "manual".to_owned(),
                subnets,
            }],
            extensions,
        ))
    }
}
