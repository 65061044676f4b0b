use super::{lb_vars, lookup_zones, vm_types, Provider, Vars};
use crate::cloud_config::{
    ephemeral_disk_extensions, numbered_azs, sized, Cidr, CloudConfig, Network, VmExtension,
    NETWORK_NAME,
};
use crate::outputs::Outputs;
use crate::CoreError;
use bosun_schema::{Iaas, LbKind, State};
use serde_json::{json, Value};

const TEMPLATE: &str = include_str!("../../templates/gcp.tf");
const CF_LB: &str = include_str!("../../templates/gcp_lb_cf.tf");
const CONCOURSE_LB: &str = include_str!("../../templates/gcp_lb_concourse.tf");

const SUBNET_CIDR: &str = "10.0.0.0/16";

const ZONES: &[(&str, &[&str])] = &[
    ("us-west1", &["us-west1-a", "us-west1-b"]),
    (
        "us-central1",
        &["us-central1-a", "us-central1-b", "us-central1-c", "us-central1-f"],
    ),
    ("us-east1", &["us-east1-b", "us-east1-c", "us-east1-d"]),
    (
        "europe-west1",
        &["europe-west1-b", "europe-west1-c", "europe-west1-d"],
    ),
    ("asia-east1", &["asia-east1-a", "asia-east1-b", "asia-east1-c"]),
    (
        "asia-northeast1",
        &["asia-northeast1-a", "asia-northeast1-b", "asia-northeast1-c"],
    ),
];

const MACHINE_TYPES: &[(&str, &str)] = &[
    ("default", "n1-standard-1"),
    ("minimal", "g1-small"),
    ("sharedcpu", "g1-small"),
    ("small", "n1-standard-1"),
    ("medium", "n1-standard-2"),
    ("large", "n1-standard-4"),
    ("small-highmem", "n1-highmem-2"),
];

const REQUIRED: &[&str] = &[
    "external_ip",
    "network_name",
    "subnetwork_name",
    "bosh_open_tag_name",
    "internal_tag_name",
    "director_address",
];
const CF_OUTPUTS: &[&str] = &[
    "router_backend_service",
    "router_lb_ip",
    "ssh_proxy_target_pool",
    "ssh_proxy_lb_ip",
    "tcp_router_target_pool",
    "tcp_router_lb_ip",
];
const CONCOURSE_OUTPUTS: &[&str] = &["concourse_target_pool", "concourse_lb_ip"];

pub struct GcpProvider;

impl GcpProvider {
    fn lb_extensions(kind: LbKind, outputs: &Outputs<'_>) -> Result<Vec<VmExtension>, CoreError> {
        let target_pool = |pool: &str| -> Result<Value, CoreError> {
            let name = outputs.require(pool)?;
            Ok(json!({ "target_pool": name, "tags": [name] }))
        };
        Ok(match kind {
            LbKind::Cf => {
                let backend = outputs.require("router_backend_service")?;
                vec![
                    VmExtension {
                        name: "cf-router-network-properties".to_owned(),
                        cloud_properties: json!({
                            "backend_service": backend,
                            "tags": [backend],
                        }),
                    },
                    VmExtension {
                        name: "diego-ssh-proxy-network-properties".to_owned(),
                        cloud_properties: target_pool("ssh_proxy_target_pool")?,
                    },
                    VmExtension {
                        name: "cf-tcp-router-network-properties".to_owned(),
                        cloud_properties: target_pool("tcp_router_target_pool")?,
                    },
                ]
            }
            LbKind::Concourse => vec![VmExtension {
                name: "lb".to_owned(),
                cloud_properties: json!({
                    "target_pool": outputs.require("concourse_target_pool")?,
                    "tags": ["concourse"],
                }),
            }],
        })
    }
}

impl Provider for GcpProvider {
    fn iaas(&self) -> Iaas {
        Iaas::Gcp
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>, CoreError> {
        lookup_zones(Iaas::Gcp, ZONES, region)
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
            Some(LbKind::Cf) => format!("{TEMPLATE}\n{CF_LB}"),
            Some(LbKind::Concourse) => format!("{TEMPLATE}\n{CONCOURSE_LB}"),
        }
    }

    fn template_vars(&self, state: &State) -> Result<Vars, CoreError> {
        let mut vars = Vars::from([
            ("env_id".to_owned(), json!(state.env_id.as_str())),
            ("project_id".to_owned(), json!(state.gcp.project_id)),
            ("region".to_owned(), json!(state.gcp.region)),
            ("zone".to_owned(), json!(state.gcp.zone)),
        ]);
        if let Some(lbs) = &state.lbs {
            if lbs.kind == LbKind::Cf {
                vars.extend(lb_vars(lbs, false));
                vars.insert(
                    "zones".to_owned(),
                    json!(self.availability_zones(&state.gcp.region)?),
                );
            }
        }
        Ok(vars)
    }

    fn applier_credentials(&self, state: &State) -> Option<String> {
        Some(state.gcp.service_account_key.clone())
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
        let mut tags = vec![
            outputs.require("bosh_open_tag_name")?,
            outputs.require("internal_tag_name")?,
        ];
        if let Some(director_tag) = outputs.get("bosh_director_tag_name") {
            tags.push(director_tag);
        }
        Ok(Vars::from([
            ("zone".to_owned(), json!(state.gcp.zone)),
            ("network".to_owned(), json!(outputs.require("network_name")?)),
            (
                "subnetwork".to_owned(),
                json!(outputs.require("subnetwork_name")?),
            ),
            ("tags".to_owned(), json!(tags)),
            ("project_id".to_owned(), json!(state.gcp.project_id)),
            (
                "gcp_credentials_json".to_owned(),
                json!(state.gcp.service_account_key),
            ),
        ]))
    }

    fn cloud_config(&self, state: &State, outputs: &Outputs<'_>) -> Result<CloudConfig, CoreError> {
        let zones = self.availability_zones(&state.gcp.region)?;
        let azs = numbered_azs(&zones, |zone| json!({ "zone": zone }));
        let az_names = azs.iter().map(|az| az.name.clone()).collect();

        let subnet = Cidr::parse(SUBNET_CIDR)?.subnet(
            254,
            64,
            az_names,
            json!({
                "ephemeral_external_ip": true,
                "network_name": outputs.require("network_name")?,
                "subnetwork_name": outputs.require("subnetwork_name")?,
                "tags": [outputs.require("internal_tag_name")?],
            }),
        )?;

        let mut extensions = ephemeral_disk_extensions(|gb| sized("root_disk_size_gb", gb));
        if let Some(lbs) = &state.lbs {
            extensions.extend(Self::lb_extensions(lbs.kind, outputs)?);
        }

        Ok(CloudConfig::assemble(
            azs,
            vm_types(MACHINE_TYPES, |machine| {
                json!({
                    "machine_type": machine,
                    "root_disk_size_gb": 20,
                    "root_disk_type": "pd-ssd",
                })
            }),
            &json!({ "type": "pd-ssd" }),
            vec![Network {
                name: NETWORK_NAME.to_owned(),
                kind: "manual".to_owned(),
                subnets: vec![subnet],
            }],
            extensions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_infra::mock::mock_output_value;
    use bosun_schema::LoadBalancers;
    use std::collections::BTreeMap;

    fn state() -> State {
        let mut state = State::new();
        state.iaas = Some(Iaas::Gcp);
        state.env_id = "bosun-env-test".into();
        state.gcp.project_id = "proj".to_owned();
        state.gcp.region = "us-central1".to_owned();
        state.gcp.zone = "us-central1-a".to_owned();
        state.gcp.service_account_key = "{}".to_owned();
        state
    }

    fn outputs(names: &[&str]) -> BTreeMap<String, Value> {
        names
            .iter()
            .map(|n| ((*n).to_owned(), mock_output_value(n)))
            .collect()
    }

    #[test]
    fn zone_table_matches_known_regions() {
        let zones = GcpProvider.availability_zones("us-central1").unwrap();
        assert_eq!(
            zones,
            ["us-central1-a", "us-central1-b", "us-central1-c", "us-central1-f"]
        );
        assert_eq!(GcpProvider.availability_zones("us-west1").unwrap().len(), 2);
    }

    #[test]
    fn cloud_config_uses_network_outputs() {
        let state = state();
        let map = outputs(REQUIRED);
        let config = GcpProvider.cloud_config(&state, &Outputs::new(&map)).unwrap();
        assert_eq!(config.azs.len(), 4);
        assert_eq!(config.azs[3].cloud_properties["zone"], "us-central1-f");
        let subnet = &config.networks[0].subnets[0];
        assert_eq!(subnet.cloud_properties["network_name"], "mock-network_name");
        assert_eq!(subnet.reserved, ["10.0.0.2-10.0.0.255"]);
        assert_eq!(subnet.static_ips, ["10.0.255.190-10.0.255.254"]);
        assert!(config.extension("cf-router-network-properties").is_none());
    }

    #[test]
    fn cf_lbs_add_vm_extensions_and_vars() {
        let mut state = state();
        state.lbs = Some(LoadBalancers {
            kind: LbKind::Cf,
            certificate: "CERT".to_owned(),
            private_key: "KEY".to_owned(),
            chain: None,
            domain: None,
        });
        let mut names = REQUIRED.to_vec();
        names.extend_from_slice(CF_OUTPUTS);
        let map = outputs(&names);
        let config = GcpProvider.cloud_config(&state, &Outputs::new(&map)).unwrap();
        let router = config.extension("cf-router-network-properties").unwrap();
        assert_eq!(router.cloud_properties["backend_service"], "mock-router_backend_service");

        let vars = GcpProvider.template_vars(&state).unwrap();
        assert_eq!(vars["ssl_certificate"], "CERT");
        assert_eq!(vars["zones"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn missing_network_output_is_distinct_error() {
        let state = state();
        let map = outputs(&["external_ip"]);
        assert!(matches!(
            GcpProvider.cloud_config(&state, &Outputs::new(&map)),
            Err(CoreError::MissingOutput { .. })
        ));
    }
}
