use super::{lookup_zones, vm_types, Provider, Vars, INTERNAL_CIDR};
use crate::cloud_config::{
    ephemeral_disk_extensions, numbered_azs, Cidr, CloudConfig, Network, NETWORK_NAME,
};
use crate::outputs::Outputs;
use crate::CoreError;
use bosun_schema::{Iaas, LbKind, State};
use serde_json::json;

const TEMPLATE: &str = include_str!("../../templates/azure.tf");

/// Locations with availability zone support. Azure numbers zones per location.
const ZONES: &[(&str, &[&str])] = &[
    ("eastus", &["1", "2", "3"]),
    ("eastus2", &["1", "2", "3"]),
    ("centralus", &["1", "2", "3"]),
    ("southcentralus", &["1", "2", "3"]),
    ("westus2", &["1", "2", "3"]),
    ("northeurope", &["1", "2", "3"]),
    ("westeurope", &["1", "2", "3"]),
    ("uksouth", &["1", "2", "3"]),
    ("francecentral", &["1", "2", "3"]),
    ("southeastasia", &["1", "2", "3"]),
    ("japaneast", &["1", "2", "3"]),
    ("australiaeast", &["1", "2", "3"]),
];

const INSTANCE_TYPES: &[(&str, &str)] = &[
    ("default", "Standard_D1_v2"),
    ("minimal", "Standard_F1"),
    ("sharedcpu", "Standard_F1"),
    ("small", "Standard_D2_v2"),
    ("medium", "Standard_D3_v2"),
    ("large", "Standard_D4_v2"),
    ("small-highmem", "Standard_DS11_v2"),
];

const REQUIRED: &[&str] = &[
    "external_ip",
    "director_address",
    "vnet_name",
    "subnet_name",
    "resource_group_name",
    "storage_account_name",
    "default_security_group",
];

/// Storage account names are 3-24 lowercase alphanumerics, globally unique.
/// The tail of the env id carries its timestamp, so keep that.
pub(crate) fn simple_env_id(env_id: &str) -> String {
    let alnum: Vec<char> = env_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    alnum[alnum.len().saturating_sub(24)..].iter().collect()
}

pub struct AzureProvider;

impl Provider for AzureProvider {
    fn iaas(&self) -> Iaas {
        Iaas::Azure
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>, CoreError> {
        lookup_zones(Iaas::Azure, ZONES, region)
    }

    fn manages_keypair(&self) -> bool {
        false
    }

    fn supports_lbs(&self) -> bool {
        false
    }

    fn template(&self, _lbs: Option<LbKind>) -> String {
        TEMPLATE.to_owned()
    }

    fn template_vars(&self, state: &State) -> Result<Vars, CoreError> {
        self.availability_zones(&state.azure.location)?;
        Ok(Vars::from([
            ("env_id".to_owned(), json!(state.env_id.as_str())),
            ("simple_env_id".to_owned(), json!(simple_env_id(&state.env_id))),
            ("subscription_id".to_owned(), json!(state.azure.subscription_id)),
            ("tenant_id".to_owned(), json!(state.azure.tenant_id)),
            ("client_id".to_owned(), json!(state.azure.client_id)),
            ("client_secret".to_owned(), json!(state.azure.client_secret)),
            ("location".to_owned(), json!(state.azure.location)),
        ]))
    }

    fn required_outputs(&self) -> &'static [&'static str] {
        REQUIRED
    }

    fn lb_outputs(&self, _kind: LbKind) -> &'static [&'static str] {
        &[]
    }

    fn cpi_vars(&self, state: &State, outputs: &Outputs<'_>) -> Result<Vars, CoreError> {
        let mut vars = Vars::from([
            ("subscription_id".to_owned(), json!(state.azure.subscription_id)),
            ("tenant_id".to_owned(), json!(state.azure.tenant_id)),
            ("client_id".to_owned(), json!(state.azure.client_id)),
            ("client_secret".to_owned(), json!(state.azure.client_secret)),
        ]);
        for (var, output) in [
            ("vnet_name", "vnet_name"),
            ("subnet_name", "subnet_name"),
            ("resource_group_name", "resource_group_name"),
            ("storage_account_name", "storage_account_name"),
            ("default_security_group", "default_security_group"),
        ] {
            vars.insert(var.to_owned(), json!(outputs.require(output)?));
        }
        Ok(vars)
    }

    fn cloud_config(&self, state: &State, outputs: &Outputs<'_>) -> Result<CloudConfig, CoreError> {
        let zones = self.availability_zones(&state.azure.location)?;
        let azs = numbered_azs(&zones, |zone| json!({ "availability_zone": zone }));
        let az_names = azs.iter().map(|az| az.name.clone()).collect();

        let subnet = Cidr::parse(INTERNAL_CIDR)?.subnet(
            14,
            63,
            az_names,
            json!({
                "virtual_network_name": outputs.require("vnet_name")?,
                "subnet_name": outputs.require("subnet_name")?,
                "security_group": outputs.require("default_security_group")?,
            }),
        )?;

        Ok(CloudConfig::assemble(
            azs,
            vm_types(INSTANCE_TYPES, |instance| json!({ "instance_type": instance })),
            &json!({}),
            vec![Network {
                name: NETWORK_NAME.to_owned(),
                kind: "manual".to_owned(),
                subnets: vec![subnet],
            }],
            ephemeral_disk_extensions(|gb| json!({ "ephemeral_disk": { "size": gb * 1024 } })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_infra::mock::mock_output_value;
    use serde_json::Value;
    use std::collections::BTreeMap;

    #[test]
    fn storage_account_name_keeps_tail() {
        assert_eq!(
            simple_env_id("bosun-env-tahoe-2026-10-18t10-22z"),
            "unenvtahoe20261018t1022z"
        );
        assert_eq!(simple_env_id("Short-Name"), "shortname");
    }

    #[test]
    fn subnet_reserves_director_and_jumpbox_addresses() {
        let mut state = State::new();
        state.iaas = Some(Iaas::Azure);
        state.azure.location = "westeurope".to_owned();
        let map: BTreeMap<String, Value> = REQUIRED
            .iter()
            .map(|n| ((*n).to_owned(), mock_output_value(n)))
            .collect();
        let config = AzureProvider.cloud_config(&state, &Outputs::new(&map)).unwrap();
        let subnet = &config.networks[0].subnets[0];
        assert_eq!(subnet.reserved, ["10.0.0.2-10.0.0.15"]);
        assert_eq!(subnet.cloud_properties["subnet_name"], "mock-subnet_name");
        assert_eq!(config.azs.len(), 3);
        assert!(config.vm_extensions.iter().all(|e| e.name.ends_with("_ephemeral_disk")));
    }

    #[test]
    fn unsupported_location_rejected() {
        let mut state = State::new();
        state.azure.location = "westus".to_owned();
        assert!(AzureProvider.template_vars(&state).is_err());
    }
}
