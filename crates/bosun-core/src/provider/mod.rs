//! Per-IAAS knowledge behind one capability interface.
//!
//! The pipeline never branches on [`Iaas`] itself: templates, variables, AZ
//! tables, required outputs, deployment variables and cloud-config shape all
//! come from the [`Provider`] selected by [`provider_for`].

pub(crate) mod aws;
mod azure;
mod gcp;

pub use aws::AwsProvider;
pub use azure::AzureProvider;
pub use gcp::GcpProvider;

use crate::cloud_config::CloudConfig;
use crate::outputs::Outputs;
use crate::CoreError;
use bosun_schema::{Iaas, LbKind, LoadBalancers, State};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Address of the director VM on the internal network of every IAAS.
pub const DIRECTOR_INTERNAL_IP: &str = "10.0.0.6";
pub const JUMPBOX_INTERNAL_IP: &str = "10.0.0.5";
pub const INTERNAL_CIDR: &str = "10.0.0.0/24";
pub const INTERNAL_GATEWAY: &str = "10.0.0.1";

pub type Vars = BTreeMap<String, Value>;

pub trait Provider: Send + Sync {
    fn iaas(&self) -> Iaas;

    /// Availability zones for `region`, from a static table. An unknown region
    /// is an error, never an empty list.
    fn availability_zones(&self, region: &str) -> Result<Vec<String>, CoreError>;

    /// Whether this IAAS registers an SSH keypair before the infra apply.
    fn manages_keypair(&self) -> bool;

    fn supports_lbs(&self) -> bool;

    /// Complete applier template, including the LB fragment for `lbs`.
    fn template(&self, lbs: Option<LbKind>) -> String;

    fn template_vars(&self, state: &State) -> Result<Vars, CoreError>;

    /// Credential file the applier reads through `var.credentials`.
    fn applier_credentials(&self, _state: &State) -> Option<String> {
        None
    }

    fn required_outputs(&self) -> &'static [&'static str];

    fn lb_outputs(&self, kind: LbKind) -> &'static [&'static str];

    /// CPI variables shared by the director and jumpbox deployments.
    fn cpi_vars(&self, state: &State, outputs: &Outputs<'_>) -> Result<Vars, CoreError>;

    fn cloud_config(&self, state: &State, outputs: &Outputs<'_>) -> Result<CloudConfig, CoreError>;

    /// Every output the current template must produce.
    fn expected_outputs(&self, lbs: Option<LbKind>) -> Vec<&'static str> {
        let mut names = self.required_outputs().to_vec();
        if let Some(kind) = lbs {
            names.extend_from_slice(self.lb_outputs(kind));
        }
        names
    }

    fn cpi_ops_file(&self) -> String {
        format!("{}/cpi.yml", self.iaas())
    }
}

pub fn provider_for(iaas: Iaas) -> Box<dyn Provider> {
    match iaas {
        Iaas::Aws => Box::new(AwsProvider),
        Iaas::Gcp => Box::new(GcpProvider),
        Iaas::Azure => Box::new(AzureProvider),
    }
}

/// Look `region` up in a static AZ table.
pub(crate) fn lookup_zones(
    iaas: Iaas,
    table: &[(&str, &[&str])],
    region: &str,
) -> Result<Vec<String>, CoreError> {
    table
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, zones)| zones.iter().map(|z| (*z).to_owned()).collect())
        .ok_or_else(|| CoreError::UnknownRegion {
            iaas,
            region: region.to_owned(),
        })
}

/// Certificate variables consumed by the LB template fragments.
pub(crate) fn lb_vars(lbs: &LoadBalancers, with_chain: bool) -> Vars {
    let mut vars = Vars::new();
    vars.insert("ssl_certificate".to_owned(), json!(lbs.certificate));
    vars.insert(
        "ssl_certificate_private_key".to_owned(),
        json!(lbs.private_key),
    );
    if with_chain {
        vars.insert(
            "ssl_certificate_chain".to_owned(),
            json!(lbs.chain.clone().unwrap_or_default()),
        );
    }
    vars
}

/// Network variables of a deployment placed on the internal subnet.
pub(crate) fn internal_network_vars(internal_ip: &str) -> Vars {
    Vars::from([
        ("internal_cidr".to_owned(), json!(INTERNAL_CIDR)),
        ("internal_gw".to_owned(), json!(INTERNAL_GATEWAY)),
        ("internal_ip".to_owned(), json!(internal_ip)),
    ])
}

/// Standard VM type names and the IAAS instance type backing each.
pub(crate) fn vm_types(
    table: &[(&str, &str)],
    cloud_properties: impl Fn(&str) -> Value,
) -> Vec<crate::cloud_config::VmType> {
    table
        .iter()
        .map(|(name, instance)| crate::cloud_config::VmType {
            name: (*name).to_owned(),
            cloud_properties: cloud_properties(instance),
        })
        .collect()
}
