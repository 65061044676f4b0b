//! Director cloud-config: model, shared building blocks and upload.

use crate::outputs::Outputs;
use crate::provider::Provider;
use crate::CoreError;
use bosun_infra::{DirectorClientFactory, DirectorEndpoint};
use bosun_schema::State;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CloudConfig {
    pub azs: Vec<Az>,
    pub vm_types: Vec<VmType>,
    pub disk_types: Vec<DiskType>,
    pub compilation: Compilation,
    pub networks: Vec<Network>,
    pub vm_extensions: Vec<VmExtension>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Az {
    pub name: String,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VmType {
    pub name: String,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskType {
    pub name: String,
    /// MiB.
    pub disk_size: u32,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Compilation {
    pub workers: u32,
    pub reuse_compilation_vms: bool,
    pub az: String,
    pub vm_type: String,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Network {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Subnet {
    pub range: String,
    pub gateway: String,
    pub azs: Vec<String>,
    pub reserved: Vec<String>,
    #[serde(rename = "static", skip_serializing_if = "Vec::is_empty")]
    pub static_ips: Vec<String>,
    pub cloud_properties: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VmExtension {
    pub name: String,
    pub cloud_properties: Value,
}

pub const NETWORK_NAME: &str = "default";
const DISK_SIZES_GB: [u32; 7] = [1, 5, 10, 50, 100, 500, 1000];
const EPHEMERAL_SIZES_GB: [u32; 6] = [5, 10, 50, 100, 500, 1000];

impl CloudConfig {
    /// Assemble a config with the shared disk types and compilation block.
    pub fn assemble(
        azs: Vec<Az>,
        vm_types: Vec<VmType>,
        disk_properties: &Value,
        networks: Vec<Network>,
        vm_extensions: Vec<VmExtension>,
    ) -> Self {
        let first_az = azs.first().map(|az| az.name.clone()).unwrap_or_default();
        Self {
            azs,
            vm_types,
            disk_types: DISK_SIZES_GB
                .iter()
                .map(|gb| DiskType {
                    name: disk_name(*gb),
                    disk_size: gb * 1024,
                    cloud_properties: disk_properties.clone(),
                })
                .collect(),
            compilation: Compilation {
                workers: 5,
                reuse_compilation_vms: true,
                az: first_az,
                vm_type: "default".to_owned(),
                network: NETWORK_NAME.to_owned(),
            },
            networks,
            vm_extensions,
        }
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        serde_yaml::to_string(self).map_err(|e| CoreError::CloudConfig(e.to_string()))
    }

    pub fn extension(&self, name: &str) -> Option<&VmExtension> {
        self.vm_extensions.iter().find(|e| e.name == name)
    }
}

fn disk_name(gb: u32) -> String {
    if gb >= 1000 {
        format!("{}TB", gb / 1000)
    } else {
        format!("{gb}GB")
    }
}

/// `z1..zn` azs, each carrying the properties `zone_properties` builds.
pub(crate) fn numbered_azs(zones: &[String], zone_properties: impl Fn(&str) -> Value) -> Vec<Az> {
    zones
        .iter()
        .enumerate()
        .map(|(i, zone)| Az {
            name: format!("z{}", i + 1),
            cloud_properties: zone_properties(zone),
        })
        .collect()
}

/// `<size>_ephemeral_disk` extensions.
pub(crate) fn ephemeral_disk_extensions(properties: impl Fn(u32) -> Value) -> Vec<VmExtension> {
    EPHEMERAL_SIZES_GB
        .iter()
        .map(|gb| VmExtension {
            name: format!("{}_ephemeral_disk", disk_name(*gb)),
            cloud_properties: properties(*gb),
        })
        .collect()
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    pub(crate) fn parse(s: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::CloudConfig(format!("invalid CIDR '{s}'"));
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if !(8..=30).contains(&prefix) {
            return Err(invalid());
        }
        let mask = u32::MAX << (32 - prefix);
        Ok(Self {
            base: u32::from(addr) & mask,
            prefix,
        })
    }

    fn size(self) -> u32 {
        1 << (32 - self.prefix)
    }

    fn nth(self, n: u32) -> Ipv4Addr {
        Ipv4Addr::from(self.base + n)
    }

    /// Manual subnet with the gateway at `.1`, the first `reserved` host
    /// addresses after it held back, and `statics` addresses at the top.
    /// The reserved and static ranges must fit without overlapping.
    pub(crate) fn subnet(
        self,
        reserved: u32,
        statics: u32,
        azs: Vec<String>,
        cloud_properties: Value,
    ) -> Result<Subnet, CoreError> {
        let size = self.size();
        let statics_start = size
            .checked_sub(2 + statics)
            .filter(|start| *start > 1 + reserved)
            .ok_or_else(|| {
                CoreError::CloudConfig(format!(
                    "subnet {}/{} is too small for {reserved} reserved and {statics} static addresses",
                    self.nth(0),
                    self.prefix
                ))
            })?;
        Ok(Subnet {
            range: format!("{}/{}", self.nth(0), self.prefix),
            gateway: self.nth(1).to_string(),
            azs,
            reserved: vec![format!("{}-{}", self.nth(2), self.nth(1 + reserved))],
            static_ips: vec![format!("{}-{}", self.nth(statics_start), self.nth(size - 2))],
            cloud_properties,
        })
    }
}

/// Generates cloud-config and pushes it to the director.
pub struct CloudConfigManager<'a> {
    directors: &'a dyn DirectorClientFactory,
}

impl<'a> CloudConfigManager<'a> {
    pub fn new(directors: &'a dyn DirectorClientFactory) -> Self {
        Self { directors }
    }

    pub fn generate(provider: &dyn Provider, state: &State) -> Result<CloudConfig, CoreError> {
        provider.cloud_config(state, &Outputs::new(&state.infra.outputs))
    }

    /// Render and upload. A no-director environment, or one whose director is
    /// not yet deployed, is skipped.
    pub fn update(&self, provider: &dyn Provider, state: &State) -> Result<bool, CoreError> {
        if state.no_director || state.director.address.is_empty() {
            debug!("no director to receive cloud config");
            return Ok(false);
        }
        let yaml = Self::generate(provider, state)?.to_yaml()?;
        let endpoint = DirectorEndpoint {
            address: state.director.address.clone(),
            username: state.director.username.clone(),
            password: state.director.password.clone(),
            ca_cert: state.director.ca_cert.clone(),
        };
        info!("updating cloud config on {}", endpoint.address);
        self.directors
            .connect(&endpoint)?
            .update_cloud_config(yaml.as_bytes())?;
        Ok(true)
    }
}

/// `{"root_disk_size_gb": n}`-style helper for extension property builders.
pub(crate) fn sized(key: &str, value: u32) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_owned(), json!(value));
    Value::Object(map)
}
