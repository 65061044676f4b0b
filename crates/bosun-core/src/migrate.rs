//! One-shot adoption of a legacy CloudFormation stack by the declarative applier.
//!
//! Every stack resource is either bound to a template address by an import, or
//! known to be represented inline by another resource (security group rules,
//! routes, gateway attachments). Anything else aborts: an unmapped resource
//! would be recreated by the first apply.

use crate::infra::InfraManager;
use crate::lifecycle::validate_transition;
use crate::provider::Provider;
use crate::CoreError;
use bosun_infra::{Applier, ImportBinding, StackDescription, StackManager};
use bosun_schema::{InfraBackend, InfraState, Iaas, State};
use std::collections::BTreeMap;
use tracing::{debug, info};

enum Target {
    /// Imported at `address`, with the stack resource's physical id.
    Import(String),
    /// Imported at `address`, with an id joined from other resources' physical ids.
    Joined(String, Vec<String>),
    /// Folded into another resource's definition.
    Inline,
}

fn fixed(logical_id: &str) -> Option<Target> {
    let import = |address: &str| Some(Target::Import(address.to_owned()));
    match logical_id {
        "VPC" => import("aws_vpc.vpc"),
        "VPCGatewayInternetGateway" => import("aws_internet_gateway.ig"),
        "BOSHSubnet" => import("aws_subnet.bosh_subnet"),
        "BOSHRouteTable" => import("aws_route_table.bosh_route_table"),
        "BOSHSubnetRouteTableAssociation" => Some(Target::Joined(
            "aws_route_table_association.route_bosh_subnets".to_owned(),
            vec!["BOSHSubnet".to_owned(), "BOSHRouteTable".to_owned()],
        )),
        "BOSHSecurityGroup" => import("aws_security_group.bosh_security_group"),
        "InternalSecurityGroup" => import("aws_security_group.internal_security_group"),
        "BOSHEIP" => import("aws_eip.bosh_eip"),
        "NATSecurityGroup" => import("aws_security_group.nat_security_group"),
        "NATInstance" => import("aws_instance.nat"),
        "NATEIP" => import("aws_eip.nat_eip"),
        "InternalRouteTable" => import("aws_route_table.internal_route_table"),
        "CFRouterLoadBalancer" => import("aws_elb.cf_router_lb"),
        "CFRouterSecurityGroup" => import("aws_security_group.cf_router_lb_security_group"),
        "CFRouterInternalSecurityGroup" => {
            import("aws_security_group.cf_router_lb_internal_security_group")
        }
        "CFSSHProxyLoadBalancer" => import("aws_elb.cf_ssh_lb"),
        "CFSSHProxySecurityGroup" => import("aws_security_group.cf_ssh_lb_security_group"),
        "CFSSHProxyInternalSecurityGroup" => {
            import("aws_security_group.cf_ssh_lb_internal_security_group")
        }
        "ConcourseLoadBalancer" => import("aws_elb.concourse_lb"),
        "ConcourseSecurityGroup" => import("aws_security_group.concourse_lb_security_group"),
        "ConcourseInternalSecurityGroup" => {
            import("aws_security_group.concourse_lb_internal_security_group")
        }
        "VPCGatewayAttachment" | "BOSHRoute" | "InternalRoute" => Some(Target::Inline),
        _ => None,
    }
}

/// `InternalSubnet<n>` and `InternalSubnet<n>RouteTableAssociation`, 1-based.
fn internal_subnet(logical_id: &str) -> Option<Target> {
    let rest = logical_id.strip_prefix("InternalSubnet")?;
    let split = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, suffix) = rest.split_at(split);
    let n: usize = digits.parse().ok().filter(|n| *n >= 1)?;
    let index = n - 1;
    match suffix {
        "" => Some(Target::Import(format!(
            "aws_subnet.internal_subnets[{index}]"
        ))),
        "RouteTableAssociation" => Some(Target::Joined(
            format!("aws_route_table_association.internal_route_table_associations[{index}]"),
            vec![format!("InternalSubnet{n}"), "InternalRouteTable".to_owned()],
        )),
        _ => None,
    }
}

/// Whether `template` declares the resource behind `address` (index stripped).
fn declares(template: &str, address: &str) -> bool {
    let base = address.split('[').next().unwrap_or(address);
    base.split_once('.')
        .is_some_and(|(kind, name)| template.contains(&format!("resource \"{kind}\" \"{name}\"")))
}

fn is_inline_rule(logical_id: &str) -> bool {
    logical_id.contains("SecurityGroupIngress") || logical_id.contains("SecurityGroupEgress")
}

/// Import bindings for every resource of `stack`, or the first resource that
/// has no mapping.
pub fn import_bindings(stack: &StackDescription) -> Result<Vec<ImportBinding>, CoreError> {
    let physical: BTreeMap<&str, &str> = stack
        .resources
        .iter()
        .map(|r| (r.logical_id.as_str(), r.physical_id.as_str()))
        .collect();

    let mut bindings = Vec::new();
    for resource in &stack.resources {
        let target = fixed(&resource.logical_id)
            .or_else(|| internal_subnet(&resource.logical_id))
            .or_else(|| is_inline_rule(&resource.logical_id).then_some(Target::Inline))
            .ok_or_else(|| {
                CoreError::MigrationAborted(format!(
                    "stack resource {} ({}) has no import mapping",
                    resource.logical_id, resource.resource_type
                ))
            })?;
        match target {
            Target::Import(address) => bindings.push(ImportBinding {
                address,
                id: resource.physical_id.clone(),
            }),
            Target::Joined(address, parts) => {
                let ids = parts
                    .iter()
                    .map(|part| {
                        physical.get(part.as_str()).copied().ok_or_else(|| {
                            CoreError::MigrationAborted(format!(
                                "{} needs {part}, which is not in the stack",
                                resource.logical_id
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                bindings.push(ImportBinding {
                    address,
                    id: ids.join("/"),
                });
            }
            Target::Inline => debug!("{} is defined inline", resource.logical_id),
        }
    }
    Ok(bindings)
}

/// Moves an environment from its legacy stack to the declarative applier.
pub struct LegacyMigrator<'a> {
    stacks: &'a dyn StackManager,
    applier: &'a dyn Applier,
}

impl<'a> LegacyMigrator<'a> {
    pub fn new(stacks: &'a dyn StackManager, applier: &'a dyn Applier) -> Self {
        Self { stacks, applier }
    }

    /// Import the stack and verify with a plan that nothing would change.
    /// `state` is only modified on success (and `latest_error` on a tool failure).
    pub fn migrate(&self, provider: &dyn Provider, state: &mut State) -> Result<bool, CoreError> {
        let Some(legacy) = state.legacy_stack.clone() else {
            return Ok(false);
        };
        validate_transition(state.infra_backend(), InfraBackend::Declarative)?;
        if provider.iaas() != Iaas::Aws {
            return Err(CoreError::MigrationAborted(format!(
                "legacy stacks exist only on aws, state is {}",
                provider.iaas()
            )));
        }

        info!("migrating legacy stack {} to the declarative applier", legacy.name);
        let stack = self.stacks.describe(&state.aws, &legacy.name)?;
        let bindings = import_bindings(&stack)?;

        let mut candidate = state.clone();
        candidate.legacy_stack = None;
        candidate.infra = InfraState::default();
        let mut input = InfraManager::input(provider, &candidate)?;
        if let Some(stray) = bindings.iter().find(|b| !declares(&input.template, &b.address)) {
            return Err(CoreError::MigrationAborted(format!(
                "{} is not declared by the current template; are the stack's load balancers recorded in state?",
                stray.address
            )));
        }

        let blob = self.applier.import(&input, &bindings).map_err(|failure| {
            state.latest_error = failure.output;
            CoreError::Tool(failure.error)
        })?;

        input.prior_state.clone_from(&blob);
        let plan = self.applier.plan(&input)?;
        if !plan.is_noop() {
            return Err(CoreError::MigrationAborted(format!(
                "imported state of {} is not drift-free ({plan})",
                legacy.name
            )));
        }

        let outputs = self.applier.outputs(&blob)?;
        state.infra = InfraState {
            state: blob,
            outputs,
            input_fingerprint: Some(input.fingerprint()),
        };
        state.legacy_stack = None;
        info!(
            "legacy stack {} adopted ({} resources imported)",
            legacy.name,
            bindings.len()
        );
        Ok(true)
    }
}
