use super::{colorize_change, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use crate::UpArgs;
use bosun_core::{Engine, UpOutcome};
use bosun_schema::{read_service_account_key, UpConfig};

pub fn run(engine: &Engine, args: &UpArgs, json: bool) -> Result<u8, String> {
    let config = up_config(args)?;
    let pb = spinner("provisioning environment", json);
    let outcome = match engine.up(&config) {
        Ok(outcome) => {
            spin_ok(&pb, &format!("environment {} is up", outcome.env_id));
            outcome
        }
        Err(e) => {
            spin_fail(&pb, "up failed");
            return Err(e.to_string());
        }
    };
    print_outcome(&outcome, json)?;
    Ok(EXIT_SUCCESS)
}

fn up_config(args: &UpArgs) -> Result<UpConfig, String> {
    let mut config = UpConfig::new(args.iaas);
    config.name.clone_from(&args.name);
    config.no_director = args.no_director;
    config.jumpbox = args.jumpbox;
    config.force = args.force;

    let set = |target: &mut String, value: Option<&str>| {
        if let Some(v) = value {
            v.clone_into(target);
        }
    };
    set(&mut config.aws.access_key_id, args.aws_access_key_id.as_deref());
    set(&mut config.aws.secret_access_key, args.aws_secret_access_key.as_deref());
    set(&mut config.aws.region, args.aws_region.as_deref());
    set(&mut config.gcp.project_id, args.gcp_project_id.as_deref());
    set(&mut config.gcp.region, args.gcp_region.as_deref());
    set(&mut config.gcp.zone, args.gcp_zone.as_deref());
    set(&mut config.azure.subscription_id, args.azure_subscription_id.as_deref());
    set(&mut config.azure.tenant_id, args.azure_tenant_id.as_deref());
    set(&mut config.azure.client_id, args.azure_client_id.as_deref());
    set(&mut config.azure.client_secret, args.azure_client_secret.as_deref());
    set(&mut config.azure.location, args.azure_location.as_deref());

    if let Some(path) = &args.gcp_service_account_key {
        config.gcp.service_account_key =
            read_service_account_key(path).map_err(|e| format!("config error: {e}"))?;
    }
    Ok(config)
}

fn print_outcome(outcome: &UpOutcome, json: bool) -> Result<(), String> {
    let steps = [
        ("keypair", outcome.key_pair_created),
        ("legacy migration", outcome.migrated),
        ("infrastructure", outcome.infra_applied),
        ("jumpbox", outcome.jumpbox_deployed),
        ("director", outcome.director_deployed),
        ("cloud config", outcome.cloud_config_updated),
    ];
    if json {
        let payload = serde_json::json!({
            "env_id": outcome.env_id,
            "changed": outcome.changed_anything(),
            "key_pair_created": outcome.key_pair_created,
            "migrated": outcome.migrated,
            "infra_applied": outcome.infra_applied,
            "jumpbox_deployed": outcome.jumpbox_deployed,
            "director_deployed": outcome.director_deployed,
            "cloud_config_updated": outcome.cloud_config_updated,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for (step, changed) in steps {
            println!("  {step:<18} {}", colorize_change(changed));
        }
    }
    Ok(())
}
