use super::{json_pretty, read_arg_file, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use crate::LbArgs;
use bosun_core::{Engine, LbRequest};

fn request(args: &LbArgs) -> Result<LbRequest, String> {
    let mut request = LbRequest::new(args.kind);
    if let Some(path) = &args.cert {
        request.certificate = read_arg_file("cert", path)?;
    }
    if let Some(path) = &args.key {
        request.private_key = read_arg_file("key", path)?;
    }
    if let Some(path) = &args.chain {
        request.chain = Some(read_arg_file("chain", path)?);
    }
    request.domain.clone_from(&args.domain);
    Ok(request)
}

pub fn create(engine: &Engine, args: &LbArgs, json: bool) -> Result<u8, String> {
    let request = request(args)?;
    let pb = spinner(&format!("creating {} load balancers", args.kind), json);
    if let Err(e) = engine.create_lbs(request) {
        spin_fail(&pb, "create-lbs failed");
        return Err(e.to_string());
    }
    spin_ok(&pb, &format!("{} load balancers created", args.kind));
    list(engine, json)
}

pub fn update(engine: &Engine, args: &LbArgs, json: bool) -> Result<u8, String> {
    let request = request(args)?;
    let pb = spinner(&format!("updating {} load balancers", args.kind), json);
    if let Err(e) = engine.update_lbs(request) {
        spin_fail(&pb, "update-lbs failed");
        return Err(e.to_string());
    }
    spin_ok(&pb, &format!("{} load balancers updated", args.kind));
    list(engine, json)
}

pub fn delete(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = spinner("deleting load balancers", json);
    match engine.delete_lbs() {
        Ok(true) => spin_ok(&pb, "load balancers deleted"),
        Ok(false) => spin_ok(&pb, "no load balancers to delete"),
        Err(e) => {
            spin_fail(&pb, "delete-lbs failed");
            return Err(e.to_string());
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(engine: &Engine, json: bool) -> Result<u8, String> {
    let entries = engine.lbs().map_err(|e| e.to_string())?;
    if json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        println!("{}", json_pretty(&map)?);
    } else {
        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (name, value) in &entries {
            println!("{name:<width$}  {value}");
        }
    }
    Ok(EXIT_SUCCESS)
}
