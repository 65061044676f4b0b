use super::{spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use bosun_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = spinner("rotating keypair", json);
    if let Err(e) = engine.rotate() {
        spin_fail(&pb, "rotate failed");
        return Err(e.to_string());
    }
    spin_ok(&pb, "keypair rotated");
    if json {
        println!("{}", serde_json::json!({ "status": "rotated" }));
    }
    Ok(EXIT_SUCCESS)
}
