use super::EXIT_SUCCESS;
use bosun_core::{Engine, Property};

/// Print a value alone, or as `{"<key>": value}` in JSON mode.
fn emit(key: &str, value: &str, json: bool) {
    if json {
        let mut map = serde_json::Map::new();
        map.insert(key.to_owned(), serde_json::Value::String(value.to_owned()));
        println!("{}", serde_json::Value::Object(map));
    } else {
        println!("{}", value.trim_end());
    }
}

pub fn run(engine: &Engine, property: Property, json: bool) -> Result<u8, String> {
    let value = engine.query(property).map_err(|e| e.to_string())?;
    emit(&property.command().replace('-', "_"), &value, json);
    Ok(EXIT_SUCCESS)
}

pub fn ssh_key(engine: &Engine, json: bool) -> Result<u8, String> {
    let key = engine.ssh_key().map_err(|e| e.to_string())?;
    emit("ssh_key", &key, json);
    Ok(EXIT_SUCCESS)
}

pub fn cloud_config(engine: &Engine, json: bool) -> Result<u8, String> {
    let yaml = engine.cloud_config().map_err(|e| e.to_string())?;
    emit("cloud_config", &yaml, json);
    Ok(EXIT_SUCCESS)
}

pub fn latest_error(engine: &Engine, json: bool) -> Result<u8, String> {
    let output = engine.latest_error().map_err(|e| e.to_string())?;
    emit("latest_error", &output, json);
    Ok(EXIT_SUCCESS)
}
