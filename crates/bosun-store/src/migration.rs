//! State document schema migration.
//!
//! Documents are upgraded one version at a time on the raw JSON value, so each
//! step only needs to know the shape of its predecessor. `StateStore::load`
//! applies the chain in memory; [`migrate_state_file`] rewrites the file on
//! disk after taking a backup.

use crate::layout::StateLayout;
use crate::state_store::{StateRepository, StateStore};
use crate::StoreError;
use bosun_schema::STATE_VERSION;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Result of a successful on-disk migration.
#[derive(Debug)]
pub struct MigrationResult {
    pub from_version: u32,
    pub to_version: u32,
    pub backup_path: PathBuf,
}

/// Upgrade a raw state document to [`STATE_VERSION`].
///
/// Returns the upgraded value and the version it was read at. A document
/// without a `version` field is treated as v1. A document from a newer
/// version is rejected rather than downgraded.
pub fn migrate_value(mut value: Value) -> Result<(Value, u32), StoreError> {
    let found = document_version(&value)?;
    if found > STATE_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: STATE_VERSION,
            found,
        });
    }

    let mut version = found;
    while version < STATE_VERSION {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| StoreError::Malformed("state is not a JSON object".to_owned()))?;
        match version {
            1 => v1_to_v2(obj),
            2 => v2_to_v3(obj),
            other => {
                return Err(StoreError::Malformed(format!(
                    "no migration path from version {other}"
                )))
            }
        }
        version += 1;
        obj.insert("version".to_owned(), json!(version));
        debug!("migrated state document to v{version}");
    }

    Ok((value, found))
}

fn document_version(value: &Value) -> Result<u32, StoreError> {
    match value.get("version") {
        None | Some(Value::Null) => Ok(1),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| StoreError::Malformed(format!("invalid version field: {v}"))),
    }
}

/// v1 kept the applier state as a top-level `tf_state` string, the legacy
/// stack as `stack`, and the director under `bosh` with prefixed keys.
fn v1_to_v2(obj: &mut Map<String, Value>) {
    let tf_state = obj.remove("tf_state").unwrap_or(Value::Null);
    if !obj.contains_key("infra") {
        let state = tf_state.as_str().unwrap_or_default().to_owned();
        obj.insert("infra".to_owned(), json!({ "state": state, "outputs": {} }));
    }

    if let Some(stack) = obj.remove("stack") {
        let name = stack
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if !name.is_empty() {
            obj.insert(
                "legacy_stack".to_owned(),
                json!({ "name": name, "outputs": {} }),
            );
        }
    }

    if let Some(Value::Object(bosh)) = obj.remove("bosh") {
        let field = |key: &str| bosh.get(key).cloned().unwrap_or_else(|| json!(""));
        let director = json!({
            "name": field("director_name"),
            "address": field("director_address"),
            "username": field("director_username"),
            "password": field("director_password"),
            "ca_cert": field("director_ssl_ca"),
            "certificate": field("director_ssl_certificate"),
            "private_key": field("director_ssl_private_key"),
            "manifest": field("manifest"),
            "deployment_state": bosh.get("state").cloned().unwrap_or(Value::Null),
            "credentials": bosh.get("credentials").cloned().unwrap_or_else(|| json!({})),
        });
        obj.insert("director".to_owned(), director);
    }
}

/// v2 stored the jumpbox as a boolean plus a `jumpbox_url` string.
fn v2_to_v3(obj: &mut Map<String, Value>) {
    let enabled = match obj.remove("jumpbox") {
        Some(Value::Bool(b)) => b,
        Some(Value::Object(existing)) => {
            obj.insert("jumpbox".to_owned(), Value::Object(existing));
            false
        }
        _ => false,
    };
    let url = obj.remove("jumpbox_url").unwrap_or_else(|| json!(""));
    if !obj.contains_key("jumpbox") {
        obj.insert(
            "jumpbox".to_owned(),
            json!({ "enabled": enabled, "url": url }),
        );
    }
    obj.entry("latest_error".to_owned())
        .or_insert_with(|| json!(""));
}

/// Upgrade the state file in `layout` to [`STATE_VERSION`] on disk.
///
/// - Returns `Ok(None)` if the document is already current.
/// - Returns `Err(VersionMismatch)` for documents from a newer version.
/// - Copies the original to `bosun-state.json.backup.<timestamp>` before
///   rewriting, and rewrites atomically with a fresh checksum.
pub fn migrate_state_file(layout: &StateLayout) -> Result<Option<MigrationResult>, StoreError> {
    let path = layout.state_file();
    if !path.exists() {
        return Err(StoreError::NotFound(layout.dir().display().to_string()));
    }

    let content = fs::read_to_string(&path)?;
    let raw: Value = serde_json::from_str(&content)?;
    let found = document_version(&raw)?;
    if found == STATE_VERSION {
        return Ok(None);
    }
    if found > STATE_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: STATE_VERSION,
            found,
        });
    }

    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let backup_path = layout.backup_file(&timestamp);
    fs::copy(&path, &backup_path)?;
    info!("backed up state file to {}", backup_path.display());

    let store = StateStore::new(layout.clone());
    let state = store.load()?;
    store.save(&state)?;

    info!("migrated state file from v{found} to v{STATE_VERSION}");

    Ok(Some(MigrationResult {
        from_version: found,
        to_version: STATE_VERSION,
        backup_path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_version_is_v1() {
        let (value, found) = migrate_value(json!({ "iaas": "aws" })).unwrap();
        assert_eq!(found, 1);
        assert_eq!(value["version"], json!(STATE_VERSION));
    }

    #[test]
    fn current_version_is_untouched() {
        let doc = json!({ "version": STATE_VERSION, "iaas": "gcp", "env_id": "e" });
        let (value, found) = migrate_value(doc.clone()).unwrap();
        assert_eq!(found, STATE_VERSION);
        assert_eq!(value, doc);
    }

    #[test]
    fn future_version_rejected() {
        let err = migrate_value(json!({ "version": STATE_VERSION + 1 })).unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }

    #[test]
    fn zero_version_is_malformed() {
        assert!(matches!(
            migrate_value(json!({ "version": 0 })),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn v2_jumpbox_flag_becomes_struct() {
        let doc = json!({
            "version": 2,
            "jumpbox": true,
            "jumpbox_url": "10.0.0.5:22",
        });
        let (value, _) = migrate_value(doc).unwrap();
        assert_eq!(value["jumpbox"]["enabled"], json!(true));
        assert_eq!(value["jumpbox"]["url"], json!("10.0.0.5:22"));
        assert!(value.get("jumpbox_url").is_none());
        assert_eq!(value["latest_error"], json!(""));
    }

    #[test]
    fn v1_stack_without_name_is_dropped() {
        let (value, _) = migrate_value(json!({ "version": 1, "stack": {} })).unwrap();
        assert!(value.get("legacy_stack").is_none());
    }
}
