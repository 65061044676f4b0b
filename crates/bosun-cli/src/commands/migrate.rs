use super::{EXIT_FAILURE, EXIT_SUCCESS};
use bosun_schema::STATE_VERSION;
use bosun_store::{migrate_state_file, StateLayout, StoreError};
use std::path::Path;

pub fn run(state_dir: &Path, json_output: bool) -> Result<u8, String> {
    let layout = StateLayout::new(state_dir);
    match migrate_state_file(&layout) {
        Ok(Some(result)) => {
            msg(
                json_output,
                &serde_json::json!({
                    "status": "migrated",
                    "from": result.from_version,
                    "to": result.to_version,
                    "backup": result.backup_path.display().to_string(),
                })
                .to_string(),
                &format!(
                    "Migrated state from v{} to v{}.\nBackup: {}",
                    result.from_version,
                    result.to_version,
                    result.backup_path.display()
                ),
            );
            Ok(EXIT_SUCCESS)
        }
        Ok(None) => {
            msg(
                json_output,
                &format!(r#"{{"status": "current", "version": {STATE_VERSION}}}"#),
                &format!("State version: {STATE_VERSION} (current)\nNo migration needed."),
            );
            Ok(EXIT_SUCCESS)
        }
        Err(StoreError::NotFound(_)) => {
            msg(
                json_output,
                r#"{"status": "no_state", "message": "No state found."}"#,
                &format!(
                    "No state found in {}. Nothing to migrate.",
                    state_dir.display()
                ),
            );
            Ok(EXIT_SUCCESS)
        }
        Err(e @ StoreError::VersionMismatch { .. }) => {
            msg(
                json_output,
                &serde_json::json!({ "status": "newer", "message": e.to_string() }).to_string(),
                &format!("{e}\nState was written by a newer bosun. Please upgrade."),
            );
            Ok(EXIT_FAILURE)
        }
        Err(e) => Err(format!("store error: {e}")),
    }
}

fn msg(json_output: bool, json: &str, human: &str) {
    if json_output {
        println!("{json}");
    } else {
        println!("{human}");
    }
}
