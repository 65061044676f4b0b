use super::{EXIT_FAILURE, EXIT_SUCCESS};
use bosun_core::StateLock;
use bosun_infra::{check_prereqs, format_missing, MissingPrereq};
use bosun_schema::{Iaas, State, ToolConfig};
use bosun_store::{StateLayout, StateRepository, StateStore, StoreError};
use std::path::Path;

pub fn run(state_dir: &Path, tools: &ToolConfig, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let layout = StateLayout::new(state_dir);
    let state = check_state(&layout, &mut checks, &mut all_pass);
    check_tools(state.as_ref(), tools, &mut checks, &mut all_pass);
    if state.is_some() {
        check_lock(&layout, &mut checks, &mut all_pass);
    }

    print_results(&checks, all_pass, json_output)
}

fn check_state(layout: &StateLayout, checks: &mut Vec<Check>, all_pass: &mut bool) -> Option<State> {
    if !layout.dir().is_dir() {
        checks.push(Check::info(
            "state_dir",
            &format!(
                "State directory {} does not exist (created by `bosun up`)",
                layout.dir().display()
            ),
        ));
        return None;
    }
    checks.push(Check::pass("state_dir", "State directory exists"));

    match StateStore::new(layout.clone()).load() {
        Ok(state) => {
            checks.push(Check::pass(
                "state_file",
                "State document is readable and its checksum verifies",
            ));
            let iaas = state.iaas.map_or("unknown", Iaas::as_str);
            checks.push(Check::info(
                "environment",
                &format!("Environment {} on {iaas}", state.env_id),
            ));
            if !state.latest_error.is_empty() {
                checks.push(Check::warn(
                    "latest_error",
                    "Last run failed; see `bosun latest-error`",
                ));
            }
            Some(state)
        }
        Err(StoreError::NotFound(_)) => {
            checks.push(Check::info("state_file", "No environment in this directory"));
            None
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("state_file", &format!("State cannot be loaded: {e}")));
            None
        }
    }
}

fn check_tools(
    state: Option<&State>,
    tools: &ToolConfig,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    let (targets, with_director) = match state.and_then(|s| s.iaas.map(|i| (i, s.no_director))) {
        Some((iaas, no_director)) => (vec![iaas], !no_director),
        None => (Iaas::ALL.to_vec(), true),
    };
    let mut missing: Vec<MissingPrereq> = Vec::new();
    for iaas in targets {
        for m in check_prereqs(iaas, tools, with_director) {
            if !missing.iter().any(|seen| seen.name == m.name) {
                missing.push(m);
            }
        }
    }
    if missing.is_empty() {
        checks.push(Check::pass("prereqs", "Required tools are installed"));
    } else {
        *all_pass = false;
        checks.push(Check::fail("prereqs", &format_missing(&missing)));
    }
}

fn check_lock(layout: &StateLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match StateLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("state_lock", "State lock is free")),
        Ok(None) => checks.push(Check::warn(
            "state_lock",
            "State lock is held by another bosun process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_lock",
                &format!("Cannot check state lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("bosun doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
