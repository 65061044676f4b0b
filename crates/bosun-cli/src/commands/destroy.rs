use super::{spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use bosun_core::Engine;
use dialoguer::Confirm;
use std::io::{stderr, stdin, IsTerminal};

pub fn run(engine: &Engine, no_confirm: bool, json: bool) -> Result<u8, String> {
    let state = engine.load_state().map_err(|e| e.to_string())?;
    if !no_confirm {
        let is_tty = stdin().is_terminal() && stderr().is_terminal();
        confirm(&state.env_id, is_tty)?;
    }

    let pb = spinner(&format!("destroying {}", state.env_id), json);
    match engine.destroy() {
        Ok(()) => spin_ok(&pb, &format!("destroyed {}", state.env_id)),
        Err(e) => {
            spin_fail(&pb, "destroy failed");
            return Err(e.to_string());
        }
    }
    if json {
        println!(
            "{}",
            serde_json::json!({ "status": "destroyed", "env_id": state.env_id })
        );
    }
    Ok(EXIT_SUCCESS)
}

fn confirm(env_id: &str, is_tty: bool) -> Result<(), String> {
    if !is_tty {
        return Err(format!(
            "refusing to destroy {env_id} without confirmation (pass --no-confirm)"
        ));
    }
    let proceed = Confirm::new()
        .with_prompt(format!("destroy environment {env_id} and all of its resources?"))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    if proceed {
        Ok(())
    } else {
        Err("destroy cancelled".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_destroy_requires_flag() {
        let err = confirm("lake-tahoe", false).unwrap_err();
        assert!(err.contains("--no-confirm"));
        assert!(err.contains("lake-tahoe"));
    }
}
