use super::EXIT_SUCCESS;
use bosun_core::Engine;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let env = engine.print_env().map_err(|e| e.to_string())?;

    // The proxy URL needs the jumpbox key on disk.
    let key_path = match &env.jumpbox {
        Some(jumpbox) => {
            let path = engine.layout().jumpbox_key_file();
            write_private_key(&path, &jumpbox.private_key)?;
            Some(path)
        }
        None => None,
    };

    if json {
        let payload = serde_json::json!({
            "BOSH_CLIENT": env.client,
            "BOSH_CLIENT_SECRET": env.client_secret,
            "BOSH_CA_CERT": env.ca_cert,
            "BOSH_ENVIRONMENT": env.environment,
            "BOSH_ALL_PROXY": env.jumpbox.as_ref().zip(key_path.as_ref()).map(|(j, p)| {
                format!("ssh+socks5://jumpbox@{}?private-key={}", j.url, p.display())
            }),
        });
        println!("{payload}");
    } else {
        print!("{}", env.render(key_path.as_deref()));
    }
    Ok(EXIT_SUCCESS)
}

/// Write `key` readable by the owner only, replacing any previous file.
fn write_private_key(dest: &Path, key: &str) -> Result<(), String> {
    let dir = dest
        .parent()
        .ok_or_else(|| format!("invalid key path: {}", dest.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(0o600))
        .map_err(|e| format!("chmod temp file: {e}"))?;
    tmp.write_all(key.as_bytes())
        .map_err(|e| format!("write temp file: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("fsync temp file: {e}"))?;
    tmp.persist(dest)
        .map_err(|e| format!("persist jumpbox key: {}", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(".bosun-jumpbox.key");
        write_private_key(&dest, "KEY").unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "KEY");
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn private_key_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(".bosun-jumpbox.key");
        write_private_key(&dest, "OLD").unwrap();
        write_private_key(&dest, "NEW").unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "NEW");
    }
}
