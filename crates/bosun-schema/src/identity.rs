use crate::config::ConfigError;
use crate::types::EnvId;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;

const MAX_ENV_NAME_LEN: usize = 40;

const LAKES: &[&str] = &[
    "superior",
    "michigan",
    "huron",
    "erie",
    "ontario",
    "tahoe",
    "baikal",
    "titicaca",
    "victoria",
    "tanganyika",
    "malawi",
    "ladoga",
    "onega",
    "garda",
    "como",
    "geneva",
    "constance",
    "bled",
    "louise",
    "crater",
];

/// Generate a fresh environment identifier of the form
/// `bosun-env-<lake>-<yyyy-mm-ddThh-mmZ>` (lowercased).
pub fn generate_env_id<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> EnvId {
    let lake = LAKES.choose(rng).copied().unwrap_or("erie");
    let stamp = now.format("%Y-%m-%dt%H-%Mz");
    EnvId::new(format!("bosun-env-{lake}-{stamp}"))
}

/// Validate a user-supplied environment name. Names end up in cloud resource
/// names, so they follow the strictest provider rules (GCP): a lowercase letter
/// followed by lowercase letters, digits and hyphens.
pub fn validate_env_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.len() > MAX_ENV_NAME_LEN {
        return Err(ConfigError::InvalidEnvName(format!(
            "'{name}' must be 1-{MAX_ENV_NAME_LEN} characters"
        )));
    }
    let mut bytes = name.bytes();
    let first_ok = bytes.next().is_some_and(|b| b.is_ascii_lowercase());
    let rest_ok = bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !first_ok || !rest_ok || name.ends_with('-') {
        return Err(ConfigError::InvalidEnvName(format!(
            "'{name}' must start with a lowercase letter and contain only [a-z0-9-]"
        )));
    }
    Ok(())
}

/// Random lowercase alphanumeric credential with a fixed prefix, e.g. `p-k2j9...`.
pub fn random_credential<R: Rng + ?Sized>(rng: &mut R, prefix: &str, len: usize) -> String {
    let body: String = rng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{prefix}{body}")
}
