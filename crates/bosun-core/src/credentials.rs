use crate::CoreError;
use bosun_schema::{Iaas, State};

/// Every missing credential field for the state's IAAS, in flag order.
pub fn missing_credentials(state: &State) -> Vec<String> {
    let Some(iaas) = state.iaas else {
        return vec!["iaas".to_owned()];
    };
    let fields: Vec<(&str, &str)> = match iaas {
        Iaas::Aws => vec![
            ("aws access key id", state.aws.access_key_id.as_str()),
            ("aws secret access key", state.aws.secret_access_key.as_str()),
            ("aws region", state.aws.region.as_str()),
        ],
        Iaas::Gcp => vec![
            ("gcp service account key", state.gcp.service_account_key.as_str()),
            ("gcp project id", state.gcp.project_id.as_str()),
            ("gcp region", state.gcp.region.as_str()),
            ("gcp zone", state.gcp.zone.as_str()),
        ],
        Iaas::Azure => vec![
            ("azure subscription id", state.azure.subscription_id.as_str()),
            ("azure tenant id", state.azure.tenant_id.as_str()),
            ("azure client id", state.azure.client_id.as_str()),
            ("azure client secret", state.azure.client_secret.as_str()),
            ("azure location", state.azure.location.as_str()),
        ],
    };
    fields
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_owned())
        .collect()
}

pub fn validate_credentials(state: &State) -> Result<(), CoreError> {
    let missing = missing_credentials(state);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::MissingCredentials(missing))
    }
}
