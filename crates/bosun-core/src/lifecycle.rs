use crate::CoreError;
use bosun_schema::InfraBackend;

/// Backend ownership changes allowed for an environment.
///
/// Legacy stacks are only ever left, never entered: a fresh environment goes
/// straight to the declarative applier.
pub fn validate_transition(from: InfraBackend, to: InfraBackend) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            InfraBackend::Unprovisioned | InfraBackend::LegacyStack | InfraBackend::Declarative,
            InfraBackend::Declarative
        ) | (
            InfraBackend::LegacyStack | InfraBackend::Declarative,
            InfraBackend::Unprovisioned
        ) | (InfraBackend::Unprovisioned, InfraBackend::Unprovisioned)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
