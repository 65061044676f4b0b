use crate::outputs::Outputs;
use crate::provider::Provider;
use crate::CoreError;
use bosun_infra::{ApplyFailure, ApplyInput, Applier};
use bosun_schema::{InfraState, State};
use tracing::{debug, info};

/// Drives the declarative applier for an environment.
///
/// Both operations mutate `state` in place even when they fail: a failed run
/// records the partial state blob the applier reported and the captured tool
/// output, so the caller can checkpoint progress before surfacing the error.
pub struct InfraManager<'a> {
    applier: &'a dyn Applier,
}

impl<'a> InfraManager<'a> {
    pub fn new(applier: &'a dyn Applier) -> Self {
        Self { applier }
    }

    /// Applier input for the environment's current template.
    pub fn input(provider: &dyn Provider, state: &State) -> Result<ApplyInput, CoreError> {
        Ok(ApplyInput {
            template: provider.template(state.lbs.as_ref().map(|lbs| lbs.kind)),
            vars: provider.template_vars(state)?,
            credentials: provider.applier_credentials(state),
            prior_state: state.infra.state.clone(),
        })
    }

    fn record_failure(state: &mut State, failure: ApplyFailure) -> CoreError {
        state.infra.state = failure.state;
        state.infra.input_fingerprint = None;
        state.latest_error = failure.output;
        CoreError::Tool(failure.error)
    }

    /// Apply the template. Returns `false` when the recorded fingerprint shows
    /// nothing changed since the last successful apply.
    pub fn apply(
        &self,
        provider: &dyn Provider,
        state: &mut State,
        force: bool,
    ) -> Result<bool, CoreError> {
        let input = Self::input(provider, state)?;
        let fingerprint = input.fingerprint();
        if !force
            && !state.infra.is_empty()
            && state.infra.input_fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            debug!("infrastructure unchanged (fingerprint {})", &fingerprint[..12]);
            return Ok(false);
        }

        info!("applying {} infrastructure with {}", provider.iaas(), self.applier.name());
        let blob = self
            .applier
            .apply(&input)
            .map_err(|failure| Self::record_failure(state, failure))?;
        let outputs = match self.applier.outputs(&blob) {
            Ok(outputs) => outputs,
            Err(e) => {
                state.infra.state = blob;
                state.infra.input_fingerprint = None;
                return Err(e.into());
            }
        };

        let expected = provider.expected_outputs(state.lbs.as_ref().map(|lbs| lbs.kind));
        let missing = Outputs::new(&outputs).first_missing(&expected);
        // Outputs are replaced, never merged, so removed resources leave no keys behind.
        state.infra = InfraState {
            state: blob,
            outputs,
            input_fingerprint: missing.is_none().then_some(fingerprint),
        };
        if let Some(name) = missing {
            return Err(CoreError::MissingOutput {
                name: name.to_owned(),
            });
        }
        Ok(true)
    }

    /// Destroy everything in the state blob. A never-applied environment is a no-op.
    pub fn destroy(&self, provider: &dyn Provider, state: &mut State) -> Result<(), CoreError> {
        if state.infra.is_empty() {
            debug!("no declarative infrastructure to destroy");
            return Ok(());
        }
        let input = Self::input(provider, state)?;
        info!("destroying {} infrastructure", provider.iaas());
        let blob = self
            .applier
            .destroy(&input)
            .map_err(|failure| Self::record_failure(state, failure))?;
        let outputs = self.applier.outputs(&blob).unwrap_or_default();
        state.infra = InfraState {
            state: blob,
            outputs,
            input_fingerprint: None,
        };
        Ok(())
    }
}
