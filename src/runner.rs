//! A single attempt at building and integrating a model.

use crate::aerosol::{AerosolPopulation, PhysicalConditions};
use crate::model::{Model, ModelFactory};
use crate::output::{OutputMode, Payload};
use crate::solver::SolverConfiguration;

/// The outcome of one integration attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Success(Payload),
    Failure,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Success(payload) => Some(payload),
            Self::Failure => None,
        }
    }
}

/// Builds a model and integrates it once with one solver configuration.
///
/// Every [`crate::ModelError`] is absorbed into [`RunOutcome::Failure`]; retry policy lives in
/// [`crate::StrategyOrchestrator`]. The caller is responsible for checking that the parcel has
/// a positive updraft speed first.
#[derive(Clone, Debug)]
pub struct ModelRunner<F> {
    factory: F,
    output_mode: OutputMode,
}

impl<F: ModelFactory> ModelRunner<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            output_mode: OutputMode::default(),
        }
    }

    /// Set the output mode requested from the model.
    pub fn with_output_mode(self, output_mode: OutputMode) -> Self {
        Self {
            output_mode,
            ..self
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Make one attempt.
    ///
    /// # Panics
    ///
    /// If the model reports success with a payload that doesn't match the requested output mode.
    pub fn attempt(
        &self,
        conditions: &PhysicalConditions,
        populations: &[AerosolPopulation],
        config: &SolverConfiguration,
    ) -> RunOutcome {
        let result = self
            .factory
            .build(populations, conditions)
            .and_then(|mut model| model.integrate(config, self.output_mode));
        match result {
            Ok(payload) => {
                assert_eq!(
                    payload.mode(),
                    self.output_mode,
                    "model returned a payload in the wrong output mode"
                );
                RunOutcome::Success(payload)
            }
            Err(err) => {
                log::debug!("{} attempt failed: {err}", config.kind);
                RunOutcome::Failure
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::solver::SolverKind;

    fn conditions() -> PhysicalConditions {
        PhysicalConditions::new(0.5, 283., 85000.)
    }

    #[test]
    fn success_carries_the_payload() {
        let factory = ScriptedFactory::new(always_succeeds);
        let runner = ModelRunner::new(&factory);
        let config = SolverConfiguration::new(SolverKind::FastImplicit, 0.01, 2000, 500.);
        let outcome = runner.attempt(
            &conditions(),
            &[crate::AerosolPopulation::new("sulfate", 100.)],
            &config,
        );
        assert_eq!(outcome, RunOutcome::Success(Payload::Scalar(0.4)));
        assert_eq!(*factory.attempts.borrow(), vec![config]);
    }

    #[test]
    fn integration_errors_become_failures() {
        let factory = ScriptedFactory::new(always_fails);
        let runner = ModelRunner::new(&factory).with_output_mode(OutputMode::ArrayPair);
        let config = SolverConfiguration::new(SolverKind::LegacyStiff, 0.01, 1000, 500.);
        let outcome = runner.attempt(
            &conditions(),
            &[crate::AerosolPopulation::new("sulfate", 100.)],
            &config,
        );
        assert_eq!(outcome, RunOutcome::Failure);
    }

    #[test]
    fn construction_errors_become_failures() {
        let mut factory = ScriptedFactory::new(always_succeeds);
        factory.fail_construction = true;
        let runner = ModelRunner::new(&factory);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 0.01, 500, 500.);
        let outcome = runner.attempt(
            &conditions(),
            &[crate::AerosolPopulation::new("sulfate", 100.)],
            &config,
        );
        assert_eq!(outcome, RunOutcome::Failure);
        assert!(factory.attempts.borrow().is_empty());
    }

    #[test]
    fn payload_follows_the_requested_mode() {
        let factory = ScriptedFactory::new(always_succeeds);
        let runner = ModelRunner::new(&factory).with_output_mode(OutputMode::TablePair);
        let config = SolverConfiguration::new(SolverKind::FastImplicit, 0.01, 2000, 500.);
        let payload = runner
            .attempt(
                &conditions(),
                &[crate::AerosolPopulation::new("sulfate", 100.)],
                &config,
            )
            .into_payload()
            .unwrap();
        assert_eq!(payload.mode(), OutputMode::TablePair);
    }
}
