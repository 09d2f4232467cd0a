//! Utilities for driving sets of parcel model integration strategies.
//!
//! Occasionally a pathological set of input parameters to an aerosol parcel model (very few
//! particles, a very weak updraft, stiff microphysical feedback) will derail the ODE solver
//! integrating it. When that happens it is useful to quietly adjust the numerical parameters of
//! the solver and resubmit the job. [`iterate_runs`] does exactly that, working down a
//! [`Ladder`] of solver configurations until one succeeds, and degrading to well-defined sentinel
//! values if none does. [`run_model`] is a shortcut for building and running a model once.
//!
//! The parcel physics are supplied by the caller through [`ModelFactory`]. The built-in
//! [`ExtrapolationModelFactory`] integrates any [`ParcelSystem`] with an adaptive
//! Bulirsch-Stoer stepper.
//!
//! As an example, consider a toy parcel whose supersaturation is forced by the updraft and
//! relaxed by condensation onto the aerosol:
//!
//! ```
//! use parcel_driver::{ArrayView1, ArrayViewMut1};
//!
//! struct ToyParcel {
//!     forcing: f64,
//!     uptake: f64,
//! }
//!
//! impl parcel_driver::RightHandSide for ToyParcel {
//!     type Float = f64;
//!
//!     fn evaluate(&self, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
//!         dydt[0] = self.forcing - self.uptake * y[0];
//!         dydt[1] = self.uptake * y[0];
//!     }
//! }
//!
//! impl parcel_driver::ParcelSystem for ToyParcel {
//!     fn initial_state(&self) -> ndarray::Array1<f64> {
//!         ndarray::array![0., 0.]
//!     }
//!     fn supersaturation_index(&self) -> usize {
//!         0
//!     }
//!     fn parcel_variable_count(&self) -> usize {
//!         1
//!     }
//!     fn variable_names(&self) -> Vec<String> {
//!         vec!["S".into(), "condensed".into()]
//!     }
//! }
//!
//! let factory = parcel_driver::ExtrapolationModelFactory::new(
//!     |populations: &[parcel_driver::AerosolPopulation],
//!      conditions: &parcel_driver::PhysicalConditions| {
//!         let total: f64 = populations.iter().map(|p| p.number_concentration).sum();
//!         Ok(ToyParcel {
//!             forcing: 2e-3 * conditions.updraft_speed,
//!             uptake: 1e-3 * total,
//!         })
//!     },
//! );
//!
//! // Two crude analytical estimates, reported alongside the integrated result.
//! let equilibrium = |conditions: &parcel_driver::PhysicalConditions,
//!                    populations: &[parcel_driver::AerosolPopulation]| {
//!     let total: f64 = populations.iter().map(|p| p.number_concentration).sum();
//!     parcel_driver::Estimate::new(2. * conditions.updraft_speed / total)
//! };
//! let no_uptake = |conditions: &parcel_driver::PhysicalConditions,
//!                  _: &[parcel_driver::AerosolPopulation]| {
//!     parcel_driver::Estimate::new(2e-3 * conditions.updraft_speed * 20.)
//! };
//!
//! let conditions = parcel_driver::PhysicalConditions::new(0.5, 283., 85000.);
//! let populations = [
//!     parcel_driver::AerosolPopulation::new("sulfate", 100.),
//!     // Negligible, so dropped before integrating.
//!     parcel_driver::AerosolPopulation::new("dust", 0.005),
//! ];
//! let orchestrator = parcel_driver::StrategyOrchestrator::default()
//!     .with_dt_base(0.5)
//!     .with_end_time(20.)
//!     .with_fail_fast(false);
//!
//! let result = parcel_driver::iterate_runs(
//!     &factory,
//!     &equilibrium,
//!     &no_uptake,
//!     &conditions,
//!     &populations,
//!     &orchestrator,
//! );
//!
//! let smax = result.primary.as_scalar().unwrap();
//! approx::assert_relative_eq!(smax, 1e-2 * (1. - (-2_f64).exp()), max_relative = 1e-3);
//! approx::assert_relative_eq!(result.estimate_a, 1e-2);
//! approx::assert_relative_eq!(result.estimate_b, 2e-2);
//! ```

mod aerosol;
mod backend;
mod estimate;
mod extrapolation;
mod ladder;
mod model;
mod orchestrator;
mod output;
mod runner;
mod solver;

pub use nd::{ArrayView1, ArrayViewMut1};
use ndarray as nd;

pub use aerosol::{AerosolPopulation, NEGLIGIBLE_NUMBER_CONCENTRATION, PhysicalConditions};
pub use backend::{
    ABSOLUTE_TOLERANCE, ExtrapolationModel, ExtrapolationModelFactory, MAX_OUTPUT_INTERVALS,
    MIN_STEP, ParcelSystem, RELATIVE_TOLERANCE,
};
pub use estimate::{Estimate, SupersaturationEstimate};
pub use extrapolation::{
    ExtrapolationStepper, Float, IntervalStats, RightHandSide, StepFailure, Tolerances,
};
pub use ladder::{
    Climbed, Exhausted, FAST_IMPLICIT_MAX_STEPS, FAST_IMPLICIT_WALL_CLOCK_LIMIT, Gate,
    LEGACY_STIFF_MAX_STEPS, Ladder, Rung,
};
pub use model::{Model, ModelError, ModelFactory};
pub use orchestrator::{OrchestrationResult, StrategyOrchestrator};
pub use output::{FAILURE_SENTINEL, OutputMode, Payload, Table};
pub use runner::{ModelRunner, RunOutcome};
pub use solver::{
    ExtraOptions, ITERATION_SCHEME, LINEAR_SOLVER, OptionValue, SolverConfiguration, SolverKind,
    WALL_CLOCK_LIMIT,
};

/// Build and run a parcel model once with the given solver configuration.
///
/// # Result
///
/// * `Some(Payload::Scalar(0.))` if the updraft is zero or negative; no model is built.
/// * `Some(payload)`, shaped per `output_mode`, if the model was built and integrated.
/// * `None` if the model failed to build or integrate.
pub fn run_model<F: ModelFactory>(
    factory: F,
    conditions: &PhysicalConditions,
    populations: &[AerosolPopulation],
    config: &SolverConfiguration,
    output_mode: OutputMode,
) -> Option<Payload> {
    if !conditions.has_updraft() {
        return Some(Payload::Scalar(0.));
    }
    ModelRunner::new(factory)
        .with_output_mode(output_mode)
        .attempt(conditions, populations, config)
        .into_payload()
}

/// Iterate through the strategies of `orchestrator` until the parcel model integrates.
///
/// Always produces a result; see [`StrategyOrchestrator::run`].
pub fn iterate_runs<F, A, B>(
    factory: F,
    estimate_a: &A,
    estimate_b: &B,
    conditions: &PhysicalConditions,
    populations: &[AerosolPopulation],
    orchestrator: &StrategyOrchestrator,
) -> OrchestrationResult
where
    F: ModelFactory,
    A: SupersaturationEstimate + ?Sized,
    B: SupersaturationEstimate + ?Sized,
{
    orchestrator.run(factory, estimate_a, estimate_b, conditions, populations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{Poisoned, Relaxation, Runaway};
    use crate::runner::testing::*;

    fn conditions(updraft_speed: f64) -> PhysicalConditions {
        PhysicalConditions::new(updraft_speed, 283., 85000.)
    }

    fn zero_estimate(_: &PhysicalConditions, _: &[AerosolPopulation]) -> Estimate {
        Estimate::default()
    }

    #[test]
    fn run_model_without_updraft_is_zero() {
        let factory = ScriptedFactory::new(always_succeeds);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 0.01, 1000, 500.);
        for mode in [
            OutputMode::Scalar,
            OutputMode::ArrayPair,
            OutputMode::TablePair,
        ] {
            let result = run_model(
                &factory,
                &conditions(0.),
                &[AerosolPopulation::new("sulfate", 100.)],
                &config,
                mode,
            );
            assert_eq!(result, Some(Payload::Scalar(0.)));
        }
        assert!(factory.builds.borrow().is_empty());
    }

    #[test]
    fn run_model_with_nan_updraft_fails_in_the_model() {
        let factory = ExtrapolationModelFactory::new(Relaxation::build);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 0.5, 1000, 10.);
        let result = run_model(
            &factory,
            &conditions(f64::NAN),
            &[AerosolPopulation::new("sulfate", 100.)],
            &config,
            OutputMode::Scalar,
        );
        assert_eq!(result, None);
    }

    #[test]
    fn run_model_failure_is_none() {
        let factory = ScriptedFactory::new(always_fails);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 0.01, 1000, 500.);
        let result = run_model(
            &factory,
            &conditions(0.5),
            &[AerosolPopulation::new("sulfate", 100.)],
            &config,
            OutputMode::Scalar,
        );
        assert_eq!(result, None);
    }

    #[test]
    fn run_model_success_is_the_payload() {
        let factory = ExtrapolationModelFactory::new(Relaxation::build);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 0.5, 1000, 10.);
        let smax = run_model(
            &factory,
            &conditions(0.5),
            &[AerosolPopulation::new("sulfate", 100.)],
            &config,
            OutputMode::Scalar,
        )
        .and_then(|payload| payload.as_scalar())
        .unwrap();
        let expected = Relaxation {
            forcing: Relaxation::FORCING_PER_UPDRAFT * 0.5,
            uptake: Relaxation::UPTAKE_PER_PARTICLE * 100.,
        }
        .supersaturation(10.);
        approx::assert_relative_eq!(smax, expected, max_relative = 1e-3);
    }

    #[test]
    fn iterate_runs_integrates_the_surviving_mixture() {
        let factory = ExtrapolationModelFactory::new(Relaxation::build);
        let orchestrator = StrategyOrchestrator::default()
            .with_dt_base(0.5)
            .with_end_time(20.)
            .with_output_mode(OutputMode::TablePair);
        let result = iterate_runs(
            &factory,
            &zero_estimate,
            &zero_estimate,
            &conditions(1.),
            &[
                AerosolPopulation::new("dust", 0.005),
                AerosolPopulation::new("sulfate", 50.),
            ],
            &orchestrator,
        );
        let Payload::TablePair { parcel, .. } = result.primary else {
            panic!("expected a table pair");
        };
        let expected = Relaxation {
            forcing: Relaxation::FORCING_PER_UPDRAFT,
            uptake: Relaxation::UPTAKE_PER_PARTICLE * 50.,
        }
        .supersaturation(20.);
        approx::assert_relative_eq!(
            parcel.column("S").unwrap()[40],
            expected,
            max_relative = 1e-3
        );
    }

    #[test]
    fn iterate_runs_exhausts_the_ladder_on_runaway_physics() {
        let factory =
            ExtrapolationModelFactory::new(|_: &[AerosolPopulation], _: &PhysicalConditions| {
                Ok(Runaway)
            });
        let orchestrator = StrategyOrchestrator::default()
            .with_dt_base(0.5)
            .with_end_time(5.)
            .with_fail_fast(false);
        let result = iterate_runs(
            &factory,
            &zero_estimate,
            &zero_estimate,
            &conditions(1.),
            &[AerosolPopulation::new("sulfate", 50.)],
            &orchestrator,
        );
        assert_eq!(result.primary, Payload::Scalar(FAILURE_SENTINEL));
    }

    #[test]
    fn deep_halving_ladders_end_in_the_sentinel() {
        let factory =
            ExtrapolationModelFactory::new(|_: &[AerosolPopulation], _: &PhysicalConditions| {
                Ok(Poisoned)
            });
        for mode in [OutputMode::Scalar, OutputMode::ArrayPair] {
            let orchestrator = StrategyOrchestrator::default()
                .with_dt_base(0.5)
                .with_dt_halvings(64)
                .with_end_time(5.)
                .with_output_mode(mode)
                .with_fail_fast(false);
            let result = iterate_runs(
                &factory,
                &zero_estimate,
                &zero_estimate,
                &conditions(1.),
                &[AerosolPopulation::new("sulfate", 50.)],
                &orchestrator,
            );
            assert_eq!(result.primary, Payload::failure(mode));
        }
    }

    #[test]
    fn run_model_refuses_an_unrepresentable_output_grid() {
        let factory = ExtrapolationModelFactory::new(Relaxation::build);
        let config = SolverConfiguration::new(SolverKind::RelaxedStep, 1e-300, 500, 500.);
        let result = run_model(
            &factory,
            &conditions(0.5),
            &[AerosolPopulation::new("sulfate", 100.)],
            &config,
            OutputMode::ArrayPair,
        );
        assert_eq!(result, None);
    }

    #[test]
    fn empty_mixture_fails_construction_and_reports_sentinel() {
        let factory = ExtrapolationModelFactory::new(Relaxation::build);
        let result = iterate_runs(
            &factory,
            &zero_estimate,
            &zero_estimate,
            &conditions(1.),
            &[
                AerosolPopulation::new("dust", 0.005),
                AerosolPopulation::new("sea salt", 0.005),
            ],
            &StrategyOrchestrator::default().with_end_time(1.),
        );
        assert_eq!(result.primary, Payload::Scalar(FAILURE_SENTINEL));
        assert_eq!(result.estimate_a, 0.);
    }
}
