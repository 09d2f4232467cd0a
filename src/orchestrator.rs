//! Driving a parcel model through the strategy ladder.

use crate::aerosol::{AerosolPopulation, PhysicalConditions, Screened, screen};
use crate::estimate::SupersaturationEstimate;
use crate::ladder::{Exhausted, Ladder};
use crate::model::ModelFactory;
use crate::output::{FAILURE_SENTINEL, OutputMode, Payload};
use crate::runner::ModelRunner;

/// The primary result of a parcel run together with two analytical reference estimates.
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestrationResult {
    /// Output of the first successful integration strategy, or a zero/sentinel value.
    pub primary: Payload,
    /// Maximum supersaturation from the first analytical estimate.
    pub estimate_a: f64,
    /// Maximum supersaturation from the second analytical estimate.
    pub estimate_b: f64,
}

impl OrchestrationResult {
    fn degenerate_updraft(mode: OutputMode) -> Self {
        Self {
            primary: Payload::zero(mode),
            estimate_a: 0.,
            estimate_b: 0.,
        }
    }

    fn negligible_aerosol() -> Self {
        Self {
            primary: Payload::Scalar(FAILURE_SENTINEL),
            estimate_a: FAILURE_SENTINEL,
            estimate_b: FAILURE_SENTINEL,
        }
    }
}

/// Tries a sequence of integration strategies for a parcel, quietly adjusting the numerical
/// parameters until one of them works.
///
/// Never fails: non-rising parcels, negligible aerosol, and exhaustion of every strategy each
/// resolve to a well-defined value. See [`Ladder::standard`] for the strategies tried.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyOrchestrator {
    dt_base: f64,
    dt_halvings: u32,
    end_time: f64,
    max_steps: usize,
    output_mode: OutputMode,
    fail_fast: bool,
}

impl Default for StrategyOrchestrator {
    fn default() -> Self {
        Self {
            dt_base: 0.01,
            dt_halvings: 2,
            end_time: 500.,
            max_steps: 500,
            output_mode: OutputMode::Scalar,
            fail_fast: true,
        }
    }
}

impl StrategyOrchestrator {
    /// Set the base output time step, s.
    pub fn with_dt_base(self, dt_base: f64) -> Self {
        assert!(
            dt_base.is_finite() && dt_base > 0.,
            "base time step must be finite and positive, got {dt_base}"
        );
        Self { dt_base, ..self }
    }

    /// Set how many times the relaxed-step solver's output step may be halved.
    pub fn with_dt_halvings(self, dt_halvings: u32) -> Self {
        Self {
            dt_halvings,
            ..self
        }
    }

    /// Set the model time at which integration stops, s.
    pub fn with_end_time(self, end_time: f64) -> Self {
        assert!(
            end_time.is_finite() && end_time > 0.,
            "end time must be finite and positive, got {end_time}"
        );
        Self { end_time, ..self }
    }

    /// Set the maximum number of internal steps per output step for the relaxed-step solver.
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        assert!(max_steps > 0, "max steps must be nonzero");
        Self { max_steps, ..self }
    }

    pub fn with_output_mode(self, output_mode: OutputMode) -> Self {
        Self {
            output_mode,
            ..self
        }
    }

    /// If set, give up after the first strategy fails.
    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        Self { fail_fast, ..self }
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// The strategies this orchestrator tries, built fresh.
    pub fn ladder(&self) -> Ladder {
        Ladder::standard(self.dt_base, self.dt_halvings, self.end_time, self.max_steps)
    }

    /// Run a parcel through the strategy ladder.
    ///
    /// # Arguments
    ///
    /// * `factory`: Builds the parcel model for each attempt.
    /// * `estimate_a`, `estimate_b`: Analytical estimates reported alongside the primary result.
    ///   Evaluated on the screened populations whenever the aerosol screening passes, regardless
    ///   of whether any integration succeeds.
    /// * `conditions`: Initial parcel conditions.
    /// * `populations`: Aerosol populations carried by the parcel. Never modified.
    pub fn run<F, A, B>(
        &self,
        factory: F,
        estimate_a: &A,
        estimate_b: &B,
        conditions: &PhysicalConditions,
        populations: &[AerosolPopulation],
    ) -> OrchestrationResult
    where
        F: ModelFactory,
        A: SupersaturationEstimate + ?Sized,
        B: SupersaturationEstimate + ?Sized,
    {
        if !conditions.has_updraft() {
            log::debug!(
                "updraft speed {} is not positive, skipping integration",
                conditions.updraft_speed
            );
            return OrchestrationResult::degenerate_updraft(self.output_mode);
        }

        let populations = match screen(populations) {
            Screened::SoleNegligible => {
                log::debug!("sole aerosol population is negligible, skipping integration");
                return OrchestrationResult::negligible_aerosol();
            }
            Screened::Retained(populations) => populations,
        };

        let estimate_a = estimate_a.estimate(conditions, &populations).smax;
        let estimate_b = estimate_b.estimate(conditions, &populations).smax;

        let runner = ModelRunner::new(factory).with_output_mode(self.output_mode);
        let climbed = self.ladder().climb(self.fail_fast, |config| {
            runner.attempt(conditions, &populations, config)
        });

        let primary = match climbed {
            Ok(climbed) => climbed.payload,
            Err(exhausted) => {
                log::warn!("{}", exhaustion_notice(conditions, &exhausted));
                Payload::failure(self.output_mode)
            }
        };

        OrchestrationResult {
            primary,
            estimate_a,
            estimate_b,
        }
    }
}

fn exhaustion_notice(conditions: &PhysicalConditions, exhausted: &Exhausted) -> String {
    match exhausted.last_step_size {
        Some(step_size) => format!(
            "all {} strategies failed, V = {}, dt = {step_size:e}",
            exhausted.attempts, conditions.updraft_speed
        ),
        None => format!("no strategies permitted, V = {}", conditions.updraft_speed),
    }
}
