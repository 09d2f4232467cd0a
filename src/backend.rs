//! A [`Model`] that integrates any user-supplied parcel ODE system by extrapolation.
//!
//! All three [`SolverKind`]s are realized with the same adaptive Bulirsch-Stoer stepper, each
//! under its own tolerance profile. The extra options `rtol` and `atol` override the profile,
//! `minStep` sets the smallest substep allowed, and [`WALL_CLOCK_LIMIT`] bounds the run time.
//! Output grids with more than [`MAX_OUTPUT_INTERVALS`] intervals are refused before any
//! integrating is done.

use std::time::Instant;

use ndarray as nd;

use crate::aerosol::{AerosolPopulation, PhysicalConditions};
use crate::extrapolation::{ExtrapolationStepper, RightHandSide, StepFailure};
use crate::model::{Model, ModelError, ModelFactory};
use crate::output::{OutputMode, Payload, Table};
use crate::solver::{SolverConfiguration, SolverKind, WALL_CLOCK_LIMIT};

/// Option key overriding the relative tolerance.
pub const RELATIVE_TOLERANCE: &str = "rtol";
/// Option key overriding the absolute tolerance.
pub const ABSOLUTE_TOLERANCE: &str = "atol";
/// Option key setting the smallest allowed substep, s.
pub const MIN_STEP: &str = "minStep";

const DEFAULT_MIN_STEP: f64 = 1e-9;

/// Most output intervals a single run may span.
pub const MAX_OUTPUT_INTERVALS: usize = 1_000_000;

/// The physics of a parcel, as an ODE system.
///
/// The state vector holds the parcel variables first, followed by the aerosol variables.
pub trait ParcelSystem: RightHandSide<Float = f64> {
    fn initial_state(&self) -> nd::Array1<f64>;

    /// Position of the supersaturation in the state vector. Must be a parcel variable.
    fn supersaturation_index(&self) -> usize;

    fn parcel_variable_count(&self) -> usize;

    /// Names of every state variable, in state vector order.
    fn variable_names(&self) -> Vec<String>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Profile {
    rel_tol: f64,
    abs_tol: f64,
    target_depth: usize,
    max_depth: usize,
}

impl Profile {
    fn for_config(config: &SolverConfiguration) -> Self {
        let profile = match config.kind {
            SolverKind::FastImplicit => Self {
                rel_tol: 1e-7,
                abs_tol: 1e-10,
                target_depth: 4,
                max_depth: 8,
            },
            SolverKind::RelaxedStep => Self {
                rel_tol: 1e-5,
                abs_tol: 1e-8,
                target_depth: 3,
                max_depth: 8,
            },
            SolverKind::LegacyStiff => Self {
                rel_tol: 1e-4,
                abs_tol: 1e-6,
                target_depth: 5,
                max_depth: 12,
            },
        };
        Self {
            rel_tol: config
                .extra_float(RELATIVE_TOLERANCE)
                .unwrap_or(profile.rel_tol),
            abs_tol: config
                .extra_float(ABSOLUTE_TOLERANCE)
                .unwrap_or(profile.abs_tol),
            ..profile
        }
    }
}

pub struct ExtrapolationModel<S> {
    system: S,
}

impl<S: ParcelSystem> ExtrapolationModel<S> {
    /// # Panics
    ///
    /// If the system's variable layout is inconsistent with its initial state.
    pub fn new(system: S) -> Self {
        let num_variables = system.initial_state().len();
        let num_parcel = system.parcel_variable_count();
        assert!(num_parcel <= num_variables);
        assert!(system.supersaturation_index() < num_parcel);
        assert_eq!(system.variable_names().len(), num_variables);
        Self { system }
    }

    /// Integrate to `config.end_time`, handing the state at every output time to `recording`.
    fn integrate_into(
        &self,
        config: &SolverConfiguration,
        recording: &mut Recording,
    ) -> Result<(), ModelError> {
        let num_intervals = output_intervals(config)?;
        let profile = Profile::for_config(config);
        let mut stepper = ExtrapolationStepper::default()
            .with_tolerances(profile.abs_tol, profile.rel_tol)
            .with_depths(profile.target_depth, profile.max_depth)
            .with_min_step_size(config.extra_float(MIN_STEP).unwrap_or(DEFAULT_MIN_STEP))
            .with_max_substeps(config.max_steps);
        let wall_clock_limit = config.extra_float(WALL_CLOCK_LIMIT);
        let started = Instant::now();

        let mut y = self.system.initial_state();
        let mut y_next = nd::Array1::zeros(y.raw_dim());
        recording.record(y.view())?;

        let mut time = 0.;
        for i in 0..num_intervals {
            let next_time = ((i + 1) as f64 * config.step_size).min(config.end_time);
            stepper
                .advance(&self.system, next_time - time, y.view(), y_next.view_mut())
                .map_err(|failure| match failure {
                    StepFailure::Underflow { step_size, elapsed } => {
                        ModelError::StepSizeUnderflow {
                            step_size,
                            time: time + elapsed,
                        }
                    }
                    StepFailure::TooManySubsteps { limit, elapsed } => ModelError::TooManySteps {
                        max_steps: limit,
                        time: time + elapsed,
                    },
                })?;
            if !y_next.iter().all(|value| value.is_finite()) {
                return Err(ModelError::NonFinite { time: next_time });
            }
            recording.record(y_next.view())?;
            core::mem::swap(&mut y, &mut y_next);
            time = next_time;

            if let Some(limit) = wall_clock_limit {
                if started.elapsed().as_secs_f64() >= limit {
                    return Err(ModelError::WallClockExceeded { limit, time });
                }
            }
        }

        Ok(())
    }
}

impl<S: ParcelSystem> Model for ExtrapolationModel<S> {
    fn integrate(
        &mut self,
        config: &SolverConfiguration,
        mode: OutputMode,
    ) -> Result<Payload, ModelError> {
        let num_variables = self.system.variable_names().len();
        let mut recording = match mode {
            OutputMode::Scalar => Recording::Maximum {
                index: self.system.supersaturation_index(),
                value: f64::NEG_INFINITY,
            },
            OutputMode::ArrayPair | OutputMode::TablePair => {
                Recording::Rows(nd::Array2::zeros((0, num_variables)))
            }
        };
        self.integrate_into(config, &mut recording)?;

        let rows = match recording {
            Recording::Maximum { value, .. } => return Ok(Payload::Scalar(value)),
            Recording::Rows(rows) => rows,
        };
        let num_parcel = self.system.parcel_variable_count();
        let parcel = rows.slice(nd::s![.., ..num_parcel]).to_owned();
        let aerosol = rows.slice(nd::s![.., num_parcel..]).to_owned();

        Ok(match mode {
            OutputMode::TablePair => {
                let mut names = self.system.variable_names();
                let aerosol_names = names.split_off(num_parcel);
                Payload::TablePair {
                    parcel: Table::new(names, parcel),
                    aerosol: Table::new(aerosol_names, aerosol),
                }
            }
            _ => Payload::ArrayPair { parcel, aerosol },
        })
    }
}

/// What is kept of the trajectory while integrating.
enum Recording {
    /// Only the running maximum of one variable.
    Maximum { index: usize, value: f64 },
    /// Every state, one row per output time.
    Rows(nd::Array2<f64>),
}

impl Recording {
    fn record(&mut self, y: nd::ArrayView1<f64>) -> Result<(), ModelError> {
        match self {
            Self::Maximum { index, value } => {
                *value = value.max(y[*index]);
                Ok(())
            }
            Self::Rows(rows) => rows
                .push_row(y)
                .map_err(|err| ModelError::Backend(err.to_string())),
        }
    }
}

/// Number of output intervals in `[0, end_time]`, refusing grids finer than
/// [`MAX_OUTPUT_INTERVALS`].
fn output_intervals(config: &SolverConfiguration) -> Result<usize, ModelError> {
    let intervals = (config.end_time / config.step_size).ceil();
    if intervals.is_finite() && intervals <= MAX_OUTPUT_INTERVALS as f64 {
        Ok((intervals as usize).max(1))
    } else {
        Err(ModelError::OutputGridTooFine {
            step_size: config.step_size,
            end_time: config.end_time,
            limit: MAX_OUTPUT_INTERVALS,
        })
    }
}

/// Builds [`ExtrapolationModel`]s using a closure that sets up the parcel physics.
pub struct ExtrapolationModelFactory<B> {
    build: B,
}

impl<B> ExtrapolationModelFactory<B> {
    pub fn new<S>(build: B) -> Self
    where
        B: Fn(&[AerosolPopulation], &PhysicalConditions) -> Result<S, ModelError>,
        S: ParcelSystem,
    {
        Self { build }
    }
}

impl<B, S> ModelFactory for ExtrapolationModelFactory<B>
where
    B: Fn(&[AerosolPopulation], &PhysicalConditions) -> Result<S, ModelError>,
    S: ParcelSystem,
{
    type Model = ExtrapolationModel<S>;

    fn build(
        &self,
        populations: &[AerosolPopulation],
        conditions: &PhysicalConditions,
    ) -> Result<Self::Model, ModelError> {
        (self.build)(populations, conditions).map(ExtrapolationModel::new)
    }
}

impl<B, S> ModelFactory for &ExtrapolationModelFactory<B>
where
    B: Fn(&[AerosolPopulation], &PhysicalConditions) -> Result<S, ModelError>,
    S: ParcelSystem,
{
    type Model = ExtrapolationModel<S>;

    fn build(
        &self,
        populations: &[AerosolPopulation],
        conditions: &PhysicalConditions,
    ) -> Result<Self::Model, ModelError> {
        (**self).build(populations, conditions)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Toy parcel physics with closed-form solutions.

    use super::*;
    use crate::extrapolation::{ArrayView1, ArrayViewMut1};

    /// Supersaturation forced by the updraft and relaxed by condensation onto the aerosol:
    /// `dS/dt = a V - k S`, `dq/dt = k S`, with `k` proportional to the number concentration.
    pub struct Relaxation {
        pub forcing: f64,
        pub uptake: f64,
    }

    impl Relaxation {
        pub const FORCING_PER_UPDRAFT: f64 = 2e-3;
        pub const UPTAKE_PER_PARTICLE: f64 = 1e-3;

        pub fn build(
            populations: &[AerosolPopulation],
            conditions: &PhysicalConditions,
        ) -> Result<Self, ModelError> {
            if populations.is_empty() {
                return Err(ModelError::Construction("no aerosol".into()));
            }
            let total: f64 = populations.iter().map(|p| p.number_concentration).sum();
            Ok(Self {
                forcing: Self::FORCING_PER_UPDRAFT * conditions.updraft_speed,
                uptake: Self::UPTAKE_PER_PARTICLE * total,
            })
        }

        pub fn supersaturation(&self, t: f64) -> f64 {
            self.forcing / self.uptake * (1. - (-self.uptake * t).exp())
        }
    }

    impl RightHandSide for Relaxation {
        type Float = f64;

        fn evaluate(&self, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
            dydt[0] = self.forcing - self.uptake * y[0];
            dydt[1] = self.uptake * y[0];
        }
    }

    impl ParcelSystem for Relaxation {
        fn initial_state(&self) -> nd::Array1<f64> {
            nd::array![0., 0.]
        }

        fn supersaturation_index(&self) -> usize {
            0
        }

        fn parcel_variable_count(&self) -> usize {
            1
        }

        fn variable_names(&self) -> Vec<String> {
            vec!["S".into(), "condensed".into()]
        }
    }

    /// `dS/dt = S²`, which blows up at `t = 1 / S0`.
    pub struct Runaway;

    impl RightHandSide for Runaway {
        type Float = f64;

        fn evaluate(&self, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
            dydt[0] = y[0] * y[0];
        }
    }

    impl ParcelSystem for Runaway {
        fn initial_state(&self) -> nd::Array1<f64> {
            nd::array![1.]
        }

        fn supersaturation_index(&self) -> usize {
            0
        }

        fn parcel_variable_count(&self) -> usize {
            1
        }

        fn variable_names(&self) -> Vec<String> {
            vec!["S".into()]
        }
    }

    /// Physics that evaluate to NaN everywhere.
    pub struct Poisoned;

    impl RightHandSide for Poisoned {
        type Float = f64;

        fn evaluate(&self, _: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
            dydt.fill(f64::NAN);
        }
    }

    impl ParcelSystem for Poisoned {
        fn initial_state(&self) -> nd::Array1<f64> {
            nd::array![0.]
        }

        fn supersaturation_index(&self) -> usize {
            0
        }

        fn parcel_variable_count(&self) -> usize {
            1
        }

        fn variable_names(&self) -> Vec<String> {
            vec!["S".into()]
        }
    }
}
