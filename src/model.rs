//! The parcel model capability consumed by [`crate::ModelRunner`].

use crate::aerosol::{AerosolPopulation, PhysicalConditions};
use crate::output::{OutputMode, Payload};
use crate::solver::SolverConfiguration;

/// Expected, recoverable failure to build or integrate a parcel model.
///
/// Any of these causes the current strategy to be abandoned in favor of the next one.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("could not construct model: {0}")]
    Construction(String),
    #[error("step size {step_size:e} fell below the minimum at t = {time}")]
    StepSizeUnderflow { step_size: f64, time: f64 },
    #[error("exceeded {max_steps} internal steps before t = {time}")]
    TooManySteps { max_steps: usize, time: f64 },
    #[error("output step {step_size:e} over {end_time} s exceeds {limit} output intervals")]
    OutputGridTooFine {
        step_size: f64,
        end_time: f64,
        limit: usize,
    },
    #[error("exceeded wall clock limit of {limit} s at t = {time}")]
    WallClockExceeded { limit: f64, time: f64 },
    #[error("state became non-finite at t = {time}")]
    NonFinite { time: f64 },
    #[error("{0}")]
    Backend(String),
}

/// A constructed parcel model, ready to integrate.
pub trait Model {
    /// Integrate from the initial state to `config.end_time`, reporting results shaped per `mode`.
    fn integrate(
        &mut self,
        config: &SolverConfiguration,
        mode: OutputMode,
    ) -> Result<Payload, ModelError>;
}

/// Builds [`Model`]s from initial conditions.
pub trait ModelFactory {
    type Model: Model;

    /// Construct a model for a parcel carrying `populations` under `conditions`.
    fn build(
        &self,
        populations: &[AerosolPopulation],
        conditions: &PhysicalConditions,
    ) -> Result<Self::Model, ModelError>;
}
