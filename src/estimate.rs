//! Analytical approximations of the maximum supersaturation, reported alongside each run.

use crate::aerosol::{AerosolPopulation, PhysicalConditions};

/// An analytical estimate of the maximum supersaturation a parcel attains.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Estimate {
    /// Estimated maximum supersaturation.
    pub smax: f64,
    /// Scheme-specific auxiliary output, e.g. the activated fraction of each population.
    pub detail: Vec<f64>,
}

impl Estimate {
    pub fn new(smax: f64) -> Self {
        Self {
            smax,
            detail: Vec::new(),
        }
    }

    pub fn with_detail(self, detail: Vec<f64>) -> Self {
        Self { detail, ..self }
    }
}

/// A pure activation parameterization.
///
/// Implementations must not depend on any integration having succeeded; they are evaluated for
/// every run that gets past the aerosol screening.
pub trait SupersaturationEstimate {
    fn estimate(
        &self,
        conditions: &PhysicalConditions,
        populations: &[AerosolPopulation],
    ) -> Estimate;
}

impl<F> SupersaturationEstimate for F
where
    F: Fn(&PhysicalConditions, &[AerosolPopulation]) -> Estimate,
{
    fn estimate(
        &self,
        conditions: &PhysicalConditions,
        populations: &[AerosolPopulation],
    ) -> Estimate {
        self(conditions, populations)
    }
}
