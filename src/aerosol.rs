//! Aerosol populations and the physical state of the parcel at launch.

/// Populations with fewer particles than this (per cm³) are considered physically negligible.
pub const NEGLIGIBLE_NUMBER_CONCENTRATION: f64 = 0.01;

/// One chemically/physically distinct aerosol mode carried by the parcel.
///
/// Only [`AerosolPopulation::number_concentration`] is consulted when choosing a strategy; the
/// remaining fields are carried through for [`crate::ModelFactory`] and
/// [`crate::SupersaturationEstimate`] implementations.
#[derive(Clone, Debug, PartialEq)]
pub struct AerosolPopulation {
    /// Human-readable species label, e.g. `"sulfate"`.
    pub species: String,
    /// Total number concentration, particles per cm³.
    pub number_concentration: f64,
    /// Geometric mean radius of the lognormal size distribution, μm.
    pub mean_radius: f64,
    /// Geometric standard deviation of the lognormal size distribution.
    pub geometric_std_dev: f64,
    /// Hygroscopicity parameter κ.
    pub hygroscopicity: f64,
}

impl AerosolPopulation {
    /// Make a population with the given species label and number concentration, and a
    /// moderately hygroscopic accumulation-mode size distribution.
    pub fn new(species: impl Into<String>, number_concentration: f64) -> Self {
        Self {
            species: species.into(),
            number_concentration,
            mean_radius: 0.05,
            geometric_std_dev: 2.0,
            hygroscopicity: 0.54,
        }
    }

    /// Set the lognormal size distribution parameters.
    pub fn with_distribution(self, mean_radius: f64, geometric_std_dev: f64) -> Self {
        Self {
            mean_radius,
            geometric_std_dev,
            ..self
        }
    }

    /// Set the hygroscopicity parameter κ.
    pub fn with_hygroscopicity(self, hygroscopicity: f64) -> Self {
        Self {
            hygroscopicity,
            ..self
        }
    }

    pub fn is_negligible(&self) -> bool {
        self.number_concentration < NEGLIGIBLE_NUMBER_CONCENTRATION
    }
}

/// Initial physical conditions of the parcel. Immutable for the duration of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicalConditions {
    /// Updraft speed, m/s.
    pub updraft_speed: f64,
    /// Initial temperature, K.
    pub temperature: f64,
    /// Initial pressure, Pa.
    pub pressure: f64,
    /// Initial supersaturation, as a fraction (`0.0` is 100% relative humidity).
    pub initial_supersaturation: f64,
}

impl PhysicalConditions {
    /// Conditions with zero initial supersaturation.
    pub fn new(updraft_speed: f64, temperature: f64, pressure: f64) -> Self {
        Self {
            updraft_speed,
            temperature,
            pressure,
            initial_supersaturation: 0.,
        }
    }

    /// Set the initial supersaturation.
    pub fn with_initial_supersaturation(self, initial_supersaturation: f64) -> Self {
        Self {
            initial_supersaturation,
            ..self
        }
    }

    /// A parcel that isn't rising has a well-defined degenerate answer and is never integrated.
    ///
    /// Only a zero or negative updraft counts as not rising. A NaN updraft is passed on to the
    /// model, whose failure then shows up as the failure sentinel.
    pub fn has_updraft(&self) -> bool {
        self.updraft_speed > 0. || self.updraft_speed.is_nan()
    }
}

/// Result of screening the caller's populations for negligible members.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Screened {
    /// The input was a single population, and it is negligible. No run should be attempted.
    SoleNegligible,
    /// The populations to run with. May be empty if every member of a mixture was negligible.
    Retained(Vec<AerosolPopulation>),
}

/// Drop negligible populations.
///
/// A lone negligible population short-circuits the whole call, but a mixture merely loses its
/// negligible members, even if that leaves nothing behind. The asymmetry is deliberate and
/// preserved from the established driver behavior.
pub(crate) fn screen(populations: &[AerosolPopulation]) -> Screened {
    match populations {
        [only] if only.is_negligible() => Screened::SoleNegligible,
        _ => Screened::Retained(
            populations
                .iter()
                .filter(|population| !population.is_negligible())
                .cloned()
                .collect(),
        ),
    }
}
