//! Named integrator configurations handed to a [`crate::Model`].

use std::collections::BTreeMap;
use std::fmt;

/// Which integration scheme a backend should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolverKind {
    /// Fast implicit multistep scheme with tight tolerances. Tried first.
    FastImplicit,
    /// Automatically-switching scheme run with progressively smaller output steps.
    RelaxedStep,
    /// Last-ditch stiff scheme. Slow.
    LegacyStiff,
}

impl SolverKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::FastImplicit => "fast-implicit",
            Self::RelaxedStep => "relaxed-step",
            Self::LegacyStiff => "legacy-stiff",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A backend-specific option value.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Float(f64),
    Int(i64),
    Text(String),
    Flag(bool),
}

impl OptionValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Opaque options passed through to the backend verbatim.
pub type ExtraOptions = BTreeMap<String, OptionValue>;

/// Option key selecting the nonlinear iteration scheme.
pub const ITERATION_SCHEME: &str = "iterationScheme";
/// Option key for a wall-clock budget, in seconds.
pub const WALL_CLOCK_LIMIT: &str = "wallClockLimit";
/// Option key selecting the linear solver.
pub const LINEAR_SOLVER: &str = "linearSolver";

/// Everything a backend needs to know to attempt one integration.
///
/// A fresh value is built for every attempt; nothing is shared between attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfiguration {
    pub kind: SolverKind,
    /// Output time step, s.
    pub step_size: f64,
    /// Maximum number of internal steps per output step.
    pub max_steps: usize,
    /// Model time at which to stop, s.
    pub end_time: f64,
    pub extra_options: ExtraOptions,
}

impl SolverConfiguration {
    /// Make a configuration without extra options.
    ///
    /// # Panics
    ///
    /// If `step_size` or `end_time` isn't finite and positive, or `max_steps` is zero. These are
    /// programming errors, not solver failures.
    pub fn new(kind: SolverKind, step_size: f64, max_steps: usize, end_time: f64) -> Self {
        assert!(
            step_size.is_finite() && step_size > 0.,
            "step size must be finite and positive, got {step_size}"
        );
        assert!(
            end_time.is_finite() && end_time > 0.,
            "end time must be finite and positive, got {end_time}"
        );
        assert!(max_steps > 0, "max steps must be nonzero");
        Self {
            kind,
            step_size,
            max_steps,
            end_time,
            extra_options: ExtraOptions::new(),
        }
    }

    /// Add an extra backend option.
    pub fn with_extra_option(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.extra_options.insert(key.to_owned(), value.into());
        self
    }

    /// Replace all extra backend options.
    pub fn with_extra_options(self, extra_options: ExtraOptions) -> Self {
        Self {
            extra_options,
            ..self
        }
    }

    /// Look up an extra option as a float.
    pub fn extra_float(&self, key: &str) -> Option<f64> {
        self.extra_options.get(key).and_then(OptionValue::as_float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_options_pass_through() {
        let config = SolverConfiguration::new(SolverKind::FastImplicit, 0.01, 2000, 500.)
            .with_extra_option(ITERATION_SCHEME, "Newton")
            .with_extra_option(WALL_CLOCK_LIMIT, 10.)
            .with_extra_option("maxOrder", 5_i64);
        assert_eq!(
            config.extra_options[ITERATION_SCHEME].as_text(),
            Some("Newton")
        );
        assert_eq!(config.extra_float(WALL_CLOCK_LIMIT), Some(10.));
        assert_eq!(config.extra_float("maxOrder"), Some(5.));
        assert_eq!(config.extra_float(LINEAR_SOLVER), None);
    }

    #[test]
    fn solver_kinds_have_stable_names() {
        assert_eq!(SolverKind::FastImplicit.to_string(), "fast-implicit");
        assert_eq!(SolverKind::RelaxedStep.to_string(), "relaxed-step");
        assert_eq!(SolverKind::LegacyStiff.to_string(), "legacy-stiff");
    }

    #[test]
    #[should_panic(expected = "step size")]
    fn zero_step_size_is_a_contract_violation() {
        SolverConfiguration::new(SolverKind::RelaxedStep, 0., 500, 500.);
    }

    #[test]
    #[should_panic(expected = "end time")]
    fn nan_end_time_is_a_contract_violation() {
        SolverConfiguration::new(SolverKind::RelaxedStep, 0.01, 500, f64::NAN);
    }
}
