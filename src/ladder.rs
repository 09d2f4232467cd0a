//! The ordered list of integration strategies tried for each parcel.
//!
//! A [`Ladder`] is a table of [`Rung`]s, each a solver configuration plus a [`Gate`] deciding
//! whether it may be tried at all. Rungs are tried strictly in order and the first success wins;
//! later rungs are never attempted once one succeeds.

use crate::output::Payload;
use crate::runner::RunOutcome;
use crate::solver::{
    ITERATION_SCHEME, LINEAR_SOLVER, SolverConfiguration, SolverKind, WALL_CLOCK_LIMIT,
};

/// Internal step limit for the fast implicit rung.
pub const FAST_IMPLICIT_MAX_STEPS: usize = 2000;
/// Wall clock budget hint for the fast implicit rung, s.
pub const FAST_IMPLICIT_WALL_CLOCK_LIMIT: f64 = 10.;
/// Internal step limit for the legacy stiff rung.
pub const LEGACY_STIFF_MAX_STEPS: usize = 1000;

/// Whether a rung may be attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Always,
    /// Skipped when the caller asked to give up after the first failure.
    UnlessFailFast,
}

impl Gate {
    pub fn permits(self, fail_fast: bool) -> bool {
        match self {
            Self::Always => true,
            Self::UnlessFailFast => !fail_fast,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rung {
    pub config: SolverConfiguration,
    pub gate: Gate,
}

/// The rung that produced a result.
#[derive(Clone, Debug, PartialEq)]
pub struct Climbed {
    /// Position of the successful rung in the ladder.
    pub index: usize,
    pub kind: SolverKind,
    pub step_size: f64,
    pub payload: Payload,
}

/// Every permitted rung failed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exhausted {
    /// Number of rungs attempted.
    pub attempts: usize,
    /// Output step size of the last rung attempted, if any was.
    pub last_step_size: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ladder {
    rungs: Vec<Rung>,
}

impl Ladder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard ladder:
    ///
    /// 1. The fast implicit solver, with Newton iteration and a dense linear solver.
    /// 2. The relaxed-step solver, once at each of `dt_base, dt_base / 2, ...,
    ///    dt_base / 2^(dt_halvings - 1)`. Step sizes that underflow to zero are left out.
    /// 3. The legacy stiff solver at `dt_base`. This is likely to take a long time.
    ///
    /// Only the first rung is tried when failing fast.
    pub fn standard(dt_base: f64, dt_halvings: u32, end_time: f64, max_steps: usize) -> Self {
        let fast_implicit = SolverConfiguration::new(
            SolverKind::FastImplicit,
            dt_base,
            FAST_IMPLICIT_MAX_STEPS,
            end_time,
        )
        .with_extra_option(ITERATION_SCHEME, "Newton")
        .with_extra_option(WALL_CLOCK_LIMIT, FAST_IMPLICIT_WALL_CLOCK_LIMIT)
        .with_extra_option(LINEAR_SOLVER, "dense");
        let mut ladder = Self::new().with_rung(fast_implicit, Gate::Always);

        let relaxed_step_sizes = core::iter::successors(Some(dt_base), |step| Some(step / 2.))
            .take(usize::try_from(dt_halvings).unwrap_or(usize::MAX))
            .take_while(|&step_size| step_size > 0.);
        for step_size in relaxed_step_sizes {
            ladder = ladder.with_rung(
                SolverConfiguration::new(SolverKind::RelaxedStep, step_size, max_steps, end_time),
                Gate::UnlessFailFast,
            );
        }

        ladder.with_rung(
            SolverConfiguration::new(
                SolverKind::LegacyStiff,
                dt_base,
                LEGACY_STIFF_MAX_STEPS,
                end_time,
            ),
            Gate::UnlessFailFast,
        )
    }

    /// Append a rung.
    pub fn with_rung(mut self, config: SolverConfiguration, gate: Gate) -> Self {
        self.rungs.push(Rung { config, gate });
        self
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    /// Try each permitted rung in order until one succeeds.
    ///
    /// Returns [`Exhausted`] if every permitted rung failed.
    pub fn climb<A>(&self, fail_fast: bool, mut attempt: A) -> Result<Climbed, Exhausted>
    where
        A: FnMut(&SolverConfiguration) -> RunOutcome,
    {
        let mut previous_kind = None;
        let mut exhausted = Exhausted {
            attempts: 0,
            last_step_size: None,
        };
        for (index, rung) in self.rungs.iter().enumerate() {
            if !rung.gate.permits(fail_fast) {
                continue;
            }
            let config = &rung.config;
            if previous_kind == Some(config.kind) {
                log::info!("    retrying...");
            }
            log::info!(
                "trying {}, dt = {:.3e}, max_steps = {}",
                config.kind,
                config.step_size,
                config.max_steps
            );
            previous_kind = Some(config.kind);
            exhausted.attempts += 1;
            exhausted.last_step_size = Some(config.step_size);

            if let RunOutcome::Success(payload) = attempt(config) {
                return Ok(Climbed {
                    index,
                    kind: config.kind,
                    step_size: config.step_size,
                    payload,
                });
            }
        }
        Err(exhausted)
    }
}
