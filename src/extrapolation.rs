//! Adaptive (Gragg-)Bulirsch-Stoer stepping for the built-in backend.
//!
//! Each substep combines the modified midpoint method with Richardson extrapolation; the substep
//! size is adapted between substeps to keep the scaled truncation error near one at a target
//! extrapolation depth. There is no order control. The implementation follows:
//! * Press, William H. Numerical Recipes 3rd Edition: The Art of Scientific Computing. Cambridge
//!   University Press, 2007. Ch. 17.3.2.
//! * Deuflhard, Peter. "Order and stepsize control in extrapolation methods." Numerische Mathematik
//!   41 (1983): 399-422.

use ndarray as nd;
use num_traits::cast;

pub use nd::{ArrayView1, ArrayViewMut1};

pub trait Float:
    num_traits::Float
    + core::iter::Sum
    + core::ops::AddAssign
    + core::ops::MulAssign
    + core::fmt::Debug
    + nd::ScalarOperand
{
}

impl Float for f32 {}
impl Float for f64 {}

/// A time-independent ordinary differential equation system.
pub trait RightHandSide {
    type Float: Float;

    /// Evaluate the derivative of `y` and store it in `dydt`.
    fn evaluate(&self, y: ArrayView1<Self::Float>, dydt: ArrayViewMut1<Self::Float>);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances<F> {
    pub abs: F,
    pub rel: F,
}

/// Why an interval could not be completed.
#[derive(Clone, Debug, PartialEq)]
pub enum StepFailure<F> {
    /// The substep size collapsed below the minimum, or became non-finite.
    Underflow { step_size: F, elapsed: F },
    /// More substeps were attempted than allowed for a single interval.
    TooManySubsteps { limit: usize, elapsed: F },
}

/// Work done to complete one interval.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntervalStats {
    /// Substeps attempted, including rejected ones.
    pub num_substeps: usize,
    pub num_evaluations: usize,
}

#[derive(Clone, Debug)]
pub struct ExtrapolationStepper<F: Float> {
    tolerances: Tolerances<F>,
    /// Extrapolation depth at which convergence is aimed for when choosing substep sizes.
    target_depth: usize,
    /// Deepest extrapolation tableau to build before rejecting a substep.
    max_depth: usize,
    min_step_size: F,
    max_substeps: usize,
    /// Substep size carried over from the previous interval.
    step_size: Option<F>,
}

impl<F: Float> Default for ExtrapolationStepper<F> {
    fn default() -> Self {
        Self {
            tolerances: Tolerances {
                abs: cast(1e-5).unwrap(),
                rel: cast(1e-5).unwrap(),
            },
            target_depth: 3,
            max_depth: 10,
            min_step_size: cast(1e-6).unwrap(),
            max_substeps: usize::MAX,
            step_size: None,
        }
    }
}

impl<F: Float> ExtrapolationStepper<F> {
    pub fn with_tolerances(self, abs: F, rel: F) -> Self {
        Self {
            tolerances: Tolerances { abs, rel },
            ..self
        }
    }

    /// Set the target and maximum extrapolation depths.
    pub fn with_depths(self, target_depth: usize, max_depth: usize) -> Self {
        assert!(
            target_depth + 1 < max_depth,
            "target depth {target_depth} must leave room below max depth {max_depth}"
        );
        Self {
            target_depth,
            max_depth,
            ..self
        }
    }

    pub fn with_min_step_size(self, min_step_size: F) -> Self {
        Self {
            min_step_size,
            ..self
        }
    }

    /// Set the maximum number of substeps allowed per interval.
    pub fn with_max_substeps(self, max_substeps: usize) -> Self {
        Self {
            max_substeps,
            ..self
        }
    }

    pub fn step_size(&self) -> Option<F> {
        self.step_size
    }

    /// Advance `y_init` by exactly `interval`, storing the result in `y_final`.
    pub fn advance<S: RightHandSide<Float = F>>(
        &mut self,
        rhs: &S,
        interval: F,
        y_init: ArrayView1<F>,
        mut y_final: ArrayViewMut1<F>,
    ) -> Result<IntervalStats, StepFailure<F>> {
        let mut rhs = CountingRhs {
            rhs,
            num_evaluations: 0,
        };
        let mut step_size = self.step_size.unwrap_or(interval);
        let mut elapsed = F::zero();
        let mut y = y_init.to_owned();
        let mut y_trial = y_init.to_owned();
        let mut num_substeps = 0;

        // Take substeps until the next one would overshoot `interval`, then take one shortened
        // substep to land on it exactly. The substep size adapts to the truncation error along
        // the way.
        loop {
            if step_size < self.min_step_size || !step_size.is_finite() {
                return Err(StepFailure::Underflow { step_size, elapsed });
            }
            if num_substeps == self.max_substeps {
                return Err(StepFailure::TooManySubsteps {
                    limit: self.max_substeps,
                    elapsed,
                });
            }
            num_substeps += 1;

            // `None` on the final, possibly shortened, substep of the interval.
            let next_elapsed = if elapsed < interval - step_size {
                Some((elapsed + step_size).min(interval))
            } else {
                None
            };

            let result = self.extrapolate(
                &mut rhs,
                step_size.min(interval - elapsed),
                y.view(),
                y_trial.view_mut(),
            );
            let factor = match &result {
                Ok(errors) | Err(errors) => self.step_size_factor(
                    errors
                        .get(self.target_depth)
                        .copied()
                        .unwrap_or_else(F::infinity),
                ),
            };

            match (result.is_ok(), next_elapsed) {
                // Landed on the end of the interval. The final substep was shortened, so its
                // truncation error says nothing about the best substep size; keep the old one.
                (true, None) => break,
                // Accepted, with more of the interval left to cover.
                (true, Some(next_elapsed)) => {
                    elapsed = next_elapsed;
                    step_size *= factor;
                    y.assign(&y_trial);
                }
                // Rejected. Shrink the substep and retry from the same state.
                (false, _) => step_size *= factor,
            }
        }

        self.step_size = Some(step_size);
        y_final.assign(&y_trial);
        Ok(IntervalStats {
            num_substeps,
            num_evaluations: rhs.num_evaluations,
        })
    }

    fn step_size_factor(&self, scaled_error: F) -> F {
        let safety: F = cast(0.95).unwrap();
        let min_factor: F = cast(0.01).unwrap();
        let max_factor = min_factor.recip();

        if scaled_error > F::zero() {
            // Eq. 2.14, Deuflhard, Peter. "Order and stepsize control in
            // extrapolation methods." Numerische Mathematik 41 (1983): 399-422.
            let exponent = F::one() / cast(2 * self.target_depth + 1).unwrap();
            (safety / scaled_error.powf(exponent))
                .max(min_factor)
                .min(max_factor)
        } else if scaled_error.is_finite() {
            F::one()
        } else {
            cast(0.5).unwrap()
        }
    }

    /// Take one substep, deepening the extrapolation tableau until converged.
    ///
    /// Returns the scaled truncation error of every tableau row past the first, in either case.
    fn extrapolate<S: RightHandSide<Float = F>>(
        &self,
        rhs: &mut CountingRhs<S>,
        step_size: F,
        y_init: ArrayView1<F>,
        mut y_final: ArrayViewMut1<F>,
    ) -> Result<Vec<F>, Vec<F>> {
        let mut f_init = nd::Array1::zeros(y_init.raw_dim());
        rhs.evaluate(y_init, f_init.view_mut());

        let num_midpoints = |depth: usize| 2 * (depth + 1);

        let mut tableau: Vec<Vec<nd::Array1<F>>> = Vec::with_capacity(self.max_depth);
        let mut errors = Vec::with_capacity(self.max_depth);
        for depth in 0..self.max_depth {
            let n = num_midpoints(depth);
            let mut row = Vec::with_capacity(depth + 1);
            row.push(modified_midpoint(rhs, step_size, n, &f_init, y_init));
            for j in 0..depth {
                // Numerical Recipes eq. 17.3.8 has the ratio inverted. See
                // https://www.numerical.recipes/forumarchive/index.php/t-2256.html.
                let ratio =
                    cast::<_, F>(n).unwrap() / cast(num_midpoints(depth - j - 1)).unwrap();
                let refined =
                    &row[j] + (&row[j] - &tableau[depth - 1][j]) / (ratio * ratio - F::one());
                row.push(refined);
            }

            if depth > 0 {
                let error = scaled_error(&row[depth - 1], &row[depth], self.tolerances);
                errors.push(error);
                if depth > self.target_depth && error <= F::one() {
                    y_final.assign(&row[depth]);
                    return Ok(errors);
                }
            }
            tableau.push(row);
        }

        Err(errors)
    }
}

/// Cross `step_size` with `n` modified midpoint substeps (Numerical Recipes eq. 17.3.2),
/// returning the smoothed end state.
fn modified_midpoint<S: RightHandSide>(
    rhs: &mut CountingRhs<S>,
    step_size: S::Float,
    n: usize,
    f_init: &nd::Array1<S::Float>,
    y_init: ArrayView1<S::Float>,
) -> nd::Array1<S::Float> {
    let h: S::Float = step_size / cast(n).unwrap();
    let two_h = h + h;

    // Leapfrog over the `n` midpoints; `behind` trails `ahead` by one point.
    //
    // 0    1    2    3    4    5    6    n
    //                  ..
    //           behind ahead
    //           ahead  behind
    //                  behind ahead
    //                  ..
    //                               behind ahead
    let mut behind = y_init.to_owned();
    let mut ahead = &behind + f_init * h;
    let mut f = f_init.clone();
    for _ in 1..n {
        core::mem::swap(&mut behind, &mut ahead);
        rhs.evaluate(behind.view(), f.view_mut());
        f *= two_h;
        ahead += &f;
    }

    rhs.evaluate(ahead.view(), f.view_mut());
    f *= h;
    let mut result = behind;
    result += &ahead;
    result += &f;
    result *= cast::<_, S::Float>(0.5).unwrap();
    result
}

/// RMS of the difference between two estimates, scaled by the tolerances.
fn scaled_error<F: Float>(
    y: &nd::Array1<F>,
    y_alt: &nd::Array1<F>,
    tolerances: Tolerances<F>,
) -> F {
    if y.is_empty() {
        return F::zero();
    }
    let sum_sq = y
        .iter()
        .zip(y_alt.iter())
        .map(|(&a, &b)| {
            let scale = tolerances.abs + tolerances.rel * a.abs().max(b.abs());
            ((a - b) / scale).powi(2)
        })
        .sum::<F>();
    (sum_sq / cast(y.len()).unwrap()).sqrt()
}

struct CountingRhs<'a, S: RightHandSide> {
    rhs: &'a S,
    num_evaluations: usize,
}

impl<S: RightHandSide> CountingRhs<'_, S> {
    fn evaluate(&mut self, y: ArrayView1<S::Float>, dydt: ArrayViewMut1<S::Float>) {
        self.num_evaluations += 1;
        self.rhs.evaluate(y, dydt);
    }
}
