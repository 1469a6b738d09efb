use miette::Diagnostic;
use nalgebra::RealField;
use num_traits::ToPrimitive;

/// Error raised when a root solver cannot locate a solution
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum RootError {
    #[error("the function does not change sign on [{lo}, {hi}]")]
    NotBracketed { lo: f64, hi: f64 },
    #[error("the solver did not converge after {0} iterations")]
    MaxIterationsReached(usize),
    #[error("the function returned a non-finite value")]
    NonFiniteFunction,
}

/// A located root and the number of iterations spent finding it
#[derive(Debug, Clone, Copy)]
pub struct Root<T> {
    /// The solution
    pub solution: T,
    /// Iterations consumed
    pub iterations: usize,
}

fn check_finite<T: RealField + Copy>(value: T) -> Result<T, RootError> {
    if value - value != T::zero() {
        return Err(RootError::NonFiniteFunction);
    }
    Ok(value)
}

// Scale floor for the relative tolerances
fn scale<T: RealField + Copy>(magnitude: T) -> T {
    if magnitude > T::one() {
        magnitude
    } else {
        T::one()
    }
}

/// Bisection on a bracketing interval.
///
/// Convergence is declared when the interval width falls below the relative
/// tolerance, matching the interval test of the reference solver.
#[derive(Debug, Clone, Copy)]
pub struct BisectionSolver<T> {
    relative_error: T,
    maximum_iterations: usize,
}

impl<T: RealField + Copy + ToPrimitive> BisectionSolver<T> {
    /// A solver with the requested tolerance and iteration budget
    pub fn new(relative_error: T, maximum_iterations: usize) -> Self {
        Self {
            relative_error,
            maximum_iterations,
        }
    }

    /// Find the root of `f` on `[lo, hi]`; the endpoints must bracket it.
    pub fn solve(&self, f: impl Fn(T) -> T, lo: T, hi: T) -> Result<Root<T>, RootError> {
        let (mut lo, mut hi) = (lo, hi);
        let f_lo = check_finite(f(lo))?;
        let f_hi = check_finite(f(hi))?;
        if (f_lo > T::zero()) == (f_hi > T::zero()) {
            return Err(RootError::NotBracketed {
                lo: lo.to_f64().unwrap(),
                hi: hi.to_f64().unwrap(),
            });
        }
        let mut sign_lo = f_lo > T::zero();
        let mut iterations = 0;
        while iterations < self.maximum_iterations {
            iterations += 1;
            let midpoint = (lo + hi) / (T::one() + T::one());
            let f_mid = check_finite(f(midpoint))?;
            if (f_mid > T::zero()) == sign_lo {
                lo = midpoint;
                sign_lo = f_mid > T::zero();
            } else {
                hi = midpoint;
            }
            if (hi - lo).abs() <= self.relative_error * scale(lo.abs() + hi.abs()) {
                return Ok(Root {
                    solution: (lo + hi) / (T::one() + T::one()),
                    iterations,
                });
            }
        }
        Err(RootError::MaxIterationsReached(self.maximum_iterations))
    }
}

/// Brent's method: bisection safeguarded inverse quadratic interpolation.
///
/// Requires opposite signs at the endpoints and reports
/// [`RootError::NotBracketed`] otherwise.
#[derive(Debug, Clone, Copy)]
pub struct BrentRootSolver<T> {
    relative_error: T,
    maximum_iterations: usize,
}

impl<T: RealField + Copy + ToPrimitive> BrentRootSolver<T> {
    /// A solver with the requested tolerance and iteration budget
    pub fn new(relative_error: T, maximum_iterations: usize) -> Self {
        Self {
            relative_error,
            maximum_iterations,
        }
    }

    /// Find the root of `f` on the bracketing interval `[lo, hi]`.
    pub fn solve(&self, f: impl Fn(T) -> T, lo: T, hi: T) -> Result<Root<T>, RootError> {
        let two = T::one() + T::one();
        let three = two + T::one();
        let (mut a, mut b) = (lo, hi);
        let mut fa = check_finite(f(a))?;
        let mut fb = check_finite(f(b))?;
        if (fa > T::zero()) == (fb > T::zero()) {
            return Err(RootError::NotBracketed {
                lo: lo.to_f64().unwrap(),
                hi: hi.to_f64().unwrap(),
            });
        }
        let (mut c, mut fc) = (a, fa);
        let mut d = b - a;
        let mut e = d;
        for iteration in 1..=self.maximum_iterations {
            if fb.abs() > fc.abs() {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }
            let tolerance = self.relative_error * scale(b.abs());
            let midpoint = (c - b) / two;
            if midpoint.abs() <= tolerance || fb == T::zero() {
                return Ok(Root {
                    solution: b,
                    iterations: iteration,
                });
            }
            if e.abs() >= tolerance && fa.abs() > fb.abs() {
                // Attempt inverse quadratic interpolation (secant when a == c)
                let s = fb / fa;
                let (mut p, mut q) = if a == c {
                    (two * midpoint * s, T::one() - s)
                } else {
                    let q = fa / fc;
                    let r = fb / fc;
                    (
                        s * (two * midpoint * q * (q - r) - (b - a) * (r - T::one())),
                        (q - T::one()) * (r - T::one()) * (s - T::one()),
                    )
                };
                if p > T::zero() {
                    q = -q;
                }
                p = p.abs();
                let interpolation_bound = three * midpoint * q - (tolerance * q).abs();
                let bisection_bound = (e * q).abs();
                let accept = two * p < interpolation_bound && two * p < bisection_bound;
                if accept {
                    e = d;
                    d = p / q;
                } else {
                    d = midpoint;
                    e = d;
                }
            } else {
                d = midpoint;
                e = d;
            }
            a = b;
            fa = fb;
            b += if d.abs() > tolerance {
                d
            } else if midpoint > T::zero() {
                tolerance
            } else {
                -tolerance
            };
            fb = check_finite(f(b))?;
            if (fb > T::zero()) == (fc > T::zero()) {
                c = a;
                fc = fa;
                d = b - a;
                e = d;
            }
        }
        Err(RootError::MaxIterationsReached(self.maximum_iterations))
    }
}

/// The secant method; does not require a bracketing interval.
#[derive(Debug, Clone, Copy)]
pub struct SecantSolver<T> {
    relative_error: T,
    maximum_iterations: usize,
}

impl<T: RealField + Copy + ToPrimitive> SecantSolver<T> {
    /// A solver with the requested tolerance and iteration budget
    pub fn new(relative_error: T, maximum_iterations: usize) -> Self {
        Self {
            relative_error,
            maximum_iterations,
        }
    }

    /// Iterate from the two starting guesses `x0`, `x1`.
    pub fn solve(&self, f: impl Fn(T) -> T, x0: T, x1: T) -> Result<Root<T>, RootError> {
        let mut previous = x0;
        let mut current = x1;
        let mut f_previous = check_finite(f(previous))?;
        for iteration in 1..=self.maximum_iterations {
            let f_current = check_finite(f(current))?;
            if f_current == T::zero() {
                return Ok(Root {
                    solution: current,
                    iterations: iteration,
                });
            }
            if f_current == f_previous {
                return Err(RootError::MaxIterationsReached(iteration));
            }
            let next = current - f_current * (current - previous) / (f_current - f_previous);
            previous = current;
            f_previous = f_current;
            current = next;
            if (current - previous).abs() <= self.relative_error * scale(current.abs()) {
                return Ok(Root {
                    solution: current,
                    iterations: iteration,
                });
            }
        }
        Err(RootError::MaxIterationsReached(self.maximum_iterations))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bisection_locates_a_transcendental_root() {
        let solver: BisectionSolver<f64> = BisectionSolver::new(1e-10, 100);
        let root = solver.solve(|x| x.cos() - x, 0.0, 1.0).unwrap();
        assert_relative_eq!(root.solution, 0.7390851332151607, max_relative = 1e-9);
    }

    #[test]
    fn brent_matches_bisection_with_fewer_iterations() {
        let f = |x: f64| x * x * x - 2.0 * x - 5.0;
        let bisection: BisectionSolver<f64> = BisectionSolver::new(1e-12, 200);
        let brent: BrentRootSolver<f64> = BrentRootSolver::new(1e-12, 200);
        let slow = bisection.solve(f, 1.0, 3.0).unwrap();
        let fast = brent.solve(f, 1.0, 3.0).unwrap();
        assert_relative_eq!(fast.solution, slow.solution, max_relative = 1e-9);
        assert!(fast.iterations < slow.iterations);
    }

    #[test]
    fn unbracketed_interval_is_rejected() {
        let solver: BrentRootSolver<f64> = BrentRootSolver::new(1e-10, 100);
        assert!(matches!(
            solver.solve(|x| x * x + 1.0, -1.0, 1.0),
            Err(RootError::NotBracketed { .. })
        ));
    }

    #[test]
    fn secant_converges_without_a_bracket() {
        let solver: SecantSolver<f64> = SecantSolver::new(1e-12, 100);
        let root = solver.solve(|x| x.exp() - 2.0, 0.0, 1.0).unwrap();
        assert_relative_eq!(root.solution, std::f64::consts::LN_2, max_relative = 1e-10);
    }
}
