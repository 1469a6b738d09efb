//! Fermi integrals and the chemical-potential normalization.
//!
//! At fixed degeneracy Θ the reduced chemical potential μ is pinned by the
//! density normalization
//! $$ \Gamma(3/2) F_{1/2}(\mu) = \frac{2}{3} \Theta^{-3/2} $$
//! with $F_{1/2}$ the complete Fermi–Dirac integral of order one half.

use crate::error::SolverError;
use jellium_numerics::{BisectionSolver, Integrator1D, RootError};
use statrs::function::gamma::gamma;

/// Relative tolerance on the chemical-potential bracket
const RELATIVE_TOLERANCE: f64 = 1e-10;
/// Iteration budget of the bracket search
const MAXIMUM_ITERATIONS: usize = 100;

/// The complete Fermi–Dirac integral F½(μ), normalized by Γ(3/2).
///
/// Evaluated through the substitution t = u², which removes the square-root
/// kink at the origin; the integrand then decays as exp(μ − u²) and the
/// half-line is truncated where the tail is below double precision.
pub fn fermi_dirac_half(mu: f64) -> f64 {
    let integrator = Integrator1D::new(1e-12);
    let upper = (mu.max(0.0) + 60.0).sqrt();
    let integral = integrator
        .compute(
            |u| 2.0 * u * u / ((u * u - mu).exp() + 1.0),
            0.0,
            upper,
        )
        .map(|quadrature| quadrature.value)
        .unwrap_or(f64::NAN);
    integral / gamma(1.5)
}

/// The residual of the density normalization at reduced chemical potential μ
pub fn normalization_condition(mu: f64, theta: f64) -> f64 {
    gamma(1.5) * fermi_dirac_half(mu) - 2.0 / (3.0 * theta.powf(1.5))
}

/// Solve the normalization for μ on the bracket `[lo, hi]`.
///
/// Bisection with a relative interval tolerance of 1e-10 and at most 100
/// iterations; the iteration counter starts from zero.
pub fn chemical_potential(theta: f64, lo: f64, hi: f64) -> Result<f64, SolverError> {
    let solver = BisectionSolver::new(RELATIVE_TOLERANCE, MAXIMUM_ITERATIONS);
    solver
        .solve(|mu| normalization_condition(mu, theta), lo, hi)
        .map(|root| root.solution)
        .map_err(|error| match error {
            RootError::NotBracketed { .. } => SolverError::ChempotBracketFailed { lo, hi },
            other => SolverError::RootNotBracketed(other),
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn degenerate_limit_recovers_the_sommerfeld_leading_order() {
        // As Θ → 0 the normalization forces μ → 1/Θ (μ in units of k_B T,
        // ε_F / k_B T = 1/Θ)
        let theta = 0.05;
        let mu = chemical_potential(theta, -10.0, 30.0).unwrap();
        assert_relative_eq!(mu * theta, 1.0, max_relative = 0.05);
    }

    #[test]
    fn normalization_residual_vanishes_at_the_solution() {
        for theta in [0.3, 1.0, 4.0] {
            let mu = chemical_potential(theta, -10.0, 10.0).unwrap();
            assert!(normalization_condition(mu, theta).abs() <= 1e-8);
        }
    }

    #[test]
    fn unit_degeneracy_chemical_potential_is_slightly_negative() {
        let mu = chemical_potential(1.0, -10.0, 10.0).unwrap();
        assert!(mu < 0.0 && mu > -0.1, "mu = {mu}");
    }

    #[test]
    fn classical_limit_is_strongly_negative() {
        let mu = chemical_potential(10.0, -30.0, 10.0).unwrap();
        assert!(mu < -3.0);
    }

    #[test]
    fn sign_definite_bracket_is_reported() {
        assert!(matches!(
            chemical_potential(1.0, 5.0, 10.0),
            Err(SolverError::ChempotBracketFailed { .. })
        ));
    }
}
