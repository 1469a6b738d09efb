//! The ideal density response on the real-frequency axis.
//!
//! The real part is the analytic continuation of the Matsubara integrand,
//! (2πlΘ)² → −ω², integrated adaptively over the occupied states; at ω = 0 it
//! reduces to the static (l = 0) form. The imaginary part is closed form.

use crate::error::SolverError;
use crate::response;
use crate::state::StatePoint;
use jellium_numerics::Integrator1D;
use ndarray::Array1;

/// Real and imaginary parts of φ(x, ω) on a frequency grid
#[derive(Debug, Clone)]
pub(crate) struct DynamicIdealResponse {
    /// Re φ(x, ω_j)
    pub re: Array1<f64>,
    /// Im φ(x, ω_j)
    pub im: Array1<f64>,
}

impl DynamicIdealResponse {
    /// Compute φ(x, ω) at wave-vector `x` for every frequency in `frequencies`.
    ///
    /// `y_max` bounds the occupied-state integral of the real part; the
    /// integrand decays with the Fermi factor so the wave-vector cutoff of the
    /// structural grid is ample.
    pub(crate) fn compute(
        x: f64,
        frequencies: &[f64],
        state: &StatePoint,
        integrator: &Integrator1D<f64>,
        y_max: f64,
    ) -> Result<Self, SolverError> {
        let mut re = Array1::zeros(frequencies.len());
        let mut im = Array1::zeros(frequencies.len());
        for (j, &frequency) in frequencies.iter().enumerate() {
            re[j] = if frequency == 0.0 {
                integrator
                    .compute(
                        |y| response::static_integrand(y, x, state.theta, state.mu),
                        0.0,
                        y_max,
                    )?
                    .value
            } else {
                integrator
                    .compute(
                        |y| real_part_integrand(y, x, frequency, state.theta, state.mu),
                        0.0,
                        y_max,
                    )?
                    .value
            };
            im[j] = imaginary_part(x, frequency, state.theta, state.mu);
        }
        Ok(Self { re, im })
    }
}

/// Integrand of Re φ(x, ω) for ω > 0
pub(crate) fn real_part_integrand(y: f64, x: f64, frequency: f64, theta: f64, mu: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let y2 = y * y;
    let x2 = x * x;
    let txy = 2.0 * x * y;
    let w2 = frequency * frequency;
    let numerator = (x2 + txy) * (x2 + txy) - w2;
    let denominator = (x2 - txy) * (x2 - txy) - w2;
    if numerator == 0.0 || denominator == 0.0 {
        return 0.0;
    }
    let logarg = (numerator / denominator).abs();
    1.0 / (2.0 * x) * y / ((y2 / theta - mu).exp() + 1.0) * logarg.ln()
}

/// Closed-form Im φ(x, ω); zero in the static limit
pub(crate) fn imaginary_part(x: f64, frequency: f64, theta: f64, mu: f64) -> f64 {
    if x <= 0.0 || frequency == 0.0 {
        return 0.0;
    }
    let h_minus = (frequency - x * x) / (2.0 * x);
    let h_plus = (frequency + x * x) / (2.0 * x);
    let numerator = 1.0 + (mu - h_minus * h_minus / theta).exp();
    let denominator = 1.0 + (mu - h_plus * h_plus / theta).exp();
    std::f64::consts::PI * theta / (4.0 * x) * (numerator / denominator).ln()
}

/// The thermal occupation factor entering the ω = 0 limit of the dynamic
/// structure factor
pub(crate) fn static_limit_occupation(x: f64, theta: f64, mu: f64) -> f64 {
    1.0 / ((x * x / (4.0 * theta) - mu).exp() + 1.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::StatePoint;
    use crate::theory::Theory;
    use jellium_numerics::Integrator1D;

    #[test]
    fn real_part_matches_the_matsubara_static_limit() {
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let integrator = Integrator1D::new(1e-7);
        let response =
            DynamicIdealResponse::compute(1.05, &[0.0], &state, &integrator, 20.0).unwrap();
        // φ(x, ω = 0) is the l = 0 Matsubara response
        let static_value = integrator
            .compute(
                |y| crate::response::static_integrand(y, 1.05, state.theta, state.mu),
                0.0,
                20.0,
            )
            .unwrap()
            .value;
        approx::assert_relative_eq!(response.re[0], static_value, max_relative = 1e-10);
        approx::assert_relative_eq!(response.im[0], 0.0);
    }

    #[test]
    fn spectral_weight_is_positive_and_decays_at_high_frequency() {
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let x = 1.0;
        let low = imaginary_part(x, 0.5, state.theta, state.mu);
        let high = imaginary_part(x, 18.0, state.theta, state.mu);
        assert!(low > 0.0);
        assert!(high < low * 1e-4);
    }

    #[test]
    fn imaginary_part_vanishes_at_zero_wave_vector() {
        assert_eq!(imaginary_part(0.0, 1.0, 1.0, -0.05), 0.0);
    }
}
