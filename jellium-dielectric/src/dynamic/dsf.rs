//! The dynamic structure factor assembled from the density responses at the
//! target wave-vector,
//! $$ S(x, \omega) = \frac{1}{\pi} \frac{1}{1 - e^{-\omega/\Theta}}
//!    \frac{\mathrm{Im}\,[\varphi + f (\varphi \psi^* - \psi \varphi^*)/\dots]}
//!         {|\epsilon(x, \omega)|^2} $$
//! with the analytic detailed-balance limit at ω = 0 and S(0, ω) = 0.

use crate::constants::lambda;
use crate::response::dynamic::static_limit_occupation;
use crate::state::StatePoint;
use ndarray::Array1;
use num_complex::Complex;

/// S(x, ω) for every frequency, from the responses interpolated to the
/// target wave-vector
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_dsf(
    x: f64,
    frequencies: &[f64],
    phi_re: &Array1<f64>,
    phi_im: &Array1<f64>,
    psi_re: &Array1<f64>,
    psi_im: &Array1<f64>,
    bridge_at_target: f64,
    state: &StatePoint,
) -> Array1<f64> {
    let mut dsf = Array1::zeros(frequencies.len());
    if x == 0.0 {
        return dsf;
    }
    let screening = 4.0 * lambda() * state.rs / (std::f64::consts::PI * x * x);
    for (j, &omega) in frequencies.iter().enumerate() {
        let phi = Complex::new(phi_re[j], phi_im[j]);
        let psi = Complex::new(psi_re[j], psi_im[j]);
        let dielectric =
            Complex::new(1.0, 0.0) + screening * ((1.0 - bridge_at_target) * phi - psi);
        let (numerator, denominator) = if omega == 0.0 {
            let balance = state.theta / (4.0 * x);
            let numerator = balance
                * ((1.0 - screening * psi.re) * static_limit_occupation(x, state.theta, state.mu)
                    - 3.0 / (4.0 * x) * screening * phi.re * psi.im);
            (numerator, dielectric.re * dielectric.re)
        } else {
            let balance = 1.0 / (1.0 - (-omega / state.theta).exp());
            let numerator = (phi.im + screening * (phi.re * psi.im - phi.im * psi.re))
                * balance
                / std::f64::consts::PI;
            (numerator, dielectric.norm_sqr())
        };
        dsf[j] = numerator / denominator;
    }
    dsf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::dynamic::DynamicIdealResponse;
    use crate::theory::Theory;
    use jellium_numerics::Integrator1D;
    use ndarray::Array1;

    fn rpa_dsf(x: f64, frequencies: &[f64], state: &StatePoint) -> Array1<f64> {
        let integrator = Integrator1D::new(1e-7);
        let phi =
            DynamicIdealResponse::compute(x, frequencies, state, &integrator, 20.0).unwrap();
        let zeros = Array1::zeros(frequencies.len());
        compute_dsf(x, frequencies, &phi.re, &phi.im, &zeros, &zeros, 0.0, state)
    }

    #[test]
    fn spectrum_vanishes_at_zero_wave_vector() {
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let frequencies = [0.0, 0.5, 1.0];
        let zeros = Array1::zeros(frequencies.len());
        let dsf = compute_dsf(
            0.0,
            &frequencies,
            &zeros,
            &zeros,
            &zeros,
            &zeros,
            0.0,
            &state,
        );
        assert!(dsf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn rpa_spectrum_is_non_negative_and_decays() {
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let frequencies: Vec<f64> = (0..100).map(|j| j as f64 * 0.2).collect();
        let dsf = rpa_dsf(1.0, &frequencies, &state);
        assert!(dsf.iter().all(|&s| s >= -1e-12));
        assert!(dsf[99] < dsf[5] * 1e-2);
    }

    #[test]
    fn detailed_balance_limit_matches_the_adjacent_frequency() {
        // S(x, ω → 0) from the analytic limit continues the ω > 0 branch
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let dsf = rpa_dsf(1.0, &[0.0, 1e-4], &state);
        assert!(
            (dsf[0] - dsf[1]).abs() / dsf[0] < 1e-2,
            "S(x, 0) = {}, S(x, 0+) = {}",
            dsf[0],
            dsf[1]
        );
    }

    fn zeroth_moment(x: f64, state: &StatePoint) -> f64 {
        let frequencies: Vec<f64> = (0..400).map(|j| j as f64 * 0.05).collect();
        let dsf = rpa_dsf(x, &frequencies, state);
        let mut moment = 0.0;
        for j in 1..frequencies.len() {
            let mean = 0.5
                * (dsf[j] * (1.0 + (-frequencies[j] / state.theta).exp())
                    + dsf[j - 1] * (1.0 + (-frequencies[j - 1] / state.theta).exp()));
            moment += mean * 0.05;
        }
        moment
    }

    #[test]
    fn frequency_moments_track_the_static_structure_factor() {
        // The detailed-balance-weighted zeroth moment is proportional to the
        // static structure factor, so moment ratios across wave-vectors must
        // match static ratios
        use crate::response;
        use crate::structure::{self, LocalField};
        use jellium_mesher::{Discretisation, WaveVectorGrid};

        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        let idr = response::compute_idr(&grid, &state, 128);
        let ssf_hf = response::compute_ssf_hf(&grid, &state);
        let zeros = Array1::zeros(grid.num_points());
        let ssf = structure::compute_ssf(&ssf_hf, &LocalField::Static(&zeros), &idr, &grid, &state);
        let index_of = |x: f64| grid.iter_points().position(|p| p >= x).unwrap();

        let moment_ratio = zeroth_moment(1.05, &state) / zeroth_moment(3.05, &state);
        let static_ratio = ssf[index_of(1.05)] / ssf[index_of(3.05)];
        assert!(
            (moment_ratio - static_ratio).abs() / static_ratio < 0.1,
            "moment ratio {moment_ratio}, static ratio {static_ratio}"
        );
    }
}
