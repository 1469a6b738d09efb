// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Static structure
//!
//! The dielectric static structure factor and the closures that feed the
//! local-field correction back from it. The SSF sums the Matsubara ladder
//! $$ S(x) = S_{HF}(x) - \frac{3}{2} \Theta f (1 - G)
//!    \sum_l w_l \frac{\varphi^2(x,l)}{\pi \lambda x^2 + f (1 - G) \varphi(x,l)} $$
//! with f = 4λ²rs, w_0 = 1 and w_l = 2 otherwise; each closure then rebuilds
//! G(x) from S(x).

pub(crate) mod bridge;

use crate::constants::{coupling_strength, lambda};
use crate::error::SolverError;
use crate::state::StatePoint;
use jellium_mesher::{Discretisation, WaveVectorGrid};
use jellium_numerics::{FourierSineIntegrator, Integrator1D, Interpolator1D};
use ndarray::{Array1, Array2};

/// The local-field term entering the structure factor: a static G(x) for the
/// classical schemes, the ratio ψ(x, l)/φ(x, l) for the quantum ones.
pub(crate) enum LocalField<'a> {
    /// One correction per wave-vector
    Static(&'a Array1<f64>),
    /// One correction per (wave-vector, Matsubara) pair
    PerFrequency(&'a Array2<f64>),
}

impl LocalField<'_> {
    fn at(&self, i: usize, l: usize) -> f64 {
        match self {
            LocalField::Static(values) => values[i],
            LocalField::PerFrequency(values) => values[[i, l]],
        }
    }
}

/// The dielectric static structure factor from (S_HF, G, φ)
pub(crate) fn compute_ssf(
    ssf_hf: &Array1<f64>,
    local_field: &LocalField<'_>,
    idr: &Array2<f64>,
    grid: &WaveVectorGrid<f64>,
    state: &StatePoint,
) -> Array1<f64> {
    let nx = grid.num_points();
    let nl = idr.shape()[1];
    let pi_lambda = std::f64::consts::PI * lambda();
    let f = coupling_strength(state.rs);
    let prefactor = 3.0 * state.theta * f / 2.0;
    let mut ssf = Array1::zeros(nx);
    for i in 0..nx {
        let x = grid.point_at(i);
        if x <= 0.0 {
            continue;
        }
        let x2 = x * x;
        let mut ladder = 0.0;
        for l in 0..nl {
            let phi = idr[[i, l]];
            let screening = 1.0 - local_field.at(i, l);
            let mut term = screening * phi * phi / (pi_lambda * x2 + f * screening * phi);
            if l > 0 {
                term *= 2.0;
            }
            ladder += term;
        }
        ssf[i] = ssf_hf[i] - prefactor * ladder;
    }
    ssf
}

/// The STLS closure G(x) = ∫ dy slfc(y, x, S(y)), midpoint-summed over the
/// shared grid
pub(crate) fn compute_slfc_stls(ssf: &Array1<f64>, grid: &WaveVectorGrid<f64>) -> Array1<f64> {
    let nx = grid.num_points();
    let dx = grid.spacing();
    let mut slfc = Array1::zeros(nx);
    for i in 0..nx {
        let x = grid.point_at(i);
        let mut sum = 0.0;
        for j in 0..nx - 1 {
            sum += slfc_kernel(grid.point_at(j), x, ssf[j]);
        }
        slfc[i] = sum * dx;
    }
    slfc
}

/// The STLS kernel, split on x ≷ y with the analytic x = y limit
pub(crate) fn slfc_kernel(y: f64, x: f64, ssf: f64) -> f64 {
    let y2 = y * y;
    let x2 = x * x;
    if x > 0.0 && y > 0.0 {
        if x > y {
            -0.75 * y2 * (ssf - 1.0) * (1.0 + (x2 - y2) / (2.0 * x * y) * ((x + y) / (x - y)).ln())
        } else if x < y {
            -0.75 * y2 * (ssf - 1.0) * (1.0 + (x2 - y2) / (2.0 * x * y) * ((x + y) / (y - x)).ln())
        } else {
            y2 * (ssf - 1.0)
        }
    } else {
        0.0
    }
}

/// The IET closure: the STLS-type double integral with a bridge term.
///
/// The level-1 factor [S(y) − 1][G(y) − 1] − b(y) carries the previous
/// iterate of G, so the closure participates in the same Picard loop as the
/// structure factor.
pub(crate) fn compute_slfc_iet(
    previous_slfc: &Array1<f64>,
    ssf: &Array1<f64>,
    bridge: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
    integrator: &Integrator1D<f64>,
) -> Result<Array1<f64>, SolverError> {
    let nx = grid.num_points();
    let points = grid.as_slice();
    let ssf_spline = Interpolator1D::new(points, ssf.as_slice().unwrap())?;
    let slfc_spline = Interpolator1D::new(points, previous_slfc.as_slice().unwrap())?;
    let bridge_spline = Interpolator1D::new(points, bridge.as_slice().unwrap())?;
    let front = grid.front();
    let back = grid.back();

    let mut slfc = Array1::zeros(nx);
    for i in 0..nx {
        let x = grid.point_at(i);
        let x2 = x * x;
        let outer = integrator.compute(
            |y| {
                let y2 = y * y;
                let level1 = (-bridge_spline.eval(y)
                    + (ssf_spline.eval(y) - 1.0) * (slfc_spline.eval(y) - 1.0))
                    / y;
                let w_lo = (x - y).abs().max(front);
                let w_hi = (x + y).min(back);
                if w_hi <= w_lo {
                    return 0.0;
                }
                let inner = integrator
                    .compute(
                        |w| w * (w * w - y2 - x2) * (ssf_spline.eval(w) - 1.0),
                        w_lo,
                        w_hi,
                    )
                    .map(|quadrature| quadrature.value)
                    .unwrap_or(f64::NAN);
                level1 * inner
            },
            front,
            back,
        )?;
        slfc[i] = bridge[i] + 3.0 / (8.0 * x2 * x) * outer.value;
    }
    Ok(slfc)
}

/// The effective static approximation: the STLS form at long wavelength
/// joined to the exact short-range limit 1 − g(0) through a smooth
/// activation centred on x = 2.
pub(crate) fn compute_slfc_esa(ssf: &Array1<f64>, grid: &WaveVectorGrid<f64>) -> Array1<f64> {
    let stls = compute_slfc_stls(ssf, grid);
    let contact = contact_pair_correlation(ssf, grid);
    let short_range = 1.0 - contact;
    let mut slfc = Array1::zeros(grid.num_points());
    for i in 0..grid.num_points() {
        let x = grid.point_at(i);
        let activation = 1.0 / (1.0 + (3.0 * (x - 2.0)).exp());
        slfc[i] = activation * stls[i] + (1.0 - activation) * short_range;
    }
    slfc
}

/// The on-top pair correlation g(0) = 1 + (3/2) ∫ dx x² (S(x) − 1)
pub(crate) fn contact_pair_correlation(ssf: &Array1<f64>, grid: &WaveVectorGrid<f64>) -> f64 {
    let samples: Vec<f64> = grid
        .iter_points()
        .zip(ssf.iter())
        .map(|(x, &s)| x * x * (s - 1.0))
        .collect();
    1.0 + 1.5 * grid.integrate(&samples)
}

/// The exchange-correlation internal energy per particle,
/// u = ∫ dx (S(x) − 1) / (π λ rs)
pub(crate) fn internal_energy(ssf: &Array1<f64>, grid: &WaveVectorGrid<f64>, rs: f64) -> f64 {
    let samples: Vec<f64> = ssf.iter().map(|&s| s - 1.0).collect();
    grid.integrate(&samples) / (std::f64::consts::PI * rs * lambda())
}

/// The Fermi-weighted structure integral Q entering the quantum
/// compressibility sum rule,
/// $$ Q = \frac{12}{\pi \lambda}
///    \frac{\int \mathrm{d}w\, w [S(w) - 1] \int \mathrm{d}q\,
///          \frac{q^2}{e^{q^2/\Theta - \mu} + 1} \frac{1}{w^3}
///          \left(\frac{q}{w} \ln\left|\frac{w + 2q}{w - 2q}\right| - 1\right)}
///         {\int \mathrm{d}y\, (e^{y^2/\Theta - \mu} + 1)^{-1}} $$
/// evaluated over the converged structure factor.
pub(crate) fn quantum_sum_rule_term(
    ssf: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
    state: &StatePoint,
) -> Result<f64, SolverError> {
    let integrator = Integrator1D::new(1e-6);
    let theta = state.theta;
    let mu = state.mu;
    let front = grid.front();
    let back = grid.back();
    let ssf_spline = Interpolator1D::new(grid.as_slice(), ssf.as_slice().unwrap())?;

    let denominator = integrator
        .compute(|y| 1.0 / ((y * y / theta - mu).exp() + 1.0), front, back)?
        .value;
    let numerator = integrator.compute(
        |w| {
            let w2 = w * w;
            let w3 = w2 * w;
            let inner = integrator
                .compute(
                    |q| {
                        if q == 0.0 || w == 2.0 * q {
                            return 0.0;
                        }
                        let logarg = ((w + 2.0 * q) / (w - 2.0 * q)).abs();
                        q / ((q * q / theta - mu).exp() + 1.0) * q / w3
                            * (q / w * logarg.ln() - 1.0)
                    },
                    front,
                    back,
                )
                .map(|quadrature| quadrature.value)
                .unwrap_or(f64::NAN);
            w * (ssf_spline.eval(w) - 1.0) * inner
        },
        front,
        back,
    )?;
    Ok(12.0 / (std::f64::consts::PI * lambda()) * numerator.value / denominator)
}

/// The static density response χ(x) from φ(x, 0) and the converged G(x)
pub(crate) fn static_density_response(
    idr: &Array2<f64>,
    slfc: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
    state: &StatePoint,
) -> Array1<f64> {
    let fact = 4.0 * lambda() * state.rs / std::f64::consts::PI;
    let mut sdr = Array1::zeros(grid.num_points());
    for i in 0..grid.num_points() {
        let x2 = grid.point_at(i) * grid.point_at(i);
        let phi0 = idr[[i, 0]];
        sdr[i] =
            -1.5 * state.theta * phi0 / (1.0 + fact / x2 * (1.0 - slfc[i]) * phi0);
    }
    sdr
}

/// The radial distribution function on the supplied r-grid (r in units of
/// the inverse Fermi wave-vector)
pub(crate) fn radial_distribution(
    radii: &[f64],
    ssf: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
) -> Result<Vec<f64>, SolverError> {
    let weighted: Vec<f64> = grid
        .iter_points()
        .zip(ssf.iter())
        .map(|(x, &s)| x * (s - 1.0))
        .collect();
    let spline = Interpolator1D::new(grid.as_slice(), &weighted)?;
    let back = grid.back();
    let front = grid.front();
    let integrator = FourierSineIntegrator::new(1e-6);
    radii
        .iter()
        .map(|&r| {
            let transform = integrator.compute(
                |q| {
                    if q < front || q > back {
                        0.0
                    } else {
                        spline.eval(q)
                    }
                },
                r,
            )?;
            Ok(1.0 + 1.5 / r * transform.value)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response;
    use crate::theory::Theory;
    use approx::assert_relative_eq;

    fn reference() -> (WaveVectorGrid<f64>, StatePoint, Array1<f64>, Array2<f64>) {
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        let ssf_hf = response::compute_ssf_hf(&grid, &state);
        let idr = response::compute_idr(&grid, &state, 128);
        (grid, state, ssf_hf, idr)
    }

    #[test]
    fn zero_coupling_reduces_every_closure_to_hartree_fock() {
        let (grid, state, ssf_hf, idr) = reference();
        let free = state.with_coupling(0.0);
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &free);
        for i in 0..grid.num_points() {
            assert_relative_eq!(ssf[i], ssf_hf[i], max_relative = 1e-10);
        }
    }

    #[test]
    fn rpa_structure_factor_matches_the_seeded_scenario() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        // S(x = 1.05) ≈ 0.58 ± 0.02 at rs = 1, Θ = 1
        let index = grid.iter_points().position(|x| x >= 1.05).unwrap();
        assert!(
            (ssf[index] - 0.58).abs() < 0.02,
            "S(1.05) = {}",
            ssf[index]
        );
    }

    #[test]
    fn rpa_internal_energy_matches_the_seeded_scenario() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        let energy = internal_energy(&ssf, &grid, state.rs);
        assert!(
            (energy + 0.305).abs() < 0.005,
            "u = {energy}"
        );
    }

    #[test]
    fn structure_factor_tends_to_unity_at_short_range() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        let index = grid.iter_points().position(|x| x >= 10.0).unwrap();
        assert!((ssf[index] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn stls_kernel_limit_is_continuous_at_equal_wave_vectors() {
        let s = 0.4;
        let at = slfc_kernel(1.0, 1.0, s);
        let near = slfc_kernel(1.0, 1.0 + 1e-8, s);
        assert!((at - near).abs() < 1e-5, "{at} vs {near}");
    }

    #[test]
    fn radial_distribution_saturates_at_long_range() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        let g = radial_distribution(&[8.0, 12.0], &ssf, &grid).unwrap();
        for value in g {
            assert!((value - 1.0).abs() < 0.05, "g(r) = {value}");
        }
    }

    #[test]
    fn quantum_sum_rule_term_vanishes_for_the_ideal_structure_factor() {
        let (grid, state, _ssf_hf, _idr) = reference();
        let ideal = Array1::ones(grid.num_points());
        let term = quantum_sum_rule_term(&ideal, &grid, &state).unwrap();
        assert!(term.abs() < 1e-10, "Q = {term}");
    }

    #[test]
    fn quantum_sum_rule_term_is_finite_at_the_reference_point() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        let term = quantum_sum_rule_term(&ssf, &grid, &state).unwrap();
        assert!(term.is_finite());
        assert!(term.abs() > 1e-6, "Q = {term}");
    }

    #[test]
    fn static_density_response_is_negative_definite() {
        let (grid, state, _ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let sdr = static_density_response(&idr, &slfc, &grid, &state);
        assert!(sdr.iter().all(|&chi| chi < 0.0));
    }

    #[test]
    fn esa_interpolates_to_the_contact_limit_at_short_range() {
        let (grid, state, ssf_hf, idr) = reference();
        let zeros = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&zeros), &idr, &grid, &state);
        let esa = compute_slfc_esa(&ssf, &grid);
        let short_range = 1.0 - contact_pair_correlation(&ssf, &grid);
        let tail = esa[grid.num_points() - 1];
        assert!(
            (tail - short_range).abs() < 1e-6,
            "G(xmax) = {tail}, 1 - g(0) = {short_range}"
        );
    }

    #[test]
    fn slfc_vanishes_at_the_origin() {
        let (grid, state, ssf_hf, idr) = reference();
        let slfc = Array1::zeros(grid.num_points());
        let ssf = compute_ssf(&ssf_hf, &LocalField::Static(&slfc), &idr, &grid, &state);
        let slfc = compute_slfc_stls(&ssf, &grid);
        // G(x) ~ x² at long wavelength: the first grid point is already small
        assert!(slfc[0].abs() < 0.05, "G(dx/2) = {}", slfc[0]);
    }
}
