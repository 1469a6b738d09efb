// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Ideal density response
//!
//! The normalized Lindhard density φ(x, l) on the Matsubara axis and the
//! Hartree–Fock static structure factor. Both are midpoint sums over the same
//! cell-centered wave-vector grid used by the fixed-point iteration, so the
//! shared endpoints cancel the discretisation bias between the inner
//! quadrature and the outer loop.

pub(crate) mod dynamic;

use crate::state::StatePoint;
use jellium_mesher::{Discretisation, WaveVectorGrid};
use ndarray::{Array1, Array2};

/// φ(x, l) for every grid point and Matsubara index, indexed
/// (wave-vector, frequency) in row-major order.
pub(crate) fn compute_idr(
    grid: &WaveVectorGrid<f64>,
    state: &StatePoint,
    nl: usize,
) -> Array2<f64> {
    let nx = grid.num_points();
    let dx = grid.spacing();
    let mut idr = Array2::zeros((nx, nl));
    for l in 0..nl {
        tracing::trace!(matsubara = l, "ideal density response");
        for i in 0..nx {
            let x = grid.point_at(i);
            let mut sum = 0.0;
            for j in 0..nx - 1 {
                let y = grid.point_at(j);
                sum += if l == 0 {
                    static_integrand(y, x, state.theta, state.mu)
                } else {
                    matsubara_integrand(y, x, l, state.theta, state.mu)
                };
            }
            idr[[i, l]] = sum * dx;
        }
    }
    idr
}

/// Integrand of φ(x, l) for l ≥ 1
pub(crate) fn matsubara_integrand(y: f64, x: f64, l: usize, theta: f64, mu: f64) -> f64 {
    let y2 = y * y;
    let x2 = x * x;
    let txy = 2.0 * x * y;
    let tpl_t = 2.0 * std::f64::consts::PI * l as f64 * theta;
    let tpl_t2 = tpl_t * tpl_t;
    if x > 0.0 {
        1.0 / (2.0 * x) * y / ((y2 / theta - mu).exp() + 1.0)
            * (((x2 + txy) * (x2 + txy) + tpl_t2) / ((x2 - txy) * (x2 - txy) + tpl_t2)).ln()
    } else {
        0.0
    }
}

/// Integrand of φ(x, 0), with the x = 2y and x → 0 limit forms
pub(crate) fn static_integrand(y: f64, x: f64, theta: f64, mu: f64) -> f64 {
    let y2 = y * y;
    let x2 = x * x;
    let xy = x * y;
    let occupation = (y2 / theta - mu).exp() + (-y2 / theta + mu).exp() + 2.0;
    if x > 0.0 {
        if x < 2.0 * y {
            1.0 / (theta * x) * ((y2 - x2 / 4.0) * ((2.0 * y + x) / (2.0 * y - x)).ln() + xy) * y
                / occupation
        } else if x > 2.0 * y {
            1.0 / (theta * x) * ((y2 - x2 / 4.0) * ((2.0 * y + x) / (x - 2.0 * y)).ln() + xy) * y
                / occupation
        } else {
            1.0 / theta * y2 / occupation
        }
    } else {
        2.0 / theta * y2 / occupation
    }
}

/// The Hartree–Fock static structure factor on the wave-vector grid
pub(crate) fn compute_ssf_hf(grid: &WaveVectorGrid<f64>, state: &StatePoint) -> Array1<f64> {
    let nx = grid.num_points();
    let dx = grid.spacing();
    let mut ssf = Array1::zeros(nx);
    for i in 0..nx {
        let x = grid.point_at(i);
        let mut sum = 0.0;
        for j in 0..nx - 1 {
            sum += hartree_fock_integrand(grid.point_at(j), x, state.theta, state.mu);
        }
        ssf[i] = 1.0 + sum * dx;
    }
    ssf
}

/// Integrand of S_HF(x) − 1, with the x → 0 limit form
pub(crate) fn hartree_fock_integrand(y: f64, x: f64, theta: f64, mu: f64) -> f64 {
    let y2 = y * y;
    let ypx = y + x;
    let ymx = y - x;
    if x > 0.0 {
        -3.0 * theta / (4.0 * x) * y / ((y2 / theta - mu).exp() + 1.0)
            * ((1.0 + (mu - ymx * ymx / theta).exp()) / (1.0 + (mu - ypx * ypx / theta).exp()))
                .ln()
    } else {
        let occupation = 1.0 + (y2 / theta - mu).exp();
        -3.0 * y2 / (occupation * occupation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::StatePoint;
    use crate::theory::Theory;
    use jellium_mesher::{Discretisation, WaveVectorGrid};

    fn reference_state() -> (WaveVectorGrid<f64>, StatePoint) {
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::Rpa, -10.0, 10.0).unwrap();
        (grid, state)
    }

    #[test]
    fn static_response_is_positive_away_from_the_origin() {
        let (grid, state) = reference_state();
        let idr = compute_idr(&grid, &state, 4);
        for i in 0..grid.num_points() {
            assert!(idr[[i, 0]] > 0.0, "phi({}, 0) = {}", i, idr[[i, 0]]);
        }
    }

    #[test]
    fn response_decays_along_the_matsubara_axis() {
        let (grid, state) = reference_state();
        let idr = compute_idr(&grid, &state, 64);
        let i = grid.num_points() / 4;
        assert!(idr[[i, 63]].abs() < idr[[i, 1]].abs() * 1e-2);
        assert!(idr[[i, 63]].abs() < 1e-2);
    }

    #[test]
    fn matsubara_integrand_is_continuous_at_the_branch_split() {
        // The x = 2y split of the l = 0 integrand matches its limits
        let (theta, mu) = (1.0, -0.05);
        let y = 0.7;
        let at = static_integrand(y, 2.0 * y, theta, mu);
        let below = static_integrand(y, 2.0 * y - 1e-9, theta, mu);
        let above = static_integrand(y, 2.0 * y + 1e-9, theta, mu);
        assert!((at - below).abs() < 1e-4, "{at} vs {below}");
        assert!((at - above).abs() < 1e-4, "{at} vs {above}");
    }

    #[test]
    fn hartree_fock_structure_factor_reaches_unity_at_short_range() {
        let (grid, state) = reference_state();
        let ssf = compute_ssf_hf(&grid, &state);
        // Test at x = 10 √Θ
        let target = 10.0 * state.theta.sqrt();
        let index = grid
            .iter_points()
            .position(|x| x >= target)
            .expect("the grid extends beyond the test wave-vector");
        assert!(
            (ssf[index] - 1.0).abs() < 1e-3,
            "S_HF({target}) = {}",
            ssf[index]
        );
    }

    #[test]
    fn hartree_fock_structure_factor_is_suppressed_at_long_wavelength() {
        let (grid, state) = reference_state();
        let ssf = compute_ssf_hf(&grid, &state);
        assert!(ssf[0] < 0.5);
        assert!(ssf[0] > 0.0);
    }
}
