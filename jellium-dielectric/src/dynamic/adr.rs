//! The dynamic auxiliary density response of the quantum IET scheme: three
//! nested adaptive quadratures per (wave-vector, frequency) pair, iterated
//! against the ψ/φ ratio of the zero-frequency column. The innermost
//! (u, q) double integral is independent of ψ, so it is computed once per
//! (x, ω) slot and cached; slot `[.., 0]` carries a +∞ sentinel until the
//! slot is populated.

use crate::error::SolverError;
use crate::inner_loop::Convergence;
use crate::response::dynamic::DynamicIdealResponse;
use crate::state::StatePoint;
use jellium_mesher::{Discretisation, FrequencyGrid, WaveVectorGrid};
use jellium_numerics::{Integrator1D, Interpolator1D};
use ndarray::{Array1, Array2, Array3, Axis};
use rayon::prelude::*;

/// φ(x, ω) on the full (wave-vector × frequency) grid, parallel over rows
pub(crate) fn compute_ideal_grids(
    grid: &WaveVectorGrid<f64>,
    frequencies: &FrequencyGrid<f64>,
    state: &StatePoint,
) -> Result<(Array2<f64>, Array2<f64>), SolverError> {
    let nx = grid.num_points();
    let nw = frequencies.num_points();
    let omega = frequencies.as_slice();
    let back = grid.back();

    let rows: Vec<Result<DynamicIdealResponse, SolverError>> = (0..nx)
        .into_par_iter()
        .map(|i| {
            let integrator = Integrator1D::new(1e-5);
            DynamicIdealResponse::compute(grid.point_at(i), omega, state, &integrator, back)
        })
        .collect();

    let mut phi_re = Array2::zeros((nx, nw));
    let mut phi_im = Array2::zeros((nx, nw));
    for (i, row) in rows.into_iter().enumerate() {
        let row = row?;
        phi_re.row_mut(i).assign(&row.re);
        phi_im.row_mut(i).assign(&row.im);
    }
    Ok((phi_re, phi_im))
}

/// ψ(x, ω) on the full grid by the partially dynamic path: the real part is
/// iterated to self-consistency over the cached fixed component, then the
/// imaginary part follows in a single sweep.
pub(crate) fn compute_auxiliary_grids(
    grid: &WaveVectorGrid<f64>,
    frequencies: &FrequencyGrid<f64>,
    state: &StatePoint,
    ssf: &Array1<f64>,
    bridge: &Array1<f64>,
    phi_re: &Array2<f64>,
    convergence: &Convergence,
) -> Result<(Array2<f64>, Array2<f64>), SolverError> {
    let nx = grid.num_points();
    let nw = frequencies.num_points();
    let ssf_spline = Interpolator1D::new(grid.as_slice(), ssf.as_slice().unwrap())?;

    let mut psi_re = Array2::zeros((nx, nw));
    let mut fixed = Array3::from_elem((nx, nw, nx), f64::INFINITY);

    let mut residual = 1.0;
    let mut iteration = 0;
    while iteration < convergence.maximum_iterations && residual > convergence.tolerance {
        let weight = level1_weight(&psi_re, phi_re, ssf, bridge);
        let weight_spline = Interpolator1D::new(grid.as_slice(), &weight)?;

        let mut psi_new = Array2::zeros((nx, nw));
        psi_new
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(fixed.axis_iter_mut(Axis(0)).into_par_iter())
            .enumerate()
            .for_each(|(i, (mut psi_row, mut fixed_row))| {
                let integrator = Integrator1D::new(1e-5);
                let x = grid.point_at(i);
                for j in 0..nw {
                    let omega = frequencies.point_at(j);
                    if fixed_row[[j, 0]].is_infinite() {
                        let level2 = real_fixed_component(
                            x,
                            omega,
                            grid,
                            &ssf_spline,
                            state,
                            &integrator,
                        );
                        for (slot, value) in
                            fixed_row.row_mut(j).iter_mut().zip(level2.iter())
                        {
                            *slot = *value;
                        }
                    }
                    psi_row[j] = level1_fold(
                        grid,
                        &weight_spline,
                        fixed_row.row(j).as_slice().expect("rows are contiguous"),
                        &integrator,
                    );
                }
            });

        // Sentinel values from failed inner integrals surface here
        if psi_new.iter().any(|value| !value.is_finite()) {
            return Err(SolverError::NanEncountered(
                "the dynamic auxiliary density response",
            ));
        }

        residual = psi_new
            .column(0)
            .iter()
            .zip(psi_re.column(0).iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        iteration += 1;
        for (previous, &update) in psi_re.iter_mut().zip(psi_new.iter()) {
            *previous = convergence.mixing * update + (1.0 - convergence.mixing) * *previous;
        }
        tracing::info!(
            iteration,
            residual = format_args!("{residual:.5e}"),
            "dynamic auxiliary response"
        );
    }

    // Imaginary component, one sweep against the converged real part
    let weight = level1_weight(&psi_re, phi_re, ssf, bridge);
    let weight_spline = Interpolator1D::new(grid.as_slice(), &weight)?;
    let mut psi_im = Array2::zeros((nx, nw));
    psi_im
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut psi_row)| {
            let integrator = Integrator1D::new(1e-5);
            let x = grid.point_at(i);
            for j in 0..nw {
                let omega = frequencies.point_at(j);
                let level2 =
                    imaginary_component(x, omega, grid, &ssf_spline, state, &integrator);
                psi_row[j] = level1_fold(grid, &weight_spline, &level2, &integrator);
            }
        });
    if psi_im.iter().any(|value| !value.is_finite()) {
        return Err(SolverError::NanEncountered(
            "the dynamic auxiliary density response",
        ));
    }

    Ok((psi_re, psi_im))
}

// The level-1 weight S(1 - b) - (ψ/φ)(S - 1), evaluated on the
// zero-frequency column; the first grid point is pinned to zero
fn level1_weight(
    psi_re: &Array2<f64>,
    phi_re: &Array2<f64>,
    ssf: &Array1<f64>,
    bridge: &Array1<f64>,
) -> Vec<f64> {
    (0..ssf.len())
        .map(|k| {
            if k == 0 {
                0.0
            } else {
                let ratio = psi_re[[k, 0]] / phi_re[[k, 0]];
                ssf[k] * (1.0 - bridge[k]) - ratio * (ssf[k] - 1.0)
            }
        })
        .collect()
}

// The outermost integral over w: weight(w) · level2(w) / w
fn level1_fold(
    grid: &WaveVectorGrid<f64>,
    weight: &Interpolator1D<f64>,
    level2: &[f64],
    integrator: &Integrator1D<f64>,
) -> f64 {
    let level2_spline = match Interpolator1D::new(grid.as_slice(), level2) {
        Ok(spline) => spline,
        Err(_) => return f64::NAN,
    };
    integrator
        .compute(
            |w| {
                if w == 0.0 {
                    0.0
                } else {
                    weight.eval(w) * level2_spline.eval(w) / w
                }
            },
            grid.front(),
            grid.back(),
        )
        .map(|quadrature| quadrature.value)
        .unwrap_or(f64::NAN)
}

// The fixed (u, q) double integral of the real part at one (x, ω) slot,
// resolved on the w grid
fn real_fixed_component(
    x: f64,
    omega: f64,
    grid: &WaveVectorGrid<f64>,
    ssf_spline: &Interpolator1D<f64>,
    state: &StatePoint,
    integrator: &Integrator1D<f64>,
) -> Vec<f64> {
    let nx = grid.num_points();
    let w_max = grid.penultimate();
    let mut level2 = vec![0.0; nx];
    for (k, slot) in level2.iter_mut().enumerate() {
        let w = grid.point_at(k);
        let u_lo = (w - x).abs();
        let u_hi = (w + x).min(w_max);
        if u_hi <= u_lo {
            continue;
        }
        // Innermost q integral on the full u grid, then splined
        let mut level3 = vec![0.0; nx];
        for (m, inner) in level3.iter_mut().enumerate() {
            let u = grid.point_at(m);
            *inner = integrator
                .compute(
                    |q| real_level3_integrand(q, x, w, u, omega, state.theta, state.mu),
                    grid.front(),
                    grid.back(),
                )
                .map(|quadrature| quadrature.value)
                .unwrap_or(f64::NAN);
        }
        let level3_spline = match Interpolator1D::new(grid.as_slice(), &level3) {
            Ok(spline) => spline,
            Err(_) => {
                *slot = f64::NAN;
                continue;
            }
        };
        *slot = integrator
            .compute(
                |u| u * (ssf_spline.eval(u) - 1.0) * level3_spline.eval(u),
                u_lo,
                u_hi,
            )
            .map(|quadrature| quadrature.value)
            .unwrap_or(f64::NAN);
    }
    level2
}

// Innermost integrand of the real part; the ω = 0 form carries the
// analytic derivative correction
fn real_level3_integrand(
    q: f64,
    x: f64,
    w: f64,
    u: f64,
    omega: f64,
    theta: f64,
    mu: f64,
) -> f64 {
    let q2 = q * q;
    let x2 = x * x;
    let w2 = w * w;
    let u2 = u * u;
    let envelope = x2 + w2 - u2;
    let f1 = envelope + 4.0 * x * q;
    let f2 = envelope - 4.0 * x * q;
    if omega == 0.0 {
        if x == 0.0 || q == 0.0 || f2 == 0.0 {
            return 0.0;
        }
        let logarg = (f1 / f2).abs();
        -(3.0 / (4.0 * theta)) * q
            / ((q2 / theta - mu).exp() + (-q2 / theta + mu).exp() + 2.0)
            * ((q2 - envelope * envelope / (16.0 * x2)) * logarg.ln()
                + (q / x) * envelope / 2.0)
    } else {
        let numerator = f1 * f1 - 4.0 * omega * omega;
        let denominator = f2 * f2 - 4.0 * omega * omega;
        if denominator == 0.0 || numerator == 0.0 {
            return 0.0;
        }
        let logarg = (numerator / denominator).abs();
        -(3.0 / 8.0) * q / ((q2 / theta - mu).exp() + 1.0) * logarg.ln()
    }
}

// The (u, q) double integral of the imaginary part at one (x, ω) slot
fn imaginary_component(
    x: f64,
    omega: f64,
    grid: &WaveVectorGrid<f64>,
    ssf_spline: &Interpolator1D<f64>,
    state: &StatePoint,
    integrator: &Integrator1D<f64>,
) -> Vec<f64> {
    let nx = grid.num_points();
    let w_max = grid.penultimate();
    let theta = state.theta;
    let mu = state.mu;
    let mut level2 = vec![0.0; nx];
    for (k, slot) in level2.iter_mut().enumerate() {
        let w = grid.point_at(k);
        let u_lo = (w - x).abs();
        let u_hi = (w + x).min(w_max);
        if u_hi <= u_lo {
            continue;
        }
        if omega == 0.0 {
            // Static limit: the q integral collapses analytically
            *slot = integrator
                .compute(
                    |u| {
                        if x == 0.0 {
                            return 0.0;
                        }
                        let envelope = x * x + w * w - u * u;
                        0.5 * u * (ssf_spline.eval(u) - 1.0) * envelope
                            / ((envelope * envelope / (16.0 * theta * x * x) - mu).exp() + 1.0)
                    },
                    u_lo,
                    u_hi,
                )
                .map(|quadrature| quadrature.value)
                .unwrap_or(f64::NAN);
            continue;
        }
        let mut level3 = vec![0.0; nx];
        for (m, inner) in level3.iter_mut().enumerate() {
            let u = grid.point_at(m);
            let envelope = ((x * x + w * w - u * u) / 2.0).abs();
            let q_lo = ((omega - envelope) / (2.0 * x)).abs();
            let q_hi = (omega + envelope) / (2.0 * x);
            if q_hi <= q_lo {
                continue;
            }
            *inner = integrator
                .compute(
                    |q| imaginary_level3_integrand(q, x, w, u, omega, theta, mu),
                    q_lo,
                    q_hi,
                )
                .map(|quadrature| quadrature.value)
                .unwrap_or(f64::NAN);
        }
        let level3_spline = match Interpolator1D::new(grid.as_slice(), &level3) {
            Ok(spline) => spline,
            Err(_) => {
                *slot = f64::NAN;
                continue;
            }
        };
        *slot = integrator
            .compute(
                |u| u * (ssf_spline.eval(u) - 1.0) * level3_spline.eval(u),
                u_lo,
                u_hi,
            )
            .map(|quadrature| quadrature.value)
            .unwrap_or(f64::NAN);
    }
    level2
}

// Innermost integrand of the imaginary part: the particle-hole support
// selector
fn imaginary_level3_integrand(
    q: f64,
    x: f64,
    w: f64,
    u: f64,
    omega: f64,
    theta: f64,
    mu: f64,
) -> f64 {
    let q2 = q * q;
    let envelope = (x * x + w * w - u * u) / 2.0;
    let h1 = (envelope + omega) / (2.0 * x);
    let h2 = (envelope - omega) / (2.0 * x);
    let mut support = 0.0;
    if q2 > h1 * h1 {
        support += 1.0;
    }
    if q2 > h2 * h2 {
        support -= 1.0;
    }
    3.0 * std::f64::consts::PI / 8.0 * support * q / ((q2 / theta - mu).exp() + 1.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::Theory;

    fn small_problem() -> (WaveVectorGrid<f64>, FrequencyGrid<f64>, StatePoint) {
        let grid = WaveVectorGrid::build(0.5, 4.0).unwrap();
        let frequencies = FrequencyGrid::build(1.0, 3.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::QstlsHnc, -10.0, 10.0).unwrap();
        (grid, frequencies, state)
    }

    #[test]
    fn ideal_grids_carry_the_static_column() {
        let (grid, frequencies, state) = small_problem();
        let (phi_re, phi_im) = compute_ideal_grids(&grid, &frequencies, &state).unwrap();
        for i in 0..grid.num_points() {
            assert!(phi_re[[i, 0]] > 0.0);
            assert_eq!(phi_im[[i, 0]], 0.0);
        }
    }

    #[test]
    fn ideal_structure_factor_quenches_the_auxiliary_response() {
        let (grid, frequencies, state) = small_problem();
        let (phi_re, _) = compute_ideal_grids(&grid, &frequencies, &state).unwrap();
        let ssf = Array1::ones(grid.num_points());
        let bridge = Array1::zeros(grid.num_points());
        let convergence = Convergence {
            tolerance: 1e-6,
            maximum_iterations: 5,
            mixing: 1.0,
        };
        // With S ≡ 1 and b ≡ 0 the level-1 weight is S itself: ψ stays
        // finite but the (S - 1) factor kills the level-2 integrand
        let (psi_re, psi_im) = compute_auxiliary_grids(
            &grid,
            &frequencies,
            &state,
            &ssf,
            &bridge,
            &phi_re,
            &convergence,
        )
        .unwrap();
        for value in psi_re.iter().chain(psi_im.iter()) {
            assert!(value.abs() < 1e-10, "psi = {value}");
        }
    }

    #[test]
    fn particle_hole_support_selector_is_odd_in_frequency_shift() {
        // Inside the continuum exactly one step function fires
        let inside = imaginary_level3_integrand(1.0, 1.0, 1.0, 0.6, 1.2, 1.0, -0.05);
        assert!(inside.abs() > 0.0);
        // Deep outside the support both fire and cancel
        let outside = imaginary_level3_integrand(10.0, 1.0, 1.0, 0.6, 0.01, 1.0, -0.05);
        assert_eq!(outside, 0.0);
    }
}
