//! Bridge functions for the IET closures.
//!
//! The classical one-component-plasma bridge is tabulated in real space at
//! the mapped coupling Γ(rs, Θ) and carried to wave-vector space by a
//! numerical Fourier-sine transform,
//! $$ b(x) = \frac{3\lambda}{x} \int_0^\infty \mathrm{d}u\, u\, b(u)
//!    \sin(u x / \lambda), $$
//! with u = r/a the Wigner–Seitz-scaled separation and x in Fermi wave-vector
//! units (k_F a = 1/λ).

use crate::constants::lambda;
use crate::error::SolverError;
use crate::theory::{BridgeKind, IetMapping};
use jellium_mesher::{Discretisation, WaveVectorGrid};
use jellium_numerics::FourierSineIntegrator;
use ndarray::Array1;

// Validity window of the Iyetomi-Ogata-Ichimaru fit
const IOI_GAMMA_LO: f64 = 5.25;
const IOI_GAMMA_HI: f64 = 171.8;
// The refit extends toward weak coupling
const LCT_GAMMA_LO: f64 = 1.0;
const LCT_GAMMA_HI: f64 = 800.0;

// Γ-dependent coefficients of the r-space fit
#[derive(Debug, Clone, Copy)]
struct BridgeFit {
    b0: f64,
    b1: f64,
    c1: f64,
    c2: f64,
    c3: f64,
}

impl BridgeFit {
    fn at_coupling(gamma: f64) -> Result<Self, SolverError> {
        let ln_g = gamma.ln();
        let ln_g2 = ln_g * ln_g;
        let fit = Self {
            b0: 0.258 - 0.0612 * ln_g + 0.0123 * ln_g2 - 1.0 / gamma,
            b1: 0.0269 + 0.0318 * ln_g + 0.00814 * ln_g2,
            c1: 0.498 - 0.280 * ln_g + 0.0294 * ln_g2,
            c2: -0.412 + 0.219 * ln_g - 0.0251 * ln_g2,
            c3: 0.0988 - 0.0534 * ln_g + 0.00682 * ln_g2,
        };
        if fit.b0 / fit.b1 <= 0.0 {
            return Err(SolverError::InputInvalid {
                field: "rs",
                message: format!(
                    "the bridge-function fit is ill-conditioned at Γ = {gamma:.3}"
                ),
            });
        }
        Ok(fit)
    }
}

/// The wave-vector-space bridge term b(x) on the structural grid
pub(crate) fn compute_bridge(
    grid: &WaveVectorGrid<f64>,
    kind: BridgeKind,
    mapping: IetMapping,
    rs: f64,
    theta: f64,
) -> Result<Array1<f64>, SolverError> {
    let gamma = mapping.classical_coupling(rs, theta);
    match kind {
        BridgeKind::Hnc => Ok(Array1::zeros(grid.num_points())),
        BridgeKind::Ioi => {
            check_window(gamma, IOI_GAMMA_LO, IOI_GAMMA_HI)?;
            let fit = BridgeFit::at_coupling(gamma)?;
            transform(grid, move |u| gaussian_tail(u, fit, gamma))
        }
        BridgeKind::Lct => {
            check_window(gamma, LCT_GAMMA_LO, LCT_GAMMA_HI)?;
            let fit = BridgeFit::at_coupling(gamma)?;
            transform(grid, move |u| softened_tail(u, fit, gamma))
        }
    }
}

/// The bridge term at a single wave-vector, for the dynamic structure factor
/// at the target x
pub(crate) fn bridge_at(
    x: f64,
    kind: BridgeKind,
    mapping: IetMapping,
    rs: f64,
    theta: f64,
) -> Result<f64, SolverError> {
    let gamma = mapping.classical_coupling(rs, theta);
    let real_space: Box<dyn Fn(f64) -> f64> = match kind {
        BridgeKind::Hnc => return Ok(0.0),
        BridgeKind::Ioi => {
            check_window(gamma, IOI_GAMMA_LO, IOI_GAMMA_HI)?;
            let fit = BridgeFit::at_coupling(gamma)?;
            Box::new(move |u| gaussian_tail(u, fit, gamma))
        }
        BridgeKind::Lct => {
            check_window(gamma, LCT_GAMMA_LO, LCT_GAMMA_HI)?;
            let fit = BridgeFit::at_coupling(gamma)?;
            Box::new(move |u| softened_tail(u, fit, gamma))
        }
    };
    let lambda = lambda();
    let integrator = FourierSineIntegrator::new(1e-6);
    let value = integrator.compute(|u| u * real_space(u), x / lambda)?;
    Ok(3.0 * lambda / x * value.value)
}

fn check_window(gamma: f64, lo: f64, hi: f64) -> Result<(), SolverError> {
    if gamma < lo || gamma > hi {
        return Err(SolverError::InputInvalid {
            field: "rs",
            message: format!(
                "the mapped classical coupling Γ = {gamma:.3} is outside the \
                 bridge-function validity window [{lo}, {hi}]"
            ),
        });
    }
    Ok(())
}

// Iyetomi-Ogata-Ichimaru real-space bridge, Gaussian long-range decay
fn gaussian_tail(u: f64, fit: BridgeFit, gamma: f64) -> f64 {
    let u2 = u * u;
    let u4 = u2 * u2;
    gamma
        * (-fit.b0 + fit.c1 * u4 + fit.c2 * u4 * u2 + fit.c3 * u4 * u4)
        * (-fit.b1 / fit.b0 * u2).exp()
}

// Refit variant with the softer long-range tail of the classical-plasma data
fn softened_tail(u: f64, fit: BridgeFit, gamma: f64) -> f64 {
    let u2 = u * u;
    let u4 = u2 * u2;
    let decay = (fit.b1 / fit.b0).sqrt() * u;
    gamma * (-fit.b0 + fit.c1 * u4 + fit.c2 * u4 * u2 + fit.c3 * u4 * u4)
        / decay.cosh().powi(2)
}

fn transform(
    grid: &WaveVectorGrid<f64>,
    real_space: impl Fn(f64) -> f64,
) -> Result<Array1<f64>, SolverError> {
    let lambda = lambda();
    let integrator = FourierSineIntegrator::new(1e-6);
    let mut bridge = Array1::zeros(grid.num_points());
    for (i, x) in grid.iter_points().enumerate() {
        let value = integrator.compute(|u| u * real_space(u), x / lambda)?;
        bridge[i] = 3.0 * lambda / x * value.value;
    }
    Ok(bridge)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::{BridgeKind, IetMapping};
    use jellium_mesher::WaveVectorGrid;

    #[test]
    fn hypernetted_chain_bridge_vanishes() {
        let grid = WaveVectorGrid::build(0.1, 10.0).unwrap();
        let bridge =
            compute_bridge(&grid, BridgeKind::Hnc, IetMapping::Standard, 10.0, 1.0).unwrap();
        assert!(bridge.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn ioi_bridge_rejects_weak_coupling() {
        let grid = WaveVectorGrid::build(0.1, 10.0).unwrap();
        // rs = 1, Θ = 1 maps to Γ ≈ 0.54, far below the fit window
        assert!(matches!(
            compute_bridge(&grid, BridgeKind::Ioi, IetMapping::Standard, 1.0, 1.0),
            Err(SolverError::InputInvalid { field: "rs", .. })
        ));
    }

    #[test]
    fn ioi_bridge_decays_at_short_wavelength() {
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        // Γ = 2 λ² rs / Θ ≈ 27 sits inside the window
        let bridge =
            compute_bridge(&grid, BridgeKind::Ioi, IetMapping::Standard, 50.0, 1.0).unwrap();
        let head = bridge[5].abs();
        let tail = bridge[grid.num_points() - 1].abs();
        assert!(tail < head, "|b| head {head} tail {tail}");
    }

    #[test]
    fn lct_window_extends_below_the_ioi_window() {
        let grid = WaveVectorGrid::build(0.1, 10.0).unwrap();
        // Γ ≈ 3.3: inside LCT, outside IOI
        let rs = 6.0;
        assert!(compute_bridge(&grid, BridgeKind::Ioi, IetMapping::Standard, rs, 1.0).is_err());
        assert!(compute_bridge(&grid, BridgeKind::Lct, IetMapping::Standard, rs, 1.0).is_ok());
    }
}
