// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Outer loop
//!
//! The variational (Vashishta–Singwi) schemes close the compressibility sum
//! rule by adjusting the free parameter α of the modified closure. Each
//! evaluation of the sum-rule residual r(α) sweeps a small (rs, Θ) stencil
//! of full inner-loop solves, builds the free-energy density by
//! thermodynamic integration of the internal-energy integrand rs·u(rs), and
//! forms the finite-difference sum-rule expression; the root of r(α) is
//! located by a secant iteration seeded with the fixed-point step damped by
//! the outer mixing parameter. The quantum variant carries the
//! Fermi-weighted structure integral Q through the stencil in place of the
//! internal energy.

use crate::auxiliary::FixedKernel;
use crate::error::SolverError;
use crate::inner_loop::{
    ClosureContext, Convergence, InnerLoopBuilder, LoopDiagnostics, LoopState, Solution,
    StaticResponse,
};
use crate::response;
use crate::state::StatePoint;
use crate::structure;
use indicatif::{ProgressBar, ProgressStyle};
use jellium_mesher::{Discretisation, WaveVectorGrid};
use jellium_numerics::{RootError, SecantSolver};
use ndarray::Array2;
use std::cell::RefCell;
use std::marker::PhantomData;

// Points of the coupling stencil below the target
const COUPLING_STENCIL_BELOW: usize = 3;
// One point above the target closes the central differences
const COUPLING_STENCIL: usize = COUPLING_STENCIL_BELOW + 2;

/// Convergence control of the α iteration
#[derive(Debug, Clone, Copy)]
pub(crate) struct VsConvergence {
    /// Initial guess for the free parameter
    pub alpha_guess: f64,
    /// Residual threshold on |α_new − α|
    pub tolerance: f64,
    /// Iteration budget of the outer loop
    pub maximum_iterations: usize,
    /// Mixing applied to the α update
    pub mixing: f64,
    /// Resolution of the coupling stencil
    pub drs: f64,
    /// Resolution of the degeneracy stencil
    pub dtheta: f64,
    /// Whether the sum rule is enforced at all
    pub solve_csr: bool,
}

/// The thermodynamic-integration table: the coupling grid and the
/// free-energy integrand rs·u(rs) on the {Θ − dΘ, Θ, Θ + dΘ} stencil
#[derive(Debug, Clone)]
pub(crate) struct ThermoTable {
    /// Coupling grid rsp[k]
    pub rsp: Vec<f64>,
    /// fxcIntegrand[t, k], Θ stencil major
    pub integrand: Array2<f64>,
    /// The Fermi-weighted structure integral Q[t, k] required by the
    /// quantum sum rule; absent for the classical schemes
    pub adder: Option<Array2<f64>>,
}

/// Builder for the outer loop
pub(crate) struct OuterLoopBuilder<RefGrid, RefState, RefInner, RefVs> {
    grid: RefGrid,
    state: RefState,
    inner: RefInner,
    vs: RefVs,
    marker: PhantomData<()>,
}

impl OuterLoopBuilder<(), (), (), ()> {
    pub(crate) fn new() -> Self {
        Self {
            grid: (),
            state: (),
            inner: (),
            vs: (),
            marker: PhantomData,
        }
    }
}

impl<RefGrid, RefState, RefInner, RefVs> OuterLoopBuilder<RefGrid, RefState, RefInner, RefVs> {
    pub(crate) fn with_grid<Grid>(
        self,
        grid: &Grid,
    ) -> OuterLoopBuilder<&Grid, RefState, RefInner, RefVs> {
        OuterLoopBuilder {
            grid,
            state: self.state,
            inner: self.inner,
            vs: self.vs,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_state<State>(
        self,
        state: &State,
    ) -> OuterLoopBuilder<RefGrid, &State, RefInner, RefVs> {
        OuterLoopBuilder {
            grid: self.grid,
            state,
            inner: self.inner,
            vs: self.vs,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_inner_convergence<Inner>(
        self,
        inner: &Inner,
    ) -> OuterLoopBuilder<RefGrid, RefState, &Inner, RefVs> {
        OuterLoopBuilder {
            grid: self.grid,
            state: self.state,
            inner,
            vs: self.vs,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_vs_convergence<Vs>(
        self,
        vs: &Vs,
    ) -> OuterLoopBuilder<RefGrid, RefState, RefInner, &Vs> {
        OuterLoopBuilder {
            grid: self.grid,
            state: self.state,
            inner: self.inner,
            vs,
            marker: PhantomData,
        }
    }
}

impl<'a> OuterLoopBuilder<&'a WaveVectorGrid<f64>, &'a StatePoint, &'a Convergence, &'a VsConvergence> {
    /// Build the outer loop; `thermo_table` short-circuits the stencil sweep
    /// when supplied, `quantum` selects the QSTLS inner closure, and the
    /// chemical-potential bracket re-solves μ on the Θ stencil.
    pub(crate) fn build(
        self,
        thermo_table: Option<ThermoTable>,
        quantum: bool,
        mu_bracket: (f64, f64),
        nl: usize,
    ) -> OuterLoop<'a> {
        OuterLoop {
            grid: self.grid,
            state: self.state,
            inner: self.inner,
            vs: self.vs,
            thermo_table,
            quantum,
            mu_bracket,
            nl,
        }
    }
}

/// The α iteration enclosing the inner fixed-point drivers
pub(crate) struct OuterLoop<'a> {
    grid: &'a WaveVectorGrid<f64>,
    state: &'a StatePoint,
    inner: &'a Convergence,
    vs: &'a VsConvergence,
    thermo_table: Option<ThermoTable>,
    quantum: bool,
    mu_bracket: (f64, f64),
    nl: usize,
}

/// The outcome of the outer loop
pub(crate) struct VsSolution {
    /// The converged free parameter
    pub alpha: f64,
    /// |α_new − α| at termination
    pub residual: f64,
    /// Outer iterations consumed
    pub iterations: usize,
    /// The structural solution at the target state point
    pub solution: Solution,
    /// Diagnostics of the final inner solve
    pub diagnostics: LoopDiagnostics,
    /// The thermodynamic table of the last sweep, for output
    pub table: ThermoTable,
}

impl OuterLoop<'_> {
    /// Run the α iteration and the final structural solve.
    pub(crate) fn run_loop(&mut self) -> Result<VsSolution, SolverError> {
        self.validate_stencil()?;
        let mut alpha = self.vs.alpha_guess;
        let mut residual = 0.0;
        let mut iterations = 0;

        let table_cell: RefCell<Option<ThermoTable>> = RefCell::new(self.thermo_table.clone());

        if self.vs.solve_csr {
            // Evaluations of r(α) = α_new(α) − α are expensive (a full
            // stencil sweep each), so they are memoized; errors raised inside
            // the root solver are stashed and re-raised at the call site
            let failure: RefCell<Option<SolverError>> = RefCell::new(None);
            let evaluated: RefCell<Vec<(f64, f64)>> = RefCell::new(Vec::new());
            let residual_at = |trial: f64| -> f64 {
                if let Some(&(_, cached)) =
                    evaluated.borrow().iter().find(|(probe, _)| *probe == trial)
                {
                    return cached;
                }
                let outcome = (|| -> Result<f64, SolverError> {
                    let table = match &self.thermo_table {
                        Some(table) => table.clone(),
                        None => self.sweep_stencil(trial)?,
                    };
                    let alpha_new = self.sum_rule_alpha(&table)?;
                    *table_cell.borrow_mut() = Some(table);
                    Ok(alpha_new - trial)
                })();
                match outcome {
                    Ok(value) => {
                        tracing::info!(
                            alpha = trial,
                            residual = format_args!("{value:.5e}"),
                            "outer loop"
                        );
                        evaluated.borrow_mut().push((trial, value));
                        value
                    }
                    Err(error) => {
                        *failure.borrow_mut() = Some(error);
                        f64::NAN
                    }
                }
            };

            // The second secant guess is the fixed-point step damped by the
            // outer mixing parameter
            let seed = residual_at(alpha);
            if let Some(error) = failure.borrow_mut().take() {
                return Err(error);
            }
            let solver = SecantSolver::new(self.vs.tolerance, self.vs.maximum_iterations);
            match solver.solve(&residual_at, alpha, alpha + self.vs.mixing * seed) {
                Ok(root) => {
                    iterations = root.iterations;
                    // One verification evaluation reports the closing
                    // residual and leaves the table consistent with the root
                    residual = residual_at(root.solution).abs();
                    if let Some(error) = failure.borrow_mut().take() {
                        return Err(error);
                    }
                    alpha = root.solution;
                    if residual >= self.vs.tolerance {
                        tracing::warn!(
                            residual = format_args!("{residual:.5e}"),
                            "the sum-rule residual is above threshold at the secant root"
                        );
                    }
                }
                Err(RootError::MaxIterationsReached(spent)) => {
                    iterations = spent;
                    if let Some(&(last_alpha, last_residual)) = evaluated.borrow().last() {
                        alpha = last_alpha;
                        residual = last_residual.abs();
                    }
                    tracing::warn!(
                        residual = format_args!("{residual:.5e}"),
                        "the sum-rule residual is above threshold; writing partial results"
                    );
                }
                Err(error) => {
                    return Err(match failure.borrow_mut().take() {
                        Some(stashed) => stashed,
                        None => error.into(),
                    });
                }
            }
        } else if table_cell.borrow().is_none() {
            let table = self.sweep_stencil(alpha)?;
            *table_cell.borrow_mut() = Some(table);
        }

        let table = table_cell
            .into_inner()
            .expect("a table is built on every path");
        let (solution, diagnostics) = self.solve_at(self.state, alpha, None)?;
        if diagnostics.state == LoopState::MaxIterReached {
            tracing::warn!("the final structural solve hit the iteration budget");
        }
        Ok(VsSolution {
            alpha,
            residual,
            iterations,
            solution,
            diagnostics,
            table,
        })
    }

    fn validate_stencil(&self) -> Result<(), SolverError> {
        if self.state.rs <= COUPLING_STENCIL_BELOW as f64 * self.vs.drs {
            return Err(SolverError::InputInvalid {
                field: "vs_drs",
                message: format!(
                    "the coupling stencil ({} points of width {}) does not fit below rs = {}",
                    COUPLING_STENCIL_BELOW, self.vs.drs, self.state.rs
                ),
            });
        }
        if self.state.theta <= self.vs.dtheta {
            return Err(SolverError::InputInvalid {
                field: "vs_dt",
                message: format!(
                    "the degeneracy stencil of width {} does not fit below Theta = {}",
                    self.vs.dtheta, self.state.theta
                ),
            });
        }
        Ok(())
    }

    // Steps 1-3: sweep the (rs, Θ) stencil and tabulate rs·u(rs)
    fn sweep_stencil(&self, alpha: f64) -> Result<ThermoTable, SolverError> {
        let rsp: Vec<f64> = (0..COUPLING_STENCIL)
            .map(|k| {
                self.state.rs
                    + (k as f64 - COUPLING_STENCIL_BELOW as f64) * self.vs.drs
            })
            .collect();
        let thetas = [
            self.state.theta - self.vs.dtheta,
            self.state.theta,
            self.state.theta + self.vs.dtheta,
        ];

        let progress = ProgressBar::new((thetas.len() * rsp.len()) as u64);
        progress.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .expect("the progress template is static")
                .progress_chars("=> "),
        );
        progress.set_message("thermodynamic stencil");

        let mut integrand = Array2::zeros((thetas.len(), rsp.len()));
        let mut adder = self
            .quantum
            .then(|| Array2::zeros((thetas.len(), rsp.len())));
        for (t, &theta) in thetas.iter().enumerate() {
            let stencil_state =
                self.state
                    .with_degeneracy(theta, self.mu_bracket.0, self.mu_bracket.1)?;
            // φ and S_HF depend on (Θ, μ) alone, so one response serves the
            // whole coupling row; the quantum kernel likewise
            let response = StaticResponse {
                idr: response::compute_idr(self.grid, &stencil_state, self.nl),
                ssf_hf: response::compute_ssf_hf(self.grid, &stencil_state),
            };
            let kernel = if self.quantum {
                Some(FixedKernel::compute(self.grid, &stencil_state, self.nl)?)
            } else {
                None
            };
            for (k, &rs) in rsp.iter().enumerate() {
                let point = stencil_state.with_coupling(rs);
                let (solution, _) =
                    self.solve_with_response(&point, alpha, &response, kernel.as_ref())?;
                let energy = structure::internal_energy(&solution.ssf, self.grid, rs);
                integrand[[t, k]] = rs * energy;
                if let Some(adder) = adder.as_mut() {
                    adder[[t, k]] =
                        structure::quantum_sum_rule_term(&solution.ssf, self.grid, &point)?;
                }
                progress.inc(1);
            }
        }
        progress.finish_and_clear();
        Ok(ThermoTable {
            rsp,
            integrand,
            adder,
        })
    }

    // One inner solve at a stencil point, rebuilding the static response
    fn solve_at(
        &self,
        state: &StatePoint,
        alpha: f64,
        kernel: Option<&FixedKernel>,
    ) -> Result<(Solution, LoopDiagnostics), SolverError> {
        let response = StaticResponse {
            idr: response::compute_idr(self.grid, state, self.nl),
            ssf_hf: response::compute_ssf_hf(self.grid, state),
        };
        let owned_kernel = if self.quantum && kernel.is_none() {
            Some(FixedKernel::compute(self.grid, state, self.nl)?)
        } else {
            None
        };
        self.solve_with_response(state, alpha, &response, kernel.or(owned_kernel.as_ref()))
    }

    fn solve_with_response(
        &self,
        state: &StatePoint,
        alpha: f64,
        response: &StaticResponse,
        kernel: Option<&FixedKernel>,
    ) -> Result<(Solution, LoopDiagnostics), SolverError> {
        let closure = if self.quantum {
            ClosureContext::QVsStls {
                kernel: kernel.expect("quantum stencil solves carry a kernel"),
                alpha,
            }
        } else {
            ClosureContext::VsStls { alpha }
        };
        let mut inner = InnerLoopBuilder::new()
            .with_grid(self.grid)
            .with_state(state)
            .with_response(response)
            .with_convergence(self.inner)
            .build(closure);
        let mut solution = Solution::sized(
            self.grid.num_points(),
            self.quantum.then_some(self.nl),
        );
        let diagnostics = inner.run_loop(&mut solution)?;
        Ok((solution, diagnostics))
    }

    // Steps 4-5: the finite-difference sum-rule expression for α. The
    // classical schemes carry the internal energy through the stencil; the
    // quantum schemes carry the Fermi-weighted structure integral Q in its
    // place, with the same dimensionless derivative scalings.
    fn sum_rule_alpha(&self, table: &ThermoTable) -> Result<f64, SolverError> {
        let rs = self.state.rs;
        let theta = self.state.theta;
        let drs = self.vs.drs;
        let dtheta = self.vs.dtheta;
        let centre_k = COUPLING_STENCIL_BELOW;

        // Free-energy density on the three Θ rows by trapezoidal integration
        // of rs·u(rs); the integration zero at rsp[0] cancels in the second
        // differences entering the residual
        let free_energy =
            |t: usize| -> Vec<f64> { cumulative_free_energy(&table.rsp, table.integrand.row(t)) };
        let fxc_cold = free_energy(0);
        let fxc = free_energy(1);
        let fxc_hot = free_energy(2);

        let fxcr = rs * (fxc[centre_k + 1] - fxc[centre_k - 1]) / (2.0 * drs);
        let fxcrr = rs * rs * (fxc[centre_k + 1] - 2.0 * fxc[centre_k] + fxc[centre_k - 1])
            / (drs * drs);
        let fxct = theta * (fxc_hot[centre_k] - fxc_cold[centre_k]) / (2.0 * dtheta);
        let fxctt = theta * theta
            * (fxc_hot[centre_k] - 2.0 * fxc[centre_k] + fxc_cold[centre_k])
            / (dtheta * dtheta);
        let fxcrt = rs * theta
            * ((fxc_hot[centre_k + 1] - fxc_hot[centre_k - 1])
                - (fxc_cold[centre_k + 1] - fxc_cold[centre_k - 1]))
            / (4.0 * drs * dtheta);

        let (base, base_r, base_t) = if self.quantum {
            let adder = table.adder.as_ref().ok_or_else(|| SolverError::InputInvalid {
                field: "vs_thermo_file",
                message: "the quantum sum rule requires the Fermi-weighted structure \
                          column of the thermodynamic table"
                    .to_string(),
            })?;
            let q = adder[[1, centre_k]] / rs;
            let q_r = (adder[[1, centre_k + 1]] - adder[[1, centre_k - 1]]) / (2.0 * drs) - q;
            let q_t =
                theta * (adder[[2, centre_k]] - adder[[0, centre_k]]) / (rs * 2.0 * dtheta);
            (q, q_r, q_t)
        } else {
            let energy = table.integrand[[1, centre_k]] / rs;
            let energy_r = rs
                * (table.integrand[[1, centre_k + 1]] / table.rsp[centre_k + 1]
                    - table.integrand[[1, centre_k - 1]] / table.rsp[centre_k - 1])
                / (2.0 * drs);
            let energy_t = theta
                * (table.integrand[[2, centre_k]] - table.integrand[[0, centre_k]])
                / (rs * 2.0 * dtheta);
            (energy, energy_r, energy_t)
        };

        let numerator =
            base - fxcrr / 6.0 + fxcr / 3.0 - 2.0 / 3.0 * fxctt - 2.0 / 3.0 * fxcrt + fxct / 3.0;
        let denominator = base + base_r / 3.0 + 2.0 / 3.0 * base_t;
        Ok(numerator / denominator)
    }
}

// fxc(rs_k) = rsp_k^{-2} ∫ rs u(rs) drs from the head of the stencil
fn cumulative_free_energy(rsp: &[f64], integrand: ndarray::ArrayView1<'_, f64>) -> Vec<f64> {
    let mut running = 0.0;
    let mut fxc = vec![0.0; rsp.len()];
    for k in 1..rsp.len() {
        running += 0.5 * (integrand[k] + integrand[k - 1]) * (rsp[k] - rsp[k - 1]);
        fxc[k] = running / (rsp[k] * rsp[k]);
    }
    fxc
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::Theory;
    use ndarray::Array2;

    fn target() -> (WaveVectorGrid<f64>, StatePoint, Convergence, VsConvergence) {
        let grid = WaveVectorGrid::build(0.2, 10.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::VsStls, -10.0, 10.0).unwrap();
        let inner = Convergence {
            tolerance: 1e-4,
            maximum_iterations: 200,
            mixing: 0.3,
        };
        let vs = VsConvergence {
            alpha_guess: 0.5,
            tolerance: 1e-3,
            maximum_iterations: 50,
            mixing: 1.0,
            drs: 0.1,
            dtheta: 0.1,
            solve_csr: true,
        };
        (grid, state, inner, vs)
    }

    #[test]
    fn stencil_narrower_than_the_coupling_is_rejected() {
        let (grid, state, inner, mut vs) = target();
        vs.drs = 0.5;
        let mut outer = OuterLoopBuilder::new()
            .with_grid(&grid)
            .with_state(&state)
            .with_inner_convergence(&inner)
            .with_vs_convergence(&vs)
            .build(None, false, (-10.0, 10.0), 16);
        assert!(matches!(
            outer.run_loop(),
            Err(SolverError::InputInvalid { field: "vs_drs", .. })
        ));
    }

    #[test]
    fn alpha_converges_to_a_finite_value() {
        let (grid, state, inner, vs) = target();
        let mut outer = OuterLoopBuilder::new()
            .with_grid(&grid)
            .with_state(&state)
            .with_inner_convergence(&inner)
            .with_vs_convergence(&vs)
            .build(None, false, (-10.0, 10.0), 16);
        let solved = outer.run_loop().unwrap();
        assert!(solved.alpha.is_finite());
        assert!(solved.residual <= 1e-3, "residual {}", solved.residual);
        assert!(solved.iterations <= 50);
        assert!(solved.solution.ssf.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn supplied_thermo_table_bypasses_the_sweep() {
        let (grid, state, inner, vs) = target();
        // A synthetic integrand rs·u with u = -c·rs gives an analytic table
        let rsp: Vec<f64> = (0..5).map(|k| 0.7 + 0.1 * k as f64).collect();
        let mut integrand = Array2::zeros((3, 5));
        for t in 0..3 {
            for (k, &rs) in rsp.iter().enumerate() {
                integrand[[t, k]] = -0.3 * rs * rs * (1.0 + 0.05 * t as f64);
            }
        }
        let table = ThermoTable {
            rsp,
            integrand,
            adder: None,
        };
        let mut outer = OuterLoopBuilder::new()
            .with_grid(&grid)
            .with_state(&state)
            .with_inner_convergence(&inner)
            .with_vs_convergence(&vs)
            .build(Some(table), false, (-10.0, 10.0), 16);
        let solved = outer.run_loop().unwrap();
        // With a fixed table the update is stationary after one evaluation
        assert!(solved.iterations <= 2);
    }
}
