// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Inner loop
//!
//! The damped Picard iteration closing the cycle between the static structure
//! factor and the local-field correction. Every scheme shares the same
//! skeleton: update the correction from S, mix it into the previous iterate,
//! rebuild S, and measure the ℓ₂ residual of the un-mixed update.

use crate::auxiliary::{self, FixedKernel};
use crate::error::SolverError;
use crate::state::StatePoint;
use crate::structure::{self, LocalField};
use jellium_mesher::{Discretisation, WaveVectorGrid};
use jellium_numerics::Integrator1D;
use nalgebra::DVector;
use ndarray::{Array1, Array2};
use std::marker::PhantomData;
use std::time::Instant;

/// Convergence control shared by the drivers
#[derive(Debug, Clone, Copy)]
pub(crate) struct Convergence {
    /// Residual threshold for convergence
    pub tolerance: f64,
    /// Iteration budget
    pub maximum_iterations: usize,
    /// Picard mixing parameter a ∈ (0, 1]
    pub mixing: f64,
}

/// Progress of a driver through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    /// No iteration has run
    NotStarted,
    /// The driver is between iterations
    Iterating,
    /// The residual fell below the tolerance
    Converged,
    /// The iteration budget was exhausted
    MaxIterReached,
    /// A numerical failure surfaced at a convergence check
    Failed,
}

/// Where the driver stopped and how far it got
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopDiagnostics {
    /// Iterations consumed
    pub iterations: usize,
    /// Final residual
    pub residual: f64,
    /// Terminal state
    pub state: LoopState,
}

/// The converged structural arrays, owned by the caller
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    /// Static structure factor
    pub ssf: Array1<f64>,
    /// Static local-field correction
    pub slfc: Array1<f64>,
    /// Auxiliary density response for the quantum schemes
    pub adr: Option<Array2<f64>>,
}

impl Solution {
    /// An empty solution sized to the grid
    pub(crate) fn sized(nx: usize, nl: Option<usize>) -> Self {
        Self {
            ssf: Array1::zeros(nx),
            slfc: Array1::zeros(nx),
            adr: nl.map(|nl| Array2::zeros((nx, nl))),
        }
    }
}

/// The closure context handed to the driver: everything a scheme needs beyond
/// the shared (S_HF, φ) data
pub(crate) enum ClosureContext<'a> {
    /// G = 0
    Rpa,
    /// Classical STLS
    Stls,
    /// Classical STLS-IET with a precomputed bridge term
    StlsIet {
        /// b(x) on the structural grid
        bridge: &'a Array1<f64>,
    },
    /// Effective static approximation
    Esa,
    /// Classical STLS with the variational α correction
    VsStls {
        /// The free parameter of the compressibility sum rule
        alpha: f64,
    },
    /// Quantum auxiliary response over a cached kernel
    Qstls {
        /// State-point-only kernel tensor
        kernel: &'a FixedKernel,
    },
    /// Quantum auxiliary response with a bridge factor and inner ψ iteration
    QstlsIet {
        /// State-point-only kernel tensor
        kernel: &'a FixedKernel,
        /// b(x) on the structural grid
        bridge: &'a Array1<f64>,
    },
    /// Quantum auxiliary response with the variational α correction
    QVsStls {
        /// State-point-only kernel tensor
        kernel: &'a FixedKernel,
        /// The free parameter of the compressibility sum rule
        alpha: f64,
    },
}

impl ClosureContext<'_> {
    fn is_quantum(&self) -> bool {
        matches!(
            self,
            ClosureContext::Qstls { .. }
                | ClosureContext::QstlsIet { .. }
                | ClosureContext::QVsStls { .. }
        )
    }
}

/// Builder for the inner loop
pub(crate) struct InnerLoopBuilder<RefGrid, RefState, RefResponse, RefConvergence> {
    grid: RefGrid,
    state: RefState,
    response: RefResponse,
    convergence: RefConvergence,
    marker: PhantomData<()>,
}

/// The shared static inputs: φ(x, l) and S_HF(x)
pub(crate) struct StaticResponse {
    /// Ideal density response on the Matsubara grid
    pub idr: Array2<f64>,
    /// Hartree–Fock static structure factor
    pub ssf_hf: Array1<f64>,
}

impl InnerLoopBuilder<(), (), (), ()> {
    pub(crate) fn new() -> Self {
        Self {
            grid: (),
            state: (),
            response: (),
            convergence: (),
            marker: PhantomData,
        }
    }
}

impl<RefGrid, RefState, RefResponse, RefConvergence>
    InnerLoopBuilder<RefGrid, RefState, RefResponse, RefConvergence>
{
    pub(crate) fn with_grid<Grid>(
        self,
        grid: &Grid,
    ) -> InnerLoopBuilder<&Grid, RefState, RefResponse, RefConvergence> {
        InnerLoopBuilder {
            grid,
            state: self.state,
            response: self.response,
            convergence: self.convergence,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_state<State>(
        self,
        state: &State,
    ) -> InnerLoopBuilder<RefGrid, &State, RefResponse, RefConvergence> {
        InnerLoopBuilder {
            grid: self.grid,
            state,
            response: self.response,
            convergence: self.convergence,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_response<Response>(
        self,
        response: &Response,
    ) -> InnerLoopBuilder<RefGrid, RefState, &Response, RefConvergence> {
        InnerLoopBuilder {
            grid: self.grid,
            state: self.state,
            response,
            convergence: self.convergence,
            marker: PhantomData,
        }
    }

    pub(crate) fn with_convergence<ConvergenceSettings>(
        self,
        convergence: &ConvergenceSettings,
    ) -> InnerLoopBuilder<RefGrid, RefState, RefResponse, &ConvergenceSettings> {
        InnerLoopBuilder {
            grid: self.grid,
            state: self.state,
            response: self.response,
            convergence,
            marker: PhantomData,
        }
    }
}

impl<'a> InnerLoopBuilder<&'a WaveVectorGrid<f64>, &'a StatePoint, &'a StaticResponse, &'a Convergence> {
    pub(crate) fn build(self, closure: ClosureContext<'a>) -> InnerLoop<'a> {
        InnerLoop {
            grid: self.grid,
            state: self.state,
            response: self.response,
            convergence: self.convergence,
            closure,
            status: LoopState::NotStarted,
        }
    }
}

/// The fixed-point driver
pub(crate) struct InnerLoop<'a> {
    grid: &'a WaveVectorGrid<f64>,
    state: &'a StatePoint,
    response: &'a StaticResponse,
    convergence: &'a Convergence,
    closure: ClosureContext<'a>,
    status: LoopState,
}

impl InnerLoop<'_> {
    /// The driver state after the last call to [`InnerLoop::run_loop`]
    pub(crate) fn status(&self) -> LoopState {
        self.status
    }

    /// Run the Picard iteration to convergence, writing the result into
    /// `solution`.
    pub(crate) fn run_loop(
        &mut self,
        solution: &mut Solution,
    ) -> Result<LoopDiagnostics, SolverError> {
        let diagnostics = if self.closure.is_quantum() {
            self.run_quantum(solution)
        } else {
            self.run_classical(solution)
        };
        match &diagnostics {
            Ok(report) => self.status = report.state,
            Err(_) => self.status = LoopState::Failed,
        }
        diagnostics
    }

    fn run_classical(
        &mut self,
        solution: &mut Solution,
    ) -> Result<LoopDiagnostics, SolverError> {
        let nx = self.grid.num_points();
        let integrator = Integrator1D::new(1e-5);

        // Seed: the correction of the previous pass starts at zero, the
        // un-mixed update at one, and S is built from the zero field
        let mut slfc = Array1::zeros(nx);
        let mut slfc_new: Array1<f64> = Array1::ones(nx);
        let mut ssf = structure::compute_ssf(
            &self.response.ssf_hf,
            &LocalField::Static(&slfc),
            &self.response.idr,
            self.grid,
            self.state,
        );

        self.status = LoopState::Iterating;
        let mut residual = residual_norm(&slfc_new, &slfc)?;
        let mut iteration = 0;
        while iteration < self.convergence.maximum_iterations && residual > self.convergence.tolerance
        {
            let tic = Instant::now();

            slfc_new = match &self.closure {
                ClosureContext::Rpa => Array1::zeros(nx),
                ClosureContext::Stls => structure::compute_slfc_stls(&ssf, self.grid),
                ClosureContext::StlsIet { bridge } => {
                    structure::compute_slfc_iet(&slfc, &ssf, bridge, self.grid, &integrator)?
                }
                ClosureContext::Esa => structure::compute_slfc_esa(&ssf, self.grid),
                ClosureContext::VsStls { alpha } => {
                    let mut update = structure::compute_slfc_stls(&ssf, self.grid);
                    apply_variational_correction(&mut update, *alpha, self.grid);
                    update
                }
                _ => unreachable!("quantum closures run through run_quantum"),
            };

            residual = residual_norm(&slfc_new, &slfc)?;
            iteration += 1;
            // Picard mixing toward the new iterate
            for (previous, &update) in slfc.iter_mut().zip(slfc_new.iter()) {
                *previous =
                    self.convergence.mixing * update + (1.0 - self.convergence.mixing) * *previous;
            }
            ssf = structure::compute_ssf(
                &self.response.ssf_hf,
                &LocalField::Static(&slfc),
                &self.response.idr,
                self.grid,
                self.state,
            );

            tracing::info!(
                iteration,
                elapsed = ?tic.elapsed(),
                residual = format_args!("{residual:.5e}"),
                "inner loop"
            );
        }

        let _ = std::mem::replace(&mut solution.ssf, ssf);
        let _ = std::mem::replace(&mut solution.slfc, slfc);
        let state = if residual <= self.convergence.tolerance {
            LoopState::Converged
        } else {
            LoopState::MaxIterReached
        };
        Ok(LoopDiagnostics {
            iterations: iteration,
            residual,
            state,
        })
    }

    fn run_quantum(&mut self, solution: &mut Solution) -> Result<LoopDiagnostics, SolverError> {
        let nx = self.grid.num_points();
        let nl = self.response.idr.shape()[1];

        let mut adr = Array2::zeros((nx, nl));
        let mut effective = Array2::zeros((nx, nl));
        let mut ssf = structure::compute_ssf(
            &self.response.ssf_hf,
            &LocalField::PerFrequency(&effective),
            &self.response.idr,
            self.grid,
            self.state,
        );

        self.status = LoopState::Iterating;
        let mut residual = 1.0;
        let mut iteration = 0;
        while iteration < self.convergence.maximum_iterations && residual > self.convergence.tolerance
        {
            let tic = Instant::now();

            let adr_new = match &self.closure {
                ClosureContext::Qstls { kernel } => {
                    auxiliary::compute_adr(kernel, &ssf, self.grid)?
                }
                ClosureContext::QstlsIet { kernel, bridge } => auxiliary::compute_adr_iet(
                    kernel,
                    &adr,
                    &self.response.idr,
                    &ssf,
                    bridge,
                    self.grid,
                    self.convergence,
                )?,
                ClosureContext::QVsStls { kernel, alpha } => {
                    let mut update = auxiliary::compute_adr(kernel, &ssf, self.grid)?;
                    for l in 0..nl {
                        let mut buffer = update.column(l).to_owned();
                        apply_variational_correction(&mut buffer, *alpha, self.grid);
                        update.column_mut(l).assign(&buffer);
                    }
                    update
                }
                _ => unreachable!("classical closures run through run_classical"),
            };

            residual = residual_norm(
                &adr_new.column(0).to_owned(),
                &adr.column(0).to_owned(),
            )?;
            iteration += 1;
            for (previous, &update) in adr.iter_mut().zip(adr_new.iter()) {
                *previous =
                    self.convergence.mixing * update + (1.0 - self.convergence.mixing) * *previous;
            }
            for i in 0..nx {
                for l in 0..nl {
                    let phi = self.response.idr[[i, l]];
                    effective[[i, l]] = if phi != 0.0 { adr[[i, l]] / phi } else { 0.0 };
                }
            }
            ssf = structure::compute_ssf(
                &self.response.ssf_hf,
                &LocalField::PerFrequency(&effective),
                &self.response.idr,
                self.grid,
                self.state,
            );

            tracing::info!(
                iteration,
                elapsed = ?tic.elapsed(),
                residual = format_args!("{residual:.5e}"),
                "inner loop (quantum)"
            );
        }

        // The static G reported alongside the quantum solution is the l = 0
        // ratio ψ/φ
        let mut slfc = Array1::zeros(nx);
        for i in 0..nx {
            let phi = self.response.idr[[i, 0]];
            slfc[i] = if phi != 0.0 { adr[[i, 0]] / phi } else { 0.0 };
        }

        let _ = std::mem::replace(&mut solution.ssf, ssf);
        let _ = std::mem::replace(&mut solution.slfc, slfc);
        solution.adr = Some(adr);
        let state = if residual <= self.convergence.tolerance {
            LoopState::Converged
        } else {
            LoopState::MaxIterReached
        };
        Ok(LoopDiagnostics {
            iterations: iteration,
            residual,
            state,
        })
    }
}

/// The ℓ₂ residual between the un-mixed update and the previous iterate
fn residual_norm(update: &Array1<f64>, previous: &Array1<f64>) -> Result<f64, SolverError> {
    let difference = DVector::from_iterator(
        update.len(),
        update.iter().zip(previous.iter()).map(|(&a, &b)| a - b),
    );
    let norm = difference.norm();
    if !norm.is_finite() {
        return Err(SolverError::NanEncountered("the fixed-point residual"));
    }
    Ok(norm)
}

/// The variational correction of the VS schemes,
/// G → G + (α/3) G − (α/3) x ∂G/∂x, with one-sided stencils at the edges
pub(crate) fn apply_variational_correction(
    slfc: &mut Array1<f64>,
    alpha: f64,
    grid: &WaveVectorGrid<f64>,
) {
    let nx = slfc.len();
    let dx = grid.spacing();
    let reference = slfc.clone();
    for i in 0..nx {
        let derivative = if i == 0 {
            (-3.0 * reference[0] + 4.0 * reference[1] - reference[2]) / (2.0 * dx)
        } else if i == nx - 1 {
            (3.0 * reference[nx - 1] - 4.0 * reference[nx - 2] + reference[nx - 3]) / (2.0 * dx)
        } else {
            (reference[i + 1] - reference[i - 1]) / (2.0 * dx)
        };
        slfc[i] += alpha / 3.0 * reference[i] - alpha / 3.0 * grid.point_at(i) * derivative;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response;
    use crate::theory::Theory;
    use approx::assert_relative_eq;

    fn run(theory: Theory, rs: f64, theta: f64, convergence: Convergence) -> (Solution, LoopDiagnostics) {
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        let state = StatePoint::new(rs, theta, theory, -10.0, 10.0).unwrap();
        let response = StaticResponse {
            idr: response::compute_idr(&grid, &state, 128),
            ssf_hf: response::compute_ssf_hf(&grid, &state),
        };
        let closure = match theory {
            Theory::Rpa => ClosureContext::Rpa,
            Theory::Stls => ClosureContext::Stls,
            _ => unimplemented!(),
        };
        let mut loop_ = InnerLoopBuilder::new()
            .with_grid(&grid)
            .with_state(&state)
            .with_response(&response)
            .with_convergence(&convergence)
            .build(closure);
        let mut solution = Solution::sized(grid.num_points(), None);
        let diagnostics = loop_.run_loop(&mut solution).unwrap();
        (solution, diagnostics)
    }

    #[test]
    fn rpa_terminates_in_a_single_sweep() {
        let convergence = Convergence {
            tolerance: 1e-5,
            maximum_iterations: 10,
            mixing: 1.0,
        };
        let (solution, diagnostics) = run(Theory::Rpa, 1.0, 1.0, convergence);
        assert_eq!(diagnostics.state, LoopState::Converged);
        assert!(solution.ssf.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn stls_converges_within_the_documented_budget() {
        // rs = 2, Θ = 0.5 with a_mix = 0.1 converges in at most 150 steps
        let convergence = Convergence {
            tolerance: 1e-5,
            maximum_iterations: 150,
            mixing: 0.1,
        };
        let (solution, diagnostics) = run(Theory::Stls, 2.0, 0.5, convergence);
        assert_eq!(diagnostics.state, LoopState::Converged);
        assert!(diagnostics.iterations <= 150);
        // The local-field correction pushes S below the RPA everywhere it acts
        assert!(solution.slfc.iter().any(|&g| g > 0.05));
    }

    #[test]
    fn converged_state_is_a_fixed_point() {
        let convergence = Convergence {
            tolerance: 1e-5,
            maximum_iterations: 200,
            mixing: 0.2,
        };
        let (solution, _) = run(Theory::Stls, 1.0, 1.0, convergence);
        // One further closure application moves G by less than the tolerance
        let grid = WaveVectorGrid::build(0.1, 20.0).unwrap();
        let again = structure::compute_slfc_stls(&solution.ssf, &grid);
        let residual = residual_norm(&again, &solution.slfc).unwrap();
        assert!(residual <= 1e-4, "residual {residual}");
    }

    #[test]
    fn iteration_budget_exhaustion_is_reported_not_raised() {
        let convergence = Convergence {
            tolerance: 1e-14,
            maximum_iterations: 3,
            mixing: 0.1,
        };
        let (_, diagnostics) = run(Theory::Stls, 1.0, 1.0, convergence);
        assert_eq!(diagnostics.state, LoopState::MaxIterReached);
        assert_eq!(diagnostics.iterations, 3);
    }

    #[test]
    fn variational_correction_vanishes_for_a_scale_free_field() {
        // G(x) = c x is annihilated by (1/3)(G - x G') up to edge stencils
        let grid = WaveVectorGrid::build(0.1, 10.0).unwrap();
        let mut slfc: Array1<f64> =
            Array1::from_iter(grid.iter_points().map(|x| 0.7 * x));
        let reference = slfc.clone();
        apply_variational_correction(&mut slfc, 0.9, &grid);
        for i in 1..grid.num_points() - 1 {
            assert_relative_eq!(slfc[i], reference[i], max_relative = 1e-10);
        }
    }
}
