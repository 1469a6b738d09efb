// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Auxiliary density response
//!
//! The quantum schemes replace G(x) φ(x, l) by the auxiliary density response
//! ψ(x, l), a double integral whose inner kernel depends on the state point
//! and the grid but not on S. The kernel is the dominant cost of the static
//! quantum solve, so it is computed once, cached to disk, and folded against
//! the evolving structure factor on every iteration.

use crate::error::{CacheError, SolverError};
use crate::inner_loop::Convergence;
use crate::state::StatePoint;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use jellium_mesher::{Discretisation, WaveVectorGrid};
use jellium_numerics::{Integrator1D, Interpolator1D};
use ndarray::{Array1, Array2, Array3, Axis};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

// Binary round-trip tolerance on the cache header
const HEADER_TOLERANCE: f64 = 1e-15;

/// The state-point-only kernel tensor fixed(i, l, k), indexed
/// (wave-vector, Matsubara, fold wave-vector)
pub(crate) struct FixedKernel {
    data: Array3<f64>,
    theta: f64,
    rs: f64,
}

impl FixedKernel {
    /// Compute the kernel for every (x, l, t) triple.
    ///
    /// Parallel over the outer wave-vector rows; each task owns its
    /// integration workspace and writes a disjoint row.
    pub(crate) fn compute(
        grid: &WaveVectorGrid<f64>,
        state: &StatePoint,
        nl: usize,
    ) -> Result<Self, SolverError> {
        let nx = grid.num_points();
        let back = grid.back();
        let theta = state.theta;
        let mu = state.mu;

        let rows: Vec<Vec<f64>> = (0..nx)
            .into_par_iter()
            .map(|i| {
                let integrator = Integrator1D::new(1e-5);
                let x = grid.point_at(i);
                let mut row = vec![f64::NAN; nl * nx];
                for l in 0..nl {
                    for k in 0..nx {
                        let u = grid.point_at(k);
                        // Failures become sentinels, classified at the join
                        row[l * nx + k] = integrator
                            .compute(|q| kernel_integrand(q, x, u, l, theta, mu), 0.0, back)
                            .map(|quadrature| quadrature.value)
                            .unwrap_or(f64::NAN);
                    }
                }
                row
            })
            .collect();

        let mut data = Array3::zeros((nx, nl, nx));
        for (i, row) in rows.into_iter().enumerate() {
            for l in 0..nl {
                for k in 0..nx {
                    let value = row[l * nx + k];
                    if !value.is_finite() {
                        return Err(SolverError::NanEncountered(
                            "the fixed auxiliary-response kernel",
                        ));
                    }
                    data[[i, l, k]] = value;
                }
            }
        }
        Ok(Self {
            data,
            theta: state.theta,
            rs: state.rs,
        })
    }

    /// Number of Matsubara frequencies carried by the kernel
    pub(crate) fn num_matsubara(&self) -> usize {
        self.data.shape()[1]
    }

    /// The fold row fixed(i, l, ·)
    fn row(&self, i: usize, l: usize) -> Vec<f64> {
        self.data
            .index_axis(Axis(0), i)
            .index_axis(Axis(0), l)
            .to_vec()
    }

    /// Serialize the kernel with its compatibility header.
    pub(crate) fn store(&self, path: &Path, grid: &WaveVectorGrid<f64>) -> Result<(), SolverError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_i32::<LittleEndian>(grid.num_points() as i32)?;
        writer.write_f64::<LittleEndian>(grid.spacing())?;
        writer.write_f64::<LittleEndian>(grid.cutoff())?;
        writer.write_i32::<LittleEndian>(self.num_matsubara() as i32)?;
        writer.write_f64::<LittleEndian>(self.theta)?;
        writer.write_f64::<LittleEndian>(self.rs)?;
        for &value in self.data.iter() {
            writer.write_f64::<LittleEndian>(value)?;
        }
        Ok(())
    }

    /// Load a kernel cached by an earlier run; every header field must match
    /// the current input to within the binary round-trip tolerance.
    pub(crate) fn load(
        path: &Path,
        grid: &WaveVectorGrid<f64>,
        state: &StatePoint,
        nl: usize,
    ) -> Result<Self, SolverError> {
        let mut reader = BufReader::new(File::open(path)?);
        let nx_file = reader.read_i32::<LittleEndian>()? as usize;
        let dx_file = reader.read_f64::<LittleEndian>()?;
        let xmax_file = reader.read_f64::<LittleEndian>()?;
        let nl_file = reader.read_i32::<LittleEndian>()? as usize;
        let theta_file = reader.read_f64::<LittleEndian>()?;
        let rs_file = reader.read_f64::<LittleEndian>()?;

        check_header("grid points (nx)", grid.num_points() as f64, nx_file as f64)?;
        check_header("resolution (dx)", grid.spacing(), dx_file)?;
        check_header("cutoff (xmax)", grid.cutoff(), xmax_file)?;
        check_header("Matsubara frequencies (nl)", nl as f64, nl_file as f64)?;
        check_header("degeneracy parameter (Theta)", state.theta, theta_file)?;
        check_header("coupling parameter (rs)", state.rs, rs_file)?;

        let expected = nx_file * nl_file * nx_file;
        let mut body = vec![0.0; expected];
        for (read, slot) in body.iter_mut().enumerate() {
            *slot = reader
                .read_f64::<LittleEndian>()
                .map_err(|_| SolverError::Cache(CacheError::Truncated { expected, read }))?;
        }
        // The file must end exactly after the last array element
        let mut probe = [0u8; 1];
        if reader.read(&mut probe)? != 0 {
            return Err(SolverError::Cache(CacheError::Truncated {
                expected,
                read: expected + 1,
            }));
        }

        let data = Array3::from_shape_vec((nx_file, nl_file, nx_file), body)
            .expect("the body length was sized from the header");
        Ok(Self {
            data,
            theta: theta_file,
            rs: rs_file,
        })
    }
}

fn check_header(quantity: &'static str, input: f64, file: f64) -> Result<(), SolverError> {
    if (input - file).abs() > HEADER_TOLERANCE {
        return Err(SolverError::Cache(CacheError::Incompatible {
            quantity,
            input,
            file,
        }));
    }
    Ok(())
}

/// The q-integrand of the fixed kernel: the Matsubara continuation of the
/// dynamic level-3 forms, with the derivative form at l = 0
pub(crate) fn kernel_integrand(q: f64, x: f64, u: f64, l: usize, theta: f64, mu: f64) -> f64 {
    if q == 0.0 || x == 0.0 {
        return 0.0;
    }
    let q2 = q * q;
    let x2 = x * x;
    let u2 = u * u;
    let t = 2.0 * x2 - u2;
    let f1 = t + 4.0 * x * q;
    let f2 = t - 4.0 * x * q;
    if l == 0 {
        if f1 == 0.0 || f2 == 0.0 {
            return 0.0;
        }
        let logarg = (f1 / f2).abs();
        -(3.0 / (4.0 * theta)) * q / ((q2 / theta - mu).exp() + (-q2 / theta + mu).exp() + 2.0)
            * ((q2 - t * t / (16.0 * x2)) * logarg.ln() + (q / x) * t / 2.0)
    } else {
        let matsubara = 2.0 * std::f64::consts::PI * l as f64 * theta;
        let shift = 4.0 * matsubara * matsubara;
        -(3.0 / 8.0) * q / ((q2 / theta - mu).exp() + 1.0)
            * ((f1 * f1 + shift) / (f2 * f2 + shift)).ln()
    }
}

/// ψ(x, l) for the plain quantum scheme: the kernel folded against
/// t (S(t) − 1)
pub(crate) fn compute_adr(
    kernel: &FixedKernel,
    ssf: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
) -> Result<Array2<f64>, SolverError> {
    let weight: Vec<f64> = grid
        .iter_points()
        .zip(ssf.iter())
        .map(|(t, &s)| t * (s - 1.0))
        .collect();
    let weight_spline = Interpolator1D::new(grid.as_slice(), &weight)?;
    fold(kernel, grid, &weight_spline)
}

/// ψ(x, l) for the quantum IET scheme.
///
/// The fold weight carries the bridge factor and the previous ψ/φ ratio, so
/// ψ is iterated by an inner Picard loop at every outer step; the seed is the
/// outer iterate.
pub(crate) fn compute_adr_iet(
    kernel: &FixedKernel,
    adr_seed: &Array2<f64>,
    idr: &Array2<f64>,
    ssf: &Array1<f64>,
    bridge: &Array1<f64>,
    grid: &WaveVectorGrid<f64>,
    convergence: &Convergence,
) -> Result<Array2<f64>, SolverError> {
    let nx = grid.num_points();
    let mut adr = adr_seed.clone();
    let mut residual = 1.0;
    let mut iteration = 0;
    while iteration < convergence.maximum_iterations && residual > convergence.tolerance {
        let weight: Vec<f64> = (0..nx)
            .map(|k| {
                let t = grid.point_at(k);
                let phi = idr[[k, 0]];
                let ratio = if phi != 0.0 { adr[[k, 0]] / phi } else { 0.0 };
                t * (ssf[k] * (1.0 - bridge[k]) - 1.0 - ratio * (ssf[k] - 1.0))
            })
            .collect();
        let weight_spline = Interpolator1D::new(grid.as_slice(), &weight)?;
        let update = fold(kernel, grid, &weight_spline)?;

        residual = update
            .column(0)
            .iter()
            .zip(adr.column(0).iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        if !residual.is_finite() {
            return Err(SolverError::NanEncountered("the inner ψ iteration"));
        }
        iteration += 1;
        for (previous, &value) in adr.iter_mut().zip(update.iter()) {
            *previous = convergence.mixing * value + (1.0 - convergence.mixing) * *previous;
        }
    }
    Ok(adr)
}

// The shared fold: for each (x, l), integrate the spline of the fold weight
// against the spline of the kernel row
fn fold(
    kernel: &FixedKernel,
    grid: &WaveVectorGrid<f64>,
    weight: &Interpolator1D<f64>,
) -> Result<Array2<f64>, SolverError> {
    let nx = grid.num_points();
    let nl = kernel.num_matsubara();
    let front = grid.front();
    let back = grid.back();

    let rows: Vec<Result<Vec<f64>, SolverError>> = (0..nx)
        .into_par_iter()
        .map(|i| {
            let integrator = Integrator1D::new(1e-5);
            let mut row = vec![0.0; nl];
            for (l, slot) in row.iter_mut().enumerate() {
                let fixed = kernel.row(i, l);
                let fixed_spline = Interpolator1D::new(grid.as_slice(), &fixed)?;
                *slot = integrator
                    .compute(|t| weight.eval(t) * fixed_spline.eval(t), front, back)?
                    .value;
            }
            Ok(row)
        })
        .collect();

    let mut adr = Array2::zeros((nx, nl));
    for (i, row) in rows.into_iter().enumerate() {
        let row = row?;
        for (l, value) in row.into_iter().enumerate() {
            adr[[i, l]] = value;
        }
    }
    Ok(adr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::Theory;
    use jellium_mesher::WaveVectorGrid;
    use ndarray::Array1;

    fn small_problem() -> (WaveVectorGrid<f64>, StatePoint, FixedKernel) {
        let grid = WaveVectorGrid::build(0.4, 5.0).unwrap();
        let state = StatePoint::new(1.0, 1.0, Theory::Qstls, -10.0, 10.0).unwrap();
        let kernel = FixedKernel::compute(&grid, &state, 4).unwrap();
        (grid, state, kernel)
    }

    #[test]
    fn kernel_integrand_decays_with_the_fermi_factor() {
        let near = kernel_integrand(1.0, 1.0, 1.0, 1, 1.0, -0.05).abs();
        let far = kernel_integrand(6.0, 1.0, 1.0, 1, 1.0, -0.05).abs();
        assert!(far < near * 1e-3, "near {near}, far {far}");
    }

    #[test]
    fn kernel_rows_are_finite() {
        let (_, _, kernel) = small_problem();
        assert!(kernel.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn ideal_structure_factor_gives_vanishing_response_weight() {
        // S ≡ 1 makes the fold weight zero, so ψ must vanish identically
        let (grid, _, kernel) = small_problem();
        let ssf = Array1::ones(grid.num_points());
        let adr = compute_adr(&kernel, &ssf, &grid).unwrap();
        assert!(adr.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn kernel_round_trips_through_its_cache() {
        let (grid, state, kernel) = small_problem();
        let path = std::env::temp_dir().join("jellium_adr_kernel_roundtrip.bin");
        kernel.store(&path, &grid).unwrap();
        let reloaded = FixedKernel::load(&path, &grid, &state, 4).unwrap();
        for (a, b) in kernel.data.iter().zip(reloaded.data.iter()) {
            assert_eq!(a, b, "cache round trip must be bit exact");
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn incompatible_grid_is_fatal() {
        let (grid, state, kernel) = small_problem();
        let path = std::env::temp_dir().join("jellium_adr_kernel_mismatch.bin");
        kernel.store(&path, &grid).unwrap();
        let finer = WaveVectorGrid::build(0.404, 5.0).unwrap();
        assert!(matches!(
            FixedKernel::load(&path, &finer, &state, 4),
            Err(SolverError::Cache(CacheError::Incompatible { .. }))
        ));
        std::fs::remove_file(&path).ok();
    }
}
