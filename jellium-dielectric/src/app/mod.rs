// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! This module governs the high-level orchestration of a calculation: the
//! command line, the configuration profile, the theory dispatch table and
//! the wiring of grids, drivers and persistence.

pub(crate) mod configuration;
mod telemetry;
mod tracker;

pub(crate) use configuration::Configuration;
pub(crate) use tracker::{Tracker, TrackerBuilder};

use crate::auxiliary::FixedKernel;
use crate::dynamic::DynamicEngine;
use crate::error::SolverError;
use crate::inner_loop::{
    ClosureContext, Convergence, InnerLoopBuilder, LoopState, StaticResponse,
};
use crate::outer_loop::{OuterLoopBuilder, ThermoTable, VsConvergence};
use crate::persistence::{adr_cache, restart, text};
use crate::response;
use crate::state::StatePoint;
use crate::structure::{self, bridge};
use crate::theory::{Closure, IetMapping, Mode, Theory};
use clap::Parser;
use color_eyre::eyre::eyre;
use jellium_mesher::{Discretisation, FrequencyGrid, WaveVectorGrid};
use std::path::{Path, PathBuf};

/// Command-line surface: long options only, one per input-record field.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct App {
    #[clap(long, arg_enum)]
    theory: Option<Theory>,
    #[clap(long, arg_enum)]
    mode: Option<Mode>,
    #[clap(long)]
    theta: Option<f64>,
    #[clap(long)]
    rs: Option<f64>,
    #[clap(long)]
    mu_lo: Option<f64>,
    #[clap(long)]
    mu_hi: Option<f64>,
    #[clap(long)]
    dx: Option<f64>,
    #[clap(long)]
    xmax: Option<f64>,
    #[clap(long)]
    nl: Option<usize>,
    #[clap(long)]
    n_iter: Option<usize>,
    #[clap(long)]
    err_min_iter: Option<f64>,
    #[clap(long)]
    a_mix: Option<f64>,
    #[clap(long)]
    n_threads: Option<usize>,
    #[clap(long, arg_enum)]
    iet_mapping: Option<IetMapping>,
    #[clap(long)]
    stls_guess_file: Option<PathBuf>,
    #[clap(long)]
    qstls_guess_file: Option<PathBuf>,
    #[clap(long)]
    qstls_fixed_file: Option<PathBuf>,
    #[clap(long)]
    qstls_iet_fixed_file: Option<PathBuf>,
    #[clap(long)]
    qstls_iet_static: Option<i32>,
    #[clap(long)]
    vs_drs: Option<f64>,
    #[clap(long)]
    vs_dt: Option<f64>,
    #[clap(long)]
    vs_alpha: Option<f64>,
    #[clap(long)]
    vs_err_min_iter: Option<f64>,
    #[clap(long)]
    vs_a_mix: Option<f64>,
    #[clap(long)]
    vs_solve_csr: Option<i32>,
    #[clap(long)]
    vs_thermo_file: Option<PathBuf>,
    #[clap(long)]
    dyn_dw: Option<f64>,
    #[clap(long)]
    dyn_wmax: Option<f64>,
    #[clap(long)]
    dyn_xtarget: Option<f64>,
    #[clap(long)]
    dyn_adr_file: Option<PathBuf>,
}

/// Entry point of the binary: parse, validate, dispatch.
pub fn run() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_subscriber(telemetry::get_subscriber("info"));

    let cli = App::parse();
    let mut record = Configuration::from_profile()?;
    apply_cli(&mut record, cli);
    record.validate()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(record.n_threads)
        .build_global()
        .map_err(|e| eyre!("failed to size the worker pool: {e}"))?;

    echo_parameters(&record);
    match record.mode {
        Mode::Static => run_static(record),
        Mode::Dynamic => run_dynamic(record),
        Mode::Guess => Err(SolverError::InputInvalid {
            field: "mode",
            message: "the text reader backing the guess mode is unimplemented in the \
                      reference solver"
                .to_string(),
        }
        .into()),
    }
}

fn apply_cli(record: &mut Configuration, cli: App) {
    macro_rules! adopt {
        ($($field:ident),*) => {
            $(if let Some(value) = cli.$field { record.$field = value; })*
        };
    }
    adopt!(
        theory, mode, theta, rs, mu_lo, mu_hi, dx, xmax, nl, n_iter, err_min_iter, a_mix,
        n_threads, iet_mapping, vs_drs, vs_dt, vs_alpha, vs_err_min_iter, vs_a_mix, dyn_dw,
        dyn_wmax, dyn_xtarget
    );
    if let Some(flag) = cli.qstls_iet_static {
        record.qstls_iet_static = flag != 0;
    }
    if let Some(flag) = cli.vs_solve_csr {
        record.vs_solve_csr = flag != 0;
    }
    record.stls_guess_file = cli.stls_guess_file.or(record.stls_guess_file.take());
    record.qstls_guess_file = cli.qstls_guess_file.or(record.qstls_guess_file.take());
    record.qstls_fixed_file = cli.qstls_fixed_file.or(record.qstls_fixed_file.take());
    record.qstls_iet_fixed_file = cli
        .qstls_iet_fixed_file
        .or(record.qstls_iet_fixed_file.take());
    record.vs_thermo_file = cli.vs_thermo_file.or(record.vs_thermo_file.take());
    record.dyn_adr_file = cli.dyn_adr_file.or(record.dyn_adr_file.take());
}

fn echo_parameters(record: &Configuration) {
    tracing::info!("------ Parameters used in the solution -------------");
    tracing::info!("Theory: {}", record.theory.label());
    tracing::info!("Quantum degeneracy parameter: {}", record.theta);
    tracing::info!("Quantum coupling parameter: {}", record.rs);
    tracing::info!(
        "Chemical potential (low and high bound): {} {}",
        record.mu_lo,
        record.mu_hi
    );
    tracing::info!("Wave-vector cutoff: {}", record.xmax);
    tracing::info!("Wave-vector resolution: {}", record.dx);
    tracing::info!("Number of Matsubara frequencies: {}", record.nl);
    tracing::info!("Maximum number of iterations: {}", record.n_iter);
    tracing::info!("Error for convergence: {:.5e}", record.err_min_iter);
    tracing::info!("Number of threads: {}", record.n_threads);
    tracing::info!("----------------------------------------------------");
}

// Shared static pipeline: restart or fresh response data, closure dispatch,
// driver run. Returns the tracker and whether the data was freshly built.
fn solve_static(record: &mut Configuration) -> Result<(Tracker, bool), SolverError> {
    let guess_file = if record.theory.is_quantum() {
        record.qstls_guess_file.clone()
    } else {
        record.stls_guess_file.clone()
    };

    let mut loaded = None;
    if let Some(path) = guess_file {
        tracing::info!(file = %path.display(), "loading restart data");
        let (file_record, idr, ssf_hf) = restart::read_restart(&path)?;
        record.theta = file_record.theta;
        record.dx = file_record.dx;
        record.xmax = file_record.xmax;
        record.nl = file_record.nl;
        loaded = Some(StaticResponse { idr, ssf_hf });
    }

    let grid = WaveVectorGrid::build(record.dx, record.xmax)?;
    tracing::info!("Chemical potential calculation");
    let state = StatePoint::new(
        record.rs,
        record.theta,
        record.theory,
        record.mu_lo,
        record.mu_hi,
    )?;
    record.mu = state.mu;
    tracing::info!("Done. Chemical potential: {:.8}", state.mu);

    let fresh = loaded.is_none();
    let response = match loaded {
        Some(response) => response,
        None => {
            tracing::info!("Normalized ideal Lindhard density calculation");
            let idr = response::compute_idr(&grid, &state, record.nl);
            tracing::info!("Static structure factor in the Hartree-Fock approximation");
            let ssf_hf = response::compute_ssf_hf(&grid, &state);
            StaticResponse { idr, ssf_hf }
        }
    };

    let nl = record.theory.is_quantum().then_some(record.nl);
    let mut tracker = TrackerBuilder::new()
        .with_grid(grid)
        .with_state(state)
        .with_response(response)
        .build(nl);

    let convergence = Convergence {
        tolerance: record.err_min_iter,
        maximum_iterations: record.n_iter,
        mixing: record.a_mix,
    };

    if record.theory.enforces_csr() {
        run_variational(record, &mut tracker, &convergence)?;
    } else {
        run_plain(record, &mut tracker, &convergence)?;
    }
    Ok((tracker, fresh))
}

// The non-variational schemes: one inner loop to convergence
fn run_plain(
    record: &Configuration,
    tracker: &mut Tracker,
    convergence: &Convergence,
) -> Result<(), SolverError> {
    let bridge = match record.theory.bridge() {
        Some(kind) => Some(bridge::compute_bridge(
            tracker.grid(),
            kind,
            record.iet_mapping,
            record.rs,
            record.theta,
        )?),
        None => None,
    };
    let kernel = if record.theory.is_quantum() {
        Some(obtain_kernel(record, tracker)?)
    } else {
        None
    };

    let closure = match record.theory.closure() {
        Closure::Rpa => ClosureContext::Rpa,
        Closure::Stls => ClosureContext::Stls,
        Closure::Esa => ClosureContext::Esa,
        Closure::StlsIet(_) => ClosureContext::StlsIet {
            bridge: bridge.as_ref().expect("IET theories carry a bridge"),
        },
        Closure::Qstls => ClosureContext::Qstls {
            kernel: kernel.as_ref().expect("quantum theories carry a kernel"),
        },
        Closure::QstlsIet(_) => ClosureContext::QstlsIet {
            kernel: kernel.as_ref().expect("quantum theories carry a kernel"),
            bridge: bridge.as_ref().expect("IET theories carry a bridge"),
        },
        Closure::VsStls | Closure::QVsStls => {
            unreachable!("variational schemes run through the outer loop")
        }
    };

    let mut inner = InnerLoopBuilder::new()
        .with_grid(tracker.grid())
        .with_state(tracker.state())
        .with_response(tracker.response())
        .with_convergence(convergence)
        .build(closure);
    let mut solution = tracker.solution().clone();
    let diagnostics = inner.run_loop(&mut solution)?;
    drop(inner);
    tracker.update_solution(solution);
    tracker.record_diagnostics(diagnostics);
    Ok(())
}

// The variational schemes: the α outer loop encloses the inner drivers
fn run_variational(
    record: &Configuration,
    tracker: &mut Tracker,
    convergence: &Convergence,
) -> Result<(), SolverError> {
    let vs = VsConvergence {
        alpha_guess: record.vs_alpha,
        tolerance: record.vs_err_min_iter,
        maximum_iterations: record.n_iter,
        mixing: record.vs_a_mix,
        drs: record.vs_drs,
        dtheta: record.vs_dt,
        solve_csr: record.vs_solve_csr,
    };
    let table: Option<ThermoTable> = match &record.vs_thermo_file {
        Some(path) => {
            tracing::info!(file = %path.display(), "loading the thermodynamic table");
            Some(text::read_thermo(path)?)
        }
        None => None,
    };
    let mut outer = OuterLoopBuilder::new()
        .with_grid(tracker.grid())
        .with_state(tracker.state())
        .with_inner_convergence(convergence)
        .with_vs_convergence(&vs)
        .build(
            table,
            record.theory.is_quantum(),
            (record.mu_lo, record.mu_hi),
            record.nl,
        );
    let solved = outer.run_loop()?;
    tracing::info!(
        alpha = solved.alpha,
        residual = format_args!("{:.5e}", solved.residual),
        "sum rule closed"
    );
    let thetas = [
        record.theta - record.vs_dt,
        record.theta,
        record.theta + record.vs_dt,
    ];
    text::write_thermo(
        Path::new(&format!("rsu_{}.dat", record.theory.label())),
        &thetas,
        &solved.table,
    )?;
    let diagnostics = solved.diagnostics;
    tracker.alpha = Some(solved.alpha);
    tracker.update_solution(solved.solution);
    tracker.record_diagnostics(diagnostics);
    Ok(())
}

// Load the cached quantum kernel when a file is supplied, otherwise compute
// it and persist the canonical cache
fn obtain_kernel(record: &Configuration, tracker: &Tracker) -> Result<FixedKernel, SolverError> {
    let supplied = match record.theory.closure() {
        Closure::QstlsIet(_) => record.qstls_iet_fixed_file.as_ref(),
        _ => record.qstls_fixed_file.as_ref(),
    };
    match supplied {
        Some(path) => {
            tracing::info!(file = %path.display(), "loading the fixed auxiliary-response kernel");
            FixedKernel::load(path, tracker.grid(), tracker.state(), record.nl)
        }
        None => {
            tracing::info!("computing the fixed auxiliary-response kernel");
            let kernel = FixedKernel::compute(tracker.grid(), tracker.state(), record.nl)?;
            let name = format!(
                "adr_fixed_rs{:.3}_theta{:.3}_{}.bin",
                record.rs,
                record.theta,
                record.theory.label()
            );
            kernel.store(Path::new(&name), tracker.grid())?;
            Ok(kernel)
        }
    }
}

fn run_static(mut record: Configuration) -> color_eyre::Result<()> {
    let (tracker, fresh) = solve_static(&mut record)?;
    report_convergence(&tracker);

    let label = record.theory.label();
    let grid = tracker.grid();
    let solution = tracker.solution();
    text::write_pairs(
        Path::new(&format!("ssf_{label}.dat")),
        grid.iter_points().zip(solution.ssf.iter().copied()),
    )?;
    text::write_pairs(
        Path::new(&format!("slfc_{label}.dat")),
        grid.iter_points().zip(solution.slfc.iter().copied()),
    )?;
    let energy = structure::internal_energy(&solution.ssf, grid, record.rs);
    tracing::info!("Internal energy: {energy:.8}");

    if fresh {
        restart::write_restart(
            Path::new("dens_response.bin"),
            &record,
            &tracker.response().idr,
            &tracker.response().ssf_hf,
        )?;
    }
    Ok(())
}

fn run_dynamic(mut record: Configuration) -> color_eyre::Result<()> {
    // The dynamic closures consume converged static data
    let (tracker, _) = solve_static(&mut record)?;
    report_convergence(&tracker);

    let frequencies = FrequencyGrid::build(record.dyn_dw, record.dyn_wmax)?;
    let convergence = Convergence {
        tolerance: record.err_min_iter,
        maximum_iterations: record.n_iter,
        mixing: record.a_mix,
    };
    if record.theory.is_quantum() && record.qstls_iet_static {
        tracing::debug!(
            "the fully dynamic auxiliary path is unreachable in the reference solver; \
             the partially dynamic path is used"
        );
    }
    let engine = DynamicEngine {
        grid: tracker.grid(),
        frequencies: &frequencies,
        state: tracker.state(),
        convergence: &convergence,
        mapping: record.iet_mapping,
        x_target: record.dyn_xtarget,
        adr_file: record.dyn_adr_file.as_deref(),
        output_dir: Path::new("."),
    };
    let dynamic = engine.run(tracker.solution())?;

    let name = format!(
        "dsf_rs{:.3}_theta{:.3}_{}.dat",
        record.rs,
        record.theta,
        record.theory.label()
    );
    text::write_pairs(
        Path::new(&name),
        dynamic
            .frequencies
            .iter()
            .copied()
            .zip(dynamic.dsf.iter().copied()),
    )?;
    tracing::info!(
        file = name,
        cache = adr_cache::cache_name(record.rs, record.theta, record.theory.label()),
        "dynamic structure factor written"
    );
    Ok(())
}

fn report_convergence(tracker: &Tracker) {
    if let Some(diagnostics) = tracker.diagnostics() {
        match diagnostics.state {
            LoopState::Converged => tracing::info!(
                iterations = diagnostics.iterations,
                residual = format_args!("{:.5e}", diagnostics.residual),
                "converged"
            ),
            LoopState::MaxIterReached => tracing::warn!(
                iterations = diagnostics.iterations,
                residual = format_args!("{:.5e}", diagnostics.residual),
                "not converged; writing partial results"
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::theory::Theory;

    fn fast_record(theory: Theory) -> Configuration {
        Configuration {
            theory,
            dx: 0.2,
            xmax: 10.0,
            nl: 32,
            n_iter: 200,
            a_mix: 0.3,
            err_min_iter: 1e-4,
            ..Default::default()
        }
    }

    #[test]
    fn zero_coupling_collapses_to_hartree_fock_for_every_closure() {
        // rs = 0 must reduce each scheme to the RPA, which itself reduces to
        // S_HF
        for theory in [Theory::Rpa, Theory::Stls, Theory::Esa] {
            let mut record = fast_record(theory);
            record.rs = 0.0;
            let (tracker, _) = solve_static(&mut record).unwrap();
            let ssf = &tracker.solution().ssf;
            let ssf_hf = &tracker.response().ssf_hf;
            for (s, hf) in ssf.iter().zip(ssf_hf.iter()) {
                assert!(
                    (s - hf).abs() < 1e-10,
                    "{theory:?}: S = {s} vs S_HF = {hf}"
                );
            }
        }
    }

    #[test]
    fn restart_round_trip_recovers_the_response_bit_exactly() {
        let mut record = fast_record(Theory::Stls);
        let (tracker, fresh) = solve_static(&mut record).unwrap();
        assert!(fresh);
        let path = std::env::temp_dir().join("jellium_app_restart.bin");
        restart::write_restart(
            &path,
            &record,
            &tracker.response().idr,
            &tracker.response().ssf_hf,
        )
        .unwrap();

        let mut restarted = fast_record(Theory::Stls);
        restarted.stls_guess_file = Some(path.clone());
        let (tracker_again, fresh_again) = solve_static(&mut restarted).unwrap();
        assert!(!fresh_again);
        for (a, b) in tracker
            .response()
            .idr
            .iter()
            .zip(tracker_again.response().idr.iter())
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        std::fs::remove_file(&path).ok();
    }
}
