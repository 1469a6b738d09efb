use crate::error::SolverError;
use crate::theory::{IetMapping, Mode, Theory};
use color_eyre::eyre::eyre;
use config::{Config, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// The input record shared by every entry point.
///
/// Defaults follow the reference implementation; a `.config/default.toml`
/// profile may override them and every field is reachable from the command
/// line through a long option of the same name.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Configuration {
    /// Scheme to solve
    pub theory: Theory,
    /// Working mode
    pub mode: Mode,
    /// Quantum degeneracy parameter
    pub theta: f64,
    /// Quantum coupling parameter
    pub rs: f64,
    /// Chemical potential, filled by the normalization solve
    pub mu: f64,
    /// Lower bound of the chemical-potential bracket
    pub mu_lo: f64,
    /// Upper bound of the chemical-potential bracket
    pub mu_hi: f64,
    /// Wave-vector grid resolution
    pub dx: f64,
    /// Wave-vector grid cutoff
    pub xmax: f64,
    /// Number of Matsubara frequencies
    pub nl: usize,
    /// Iteration budget of the fixed-point drivers
    pub n_iter: usize,
    /// Residual threshold of the fixed-point drivers
    pub err_min_iter: f64,
    /// Picard mixing parameter
    pub a_mix: f64,
    /// Worker threads for the parallel integrand sweeps
    pub n_threads: usize,
    /// State-point mapping of the IET bridge functions
    pub iet_mapping: IetMapping,
    /// Binary restart for the classical schemes
    pub stls_guess_file: Option<PathBuf>,
    /// Binary restart for the quantum schemes
    pub qstls_guess_file: Option<PathBuf>,
    /// Cached fixed kernel for the quantum schemes
    pub qstls_fixed_file: Option<PathBuf>,
    /// Cached fixed kernel for the quantum IET schemes
    pub qstls_iet_fixed_file: Option<PathBuf>,
    /// Static approximation in the dynamic quantum IET path
    pub qstls_iet_static: bool,
    /// Coupling-stencil resolution of the variational schemes
    pub vs_drs: f64,
    /// Degeneracy-stencil resolution of the variational schemes
    pub vs_dt: f64,
    /// Initial guess for the variational free parameter
    pub vs_alpha: f64,
    /// Residual threshold of the α iteration
    pub vs_err_min_iter: f64,
    /// Mixing of the α iteration
    pub vs_a_mix: f64,
    /// Whether the compressibility sum rule is enforced
    pub vs_solve_csr: bool,
    /// Thermodynamic-integration table bypassing the stencil sweep
    pub vs_thermo_file: Option<PathBuf>,
    /// Frequency-grid resolution of the dynamic properties
    pub dyn_dw: f64,
    /// Frequency-grid cutoff of the dynamic properties
    pub dyn_wmax: f64,
    /// Wave-vector at which the dynamic properties are evaluated
    pub dyn_xtarget: f64,
    /// Cached dynamic density responses
    pub dyn_adr_file: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            theory: Theory::Stls,
            mode: Mode::Static,
            theta: 1.0,
            rs: 1.0,
            mu: 0.0,
            mu_lo: -10.0,
            mu_hi: 10.0,
            dx: 0.1,
            xmax: 20.0,
            nl: 128,
            n_iter: 1000,
            err_min_iter: 1e-5,
            a_mix: 0.1,
            n_threads: 1,
            iet_mapping: IetMapping::Standard,
            stls_guess_file: None,
            qstls_guess_file: None,
            qstls_fixed_file: None,
            qstls_iet_fixed_file: None,
            qstls_iet_static: false,
            vs_drs: 0.01,
            vs_dt: 0.01,
            vs_alpha: 0.5,
            vs_err_min_iter: 1e-3,
            vs_a_mix: 1.0,
            vs_solve_csr: true,
            vs_thermo_file: None,
            dyn_dw: 0.1,
            dyn_wmax: 20.0,
            dyn_xtarget: 1.0,
            dyn_adr_file: None,
        }
    }
}

impl Configuration {
    /// The derived number of wave-vector grid points
    pub(crate) fn nx(&self) -> usize {
        (self.xmax / self.dx).floor() as usize
    }

    /// The derived number of frequency grid points
    pub(crate) fn nw(&self) -> usize {
        (self.dyn_wmax / self.dyn_dw).floor() as usize
    }

    /// Load the profile defaults, if a configuration directory is present.
    pub(crate) fn from_profile() -> color_eyre::Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());
        let source = Config::builder()
            .add_source(File::with_name(".config/default").required(false))
            .add_source(File::with_name(&format!(".config/{run_mode}")).required(false))
            .build()?;
        source
            .try_deserialize()
            .map_err(|e| eyre!("failed to deserialize the configuration profile: {e:?}"))
    }

    /// Verify every field is inside its domain.
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        let reject = |field: &'static str, message: &str| -> Result<(), SolverError> {
            Err(SolverError::InputInvalid {
                field,
                message: message.to_string(),
            })
        };
        if self.dx <= 0.0 {
            return reject("dx", "the wave-vector grid resolution must be larger than zero");
        }
        if self.xmax <= 0.0 {
            return reject("xmax", "the wave-vector grid cutoff must be larger than zero");
        }
        if self.xmax <= self.dx {
            return reject("xmax", "the wave-vector cutoff must exceed the resolution");
        }
        if self.err_min_iter <= 0.0 {
            return reject(
                "err_min_iter",
                "the minimum error for convergence must be larger than zero",
            );
        }
        if self.a_mix <= 0.0 || self.a_mix > 1.0 {
            return reject("a_mix", "the mixing parameter must lie in (0, 1]");
        }
        if self.nl == 0 {
            return reject("nl", "the number of Matsubara frequencies must be larger than zero");
        }
        if self.n_threads == 0 {
            return reject("n_threads", "the number of worker threads must be larger than zero");
        }
        if self.rs < 0.0 {
            return reject("rs", "the quantum coupling parameter must be non-negative");
        }
        if self.theta < 0.0 {
            return reject("theta", "the quantum degeneracy parameter must be non-negative");
        }
        if self.vs_drs <= 0.0 {
            return reject(
                "vs_drs",
                "the resolution of the coupling parameter grid must be larger than zero",
            );
        }
        if self.vs_dt <= 0.0 {
            return reject(
                "vs_dt",
                "the resolution of the degeneracy parameter grid must be larger than zero",
            );
        }
        if self.vs_alpha <= 0.0 {
            return reject("vs_alpha", "the free parameter of the VS schemes must be larger than zero");
        }
        if self.vs_err_min_iter <= 0.0 {
            return reject(
                "vs_err_min_iter",
                "the minimum error for convergence must be larger than zero",
            );
        }
        if self.vs_a_mix <= 0.0 {
            return reject("vs_a_mix", "the mixing parameter must be larger than zero");
        }
        if self.dyn_dw <= 0.0 {
            return reject("dyn_dw", "the resolution of the frequency grid must be larger than zero");
        }
        if self.dyn_wmax <= self.dyn_dw {
            return reject("dyn_wmax", "the frequency cutoff must exceed the resolution");
        }
        if self.dyn_xtarget <= 0.0 {
            return reject(
                "dyn_xtarget",
                "the wave-vector for the dynamic properties must be larger than zero",
            );
        }
        if self.mode == Mode::Dynamic && self.theta == 0.0 {
            return reject(
                "theta",
                "ground-state calculations of the dynamic properties are not implemented",
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        Configuration::default().validate().unwrap();
    }

    #[test]
    fn out_of_domain_fields_are_named() {
        let mut record = Configuration::default();
        record.a_mix = 1.5;
        match record.validate() {
            Err(SolverError::InputInvalid { field, .. }) => assert_eq!(field, "a_mix"),
            other => panic!("expected an input error, got {other:?}"),
        }
    }

    #[test]
    fn dynamic_ground_state_is_refused() {
        let mut record = Configuration::default();
        record.mode = Mode::Dynamic;
        record.theta = 0.0;
        assert!(matches!(
            record.validate(),
            Err(SolverError::InputInvalid { field: "theta", .. })
        ));
    }

    #[test]
    fn derived_grid_sizes_floor() {
        let mut record = Configuration::default();
        record.dx = 0.3;
        record.xmax = 1.0;
        assert_eq!(record.nx(), 3);
    }
}
