//! The dielectric scheme selector and its dispatch table.

use clap::ArgEnum;
use serde::Deserialize;

/// The family of dielectric schemes solved by this crate.
///
/// Each variant maps to a (closure, bridge-function, compressibility-sum-rule)
/// triple through [`Theory::closure`], [`Theory::bridge`] and
/// [`Theory::enforces_csr`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Theory {
    /// Random-phase approximation, G = 0
    Rpa,
    /// Effective static approximation
    Esa,
    /// Singwi–Tosi–Land–Sjölander
    Stls,
    /// STLS with the hypernetted-chain (zero) bridge
    StlsHnc,
    /// STLS with the Iyetomi–Ogata–Ichimaru bridge
    StlsIoi,
    /// STLS with the Lucco Castello–Tolias bridge
    StlsLct,
    /// Vashishta–Singwi variational STLS
    VsStls,
    /// Quantum STLS
    Qstls,
    /// Quantum STLS with the hypernetted-chain bridge
    QstlsHnc,
    /// Quantum STLS with the Iyetomi–Ogata–Ichimaru bridge
    QstlsIoi,
    /// Quantum STLS with the Lucco Castello–Tolias bridge
    QstlsLct,
    /// Quantum Vashishta–Singwi variational STLS
    QVsStls,
}

/// The closure family a theory feeds into the fixed-point driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Closure {
    /// No local-field correction
    Rpa,
    /// The classical STLS kernel
    Stls,
    /// The classical STLS-IET double integral with a bridge term
    StlsIet(BridgeKind),
    /// The effective static approximation
    Esa,
    /// The classical STLS kernel with the variational α correction
    VsStls,
    /// The quantum auxiliary density response
    Qstls,
    /// The quantum auxiliary density response with a bridge factor and an
    /// inner ψ iteration
    QstlsIet(BridgeKind),
    /// The quantum auxiliary response with the variational α correction
    QVsStls,
}

/// The tabulated static bridge function entering the IET closures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BridgeKind {
    /// Hypernetted chain: b = 0
    Hnc,
    /// Iyetomi–Ogata–Ichimaru one-component-plasma fit
    Ioi,
    /// Lucco Castello–Tolias one-component-plasma refit
    Lct,
}

/// The (rs, Θ) → Γ correspondence selecting the classical state point of the
/// bridge function
#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IetMapping {
    /// Γ ∝ 1/Θ, the degenerate-limit divergent mapping
    Standard,
    /// Γ ∝ 1/√(1 + Θ²), finite in the ground state
    Sqrt,
    /// Γ ∝ 1/(1 + Θ), finite in the ground state
    Linear,
}

/// Working mode of the orchestrator
#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Static structural properties
    Static,
    /// Dynamic properties at a target wave-vector
    Dynamic,
    /// Construct binary restart data from text files
    Guess,
}

impl Theory {
    /// The label used to namespace output files
    pub fn label(&self) -> &'static str {
        match self {
            Theory::Rpa => "RPA",
            Theory::Esa => "ESA",
            Theory::Stls => "STLS",
            Theory::StlsHnc => "STLS-HNC",
            Theory::StlsIoi => "STLS-IOI",
            Theory::StlsLct => "STLS-LCT",
            Theory::VsStls => "VSSTLS",
            Theory::Qstls => "QSTLS",
            Theory::QstlsHnc => "QSTLS-HNC",
            Theory::QstlsIoi => "QSTLS-IOI",
            Theory::QstlsLct => "QSTLS-LCT",
            Theory::QVsStls => "QVSSTLS",
        }
    }

    /// The closure handed to the fixed-point driver
    pub fn closure(&self) -> Closure {
        match self {
            Theory::Rpa => Closure::Rpa,
            Theory::Esa => Closure::Esa,
            Theory::Stls => Closure::Stls,
            Theory::StlsHnc => Closure::StlsIet(BridgeKind::Hnc),
            Theory::StlsIoi => Closure::StlsIet(BridgeKind::Ioi),
            Theory::StlsLct => Closure::StlsIet(BridgeKind::Lct),
            Theory::VsStls => Closure::VsStls,
            Theory::Qstls => Closure::Qstls,
            Theory::QstlsHnc => Closure::QstlsIet(BridgeKind::Hnc),
            Theory::QstlsIoi => Closure::QstlsIet(BridgeKind::Ioi),
            Theory::QstlsLct => Closure::QstlsIet(BridgeKind::Lct),
            Theory::QVsStls => Closure::QVsStls,
        }
    }

    /// The bridge function required by the closure, if any
    pub fn bridge(&self) -> Option<BridgeKind> {
        match self.closure() {
            Closure::StlsIet(kind) | Closure::QstlsIet(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether the theory runs the variational outer loop enforcing the
    /// compressibility sum rule
    pub fn enforces_csr(&self) -> bool {
        matches!(self, Theory::VsStls | Theory::QVsStls)
    }

    /// Whether the local-field correction is carried by the auxiliary
    /// density response ψ(x, l) rather than a static G(x)
    pub fn is_quantum(&self) -> bool {
        matches!(
            self.closure(),
            Closure::Qstls | Closure::QstlsIet(_) | Closure::QVsStls
        )
    }
}

impl IetMapping {
    /// The classical coupling Γ of the bridge function at (rs, Θ)
    pub fn classical_coupling(&self, rs: f64, theta: f64) -> f64 {
        let lambda = crate::constants::lambda();
        let prefactor = 2.0 * lambda * lambda * rs;
        match self {
            IetMapping::Standard => prefactor / theta,
            IetMapping::Sqrt => prefactor / (1.0 + theta * theta).sqrt(),
            IetMapping::Linear => prefactor / (1.0 + theta),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_quantum_theory_reports_quantum() {
        for theory in [
            Theory::Qstls,
            Theory::QstlsHnc,
            Theory::QstlsIoi,
            Theory::QstlsLct,
            Theory::QVsStls,
        ] {
            assert!(theory.is_quantum());
        }
        for theory in [Theory::Rpa, Theory::Stls, Theory::VsStls, Theory::Esa] {
            assert!(!theory.is_quantum());
        }
    }

    #[test]
    fn csr_is_enforced_only_by_the_variational_schemes() {
        assert!(Theory::VsStls.enforces_csr());
        assert!(Theory::QVsStls.enforces_csr());
        assert!(!Theory::StlsHnc.enforces_csr());
    }

    #[test]
    fn mappings_agree_in_the_classical_limit() {
        // At large Θ all three mappings behave as 1/Θ
        let theta = 50.0;
        let standard = IetMapping::Standard.classical_coupling(1.0, theta);
        let sqrt = IetMapping::Sqrt.classical_coupling(1.0, theta);
        let linear = IetMapping::Linear.classical_coupling(1.0, theta);
        assert!((standard - sqrt).abs() / standard < 0.01);
        assert!((standard - linear).abs() / standard < 0.05);
    }
}
