//! Dimensionless constants of the electron-gas description.

/// The unit-conversion constant λ = (4 / 9π)^⅓ linking the Wigner–Seitz
/// radius to the Fermi wave-vector, k_F a = 1/λ.
pub(crate) fn lambda() -> f64 {
    (4.0 / (9.0 * std::f64::consts::PI)).cbrt()
}

/// The coupling strength f = 4 λ² rs multiplying the local-field term in the
/// dielectric structure factor.
pub(crate) fn coupling_strength(rs: f64) -> f64 {
    let lambda = lambda();
    4.0 * lambda * lambda * rs
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    #[test]
    fn lambda_cubed_recovers_the_defining_ratio() {
        let lambda = super::lambda();
        assert_relative_eq!(
            lambda * lambda * lambda,
            4.0 / (9.0 * std::f64::consts::PI),
            max_relative = 1e-15
        );
    }
}
