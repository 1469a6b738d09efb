use miette::Diagnostic;
use nalgebra::RealField;

/// Error raised when an integral cannot be driven to the requested accuracy
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum QuadratureError {
    #[error("the quadrature did not converge after {subdivisions} subdivisions (estimated error {error:.5e})")]
    Diverged { subdivisions: usize, error: f64 },
    #[error("the integrand returned a non-finite value")]
    NonFiniteIntegrand,
    #[error("the integration limits [{lo}, {hi}] are inverted")]
    InvertedLimits { lo: f64, hi: f64 },
}

/// The result of an adaptive integration: the value and the error estimate
#[derive(Debug, Clone, Copy)]
pub struct Quadrature<T> {
    /// Value of the integral
    pub value: T,
    /// Estimated absolute error
    pub error: T,
}

// 15-point Kronrod abscissae on [-1, 1] (positive half, descending)
const KRONROD_NODES: [f64; 8] = [
    0.991455371120813,
    0.949107912342759,
    0.864864423359769,
    0.741531185599394,
    0.586087235467691,
    0.405845151377397,
    0.207784955007898,
    0.0,
];

// Weights of the 15-point Kronrod rule, matching KRONROD_NODES
const KRONROD_WEIGHTS: [f64; 8] = [
    0.022935322010529,
    0.063092092629979,
    0.104790010322250,
    0.140653259715525,
    0.169004726639267,
    0.190350578064785,
    0.204432940075298,
    0.209482141084728,
];

// Weights of the embedded 7-point Gauss rule (nodes are the odd-index
// Kronrod abscissae plus the origin)
const GAUSS_WEIGHTS: [f64; 4] = [
    0.129484966168870,
    0.279705391489277,
    0.381830050505119,
    0.417959183673469,
];

/// A doubly-adaptive one-dimensional integrator.
///
/// Each interval is estimated with the Gauss–Kronrod 7-15 pair; the interval
/// with the largest error estimate is bisected until the summed error falls
/// below the relative target or the subdivision budget is exhausted.
#[derive(Debug, Clone)]
pub struct Integrator1D<T> {
    relative_error: T,
    maximum_subdivisions: usize,
}

impl<T: RealField + Copy + num_traits::ToPrimitive> Integrator1D<T> {
    /// An integrator with the requested relative-error target
    pub fn new(relative_error: T) -> Self {
        Self {
            relative_error,
            maximum_subdivisions: 100,
        }
    }

    /// The relative-error target
    pub fn relative_error(&self) -> T {
        self.relative_error
    }

    /// Integrate `f` over `[lo, hi]`.
    pub fn compute(
        &self,
        f: impl Fn(T) -> T,
        lo: T,
        hi: T,
    ) -> Result<Quadrature<T>, QuadratureError> {
        if hi < lo {
            return Err(QuadratureError::InvertedLimits {
                lo: lo.to_f64().unwrap(),
                hi: hi.to_f64().unwrap(),
            });
        }
        if hi == lo {
            return Ok(Quadrature {
                value: T::zero(),
                error: T::zero(),
            });
        }

        let mut segments = vec![gauss_kronrod(&f, lo, hi)?];
        for _subdivision in 0..self.maximum_subdivisions {
            let value = segments
                .iter()
                .fold(T::zero(), |sum, segment| sum + segment.value);
            let error = segments
                .iter()
                .fold(T::zero(), |sum, segment| sum + segment.error);
            if error <= self.relative_error * value.abs() || error == T::zero() {
                return Ok(Quadrature { value, error });
            }

            // Bisect the interval carrying the worst error estimate
            let worst = segments
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.error.partial_cmp(&b.error).unwrap())
                .map(|(idx, _)| idx)
                .unwrap();
            let segment = segments.swap_remove(worst);
            let midpoint = (segment.lo + segment.hi) / (T::one() + T::one());
            segments.push(gauss_kronrod(&f, segment.lo, midpoint)?);
            segments.push(gauss_kronrod(&f, midpoint, segment.hi)?);
        }

        let error = segments
            .iter()
            .fold(T::zero(), |sum, segment| sum + segment.error);
        Err(QuadratureError::Diverged {
            subdivisions: self.maximum_subdivisions,
            error: error.to_f64().unwrap(),
        })
    }
}

impl<T: RealField + Copy + num_traits::ToPrimitive> Default for Integrator1D<T> {
    fn default() -> Self {
        Self::new(T::from_f64(1.0e-5).unwrap())
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment<T> {
    lo: T,
    hi: T,
    value: T,
    error: T,
}

fn gauss_kronrod<T: RealField + Copy>(
    f: impl Fn(T) -> T,
    lo: T,
    hi: T,
) -> Result<Segment<T>, QuadratureError> {
    let two = T::one() + T::one();
    let centre = (lo + hi) / two;
    let half_width = (hi - lo) / two;

    let mut kronrod = T::zero();
    let mut gauss = T::zero();
    for (idx, (&node, &weight)) in KRONROD_NODES.iter().zip(KRONROD_WEIGHTS.iter()).enumerate() {
        let node = T::from_f64(node).unwrap();
        let weight = T::from_f64(weight).unwrap();
        let offset = half_width * node;
        let sample = if idx == 7 {
            f(centre)
        } else {
            f(centre - offset) + f(centre + offset)
        };
        // NaN and ±∞ both fail the self-difference test
        if sample - sample != T::zero() {
            return Err(QuadratureError::NonFiniteIntegrand);
        }
        kronrod += weight * sample;
        // Odd Kronrod indices carry the embedded Gauss nodes
        if idx % 2 == 1 {
            gauss += T::from_f64(GAUSS_WEIGHTS[idx / 2]).unwrap() * sample;
        } else if idx == 7 {
            gauss += T::from_f64(GAUSS_WEIGHTS[3]).unwrap() * sample;
        }
    }
    kronrod *= half_width;
    gauss *= half_width;

    let deviation = (kronrod - gauss).abs();
    // QUADPACK-style sharpened error estimate
    let error = if deviation > T::zero() {
        let exponent = T::from_f64(1.5).unwrap();
        let sharpened = (T::from_f64(200.0).unwrap() * deviation).powf(exponent);
        if sharpened < deviation {
            sharpened
        } else {
            deviation
        }
    } else {
        deviation
    };
    Ok(Segment {
        lo,
        hi,
        value: kronrod,
        error,
    })
}

/// Integrator for semi-infinite Fourier-sine integrals
/// $$ \int_0^\infty f(q) \sin(q r) \mathrm{d}q $$
/// used by the bridge-function transforms and the radial distribution
/// function.
///
/// The axis is split at the zeros of the oscillating factor and the
/// half-period contributions are accumulated until two consecutive terms are
/// below the relative target.
#[derive(Debug, Clone)]
pub struct FourierSineIntegrator<T> {
    relative_error: T,
    maximum_half_periods: usize,
    inner: Integrator1D<T>,
}

impl<T: RealField + Copy + num_traits::ToPrimitive> FourierSineIntegrator<T> {
    /// An integrator with the requested relative-error target
    pub fn new(relative_error: T) -> Self {
        Self {
            relative_error,
            maximum_half_periods: 1000,
            inner: Integrator1D::new(relative_error),
        }
    }

    /// Integrate `f(q) sin(q r)` over the half-line for spatial position `r`.
    pub fn compute(&self, f: impl Fn(T) -> T, r: T) -> Result<Quadrature<T>, QuadratureError> {
        let pi = T::pi();
        let half_period = pi / r;
        let mut total = T::zero();
        let mut error = T::zero();
        let mut below_target = 0;
        for period in 0..self.maximum_half_periods {
            let lo = T::from_usize(period).unwrap() * half_period;
            let hi = lo + half_period;
            let segment = self.inner.compute(|q| f(q) * (q * r).sin(), lo, hi)?;
            total += segment.value;
            error += segment.error;
            if segment.value.abs() <= self.relative_error * total.abs() {
                below_target += 1;
                if below_target == 2 {
                    return Ok(Quadrature {
                        value: total,
                        error,
                    });
                }
            } else {
                below_target = 0;
            }
        }
        Err(QuadratureError::Diverged {
            subdivisions: self.maximum_half_periods,
            error: error.to_f64().unwrap(),
        })
    }
}

impl<T: RealField + Copy + num_traits::ToPrimitive> Default for FourierSineIntegrator<T> {
    fn default() -> Self {
        Self::new(T::from_f64(1.0e-5).unwrap())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn polynomial_is_integrated_exactly() {
        let itg: Integrator1D<f64> = Integrator1D::new(1e-10);
        let result = itg.compute(|x| x * x * x - 2.0 * x + 1.0, 0.0, 2.0).unwrap();
        // x^4/4 - x^2 + x over [0, 2]
        assert_relative_eq!(result.value, 2.0, max_relative = 1e-12);
    }

    #[test]
    fn oscillatory_integrand_converges_under_subdivision() {
        let itg: Integrator1D<f64> = Integrator1D::new(1e-8);
        let result = itg.compute(|x| (10.0 * x).sin(), 0.0, 3.0).unwrap();
        assert_relative_eq!(
            result.value,
            (1.0 - (30.0_f64).cos()) / 10.0,
            max_relative = 1e-8
        );
    }

    #[test]
    fn endpoint_singularity_is_refined() {
        let itg: Integrator1D<f64> = Integrator1D::new(1e-6);
        let result = itg.compute(|x| x.sqrt().recip(), 1e-12, 1.0).unwrap();
        assert_relative_eq!(result.value, 2.0, max_relative = 1e-3);
    }

    #[test]
    fn non_finite_integrand_is_reported() {
        let itg: Integrator1D<f64> = Integrator1D::new(1e-6);
        assert!(matches!(
            itg.compute(|x| (x - 0.5_f64).ln(), 0.0, 1.0),
            Err(QuadratureError::NonFiniteIntegrand)
        ));
    }

    #[test]
    fn fourier_sine_transform_of_a_gaussian() {
        // ∫ exp(-q²) sin(q r) dq = √π/2 · exp(-r²/4) · erfi(r/2); at r = 2 the
        // Dawson-function identity gives F(1) = 0.5380795069...
        let itg: FourierSineIntegrator<f64> = FourierSineIntegrator::new(1e-8);
        let result = itg.compute(|q| (-q * q).exp(), 2.0).unwrap();
        assert_relative_eq!(result.value, 0.5380795069127684, max_relative = 1e-6);
    }

    #[test]
    fn fourier_sine_transform_of_an_exponential() {
        // ∫ exp(-q) sin(q r) dq = r / (1 + r²)
        let itg: FourierSineIntegrator<f64> = FourierSineIntegrator::new(1e-8);
        for r in [0.5, 1.0, 3.0] {
            let result = itg.compute(|q| (-q).exp(), r).unwrap();
            assert_relative_eq!(result.value, r / (1.0 + r * r), max_relative = 1e-6);
        }
    }
}
