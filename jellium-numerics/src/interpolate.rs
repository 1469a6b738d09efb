use miette::Diagnostic;
use nalgebra::RealField;

/// Error raised when an interpolator cannot be constructed
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum InterpolationError {
    #[error("at least {required} knots are required, got {supplied}")]
    TooFewKnots { required: usize, supplied: usize },
    #[error("the abscissae and ordinates have mismatched lengths ({0} and {1})")]
    MismatchedLengths(usize, usize),
    #[error("the abscissae must be strictly increasing")]
    UnsortedKnots,
}

/// A natural cubic spline through `(x, y)` knots.
///
/// Evaluation left of the first knot or right of the last is undefined;
/// callers must clamp their arguments to the knot range. The integrands of
/// the dielectric schemes only ever evaluate inside the wave-vector grid, so
/// the clamp lives at the call sites that own the integration limits.
#[derive(Debug, Clone)]
pub struct Interpolator1D<T: RealField + Copy> {
    xs: Vec<T>,
    ys: Vec<T>,
    // Second derivatives at the knots, natural boundary conditions
    y2: Vec<T>,
}

impl<T: RealField + Copy> Interpolator1D<T> {
    /// Construct the spline from borrowed knot data.
    pub fn new(xs: &[T], ys: &[T]) -> Result<Self, InterpolationError> {
        if xs.len() != ys.len() {
            return Err(InterpolationError::MismatchedLengths(xs.len(), ys.len()));
        }
        if xs.len() < 3 {
            return Err(InterpolationError::TooFewKnots {
                required: 3,
                supplied: xs.len(),
            });
        }
        if xs.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(InterpolationError::UnsortedKnots);
        }
        let y2 = second_derivatives(xs, ys);
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            y2,
        })
    }

    /// Rebuild the spline in place with new data of the same length.
    pub fn reset(&mut self, xs: &[T], ys: &[T]) -> Result<(), InterpolationError> {
        let rebuilt = Self::new(xs, ys)?;
        *self = rebuilt;
        Ok(())
    }

    /// Evaluate the spline at `x`
    pub fn eval(&self, x: T) -> T {
        let idx = self.interval_of(x);
        let (x_lo, x_hi) = (self.xs[idx], self.xs[idx + 1]);
        let h = x_hi - x_lo;
        let a = (x_hi - x) / h;
        let b = (x - x_lo) / h;
        let six = T::from_f64(6.0).unwrap();
        a * self.ys[idx]
            + b * self.ys[idx + 1]
            + ((a * a * a - a) * self.y2[idx] + (b * b * b - b) * self.y2[idx + 1]) * (h * h) / six
    }

    fn interval_of(&self, x: T) -> usize {
        let n = self.xs.len();
        match self.xs.partition_point(|&knot| knot < x) {
            0 => 0,
            idx if idx >= n => n - 2,
            idx => idx - 1,
        }
    }
}

// Thomas-algorithm solve of the tridiagonal natural-spline system
fn second_derivatives<T: RealField + Copy>(xs: &[T], ys: &[T]) -> Vec<T> {
    let n = xs.len();
    let mut y2 = vec![T::zero(); n];
    let mut gamma = vec![T::zero(); n];
    let two = T::from_f64(2.0).unwrap();
    let six = T::from_f64(6.0).unwrap();
    for i in 1..n - 1 {
        let h_lo = xs[i] - xs[i - 1];
        let h_hi = xs[i + 1] - xs[i];
        let sigma = h_lo / (h_lo + h_hi);
        let denom = sigma * gamma[i - 1] + two;
        gamma[i] = (sigma - T::one()) / denom;
        let divided = (ys[i + 1] - ys[i]) / h_hi - (ys[i] - ys[i - 1]) / h_lo;
        y2[i] = (six * divided / (h_lo + h_hi) - sigma * y2[i - 1]) / denom;
    }
    for i in (1..n - 1).rev() {
        y2[i] = gamma[i] * y2[i + 1] + y2[i];
    }
    y2
}

/// A product cubic spline over a rectangular `(x, y)` grid with row-major
/// data `z[i, j] = z(x_i, y_j)`.
///
/// Evaluation builds the transverse spline lazily: each row is splined along
/// `y` at construction, evaluation splines the row values along `x`.
#[derive(Debug, Clone)]
pub struct Interpolator2D<T: RealField + Copy> {
    xs: Vec<T>,
    rows: Vec<Interpolator1D<T>>,
}

impl<T: RealField + Copy> Interpolator2D<T> {
    /// Construct from row-major data with `x` the slow (row) index.
    pub fn new(xs: &[T], ys: &[T], zs: &[T]) -> Result<Self, InterpolationError> {
        if zs.len() != xs.len() * ys.len() {
            return Err(InterpolationError::MismatchedLengths(
                zs.len(),
                xs.len() * ys.len(),
            ));
        }
        if xs.len() < 3 {
            return Err(InterpolationError::TooFewKnots {
                required: 3,
                supplied: xs.len(),
            });
        }
        let rows = zs
            .chunks_exact(ys.len())
            .map(|row| Interpolator1D::new(ys, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            xs: xs.to_vec(),
            rows,
        })
    }

    /// Evaluate the surface at `(x, y)`
    pub fn eval(&self, x: T, y: T) -> T {
        let column: Vec<T> = self.rows.iter().map(|row| row.eval(y)).collect();
        Interpolator1D::new(&self.xs, &column)
            .expect("row grid was validated at construction")
            .eval(x)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn spline_reproduces_knots() {
        let xs: Vec<f64> = (0..20).map(|i| 0.05 + 0.1 * i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x * 1.7).sin()).collect();
        let spline = Interpolator1D::new(&xs, &ys).unwrap();
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            assert_relative_eq!(spline.eval(x), y, max_relative = 1e-12);
        }
    }

    #[test]
    fn spline_interpolates_smooth_data_between_knots() {
        let xs: Vec<f64> = (0..200).map(|i| 0.05 + 0.05 * i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (-x / 2.0).exp()).collect();
        let spline = Interpolator1D::new(&xs, &ys).unwrap();
        for i in 0..50 {
            let x = 0.075 + 0.11 * i as f64;
            assert_relative_eq!(spline.eval(x), (-x / 2.0).exp(), max_relative = 1e-6);
        }
    }

    #[test]
    fn unsorted_knots_are_rejected() {
        let xs = [0.0, 1.0, 0.5, 2.0];
        let ys = [0.0; 4];
        assert!(matches!(
            Interpolator1D::new(&xs, &ys),
            Err(InterpolationError::UnsortedKnots)
        ));
    }

    #[test]
    fn product_spline_reproduces_a_separable_surface() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 * 0.2).collect();
        let ys: Vec<f64> = (0..25).map(|j| j as f64 * 0.25).collect();
        let zs: Vec<f64> = xs
            .iter()
            .flat_map(|&x| ys.iter().map(move |&y| x.cos() * (-y / 3.0).exp()))
            .collect();
        let surface = Interpolator2D::new(&xs, &ys, &zs).unwrap();
        assert_relative_eq!(
            surface.eval(1.73, 2.11),
            1.73_f64.cos() * (-2.11_f64 / 3.0).exp(),
            max_relative = 1e-4
        );
    }
}
