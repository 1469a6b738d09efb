use crate::Discretisation;
use miette::Diagnostic;
use nalgebra::RealField;
use num_traits::ToPrimitive;

/// Error raised when a grid cannot be constructed from the requested resolution
/// and cutoff
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum GridError {
    #[error("the grid resolution must be larger than zero (got {0})")]
    NonPositiveResolution(f64),
    #[error("the grid cutoff {cutoff} must be larger than the resolution {resolution}")]
    CutoffBelowResolution { cutoff: f64, resolution: f64 },
}

/// A cell-centered wave-vector grid.
///
/// Points sit at the midpoints of `N = ⌊xmax / dx⌋` uniform cells,
/// `x_i = (i + ½) dx`, so the first point is `dx / 2` and no point sits at the
/// origin where the dielectric integrands are singular.
#[derive(Debug, Clone)]
pub struct WaveVectorGrid<T: RealField + Copy> {
    resolution: T,
    cutoff: T,
    points: Vec<T>,
}

impl<T: RealField + Copy + ToPrimitive> WaveVectorGrid<T> {
    /// Build the grid from the resolution `dx` and cutoff `xmax`.
    pub fn build(resolution: T, cutoff: T) -> Result<Self, GridError> {
        if resolution <= T::zero() {
            return Err(GridError::NonPositiveResolution(
                resolution.to_f64().unwrap(),
            ));
        }
        if cutoff <= resolution {
            return Err(GridError::CutoffBelowResolution {
                cutoff: cutoff.to_f64().unwrap(),
                resolution: resolution.to_f64().unwrap(),
            });
        }
        let num_points = (cutoff / resolution).floor().to_usize().unwrap();
        let half = T::from_f64(0.5).unwrap();
        let points = (0..num_points)
            .map(|idx| (T::from_usize(idx).unwrap() + half) * resolution)
            .collect();
        Ok(Self {
            resolution,
            cutoff,
            points,
        })
    }

    /// The grid resolution `dx`
    pub fn resolution(&self) -> T {
        self.resolution
    }

    /// The requested cutoff `xmax`
    pub fn cutoff(&self) -> T {
        self.cutoff
    }

    /// The points as a contiguous slice, for spline construction
    pub fn as_slice(&self) -> &[T] {
        &self.points
    }

    /// The largest grid point
    pub fn back(&self) -> T {
        *self.points.last().unwrap()
    }

    /// The smallest grid point, `dx / 2`
    pub fn front(&self) -> T {
        self.points[0]
    }

    /// The upper limit used by the nested dynamic quadratures, one cell below
    /// the last point
    pub fn penultimate(&self) -> T {
        self.points[self.points.len() - 2]
    }
}

impl<T: RealField + Copy + ToPrimitive> Discretisation<T> for WaveVectorGrid<T> {
    fn num_points(&self) -> usize {
        self.points.len()
    }

    fn spacing(&self) -> T {
        self.resolution
    }

    fn point_at(&self, index: usize) -> T {
        self.points[index]
    }

    fn iter_points(&self) -> std::iter::Copied<std::slice::Iter<'_, T>> {
        self.points.iter().copied()
    }

    fn integrate(&self, samples: &[T]) -> T {
        assert_eq!(
            samples.len(),
            self.points.len(),
            "the integrand must be evaluated on-grid"
        );
        samples[..samples.len() - 1]
            .iter()
            .fold(T::zero(), |sum, &sample| sum + sample)
            * self.resolution
    }
}

/// A node-centered real-frequency grid `ω_j = j dω` with `nW = ⌊Wmax / dW⌋`
/// points, the first of which is the static limit `ω = 0`.
#[derive(Debug, Clone)]
pub struct FrequencyGrid<T: RealField + Copy> {
    resolution: T,
    cutoff: T,
    points: Vec<T>,
}

impl<T: RealField + Copy + ToPrimitive> FrequencyGrid<T> {
    /// Build the grid from the resolution `dW` and cutoff `Wmax`.
    pub fn build(resolution: T, cutoff: T) -> Result<Self, GridError> {
        if resolution <= T::zero() {
            return Err(GridError::NonPositiveResolution(
                resolution.to_f64().unwrap(),
            ));
        }
        if cutoff <= resolution {
            return Err(GridError::CutoffBelowResolution {
                cutoff: cutoff.to_f64().unwrap(),
                resolution: resolution.to_f64().unwrap(),
            });
        }
        let num_points = (cutoff / resolution).floor().to_usize().unwrap();
        let points = (0..num_points)
            .map(|idx| T::from_usize(idx).unwrap() * resolution)
            .collect();
        Ok(Self {
            resolution,
            cutoff,
            points,
        })
    }

    /// The grid resolution `dW`
    pub fn resolution(&self) -> T {
        self.resolution
    }

    /// The requested cutoff `Wmax`
    pub fn cutoff(&self) -> T {
        self.cutoff
    }

    /// The points as a contiguous slice
    pub fn as_slice(&self) -> &[T] {
        &self.points
    }
}

impl<T: RealField + Copy + ToPrimitive> Discretisation<T> for FrequencyGrid<T> {
    fn num_points(&self) -> usize {
        self.points.len()
    }

    fn spacing(&self) -> T {
        self.resolution
    }

    fn point_at(&self, index: usize) -> T {
        self.points[index]
    }

    fn iter_points(&self) -> std::iter::Copied<std::slice::Iter<'_, T>> {
        self.points.iter().copied()
    }

    fn integrate(&self, samples: &[T]) -> T {
        assert_eq!(
            samples.len(),
            self.points.len(),
            "the integrand must be evaluated on-grid"
        );
        samples[..samples.len() - 1]
            .iter()
            .fold(T::zero(), |sum, &sample| sum + sample)
            * self.resolution
    }
}
