// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Discrete wave-vector and frequency spaces for the jellium dielectric solver.
//!
//! The structural properties of the electron gas are resolved on a cell-centered
//! wave-vector grid
//! $$ x_i = \left(i + \frac{1}{2}\right) \Delta x $$
//! shared by every integrand in the solver, so the discretisation bias of the
//! outer fixed-point iteration and of the inner midpoint quadratures cancels.
//! Dynamic properties additionally use a node-centered real-frequency grid
//! $$ \omega_j = j \Delta\omega. $$

#![allow(dead_code)]

mod grid;

pub use grid::*;

use nalgebra::RealField;

/// Methods common to the discrete axes used by the solver.
///
/// Mirrors the access patterns of the integrands: indexed reads, iteration in
/// storage order and midpoint integration of gridded data.
pub trait Discretisation<T: RealField + Copy> {
    /// Number of points on the axis
    fn num_points(&self) -> usize;
    /// Grid spacing
    fn spacing(&self) -> T;
    /// The point at `index`
    fn point_at(&self, index: usize) -> T;
    /// Iterator over the points in storage order
    fn iter_points(&self) -> std::iter::Copied<std::slice::Iter<'_, T>>;
    /// Midpoint-rule integral of data sampled on this axis.
    ///
    /// The final point is excluded from the sum, matching the open upper cell
    /// of the cell-centered grid. Panics if `samples` is not evaluated on-grid.
    fn integrate(&self, samples: &[T]) -> T;
}
