// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Numerical support for the jellium dielectric solver.
//!
//! Provides the three families of primitives the dielectric schemes lean on:
//! cubic-spline interpolation of gridded data, doubly-adaptive one-dimensional
//! quadrature with a Fourier-sine specialisation for bridge-function
//! transforms, and bracketed or open root solvers.
//!
//! Every routine reports failure through its `Result`: a diverging integral or
//! an unbracketed root is a recoverable error for the enclosing driver, never
//! a panic or process exit.

#![allow(dead_code)]

mod interpolate;
mod quadrature;
mod roots;

pub use interpolate::{InterpolationError, Interpolator1D, Interpolator2D};
pub use quadrature::{FourierSineIntegrator, Integrator1D, Quadrature, QuadratureError};
pub use roots::{BisectionSolver, BrentRootSolver, Root, RootError, SecantSolver};
