// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Jellium is a dielectric solver for the finite-temperature uniform
//! electron gas written in Rust
//!
//! # Overview
//! The structural properties of the electron gas follow from a closure
//! between the static structure factor S(x) and the local-field correction
//! G(x) through the dielectric response built on the ideal Lindhard density
//! φ(x, l). Arriving at a self-consistent solution entails iterating the
//! closure to a fixed point; the scheme family spans the random-phase
//! approximation, the Singwi–Tosi–Land–Sjölander closure with its
//! integral-equation-theory refinements, the quantum (Schweng–Böhm-like)
//! auxiliary-response variants and the variational Vashishta–Singwi schemes
//! whose free parameter is pinned by the compressibility sum rule.
//!
//! # Usage
//! Jellium is distributed as a binary crate intended to be run from the
//! command line. A state point and scheme are selected through long options,
//!
//! ```text
//! jellium-dielectric --theory stls --rs 1.0 --theta 1.0 --mode static
//! ```
//!
//! and the converged structure factor and local-field correction land in
//! `ssf_<theory>.dat` and `slfc_<theory>.dat`. Dynamic properties at a
//! target wave-vector are produced in `dynamic` mode.

#![warn(missing_docs)]
#![allow(dead_code)]

/// The command line global application, tracing and orchestration
pub mod app;

/// The quantum auxiliary density response and its cached kernel
mod auxiliary;

/// Dimensionless constants of the electron-gas description
mod constants;

/// The dynamic response engine
mod dynamic;

/// Error handling
pub mod error;

/// Fermi integrals and the chemical-potential normalization
pub mod fermi;

/// The damped fixed-point driver closing S with G
mod inner_loop;

/// The variational outer loop enforcing the compressibility sum rule
mod outer_loop;

/// Wire formats for restart, kernel caches and text results
mod persistence;

/// The ideal density response on the Matsubara and real-frequency axes
mod response;

/// The thermodynamic state point
mod state;

/// The static structure factor and the local-field closures
mod structure;

/// The scheme selector and its dispatch table
pub mod theory;
