// Copyright 2024 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Backend abstraction for evaluating all bonds.
//!
//! Provides a trait for accumulating bond energies and scattering forces into
//! a shared per-particle buffer, with a serial reference implementation and a
//! parallel implementation based on conflict-free bond colouring.

mod colored;
mod serial;

pub use colored::ColoredBackend;
pub use serial::SerialBackend;

use crate::{bond::BondEvaluator, force::Bond, Vector3};

/// Backend trait for evaluating every bond of a force.
///
/// Implementations can use different strategies:
/// - `SerialBackend`: evaluates bonds one after the other
/// - `ColoredBackend`: evaluates bonds in parallel with rayon
pub trait ForceBackend: Send + Sync {
    /// Prepare the backend for a fixed set of bonds.
    ///
    /// Called once when the kernel is built; particle ids never change afterwards.
    fn new(bonds: &[Bond], num_particles: usize) -> Self
    where
        Self: Sized;

    /// Evaluate all bonds, add forces to `forces` (indexed by particle id),
    /// and return the total energy.
    fn accumulate(
        &self,
        evaluator: &BondEvaluator,
        bonds: &[Bond],
        positions: &[Vector3],
        globals: &[f64],
        forces: &mut [Vector3],
    ) -> f64;

    /// Evaluate the total energy without touching any force buffer.
    ///
    /// Default implementation sums over bonds serially.
    fn energy(
        &self,
        evaluator: &BondEvaluator,
        bonds: &[Bond],
        positions: &[Vector3],
        globals: &[f64],
    ) -> f64 {
        let mut workspace = evaluator.workspace();
        bonds
            .iter()
            .map(|bond| evaluator.evaluate(bond, positions, globals, &mut workspace))
            .sum()
    }
}
