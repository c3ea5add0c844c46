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

//! Serial reference backend.

use super::ForceBackend;
use crate::{bond::BondEvaluator, force::Bond, Vector3};

/// Evaluates bonds in order on the calling thread.
///
/// The summation order is fixed, so results are reproducible bit for bit.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialBackend;

impl ForceBackend for SerialBackend {
    fn new(_bonds: &[Bond], _num_particles: usize) -> Self {
        Self
    }

    fn accumulate(
        &self,
        evaluator: &BondEvaluator,
        bonds: &[Bond],
        positions: &[Vector3],
        globals: &[f64],
        forces: &mut [Vector3],
    ) -> f64 {
        let mut workspace = evaluator.workspace();
        let mut energy = 0.0;
        for bond in bonds {
            energy += evaluator.evaluate(bond, positions, globals, &mut workspace);
            for (&id, force) in bond.particles.iter().zip(workspace.forces()) {
                forces[id] += force;
            }
        }
        energy
    }
}
