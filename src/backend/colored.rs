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

//! Parallel backend using conflict-free bond colouring.
//!
//! Bonds are greedily partitioned into colours such that no two bonds of the
//! same colour share a particle. Colours are processed one after the other;
//! the bonds within a colour are evaluated concurrently with rayon and their
//! per-role forces are then added to the force buffer in bond order. Since a
//! colour never touches a particle twice, the scatter order within a colour
//! does not affect the result.
//!
//! Bonds are summed colour by colour, and `energy` uses a parallel sum
//! reduction, so totals may differ in the last bits from the serial backend.

use super::ForceBackend;
use crate::{bond::BondEvaluator, force::Bond, Vector3};
use itertools::Itertools;
use rayon::prelude::*;

/// Greedy colouring such that bonds sharing a particle never have the same colour.
///
/// Returns bond indices grouped by colour.
pub(crate) fn color_bonds(bonds: &[Bond], num_particles: usize) -> Vec<Vec<usize>> {
    // colours already used by the bonds touching each particle
    let mut particle_colors: Vec<Vec<usize>> = vec![Vec::new(); num_particles];
    let mut colors: Vec<Vec<usize>> = Vec::new();
    for (index, bond) in bonds.iter().enumerate() {
        let taken = bond
            .particles
            .iter()
            .flat_map(|&id| particle_colors[id].iter().copied())
            .collect_vec();
        let color = (0..colors.len())
            .find(|c| !taken.contains(c))
            .unwrap_or(colors.len());
        if color == colors.len() {
            colors.push(Vec::new());
        }
        colors[color].push(index);
        for &id in bond.particles.iter().unique() {
            particle_colors[id].push(color);
        }
    }
    colors
}

/// Evaluates bonds in parallel, one colour at a time
#[derive(Clone, Debug, Default)]
pub struct ColoredBackend {
    /// Bond indices grouped by colour
    colors: Vec<Vec<usize>>,
}

impl ColoredBackend {
    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    pub fn colors(&self) -> &[Vec<usize>] {
        &self.colors
    }
}

impl ForceBackend for ColoredBackend {
    fn new(bonds: &[Bond], num_particles: usize) -> Self {
        let colors = color_bonds(bonds, num_particles);
        debug!(
            "Partitioned {} bonds into {} conflict-free colours",
            bonds.len(),
            colors.len()
        );
        Self { colors }
    }

    fn accumulate(
        &self,
        evaluator: &BondEvaluator,
        bonds: &[Bond],
        positions: &[Vector3],
        globals: &[f64],
        forces: &mut [Vector3],
    ) -> f64 {
        // (energy, per-role forces) of each bond in the current colour
        let mut results: Vec<(f64, Vec<Vector3>)> = Vec::new();
        let mut energy = 0.0;
        for color in &self.colors {
            color
                .par_iter()
                .map_init(
                    || evaluator.workspace(),
                    |workspace, &index| {
                        let bond_energy =
                            evaluator.evaluate(&bonds[index], positions, globals, workspace);
                        (bond_energy, workspace.forces().to_vec())
                    },
                )
                .collect_into_vec(&mut results);
            for (&index, (bond_energy, bond_forces)) in color.iter().zip(&results) {
                energy += bond_energy;
                for (&id, force) in bonds[index].particles.iter().zip(bond_forces) {
                    forces[id] += force;
                }
            }
        }
        energy
    }

    fn energy(
        &self,
        evaluator: &BondEvaluator,
        bonds: &[Bond],
        positions: &[Vector3],
        globals: &[f64],
    ) -> f64 {
        bonds
            .par_iter()
            .map_init(
                || evaluator.workspace(),
                |workspace, bond| evaluator.evaluate(bond, positions, globals, workspace),
            )
            .sum()
    }
}
