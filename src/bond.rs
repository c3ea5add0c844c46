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

//! Energy and forces of a single bond.

use crate::{compiled::CompiledExpression, force::Bond, Vector3};

/// Scratch buffers reused between bond evaluations.
///
/// Create one per worker thread with [`BondEvaluator::workspace`].
#[derive(Clone, Debug)]
pub struct Workspace {
    /// Slot values fed to the expression trees
    slots: Vec<f64>,
    /// Positions of the bond's roles
    positions: Vec<Vector3>,
    /// Gradient of each geometry term w.r.t. its roles
    gradients: Vec<[Vector3; 4]>,
    /// Force on each role after [`BondEvaluator::evaluate`]
    forces: Vec<Vector3>,
}

impl Workspace {
    /// Forces on roles `p1..pN` from the last evaluation
    pub fn forces(&self) -> &[Vector3] {
        &self.forces
    }
}

/// Evaluates the compiled energy expression and its forces for one bond at a time
#[derive(Clone, Debug)]
pub struct BondEvaluator {
    expression: CompiledExpression,
}

impl BondEvaluator {
    pub const fn new(expression: CompiledExpression) -> Self {
        Self { expression }
    }

    pub const fn expression(&self) -> &CompiledExpression {
        &self.expression
    }

    pub fn expression_mut(&mut self) -> &mut CompiledExpression {
        &mut self.expression
    }

    /// Allocate scratch buffers sized for this expression
    pub fn workspace(&self) -> Workspace {
        let n = self.expression.particles_per_bond();
        Workspace {
            slots: vec![0.0; self.expression.num_slots()],
            positions: vec![Vector3::zeros(); n],
            gradients: vec![[Vector3::zeros(); 4]; self.expression.geometry_terms().len()],
            forces: vec![Vector3::zeros(); n],
        }
    }

    /// Energy of `bond`; the force on each role is left in `workspace.forces()`.
    ///
    /// `positions` is indexed by physical particle id and `globals` holds the
    /// current global parameter values in declaration order. The force on a
    /// role is -∂E/∂r, obtained from the explicit coordinate derivatives plus
    /// the chain rule through every geometry term.
    pub fn evaluate(
        &self,
        bond: &Bond,
        positions: &[Vector3],
        globals: &[f64],
        workspace: &mut Workspace,
    ) -> f64 {
        let expression = &self.expression;
        let functions = expression.functions();
        let Workspace {
            slots,
            positions: local,
            gradients,
            forces,
        } = workspace;

        for (role, &id) in bond.particles.iter().enumerate() {
            let r = positions[id];
            local[role] = r;
            slots[3 * role..3 * role + 3].copy_from_slice(r.as_slice());
        }
        let offset = expression.per_bond_offset();
        slots[offset..offset + bond.parameters.len()].copy_from_slice(&bond.parameters);
        let offset = expression.global_offset();
        slots[offset..offset + globals.len()].copy_from_slice(globals);
        let offset = expression.geometry_offset();
        for (k, term) in expression.geometry_terms().iter().enumerate() {
            slots[offset + k] = term.evaluate(local, &mut gradients[k]);
        }

        let energy = expression.energy().evaluate(slots, functions);

        forces.fill(Vector3::zeros());
        for (slot, derivative) in expression.coordinate_derivatives() {
            forces[slot / 3][slot % 3] -= derivative.evaluate(slots, functions);
        }
        for (k, derivative) in expression.geometry_derivatives() {
            let de_dq = derivative.evaluate(slots, functions);
            let term = &expression.geometry_terms()[*k];
            for (gradient, &role) in gradients[*k].iter().zip(term.roles()) {
                forces[role] -= gradient * de_dq;
            }
        }
        energy
    }

    /// Energy and per-role forces of a single bond, allocating a fresh workspace
    pub fn evaluate_bond(
        &self,
        bond: &Bond,
        positions: &[Vector3],
        globals: &[f64],
    ) -> (f64, Vec<Vector3>) {
        let mut workspace = self.workspace();
        let energy = self.evaluate(bond, positions, globals, &mut workspace);
        (energy, workspace.forces)
    }
}
