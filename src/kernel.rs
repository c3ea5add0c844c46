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

//! Built, evaluable form of a compound bond force.

use crate::{
    backend::ForceBackend,
    bond::BondEvaluator,
    compiled::CompiledExpression,
    force::{Bond, CompoundBondForce},
    tabulated::TabulatedFunction,
    Vector3,
};
use anyhow::{anyhow, bail, ensure, Context, Result};
use itertools::Itertools;

/// A compound bond force compiled for a system with a fixed number of particles.
///
/// The expression, the parameter schema and the bond connectivity are frozen.
/// Per-bond parameter values, global parameter values and tabulated function
/// samples may still be refreshed; these take `&mut self` and can therefore
/// never overlap an evaluation.
pub struct CompoundBondKernel<B: ForceBackend> {
    evaluator: BondEvaluator,
    bonds: Vec<Bond>,
    /// Expression the kernel was built from
    energy: String,
    global_names: Vec<String>,
    /// Live global parameter values
    globals: Vec<f64>,
    num_particles: usize,
    backend: B,
}

impl<B: ForceBackend> CompoundBondKernel<B> {
    /// Compile `force` for a system of `num_particles` particles
    pub fn new(force: &CompoundBondForce, num_particles: usize) -> Result<Self> {
        let functions: Vec<TabulatedFunction> = force
            .functions()
            .iter()
            .map(TabulatedFunction::try_from)
            .try_collect()?;
        let global_names = force
            .global_parameters()
            .iter()
            .map(|p| p.name.clone())
            .collect_vec();
        let expression = CompiledExpression::new(
            force.energy_function(),
            force.particles_per_bond(),
            force.per_bond_parameters(),
            &global_names,
            functions,
        )
        .with_context(|| format!("cannot compile '{}'", force.energy_function()))?;

        for (index, bond) in force.bonds().iter().enumerate() {
            ensure!(
                bond.particles.len() == force.particles_per_bond()
                    && bond.parameters.len() == force.num_per_bond_parameters(),
                "bond {index} does not match the force's particle count or parameter schema"
            );
            if let Some(id) = bond.particles.iter().find(|&&id| id >= num_particles) {
                bail!(
                    "bond {index} refers to particle {id} but the system has {num_particles} particles"
                );
            }
        }
        let bonds = force.bonds().to_vec();
        let backend = B::new(&bonds, num_particles);
        info!(
            "Built compound bond force: {} bonds of {} particles, {} geometry terms, {} derivatives",
            bonds.len(),
            force.particles_per_bond(),
            expression.geometry_terms().len(),
            expression.geometry_derivatives().len() + expression.coordinate_derivatives().len()
        );
        Ok(Self {
            evaluator: BondEvaluator::new(expression),
            bonds,
            energy: force.energy_function().to_string(),
            global_names,
            globals: force
                .global_parameters()
                .iter()
                .map(|p| p.default_value)
                .collect(),
            num_particles,
            backend,
        })
    }

    pub fn num_bonds(&self) -> usize {
        self.bonds.len()
    }

    pub const fn num_particles(&self) -> usize {
        self.num_particles
    }

    pub const fn particles_per_bond(&self) -> usize {
        self.evaluator.expression().particles_per_bond()
    }

    pub fn bond(&self, index: usize) -> Option<&Bond> {
        self.bonds.get(index)
    }

    pub const fn evaluator(&self) -> &BondEvaluator {
        &self.evaluator
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Current value of a global parameter
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.global_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.globals[i])
    }

    /// Override the live value of a global parameter; the declared default is unaffected
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self
            .global_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| anyhow!("unknown global parameter '{name}'"))?;
        self.globals[index] = value;
        Ok(())
    }

    fn check_buffer(&self, len: usize, what: &str) -> Result<()> {
        ensure!(
            len >= self.num_particles,
            "{what} holds {len} particles but the kernel was built for {}",
            self.num_particles
        );
        Ok(())
    }

    /// Add the force on each particle to `forces` and return the total energy
    pub fn calc_forces_and_energy(
        &self,
        positions: &[Vector3],
        forces: &mut [Vector3],
    ) -> Result<f64> {
        self.check_buffer(positions.len(), "position buffer")?;
        self.check_buffer(forces.len(), "force buffer")?;
        let energy = self.backend.accumulate(
            &self.evaluator,
            &self.bonds,
            positions,
            &self.globals,
            forces,
        );
        trace!("compound bond energy: {energy:.6}");
        Ok(energy)
    }

    /// Total energy only
    pub fn calc_energy(&self, positions: &[Vector3]) -> Result<f64> {
        self.check_buffer(positions.len(), "position buffer")?;
        Ok(self
            .backend
            .energy(&self.evaluator, &self.bonds, positions, &self.globals))
    }

    /// Push per-bond parameter values and tabulated function samples from `force`.
    ///
    /// Anything structural (the expression, the number of bonds, their particles,
    /// the parameter schema, global parameter names, or the set of tabulated
    /// functions) can only change by building a new kernel. Such changes are
    /// rejected and leave the kernel untouched.
    pub fn update_parameters_in_context(&mut self, force: &CompoundBondForce) -> Result<()> {
        const REBUILD: &str = "requires rebuilding the kernel";
        let expression = self.evaluator.expression();
        ensure!(
            force.energy_function() == self.energy,
            "changing the energy expression {REBUILD}"
        );
        ensure!(
            force.particles_per_bond() == expression.particles_per_bond()
                && force.num_per_bond_parameters() == expression.num_per_bond_parameters(),
            "changing the particle count or per-bond parameters {REBUILD}"
        );
        ensure!(
            force
                .global_parameters()
                .iter()
                .map(|p| &p.name)
                .eq(self.global_names.iter()),
            "changing global parameters {REBUILD}"
        );
        ensure!(
            force.num_bonds() == self.bonds.len(),
            "the number of bonds changed from {} to {}; adding or removing bonds {REBUILD}",
            self.bonds.len(),
            force.num_bonds()
        );
        for (index, (old, new)) in self.bonds.iter().zip(force.bonds()).enumerate() {
            ensure!(
                old.particles == new.particles,
                "the particles of bond {index} changed; changing connectivity {REBUILD}"
            );
            ensure!(
                old.parameters.len() == new.parameters.len(),
                "bond {index} has a different number of parameters"
            );
        }
        ensure!(
            force
                .functions()
                .iter()
                .map(|f| f.name.as_str())
                .eq(expression.functions().iter().map(TabulatedFunction::name)),
            "adding, removing or renaming tabulated functions {REBUILD}"
        );

        // Refresh copies first so a rejected table leaves the kernel untouched
        let mut splines = expression.functions().to_vec();
        for (spline, definition) in splines.iter_mut().zip(force.functions()) {
            spline.update(&definition.values, definition.min, definition.max)?;
        }
        self.evaluator
            .expression_mut()
            .functions_mut()
            .clone_from_slice(&splines);
        for (old, new) in self.bonds.iter_mut().zip(force.bonds()) {
            old.parameters.copy_from_slice(&new.parameters);
        }
        debug!("Updated parameters of {} bonds", self.bonds.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ColoredBackend, SerialBackend};
    use approx::assert_relative_eq;

    fn harmonic_bonds() -> CompoundBondForce {
        let mut force = CompoundBondForce::new(2, "0.5*k*(distance(p1,p2) - r0)^2");
        force.add_per_bond_parameter("k").unwrap();
        force.add_global_parameter("r0", 1.0);
        force.add_bond(&[0, 1], &[10.0]).unwrap();
        force.add_bond(&[1, 2], &[20.0]).unwrap();
        force
    }

    fn positions() -> Vec<Vector3> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 3.0, 0.0),
        ]
    }

    #[test]
    fn test_energy_and_forces() {
        let kernel: CompoundBondKernel<SerialBackend> = harmonic_bonds().build_with_backend(3).unwrap();
        let mut forces = vec![Vector3::zeros(); 3];
        let energy = kernel.calc_forces_and_energy(&positions(), &mut forces).unwrap();
        assert_relative_eq!(energy, 0.5 * 10.0 * 1.0 + 0.5 * 20.0 * 4.0);
        assert_relative_eq!(forces[0], Vector3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(forces[1], Vector3::new(-10.0, 40.0, 0.0));
        assert_relative_eq!(forces[2], Vector3::new(0.0, -40.0, 0.0));
        assert_relative_eq!(kernel.calc_energy(&positions()).unwrap(), energy);
    }

    #[test]
    fn test_forces_are_added_to_buffer() {
        let kernel = harmonic_bonds().build(3).unwrap();
        let mut forces = vec![Vector3::new(1.0, 1.0, 1.0); 3];
        kernel.calc_forces_and_energy(&positions(), &mut forces).unwrap();
        assert_relative_eq!(forces[0], Vector3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn test_global_parameter_override() {
        let mut force = harmonic_bonds();
        let mut kernel = force.build(3).unwrap();
        assert_eq!(kernel.parameter("r0"), Some(1.0));
        kernel.set_parameter("r0", 2.0).unwrap();
        assert_relative_eq!(kernel.calc_energy(&positions()).unwrap(), 0.5 * 20.0);
        assert!(kernel.set_parameter("k", 2.0).is_err());
        assert_eq!(force.global_parameter_default_value(0).unwrap(), 1.0);
        // pushing parameter values keeps the live global value
        force.set_bond(0, &[0, 1], &[30.0]).unwrap();
        kernel.update_parameters_in_context(&force).unwrap();
        assert_eq!(kernel.parameter("r0"), Some(2.0));
    }

    #[test]
    fn test_build_errors() {
        let force = harmonic_bonds();
        let err = force.build(2).err().unwrap();
        assert!(err.to_string().contains("refers to particle 2"));
        let force = CompoundBondForce::new(2, "k*distance(p1,p2)");
        let err = force.build(2).err().unwrap();
        assert!(format!("{err:#}").contains("unknown variable 'k'"));
        let mut force = CompoundBondForce::new(2, "f(distance(p1,p2))");
        force.add_function("f", &[1.0], 0.0, 1.0);
        assert!(force.build(2).is_err());
    }

    #[test]
    fn test_buffer_length_is_checked() {
        let kernel = harmonic_bonds().build(3).unwrap();
        let mut forces = vec![Vector3::zeros(); 2];
        assert!(kernel.calc_forces_and_energy(&positions(), &mut forces).is_err());
        assert!(kernel.calc_energy(&positions()[..2]).is_err());
    }

    #[test]
    fn test_structural_updates_are_rejected() {
        let force = harmonic_bonds();
        let mut kernel = force.build(3).unwrap();

        let mut changed = force.clone();
        changed.set_bond(0, &[0, 2], &[10.0]).unwrap();
        let err = kernel.update_parameters_in_context(&changed).unwrap_err();
        assert!(err.to_string().contains("requires rebuilding"));

        let mut changed = force.clone();
        changed.add_bond(&[0, 2], &[10.0]).unwrap();
        assert!(kernel.update_parameters_in_context(&changed).is_err());

        let mut changed = force.clone();
        changed.set_energy_function("k*distance(p1,p2)");
        assert!(kernel.update_parameters_in_context(&changed).is_err());

        let mut changed = force.clone();
        changed.add_global_parameter("extra", 0.0);
        assert!(kernel.update_parameters_in_context(&changed).is_err());

        let mut changed = force.clone();
        changed.add_function("g", &[0.0, 1.0], 0.0, 1.0);
        assert!(kernel.update_parameters_in_context(&changed).is_err());

        // nothing changed on the failed attempts
        assert_eq!(kernel.bond(0), Some(&Bond::new([0, 1], [10.0])));
    }

    #[test]
    fn test_tabulated_function_refresh() {
        let mut force = CompoundBondForce::new(2, "table(distance(p1,p2))");
        force.add_function("table", &[0.0, 1.0, 2.0], 0.0, 2.0);
        force.add_bond(&[0, 1], &[]).unwrap();
        let mut kernel: CompoundBondKernel<ColoredBackend> = force.build(2).unwrap();
        let positions = [Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)];
        assert_relative_eq!(kernel.calc_energy(&positions).unwrap(), 1.0);

        force.set_function(0, "table", &[0.0, 3.0, 6.0], 0.0, 2.0).unwrap();
        kernel.update_parameters_in_context(&force).unwrap();
        assert_relative_eq!(kernel.calc_energy(&positions).unwrap(), 3.0);

        // the domain is refreshed as well
        force.set_function(0, "table", &[0.0, 3.0, 6.0], 0.0, 4.0).unwrap();
        kernel.update_parameters_in_context(&force).unwrap();
        assert_relative_eq!(kernel.calc_energy(&positions).unwrap(), 1.5);
        let spline = &kernel.evaluator().expression().functions()[0];
        assert_eq!(spline.domain(), (0.0, 4.0));
        assert_eq!(spline.name(), "table");

        // an invalid table is rejected and the old spline is kept
        force.set_function(0, "table", &[0.0], 0.0, 2.0).unwrap();
        assert!(kernel.update_parameters_in_context(&force).is_err());
        assert_relative_eq!(kernel.calc_energy(&positions).unwrap(), 1.5);
    }
}
