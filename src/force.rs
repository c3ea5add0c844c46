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

//! Declarative definition of a compound bond force.
//!
//! A [`CompoundBondForce`] holds the energy expression, the parameter schema,
//! tabulated functions and the bonds. It is freely mutable and is turned into
//! an evaluable [`CompoundBondKernel`] with [`CompoundBondForce::build`].
//!
//! Definitions can also be read from YAML:
//!
//! ~~~
//! let yaml = r#"
//! particles_per_bond: 3
//! energy: "0.5*kangle*(angle(p1,p2,p3) - theta0)^2"
//! per_bond_parameters: [kangle, theta0]
//! bonds:
//!   - particles: [0, 1, 2]
//!     parameters: [100.0, 1.91]
//! "#;
//! let force = compoundbond::CompoundBondForce::from_yaml(yaml).unwrap();
//! assert_eq!(force.num_bonds(), 1);
//! ~~~

use crate::{
    backend::{ColoredBackend, ForceBackend},
    kernel::CompoundBondKernel,
    tabulated::FunctionDefinition,
};
use anyhow::{anyhow, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One bond: the physical particle ids for roles `p1..pN` and per-bond parameter values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bond {
    pub particles: Vec<usize>,
    #[serde(default)]
    pub parameters: Vec<f64>,
}

impl Bond {
    pub fn new(particles: impl Into<Vec<usize>>, parameters: impl Into<Vec<f64>>) -> Self {
        Self {
            particles: particles.into(),
            parameters: parameters.into(),
        }
    }
}

/// A named global parameter with its default value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameter {
    pub name: String,
    pub default_value: f64,
}

/// User defined bonded interaction between a fixed number of particles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompoundBondForce {
    particles_per_bond: usize,
    /// Algebraic expression for the energy of one bond
    energy: String,
    #[serde(default)]
    per_bond_parameters: Vec<String>,
    #[serde(default)]
    global_parameters: Vec<GlobalParameter>,
    #[serde(default)]
    functions: Vec<FunctionDefinition>,
    #[serde(default)]
    bonds: Vec<Bond>,
}

impl CompoundBondForce {
    /// New force where each bond involves `particles_per_bond` particles
    pub fn new(particles_per_bond: usize, energy: impl Into<String>) -> Self {
        Self {
            particles_per_bond,
            energy: energy.into(),
            per_bond_parameters: Vec::new(),
            global_parameters: Vec::new(),
            functions: Vec::new(),
            bonds: Vec::new(),
        }
    }

    /// Read a force definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let force: Self = serde_yaml::from_str(yaml).context("invalid force definition")?;
        for (index, bond) in force.bonds.iter().enumerate() {
            force
                .check_bond(bond)
                .with_context(|| format!("bond {index}"))?;
        }
        Ok(force)
    }

    /// Read a force definition from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        info!("Reading compound bond force from {}", path.display());
        Self::from_yaml(&yaml)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub const fn particles_per_bond(&self) -> usize {
        self.particles_per_bond
    }

    pub fn num_bonds(&self) -> usize {
        self.bonds.len()
    }

    pub fn num_per_bond_parameters(&self) -> usize {
        self.per_bond_parameters.len()
    }

    pub fn num_global_parameters(&self) -> usize {
        self.global_parameters.len()
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn energy_function(&self) -> &str {
        &self.energy
    }

    pub fn set_energy_function(&mut self, energy: impl Into<String>) {
        self.energy = energy.into();
    }

    /// Add a per-bond parameter and return its index.
    ///
    /// The schema is frozen once bonds have been added.
    pub fn add_per_bond_parameter(&mut self, name: impl Into<String>) -> Result<usize> {
        let name = name.into();
        ensure!(
            self.bonds.is_empty(),
            "cannot add per-bond parameter '{name}' after bonds have been added"
        );
        self.per_bond_parameters.push(name);
        Ok(self.per_bond_parameters.len() - 1)
    }

    pub fn per_bond_parameter_name(&self, index: usize) -> Result<&str> {
        self.per_bond_parameters
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("no per-bond parameter with index {index}"))
    }

    pub fn set_per_bond_parameter_name(
        &mut self,
        index: usize,
        name: impl Into<String>,
    ) -> Result<()> {
        let slot = self
            .per_bond_parameters
            .get_mut(index)
            .ok_or_else(|| anyhow!("no per-bond parameter with index {index}"))?;
        *slot = name.into();
        Ok(())
    }

    /// Add a global parameter and return its index
    pub fn add_global_parameter(&mut self, name: impl Into<String>, default_value: f64) -> usize {
        self.global_parameters.push(GlobalParameter {
            name: name.into(),
            default_value,
        });
        self.global_parameters.len() - 1
    }

    fn global_parameter(&self, index: usize) -> Result<&GlobalParameter> {
        self.global_parameters
            .get(index)
            .ok_or_else(|| anyhow!("no global parameter with index {index}"))
    }

    fn global_parameter_mut(&mut self, index: usize) -> Result<&mut GlobalParameter> {
        self.global_parameters
            .get_mut(index)
            .ok_or_else(|| anyhow!("no global parameter with index {index}"))
    }

    pub fn global_parameter_name(&self, index: usize) -> Result<&str> {
        Ok(&self.global_parameter(index)?.name)
    }

    pub fn set_global_parameter_name(
        &mut self,
        index: usize,
        name: impl Into<String>,
    ) -> Result<()> {
        self.global_parameter_mut(index)?.name = name.into();
        Ok(())
    }

    pub fn global_parameter_default_value(&self, index: usize) -> Result<f64> {
        Ok(self.global_parameter(index)?.default_value)
    }

    pub fn set_global_parameter_default_value(&mut self, index: usize, value: f64) -> Result<()> {
        self.global_parameter_mut(index)?.default_value = value;
        Ok(())
    }

    pub fn global_parameters(&self) -> &[GlobalParameter] {
        &self.global_parameters
    }

    pub fn per_bond_parameters(&self) -> &[String] {
        &self.per_bond_parameters
    }

    fn check_bond(&self, bond: &Bond) -> Result<()> {
        ensure!(
            bond.particles.len() == self.particles_per_bond,
            "a bond needs {} particles, got {}",
            self.particles_per_bond,
            bond.particles.len()
        );
        ensure!(
            bond.parameters.len() == self.per_bond_parameters.len(),
            "a bond needs {} per-bond parameter values, got {}",
            self.per_bond_parameters.len(),
            bond.parameters.len()
        );
        Ok(())
    }

    /// Add a bond and return its index
    pub fn add_bond(&mut self, particles: &[usize], parameters: &[f64]) -> Result<usize> {
        let bond = Bond::new(particles, parameters);
        self.check_bond(&bond)?;
        self.bonds.push(bond);
        Ok(self.bonds.len() - 1)
    }

    pub fn bond(&self, index: usize) -> Result<&Bond> {
        self.bonds
            .get(index)
            .ok_or_else(|| anyhow!("no bond with index {index}"))
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Replace the particles and parameter values of an existing bond.
    ///
    /// Only parameter values can later be pushed into a built kernel with
    /// [`CompoundBondKernel::update_parameters_in_context`].
    pub fn set_bond(
        &mut self,
        index: usize,
        particles: &[usize],
        parameters: &[f64],
    ) -> Result<()> {
        let bond = Bond::new(particles, parameters);
        self.check_bond(&bond)?;
        let slot = self
            .bonds
            .get_mut(index)
            .ok_or_else(|| anyhow!("no bond with index {index}"))?;
        *slot = bond;
        Ok(())
    }

    /// Add a tabulated function and return its index.
    ///
    /// The spline itself is validated and built when the force is built.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
        min: f64,
        max: f64,
    ) -> usize {
        self.functions.push(FunctionDefinition {
            name: name.into(),
            values: values.to_vec(),
            min,
            max,
        });
        self.functions.len() - 1
    }

    pub fn function(&self, index: usize) -> Result<&FunctionDefinition> {
        self.functions
            .get(index)
            .ok_or_else(|| anyhow!("no tabulated function with index {index}"))
    }

    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn set_function(
        &mut self,
        index: usize,
        name: impl Into<String>,
        values: &[f64],
        min: f64,
        max: f64,
    ) -> Result<()> {
        let slot = self
            .functions
            .get_mut(index)
            .ok_or_else(|| anyhow!("no tabulated function with index {index}"))?;
        *slot = FunctionDefinition {
            name: name.into(),
            values: values.to_vec(),
            min,
            max,
        };
        Ok(())
    }

    /// Build a kernel for a system of `num_particles` particles using the default parallel backend
    pub fn build(&self, num_particles: usize) -> Result<CompoundBondKernel<ColoredBackend>> {
        self.build_with_backend(num_particles)
    }

    /// Build a kernel with a specific evaluation backend
    pub fn build_with_backend<B: ForceBackend>(
        &self,
        num_particles: usize,
    ) -> Result<CompoundBondKernel<B>> {
        CompoundBondKernel::new(self, num_particles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urey_bradley() -> CompoundBondForce {
        let mut force = CompoundBondForce::new(
            3,
            "0.5*(kangle*(angle(p1,p2,p3)-theta0)^2+kbond*(distance(p1,p3)-r0)^2)",
        );
        for name in ["kangle", "kbond", "theta0", "r0"] {
            force.add_per_bond_parameter(name).unwrap();
        }
        force
    }

    #[test]
    fn test_schema_is_frozen_by_bonds() {
        let mut force = urey_bradley();
        assert_eq!(force.add_bond(&[0, 1, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap(), 0);
        assert!(force.add_per_bond_parameter("extra").is_err());
        assert_eq!(force.num_per_bond_parameters(), 4);
        assert_eq!(force.per_bond_parameter_name(2).unwrap(), "theta0");
        assert!(force.per_bond_parameter_name(4).is_err());
    }

    #[test]
    fn test_bond_validation() {
        let mut force = urey_bradley();
        assert!(force.add_bond(&[0, 1], &[1.0, 2.0, 3.0, 4.0]).is_err());
        assert!(force.add_bond(&[0, 1, 2], &[1.0]).is_err());
        force.add_bond(&[0, 1, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        force.set_bond(0, &[2, 1, 0], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(force.bond(0).unwrap(), &Bond::new([2, 1, 0], [5.0, 6.0, 7.0, 8.0]));
        assert!(force.set_bond(1, &[0, 1, 2], &[1.0, 2.0, 3.0, 4.0]).is_err());
        assert!(force.set_bond(0, &[0, 1, 2], &[1.0]).is_err());
    }

    #[test]
    fn test_global_parameters() {
        let mut force = urey_bradley();
        assert_eq!(force.add_global_parameter("scale", 2.0), 0);
        force.set_global_parameter_default_value(0, 3.0).unwrap();
        force.set_global_parameter_name(0, "lambda").unwrap();
        assert_eq!(force.global_parameter_name(0).unwrap(), "lambda");
        assert_eq!(force.global_parameter_default_value(0).unwrap(), 3.0);
        assert!(force.global_parameter_default_value(1).is_err());
    }

    #[test]
    fn test_functions() {
        let mut force = CompoundBondForce::new(2, "f(distance(p1,p2))");
        assert_eq!(force.add_function("f", &[0.0, 1.0, 4.0], 0.0, 2.0), 0);
        force.set_function(0, "f", &[0.0, 2.0], 0.0, 1.0).unwrap();
        assert_eq!(force.function(0).unwrap().values, vec![0.0, 2.0]);
        assert!(force.set_function(1, "g", &[0.0, 2.0], 0.0, 1.0).is_err());
        assert_eq!(force.num_functions(), 1);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut force = urey_bradley();
        force.add_global_parameter("lambda", 1.0);
        force.add_function("table", &[0.0, 1.0], 0.0, 1.0);
        force.add_bond(&[0, 1, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let yaml = force.to_yaml().unwrap();
        assert_eq!(CompoundBondForce::from_yaml(&yaml).unwrap(), force);
    }

    #[test]
    fn test_yaml_errors() {
        let yaml = "particles_per_bond: 2\nenergy: distance(p1,p2)\nbonds:\n  - particles: [0]\n";
        let err = CompoundBondForce::from_yaml(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("needs 2 particles"));
        let yaml = "particles_per_bond: 2\nenergy: x1\nunknown_key: 1\n";
        assert!(CompoundBondForce::from_yaml(yaml).is_err());
        assert!(CompoundBondForce::from_file("/nonexistent/force.yaml").is_err());
    }
}
