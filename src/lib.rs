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

//! User defined bonded interactions between groups of particles.
//!
//! The energy of every bond is an algebraic expression of particle coordinates
//! (`x1`, `y2`, ...), geometric terms (`distance(p1,p2)`, `angle(p1,p2,p3)`,
//! `dihedral(p1,p2,p3,p4)`), per-bond and global parameters, and splined
//! tabulated functions. Forces follow from symbolic differentiation of the
//! expression combined with closed-form gradients of the geometric terms.
//!
//! ~~~
//! use compoundbond::{CompoundBondForce, Vector3};
//! let mut force = CompoundBondForce::new(3, "0.5*k*(angle(p1,p2,p3) - theta0)^2");
//! force.add_per_bond_parameter("k").unwrap();
//! force.add_global_parameter("theta0", 1.5);
//! force.add_bond(&[0, 1, 2], &[100.0]).unwrap();
//!
//! let kernel = force.build(3).unwrap();
//! let positions = [
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::zeros(),
//!     Vector3::new(0.0, 1.0, 0.0),
//! ];
//! let mut forces = vec![Vector3::zeros(); 3];
//! let energy = kernel.calc_forces_and_energy(&positions, &mut forces).unwrap();
//! assert!(energy > 0.0);
//! ~~~

pub mod backend;
pub mod bond;
pub mod compiled;
pub mod expression;
pub mod force;
pub mod geometry;
pub mod kernel;
pub mod tabulated;

#[macro_use]
extern crate log;

pub type Vector3 = nalgebra::Vector3<f64>;

pub use backend::{ColoredBackend, ForceBackend, SerialBackend};
pub use bond::BondEvaluator;
pub use force::{Bond, CompoundBondForce, GlobalParameter};
pub use kernel::CompoundBondKernel;
pub use tabulated::{FunctionDefinition, TabulatedFunction};
