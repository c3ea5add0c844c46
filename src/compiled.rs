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

//! Energy expression compiled against a fixed naming scheme.
//!
//! Every name is mapped to a slot in a flat buffer of values:
//!
//! | slots                     | content                                  |
//! |---------------------------|------------------------------------------|
//! | `0 .. 3N`                 | `x1, y1, z1, x2, ...` for N particles     |
//! | `3N .. 3N+P`              | per-bond parameters                      |
//! | `3N+P .. 3N+P+G`          | global parameters                        |
//! | `3N+P+G .. 3N+P+G+K`      | geometry terms (distance, angle, ...)    |

use crate::{
    expression::{
        parser::{is_builtin, parse, Resolver},
        Expr,
    },
    geometry::GeometryTerm,
    tabulated::TabulatedFunction,
};
use anyhow::{bail, ensure, Result};
use itertools::Itertools;

/// Maps names to slots while parsing
struct Namespace<'a> {
    particles_per_bond: usize,
    per_bond: &'a [String],
    global: &'a [String],
    functions: &'a [TabulatedFunction],
    terms: Vec<GeometryTerm>,
}

impl Namespace<'_> {
    /// Parse names like `x12` into (prefix, one-based index) if the index is a valid label
    fn labelled(&self, name: &str) -> Option<(char, usize)> {
        let mut chars = name.chars();
        let prefix = chars.next()?;
        let digits = chars.as_str();
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: usize = digits.parse().ok()?;
        (1..=self.particles_per_bond)
            .contains(&index)
            .then_some((prefix, index))
    }

    const fn geometry_offset(&self) -> usize {
        3 * self.particles_per_bond + self.per_bond.len() + self.global.len()
    }
}

impl Resolver for Namespace<'_> {
    fn variable(&self, name: &str) -> Option<usize> {
        let n = self.particles_per_bond;
        match self.labelled(name) {
            Some(('x', i)) => return Some(3 * (i - 1)),
            Some(('y', i)) => return Some(3 * (i - 1) + 1),
            Some(('z', i)) => return Some(3 * (i - 1) + 2),
            _ => {}
        }
        if let Some(i) = self.per_bond.iter().position(|p| p == name) {
            return Some(3 * n + i);
        }
        self.global
            .iter()
            .position(|p| p == name)
            .map(|i| 3 * n + self.per_bond.len() + i)
    }

    fn particle(&self, name: &str) -> Option<usize> {
        match self.labelled(name) {
            Some(('p', i)) => Some(i - 1),
            _ => None,
        }
    }

    fn function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name() == name)
    }

    fn geometry(&mut self, term: GeometryTerm) -> usize {
        let index = match self.terms.iter().position(|t| *t == term) {
            Some(index) => index,
            None => {
                self.terms.push(term);
                self.terms.len() - 1
            }
        };
        self.geometry_offset() + index
    }
}

/// Checks that user supplied names are well formed, unique, and not reserved
fn validate_names(namespace: &Namespace) -> Result<()> {
    let names = namespace
        .per_bond
        .iter()
        .chain(namespace.global)
        .map(String::as_str)
        .chain(namespace.functions.iter().map(TabulatedFunction::name))
        .collect_vec();
    if let Some(duplicate) = names.iter().duplicates().next() {
        bail!("name '{duplicate}' is declared more than once");
    }
    for name in names {
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        ensure!(valid, "'{name}' is not a valid name");
        let reserved = is_builtin(name)
            || namespace
                .labelled(name)
                .is_some_and(|(prefix, _)| matches!(prefix, 'x' | 'y' | 'z' | 'p'));
        ensure!(!reserved, "'{name}' is a reserved name");
    }
    Ok(())
}

/// Parsed energy expression together with its partial derivatives.
///
/// Derivatives are taken with respect to each coordinate variable and each
/// geometry term; derivatives that vanish identically are not stored.
#[derive(Clone, Debug)]
pub struct CompiledExpression {
    particles_per_bond: usize,
    num_per_bond: usize,
    num_global: usize,
    energy: Expr,
    /// (coordinate slot, ∂E/∂coordinate)
    coordinate_derivatives: Vec<(usize, Expr)>,
    geometry_terms: Vec<GeometryTerm>,
    /// (index into `geometry_terms`, ∂E/∂term)
    geometry_derivatives: Vec<(usize, Expr)>,
    functions: Vec<TabulatedFunction>,
    /// Names of all slots, for diagnostics
    slot_names: Vec<String>,
}

impl CompiledExpression {
    /// Parse and differentiate `expression`.
    ///
    /// Fails on malformed syntax, unknown names, wrong arity, or invalid parameter names.
    pub fn new(
        expression: &str,
        particles_per_bond: usize,
        per_bond_parameters: &[String],
        global_parameters: &[String],
        functions: Vec<TabulatedFunction>,
    ) -> Result<Self> {
        ensure!(
            particles_per_bond > 0,
            "a bond must involve at least one particle"
        );
        let mut namespace = Namespace {
            particles_per_bond,
            per_bond: per_bond_parameters,
            global: global_parameters,
            functions: &functions,
            terms: Vec::new(),
        };
        validate_names(&namespace)?;
        let energy = parse(expression, &mut namespace)?;
        let geometry_offset = namespace.geometry_offset();
        let geometry_terms = namespace.terms;

        let coordinate_derivatives = (0..3 * particles_per_bond)
            .map(|slot| (slot, energy.differentiate(slot)))
            .filter(|(_, derivative)| !derivative.is_zero())
            .collect_vec();
        let geometry_derivatives = (0..geometry_terms.len())
            .map(|k| (k, energy.differentiate(geometry_offset + k)))
            .filter(|(_, derivative)| !derivative.is_zero())
            .collect_vec();

        let slot_names = (1..=particles_per_bond)
            .flat_map(|i| [format!("x{i}"), format!("y{i}"), format!("z{i}")])
            .chain(per_bond_parameters.iter().cloned())
            .chain(global_parameters.iter().cloned())
            .chain(geometry_terms.iter().map(GeometryTerm::to_string))
            .collect_vec();

        let compiled = Self {
            particles_per_bond,
            num_per_bond: per_bond_parameters.len(),
            num_global: global_parameters.len(),
            energy,
            coordinate_derivatives,
            geometry_terms,
            geometry_derivatives,
            functions,
            slot_names,
        };
        debug!("compiled energy: {}", compiled.format(&compiled.energy));
        for (k, derivative) in &compiled.geometry_derivatives {
            debug!(
                "∂E/∂{} = {}",
                compiled.geometry_terms[*k],
                compiled.format(derivative)
            );
        }
        for (slot, derivative) in &compiled.coordinate_derivatives {
            debug!(
                "∂E/∂{} = {}",
                compiled.slot_names[*slot],
                compiled.format(derivative)
            );
        }
        Ok(compiled)
    }

    /// Human readable form of an expression using slot names
    pub fn format(&self, expr: &Expr) -> String {
        expr.format(&|slot| self.slot_names[slot].clone(), &|i| {
            self.functions[i].name().to_string()
        })
    }

    pub const fn particles_per_bond(&self) -> usize {
        self.particles_per_bond
    }

    pub const fn num_per_bond_parameters(&self) -> usize {
        self.num_per_bond
    }

    pub const fn num_global_parameters(&self) -> usize {
        self.num_global
    }

    /// First slot of the per-bond parameters
    pub const fn per_bond_offset(&self) -> usize {
        3 * self.particles_per_bond
    }

    /// First slot of the global parameters
    pub const fn global_offset(&self) -> usize {
        self.per_bond_offset() + self.num_per_bond
    }

    /// First slot of the geometry terms
    pub const fn geometry_offset(&self) -> usize {
        self.global_offset() + self.num_global
    }

    /// Size of the slot buffer needed for evaluation
    pub fn num_slots(&self) -> usize {
        self.geometry_offset() + self.geometry_terms.len()
    }

    pub const fn energy(&self) -> &Expr {
        &self.energy
    }

    pub fn geometry_terms(&self) -> &[GeometryTerm] {
        &self.geometry_terms
    }

    pub fn coordinate_derivatives(&self) -> &[(usize, Expr)] {
        &self.coordinate_derivatives
    }

    pub fn geometry_derivatives(&self) -> &[(usize, Expr)] {
        &self.geometry_derivatives
    }

    pub fn functions(&self) -> &[TabulatedFunction] {
        &self.functions
    }

    /// Tabulated functions, for refreshing spline data in place
    pub fn functions_mut(&mut self) -> &mut [TabulatedFunction] {
        &mut self.functions
    }
}
