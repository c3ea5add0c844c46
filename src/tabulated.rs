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

//! Tabulated functions interpolated by natural cubic splines.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Declaration of a tabulated function as stored in a force definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name used to call the function in expressions
    pub name: String,
    /// Values at uniformly spaced points from `min` to `max` (inclusive)
    pub values: Vec<f64>,
    pub min: f64,
    pub max: f64,
}

/// Natural cubic spline through uniformly spaced samples.
///
/// The spline has zero second derivative at both end points. Outside
/// `[min, max]` the function and all of its derivatives are zero.
#[derive(Clone, Debug)]
pub struct TabulatedFunction {
    name: String,
    min: f64,
    max: f64,
    /// Grid spacing
    dx: f64,
    values: Vec<f64>,
    /// Second derivatives at the knots
    second: Vec<f64>,
}

impl TabulatedFunction {
    /// Build the spline from `values` sampled uniformly on `[min, max]`.
    pub fn new(name: impl Into<String>, values: &[f64], min: f64, max: f64) -> Result<Self> {
        let name = name.into();
        let (dx, second) = Self::solve(&name, values, min, max)?;
        Ok(Self {
            name,
            min,
            max,
            dx,
            values: values.to_vec(),
            second,
        })
    }

    /// Replace samples and domain in place, keeping the name.
    pub fn update(&mut self, values: &[f64], min: f64, max: f64) -> Result<()> {
        let (dx, second) = Self::solve(&self.name, values, min, max)?;
        self.min = min;
        self.max = max;
        self.dx = dx;
        self.values = values.to_vec();
        self.second = second;
        Ok(())
    }

    /// Validate input and solve the tridiagonal system for the knot second derivatives
    fn solve(name: &str, values: &[f64], min: f64, max: f64) -> Result<(f64, Vec<f64>)> {
        let n = values.len();
        ensure!(
            n >= 2,
            "tabulated function '{name}' needs at least two values, got {n}"
        );
        ensure!(
            min.is_finite() && max.is_finite() && min < max,
            "tabulated function '{name}' has an invalid domain [{min}, {max}]"
        );
        ensure!(
            values.iter().all(|v| v.is_finite()),
            "tabulated function '{name}' contains non-finite values"
        );
        let dx = (max - min) / (n - 1) as f64;
        let mut second = vec![0.0; n];
        if n < 3 {
            return Ok((dx, second));
        }
        // Thomas algorithm for the interior knots; uniform spacing gives
        // sub/super diagonals of 1 and a main diagonal of 4 after scaling by 6/dx².
        let mut diagonal = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        let scale = 6.0 / (dx * dx);
        for i in 1..n - 1 {
            rhs[i] = scale * (values[i + 1] - 2.0 * values[i] + values[i - 1]);
            diagonal[i] = 4.0;
        }
        for i in 2..n - 1 {
            let w = 1.0 / diagonal[i - 1];
            diagonal[i] -= w;
            rhs[i] -= w * rhs[i - 1];
        }
        second[n - 2] = rhs[n - 2] / diagonal[n - 2];
        for i in (1..n - 2).rev() {
            second[i] = (rhs[i] - second[i + 1]) / diagonal[i];
        }
        Ok((dx, second))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domain (min, max)
    pub const fn domain(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Function value and first derivative at `x`
    pub fn evaluate(&self, x: f64) -> (f64, f64) {
        (self.derivative(x, 0), self.derivative(x, 1))
    }

    /// Derivative of given order (0 = value) at `x`.
    ///
    /// Orders above three vanish since the spline is piecewise cubic.
    pub fn derivative(&self, x: f64, order: u8) -> f64 {
        if !(self.min..=self.max).contains(&x) {
            return 0.0;
        }
        // O(1) interval lookup on the uniform grid
        let i = (((x - self.min) / self.dx) as usize).min(self.values.len() - 2);
        let dx = self.dx;
        let b = (x - self.min) / dx - i as f64;
        let a = 1.0 - b;
        let (y0, y1) = (self.values[i], self.values[i + 1]);
        let (s0, s1) = (self.second[i], self.second[i + 1]);
        match order {
            0 => a * y0 + b * y1 + ((a * a * a - a) * s0 + (b * b * b - b) * s1) * dx * dx / 6.0,
            1 => {
                (y1 - y0) / dx + ((1.0 - 3.0 * a * a) * s0 + (3.0 * b * b - 1.0) * s1) * dx / 6.0
            }
            2 => a * s0 + b * s1,
            3 => (s1 - s0) / dx,
            _ => 0.0,
        }
    }
}

impl TryFrom<&FunctionDefinition> for TabulatedFunction {
    type Error = anyhow::Error;
    fn try_from(definition: &FunctionDefinition) -> Result<Self> {
        Self::new(
            definition.name.as_str(),
            &definition.values,
            definition.min,
            definition.max,
        )
    }
}
