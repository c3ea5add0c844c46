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

//! Expression trees for energy functions.
//!
//! An [`Expr`] refers to variables through integer slots that are resolved once
//! when parsing, so evaluation is a plain recursive walk without any name lookup.
//! The smart constructors (`add`, `mul`, ...) fold constants, which keeps the
//! symbolic derivatives compact.

mod derivative;
pub(crate) mod parser;

use crate::tabulated::TabulatedFunction;

/// Single-argument functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Negate,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Sec,
    Csc,
    Tan,
    Cot,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Erf,
    Erfc,
    Abs,
    /// 0 if x < 0, 1 otherwise
    Step,
    /// 1 if x == 0, 0 otherwise
    Delta,
}

impl Function {
    /// Look up a named function; `Negate` has no name.
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "sec" => Self::Sec,
            "csc" => Self::Csc,
            "tan" => Self::Tan,
            "cot" => Self::Cot,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "erf" => Self::Erf,
            "erfc" => Self::Erfc,
            "abs" => Self::Abs,
            "step" => Self::Step,
            "delta" => Self::Delta,
            _ => return None,
        };
        Some(function)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Sec => "sec",
            Self::Csc => "csc",
            Self::Tan => "tan",
            Self::Cot => "cot",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Erf => "erf",
            Self::Erfc => "erfc",
            Self::Abs => "abs",
            Self::Step => "step",
            Self::Delta => "delta",
        }
    }

    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::Negate => -x,
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Sec => x.cos().recip(),
            Self::Csc => x.sin().recip(),
            Self::Tan => x.tan(),
            Self::Cot => x.tan().recip(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Sinh => x.sinh(),
            Self::Cosh => x.cosh(),
            Self::Tanh => x.tanh(),
            Self::Erf => libm::erf(x),
            Self::Erfc => libm::erfc(x),
            Self::Abs => x.abs(),
            Self::Step => {
                if x < 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Delta => {
                if x == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Two-argument operators and functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Min,
    Max,
}

impl Operator {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
            Self::Divide => a / b,
            Self::Power => a.powf(b),
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "^",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// Expression tree node
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(f64),
    /// Value stored in the given slot of the evaluation buffer
    Variable(usize),
    Unary(Function, Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
    /// Tabulated function (index into the function table), differentiated `order` times
    Tabulated {
        function: usize,
        order: u8,
        argument: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate with slot values `variables` and tabulated `functions`
    pub fn evaluate(&self, variables: &[f64], functions: &[TabulatedFunction]) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Variable(slot) => variables[*slot],
            Self::Unary(function, arg) => function.apply(arg.evaluate(variables, functions)),
            Self::Binary(operator, a, b) => operator.apply(
                a.evaluate(variables, functions),
                b.evaluate(variables, functions),
            ),
            Self::Tabulated {
                function,
                order,
                argument,
            } => functions[*function].derivative(argument.evaluate(variables, functions), *order),
        }
    }

    pub const fn as_constant(&self) -> Option<f64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_constant() == Some(0.0)
    }

    fn is_one(&self) -> bool {
        self.as_constant() == Some(1.0)
    }

    /// True if the slot appears anywhere in the tree
    pub fn depends_on(&self, slot: usize) -> bool {
        match self {
            Self::Constant(_) => false,
            Self::Variable(s) => *s == slot,
            Self::Unary(_, arg) => arg.depends_on(slot),
            Self::Binary(_, a, b) => a.depends_on(slot) || b.depends_on(slot),
            Self::Tabulated { argument, .. } => argument.depends_on(slot),
        }
    }

    /// Apply a single-argument function, folding constants
    pub fn unary(function: Function, arg: Expr) -> Expr {
        match (function, arg) {
            (_, Self::Constant(x)) => Self::Constant(function.apply(x)),
            (Function::Negate, Self::Unary(Function::Negate, inner)) => *inner,
            (function, arg) => Self::Unary(function, Box::new(arg)),
        }
    }

    /// Apply a two-argument operator, folding constants and trivial identities
    pub fn binary(operator: Operator, a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Self::Constant(operator.apply(x, y));
        }
        match operator {
            Operator::Add if a.is_zero() => b,
            Operator::Add | Operator::Subtract if b.is_zero() => a,
            Operator::Subtract if a.is_zero() => Self::unary(Function::Negate, b),
            Operator::Multiply if a.is_zero() || b.is_zero() => Self::Constant(0.0),
            Operator::Multiply if a.is_one() => b,
            Operator::Multiply | Operator::Divide if b.is_one() => a,
            Operator::Divide if a.is_zero() => Self::Constant(0.0),
            Operator::Power if b.is_zero() => Self::Constant(1.0),
            Operator::Power if b.is_one() => a,
            _ => Self::Binary(operator, Box::new(a), Box::new(b)),
        }
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        Self::binary(Operator::Add, a, b)
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        Self::binary(Operator::Subtract, a, b)
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        Self::binary(Operator::Multiply, a, b)
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        Self::binary(Operator::Divide, a, b)
    }

    pub fn pow(a: Expr, b: Expr) -> Expr {
        Self::binary(Operator::Power, a, b)
    }

    pub fn neg(a: Expr) -> Expr {
        Self::unary(Function::Negate, a)
    }

    /// Human readable form; `name` maps slots to variable names and `function_name`
    /// maps tabulated function indices to their names.
    pub fn format(
        &self,
        name: &dyn Fn(usize) -> String,
        function_name: &dyn Fn(usize) -> String,
    ) -> String {
        match self {
            Self::Constant(value) => value.to_string(),
            Self::Variable(slot) => name(*slot),
            Self::Unary(Function::Negate, arg) => format!("-({})", arg.format(name, function_name)),
            Self::Unary(function, arg) => {
                format!("{}({})", function.name(), arg.format(name, function_name))
            }
            Self::Binary(op @ (Operator::Min | Operator::Max), a, b) => format!(
                "{}({}, {})",
                op.symbol(),
                a.format(name, function_name),
                b.format(name, function_name)
            ),
            Self::Binary(op, a, b) => format!(
                "({}{}{})",
                a.format(name, function_name),
                op.symbol(),
                b.format(name, function_name)
            ),
            Self::Tabulated {
                function,
                order,
                argument,
            } => format!(
                "{}{}({})",
                function_name(*function),
                "'".repeat(*order as usize),
                argument.format(name, function_name)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn var(slot: usize) -> Expr {
        Expr::Variable(slot)
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::mul(Expr::Constant(2.0), Expr::add(Expr::Constant(1.0), Expr::Constant(3.0)));
        assert_eq!(e, Expr::Constant(8.0));
        assert_eq!(Expr::mul(var(0), Expr::Constant(0.0)), Expr::Constant(0.0));
        assert_eq!(Expr::mul(Expr::Constant(1.0), var(0)), var(0));
        assert_eq!(Expr::add(Expr::Constant(0.0), var(1)), var(1));
        assert_eq!(Expr::sub(Expr::Constant(0.0), var(1)), Expr::neg(var(1)));
        assert_eq!(Expr::neg(Expr::neg(var(2))), var(2));
        assert_eq!(Expr::pow(var(0), Expr::Constant(1.0)), var(0));
        assert_eq!(Expr::unary(Function::Cos, Expr::Constant(0.0)), Expr::Constant(1.0));
    }

    #[test]
    fn test_functions() {
        assert_eq!(Function::Step.apply(-1e-12), 0.0);
        assert_eq!(Function::Step.apply(0.0), 1.0);
        assert_eq!(Function::Delta.apply(0.0), 1.0);
        assert_eq!(Function::Delta.apply(1e-300), 0.0);
        assert_relative_eq!(Function::Sec.apply(0.3), 1.0 / 0.3f64.cos());
        assert_relative_eq!(Function::Cot.apply(0.3), 1.0 / 0.3f64.tan());
        assert_relative_eq!(Function::Erf.apply(0.5), 0.5204998778130465, epsilon = 1e-14);
        assert_relative_eq!(Function::Erfc.apply(0.5), 1.0 - 0.5204998778130465, epsilon = 1e-14);
        assert_eq!(Function::from_name("tanh"), Some(Function::Tanh));
        assert_eq!(Function::from_name("min"), None);
    }

    #[test]
    fn test_evaluate() {
        // min(x0, 2) * x1 ^ 2 - sqrt(x0)
        let e = Expr::sub(
            Expr::mul(
                Expr::binary(Operator::Min, var(0), Expr::Constant(2.0)),
                Expr::pow(var(1), Expr::Constant(2.0)),
            ),
            Expr::unary(Function::Sqrt, var(0)),
        );
        assert_relative_eq!(e.evaluate(&[4.0, 3.0], &[]), 2.0 * 9.0 - 2.0);
        assert!(e.depends_on(1));
        assert!(!e.depends_on(2));
        let names = |slot: usize| format!("v{slot}");
        let functions = |i: usize| format!("f{i}");
        assert_eq!(e.format(&names, &functions), "((min(v0, 2)*(v1^2))-sqrt(v0))");
    }
}
