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

//! Symbolic differentiation of expression trees.

use super::{Expr, Function, Operator};
use std::f64::consts::PI;

impl Expr {
    /// Partial derivative with respect to the variable in `slot`.
    ///
    /// `step` and `delta` are treated as having zero derivative; the
    /// discontinuity at the origin has measure zero. `abs`, `min` and `max`
    /// use the one-sided derivative at their kinks.
    pub fn differentiate(&self, slot: usize) -> Expr {
        if !self.depends_on(slot) {
            return Expr::Constant(0.0);
        }
        match self {
            Self::Constant(_) => Expr::Constant(0.0),
            Self::Variable(s) => Expr::Constant(if *s == slot { 1.0 } else { 0.0 }),
            Self::Unary(function, arg) => {
                let outer = unary_derivative(*function, arg);
                Expr::mul(outer, arg.differentiate(slot))
            }
            Self::Binary(operator, a, b) => binary_derivative(*operator, a, b, slot),
            Self::Tabulated {
                function,
                order,
                argument,
            } => {
                let outer = Expr::Tabulated {
                    function: *function,
                    order: order + 1,
                    argument: argument.clone(),
                };
                Expr::mul(outer, argument.differentiate(slot))
            }
        }
    }
}

/// d f(u) / du for a single-argument function
fn unary_derivative(function: Function, u: &Expr) -> Expr {
    let u = || u.clone();
    let one = || Expr::Constant(1.0);
    let apply = |f: Function| Expr::unary(f, u());
    let square = |e: Expr| Expr::pow(e, Expr::Constant(2.0));
    match function {
        Function::Negate => Expr::Constant(-1.0),
        Function::Sqrt => Expr::div(Expr::Constant(0.5), apply(Function::Sqrt)),
        Function::Exp => apply(Function::Exp),
        Function::Log => Expr::div(one(), u()),
        Function::Sin => apply(Function::Cos),
        Function::Cos => Expr::neg(apply(Function::Sin)),
        Function::Sec => Expr::mul(apply(Function::Sec), apply(Function::Tan)),
        Function::Csc => Expr::neg(Expr::mul(apply(Function::Csc), apply(Function::Cot))),
        Function::Tan => square(apply(Function::Sec)),
        Function::Cot => Expr::neg(square(apply(Function::Csc))),
        Function::Asin => Expr::div(
            one(),
            Expr::unary(Function::Sqrt, Expr::sub(one(), square(u()))),
        ),
        Function::Acos => Expr::div(
            Expr::Constant(-1.0),
            Expr::unary(Function::Sqrt, Expr::sub(one(), square(u()))),
        ),
        Function::Atan => Expr::div(one(), Expr::add(one(), square(u()))),
        Function::Sinh => apply(Function::Cosh),
        Function::Cosh => apply(Function::Sinh),
        Function::Tanh => Expr::sub(one(), square(apply(Function::Tanh))),
        Function::Erf | Function::Erfc => {
            let sign = if function == Function::Erf { 1.0 } else { -1.0 };
            Expr::mul(
                Expr::Constant(sign * 2.0 / PI.sqrt()),
                Expr::unary(Function::Exp, Expr::neg(square(u()))),
            )
        }
        // 2 step(u) - 1
        Function::Abs => Expr::sub(
            Expr::mul(Expr::Constant(2.0), apply(Function::Step)),
            one(),
        ),
        Function::Step | Function::Delta => Expr::Constant(0.0),
    }
}

fn binary_derivative(operator: Operator, a: &Expr, b: &Expr, slot: usize) -> Expr {
    let da = a.differentiate(slot);
    let db = b.differentiate(slot);
    match operator {
        Operator::Add => Expr::add(da, db),
        Operator::Subtract => Expr::sub(da, db),
        // a'b + ab'
        Operator::Multiply => Expr::add(Expr::mul(da, b.clone()), Expr::mul(a.clone(), db)),
        // (a'b - ab') / b²
        Operator::Divide => Expr::div(
            Expr::sub(Expr::mul(da, b.clone()), Expr::mul(a.clone(), db)),
            Expr::pow(b.clone(), Expr::Constant(2.0)),
        ),
        // b a^(b-1) a' + log(a) a^b b'
        //
        // The log term vanishes when the exponent does not depend on `slot`,
        // so a zero or negative base stays finite.
        Operator::Power => Expr::add(
            Expr::mul(
                Expr::mul(
                    b.clone(),
                    Expr::pow(a.clone(), Expr::sub(b.clone(), Expr::Constant(1.0))),
                ),
                da,
            ),
            Expr::mul(
                Expr::mul(
                    Expr::unary(Function::Log, a.clone()),
                    Expr::pow(a.clone(), b.clone()),
                ),
                db,
            ),
        ),
        // b' where a >= b, otherwise a'
        Operator::Min => {
            let take_b = Expr::unary(Function::Step, Expr::sub(a.clone(), b.clone()));
            select(take_b, db, da)
        }
        // a' where a >= b, otherwise b'
        Operator::Max => {
            let take_a = Expr::unary(Function::Step, Expr::sub(a.clone(), b.clone()));
            select(take_a, da, db)
        }
    }
}

/// `mask * if_one + (1 - mask) * if_zero` for a mask that is either 0 or 1
fn select(mask: Expr, if_one: Expr, if_zero: Expr) -> Expr {
    let inverse = Expr::sub(Expr::Constant(1.0), mask.clone());
    Expr::add(Expr::mul(mask, if_one), Expr::mul(inverse, if_zero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabulated::TabulatedFunction;
    use approx::assert_relative_eq;

    fn x() -> Expr {
        Expr::Variable(0)
    }

    /// Compare symbolic derivative with a central difference at `at`
    fn check(e: &Expr, at: f64, functions: &[TabulatedFunction]) {
        const H: f64 = 1e-6;
        let d = e.differentiate(0).evaluate(&[at, 0.7], functions);
        let numeric = (e.evaluate(&[at + H, 0.7], functions) - e.evaluate(&[at - H, 0.7], functions))
            / (2.0 * H);
        assert_relative_eq!(d, numeric, epsilon = 1e-6, max_relative = 1e-6);
    }

    #[test]
    fn test_unary_functions() {
        use Function::*;
        for function in [
            Negate, Sqrt, Exp, Log, Sin, Cos, Sec, Csc, Tan, Cot, Asin, Acos, Atan, Sinh, Cosh,
            Tanh, Erf, Erfc, Abs,
        ] {
            let e = Expr::unary(function, Expr::mul(x(), Expr::Constant(0.9)));
            check(&e, 0.4, &[]);
            check(&e, 0.8, &[]);
        }
        assert!(Expr::unary(Step, x()).differentiate(0).is_zero());
        assert!(Expr::unary(Delta, x()).differentiate(0).is_zero());
    }

    #[test]
    fn test_binary_operators() {
        let y = Expr::Variable(1);
        for operator in [
            Operator::Add,
            Operator::Subtract,
            Operator::Multiply,
            Operator::Divide,
            Operator::Power,
            Operator::Min,
            Operator::Max,
        ] {
            let e = Expr::binary(operator, Expr::unary(Function::Sin, x()), y.clone());
            check(&e, 0.3, &[]);
            check(&e, 1.2, &[]);
            // variable exponent
            let e = Expr::binary(operator, y.clone(), x());
            check(&e, 0.3, &[]);
            check(&e, 1.2, &[]);
        }
    }

    #[test]
    fn test_variable_exponent_at_zero_and_negative_base() {
        // x^y with the exponent in slot 1
        let e = Expr::pow(x(), Expr::Variable(1));
        let d = e.differentiate(0);
        assert_eq!(d.evaluate(&[0.0, 2.0], &[]), 0.0);
        assert_relative_eq!(d.evaluate(&[0.0, 1.0], &[]), 1.0);
        assert_relative_eq!(d.evaluate(&[-1.5, 3.0], &[]), 6.75);
        assert_relative_eq!(d.evaluate(&[-2.0, 2.0], &[]), -4.0);

        // (x - 1)^y at x = 1
        let e = Expr::pow(Expr::sub(x(), Expr::Constant(1.0)), Expr::Variable(1));
        let d = e.differentiate(0);
        assert_eq!(d.evaluate(&[1.0, 2.0], &[]), 0.0);
        assert!(d.evaluate(&[1.0, 3.0], &[]).is_finite());
    }

    #[test]
    fn test_min_max_at_ties() {
        // d/dx min(x, y) and max(x, y) with x == y
        let y = Expr::Variable(1);
        let min = Expr::binary(Operator::Min, x(), y.clone()).differentiate(0);
        let max = Expr::binary(Operator::Max, x(), y.clone()).differentiate(0);
        assert_eq!(min.evaluate(&[0.5, 0.5], &[]), 0.0);
        assert_eq!(max.evaluate(&[0.5, 0.5], &[]), 1.0);
        // away from the tie
        assert_eq!(min.evaluate(&[0.4, 0.5], &[]), 1.0);
        assert_eq!(min.evaluate(&[0.6, 0.5], &[]), 0.0);
        assert_eq!(max.evaluate(&[0.4, 0.5], &[]), 0.0);
        assert_eq!(max.evaluate(&[0.6, 0.5], &[]), 1.0);
        // the derivatives with respect to both arguments add up to one
        let min_y = Expr::binary(Operator::Min, x(), y).differentiate(1);
        assert_eq!(min.evaluate(&[0.5, 0.5], &[]) + min_y.evaluate(&[0.5, 0.5], &[]), 1.0);
    }

    #[test]
    fn test_polynomial_is_simplified() {
        // d/dx x^2 = 2 x^1 -> 2 * x
        let e = Expr::pow(x(), Expr::Constant(2.0));
        assert_eq!(e.differentiate(0), Expr::mul(Expr::Constant(2.0), x()));
        assert!(e.differentiate(1).is_zero());
        let e = Expr::mul(Expr::Constant(3.0), e);
        assert_relative_eq!(e.differentiate(0).evaluate(&[2.0], &[]), 12.0);
    }

    #[test]
    fn test_tabulated() {
        let values: Vec<f64> = (0..20).map(|i| (i as f64 * 0.1).sin()).collect();
        let functions = [TabulatedFunction::new("f", &values, 0.0, 1.9).unwrap()];
        let e = Expr::Tabulated {
            function: 0,
            order: 0,
            argument: Box::new(Expr::mul(x(), x())),
        };
        check(&e, 0.9, &functions);
        let d = e.differentiate(0);
        check(&d, 0.9, &functions);
    }
}
