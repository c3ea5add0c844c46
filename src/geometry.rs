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

//! Geometric primitives with closed-form gradients.
//!
//! Each function returns the geometric quantity together with its gradient
//! with respect to every input position. The gradients always sum to zero.
//!
//! Degenerate input (coincident points, collinear angle arms, undefined dihedral
//! planes) never produces NaN: the value is whatever `atan2`/`norm` gives and
//! the gradient falls back to zero. Such regions are physically unstable, not
//! programming errors, and callers observe them through energies and forces.

use crate::Vector3;
use serde::{Deserialize, Serialize};

/// Squared lengths below this are treated as degenerate
const EPSILON_SQUARED: f64 = 1e-24;

/// Value of a geometric quantity and its gradient w.r.t. each of the `N` positions
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry<const N: usize> {
    pub value: f64,
    pub gradient: [Vector3; N],
}

impl<const N: usize> Geometry<N> {
    fn degenerate(value: f64) -> Self {
        Self {
            value,
            gradient: [Vector3::zeros(); N],
        }
    }
}

/// Distance between `a` and `b`, |b - a|
pub fn distance(a: &Vector3, b: &Vector3) -> Geometry<2> {
    let r = b - a;
    let r2 = r.norm_squared();
    if r2 < EPSILON_SQUARED {
        return Geometry::degenerate(r2.sqrt());
    }
    let length = r2.sqrt();
    let unit = r / length;
    Geometry {
        value: length,
        gradient: [-unit, unit],
    }
}

/// Angle at vertex `b` between the arms `a - b` and `c - b` (radians, 0..π)
pub fn angle(a: &Vector3, b: &Vector3, c: &Vector3) -> Geometry<3> {
    let v1 = a - b;
    let v2 = c - b;
    let cross = v1.cross(&v2);
    let sin_term = cross.norm();
    let value = sin_term.atan2(v1.dot(&v2));

    let v1_sq = v1.norm_squared();
    let v2_sq = v2.norm_squared();
    if v1_sq < EPSILON_SQUARED || v2_sq < EPSILON_SQUARED || sin_term.powi(2) < EPSILON_SQUARED {
        return Geometry::degenerate(value);
    }
    // dθ/dv1 = -(c × v1) / (|v1|² |c|) and dθ/dv2 = (c × v2) / (|v2|² |c|) where c = v1 × v2
    let grad_a = -cross.cross(&v1) / (v1_sq * sin_term);
    let grad_c = cross.cross(&v2) / (v2_sq * sin_term);
    Geometry {
        value,
        gradient: [grad_a, -(grad_a + grad_c), grad_c],
    }
}

/// Signed dihedral angle of `a`-`b`-`c`-`d` about the `b`-`c` axis (radians, -π..π)
///
/// Follows the IUPAC convention: cis is zero, trans is ±π, and the angle is
/// positive when `a` must be rotated clockwise (viewed along `b` → `c`) to eclipse `d`.
///
/// ## Further reading
///
/// - Blondel & Karplus, J. Comput. Chem. 17, 1132 (1996)
/// - Bekker, "Molecular dynamics simulation methods revised", PhD thesis (1996)
pub fn dihedral(a: &Vector3, b: &Vector3, c: &Vector3, d: &Vector3) -> Geometry<4> {
    let r_ij = a - b;
    let r_kj = c - b;
    let r_kl = c - d;
    let m = r_ij.cross(&r_kj);
    let n = r_kj.cross(&r_kl);
    let r_kj_norm = r_kj.norm();
    let value = (r_kj_norm * r_ij.dot(&n)).atan2(m.dot(&n));

    let m_sq = m.norm_squared();
    let n_sq = n.norm_squared();
    let r_kj_sq = r_kj_norm * r_kj_norm;
    if m_sq < EPSILON_SQUARED || n_sq < EPSILON_SQUARED || r_kj_sq < EPSILON_SQUARED {
        return Geometry::degenerate(value);
    }
    let grad_a = m * (r_kj_norm / m_sq);
    let grad_d = -n * (r_kj_norm / n_sq);
    let p = r_ij.dot(&r_kj) / r_kj_sq;
    let q = r_kl.dot(&r_kj) / r_kj_sq;
    let grad_b = grad_a * (p - 1.0) - grad_d * q;
    let grad_c = grad_d * (q - 1.0) - grad_a * p;
    Geometry {
        value,
        gradient: [grad_a, grad_b, grad_c, grad_d],
    }
}

/// A geometric quantity referenced by an energy expression.
///
/// Particle entries are zero-based bond roles, i.e. `p1` is `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryTerm {
    Distance([usize; 2]),
    Angle([usize; 3]),
    Dihedral([usize; 4]),
}

impl GeometryTerm {
    /// Bond roles involved in the term
    pub fn roles(&self) -> &[usize] {
        match self {
            Self::Distance(p) => p,
            Self::Angle(p) => p,
            Self::Dihedral(p) => p,
        }
    }

    /// Function name as written in expressions
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Distance(_) => "distance",
            Self::Angle(_) => "angle",
            Self::Dihedral(_) => "dihedral",
        }
    }

    /// Evaluate for the positions of a bond's roles.
    ///
    /// The gradient is written to `gradient[..roles().len()]` and the value is returned.
    pub fn evaluate(&self, positions: &[Vector3], gradient: &mut [Vector3; 4]) -> f64 {
        match *self {
            Self::Distance([i, j]) => {
                let g = distance(&positions[i], &positions[j]);
                gradient[..2].copy_from_slice(&g.gradient);
                g.value
            }
            Self::Angle([i, j, k]) => {
                let g = angle(&positions[i], &positions[j], &positions[k]);
                gradient[..3].copy_from_slice(&g.gradient);
                g.value
            }
            Self::Dihedral([i, j, k, l]) => {
                let g = dihedral(&positions[i], &positions[j], &positions[k], &positions[l]);
                gradient.copy_from_slice(&g.gradient);
                g.value
            }
        }
    }
}

impl std::fmt::Display for GeometryTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roles = self.roles().iter().map(|i| format!("p{}", i + 1));
        write!(f, "{}({})", self.name(), itertools::join(roles, ","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::{FRAC_PI_2, PI};

    /// Central finite difference of `f` w.r.t. each component of each position
    fn numerical_gradient<const N: usize>(
        positions: &[Vector3; N],
        f: impl Fn(&[Vector3; N]) -> f64,
    ) -> [Vector3; N] {
        const H: f64 = 1e-6;
        let mut gradient = [Vector3::zeros(); N];
        for i in 0..N {
            for k in 0..3 {
                let mut plus = *positions;
                let mut minus = *positions;
                plus[i][k] += H;
                minus[i][k] -= H;
                gradient[i][k] = (f(&plus) - f(&minus)) / (2.0 * H);
            }
        }
        gradient
    }

    fn random_positions<const N: usize>(rng: &mut StdRng) -> [Vector3; N] {
        std::array::from_fn(|_| {
            Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
            )
        })
    }

    fn assert_gradients_match<const N: usize>(analytic: &[Vector3; N], numeric: &[Vector3; N]) {
        for (a, n) in analytic.iter().zip(numeric) {
            for k in 0..3 {
                assert_relative_eq!(a[k], n[k], epsilon = 1e-6, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn test_distance() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = Vector3::new(4.0, 6.0, 3.0);
        let g = distance(&a, &b);
        assert_relative_eq!(g.value, 5.0);
        assert_relative_eq!(g.gradient[1], Vector3::new(0.6, 0.8, 0.0));
        assert_relative_eq!(g.gradient[0], -g.gradient[1]);
        assert_relative_eq!(g.gradient[1].norm(), 1.0);
    }

    #[test]
    fn test_coincident_points() {
        let a = Vector3::new(1.0, 1.0, 1.0);
        let g = distance(&a, &a);
        assert_eq!(g.value, 0.0);
        assert!(g.gradient.iter().all(|v| *v == Vector3::zeros()));

        let g = angle(&a, &a, &Vector3::x());
        assert!(g.value.is_finite());
        assert!(g.gradient.iter().all(|v| *v == Vector3::zeros()));
    }

    #[test]
    fn test_angle() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(1.0, 1.0, 0.0);
        assert_relative_eq!(angle(&a, &b, &c).value, FRAC_PI_2);

        // collinear arms: defined value, zero gradient
        let g = angle(&a, &b, &Vector3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(g.value, PI);
        assert!(g.gradient.iter().all(|v| *v == Vector3::zeros()));
        let g = angle(&Vector3::new(3.0, 0.0, 0.0), &b, &Vector3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(g.value, 0.0);
    }

    #[test]
    fn test_dihedral_planar_and_chiral() {
        let b = Vector3::zeros();
        let c = Vector3::new(0.0, 0.0, 1.0);
        let a = Vector3::new(1.0, 0.0, 0.0);
        // cis
        assert_relative_eq!(dihedral(&a, &b, &c, &Vector3::new(1.0, 0.0, 1.0)).value, 0.0);
        // trans
        let trans = dihedral(&a, &b, &c, &Vector3::new(-1.0, 0.0, 1.0)).value;
        assert_relative_eq!(trans.abs(), PI);
        // chiral pair
        let plus = dihedral(&a, &b, &c, &Vector3::new(0.0, 1.0, 1.0)).value;
        let minus = dihedral(&a, &b, &c, &Vector3::new(0.0, -1.0, 1.0)).value;
        assert_relative_eq!(plus, FRAC_PI_2);
        assert_relative_eq!(minus, -FRAC_PI_2);
    }

    #[test]
    fn test_gradients_against_finite_differences() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let p: [Vector3; 2] = random_positions(&mut rng);
            let numeric = numerical_gradient(&p, |p| distance(&p[0], &p[1]).value);
            assert_gradients_match(&distance(&p[0], &p[1]).gradient, &numeric);

            let p: [Vector3; 3] = random_positions(&mut rng);
            let numeric = numerical_gradient(&p, |p| angle(&p[0], &p[1], &p[2]).value);
            assert_gradients_match(&angle(&p[0], &p[1], &p[2]).gradient, &numeric);

            let p: [Vector3; 4] = random_positions(&mut rng);
            let g = dihedral(&p[0], &p[1], &p[2], &p[3]);
            // skip the branch cut at ±π where finite differences wrap around
            if PI - g.value.abs() < 1e-3 {
                continue;
            }
            let numeric = numerical_gradient(&p, |p| dihedral(&p[0], &p[1], &p[2], &p[3]).value);
            assert_gradients_match(&g.gradient, &numeric);
        }
    }

    #[test]
    fn test_gradients_sum_to_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let p: [Vector3; 4] = random_positions(&mut rng);
            let sum: Vector3 = dihedral(&p[0], &p[1], &p[2], &p[3]).gradient.iter().sum();
            assert_relative_eq!(sum, Vector3::zeros(), epsilon = 1e-10);
            let sum: Vector3 = angle(&p[0], &p[1], &p[2]).gradient.iter().sum();
            assert_relative_eq!(sum, Vector3::zeros(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_geometry_term() {
        let positions = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ];
        let mut gradient = [Vector3::zeros(); 4];
        let term = GeometryTerm::Angle([0, 1, 2]);
        assert_relative_eq!(term.evaluate(&positions, &mut gradient), FRAC_PI_2);
        assert_eq!(term.to_string(), "angle(p1,p2,p3)");
        let term = GeometryTerm::Distance([2, 0]);
        assert_relative_eq!(term.evaluate(&positions, &mut gradient), 2f64.sqrt());
        assert_eq!(term.roles(), &[2, 0]);
    }
}
