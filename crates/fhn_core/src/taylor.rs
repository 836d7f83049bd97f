//! Truncated Taylor series ("jets") and the normalised Taylor coefficients of
//! solutions of an autonomous vector field.
//!
//! A jet stores `c_0 + c_1 t + ... + c_{n-1} t^{n-1}`. Missing trailing
//! coefficients are zero, which lets constants stay length one while they mix
//! with longer series.

use crate::interval::Interval;
use crate::traits::Arith;
use crate::vector_field::VectorField;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, PartialEq)]
pub struct Jet<S> {
    coeffs: Vec<S>,
}

impl<S: Arith> Jet<S> {
    pub fn new(coeffs: Vec<S>) -> Self {
        Self { coeffs }
    }

    pub fn constant_of(value: S) -> Self {
        Self {
            coeffs: vec![value],
        }
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeff(&self, k: usize) -> S {
        self.coeffs
            .get(k)
            .cloned()
            .unwrap_or_else(|| S::constant(0.0))
    }

    pub fn coeffs(&self) -> &[S] {
        &self.coeffs
    }
}

impl<S: Arith> Add for Jet<S> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let n = self.len().max(rhs.len());
        let coeffs = (0..n)
            .map(|k| match (self.coeffs.get(k), rhs.coeffs.get(k)) {
                (Some(a), Some(b)) => a.clone() + b.clone(),
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => S::constant(0.0),
            })
            .collect();
        Self { coeffs }
    }
}

impl<S: Arith> Sub for Jet<S> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl<S: Arith> Neg for Jet<S> {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            coeffs: self.coeffs.into_iter().map(|c| -c).collect(),
        }
    }
}

impl<S: Arith> Mul for Jet<S> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let (la, lb) = (self.len(), rhs.len());
        if la == 0 || lb == 0 {
            return Self { coeffs: Vec::new() };
        }
        let n = la.max(lb);
        let coeffs = (0..n)
            .map(|k| {
                let lo = k.saturating_sub(lb - 1);
                let hi = k.min(la - 1);
                let mut terms = (lo..=hi).map(|j| self.coeffs[j].clone() * rhs.coeffs[k - j].clone());
                match terms.next() {
                    Some(first) => terms.fold(first, |acc, term| acc + term),
                    None => S::constant(0.0),
                }
            })
            .collect();
        Self { coeffs }
    }
}

impl<S: Arith> Div for Jet<S> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let n = self.len().max(rhs.len());
        let b0 = rhs.coeff(0);
        let mut q: Vec<S> = Vec::with_capacity(n);
        for k in 0..n {
            let mut acc = self.coeff(k);
            for j in 0..k {
                if k - j < rhs.len() {
                    acc = acc - q[j].clone() * rhs.coeffs[k - j].clone();
                }
            }
            q.push(acc / b0.clone());
        }
        Self { coeffs: q }
    }
}

fn scaled_sum<S: Arith>(u: &[S], other: &[S], k: usize) -> S {
    // (1/k) * sum_{j=1..k} j u_j other_{k-j}
    let mut acc = S::constant(0.0);
    for j in 1..=k.min(u.len().saturating_sub(1)) {
        acc = acc + S::constant(j as f64) * u[j].clone() * other[k - j].clone();
    }
    acc / S::constant(k as f64)
}

impl<S: Arith> Jet<S> {
    fn sin_cos(self) -> (Self, Self) {
        let n = self.len();
        let u0 = self.coeff(0);
        let mut s = vec![u0.clone().sin()];
        let mut c = vec![u0.cos()];
        for k in 1..n {
            let next_s = scaled_sum(&self.coeffs, &c, k);
            let next_c = -scaled_sum(&self.coeffs, &s, k);
            s.push(next_s);
            c.push(next_c);
        }
        (Self { coeffs: s }, Self { coeffs: c })
    }
}

impl<S: Arith> Arith for Jet<S> {
    fn constant(value: f64) -> Self {
        Self::constant_of(S::constant(value))
    }

    fn inexact(value: f64) -> Self {
        Self::constant_of(S::inexact(value))
    }

    fn parameter(value: Interval) -> Self {
        Self::constant_of(S::parameter(value))
    }

    fn exp(self) -> Self {
        let n = self.len();
        let mut e = vec![self.coeff(0).exp()];
        for k in 1..n {
            let next = scaled_sum(&self.coeffs, &e, k);
            e.push(next);
        }
        Self { coeffs: e }
    }

    fn sin(self) -> Self {
        self.sin_cos().0
    }

    fn cos(self) -> Self {
        self.sin_cos().1
    }
}

/// Normalised Taylor coefficients `a_0 .. a_order` of the solution of
/// `x' = f(x)` through `x0`, so that `x(t) = sum a_k t^k`.
///
/// Built by the usual recursion `a_{k+1} = f(x)_k / (k + 1)`, evaluating the
/// field on jets of growing length.
pub fn taylor_coefficients<S: Arith>(field: &VectorField, x0: &[S; 3], order: usize) -> Vec<[S; 3]> {
    let mut series: [Vec<S>; 3] = [vec![x0[0].clone()], vec![x0[1].clone()], vec![x0[2].clone()]];
    let mut rhs = [
        Jet::constant(0.0),
        Jet::constant(0.0),
        Jet::constant(0.0),
    ];
    for k in 0..order {
        let x = [
            Jet::new(series[0].clone()),
            Jet::new(series[1].clone()),
            Jet::new(series[2].clone()),
        ];
        field.eval(&x, &mut rhs);
        let divisor = S::constant((k + 1) as f64);
        for i in 0..3 {
            series[i].push(rhs[i].coeff(k) / divisor.clone());
        }
    }
    (0..=order)
        .map(|k| {
            [
                series[0][k].clone(),
                series[1][k].clone(),
                series[2][k].clone(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factorial(k: usize) -> f64 {
        (1..=k).map(|i| i as f64).product()
    }

    #[test]
    fn exp_jet_has_inverse_factorial_coefficients() {
        let t = Jet::new(vec![Interval::point(0.0), Interval::point(1.0), Interval::point(0.0), Interval::point(0.0), Interval::point(0.0), Interval::point(0.0)]);
        let e = t.exp();
        for k in 0..6 {
            assert!(e.coeff(k).contains(1.0 / factorial(k)), "coefficient {k}");
            assert!(e.coeff(k).width() < 1e-14);
        }
    }

    #[test]
    fn sin_and_cos_jets_match_series() {
        let t = Jet::new(vec![0.0, 1.0, 0.0, 0.0, 0.0]);
        let s = t.clone().sin();
        let c = t.cos();
        let expected_sin = [0.0, 1.0, 0.0, -1.0 / 6.0, 0.0];
        let expected_cos = [1.0, 0.0, -0.5, 0.0, 1.0 / 24.0];
        for k in 0..5 {
            assert!((s.coeff(k) - expected_sin[k]).abs() < 1e-15);
            assert!((c.coeff(k) - expected_cos[k]).abs() < 1e-15);
        }
    }

    #[test]
    fn division_inverts_multiplication() {
        let a = Jet::new(vec![1.0, 2.0, 3.0]);
        let b = Jet::new(vec![2.0, -1.0, 0.5]);
        let q = (a.clone() * b.clone()) / b;
        for k in 0..3 {
            assert!((q.coeff(k) - a.coeff(k)).abs() < 1e-12);
        }
    }

    #[test]
    fn coefficients_of_linear_flow() {
        let field = VectorField::parse("var:x,y,z;fun:-x,y,1;").expect("definition parses");
        let coeffs = taylor_coefficients(&field, &[1.0, 2.0, 0.0], 4);
        for (k, a) in coeffs.iter().enumerate() {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            assert!((a[0] - sign / factorial(k)).abs() < 1e-14);
            assert!((a[1] - 2.0 / factorial(k)).abs() < 1e-14);
        }
        assert!((coeffs[1][2] - 1.0).abs() < 1e-15);
        assert!(coeffs[2][2].abs() < 1e-15);
    }
}
