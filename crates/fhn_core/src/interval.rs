//! Outward-rounded interval arithmetic and the small fixed-size interval
//! vectors and matrices used throughout the proofs.
//!
//! Every floating-point result is pushed one ulp outward in each direction, so
//! the returned interval encloses the exact real result of the operation on any
//! pair of points drawn from the operands. Library transcendental functions are
//! not correctly rounded, so `exp`, `sin` and `cos` widen by two ulps.

use crate::traits::Arith;
use nalgebra::{Matrix3, Vector3};
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

pub type IVector = Vector3<Interval>;
pub type IMatrix = Matrix3<Interval>;

/// Smallest double strictly greater than `x`.
pub fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Largest double strictly smaller than `x`.
pub fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// A closed interval `[lo, hi]` of reals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lo: f64,
    hi: f64,
}

impl Interval {
    pub const ENTIRE: Interval = Interval {
        lo: f64::NEG_INFINITY,
        hi: f64::INFINITY,
    };

    /// Builds `[lo, hi]`. The bounds are taken as given; callers pass ordered bounds.
    pub fn new(lo: f64, hi: f64) -> Self {
        debug_assert!(!(lo > hi), "interval bounds out of order: [{lo}, {hi}]");
        Self { lo, hi }
    }

    pub fn point(x: f64) -> Self {
        Self { lo: x, hi: x }
    }

    /// `[-r, r]`.
    pub fn symmetric(radius: f64) -> Self {
        let r = radius.abs();
        Self { lo: -r, hi: r }
    }

    /// The smallest interval containing the decimal literal closest to `x`.
    pub fn enclosing(x: f64) -> Self {
        Self {
            lo: next_down(x),
            hi: next_up(x),
        }
    }

    /// `[i, i + 1] / n`, the i-th of n equal pieces of `[0, 1]`.
    pub fn subinterval(i: usize, n: usize) -> Self {
        let n = n.max(1) as f64;
        Self::new(i as f64, (i + 1) as f64) / Self::point(n)
    }

    fn rounded(lo: f64, hi: f64) -> Self {
        Self {
            lo: next_down(lo),
            hi: next_up(hi),
        }
    }

    fn rounded_twice(lo: f64, hi: f64) -> Self {
        Self {
            lo: next_down(next_down(lo)),
            hi: next_up(next_up(hi)),
        }
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// Left bound as a degenerate interval.
    pub fn lower(&self) -> Self {
        Self::point(self.lo)
    }

    pub fn upper(&self) -> Self {
        Self::point(self.hi)
    }

    pub fn mid(&self) -> f64 {
        if self.lo == f64::NEG_INFINITY || self.hi == f64::INFINITY {
            if self.lo == f64::NEG_INFINITY && self.hi == f64::INFINITY {
                return 0.0;
            }
            return if self.lo == f64::NEG_INFINITY {
                self.hi
            } else {
                self.lo
            };
        }
        0.5 * self.lo + 0.5 * self.hi
    }

    pub fn width(&self) -> f64 {
        next_up(self.hi - self.lo)
    }

    /// Largest absolute value in the interval.
    pub fn mag(&self) -> f64 {
        self.lo.abs().max(self.hi.abs())
    }

    /// Smallest absolute value in the interval.
    pub fn mig(&self) -> f64 {
        if self.contains_zero() {
            0.0
        } else {
            self.lo.abs().min(self.hi.abs())
        }
    }

    pub fn is_point(&self) -> bool {
        self.lo == self.hi
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lo <= x && x <= self.hi
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0.0)
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        self.lo <= other.lo && other.hi <= self.hi
    }

    /// `self` lies in the interior of `other`.
    pub fn subset_interior(&self, other: &Interval) -> bool {
        other.lo < self.lo && self.hi < other.hi
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        (lo <= hi).then_some(Self { lo, hi })
    }

    pub fn hull(&self, other: &Interval) -> Self {
        Self {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    /// Every point of `self` is strictly below every point of `other`.
    pub fn lt(&self, other: &Interval) -> bool {
        self.hi < other.lo
    }

    pub fn gt(&self, other: &Interval) -> bool {
        self.lo > other.hi
    }

    pub fn certainly_positive(&self) -> bool {
        self.lo > 0.0
    }

    pub fn certainly_negative(&self) -> bool {
        self.hi < 0.0
    }

    /// Grows the interval by `amount` on both sides.
    pub fn inflate(&self, amount: f64) -> Self {
        Self::rounded(self.lo - amount, self.hi + amount)
    }

    pub fn sqr(self) -> Self {
        let low = self.mig();
        let high = self.mag();
        let squares = Self::point(low) * Self::point(low);
        let top = Self::point(high) * Self::point(high);
        Self {
            lo: squares.lo.max(0.0),
            hi: top.hi,
        }
    }

    pub fn abs(self) -> Self {
        Self {
            lo: self.mig(),
            hi: self.mag(),
        }
    }

    fn pow_unsigned(self, n: u32) -> Self {
        if n == 0 {
            return Self::one();
        }
        if n % 2 == 0 {
            // even powers are monotone in |x|
            let low = repeat_mul(Self::point(self.mig()), n);
            let high = repeat_mul(Self::point(self.mag()), n);
            return Self {
                lo: low.lo.max(0.0),
                hi: high.hi,
            };
        }
        let low = repeat_mul(Self::point(self.lo), n);
        let high = repeat_mul(Self::point(self.hi), n);
        Self {
            lo: low.lo,
            hi: high.hi,
        }
    }

    fn trig(self, f: fn(f64) -> f64, max_phase: f64, min_phase: f64) -> Self {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.hi - self.lo >= TAU {
            return Self::new(-1.0, 1.0);
        }
        let a = f(self.lo);
        let b = f(self.hi);
        let mut out = Self::rounded_twice(a.min(b), a.max(b));
        if hits_phase(&self, max_phase) {
            out.hi = 1.0;
        }
        if hits_phase(&self, min_phase) {
            out.lo = -1.0;
        }
        Self {
            lo: out.lo.max(-1.0),
            hi: out.hi.min(1.0),
        }
    }
}

fn repeat_mul(x: Interval, n: u32) -> Interval {
    let mut acc = x;
    for _ in 1..n {
        acc = acc * x;
    }
    acc
}

/// Whether `interval` may contain a point `phase + 2k pi`. Errs towards `true`
/// near the boundary so the extremum is never missed.
fn hits_phase(interval: &Interval, phase: f64) -> bool {
    let slack = 1e-12 * (1.0 + interval.mag());
    let k = ((interval.lo - slack - phase) / TAU).ceil();
    phase + k * TAU <= interval.hi + slack
}

impl Default for Interval {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<f64> for Interval {
    fn from(value: f64) -> Self {
        Self::point(value)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:e}, {:e}]", self.lo, self.hi)
    }
}

impl Zero for Interval {
    fn zero() -> Self {
        Self::point(0.0)
    }

    fn is_zero(&self) -> bool {
        self.lo == 0.0 && self.hi == 0.0
    }
}

impl One for Interval {
    fn one() -> Self {
        Self::point(1.0)
    }
}

impl Add for Interval {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::rounded(self.lo + rhs.lo, self.hi + rhs.hi)
    }
}

impl Sub for Interval {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::rounded(self.lo - rhs.hi, self.hi - rhs.lo)
    }
}

impl Mul for Interval {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let products = [
            self.lo * rhs.lo,
            self.lo * rhs.hi,
            self.hi * rhs.lo,
            self.hi * rhs.hi,
        ];
        // f64::min/max skip the NaN of 0 * inf
        let lo = products.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self::rounded(lo, hi)
    }
}

impl Div for Interval {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        if rhs.contains_zero() {
            return Self::ENTIRE;
        }
        let quotients = [
            self.lo / rhs.lo,
            self.lo / rhs.hi,
            self.hi / rhs.lo,
            self.hi / rhs.hi,
        ];
        let lo = quotients.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = quotients.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self::rounded(lo, hi)
    }
}

impl Neg for Interval {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            lo: -self.hi,
            hi: -self.lo,
        }
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Interval {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl DivAssign for Interval {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl Arith for Interval {
    fn constant(value: f64) -> Self {
        Self::point(value)
    }

    fn inexact(value: f64) -> Self {
        Self::enclosing(value)
    }

    fn parameter(value: Interval) -> Self {
        value
    }

    fn powi(self, n: i32) -> Self {
        let positive = self.pow_unsigned(n.unsigned_abs());
        if n < 0 {
            Self::one() / positive
        } else {
            positive
        }
    }

    fn exp(self) -> Self {
        let out = Self::rounded_twice(self.lo.exp(), self.hi.exp());
        Self {
            lo: out.lo.max(0.0),
            hi: out.hi,
        }
    }

    fn sin(self) -> Self {
        self.trig(f64::sin, FRAC_PI_2, -FRAC_PI_2)
    }

    fn cos(self) -> Self {
        self.trig(f64::cos, 0.0, PI)
    }
}

/// `(b - a) t + a`, evaluated in interval arithmetic.
pub fn lerp(a: Interval, b: Interval, t: Interval) -> Interval {
    (b - a) * t + a
}

pub fn lerp_vector(a: &IVector, b: &IVector, t: Interval) -> IVector {
    a.zip_map(b, |x, y| lerp(x, y, t))
}

pub fn lift(v: &Vector3<f64>) -> IVector {
    v.map(Interval::point)
}

pub fn lift_matrix(m: &Matrix3<f64>) -> IMatrix {
    m.map(Interval::point)
}

pub fn midpoint(v: &IVector) -> Vector3<f64> {
    v.map(|x| x.mid())
}

pub fn midpoint_matrix(m: &IMatrix) -> Matrix3<f64> {
    m.map(|x| x.mid())
}

pub fn hull_vector(a: &IVector, b: &IVector) -> IVector {
    a.zip_map(b, |x, y| x.hull(&y))
}

pub fn dot(a: &IVector, b: &IVector) -> Interval {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Componentwise `a ⊂ int b`.
pub fn vector_subset_interior(a: &IVector, b: &IVector) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.subset_interior(y))
}

fn cofactor(m: &IMatrix, row: usize, col: usize) -> Interval {
    let (r1, r2) = ((row + 1) % 3, (row + 2) % 3);
    let (c1, c2) = ((col + 1) % 3, (col + 2) % 3);
    m[(r1, c1)] * m[(r2, c2)] - m[(r1, c2)] * m[(r2, c1)]
}

pub fn determinant(m: &IMatrix) -> Interval {
    (0..3).fold(Interval::zero(), |acc, j| acc + m[(0, j)] * cofactor(m, 0, j))
}

/// Enclosure of the inverse of every matrix in `m`, by adjugate over
/// determinant. `None` when the determinant may vanish.
pub fn inverse(m: &IMatrix) -> Option<IMatrix> {
    let det = determinant(m);
    if det.contains_zero() {
        return None;
    }
    let mut inv = IMatrix::zeros();
    for i in 0..3 {
        for j in 0..3 {
            inv[(j, i)] = cofactor(m, i, j) / det;
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_encloses_point_results() {
        let a = Interval::new(1.0, 2.0);
        let b = Interval::new(-3.0, 0.5);
        let sum = a + b;
        assert!(sum.contains(-2.0) && sum.contains(2.5));
        let product = a * b;
        assert!(product.contains(-6.0) && product.contains(1.0));
        assert!(product.lo() <= -6.0 && product.hi() >= 1.0);
        let third = Interval::point(1.0) / Interval::point(3.0);
        assert!(third.contains(1.0 / 3.0));
        assert!(third.width() < 1e-15);
    }

    #[test]
    fn division_by_zero_straddling_interval_is_entire() {
        let q = Interval::point(1.0) / Interval::new(-1.0, 1.0);
        assert_eq!(q, Interval::ENTIRE);
    }

    #[test]
    fn even_powers_are_tight_around_zero() {
        let x = Interval::new(-2.0, 1.0);
        let squared = x.powi(2);
        assert!(squared.lo() >= 0.0);
        assert!((squared.hi() - 4.0).abs() < 1e-14);
        let cubed = x.powi(3);
        assert!(cubed.contains(-8.0) && cubed.contains(1.0));
        assert!(x.sqr().contains_interval(&Interval::new(0.0, 4.0)));
    }

    #[test]
    fn transcendental_functions_detect_extrema() {
        let s = Interval::new(1.0, 2.0).sin();
        assert_eq!(s.hi(), 1.0);
        assert!(s.contains(1.0_f64.sin()));
        let c = Interval::new(3.0, 3.5).cos();
        assert_eq!(c.lo(), -1.0);
        let e = Interval::new(0.0, 1.0).exp();
        assert!(e.contains(1.0) && e.contains(std::f64::consts::E));
    }

    #[test]
    fn subintervals_cover_unit_interval() {
        let n = 7;
        for i in 0..n {
            let piece = Interval::subinterval(i, n);
            assert!(piece.contains(i as f64 / n as f64));
            assert!(piece.contains((i + 1) as f64 / n as f64));
        }
    }

    #[test]
    fn strict_comparisons() {
        let a = Interval::new(0.0, 1.0);
        let b = Interval::new(1.5, 2.0);
        assert!(a.lt(&b));
        assert!(b.gt(&a));
        assert!(!a.lt(&Interval::new(1.0, 2.0)));
        assert!(Interval::new(0.2, 0.3).subset_interior(&a));
        assert!(!a.subset_interior(&a));
    }

    #[test]
    fn inverse_encloses_exact_inverse() {
        let m = lift_matrix(&Matrix3::new(2.0, 1.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0));
        let inv = inverse(&m).expect("matrix is invertible");
        let exact = Matrix3::new(0.5, -1.0 / 6.0, 0.0, 0.0, 1.0 / 3.0, 0.0, 0.0, 0.0, 1.0);
        for i in 0..3 {
            for j in 0..3 {
                assert!(inv[(i, j)].contains(exact[(i, j)]), "entry ({i}, {j})");
            }
        }
        let singular = lift_matrix(&Matrix3::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0, 0.0, 0.0, 1.0));
        assert!(inverse(&singular).is_none());
    }
}
