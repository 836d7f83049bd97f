use crate::interval::Interval;
use crate::traits::{Arith, DynamicalSystem};
use num_traits::Zero;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Simple Dual Number for Forward Mode AD
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let val = self.val / rhs.val;
        Self::new(val, (self.eps - val * rhs.eps) / rhs.val)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Arith for Dual {
    fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    fn parameter(value: Interval) -> Self {
        Self::new(value.mid(), 0.0)
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::constant(1.0);
        }
        Self::new(
            self.val.powi(n),
            n as f64 * self.val.powi(n - 1) * self.eps,
        )
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        Self::new(e, e * self.eps)
    }

    fn sin(self) -> Self {
        Self::new(self.val.sin(), self.val.cos() * self.eps)
    }

    fn cos(self) -> Self {
        Self::new(self.val.cos(), -self.val.sin() * self.eps)
    }
}

/// Interval value together with an interval enclosure of its gradient with
/// respect to `N` seed variables. Evaluating a field on `Grad<3>` seeded over a
/// box yields an enclosure of the Jacobian over that box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grad<const N: usize> {
    pub val: Interval,
    pub grad: [Interval; N],
}

impl<const N: usize> Grad<N> {
    pub fn new(val: Interval, grad: [Interval; N]) -> Self {
        Self { val, grad }
    }

    /// The `index`-th seed variable ranging over `val`.
    pub fn variable(val: Interval, index: usize) -> Self {
        let mut grad = [Interval::zero(); N];
        grad[index] = Interval::point(1.0);
        Self { val, grad }
    }

    fn scaled(&self, factor: Interval) -> [Interval; N] {
        let mut grad = self.grad;
        for g in grad.iter_mut() {
            *g = *g * factor;
        }
        grad
    }
}

impl<const N: usize> Add for Grad<N> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let mut grad = self.grad;
        for (g, r) in grad.iter_mut().zip(rhs.grad) {
            *g = *g + r;
        }
        Self::new(self.val + rhs.val, grad)
    }
}

impl<const N: usize> Sub for Grad<N> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        let mut grad = self.grad;
        for (g, r) in grad.iter_mut().zip(rhs.grad) {
            *g = *g - r;
        }
        Self::new(self.val - rhs.val, grad)
    }
}

impl<const N: usize> Mul for Grad<N> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let mut grad = [Interval::zero(); N];
        for i in 0..N {
            grad[i] = self.val * rhs.grad[i] + rhs.val * self.grad[i];
        }
        Self::new(self.val * rhs.val, grad)
    }
}

impl<const N: usize> Div for Grad<N> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let val = self.val / rhs.val;
        let mut grad = [Interval::zero(); N];
        for i in 0..N {
            grad[i] = (self.grad[i] - val * rhs.grad[i]) / rhs.val;
        }
        Self::new(val, grad)
    }
}

impl<const N: usize> Neg for Grad<N> {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, self.grad.map(|g| -g))
    }
}

impl<const N: usize> Arith for Grad<N> {
    fn constant(value: f64) -> Self {
        Self::new(Interval::point(value), [Interval::zero(); N])
    }

    fn inexact(value: f64) -> Self {
        Self::new(Interval::enclosing(value), [Interval::zero(); N])
    }

    fn parameter(value: Interval) -> Self {
        Self::new(value, [Interval::zero(); N])
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::constant(1.0);
        }
        let derivative = Interval::point(n as f64) * Arith::powi(self.val, n - 1);
        Self::new(Arith::powi(self.val, n), self.scaled(derivative))
    }

    fn exp(self) -> Self {
        let e = Arith::exp(self.val);
        Self::new(e, self.scaled(e))
    }

    fn sin(self) -> Self {
        Self::new(Arith::sin(self.val), self.scaled(Arith::cos(self.val)))
    }

    fn cos(self) -> Self {
        Self::new(Arith::cos(self.val), self.scaled(-Arith::sin(self.val)))
    }
}

// --- Tangent System Wrapper ---

/// Augments a flow with its variational equation `Phi' = J(x) Phi`.
/// The state is `[x, Phi]` with `Phi` flattened row-major.
pub struct TangentSystem<S> {
    pub inner: S,
    pub dimension: usize,
}

impl<S> TangentSystem<S> {
    pub fn new(inner: S, dim: usize) -> Self {
        Self {
            inner,
            dimension: dim,
        }
    }

    /// `[x0, I]`, the initial condition of the variational problem.
    pub fn initial_state(&self, x0: &[f64]) -> Vec<f64> {
        let n = self.dimension;
        let mut state = vec![0.0; n + n * n];
        state[..n].copy_from_slice(&x0[..n]);
        for i in 0..n {
            state[n + i * n + i] = 1.0;
        }
        state
    }
}

impl<S> DynamicalSystem<f64> for TangentSystem<S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    fn dimension(&self) -> usize {
        let n = self.dimension;
        n + n * n
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.dimension;

        self.inner.apply(t, &x[0..n], &mut out[0..n]);

        // Column j of J(x) is the eps part of f(x + eps e_j).
        let mut jacobian = vec![0.0; n * n];
        let mut dual_x = vec![Dual::new(0.0, 0.0); n];
        let mut dual_out = vec![Dual::new(0.0, 0.0); n];
        let t_dual = Dual::new(t, 0.0);

        for j in 0..n {
            for i in 0..n {
                dual_x[i] = Dual::new(x[i], if i == j { 1.0 } else { 0.0 });
            }

            self.inner.apply(t_dual, &dual_x, &mut dual_out);

            for i in 0..n {
                jacobian[i * n + j] = dual_out[i].eps;
            }
        }

        // out[n..] = J * Phi
        let phi_start = n;
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += jacobian[i * n + k] * x[phi_start + k * n + j];
                }
                out[phi_start + i * n + j] = sum;
            }
        }
    }
}
