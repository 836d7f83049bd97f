use crate::interval::Interval;
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Numeric types the equation VM can evaluate over: plain `f64`, dual numbers,
/// intervals, interval gradients and Taylor jets over any of those.
pub trait Arith:
    Clone
    + Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// An exactly representable constant.
    fn constant(value: f64) -> Self;

    /// A literal that is only approximately representable (e.g. `0.1`).
    /// Rigorous types widen it to an enclosure.
    fn inexact(value: f64) -> Self {
        Self::constant(value)
    }

    /// A model parameter. Point types use the midpoint.
    fn parameter(value: Interval) -> Self;

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::constant(1.0);
        }
        let base = if n < 0 {
            Self::constant(1.0) / self
        } else {
            self
        };
        let mut result = base.clone();
        for _ in 1..n.unsigned_abs() {
            result = result * base.clone();
        }
        result
    }

    fn exp(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
}

impl Arith for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn parameter(value: Interval) -> Self {
        value.mid()
    }

    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }
}

/// Represents a continuous-time dynamical system.
pub trait DynamicalSystem<T: Arith> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Arith> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

impl<T: Arith, S: DynamicalSystem<T> + ?Sized> DynamicalSystem<T> for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        (**self).apply(t, x, out)
    }
}
