use crate::traits::{Arith, DynamicalSystem, Steppable};

/// Fixed-step classical RK4 with preallocated stage buffers.
pub struct RK4<T: Arith> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Arith + Copy> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let zeros = vec![T::constant(0.0); dim];
        Self {
            k1: zeros.clone(),
            k2: zeros.clone(),
            k3: zeros.clone(),
            k4: zeros.clone(),
            tmp: zeros,
        }
    }
}

/// `out = state + h * slope`
fn euler_offset<T: Arith + Copy>(out: &mut [T], state: &[T], slope: &[T], h: T) {
    for ((o, &x), &k) in out.iter_mut().zip(state).zip(slope) {
        *o = x + h * k;
    }
}

impl<T: Arith + Copy> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        let half = dt * T::constant(0.5);
        let two = T::constant(2.0);

        system.apply(t0, state, &mut self.k1);
        euler_offset(&mut self.tmp, state, &self.k1, half);
        system.apply(t0 + half, &self.tmp, &mut self.k2);
        euler_offset(&mut self.tmp, state, &self.k2, half);
        system.apply(t0 + half, &self.tmp, &mut self.k3);
        euler_offset(&mut self.tmp, state, &self.k3, dt);
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        let weight = dt * T::inexact(1.0 / 6.0);
        for (i, x) in state.iter_mut().enumerate() {
            *x = *x + weight * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }
        *t = t0 + dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    #[test]
    fn rk4_tracks_exponential_decay() {
        let mut solver = RK4::new(1);
        let mut t = 0.0;
        let mut state = [1.0];
        for _ in 0..100 {
            solver.step(&Decay, &mut t, &mut state, 0.01);
        }
        assert!((t - 1.0).abs() < 1e-12);
        assert!((state[0] - (-1.0_f64).exp()).abs() < 1e-9);
    }
}
