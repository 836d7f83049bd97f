//! Non-rigorous floating point numerics: slow-manifold Newton correction,
//! RK4 section hitting with monodromy, and the fast-subsystem shooting that
//! places the four corner points. Nothing here is part of a proof; results
//! only seed the rigorous checks.

use crate::autodiff::TangentSystem;
use crate::interval::Interval;
use crate::settings::{CornerGuesses, NewtonSettings, ShootingSettings};
use crate::solvers::RK4;
use crate::traits::{DynamicalSystem, Steppable};
use crate::vector_field::{FhnParameters, VectorField};
use anyhow::{bail, Context, Result};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use tracing::debug;

/// Newton iteration in `u` on `f(u, 0, v)[1] = 0`, with `w = 0` and `v` fixed.
pub fn correct_slow_manifold_point(
    field: &VectorField,
    guess: &Vector3<f64>,
    settings: NewtonSettings,
) -> Result<Vector3<f64>> {
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    let mut point = Vector3::new(guess[0], 0.0, guess[2]);
    for _ in 0..settings.max_steps {
        let residual = field.value_at(&point)[1];
        let slope = field.jacobian_at(&point)[(1, 0)];
        if slope == 0.0 || !slope.is_finite() {
            bail!("Vanishing derivative at u = {} during slow-manifold correction.", point[0]);
        }
        let step = settings.damping * residual / slope;
        point[0] -= step;
        if step.abs() <= settings.tolerance * (1.0 + point[0].abs()) {
            return Ok(point);
        }
    }
    bail!(
        "Slow-manifold correction failed to converge in {} steps from u = {}.",
        settings.max_steps,
        guess[0]
    )
}

/// The plane `normal . (x - origin) = 0` in floating point.
#[derive(Debug, Clone, Copy)]
pub struct PlaneSection {
    pub origin: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl PlaneSection {
    pub fn new(origin: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Self { origin, normal }
    }

    /// The coordinate section `x[axis] = value`, with normal `sign * e_axis`.
    pub fn coordinate(axis: usize, value: f64, sign: f64) -> Self {
        let mut origin = Vector3::zeros();
        origin[axis] = value;
        let mut normal = Vector3::zeros();
        normal[axis] = sign;
        Self { origin, normal }
    }

    fn value(&self, state: &[f64]) -> f64 {
        (0..3).map(|i| self.normal[i] * (state[i] - self.origin[i])).sum()
    }
}

/// Integrates with RK4 until the first three state components cross the
/// section. The crossing is located by bisection on the length of a single
/// RK4 step. Returns the full state at the crossing and the elapsed time.
pub fn flow_to_section<S: DynamicalSystem<f64>>(
    system: &S,
    start: &[f64],
    section: &PlaneSection,
    settings: &ShootingSettings,
) -> Result<(Vec<f64>, f64)> {
    let dim = system.dimension();
    let mut solver = RK4::new(dim);
    let mut state = start.to_vec();
    let mut side = section.value(&state);
    if side == 0.0 {
        bail!("Starting point lies on the section.");
    }
    let mut t = 0.0;
    let mut next = state.clone();
    while t < settings.max_time {
        next.copy_from_slice(&state);
        let mut t_next = t;
        solver.step(system, &mut t_next, &mut next, settings.step);
        let value = section.value(&next);
        if value * side <= 0.0 {
            let (mut lo, mut hi) = (0.0, settings.step);
            let mut trial = state.clone();
            for _ in 0..80 {
                let mid = 0.5 * (lo + hi);
                if mid <= lo || mid >= hi {
                    break;
                }
                trial.copy_from_slice(&state);
                let mut tau = 0.0;
                solver.step(system, &mut tau, &mut trial, mid);
                if section.value(&trial) * side > 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            trial.copy_from_slice(&state);
            let mut tau = 0.0;
            solver.step(system, &mut tau, &mut trial, hi);
            return Ok((trial, t + hi));
        }
        if !value.is_finite() {
            bail!("Trajectory diverged before reaching the section.");
        }
        side = value;
        state.copy_from_slice(&next);
        t = t_next;
    }
    bail!("No section crossing within time {}.", settings.max_time)
}

/// Point of first return to `section` together with the derivative of the
/// Poincare map, `DP = (I - f n^T / (n . f)) Phi`.
pub fn monodromy_to_section(
    field: &VectorField,
    start: &Vector3<f64>,
    section: &PlaneSection,
    settings: &ShootingSettings,
) -> Result<(Vector3<f64>, Matrix3<f64>)> {
    let tangent = TangentSystem::new(field, 3);
    let initial = tangent.initial_state(start.as_slice());
    let (state, _) = flow_to_section(&tangent, &initial, section, settings)
        .context("Failed to integrate the variational equation to the section.")?;
    let point = Vector3::new(state[0], state[1], state[2]);
    let phi = Matrix3::from_row_slice(&state[3..12]);
    let velocity = field.value_at(&point);
    let speed = section.normal.dot(&velocity);
    if speed == 0.0 {
        bail!("Flow is tangent to the section at {point:?}.");
    }
    let projection = Matrix3::identity() - velocity * section.normal.transpose() / speed;
    Ok((point, projection * phi))
}

/// Unit eigenvector of a 2x2 matrix for a real eigenvalue, or `None` when the
/// matrix is a multiple of the identity.
pub fn eigenvector_2x2(m: &Matrix2<f64>, lambda: f64) -> Option<Vector2<f64>> {
    let first = Vector2::new(m[(0, 1)], lambda - m[(0, 0)]);
    let second = Vector2::new(lambda - m[(1, 1)], m[(1, 0)]);
    let candidate = if first.norm() >= second.norm() {
        first
    } else {
        second
    };
    let norm = candidate.norm();
    (norm > 0.0).then(|| candidate / norm)
}

/// Which heteroclinic of the fast subsystem is shot for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// From the upper branch down to the lower one (right side of the orbit).
    UpperToLower,
    /// From the lower branch up to the upper one (left side of the orbit).
    LowerToUpper,
}

#[derive(Debug, Clone, Copy)]
struct Saddle {
    point: Vector3<f64>,
    stable: Vector2<f64>,
    unstable: Vector2<f64>,
}

/// Mismatch of the fast connection for one value of `v`, with the equilibria it
/// was computed at.
#[derive(Debug, Clone, Copy)]
pub struct ShootingResidual {
    pub mismatch: f64,
    pub upper: Vector3<f64>,
    pub lower: Vector3<f64>,
}

/// Shooting between the two saddles of the fast subsystem (`eps = 0`, `v`
/// frozen) along their unstable and stable eigendirections, matched in `w` on
/// the section `u = section_u`.
pub struct FastSubsystemShooting {
    field: VectorField,
    transition: Transition,
    shooting: ShootingSettings,
    newton: NewtonSettings,
}

impl FastSubsystemShooting {
    pub fn new(
        theta: f64,
        transition: Transition,
        shooting: ShootingSettings,
        newton: NewtonSettings,
    ) -> Result<Self> {
        let field = VectorField::fitzhugh_nagumo(&FhnParameters::new(
            Interval::point(theta),
            Interval::point(0.0),
        ))?;
        Ok(Self {
            field,
            transition,
            shooting,
            newton,
        })
    }

    fn saddle(&self, u_guess: f64, v: f64) -> Result<Saddle> {
        let point =
            correct_slow_manifold_point(&self.field, &Vector3::new(u_guess, 0.0, v), self.newton)?;
        let jacobian = self.field.jacobian_at(&point);
        let fast = jacobian.fixed_view::<2, 2>(0, 0).into_owned();
        let trace = fast.trace();
        let discriminant = trace * trace - 4.0 * fast.determinant();
        if discriminant <= 0.0 {
            bail!("Eigenvalues of the fast subsystem at u = {} are not real.", point[0]);
        }
        let root = discriminant.sqrt();
        let (contracting, expanding) = (0.5 * (trace - root), 0.5 * (trace + root));
        if contracting >= 0.0 || expanding <= 0.0 {
            bail!(
                "Eigenvalues of the fast subsystem at u = {} are not of opposite signs.",
                point[0]
            );
        }
        let oriented = |lambda: f64| -> Result<Vector2<f64>> {
            let vector = eigenvector_2x2(&fast, lambda)
                .with_context(|| format!("Degenerate eigenvector for eigenvalue {lambda}."))?;
            Ok(if vector[0] < 0.0 { -vector } else { vector })
        };
        Ok(Saddle {
            point,
            stable: oriented(contracting)?,
            unstable: oriented(expanding)?,
        })
    }

    fn shoot(&self, from: &Saddle, direction: Vector2<f64>, reversed: bool) -> Result<f64> {
        let d = self.shooting.displacement;
        let start = [
            from.point[0] + d * direction[0],
            from.point[1] + d * direction[1],
            from.point[2],
        ];
        let section = PlaneSection::coordinate(0, self.shooting.section_u, -1.0);
        let (hit, _) = if reversed {
            flow_to_section(&self.field.reversed(), &start, &section, &self.shooting)?
        } else {
            flow_to_section(&self.field, &start, &section, &self.shooting)?
        };
        Ok(hit[1])
    }

    /// Difference in `w` on the matching section between the forward branch of
    /// the unstable manifold and the backward branch of the stable one.
    pub fn w_function(&self, upper_u: f64, lower_u: f64, v: f64) -> Result<ShootingResidual> {
        let upper = self.saddle(upper_u, v)?;
        let lower = self.saddle(lower_u, v)?;
        let mismatch = match self.transition {
            Transition::UpperToLower => {
                self.shoot(&upper, -upper.unstable, false)? - self.shoot(&lower, lower.stable, true)?
            }
            Transition::LowerToUpper => {
                self.shoot(&lower, lower.unstable, false)? - self.shoot(&upper, -upper.stable, true)?
            }
        };
        Ok(ShootingResidual {
            mismatch,
            upper: upper.point,
            lower: lower.point,
        })
    }

    /// Secant iteration on `v` for the value at which the connection exists.
    pub fn v_correct(&self, upper_u: f64, lower_u: f64, v: f64) -> Result<(f64, ShootingResidual)> {
        secant(
            v,
            &self.shooting,
            |candidate, previous: Option<&ShootingResidual>| {
                let (up, lo) = previous.map_or((upper_u, lower_u), |r| (r.upper[0], r.lower[0]));
                self.w_function(up, lo, candidate)
            },
        )
        .with_context(|| format!("Shooting in v from v = {v} did not converge."))
    }
}

/// Secant method on a residual that also carries the state it was computed
/// at, so that successive evaluations start from the latest equilibria.
fn secant<F>(start: f64, settings: &ShootingSettings, mut residual: F) -> Result<(f64, ShootingResidual)>
where
    F: FnMut(f64, Option<&ShootingResidual>) -> Result<ShootingResidual>,
{
    let mut x0 = start + settings.secant_offset;
    let mut r0 = residual(x0, None)?;
    let mut x1 = start;
    let mut r1 = residual(x1, None)?;
    for iteration in 0..settings.max_iterations {
        if r1.mismatch.abs() <= settings.tolerance {
            debug!(iteration, value = x1, mismatch = r1.mismatch, "secant converged");
            return Ok((x1, r1));
        }
        let slope = r1.mismatch - r0.mismatch;
        if slope == 0.0 {
            bail!("Secant slope vanished at {x1}.");
        }
        let x2 = x1 - r1.mismatch * (x1 - x0) / slope;
        if (x2 - x1).abs() <= 4.0 * f64::EPSILON * (1.0 + x1.abs()) {
            return Ok((x2, residual(x2, Some(&r1))?));
        }
        let r2 = residual(x2, Some(&r1))?;
        x0 = x1;
        r0 = r1;
        x1 = x2;
        r1 = r2;
    }
    bail!("Secant method did not converge in {} iterations.", settings.max_iterations)
}

/// Replaces the guessed corners by the equilibria of the fast subsystem at
/// which the fast heteroclinics exist, for fixed `theta`.
pub fn correct_periodic_corners(
    theta: f64,
    corners: &CornerGuesses,
    shooting: ShootingSettings,
    newton: NewtonSettings,
) -> Result<CornerGuesses> {
    let right = FastSubsystemShooting::new(theta, Transition::UpperToLower, shooting, newton)?;
    let (v_right, right_fit) = right
        .v_correct(corners.upper_right[0], corners.lower_right[0], corners.upper_right[2])
        .context("Right-side corner correction failed.")?;

    let left = FastSubsystemShooting::new(theta, Transition::LowerToUpper, shooting, newton)?;
    let (v_left, left_fit) = left
        .v_correct(corners.upper_left[0], corners.lower_left[0], corners.upper_left[2])
        .context("Left-side corner correction failed.")?;

    Ok(CornerGuesses {
        upper_left: [left_fit.upper[0], 0.0, v_left],
        lower_left: [left_fit.lower[0], 0.0, v_left],
        upper_right: [right_fit.upper[0], 0.0, v_right],
        lower_right: [right_fit.lower[0], 0.0, v_right],
    })
}

/// Corrects `theta` so that the lower-left equilibrium at `v = 0` connects to
/// the upper branch, then places the right corners at that `theta`.
pub fn correct_homoclinic_corners(
    theta: f64,
    corners: &CornerGuesses,
    shooting: ShootingSettings,
    newton: NewtonSettings,
) -> Result<(f64, CornerGuesses)> {
    let v_left = corners.lower_left[2];
    let (theta_c, left_fit) = secant(theta, &shooting, |candidate, previous| {
        let (up, lo) = previous.map_or((corners.upper_left[0], corners.lower_left[0]), |r| {
            (r.upper[0], r.lower[0])
        });
        FastSubsystemShooting::new(candidate, Transition::LowerToUpper, shooting, newton)?
            .w_function(up, lo, v_left)
    })
    .with_context(|| format!("Shooting in theta from theta = {theta} did not converge."))?;

    let right = FastSubsystemShooting::new(theta_c, Transition::UpperToLower, shooting, newton)?;
    let (v_right, right_fit) = right
        .v_correct(corners.upper_right[0], corners.lower_right[0], corners.upper_right[2])
        .context("Right-side corner correction failed.")?;

    Ok((
        theta_c,
        CornerGuesses {
            upper_left: [left_fit.upper[0], 0.0, v_left],
            lower_left: [left_fit.lower[0], 0.0, v_left],
            upper_right: [right_fit.upper[0], 0.0, v_right],
            lower_right: [right_fit.lower[0], 0.0, v_right],
        },
    ))
}
