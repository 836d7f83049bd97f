//! Rigorous integration of affine sets and first-hit enclosures on affine
//! sections.
//!
//! A set is kept in the form `center + basis * r0 + error` with a point
//! center, a point basis and interval boxes `r0` and `error`. One step of size
//! `h` uses
//!
//! * an a priori box `W` with `X + [0, h] f(W) ⊂ int W`, which holds every
//!   trajectory from the set for times in `[0, h]`;
//! * interval Taylor coefficients at the center, and the derivative of the
//!   Taylor polynomial over the whole set (jets of [`Grad`]);
//! * the Lagrange remainder `a_{p+1}(W) t^{p+1}`.
//!
//! The new basis is the midpoint of `J * basis`; what the midpoint misses is
//! folded into `error`.

use crate::autodiff::Grad;
use crate::error::{ProofError, ProofResult};
use crate::interval::{dot, vector_subset_interior, IMatrix, IVector, Interval};
use crate::settings::IntegratorSettings;
use crate::taylor::taylor_coefficients;
use crate::vector_field::VectorField;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Time direction of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// The field to integrate forward in time for this direction.
    pub fn resolve(&self, field: &VectorField) -> VectorField {
        match self {
            Direction::Forward => field.clone(),
            Direction::Backward => field.reversed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AffineSet {
    pub center: IVector,
    pub basis: IMatrix,
    pub r0: IVector,
    pub error: IVector,
}

impl AffineSet {
    /// `center + basis * r0`. A thick center is split into its midpoint and an
    /// error term.
    pub fn new(center: &IVector, basis: &IMatrix, r0: &IVector) -> Self {
        let mid = center.map(|c| Interval::point(c.mid()));
        Self {
            center: mid,
            basis: *basis,
            r0: *r0,
            error: center - mid,
        }
    }

    pub fn hull(&self) -> IVector {
        self.center + self.basis * self.r0 + self.error
    }
}

/// Enclosure `point + matrix * r0 + delta` of the flow of a set over some
/// time interval.
#[derive(Debug, Clone)]
pub struct AffineEnclosure {
    pub point: IVector,
    pub matrix: IMatrix,
    pub r0: IVector,
    pub delta: IVector,
}

impl AffineEnclosure {
    pub fn hull(&self) -> IVector {
        self.point + self.matrix * self.r0 + self.delta
    }

    /// `p_inv * (x - origin)` over the enclosure, evaluated through the affine
    /// form to avoid wrapping.
    pub fn in_frame(&self, origin: &IVector, p_inv: &IMatrix) -> IVector {
        p_inv * (self.point - origin) + (p_inv * self.matrix) * self.r0 + p_inv * self.delta
    }
}

/// The plane `normal . (x - origin) = 0`.
#[derive(Debug, Clone)]
pub struct AffineSection {
    pub origin: IVector,
    pub normal: IVector,
}

impl AffineSection {
    pub fn new(origin: IVector, normal: IVector) -> Self {
        Self { origin, normal }
    }

    pub fn value(&self, x: &IVector) -> Interval {
        dot(&self.normal, &(x - self.origin))
    }

    pub fn value_affine(&self, enclosure: &AffineEnclosure) -> Interval {
        let transported = enclosure.matrix.transpose() * self.normal;
        dot(&self.normal, &(enclosure.point - self.origin))
            + dot(&transported, &enclosure.r0)
            + dot(&self.normal, &enclosure.delta)
    }
}

/// Everything needed to enclose the flow of one set over `[0, h]`.
struct TaylorStep {
    h: f64,
    center_coeffs: Vec<IVector>,
    jacobian_coeffs: Vec<IMatrix>,
    remainder: IVector,
    basis: IMatrix,
    r0: IVector,
    error: IVector,
    apriori: IVector,
}

impl TaylorStep {
    fn at(&self, t: Interval) -> AffineEnclosure {
        let mut point = self.remainder;
        for a in self.center_coeffs.iter().rev() {
            point = point.map(|c| c * t) + a;
        }
        let mut jacobian = IMatrix::zeros();
        for d in self.jacobian_coeffs.iter().rev() {
            jacobian = jacobian.map(|c| c * t) + d;
        }
        AffineEnclosure {
            point,
            matrix: jacobian * self.basis,
            r0: self.r0,
            delta: jacobian * self.error,
        }
    }

    /// The j-th of n equal sub-times of `[0, h]`, clipped to it.
    fn subtime(&self, j: usize, n: usize) -> Interval {
        let piece = Interval::subinterval(j, n) * Interval::point(self.h);
        Interval::new(piece.lo().max(0.0), piece.hi().min(self.h))
    }

    fn advance(&self) -> AffineSet {
        let enclosure = self.at(Interval::point(self.h));
        let basis = enclosure.matrix.map(|c| Interval::point(c.mid()));
        let image = enclosure.point + (enclosure.matrix - basis) * self.r0 + enclosure.delta;
        let center = image.map(|c| Interval::point(c.mid()));
        AffineSet {
            center,
            basis,
            r0: self.r0,
            error: image - center,
        }
    }
}

pub struct TaylorIntegrator<'f> {
    field: &'f VectorField,
    settings: IntegratorSettings,
}

impl<'f> TaylorIntegrator<'f> {
    pub fn new(field: &'f VectorField, settings: IntegratorSettings) -> Self {
        Self { field, settings }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    fn apriori(&self, x: &IVector, h: f64) -> Option<IVector> {
        let time = Interval::new(0.0, h);
        let mut guess = x + self.field.value(x).map(|c| c * time);
        for _ in 0..10 {
            let inflated = guess.map(|c| c.inflate(0.1 * c.width() + 1e-14 * (1.0 + c.mag())));
            let candidate = x + self.field.value(&inflated).map(|c| c * time);
            if vector_subset_interior(&candidate, &inflated) {
                return Some(candidate);
            }
            guess = crate::interval::hull_vector(&candidate, &inflated);
        }
        None
    }

    fn step(&self, set: &AffineSet, max_step: f64) -> ProofResult<TaylorStep> {
        let x = set.hull();
        let mut h = self.settings.step.min(max_step);
        let apriori = loop {
            if let Some(w) = self.apriori(&x, h) {
                break w;
            }
            h *= 0.5;
            if h < self.settings.min_step.min(max_step) {
                return Err(ProofError::Integration(format!(
                    "no a priori enclosure found down to step {h:e}"
                )));
            }
        };

        let order = self.settings.order.max(1);
        let center = [set.center[0], set.center[1], set.center[2]];
        let center_coeffs = taylor_coefficients(self.field, &center, order)
            .into_iter()
            .map(IVector::from)
            .collect();

        let seeds = [
            Grad::<3>::variable(x[0], 0),
            Grad::<3>::variable(x[1], 1),
            Grad::<3>::variable(x[2], 2),
        ];
        let jacobian_coeffs = taylor_coefficients(self.field, &seeds, order)
            .iter()
            .map(|a| IMatrix::from_fn(|i, j| a[i].grad[j]))
            .collect();

        let w = [apriori[0], apriori[1], apriori[2]];
        let remainder_coeffs = taylor_coefficients(self.field, &w, order + 1);
        let remainder = IVector::from(remainder_coeffs[order + 1]);

        Ok(TaylorStep {
            h,
            center_coeffs,
            jacobian_coeffs,
            remainder,
            basis: set.basis,
            r0: set.r0,
            error: set.error,
            apriori,
        })
    }

    /// Flows `set` for exactly `time` units.
    pub fn advance(&self, set: &AffineSet, time: f64) -> ProofResult<AffineSet> {
        let mut current = set.clone();
        let mut remaining = time;
        while remaining > 0.0 {
            let step = self.step(&current, remaining)?;
            remaining -= step.h;
            current = step.advance();
        }
        Ok(current)
    }
}

/// Enclosure of the first hit of a set on a section.
#[derive(Debug, Clone)]
pub struct Crossing {
    /// Hull of `p_inv * (x - origin)` over all first-hit points.
    pub local: IVector,
    pub time: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    Straddle,
    Past,
}

fn classify(value: Interval, start_sign: f64) -> Side {
    let signed = if start_sign < 0.0 { -value } else { value };
    if signed.certainly_positive() {
        Side::Before
    } else if signed.certainly_negative() {
        Side::Past
    } else {
        Side::Straddle
    }
}

#[derive(Default)]
struct Collector {
    local: Option<IVector>,
    time: Option<Interval>,
}

impl Collector {
    fn add(&mut self, local: IVector, time: Interval) {
        self.local = Some(match self.local {
            Some(acc) => crate::interval::hull_vector(&acc, &local),
            None => local,
        });
        self.time = Some(self.time.map_or(time, |acc| acc.hull(&time)));
    }
}

/// Poincare operator to an affine section for one (already time-oriented)
/// vector field.
pub struct PoincareOperator<'f> {
    integrator: TaylorIntegrator<'f>,
    section: AffineSection,
}

struct Target<'a> {
    origin: &'a IVector,
    p_inv: &'a IMatrix,
}

impl<'f> PoincareOperator<'f> {
    pub fn new(integrator: TaylorIntegrator<'f>, section: AffineSection) -> Self {
        Self {
            integrator,
            section,
        }
    }

    pub fn section(&self) -> &AffineSection {
        &self.section
    }

    /// Encloses the first intersection of every trajectory from `set` with the
    /// section, in the coordinates `p_inv * (x - origin)`.
    pub fn first_hit(
        &self,
        set: &AffineSet,
        origin: &IVector,
        p_inv: &IMatrix,
    ) -> ProofResult<Crossing> {
        let start = self.section.value(&set.hull());
        let start_sign = if start.certainly_negative() {
            -1.0
        } else if start.certainly_positive() {
            1.0
        } else {
            return Err(ProofError::Integration(format!(
                "initial set is not strictly on one side of the section (section value {start})"
            )));
        };

        let settings = *self.integrator.settings();
        let target = Target { origin, p_inv };
        let pieces = settings.crossing_pieces.max(1);
        let mut current = set.clone();
        let mut elapsed = Interval::zero();
        let mut collector = Collector::default();
        let mut touching = false;

        while elapsed.lo() <= settings.max_time {
            let step = self.integrator.step(&current, settings.step)?;
            if !touching {
                touching = classify(self.section.value(&step.apriori), start_sign) != Side::Before;
            }
            if touching {
                for j in 0..pieces {
                    let tau = step.subtime(j, pieces);
                    let side = classify(self.section.value_affine(&step.at(tau)), start_sign);
                    match side {
                        Side::Before => {}
                        Side::Straddle => self.refine(
                            &step,
                            tau,
                            settings.refinement_depth,
                            start_sign,
                            elapsed,
                            &target,
                            &mut collector,
                        ),
                        Side::Past => {
                            return match (collector.local, collector.time) {
                                (Some(local), Some(time)) => {
                                    trace!(%time, "section crossing enclosed");
                                    Ok(Crossing { local, time })
                                }
                                _ => Err(ProofError::Integration(
                                    "set passed the section between two enclosures".to_string(),
                                )),
                            };
                        }
                    }
                }
            }
            elapsed = elapsed + Interval::point(step.h);
            current = step.advance();
        }

        Err(ProofError::Integration(format!(
            "no section crossing within time {}",
            settings.max_time
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn refine(
        &self,
        step: &TaylorStep,
        tau: Interval,
        depth: usize,
        start_sign: f64,
        elapsed: Interval,
        target: &Target<'_>,
        collector: &mut Collector,
    ) {
        let enclosure = step.at(tau);
        if classify(self.section.value_affine(&enclosure), start_sign) != Side::Straddle {
            return;
        }
        let mid = tau.mid();
        if depth == 0 || !(tau.lo() < mid && mid < tau.hi()) {
            collector.add(enclosure.in_frame(target.origin, target.p_inv), elapsed + tau);
            return;
        }
        for half in [Interval::new(tau.lo(), mid), Interval::new(mid, tau.hi())] {
            self.refine(step, half, depth - 1, start_sign, elapsed, target, collector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{lift, lift_matrix};
    use nalgebra::{Matrix3, Vector3};

    fn saddle() -> VectorField {
        VectorField::parse("var:x,y,z;fun:-x,y,1;").expect("definition parses")
    }

    #[test]
    fn advance_encloses_linear_flow() {
        let field = saddle();
        let integrator = TaylorIntegrator::new(&field, IntegratorSettings::default());
        let set = AffineSet::new(
            &lift(&Vector3::new(1.0, 1.0, 0.0)),
            &lift_matrix(&Matrix3::identity()),
            &IVector::zeros(),
        );
        let image = integrator.advance(&set, 1.0).expect("integration succeeds").hull();
        let e = std::f64::consts::E;
        assert!(image[0].contains(1.0 / e));
        assert!(image[1].contains(e));
        assert!(image[2].contains(1.0));
        assert!(image.iter().all(|c| c.width() < 1e-10));
    }

    #[test]
    fn first_hit_encloses_exact_return() {
        let field = saddle();
        let integrator = TaylorIntegrator::new(&field, IntegratorSettings::default());
        let section = AffineSection::new(
            lift(&Vector3::new(0.0, 0.0, 1.0)),
            lift(&Vector3::new(0.0, 0.0, 1.0)),
        );
        let operator = PoincareOperator::new(integrator, section);
        let box_ = IVector::new(
            Interval::symmetric(1e-3),
            Interval::symmetric(1e-3),
            Interval::zero(),
        );
        let set = AffineSet::new(
            &lift(&Vector3::new(1.0, 1.0, 0.0)),
            &lift_matrix(&Matrix3::identity()),
            &box_,
        );
        let identity = lift_matrix(&Matrix3::identity());
        let crossing = operator
            .first_hit(&set, &IVector::zeros(), &identity)
            .expect("crossing found");
        let e = std::f64::consts::E;
        for scale in [1.0 - 1e-3, 1.0, 1.0 + 1e-3] {
            assert!(crossing.local[0].contains(scale / e));
            assert!(crossing.local[1].contains(scale * e));
        }
        assert!(crossing.local[0].width() < 2.5e-3 / e);
        assert!(crossing.local[2].contains(1.0));
        assert!(crossing.time.contains(1.0));
        assert!(crossing.time.width() < 1e-3);
    }

    #[test]
    fn backward_direction_reverses_time() {
        let field = saddle();
        let backward = Direction::Backward.resolve(&field);
        let integrator = TaylorIntegrator::new(&backward, IntegratorSettings::default());
        let section = AffineSection::new(
            lift(&Vector3::new(0.0, 0.0, 0.5)),
            lift(&Vector3::new(0.0, 0.0, 1.0)),
        );
        let operator = PoincareOperator::new(integrator, section);
        let set = AffineSet::new(
            &lift(&Vector3::new(1.0, 1.0, 1.0)),
            &lift_matrix(&Matrix3::identity()),
            &IVector::zeros(),
        );
        let crossing = operator
            .first_hit(&set, &IVector::zeros(), &lift_matrix(&Matrix3::identity()))
            .expect("crossing found");
        assert!(crossing.local[0].contains(0.5_f64.exp()));
        assert!(crossing.local[1].contains((-0.5_f64).exp()));
        assert!(crossing.time.contains(0.5));
    }

    #[test]
    fn rejects_sets_touching_the_section() {
        let field = saddle();
        let integrator = TaylorIntegrator::new(&field, IntegratorSettings::default());
        let section = AffineSection::new(IVector::zeros(), lift(&Vector3::new(0.0, 0.0, 1.0)));
        let operator = PoincareOperator::new(integrator, section);
        let set = AffineSet::new(
            &IVector::zeros(),
            &lift_matrix(&Matrix3::identity()),
            &IVector::new(Interval::zero(), Interval::zero(), Interval::symmetric(0.1)),
        );
        let identity = lift_matrix(&Matrix3::identity());
        assert!(matches!(
            operator.first_hit(&set, &IVector::zeros(), &identity),
            Err(ProofError::Integration(_))
        ));
    }
}
