//! Poincare maps along the fast connections.
//!
//! [`PoincareMap`] flows a set placed on the unstable side of one corner to a
//! section on the stable side of another. [`MidPoincareMap`] meets in the
//! middle instead: the source set is flowed forward and the target set
//! backward to a section placed between them, where the covering relation is
//! checked.

use crate::covering::{orthogonalize_relative_column, HSet};
use crate::error::{FieldError, ProofError, ProofResult};
use crate::flow::{AffineSection, AffineSet, Direction, PoincareOperator, TaylorIntegrator};
use crate::frame::LocalFrame;
use crate::interval::{lerp, lerp_vector, lift, lift_matrix, midpoint, midpoint_matrix, IVector, Interval};
use crate::numerics::{flow_to_section, monodromy_to_section, PlaneSection};
use crate::segment::IsolatingSegment;
use crate::settings::{IntegratorSettings, MidSectionSettings, ShootingSettings};
use crate::vector_field::VectorField;
use nalgebra::Vector3;
use num_traits::Zero;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A corner point with its local frame.
#[derive(Debug, Clone, Copy)]
pub struct SectionAnchor {
    pub gamma: IVector,
    pub frame: LocalFrame,
}

impl SectionAnchor {
    pub fn new(gamma: IVector, frame: LocalFrame) -> Self {
        Self { gamma, frame }
    }

    /// The middle of a segment, in the segment's frame.
    pub fn of_segment(segment: &IsolatingSegment<'_>) -> Self {
        Self::new(
            lerp_vector(segment.gamma_left(), segment.gamma_right(), Interval::point(0.5)),
            *segment.frame(),
        )
    }
}

/// Images of a set and of its two unstable edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapImages {
    pub left_u: HSet,
    pub right_u: HSet,
    pub all: HSet,
}

/// Subdivides `set` into cells; a degenerate coordinate is not split.
fn cells(set: &HSet, n: usize) -> Vec<(Interval, Interval)> {
    let pieces = |i: Interval| if i.is_point() { 1 } else { n.max(1) };
    let (ns, nu) = (pieces(set.stable), pieces(set.unstable));
    (0..ns * nu)
        .map(|k| {
            let (i, j) = (k / nu, k % nu);
            (
                lerp(set.stable.lower(), set.stable.upper(), Interval::subinterval(i, ns)),
                lerp(set.unstable.lower(), set.unstable.upper(), Interval::subinterval(j, nu)),
            )
        })
        .collect()
}

fn hull_all(images: Vec<HSet>) -> ProofResult<HSet> {
    images
        .into_iter()
        .reduce(|a, b| a.hull(&b))
        .ok_or_else(|| ProofError::Integration("empty set of cells".to_string()))
}

pub struct PoincareMap<'f> {
    field: &'f VectorField,
    source: SectionAnchor,
    target: SectionAnchor,
    source_center: IVector,
    section: AffineSection,
    subdivisions: usize,
    integrator: IntegratorSettings,
}

impl<'f> PoincareMap<'f> {
    /// The set `(s, v)` is placed at `P1 (s, -direction ru1, v)` around the
    /// source corner; the section passes through `P2 (direction rs2, 0, 0)`
    /// around the target corner and is normal to the stable axis there.
    pub fn new(
        field: &'f VectorField,
        source: SectionAnchor,
        target: SectionAnchor,
        (ru1, rs2): (f64, f64),
        direction: f64,
    ) -> Self {
        let zero = Interval::zero();
        let source_center = source.frame.to_global(
            &source.gamma,
            &IVector::new(zero, Interval::point(-direction * ru1), zero),
        );
        let offset = IVector::new(Interval::point(direction * rs2), zero, zero);
        let section = AffineSection::new(
            target.frame.to_global(&target.gamma, &offset),
            target.frame.normal_transform() * offset,
        );
        Self {
            field,
            source,
            target,
            source_center,
            section,
            subdivisions: 1,
            integrator: IntegratorSettings::default(),
        }
    }

    pub fn with_subdivisions(mut self, subdivisions: usize) -> Self {
        self.subdivisions = subdivisions.max(1);
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorSettings) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn source(&self) -> &SectionAnchor {
        &self.source
    }

    /// Image of `set = (s, v)` as `(v, u)` in the target frame.
    pub fn image(&self, set: &HSet) -> ProofResult<HSet> {
        let images = cells(set, self.subdivisions)
            .into_par_iter()
            .map(|(s, v)| {
                let local = IVector::new(s, Interval::zero(), v);
                let start = AffineSet::new(&self.source_center, self.source.frame.p(), &local);
                let operator = PoincareOperator::new(
                    TaylorIntegrator::new(self.field, self.integrator),
                    self.section.clone(),
                );
                let crossing =
                    operator.first_hit(&start, &self.target.gamma, self.target.frame.p_inv())?;
                Ok(HSet::new(crossing.local[2], crossing.local[1]))
            })
            .collect::<ProofResult<Vec<_>>>()?;
        hull_all(images)
    }

    pub fn images(&self, set: &HSet) -> ProofResult<MapImages> {
        Ok(MapImages {
            left_u: self.image(&set.left_u())?,
            right_u: self.image(&set.right_u())?,
            all: self.image(set)?,
        })
    }
}

pub struct MidPoincareMap<'f> {
    field: &'f VectorField,
    reversed: VectorField,
    source: SectionAnchor,
    target: SectionAnchor,
    source_center: IVector,
    target_center: IVector,
    mid_center: IVector,
    mid_frame: LocalFrame,
    mid_section: AffineSection,
    subdivisions: usize,
    integrator: IntegratorSettings,
    covering_eps: f64,
}

impl<'f> MidPoincareMap<'f> {
    /// Places the mid-section where the trajectory of the source set center
    /// crosses `u = (1 - fraction) u1 + fraction u2`, normal to the flow
    /// there. Section coordinates are the source frame carried along by the
    /// derivative of the flow, with the middle column replaced by the flow
    /// direction.
    pub fn new(
        field: &'f VectorField,
        source: SectionAnchor,
        target: SectionAnchor,
        (ru1, rs2): (f64, f64),
        direction: f64,
        settings: &MidSectionSettings,
        shooting: &ShootingSettings,
    ) -> ProofResult<Self> {
        let zero = Interval::zero();
        let source_center = source.frame.to_global(
            &source.gamma,
            &IVector::new(zero, Interval::point(-direction * ru1), zero),
        );
        let target_center = target.frame.to_global(
            &target.gamma,
            &IVector::new(Interval::point(direction * rs2), zero, zero),
        );

        let placement_failed =
            |err: anyhow::Error| ProofError::GeometryPrecondition(format!("mid-section placement: {err:#}"));
        let start = midpoint(&source_center);
        let fraction = settings.fraction;
        let u_mid = (1.0 - fraction) * source.gamma[0].mid() + fraction * target.gamma[0].mid();
        let (state, _) = flow_to_section(field, start.as_slice(), &PlaneSection::coordinate(0, u_mid, 1.0), shooting)
            .map_err(placement_failed)?;
        let mid = Vector3::new(state[0], state[1], state[2]);
        let normal = field.value_at(&mid);
        let (_, derivative) = monodromy_to_section(field, &start, &PlaneSection::new(mid, normal), shooting)
            .map_err(placement_failed)?;

        let mut basis = derivative * midpoint_matrix(source.frame.p());
        basis.set_column(1, &normal);
        let mut basis = lift_matrix(&basis);
        if settings.orthogonalize {
            orthogonalize_relative_column(&mut basis, 1);
        }
        let mid_frame = LocalFrame::new(basis)?;
        debug!(?mid, ?normal, "mid-section placed");

        Ok(Self {
            field,
            reversed: field.reversed(),
            source,
            target,
            source_center,
            target_center,
            mid_center: lift(&mid),
            mid_frame,
            mid_section: AffineSection::new(lift(&mid), lift(&normal)),
            subdivisions: 1,
            integrator: IntegratorSettings::default(),
            covering_eps: 1e-15,
        })
    }

    /// Mid map from the middle of `source` to the middle of `target`, with the
    /// offsets taken from the unstable radius of the source face and the
    /// stable radius of the target face.
    pub fn between_segments(
        field: &'f VectorField,
        source: &IsolatingSegment<'_>,
        target: &IsolatingSegment<'_>,
        direction: f64,
        settings: &MidSectionSettings,
        shooting: &ShootingSettings,
    ) -> ProofResult<Self> {
        Self::new(
            field,
            SectionAnchor::of_segment(source),
            SectionAnchor::of_segment(target),
            (source.left_face().unstable.mag(), target.left_face().stable.mag()),
            direction,
            settings,
            shooting,
        )
    }

    pub fn with_subdivisions(mut self, subdivisions: usize) -> Self {
        self.subdivisions = subdivisions.max(1);
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorSettings) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_covering_eps(mut self, eps: f64) -> Self {
        self.covering_eps = eps;
        self
    }

    pub fn mid_frame(&self) -> &LocalFrame {
        &self.mid_frame
    }

    /// Hull of the mid-section coordinates `(r0, r2)` of the first hits of
    /// `set`. Forward, `set = (s, v)` sits at `P1 (s, 0, v)` around the source
    /// set center; backward, `set = (v, u)` sits at `P2 (0, u, v)` around the
    /// target set center.
    pub fn integrate_to_mid_section(&self, set: &HSet, direction: Direction) -> ProofResult<HSet> {
        let field = match direction {
            Direction::Forward => self.field,
            Direction::Backward => &self.reversed,
        };
        self.image_with(field, set, direction)
    }

    fn image_with(&self, field: &VectorField, set: &HSet, direction: Direction) -> ProofResult<HSet> {
        let (center, anchor) = match direction {
            Direction::Forward => (&self.source_center, &self.source),
            Direction::Backward => (&self.target_center, &self.target),
        };
        let zero = Interval::zero();
        let images = cells(set, self.subdivisions)
            .into_par_iter()
            .map(|(a, b)| {
                let local = match direction {
                    Direction::Forward => IVector::new(a, zero, b),
                    Direction::Backward => IVector::new(zero, b, a),
                };
                let start = AffineSet::new(center, anchor.frame.p(), &local);
                let operator = PoincareOperator::new(
                    TaylorIntegrator::new(field, self.integrator),
                    self.mid_section.clone(),
                );
                let crossing = operator.first_hit(&start, &self.mid_center, self.mid_frame.p_inv())?;
                Ok(HSet::new(crossing.local[0], crossing.local[2]))
            })
            .collect::<ProofResult<Vec<_>>>()?;
        hull_all(images)
    }

    /// Backward images of `set2` and of its two stable edges, after checking
    /// that the edges land strictly on opposite sides of the section origin.
    fn backward_images(&self, set2: &HSet) -> ProofResult<(HSet, HSet, HSet)> {
        let eps = Interval::point(self.covering_eps);
        let whole = self.integrate_to_mid_section(set2, Direction::Backward)?;
        let left = self.integrate_to_mid_section(&set2.left_s(), Direction::Backward)?;
        let right = self.integrate_to_mid_section(&set2.right_s(), Direction::Backward)?;
        if !((left.stable + eps).certainly_negative() && (right.stable - eps).certainly_positive()) {
            return Err(ProofError::IntegrationInconsistency(format!(
                "backward stable edges do not straddle the mid-section origin: {} and {}",
                left.stable, right.stable
            )));
        }
        if !whole.contains_zero() {
            return Err(ProofError::IntegrationInconsistency(
                "backward image misses the mid-section origin".to_string(),
            ));
        }
        Ok((whole, left, right))
    }

    fn check_cover_origin(cover: &HSet) -> ProofResult<()> {
        if cover.contains_zero() {
            Ok(())
        } else {
            Err(ProofError::IntegrationInconsistency(format!(
                "set to cover misses the mid-section origin: stable {}, unstable {}",
                cover.stable, cover.unstable
            )))
        }
    }

    fn covers(cover: &HSet, whole: &HSet, left: &HSet, right: &HSet) -> bool {
        debug!(
            cover_stable = %cover.stable,
            cover_unstable = %cover.unstable,
            back_left = %left.stable,
            back_right = %right.stable,
            back_unstable = %whole.unstable,
            "mid-section covering"
        );
        left.stable.lt(&cover.stable)
            && right.stable.gt(&cover.stable)
            && whole.unstable.subset_interior(&cover.unstable)
    }

    /// Checks that the forward image of `set1` and the backward image of
    /// `set2` cross on the mid-section in the covering sense.
    pub fn check_covering(&self, set1: &HSet, set2: &HSet) -> ProofResult<bool> {
        let eps = Interval::point(self.covering_eps);
        let whole = self.integrate_to_mid_section(set1, Direction::Forward)?;
        let left = self.integrate_to_mid_section(&set1.left_u(), Direction::Forward)?;
        let right = self.integrate_to_mid_section(&set1.right_u(), Direction::Forward)?;
        if !((left.unstable + eps).certainly_negative() && (right.unstable - eps).certainly_positive()) {
            return Err(ProofError::IntegrationInconsistency(format!(
                "forward unstable edges do not straddle the mid-section origin: {} and {}",
                left.unstable, right.unstable
            )));
        }
        if !whole.contains_zero() {
            return Err(ProofError::IntegrationInconsistency(
                "forward image misses the mid-section origin".to_string(),
            ));
        }
        let cover = HSet::new(
            whole.stable * (Interval::point(1.0) + eps),
            Interval::new((left.unstable + eps).hi(), (right.unstable - eps).lo()),
        );
        Self::check_cover_origin(&cover)?;

        let (back_whole, back_left, back_right) = self.backward_images(set2)?;
        Ok(Self::covers(&cover, &back_whole, &back_left, &back_right))
    }

    /// Like [`check_covering`](Self::check_covering), with the unstable
    /// direction of `set1` replaced by the parameter `name`: the forward
    /// images at the two ends of its interval must land strictly on opposite
    /// sides of the origin, and the backward image of `set2` must fit
    /// strictly between them.
    pub fn shoot_with_theta(&self, set1: &HSet, set2: &HSet, name: &str) -> ProofResult<bool> {
        let range = self
            .field
            .parameter(name)
            .ok_or_else(|| FieldError::UnknownParameter(name.to_string()))?;
        let eps = Interval::point(self.covering_eps);
        let forward = |value: Interval| -> ProofResult<HSet> {
            let field = self.field.with_parameter(name, value)?;
            self.image_with(&field, set1, Direction::Forward)
        };
        let low = forward(range.lower())?;
        let high = forward(range.upper())?;
        let center = forward(Interval::point(range.mid()))?;
        let full = self.image_with(self.field, set1, Direction::Forward)?;
        debug!(low = %low.unstable, center = %center.unstable, high = %high.unstable, "parameter sweep on the mid-section");

        let straddles = |neg: &HSet, pos: &HSet| {
            (neg.unstable + eps).certainly_negative() && (pos.unstable - eps).certainly_positive()
        };
        let (neg, pos) = if straddles(&low, &high) {
            (low, high)
        } else if straddles(&high, &low) {
            (high, low)
        } else {
            return Err(ProofError::IntegrationInconsistency(format!(
                "images at the ends of {name} = {range} do not straddle the mid-section origin: {} and {}",
                low.unstable, high.unstable
            )));
        };

        let stable = [low, high, center]
            .iter()
            .fold(full.stable, |acc, image| acc.hull(&image.stable));
        let cover = HSet::new(
            stable * (Interval::point(1.0) + eps),
            Interval::new((neg.unstable + eps).hi(), (pos.unstable - eps).lo()),
        );
        Self::check_cover_origin(&cover)?;

        let (back_whole, back_left, back_right) = self.backward_images(set2)?;
        Ok(Self::covers(&cover, &back_whole, &back_left, &back_right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn frame(m: Matrix3<f64>) -> LocalFrame {
        LocalFrame::new(lift_matrix(&m)).expect("regular frame")
    }

    /// Columns `e_w, e_u, e_v`.
    fn swap_frame() -> LocalFrame {
        frame(Matrix3::new(0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0))
    }

    /// Columns `e_u, e_w, e_w + e_v`.
    fn sheared_frame() -> LocalFrame {
        frame(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0))
    }

    fn settings() -> IntegratorSettings {
        IntegratorSettings {
            step: 0.1,
            ..IntegratorSettings::default()
        }
    }

    #[test]
    fn translation_flow_swaps_coordinates() {
        let field = VectorField::parse("var:u,w,v;fun:1,0,0;").expect("valid definition");
        let source = SectionAnchor::new(IVector::zeros(), swap_frame());
        let target = SectionAnchor::new(lift(&Vector3::new(2.0, 0.0, 0.0)), LocalFrame::identity());
        let map = PoincareMap::new(&field, source, target, (0.5, 0.5), 1.0)
            .with_subdivisions(2)
            .with_integrator(settings());

        let set = HSet::new(Interval::symmetric(1e-3), Interval::new(0.01, 0.02));
        let image = map.image(&set).expect("section is reached");
        assert!(image.stable.contains(0.01) && image.stable.contains(0.02));
        assert!(image.stable.width() < 0.0101);
        assert!(image.unstable.contains(-1e-3) && image.unstable.contains(1e-3));
        assert!(image.unstable.width() < 2.01e-3);

        let images = map.images(&set).expect("section is reached");
        assert!(images.left_u.stable.contains(0.01));
        assert!(images.left_u.stable.width() < 1e-6);
        assert!(images.right_u.stable.contains(0.02));
    }

    fn mid_map(field: &VectorField) -> MidPoincareMap<'_> {
        let source = SectionAnchor::new(IVector::zeros(), swap_frame());
        let target = SectionAnchor::new(lift(&Vector3::new(2.0, 0.0, 0.0)), sheared_frame());
        let placement = MidSectionSettings {
            fraction: 0.9,
            orthogonalize: true,
        };
        MidPoincareMap::new(
            field,
            source,
            target,
            (0.01, 0.01),
            1.0,
            &placement,
            &ShootingSettings::default(),
        )
        .expect("mid-section placed")
        .with_subdivisions(2)
        .with_integrator(settings())
    }

    #[test]
    fn mid_section_coordinates_follow_the_flow() {
        let field = VectorField::parse("var:u,w,v;fun:1,0,0;").expect("valid definition");
        let map = mid_map(&field);
        assert!((map.mid_center[0].mid() - 1.8).abs() < 1e-9);
        assert!(map.mid_section.normal[0].contains(1.0));

        let set1 = HSet::symmetric(1e-4, 2e-3);
        let forward = map
            .integrate_to_mid_section(&set1, Direction::Forward)
            .expect("forward hit");
        assert!(forward.stable.contains(1e-4) && forward.stable.contains(-1e-4));
        assert!(forward.unstable.contains(2e-3) && forward.unstable.contains(-2e-3));
        assert!(forward.unstable.width() < 4.01e-3);

        let set2 = HSet::symmetric(1e-3, 1e-5);
        let backward = map
            .integrate_to_mid_section(&set2, Direction::Backward)
            .expect("backward hit");
        // (v, u) lands at (u + v, v)
        assert!(backward.stable.contains(1e-3) && backward.stable.contains(-1e-3));
        assert!(backward.stable.width() < 2.1e-3);
        assert!(backward.unstable.contains(1e-3));
    }

    #[test]
    fn covering_on_the_mid_section() {
        let field = VectorField::parse("var:u,w,v;fun:1,0,0;").expect("valid definition");
        let map = mid_map(&field);
        let set2 = HSet::symmetric(1e-3, 1e-5);

        let wide = HSet::symmetric(1e-4, 2e-3);
        assert!(map.check_covering(&wide, &set2).expect("consistent images"));

        let narrow = HSet::symmetric(1e-4, 5e-4);
        assert!(!map.check_covering(&narrow, &set2).expect("consistent images"));

        let thin_back = HSet::symmetric(1e-6, 1e-4);
        assert!(matches!(
            map.check_covering(&wide, &thin_back),
            Err(ProofError::IntegrationInconsistency(_))
        ));
    }

    #[test]
    fn set_to_cover_must_hold_the_origin() {
        let centred = HSet::new(Interval::new(-1e-4, 2e-4), Interval::new(-1e-3, 1e-3));
        assert!(MidPoincareMap::check_cover_origin(&centred).is_ok());
        let shifted = HSet::new(Interval::new(1e-5, 2e-4), Interval::new(-1e-3, 1e-3));
        assert!(matches!(
            MidPoincareMap::check_cover_origin(&shifted),
            Err(ProofError::IntegrationInconsistency(message)) if message.contains("misses the mid-section origin")
        ));
    }

    #[test]
    fn parameter_shooting_brackets_the_target() {
        let field = VectorField::parse("par:theta;var:u,w,v;fun:1,0,theta*(2-u)^4;")
            .expect("valid definition")
            .with_parameter("theta", Interval::new(-1e-3, 1e-3))
            .expect("theta exists");
        let map = mid_map(&field);
        let set1 = HSet::symmetric(1e-5, 1e-5);

        assert!(map
            .shoot_with_theta(&set1, &HSet::symmetric(1e-3, 1e-4), "theta")
            .expect("consistent images"));
        assert!(!map
            .shoot_with_theta(&set1, &HSet::symmetric(1e-2, 1e-4), "theta")
            .expect("consistent images"));
        assert!(matches!(
            map.shoot_with_theta(&set1, &HSet::symmetric(1e-3, 1e-4), "mu"),
            Err(ProofError::Field(FieldError::UnknownParameter(_)))
        ));
    }
}
