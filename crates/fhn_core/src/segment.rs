//! Isolating segments and blocks along the slow manifold.
//!
//! A segment joins two faces, each an h-set in the local `(s, u)` plane of a
//! frame `P` attached at a point `gamma` of the slow manifold. Its four side
//! walls are swept by the bounds of the faces as `gamma` moves linearly from
//! the left end to the right end. Isolation means the flow enters through the
//! stable walls and leaves through the unstable walls, checked by enclosing
//! `f . n` over subdivided wall pieces.

use crate::covering::Face;
use crate::error::{FaceKind, ProofError, ProofResult};
use crate::frame::LocalFrame;
use crate::interval::{dot, hull_vector, lerp, lerp_vector, IVector, Interval};
use crate::vector_field::VectorField;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Ends ordered in `v`, no equilibrium of the slow subsystem inside.
    Segment,
    /// Contains a slow equilibrium that repels neither end: the slow flow
    /// points inward at both ends.
    Block,
}

/// Hulls of `f . n` over the four walls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsolationHulls {
    pub stable_left: Interval,
    pub stable_right: Interval,
    pub unstable_left: Interval,
    pub unstable_right: Interval,
}

impl IsolationHulls {
    pub fn entrance(&self) -> [Interval; 2] {
        [self.stable_left, self.stable_right]
    }

    pub fn exit(&self) -> [Interval; 2] {
        [self.unstable_left, self.unstable_right]
    }

    pub fn hull(&self, other: &IsolationHulls) -> Self {
        Self {
            stable_left: self.stable_left.hull(&other.stable_left),
            stable_right: self.stable_right.hull(&other.stable_right),
            unstable_left: self.unstable_left.hull(&other.unstable_left),
            unstable_right: self.unstable_right.hull(&other.unstable_right),
        }
    }

    /// Entrance hulls must be negative and exit hulls positive.
    pub fn check(&self, segment: &str, link: Option<usize>) -> ProofResult<()> {
        let walls = [
            (FaceKind::StableLeft, self.stable_left, false),
            (FaceKind::StableRight, self.stable_right, false),
            (FaceKind::UnstableLeft, self.unstable_left, true),
            (FaceKind::UnstableRight, self.unstable_right, true),
        ];
        for (face, hull, exit) in walls {
            let ok = if exit {
                hull.certainly_positive()
            } else {
                hull.certainly_negative()
            };
            if !ok {
                return Err(ProofError::IsolationFailure {
                    segment: segment.to_string(),
                    face,
                    link,
                    hull,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Lower,
    Upper,
}

impl Bound {
    fn of(self, interval: Interval) -> Interval {
        match self {
            Bound::Lower => interval.lower(),
            Bound::Upper => interval.upper(),
        }
    }

    fn sign(self) -> f64 {
        match self {
            Bound::Lower => -1.0,
            Bound::Upper => 1.0,
        }
    }
}

fn face_coordinate(face: &Face, axis: usize) -> Interval {
    if axis == 0 {
        face.stable
    } else {
        face.unstable
    }
}

#[derive(Debug, Clone)]
pub struct IsolatingSegment<'f> {
    field: &'f VectorField,
    frame: LocalFrame,
    gamma_left: IVector,
    gamma_right: IVector,
    left_face: Face,
    right_face: Face,
    subdivisions: usize,
    kind: SegmentKind,
    enclosure: IVector,
}

impl<'f> IsolatingSegment<'f> {
    pub fn new(
        field: &'f VectorField,
        frame: LocalFrame,
        ends: (IVector, IVector),
        faces: (Face, Face),
        subdivisions: usize,
    ) -> ProofResult<Self> {
        Self::with_kind(SegmentKind::Segment, field, frame, ends, faces, subdivisions)
    }

    pub fn block(
        field: &'f VectorField,
        frame: LocalFrame,
        ends: (IVector, IVector),
        faces: (Face, Face),
        subdivisions: usize,
    ) -> ProofResult<Self> {
        Self::with_kind(SegmentKind::Block, field, frame, ends, faces, subdivisions)
    }

    pub fn with_kind(
        kind: SegmentKind,
        field: &'f VectorField,
        frame: LocalFrame,
        (gamma_left, gamma_right): (IVector, IVector),
        (left_face, right_face): (Face, Face),
        subdivisions: usize,
    ) -> ProofResult<Self> {
        let left_end = frame.to_global(&gamma_left, &left_face.embed());
        let right_end = frame.to_global(&gamma_right, &right_face.embed());
        let enclosure = hull_vector(&left_end, &right_end);

        match kind {
            SegmentKind::Segment => {
                if !gamma_left[2].lt(&gamma_right[2]) {
                    return Err(ProofError::GeometryPrecondition(format!(
                        "segment ends are not ordered in v: {} and {}",
                        gamma_left[2], gamma_right[2]
                    )));
                }
                if enclosure[0].intersects(&enclosure[2]) {
                    return Err(ProofError::GeometryPrecondition(format!(
                        "segment may contain a zero of the slow subsystem: u in {}, v in {}",
                        enclosure[0], enclosure[2]
                    )));
                }
            }
            SegmentKind::Block => {
                if !(left_end[0].gt(&left_end[2]) && right_end[0].lt(&right_end[2])) {
                    return Err(ProofError::SlowDirection(format!(
                        "slow flow does not point inward at the block ends (u - v on the left: {}, on the right: {})",
                        left_end[0] - left_end[2],
                        right_end[0] - right_end[2]
                    )));
                }
            }
        }

        Ok(Self {
            field,
            frame,
            gamma_left,
            gamma_right,
            left_face,
            right_face,
            subdivisions: subdivisions.max(1),
            kind,
            enclosure,
        })
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn gamma_left(&self) -> &IVector {
        &self.gamma_left
    }

    pub fn gamma_right(&self) -> &IVector {
        &self.gamma_right
    }

    pub fn left_face(&self) -> &Face {
        &self.left_face
    }

    pub fn right_face(&self) -> &Face {
        &self.right_face
    }

    /// Hull of the two end boxes.
    pub fn enclosure(&self) -> &IVector {
        &self.enclosure
    }

    pub fn is_above_diagonal(&self) -> bool {
        self.enclosure[0].gt(&self.enclosure[2])
    }

    pub fn is_below_diagonal(&self) -> bool {
        self.enclosure[0].lt(&self.enclosure[2])
    }

    /// Hulls of `f . n` over the stable-left and stable-right walls.
    pub fn entrance_verification(&self) -> [Interval; 2] {
        [self.wall_product(0, Bound::Lower), self.wall_product(0, Bound::Upper)]
    }

    /// Hulls of `f . n` over the unstable-left and unstable-right walls.
    pub fn exit_verification(&self) -> [Interval; 2] {
        [self.wall_product(1, Bound::Lower), self.wall_product(1, Bound::Upper)]
    }

    pub fn isolation_hulls(&self) -> IsolationHulls {
        let [stable_left, stable_right] = self.entrance_verification();
        let [unstable_left, unstable_right] = self.exit_verification();
        IsolationHulls {
            stable_left,
            stable_right,
            unstable_left,
            unstable_right,
        }
    }

    pub fn verify_isolation(&self, name: &str) -> ProofResult<IsolationHulls> {
        let hulls = self.isolation_hulls();
        debug!(
            segment = name,
            stable_left = %hulls.stable_left,
            stable_right = %hulls.stable_right,
            unstable_left = %hulls.unstable_left,
            unstable_right = %hulls.unstable_right,
            "isolation hulls"
        );
        hulls.check(name, None)?;
        Ok(hulls)
    }

    /// Outward normal of the wall where local coordinate `axis` takes the
    /// given bound of the faces, in global coordinates.
    ///
    /// In local coordinates the wall is `x_axis = a + (v - v_l) (b - a) / (v_r - v_l)`
    /// with `a`, `b` the wall positions at the two ends.
    fn wall_normal(&self, axis: usize, bound: Bound) -> IVector {
        let local_left = self.frame.p_inv() * self.gamma_left;
        let local_right = self.frame.p_inv() * self.gamma_right;
        let a = local_left[axis] + bound.of(face_coordinate(&self.left_face, axis));
        let b = local_right[axis] + bound.of(face_coordinate(&self.right_face, axis));
        let slope = (b - a) / (self.gamma_right[2] - self.gamma_left[2]);

        let sign = Interval::point(bound.sign());
        let mut normal = IVector::zeros();
        normal[axis] = sign;
        normal[2] = -(sign * slope);
        self.frame.normal_transform() * normal
    }

    fn wall_product(&self, axis: usize, bound: Bound) -> Interval {
        let normal = self.wall_normal(axis, bound);
        let other = 1 - axis;
        let n = self.subdivisions;
        let left_edge = bound.of(face_coordinate(&self.left_face, axis));
        let right_edge = bound.of(face_coordinate(&self.right_face, axis));
        let left_span = face_coordinate(&self.left_face, other);
        let right_span = face_coordinate(&self.right_face, other);
        let pieces = if left_span.is_point() && right_span.is_point() {
            1
        } else {
            n
        };

        let product = (0..n * pieces)
            .into_par_iter()
            .map(|cell| {
                let (i, j) = (cell / pieces, cell % pieces);
                let t = Interval::subinterval(i, n);
                let gamma = lerp_vector(&self.gamma_left, &self.gamma_right, t);
                let lo = lerp(left_span.lower(), right_span.lower(), t).lo();
                let hi = lerp(left_span.upper(), right_span.upper(), t).hi();
                let span = Interval::new(lo, hi);
                let mut local = IVector::zeros();
                local[axis] = lerp(left_edge, right_edge, t);
                local[other] = lerp(span.lower(), span.upper(), Interval::subinterval(j, pieces));
                let value = self.field.enclose_affine(&gamma, self.frame.p(), &local);
                dot(&value, &normal)
            })
            .reduce_with(|a, b| a.hull(&b));
        product.unwrap_or(Interval::ENTIRE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::lift;
    use nalgebra::Vector3;

    fn saddle() -> VectorField {
        VectorField::parse("var:u,w,v;fun:-(u-5),w,1;").expect("valid definition")
    }

    fn point(u: f64, w: f64, v: f64) -> IVector {
        lift(&Vector3::new(u, w, v))
    }

    #[test]
    fn linear_saddle_segment_is_isolating() {
        let field = saddle();
        let face = Face::symmetric(1.0, 1.0);
        let segment = IsolatingSegment::new(
            &field,
            LocalFrame::identity(),
            (point(5.0, 0.0, 0.0), point(5.0, 0.0, 1.0)),
            (face, face),
            4,
        )
        .expect("ends are ordered and away from the diagonal");

        let hulls = segment.verify_isolation("saddle").expect("isolating");
        for hull in hulls.entrance() {
            assert!(hull.contains(-1.0) && hull.width() < 1e-9);
        }
        for hull in hulls.exit() {
            assert!(hull.contains(1.0) && hull.width() < 1e-9);
        }
        assert!(segment.is_above_diagonal());
        assert!(!segment.is_below_diagonal());
    }

    #[test]
    fn finer_subdivision_keeps_isolation() {
        let field = VectorField::parse("var:u,w,v;fun:-(u-5)+w^2/10,w+(u-5)^2/10,1;")
            .expect("valid definition");
        let face = Face::symmetric(1.0, 1.0);
        let hulls = |n: usize| {
            IsolatingSegment::new(
                &field,
                LocalFrame::identity(),
                (point(5.0, 0.0, 0.0), point(5.0, 0.0, 1.0)),
                (face, face),
                n,
            )
            .expect("valid segment")
            .verify_isolation("bent saddle")
            .expect("isolating")
        };
        let coarse = hulls(3);
        let fine = hulls(6);
        let pairs = fine
            .entrance()
            .into_iter()
            .zip(coarse.entrance())
            .chain(fine.exit().into_iter().zip(coarse.exit()));
        for (f, c) in pairs {
            assert!(c.inflate(1e-12).contains_interval(&f), "{f} not inside {c}");
        }
        // -1 - w^2/10 over the left stable wall
        assert!(fine.stable_left.contains(-1.05));
        assert!(fine.stable_left.hi() < -0.99);
        assert!(fine.unstable_right.contains(1.05));
    }

    #[test]
    fn swapped_ends_are_rejected() {
        let field = saddle();
        let face = Face::symmetric(1.0, 1.0);
        let result = IsolatingSegment::new(
            &field,
            LocalFrame::identity(),
            (point(5.0, 0.0, 1.0), point(5.0, 0.0, 0.0)),
            (face, face),
            2,
        );
        assert!(matches!(result, Err(ProofError::GeometryPrecondition(_))));
    }

    #[test]
    fn segment_touching_diagonal_is_rejected() {
        let field = saddle();
        let face = Face::symmetric(1.0, 1.0);
        let result = IsolatingSegment::new(
            &field,
            LocalFrame::identity(),
            (point(5.0, 0.0, 3.0), point(5.0, 0.0, 4.5)),
            (face, face),
            2,
        );
        assert!(matches!(result, Err(ProofError::GeometryPrecondition(_))));
    }

    #[test]
    fn degenerate_exit_face_fails_isolation() {
        let field = saddle();
        let face = Face::new(Interval::symmetric(1.0), Interval::point(0.0));
        let segment = IsolatingSegment::new(
            &field,
            LocalFrame::identity(),
            (point(5.0, 0.0, 0.0), point(5.0, 0.0, 1.0)),
            (face, face),
            3,
        )
        .expect("geometry is fine");
        match segment.verify_isolation("flat") {
            Err(ProofError::IsolationFailure { segment, face, link, .. }) => {
                assert_eq!(segment, "flat");
                assert_eq!(face, FaceKind::UnstableLeft);
                assert_eq!(link, None);
            }
            other => panic!("expected an isolation failure, got {other:?}"),
        }
    }

    #[test]
    fn tilted_wall_normal_is_orthogonal_to_the_wall() {
        let field = saddle();
        let left = Face::symmetric(1.0, 1.0);
        let right = Face::symmetric(2.0, 1.0);
        let segment = IsolatingSegment::new(
            &field,
            LocalFrame::identity(),
            (point(5.0, 0.0, 0.0), point(5.0, 0.0, 1.0)),
            (left, right),
            2,
        )
        .expect("geometry is fine");
        // the stable-left wall runs from s = -1 at v = 0 to s = -2 at v = 1
        let normal = segment.wall_normal(0, Bound::Lower);
        let tangent = IVector::new(Interval::point(-1.0), Interval::point(0.0), Interval::point(1.0));
        assert!(dot(&normal, &tangent).contains(0.0));
        assert!(normal[0].certainly_negative());
        assert!(normal[2].certainly_negative());
    }

    #[test]
    fn block_requires_inward_slow_flow() {
        let field = VectorField::parse("var:u,w,v;fun:-u,w,(u-v);").expect("valid definition");
        let face = Face::symmetric(0.1, 0.1);
        let block = IsolatingSegment::block(
            &field,
            LocalFrame::identity(),
            (point(1.0, 0.0, -1.0), point(-1.0, 0.0, 1.0)),
            (face, face),
            2,
        )
        .expect("u > v on the left and u < v on the right");
        assert_eq!(block.kind(), SegmentKind::Block);

        let result = IsolatingSegment::block(
            &field,
            LocalFrame::identity(),
            (point(-1.0, 0.0, -1.0), point(1.0, 0.0, 1.0)),
            (face, face),
            2,
        );
        assert!(matches!(result, Err(ProofError::SlowDirection(_))));
    }

    #[test]
    fn hulls_combine() {
        let a = IsolationHulls {
            stable_left: Interval::new(-2.0, -1.0),
            stable_right: Interval::new(-3.0, -1.0),
            unstable_left: Interval::new(1.0, 2.0),
            unstable_right: Interval::new(0.5, 1.0),
        };
        let b = IsolationHulls {
            stable_left: Interval::new(-1.5, 0.5),
            ..a
        };
        let combined = a.hull(&b);
        assert_eq!(combined.stable_left, Interval::new(-2.0, 0.5));
        assert!(matches!(
            combined.check("pair", Some(3)),
            Err(ProofError::IsolationFailure { face: FaceKind::StableLeft, link: Some(3), .. })
        ));
        assert!(a.check("pair", None).is_ok());
    }
}
