//! Long isolating segments: chains of short segments that follow the slow
//! manifold between two corners, with the frame recomputed at every joint.

use crate::covering::{fast_block, is_covering, Face};
use crate::error::{ProofError, ProofResult};
use crate::frame::{coord_change, LocalFrame};
use crate::interval::{hull_vector, lerp, lerp_vector, lift, midpoint, IVector, Interval};
use crate::numerics::correct_slow_manifold_point;
use crate::segment::{IsolatingSegment, IsolationHulls};
use crate::settings::NewtonSettings;
use crate::vector_field::VectorField;
use tracing::{debug, info, warn};

/// Consecutive segments whose right and left faces are joined by covering
/// relations.
#[derive(Debug, Clone)]
pub struct SegmentChain<'f> {
    links: Vec<IsolatingSegment<'f>>,
}

impl<'f> SegmentChain<'f> {
    pub fn new(links: Vec<IsolatingSegment<'f>>) -> ProofResult<Self> {
        if links.is_empty() {
            return Err(ProofError::GeometryPrecondition(
                "a segment chain needs at least one link".to_string(),
            ));
        }
        Ok(Self { links })
    }

    pub fn links(&self) -> &[IsolatingSegment<'f>] {
        &self.links
    }

    /// Hull of the isolation hulls of every link.
    pub fn isolation_hulls(&self) -> IsolationHulls {
        self.links
            .iter()
            .map(IsolatingSegment::isolation_hulls)
            .reduce(|a, b| a.hull(&b))
            .unwrap_or(IsolationHulls {
                stable_left: Interval::ENTIRE,
                stable_right: Interval::ENTIRE,
                unstable_left: Interval::ENTIRE,
                unstable_right: Interval::ENTIRE,
            })
    }

    /// The right face of every link, carried into the next frame, covers the
    /// left face of the next link.
    pub fn verify_link_coverings(&self) -> ProofResult<()> {
        for (i, pair) in self.links.windows(2).enumerate() {
            let transition = pair[0].frame().transition_to(pair[1].frame());
            if !is_covering(pair[0].right_face(), &fast_block(&transition), pair[1].left_face()) {
                return Err(ProofError::CoveringFailure {
                    stage: "segment chain joint".to_string(),
                    link: Some(i),
                });
            }
        }
        Ok(())
    }

    pub fn verify(&self, name: &str) -> ProofResult<IsolationHulls> {
        self.verify_link_coverings()?;
        for (i, link) in self.links.iter().enumerate() {
            link.isolation_hulls().check(name, Some(i))?;
        }
        Ok(self.isolation_hulls())
    }
}

/// One end of a chain link.
#[derive(Debug, Clone, Copy)]
struct Joint {
    gamma: IVector,
    face: Face,
    frame: LocalFrame,
}

/// A segment from `gamma_left` to `gamma_right` that is too long for a single
/// frame. It is cut into links at Newton-corrected points of the slow
/// manifold; faces are interpolated between the two end faces.
#[derive(Debug, Clone)]
pub struct LongIsolatingSegment<'f> {
    field: &'f VectorField,
    start: Joint,
    end: Joint,
    subdivisions: usize,
    link_safety: f64,
    newton: NewtonSettings,
    enclosure: IVector,
}

impl<'f> LongIsolatingSegment<'f> {
    pub fn new(
        field: &'f VectorField,
        (gamma_left, gamma_right): (IVector, IVector),
        (frame, end_frame): (LocalFrame, LocalFrame),
        (left_face, right_face): (Face, Face),
        subdivisions: usize,
    ) -> Self {
        let enclosure = hull_vector(
            &frame.to_global(&gamma_left, &left_face.embed()),
            &end_frame.to_global(&gamma_right, &right_face.embed()),
        );
        Self {
            field,
            start: Joint {
                gamma: gamma_left,
                face: left_face,
                frame,
            },
            end: Joint {
                gamma: gamma_right,
                face: right_face,
                frame: end_frame,
            },
            subdivisions,
            link_safety: 1.1,
            newton: NewtonSettings::default(),
            enclosure,
        }
    }

    pub fn with_link_safety(mut self, factor: f64) -> Self {
        self.link_safety = factor;
        self
    }

    pub fn with_newton(mut self, newton: NewtonSettings) -> Self {
        self.newton = newton;
        self
    }

    pub fn gamma_left(&self) -> &IVector {
        &self.start.gamma
    }

    pub fn gamma_right(&self) -> &IVector {
        &self.end.gamma
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

    /// The interior joint `i` of `n`.
    fn joint(&self, i: usize, n: usize) -> ProofResult<Joint> {
        let t = Interval::point(i as f64) / Interval::point(n as f64);
        let guess = lerp_vector(&self.start.gamma, &self.end.gamma, t);
        let gamma = match correct_slow_manifold_point(self.field, &midpoint(&guess), self.newton) {
            Ok(point) => lift(&point),
            Err(err) => {
                warn!(joint = i, error = %err, "slow-manifold correction failed, using the interpolated point");
                guess
            }
        };
        let widened = |left: Interval, right: Interval| {
            Interval::new(
                lerp(left.lower(), right.lower(), t).lo(),
                lerp(left.upper(), right.upper(), t).hi(),
            )
        };
        let face = Face::new(
            widened(self.start.face.stable, self.end.face.stable),
            widened(self.start.face.unstable, self.end.face.unstable),
        );
        let frame = coord_change(self.field, &gamma)?;
        Ok(Joint { gamma, face, frame })
    }

    /// Link `i` from joint `from`, shrinking its face by the link safety factor
    /// after checking that the frame change covers the shrunk face.
    fn link(&self, i: usize, from: &Joint, to: &Joint) -> ProofResult<IsolatingSegment<'f>> {
        let adjusted = from.face.shrink_and_expand(self.link_safety);
        let transition = from.frame.transition_to(&to.frame);
        if !is_covering(&from.face, &fast_block(&transition), &adjusted) {
            return Err(ProofError::CoveringFailure {
                stage: "segment chain link".to_string(),
                link: Some(i),
            });
        }
        IsolatingSegment::new(
            self.field,
            to.frame,
            (from.gamma, to.gamma),
            (adjusted, to.face),
            self.subdivisions,
        )
    }

    /// Builds the `n` links one after another, handing each to `visit`.
    fn for_each_link(
        &self,
        n: usize,
        mut visit: impl FnMut(usize, IsolatingSegment<'f>) -> ProofResult<()>,
    ) -> ProofResult<()> {
        let n = n.max(1);
        let mut from = self.start;
        for i in 0..n {
            let to = if i + 1 < n {
                self.joint(i + 1, n)?
            } else {
                self.end
            };
            visit(i, self.link(i, &from, &to)?)?;
            from = to;
        }
        Ok(())
    }

    /// All `n` links as a chain.
    pub fn build_chain(&self, n: usize) -> ProofResult<SegmentChain<'f>> {
        let mut links = Vec::with_capacity(n);
        self.for_each_link(n, |_, link| {
            links.push(link);
            Ok(())
        })?;
        SegmentChain::new(links)
    }

    /// Hulls of the wall products over all `n` links, without checking signs.
    pub fn entrance_and_exit_verification(&self, n: usize) -> ProofResult<IsolationHulls> {
        let mut total: Option<IsolationHulls> = None;
        self.for_each_link(n, |i, link| {
            let hulls = link.isolation_hulls();
            debug!(link = i, stable_left = %hulls.stable_left, unstable_left = %hulls.unstable_left, "link hulls");
            total = Some(total.map_or(hulls, |acc| acc.hull(&hulls)));
            Ok(())
        })?;
        total.ok_or_else(|| {
            ProofError::GeometryPrecondition("long segment produced no links".to_string())
        })
    }

    /// Checks isolation link by link and stops at the first failing link.
    pub fn verify_incrementally(&self, name: &str, n: usize) -> ProofResult<IsolationHulls> {
        let mut total: Option<IsolationHulls> = None;
        self.for_each_link(n, |i, link| {
            let hulls = link.isolation_hulls();
            hulls.check(name, Some(i))?;
            if (i + 1) % 50 == 0 {
                info!(segment = name, links = i + 1, "links verified");
            }
            total = Some(total.map_or(hulls, |acc| acc.hull(&hulls)));
            Ok(())
        })?;
        total.ok_or_else(|| {
            ProofError::GeometryPrecondition("long segment produced no links".to_string())
        })
    }
}
