//! The two proofs: a periodic orbit and a homoclinic orbit of the
//! FitzHugh-Nagumo travelling-wave system for small `eps`.
//!
//! Both follow the same plan. Four corners where the fast connections meet
//! the slow manifold are located numerically. Short isolating segments are
//! placed at the corners, long chains of segments follow the slow manifold
//! between them, and Poincare maps along the fast connections are shown to
//! cover the segment faces. Every inequality that carries the proof is checked
//! in interval arithmetic; the numerics only choose where to look.

use crate::chain::LongIsolatingSegment;
use crate::cone::{ConeMinors, UnstableManifoldBlock};
use crate::covering::{Face, HSet};
use crate::error::{ProofError, ProofResult};
use crate::frame::{coord_change, LocalFrame};
use crate::interval::{lift, IVector, Interval};
use crate::numerics::{correct_homoclinic_corners, correct_periodic_corners, correct_slow_manifold_point};
use crate::poincare::{MapImages, MidPoincareMap, PoincareMap, SectionAnchor};
use crate::segment::{IsolatingSegment, IsolationHulls};
use crate::settings::{CornerGuesses, HomoclinicSettings, NewtonSettings, PeriodicSettings};
use crate::vector_field::{FhnParameters, VectorField};
use nalgebra::Vector3;
use serde::Serialize;
use tracing::{info, warn};

/// Isolation hulls of one named segment or chain.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub name: String,
    pub hulls: IsolationHulls,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodicReport {
    pub parameters: FhnParameters,
    pub corners: CornerGuesses,
    pub left_map: MapImages,
    pub right_map: MapImages,
    pub segments: Vec<SegmentReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HomoclinicReport {
    /// The parameters the proof holds for, with `theta` widened around the
    /// numerically corrected value.
    pub parameters: FhnParameters,
    pub theta_estimate: f64,
    pub corners: CornerGuesses,
    pub segments: Vec<SegmentReport>,
    pub cone: Option<ConeMinors>,
}

/// The fast jumps go right along the top and left along the bottom.
pub fn check_corner_order(corners: &CornerGuesses) -> ProofResult<()> {
    let [ul, dl, ur, dr] = [
        corners.upper_left,
        corners.lower_left,
        corners.upper_right,
        corners.lower_right,
    ];
    let ordered = ul[0] > dl[0] && ur[0] > dr[0] && ur[2] > ul[2] && dr[2] > dl[2];
    if ordered {
        Ok(())
    } else {
        Err(ProofError::GeometryPrecondition(format!(
            "corner points are not ordered: upper-left {ul:?}, lower-left {dl:?}, upper-right {ur:?}, lower-right {dr:?}"
        )))
    }
}

fn corner_correction_failed(err: anyhow::Error) -> ProofError {
    ProofError::GeometryPrecondition(format!("corner correction failed: {err:#}"))
}

/// `gamma + (0, 0, dv)` with the `v` coordinate kept as an interval.
fn shifted(gamma: &IVector, dv: f64) -> IVector {
    IVector::new(gamma[0], gamma[1], gamma[2] + Interval::point(dv))
}

/// Newton-corrected slow-manifold point at `v = gamma[2] + dv`. The `v`
/// coordinate is kept exactly; on failure the shifted point is used.
fn slow_manifold_point(field: &VectorField, gamma: &Vector3<f64>, dv: f64, newton: NewtonSettings) -> IVector {
    let target = Vector3::new(gamma[0], 0.0, gamma[2] + dv);
    let corrected = correct_slow_manifold_point(field, &target, newton).unwrap_or_else(|err| {
        warn!(error = %err, v = target[2], "slow-manifold correction failed, keeping the guess");
        target
    });
    let mut point = lift(&corrected);
    point[2] = Interval::point(gamma[2]) + Interval::point(dv);
    point
}

/// `[lo - eps, hi + eps]`, rounded outward.
fn padded(interval: Interval, eps: f64) -> (f64, f64) {
    let eps = Interval::point(eps);
    ((interval.lower() - eps).lo(), (interval.upper() + eps).hi())
}

/// The unstable edges of a Poincare image land on opposite sides of the
/// target corner and the image straddles it in the slow direction.
fn check_map_images(images: &MapImages, eps: f64, stage: &str) -> ProofResult<()> {
    let eps = Interval::point(eps);
    let ok = (images.left_u.unstable + eps).certainly_negative()
        && (images.right_u.unstable - eps).certainly_positive()
        && images.all.stable.lo() < 0.0
        && images.all.stable.hi() > 0.0;
    if ok {
        Ok(())
    } else {
        Err(ProofError::CoveringFailure {
            stage: stage.to_string(),
            link: None,
        })
    }
}

/// The strip strictly between the two unstable edges of an image.
fn bracket(images: &MapImages, eps: f64) -> Interval {
    let eps = Interval::point(eps);
    Interval::new(
        (images.left_u.unstable + eps).hi(),
        (images.right_u.unstable - eps).lo(),
    )
}

fn report(name: &str, hulls: IsolationHulls) -> SegmentReport {
    SegmentReport {
        name: name.to_string(),
        hulls,
    }
}

struct Corners {
    upper_left: IVector,
    lower_left: IVector,
    upper_right: IVector,
    lower_right: IVector,
}

impl Corners {
    fn new(corners: &CornerGuesses) -> Self {
        let lifted = |c: &[f64; 3]| lift(&CornerGuesses::vector(c));
        Self {
            upper_left: lifted(&corners.upper_left),
            lower_left: lifted(&corners.lower_left),
            upper_right: lifted(&corners.upper_right),
            lower_right: lifted(&corners.lower_right),
        }
    }
}

struct Frames {
    upper_left: LocalFrame,
    lower_left: LocalFrame,
    upper_right: LocalFrame,
    lower_right: LocalFrame,
}

impl Frames {
    fn new(field: &VectorField, corners: &Corners) -> ProofResult<Self> {
        Ok(Self {
            upper_left: coord_change(field, &corners.upper_left)?,
            lower_left: coord_change(field, &corners.lower_left)?,
            upper_right: coord_change(field, &corners.upper_right)?,
            lower_right: coord_change(field, &corners.lower_right)?,
        })
    }
}

/// Proves the existence of a periodic orbit for every parameter in `params`.
pub fn verify_periodic_orbit(settings: &PeriodicSettings, params: &FhnParameters) -> ProofResult<PeriodicReport> {
    info!(theta = %params.theta, eps = %params.eps, "periodic orbit verification started");
    check_corner_order(&settings.corners)?;
    let corrected = correct_periodic_corners(params.theta.mid(), &settings.corners, settings.shooting, settings.newton)
        .map_err(corner_correction_failed)?;
    check_corner_order(&corrected)?;
    info!(?corrected, "corners corrected");

    let field = VectorField::fitzhugh_nagumo(params)?;
    let corners = Corners::new(&corrected);
    let frames = Frames::new(&field, &corners)?;
    let eps = settings.safety.covering_eps;
    let subdivisions = settings.corner_subdivisions;

    // left fast jump, from the lower-left corner up to the upper-left corner
    let set_dl = HSet::symmetric(settings.set_dl[0], settings.set_dl[1]);
    let left_map = PoincareMap::new(
        &field,
        SectionAnchor::new(corners.lower_left, frames.lower_left),
        SectionAnchor::new(corners.upper_left, frames.upper_left),
        (settings.ru_dl, settings.rs_ul),
        -1.0,
    )
    .with_subdivisions(settings.poincare_subdivisions)
    .with_integrator(settings.integrator);
    let left = left_map.images(&set_dl)?;
    check_map_images(&left, eps, "left Poincare map")?;
    info!(stable = %left.all.stable, unstable = %left.all.unstable, "left Poincare map covers");

    let ul_face = Face::new(Interval::symmetric(settings.rs_ul), bracket(&left, eps));
    let dl_face = Face::new(set_dl.stable, Interval::symmetric(settings.ru_dl));
    let (ul_lo, ul_hi) = padded(left.all.stable, eps);
    let ul = IsolatingSegment::new(
        &field,
        frames.upper_left,
        (shifted(&corners.upper_left, ul_lo), shifted(&corners.upper_left, ul_hi)),
        (ul_face, ul_face),
        subdivisions,
    )?;
    let dl = IsolatingSegment::new(
        &field,
        frames.lower_left,
        (
            shifted(&corners.lower_left, set_dl.unstable.lo()),
            shifted(&corners.lower_left, set_dl.unstable.hi()),
        ),
        (dl_face, dl_face),
        subdivisions,
    )?;

    // right fast jump, from the upper-right corner down to the lower-right corner
    let set_ur = HSet::symmetric(settings.set_ur[0], settings.set_ur[1]);
    let right_map = PoincareMap::new(
        &field,
        SectionAnchor::new(corners.upper_right, frames.upper_right),
        SectionAnchor::new(corners.lower_right, frames.lower_right),
        (settings.ru_ur, settings.rs_dr),
        1.0,
    )
    .with_subdivisions(settings.poincare_subdivisions)
    .with_integrator(settings.integrator);
    let right = right_map.images(&set_ur)?;
    check_map_images(&right, eps, "right Poincare map")?;
    info!(stable = %right.all.stable, unstable = %right.all.unstable, "right Poincare map covers");

    let ur_face = Face::new(set_ur.stable, Interval::symmetric(settings.ru_ur));
    let dr_face = Face::new(Interval::symmetric(settings.rs_dr), bracket(&right, eps));
    let ur = IsolatingSegment::new(
        &field,
        frames.upper_right,
        (
            shifted(&corners.upper_right, set_ur.unstable.lo()),
            shifted(&corners.upper_right, set_ur.unstable.hi()),
        ),
        (ur_face, ur_face),
        subdivisions,
    )?;
    let (dr_lo, dr_hi) = padded(right.all.stable, eps);
    let dr = IsolatingSegment::new(
        &field,
        frames.lower_right,
        (shifted(&corners.lower_right, dr_lo), shifted(&corners.lower_right, dr_hi)),
        (dr_face, dr_face),
        subdivisions,
    )?;

    let (ur_box, dr_box, ul_box, dl_box) = (ur.enclosure(), dr.enclosure(), ul.enclosure(), dl.enclosure());
    if !(ur_box[0].gt(&dr_box[0]) && ul_box[0].gt(&dl_box[0]) && ur_box[2].gt(&ul_box[2]) && dr_box[2].gt(&dl_box[2])) {
        return Err(ProofError::GeometryPrecondition(
            "corner segments are not aligned".to_string(),
        ));
    }

    let mut segments = vec![
        report("upper-left corner segment", ul.verify_isolation("upper-left corner segment")?),
        report("lower-left corner segment", dl.verify_isolation("lower-left corner segment")?),
        report("upper-right corner segment", ur.verify_isolation("upper-right corner segment")?),
        report("lower-right corner segment", dr.verify_isolation("lower-right corner segment")?),
    ];

    let up = LongIsolatingSegment::new(
        &field,
        (*ul.gamma_right(), *ur.gamma_left()),
        (frames.upper_left, frames.upper_right),
        (ul_face, ur_face),
        settings.long_link_subdivisions,
    )
    .with_link_safety(settings.safety.link_safety)
    .with_newton(settings.newton);
    let down = LongIsolatingSegment::new(
        &field,
        (*dl.gamma_right(), *dr.gamma_left()),
        (frames.lower_left, frames.lower_right),
        (dl_face, dr_face),
        settings.long_link_subdivisions,
    )
    .with_link_safety(settings.safety.link_safety)
    .with_newton(settings.newton);

    if !(ul.is_above_diagonal() && up.is_above_diagonal() && ur.is_above_diagonal()) {
        return Err(ProofError::GeometryPrecondition(
            "upper segments reach the diagonal u = v".to_string(),
        ));
    }
    if !(dl.is_below_diagonal() && down.is_below_diagonal() && dr.is_below_diagonal()) {
        return Err(ProofError::GeometryPrecondition(
            "lower segments reach the diagonal u = v".to_string(),
        ));
    }

    for (name, long) in [("upper long segment", &up), ("lower long segment", &down)] {
        let hulls = long.entrance_and_exit_verification(settings.long_links)?;
        hulls.check(name, None)?;
        info!(segment = name, links = settings.long_links, "long segment isolating");
        segments.push(report(name, hulls));
    }

    info!("periodic orbit verified");
    Ok(PeriodicReport {
        parameters: *params,
        corners: corrected,
        left_map: left,
        right_map: right,
        segments,
    })
}

/// Proves the existence of a homoclinic orbit to the equilibrium at the
/// origin for some `theta` in an interval around the numerical estimate and
/// every `eps` in `params.eps`. `params.theta` is only the starting guess.
pub fn verify_homoclinic_orbit(settings: &HomoclinicSettings, params: &FhnParameters) -> ProofResult<HomoclinicReport> {
    info!(theta = %params.theta, eps = %params.eps, "homoclinic orbit verification started");
    check_corner_order(&settings.corners)?;
    let (theta_estimate, mut corrected) =
        correct_homoclinic_corners(params.theta.mid(), &settings.corners, settings.shooting, settings.newton)
            .map_err(corner_correction_failed)?;
    corrected.lower_left = [0.0, 0.0, 0.0];
    corrected.upper_left[2] = 0.0;
    check_corner_order(&corrected)?;

    let theta = Interval::point(theta_estimate) + Interval::new(settings.theta_spread[0], settings.theta_spread[1]);
    let parameters = FhnParameters::new(theta, params.eps);
    info!(theta_estimate, %theta, "theta corrected");

    let field = VectorField::fitzhugh_nagumo(&parameters)?;
    let corners = Corners::new(&corrected);
    let frames = Frames::new(&field, &corners)?;
    let eps = settings.safety.covering_eps;
    let subdivisions = settings.corner_subdivisions;
    let newton = settings.newton;
    let corner_point = |c: &[f64; 3], dv: f64| slow_manifold_point(&field, &CornerGuesses::vector(c), dv, newton);

    // right side: from the upper-right corner down to the lower-right corner
    let set_ur = HSet::symmetric(settings.set_ur[0], settings.set_ur[1]);
    let back_set_dr = HSet::symmetric(settings.back_set_dr[0], settings.back_set_dr[1]);
    let ur_face = Face::new(set_ur.stable, Interval::symmetric(settings.ru_ur));
    let dr_face = Face::new(Interval::symmetric(settings.rs_dr), back_set_dr.unstable);
    let ur = IsolatingSegment::new(
        &field,
        frames.upper_right,
        (
            corner_point(&corrected.upper_right, set_ur.unstable.lo()),
            corner_point(&corrected.upper_right, set_ur.unstable.hi()),
        ),
        (ur_face, ur_face),
        subdivisions,
    )?;
    let dr = IsolatingSegment::new(
        &field,
        frames.lower_right,
        (
            corner_point(&corrected.lower_right, back_set_dr.stable.lo()),
            corner_point(&corrected.lower_right, back_set_dr.stable.hi()),
        ),
        (dr_face, dr_face),
        subdivisions,
    )?;

    let right_map = MidPoincareMap::between_segments(&field, &ur, &dr, 1.0, &settings.mid_section, &settings.shooting)?
        .with_subdivisions(settings.poincare_subdivisions)
        .with_integrator(settings.integrator)
        .with_covering_eps(eps);
    if !right_map.check_covering(&set_ur, &back_set_dr)? {
        return Err(ProofError::CoveringFailure {
            stage: "right mid-section map".to_string(),
            link: None,
        });
    }
    info!("right mid-section map covers");
    let mut segments = vec![
        report("upper-right corner segment", ur.verify_isolation("upper-right corner segment")?),
        report("lower-right corner segment", dr.verify_isolation("lower-right corner segment")?),
    ];

    // left side: from the unstable manifold of the equilibrium up to the upper-left corner
    let set_dl = HSet::symmetric(settings.set_dl[0], settings.set_dl[1]);
    let back_set_ul = HSet::symmetric(settings.back_set_ul[0], settings.back_set_ul[1]);
    let [box_u, box_s, box_v] = settings.stable_manifold_box;
    let ul_face = Face::new(Interval::symmetric(settings.rs_ul), back_set_ul.unstable);
    let unstable_face = Face::new(set_dl.stable, Interval::symmetric(settings.ru_dl));
    let stable_face = Face::symmetric(box_s, box_u);

    let ul = IsolatingSegment::new(
        &field,
        frames.upper_left,
        (
            corner_point(&corrected.upper_left, back_set_ul.stable.lo()),
            corner_point(&corrected.upper_left, back_set_ul.stable.hi()),
        ),
        (ul_face, ul_face),
        subdivisions,
    )?;
    let unstable_block = IsolatingSegment::block(
        &field,
        frames.lower_left,
        (
            corner_point(&corrected.lower_left, set_dl.unstable.lo()),
            corner_point(&corrected.lower_left, set_dl.unstable.hi()),
        ),
        (unstable_face, unstable_face),
        subdivisions,
    )?;
    let stable_block = IsolatingSegment::block(
        &field,
        frames.lower_left,
        (
            corner_point(&corrected.lower_left, -box_v),
            corner_point(&corrected.lower_left, box_v),
        ),
        (stable_face, stable_face),
        subdivisions,
    )?;

    let left_map =
        MidPoincareMap::between_segments(&field, &unstable_block, &ul, -1.0, &settings.mid_section, &settings.shooting)?
            .with_subdivisions(settings.poincare_subdivisions)
            .with_integrator(settings.integrator)
            .with_covering_eps(eps);
    if !left_map.shoot_with_theta(&set_dl, &back_set_ul, "theta")? {
        return Err(ProofError::CoveringFailure {
            stage: "left mid-section map".to_string(),
            link: None,
        });
    }
    info!("left mid-section map brackets the connection in theta");
    segments.push(report("upper-left corner segment", ul.verify_isolation("upper-left corner segment")?));
    segments.push(report("unstable manifold block", unstable_block.verify_isolation("unstable manifold block")?));
    segments.push(report("stable manifold block", stable_block.verify_isolation("stable manifold block")?));

    let cone = match &settings.cone {
        Some(cone) => {
            let block = UnstableManifoldBlock::new(
                &field,
                (cone.delta_s, cone.delta_u, cone.delta_mu),
                cone.u_proportion,
                cone.a,
            )?;
            let hulls = block.block().create_block(subdivisions)?.verify_isolation("cone block")?;
            segments.push(report("cone block", hulls));
            Some(*block.minors())
        }
        None => None,
    };

    let up = LongIsolatingSegment::new(
        &field,
        (*ul.gamma_right(), *ur.gamma_left()),
        (frames.upper_left, frames.upper_right),
        (ul_face, ur_face),
        settings.link_subdivisions,
    )
    .with_link_safety(settings.safety.link_safety)
    .with_newton(newton);
    let down = LongIsolatingSegment::new(
        &field,
        (*stable_block.gamma_right(), *dr.gamma_left()),
        (frames.lower_left, frames.lower_right),
        (stable_face, dr_face),
        settings.link_subdivisions,
    )
    .with_link_safety(settings.safety.link_safety)
    .with_newton(newton);

    if !ul.is_above_diagonal() {
        return Err(ProofError::GeometryPrecondition(
            "upper-left corner segment reaches the diagonal u = v".to_string(),
        ));
    }
    if !dr.is_below_diagonal() {
        return Err(ProofError::GeometryPrecondition(
            "lower-right corner segment reaches the diagonal u = v".to_string(),
        ));
    }

    segments.push(report("upper chain", up.verify_incrementally("upper chain", settings.upper_links)?));
    segments.push(report("lower chain", down.verify_incrementally("lower chain", settings.lower_links)?));

    info!(%theta, "homoclinic orbit verified");
    Ok(HomoclinicReport {
        parameters,
        theta_estimate,
        corners: corrected,
        segments,
        cone,
    })
}
