//! Cone conditions on a small block around the lower-left equilibrium.
//!
//! The block is `InvCB [-1, 1]^3` where the columns of `InvCB` are the fast
//! eigenvectors scaled by `delta_s`, `delta_u` and the tangent `(-1/a, 0, 1)`
//! of the slow manifold scaled by `delta_mu`. With `Q = diag(-1, 1, -1)` the
//! cone condition asks that the symmetric part of `Q CB Df CB^{-1}` be
//! positive definite on the whole block. The slow row is taken from the field
//! with `eps = 1`, so the check does not degenerate as `eps -> 0`.

use crate::covering::Face;
use crate::error::{ConeCheck, ProofError, ProofResult};
use crate::frame::{coord_change_matrix, LocalFrame};
use crate::interval::{determinant, inverse, lift_matrix, midpoint_matrix, IMatrix, IVector, Interval};
use crate::segment::IsolatingSegment;
use crate::vector_field::VectorField;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Leading principal minors of the symmetrised cone matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeMinors {
    pub first: Interval,
    pub second: Interval,
    pub determinant: Interval,
}

#[derive(Debug, Clone)]
pub struct ConeBlock<'f> {
    field: &'f VectorField,
    unit_slow: VectorField,
    delta_s: f64,
    delta_u: f64,
    cb: IMatrix,
    inv_cb: IMatrix,
}

fn unit_box() -> IVector {
    IVector::repeat(Interval::new(-1.0, 1.0))
}

impl<'f> ConeBlock<'f> {
    /// `sizes` are `(delta_s, delta_u, delta_mu)`. The field must have an
    /// `eps` parameter.
    pub fn new(field: &'f VectorField, (delta_s, delta_u, delta_mu): (f64, f64, f64), a: f64) -> ProofResult<Self> {
        let unit_slow = field.with_parameter("eps", Interval::point(1.0))?;

        let mut m = coord_change_matrix(field, &IVector::zeros());
        m[(0, 2)] = -1.0 / a;
        m[(1, 2)] = 0.0;
        m[(2, 0)] = 0.0;
        m[(2, 1)] = 0.0;
        m[(2, 2)] = 1.0;
        let scaled = m * Matrix3::from_diagonal(&Vector3::new(delta_s, delta_u, delta_mu));
        let mut cb = scaled.try_inverse().ok_or_else(|| {
            ProofError::GeometryPrecondition("cone block coordinates are singular".to_string())
        })?;
        cb[(2, 0)] = 0.0;
        cb[(2, 1)] = 0.0;
        let cb = lift_matrix(&cb);
        let inv_cb = inverse(&cb).ok_or_else(|| {
            ProofError::GeometryPrecondition("cone block coordinates are singular".to_string())
        })?;

        Ok(Self {
            field,
            unit_slow,
            delta_s,
            delta_u,
            cb,
            inv_cb,
        })
    }

    pub fn cb(&self) -> &IMatrix {
        &self.cb
    }

    pub fn inv_cb(&self) -> &IMatrix {
        &self.inv_cb
    }

    /// Encloses `CB f(CB^{-1} x)` over the box `x`: the natural extension
    /// intersected with the mean value form taken in the block coordinates.
    pub fn evaluate_vf_in_new_variables(&self, x: &IVector) -> IVector {
        let center = x.map(|c| Interval::point(c.mid()));
        let natural = self.cb * self.field.value(&(self.inv_cb * x));
        let derivative = self.cb * self.field.jacobian(&(self.inv_cb * x)) * self.inv_cb;
        let mean_value =
            self.cb * self.field.value(&(self.inv_cb * center)) + derivative * (x - center);
        natural.zip_map(&mean_value, |a, b| a.intersection(&b).unwrap_or(a))
    }

    /// `Q CB Df(CB^{-1} x) CB^{-1}`, with the slow row evaluated at `eps = 1`.
    pub fn q_eps_dfc(&self, x: &IVector) -> IMatrix {
        let region = self.inv_cb * x;
        let mut q = self.cb * self.field.jacobian(&region) * self.inv_cb;
        let slow = self.cb * self.unit_slow.jacobian(&region) * self.inv_cb;
        for j in 0..3 {
            q[(0, j)] = -q[(0, j)];
            q[(2, j)] = -slow[(2, j)];
        }
        q
    }

    pub fn cone_minors(&self) -> ConeMinors {
        let q = self.q_eps_dfc(&unit_box());
        let sym = q + q.transpose();
        ConeMinors {
            first: sym[(0, 0)],
            second: sym[(0, 0)] * sym[(1, 1)] - sym[(0, 1)] * sym[(1, 0)],
            determinant: determinant(&sym),
        }
    }

    pub fn cone_conditions_verification(&self) -> ProofResult<ConeMinors> {
        let minors = self.cone_minors();
        debug!(first = %minors.first, second = %minors.second, determinant = %minors.determinant, "cone minors");
        for (check, value) in [
            (ConeCheck::FirstMinor, minors.first),
            (ConeCheck::SecondMinor, minors.second),
            (ConeCheck::Determinant, minors.determinant),
        ] {
            if !value.certainly_positive() {
                return Err(ProofError::ConeConditionFailure { check, value });
            }
        }
        Ok(minors)
    }

    /// The face of the block on its unstable side, `CB^{-1} ([-1, 1], 1, [-1, 1])`.
    pub fn enclosure_unstable_manifold(&self) -> IVector {
        let face = IVector::new(Interval::new(-1.0, 1.0), Interval::point(1.0), Interval::new(-1.0, 1.0));
        self.inv_cb * face
    }

    /// The fast eigenframe at the equilibrium, with `e_v` as slow axis.
    pub fn p_stable_manifold(&self) -> IMatrix {
        let mut p = midpoint_matrix(&self.inv_cb);
        p[(0, 2)] = 0.0;
        p[(1, 2)] = 0.0;
        p[(2, 0)] = 0.0;
        p[(2, 1)] = 0.0;
        p[(2, 2)] = 1.0;
        lift_matrix(&(p * Matrix3::from_diagonal(&Vector3::new(1.0 / self.delta_s, 1.0 / self.delta_u, 1.0))))
    }

    pub fn gamma_right_stable_manifold(&self) -> IVector {
        self.inv_cb * IVector::new(Interval::point(0.0), Interval::point(0.0), Interval::point(1.0))
    }

    pub fn gamma_left_stable_manifold(&self) -> IVector {
        self.inv_cb * IVector::new(Interval::point(0.0), Interval::point(0.0), Interval::point(-1.0))
    }

    pub fn face_stable_manifold(&self) -> Face {
        Face::symmetric(self.delta_s, self.delta_u)
    }

    /// The block as an isolating block along the slow manifold tangent.
    pub fn create_block(&self, subdivisions: usize) -> ProofResult<IsolatingSegment<'f>> {
        let face = self.face_stable_manifold();
        IsolatingSegment::block(
            self.field,
            LocalFrame::new(self.p_stable_manifold())?,
            (self.gamma_left_stable_manifold(), self.gamma_right_stable_manifold()),
            (face, face),
            subdivisions,
        )
    }
}

/// A cone block together with the check that, away from a thin slab around
/// the stable direction, the flow leaves through the unstable side.
#[derive(Debug, Clone)]
pub struct UnstableManifoldBlock<'f> {
    block: ConeBlock<'f>,
    minors: ConeMinors,
    unstable_flow: Interval,
}

impl<'f> UnstableManifoldBlock<'f> {
    pub fn new(
        field: &'f VectorField,
        (delta_s, delta_u, delta_mu): (f64, f64, f64),
        u_proportion: f64,
        a: f64,
    ) -> ProofResult<Self> {
        let block = ConeBlock::new(field, (delta_s, delta_u, delta_mu), a)?;
        let short = ConeBlock::new(field, (delta_s, delta_u * u_proportion, delta_mu), a)?;
        let minors = short.cone_conditions_verification()?;

        let outer = IVector::new(
            Interval::new(-1.0, 1.0),
            Interval::new(u_proportion, 1.0),
            Interval::new(-1.0, 1.0),
        );
        let unstable_flow = block.evaluate_vf_in_new_variables(&outer)[1];
        if !unstable_flow.certainly_positive() {
            return Err(ProofError::ConeConditionFailure {
                check: ConeCheck::UnstableFlow,
                value: unstable_flow,
            });
        }
        info!(%unstable_flow, "cone block verified");
        Ok(Self {
            block,
            minors,
            unstable_flow,
        })
    }

    pub fn block(&self) -> &ConeBlock<'f> {
        &self.block
    }

    pub fn minors(&self) -> &ConeMinors {
        &self.minors
    }

    pub fn unstable_flow(&self) -> Interval {
        self.unstable_flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_field::FhnParameters;

    fn fhn(theta: f64) -> VectorField {
        VectorField::fitzhugh_nagumo(&FhnParameters::new(
            Interval::point(theta),
            Interval::new(0.0, 1e-4),
        ))
        .expect("built-in definition compiles")
    }

    #[test]
    fn small_balanced_block_satisfies_cone_conditions() {
        for theta in [0.61, 1.2649110640675] {
            let field = fhn(theta);
            let block = ConeBlock::new(&field, (1e-4, 1e-4, 1e-4), 0.1).expect("regular block");
            let minors = block.cone_conditions_verification().expect("cone conditions hold");
            assert!(minors.first.certainly_positive());
            assert!(minors.determinant.certainly_positive());
        }
    }

    #[test]
    fn flat_slow_direction_breaks_the_determinant() {
        let field = fhn(1.2649110640675);
        let block = ConeBlock::new(&field, (1e-4, 1e-4, 1e-5), 0.1).expect("regular block");
        assert!(matches!(
            block.cone_conditions_verification(),
            Err(ProofError::ConeConditionFailure {
                check: ConeCheck::Determinant,
                ..
            })
        ));

        let large = ConeBlock::new(&field, (1e-2, 1e-2, 1e-2), 0.1).expect("regular block");
        assert!(large.cone_conditions_verification().is_err());
    }

    #[test]
    fn unstable_side_is_exited() {
        let field = fhn(1.2649110640675);
        let block = UnstableManifoldBlock::new(&field, (1e-4, 1e-4, 1e-4), 0.3, 0.1)
            .expect("cone block verifies");
        assert!(block.unstable_flow().certainly_positive());
        assert!(block.minors().second.certainly_positive());
    }

    #[test]
    fn block_geometry_follows_the_slow_tangent() {
        let field = fhn(1.2649110640675);
        let block = ConeBlock::new(&field, (1e-4, 1e-4, 1e-4), 0.1).expect("regular block");
        let right = block.gamma_right_stable_manifold();
        assert!((right[0].mid() + 1e-3).abs() < 1e-15 && right[0].width() < 1e-15);
        assert!((right[2].mid() - 1e-4).abs() < 1e-16);

        let p = block.p_stable_manifold();
        for k in 0..2 {
            let norm = (p[(0, k)].mid().powi(2) + p[(1, k)].mid().powi(2)).sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
        assert_eq!(p[(2, 2)], Interval::point(1.0));

        let segment = block.create_block(2).expect("slow flow points inward");
        assert!((segment.gamma_left()[0].mid() - 1e-3).abs() < 1e-15);
        assert!((block.enclosure_unstable_manifold()[2].hi() - 1e-4).abs() < 1e-16);
    }
}
