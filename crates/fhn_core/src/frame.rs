//! Local coordinates adapted to the fast-slow splitting.
//!
//! At a point of the critical manifold the columns of `P` are the contracting
//! and expanding eigenvectors of the fast `(u, w)` block of the Jacobian,
//! followed by the slow axis `e_v`. Local coordinates `(s, u, v)` of a point
//! `x` near `gamma` are `P^{-1} (x - gamma)`.

use crate::error::{ProofError, ProofResult};
use crate::interval::{inverse, lift_matrix, midpoint, IMatrix, IVector};
use crate::numerics::eigenvector_2x2;
use crate::vector_field::VectorField;
use nalgebra::{Matrix2, Matrix3, Vector2};
use num_complex::Complex;
use tracing::warn;

/// A change of coordinates `P` together with a rigorous enclosure of its
/// inverse.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    p: IMatrix,
    p_inv: IMatrix,
}

impl LocalFrame {
    pub fn new(p: IMatrix) -> ProofResult<Self> {
        let p_inv = inverse(&p).ok_or_else(|| {
            ProofError::GeometryPrecondition(
                "coordinate change is singular or too close to singular".to_string(),
            )
        })?;
        Ok(Self { p, p_inv })
    }

    pub fn identity() -> Self {
        Self {
            p: IMatrix::identity(),
            p_inv: IMatrix::identity(),
        }
    }

    pub fn p(&self) -> &IMatrix {
        &self.p
    }

    pub fn p_inv(&self) -> &IMatrix {
        &self.p_inv
    }

    /// `P^{-T}`, which carries normals given in local coordinates to global ones.
    pub fn normal_transform(&self) -> IMatrix {
        self.p_inv.transpose()
    }

    /// `other.P^{-1} * self.P`, the change from these local coordinates to the
    /// local coordinates of `other`.
    pub fn transition_to(&self, other: &LocalFrame) -> IMatrix {
        other.p_inv * self.p
    }

    pub fn to_global(&self, origin: &IVector, local: &IVector) -> IVector {
        origin + self.p * local
    }

    pub fn to_local(&self, origin: &IVector, x: &IVector) -> IVector {
        self.p_inv * (x - origin)
    }
}

/// Floating point coordinate change at (the midpoint of) `gamma`.
///
/// Column 0 is the eigenvector of the more negative eigenvalue of the fast
/// block, column 1 the other one; both have unit length and a non-positive `u`
/// entry. Complex eigenvalues are replaced by their real parts with a warning,
/// which usually yields a singular matrix that [`LocalFrame::new`] rejects.
pub fn coord_change_matrix(field: &VectorField, gamma: &IVector) -> Matrix3<f64> {
    let jacobian = field.jacobian_at(&midpoint(gamma));
    let fast: Matrix2<f64> = jacobian.fixed_view::<2, 2>(0, 0).into_owned();
    let eigenvalues: Vec<Complex<f64>> = fast.complex_eigenvalues().iter().copied().collect();
    if eigenvalues.iter().any(|lambda| lambda.im != 0.0) {
        warn!(?eigenvalues, "complex eigenvalues in the fast block, using real parts");
    }
    let (first, second) = (eigenvalues[0].re, eigenvalues[1].re);
    let (contracting, expanding) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };

    let column = |lambda: f64, fallback: Vector2<f64>| {
        let v = eigenvector_2x2(&fast, lambda).unwrap_or(fallback);
        if v[0] > 0.0 {
            -v
        } else {
            v
        }
    };
    let s = column(contracting, Vector2::x());
    let u = column(expanding, Vector2::y());

    Matrix3::new(s[0], u[0], 0.0, s[1], u[1], 0.0, 0.0, 0.0, 1.0)
}

pub fn coord_change(field: &VectorField, gamma: &IVector) -> ProofResult<LocalFrame> {
    LocalFrame::new(lift_matrix(&coord_change_matrix(field, gamma)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{lift, Interval};
    use crate::vector_field::FhnParameters;
    use nalgebra::Vector3;

    fn fhn() -> VectorField {
        VectorField::fitzhugh_nagumo(&FhnParameters::new(
            Interval::point(0.61),
            Interval::point(1e-4),
        ))
        .expect("built-in definition compiles")
    }

    #[test]
    fn columns_are_fast_eigenvectors() {
        let field = fhn();
        let gamma = Vector3::new(0.970345591417269, 0.0, 0.0250442158334208);
        let p = coord_change_matrix(&field, &lift(&gamma));
        let jacobian = field.jacobian_at(&gamma);
        let fast: Matrix2<f64> = jacobian.fixed_view::<2, 2>(0, 0).into_owned();

        let mut rates = Vec::new();
        for k in 0..2 {
            let column = Vector2::new(p[(0, k)], p[(1, k)]);
            assert!((column.norm() - 1.0).abs() < 1e-12);
            assert!(column[0] <= 0.0);
            let image = fast * column;
            // parallel to the column
            assert!((image[0] * column[1] - image[1] * column[0]).abs() < 1e-10);
            rates.push(image.dot(&column));
        }
        assert!(rates[0] < 0.0 && rates[1] > 0.0);
        assert_eq!(p[(2, 2)], 1.0);
        assert_eq!(p[(2, 0)], 0.0);
        assert_eq!(p[(0, 2)], 0.0);
    }

    #[test]
    fn frame_inverse_encloses_identity() {
        let field = fhn();
        let frame = coord_change(&field, &lift(&Vector3::new(-0.108, 0.0, 0.025)))
            .expect("saddle point gives a regular frame");
        let product = frame.p_inv() * frame.p();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(product[(i, j)].contains(expected), "entry ({i}, {j})");
                assert!(product[(i, j)].width() < 1e-12);
            }
        }

        let origin = lift(&Vector3::new(-0.108, 0.0, 0.025));
        let local = IVector::new(Interval::point(1e-3), Interval::point(-2e-3), Interval::point(0.0));
        let back = frame.to_local(&origin, &frame.to_global(&origin, &local));
        for i in 0..3 {
            assert!(back[i].contains(local[i].mid()));
        }
    }

    #[test]
    fn transition_between_equal_frames_is_identity() {
        let frame = coord_change(&fhn(), &lift(&Vector3::new(0.84, 0.0, 0.098)))
            .expect("regular frame");
        let transition = frame.transition_to(&frame);
        assert!(transition[(0, 0)].contains(1.0));
        assert!(transition[(1, 0)].contains(0.0));
        assert!(transition[(2, 2)].contains(1.0));
    }

    #[test]
    fn rotation_block_yields_singular_frame() {
        let field = VectorField::parse("var:u,w,v;fun:w,-u,0;").expect("valid definition");
        let result = coord_change(&field, &lift(&Vector3::zeros()));
        assert!(matches!(result, Err(ProofError::GeometryPrecondition(_))));
    }
}
