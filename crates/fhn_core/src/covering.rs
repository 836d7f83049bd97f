//! h-sets in the `(s, u)` plane of a local frame and the covering relation
//! between them.

use crate::interval::{dot, lift, midpoint, IMatrix, IVector, Interval};
use nalgebra::{Matrix2, Vector3};
use serde::{Deserialize, Serialize};

/// A box `stable x unstable` in the fast coordinates of a local frame.
///
/// Also used for the two-dimensional sets fed to the Poincare maps, where the
/// second coordinate is a slow (`v`) radius or a section coordinate; the field
/// names follow the covering convention, where `unstable` is the exit
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HSet {
    pub stable: Interval,
    pub unstable: Interval,
}

/// A face of an isolating segment: the same box, attached to one end.
pub type Face = HSet;

impl HSet {
    pub fn new(stable: Interval, unstable: Interval) -> Self {
        Self { stable, unstable }
    }

    /// `[-rs, rs] x [-ru, ru]`.
    pub fn symmetric(rs: f64, ru: f64) -> Self {
        Self::new(Interval::symmetric(rs), Interval::symmetric(ru))
    }

    /// The edge where the unstable coordinate takes its lower bound.
    pub fn left_u(&self) -> Self {
        Self::new(self.stable, self.unstable.lower())
    }

    pub fn right_u(&self) -> Self {
        Self::new(self.stable, self.unstable.upper())
    }

    pub fn left_s(&self) -> Self {
        Self::new(self.stable.lower(), self.unstable)
    }

    pub fn right_s(&self) -> Self {
        Self::new(self.stable.upper(), self.unstable)
    }

    /// Stretches the stable interval by `factor` and shrinks the unstable one
    /// by the same factor.
    pub fn shrink_and_expand(&self, factor: f64) -> Self {
        let factor = Interval::point(factor);
        Self::new(self.stable * factor, self.unstable / factor)
    }

    /// `(stable, unstable, 0)`.
    pub fn embed(&self) -> IVector {
        IVector::new(self.stable, self.unstable, Interval::point(0.0))
    }

    pub fn hull(&self, other: &HSet) -> Self {
        Self::new(self.stable.hull(&other.stable), self.unstable.hull(&other.unstable))
    }

    pub fn contains_zero(&self) -> bool {
        self.stable.contains_zero() && self.unstable.contains_zero()
    }

    /// `m * (stable, unstable)`.
    pub fn transform(&self, m: &Matrix2<Interval>) -> Self {
        Self::new(
            m[(0, 0)] * self.stable + m[(0, 1)] * self.unstable,
            m[(1, 0)] * self.stable + m[(1, 1)] * self.unstable,
        )
    }
}

/// The `(s, u)` block of a 3x3 matrix.
pub fn fast_block(m: &IMatrix) -> Matrix2<Interval> {
    m.fixed_view::<2, 2>(0, 0).into_owned()
}

/// Checks that `m * set` covers `target`: the left unstable edge of `set` maps
/// strictly below the unstable range of `target`, the right edge strictly
/// above it, and the whole set maps strictly inside its stable range.
pub fn is_covering(set: &HSet, m: &Matrix2<Interval>, target: &HSet) -> bool {
    let left = set.left_u().transform(m);
    let right = set.right_u().transform(m);
    let all = set.transform(m);
    left.unstable.lt(&target.unstable)
        && right.unstable.gt(&target.unstable)
        && all.stable.subset_interior(&target.stable)
}

/// Replaces every column except `k` by its midpoint with the component along
/// column `k` removed.
pub fn orthogonalize_relative_column(m: &mut IMatrix, k: usize) {
    let pivot: IVector = m.column(k).into_owned();
    let norm = dot(&pivot, &pivot);
    for j in (0..3).filter(|&j| j != k) {
        let column: Vector3<f64> = midpoint(&m.column(j).into_owned());
        let column = lift(&column);
        let projected = column - pivot * (dot(&column, &pivot) / norm);
        m.set_column(j, &projected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(a: f64, b: f64) -> Matrix2<Interval> {
        Matrix2::new(
            Interval::point(a),
            Interval::point(0.0),
            Interval::point(0.0),
            Interval::point(b),
        )
    }

    #[test]
    fn hyperbolic_map_covers_shrunk_copy() {
        let set = HSet::symmetric(1.0, 1.0);
        for factor in [1.1, 1.5, 3.0] {
            assert!(is_covering(&set, &diag(1.0, 1.0), &set.shrink_and_expand(factor)), "factor {factor}");
        }
        for factor in [0.5, 0.9, 1.0] {
            assert!(!is_covering(&set, &diag(1.0, 1.0), &set.shrink_and_expand(factor)), "factor {factor}");
        }
        assert!(is_covering(&set, &diag(0.5, 2.0), &set));
        assert!(!is_covering(&set, &diag(2.0, 2.0), &set));
    }

    #[test]
    fn reversed_unstable_orientation_does_not_cover() {
        let set = HSet::symmetric(1.0, 1.0);
        let flip = diag(0.5, -2.0);
        let left = set.left_u().transform(&flip);
        assert!(left.unstable.gt(&set.unstable));
        assert!(!is_covering(&set, &flip, &set));
        assert!(!is_covering(&set, &diag(-0.5, -2.0), &set));
        // flipping the stable direction alone keeps the covering
        assert!(is_covering(&set, &diag(-0.5, 2.0), &set));
    }

    #[test]
    fn inverse_factor_undoes_shrink_and_expand() {
        let set = HSet::new(Interval::new(-0.3, 0.7), Interval::new(-2.0, 1.5));
        let k = 3.0;
        let round_trip = set.shrink_and_expand(k).shrink_and_expand(1.0 / k);
        assert!(round_trip.stable.contains_interval(&set.stable));
        assert!(round_trip.unstable.contains_interval(&set.unstable));
        assert!((round_trip.unstable.lo() - set.unstable.lo()).abs() < 1e-14);
        assert!((round_trip.unstable.hi() - set.unstable.hi()).abs() < 1e-14);
        assert!(round_trip.stable.width() - set.stable.width() < 1e-14);

        // the same factor twice is not the identity
        let twice = set.shrink_and_expand(k).shrink_and_expand(k);
        assert!(twice.stable.contains(0.7 * k * k - 1e-9));
        assert!(twice.unstable.hi() < set.unstable.hi() / (k * k) + 1e-14);
        assert!(!twice.unstable.contains(set.unstable.hi()));
    }

    #[test]
    fn coverings_compose() {
        let a = HSet::symmetric(1.0, 1.0);
        let b = HSet::symmetric(0.8, 1.5);
        let c = HSet::symmetric(0.7, 2.0);
        let first = diag(0.5, 2.0);
        let second = diag(0.8, 1.5);
        assert!(is_covering(&a, &first, &b));
        assert!(is_covering(&b, &second, &c));
        assert!(is_covering(&a, &(second * first), &c));
    }

    #[test]
    fn shear_in_unstable_direction_can_break_covering() {
        let set = HSet::symmetric(1.0, 1.0);
        let shear = Matrix2::new(
            Interval::point(0.5),
            Interval::point(0.8),
            Interval::point(0.0),
            Interval::point(2.0),
        );
        assert!(!is_covering(&set, &shear, &set));
    }

    #[test]
    fn edges_and_embedding() {
        let set = HSet::new(Interval::new(-1.0, 2.0), Interval::new(3.0, 4.0));
        assert_eq!(set.left_u().unstable, Interval::point(3.0));
        assert_eq!(set.right_s().stable, Interval::point(2.0));
        let embedded = set.embed();
        assert_eq!(embedded[2], Interval::point(0.0));
        assert!(!set.contains_zero());
    }

    #[test]
    fn orthogonalized_columns_are_normal_to_pivot() {
        let mut m = crate::interval::lift_matrix(&nalgebra::Matrix3::new(
            1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.2, 0.0, 1.0,
        ));
        orthogonalize_relative_column(&mut m, 1);
        let pivot: IVector = m.column(1).into_owned();
        for j in [0, 2] {
            let column: IVector = m.column(j).into_owned();
            let product = dot(&column, &pivot);
            assert!(product.contains(0.0) && product.width() < 1e-14, "column {j}");
        }
    }
}
