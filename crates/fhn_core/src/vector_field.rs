//! Three-dimensional vector fields compiled from text definitions of the form
//! `par:theta,eps;var:u,w,v;fun:f1,f2,f3;`.
//!
//! Parameters are stored as intervals and never mutated in place; changing a
//! parameter produces a new field. The field holds no evaluation scratch state,
//! so it is `Sync` and may be shared across rayon workers.

use crate::autodiff::{Dual, Grad};
use crate::equation_engine::{parse, Bytecode, Compiler, OpCode, VM};
use crate::error::FieldError;
use crate::interval::{IMatrix, IVector, Interval};
use crate::traits::{Arith, DynamicalSystem};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// The FitzHugh-Nagumo travelling-wave system in the variables `(u, w, v)`.
pub const FHN_DEFINITION: &str =
    "par:theta,eps;var:u,w,v;fun:w,(2/10)*(theta*w+u*(u-1)*(u-(1/10))+v),(eps/theta)*(u-v);";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FhnParameters {
    pub theta: Interval,
    pub eps: Interval,
}

impl FhnParameters {
    pub fn new(theta: Interval, eps: Interval) -> Self {
        Self { theta, eps }
    }
}

#[derive(Debug, Clone)]
pub struct VectorField {
    equations: Vec<Bytecode>,
    var_names: Vec<String>,
    param_names: Vec<String>,
    params: Vec<Interval>,
}

fn names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits on commas that are not nested inside parentheses.
fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if c == ',' && depth == 0 {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

impl VectorField {
    /// Compiles a definition. All parameters start at zero.
    pub fn parse(definition: &str) -> Result<Self, FieldError> {
        let mut var_names = Vec::new();
        let mut param_names = Vec::new();
        let mut functions = Vec::new();
        for section in definition.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, body) = section
                .split_once(':')
                .ok_or_else(|| FieldError::Syntax(format!("missing `:` in `{section}`")))?;
            match key.trim() {
                "par" => param_names = names(body),
                "var" => var_names = names(body),
                "fun" => functions = split_top_level(body),
                other => return Err(FieldError::Syntax(format!("unknown section `{other}`"))),
            }
        }
        if var_names.len() != 3 || functions.len() != 3 {
            return Err(FieldError::Dimension {
                variables: var_names.len(),
                functions: functions.len(),
            });
        }

        let compiler = Compiler::new(&var_names, &param_names);
        let equations = functions
            .iter()
            .map(|src| {
                let expr = parse(src).map_err(FieldError::Syntax)?;
                compiler.compile(&expr)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let params = vec![Interval::point(0.0); param_names.len()];
        Ok(Self {
            equations,
            var_names,
            param_names,
            params,
        })
    }

    pub fn fitzhugh_nagumo(params: &FhnParameters) -> Result<Self, FieldError> {
        Self::parse(FHN_DEFINITION)?
            .with_parameter("theta", params.theta)?
            .with_parameter("eps", params.eps)
    }

    pub fn dimension(&self) -> usize {
        self.equations.len()
    }

    pub fn variable_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn parameter(&self, name: &str) -> Option<Interval> {
        self.param_names
            .iter()
            .position(|p| p == name)
            .map(|idx| self.params[idx])
    }

    /// A copy of the field with one parameter replaced.
    pub fn with_parameter(&self, name: &str, value: Interval) -> Result<Self, FieldError> {
        let idx = self
            .param_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| FieldError::UnknownParameter(name.to_string()))?;
        let mut field = self.clone();
        field.params[idx] = value;
        Ok(field)
    }

    /// The field `-f`, whose flow is the time reversal of this one.
    pub fn reversed(&self) -> Self {
        let mut field = self.clone();
        for eq in &mut field.equations {
            eq.ops.push(OpCode::Neg);
        }
        field
    }

    /// Evaluates the field over any `Arith` type.
    pub fn eval<T: Arith>(&self, x: &[T], out: &mut [T]) {
        let params: Vec<T> = self.params.iter().map(|p| T::parameter(*p)).collect();
        let mut stack = Vec::with_capacity(32);
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, x, &params, &mut stack);
        }
    }

    /// Natural interval extension of the field over a box.
    pub fn value(&self, x: &IVector) -> IVector {
        let mut out = [Interval::point(0.0); 3];
        self.eval(x.as_slice(), &mut out);
        IVector::from(out)
    }

    /// Enclosure of the Jacobian over a box.
    pub fn jacobian(&self, x: &IVector) -> IMatrix {
        let seeds = [
            Grad::<3>::variable(x[0], 0),
            Grad::<3>::variable(x[1], 1),
            Grad::<3>::variable(x[2], 2),
        ];
        let mut out = [Grad::<3>::constant(0.0); 3];
        self.eval(&seeds, &mut out);
        IMatrix::from_fn(|i, j| out[i].grad[j])
    }

    pub fn value_at(&self, x: &Vector3<f64>) -> Vector3<f64> {
        let mut out = [0.0; 3];
        self.eval(x.as_slice(), &mut out);
        Vector3::from(out)
    }

    pub fn jacobian_at(&self, x: &Vector3<f64>) -> Matrix3<f64> {
        let mut jacobian = Matrix3::zeros();
        let mut out = [Dual::constant(0.0); 3];
        for j in 0..3 {
            let seeds: Vec<Dual> = (0..3)
                .map(|i| Dual::new(x[i], if i == j { 1.0 } else { 0.0 }))
                .collect();
            self.eval(&seeds, &mut out);
            for i in 0..3 {
                jacobian[(i, j)] = out[i].eps;
            }
        }
        jacobian
    }

    /// Enclosure of `f` over the set `center + basis * local`, where `center`
    /// and `basis` may themselves be thin intervals.
    ///
    /// Mean value form around the image of the box midpoint, intersected with
    /// the natural extension on the box hull.
    pub fn enclose_affine(&self, center: &IVector, basis: &IMatrix, local: &IVector) -> IVector {
        let hull = center + basis * local;
        let natural = self.value(&hull);

        let center_mid = center.map(|c| Interval::point(c.mid()));
        let local_mid = local.map(|c| Interval::point(c.mid()));
        let anchor = center_mid + basis * local_mid;
        let region = crate::interval::hull_vector(&hull, &anchor);
        let jacobian = self.jacobian(&region);
        let spread = center - center_mid;
        let offset = local - local_mid;
        let mean_value =
            self.value(&anchor) + jacobian * spread + (jacobian * basis) * offset;

        natural.zip_map(&mean_value, |a, b| a.intersection(&b).unwrap_or(a))
    }
}

impl<T: Arith> DynamicalSystem<T> for VectorField {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        self.eval(x, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::lift;

    fn fhn(theta: f64, eps: f64) -> VectorField {
        VectorField::fitzhugh_nagumo(&FhnParameters::new(
            Interval::point(theta),
            Interval::point(eps),
        ))
        .expect("built-in definition compiles")
    }

    #[test]
    fn evaluates_fitzhugh_nagumo() {
        let field = fhn(0.61, 1e-4);
        let x = Vector3::new(0.5, 0.1, 0.2);
        let value = field.value_at(&x);
        let cubic = 0.5 * (0.5 - 1.0) * (0.5 - 0.1);
        assert!((value[0] - 0.1).abs() < 1e-15);
        assert!((value[1] - 0.2 * (0.61 * 0.1 + cubic + 0.2)).abs() < 1e-15);
        assert!((value[2] - 1e-4 / 0.61 * (0.5 - 0.2)).abs() < 1e-18);

        let enclosure = field.value(&lift(&x));
        for i in 0..3 {
            assert!(enclosure[i].contains(value[i]), "component {i}");
        }
    }

    #[test]
    fn with_parameter_is_immutable_and_checked() {
        let field = fhn(0.61, 0.0);
        let wider = field
            .with_parameter("eps", Interval::new(0.0, 1e-4))
            .expect("eps exists");
        assert_eq!(field.parameter("eps"), Some(Interval::point(0.0)));
        assert_eq!(wider.parameter("eps"), Some(Interval::new(0.0, 1e-4)));
        assert!(matches!(
            field.with_parameter("mu", Interval::point(1.0)),
            Err(FieldError::UnknownParameter(name)) if name == "mu"
        ));
    }

    #[test]
    fn reversed_field_negates() {
        let field = fhn(0.61, 1e-4);
        let x = Vector3::new(0.3, -0.2, 0.05);
        let forward = field.value_at(&x);
        let backward = field.reversed().value_at(&x);
        assert!((forward + backward).norm() < 1e-16);
    }

    #[test]
    fn interval_jacobian_encloses_dual_jacobian() {
        let field = fhn(0.61, 1e-4);
        let x = Vector3::new(0.4, 0.1, 0.02);
        let exact = field.jacobian_at(&x);
        let box_ = lift(&x).map(|c| c + Interval::symmetric(1e-6));
        let enclosure = field.jacobian(&box_);
        for i in 0..3 {
            for j in 0..3 {
                assert!(enclosure[(i, j)].contains(exact[(i, j)]), "entry ({i}, {j})");
            }
        }
    }

    #[test]
    fn affine_enclosure_contains_samples() {
        let field = fhn(0.61, 1e-4);
        let center = lift(&Vector3::new(0.9, 0.0, 0.1));
        let basis = crate::interval::lift_matrix(&Matrix3::new(
            -0.8, -0.6, 0.0, 0.6, -0.8, 0.0, 0.0, 0.0, 1.0,
        ));
        let local = IVector::new(
            Interval::new(-1e-2, 1e-2),
            Interval::new(-2e-2, 2e-2),
            Interval::new(0.0, 1e-2),
        );
        let enclosure = field.enclose_affine(&center, &basis, &local);
        for &(a, b, c) in &[(-5e-3, 1.5e-2, 2e-3), (8e-3, -1e-2, 9e-3), (0.0, 0.0, 5e-3)] {
            let x = Vector3::new(0.9 - 0.8 * a - 0.6 * b, 0.6 * a - 0.8 * b, 0.1 + c);
            let value = field.value_at(&x);
            for i in 0..3 {
                assert!(enclosure[i].contains(value[i]), "component {i} at ({a}, {b}, {c})");
            }
        }
    }

    #[test]
    fn rejects_wrong_dimension() {
        assert!(matches!(
            VectorField::parse("var:x,y;fun:y,x;"),
            Err(FieldError::Dimension { variables: 2, functions: 2 })
        ));
    }
}
