pub mod autodiff;
pub mod chain;
pub mod cone;
pub mod covering;
pub mod equation_engine;
pub mod error;
pub mod flow;
pub mod frame;
pub mod interval;
pub mod numerics;
pub mod poincare;
pub mod proof;
pub mod segment;
pub mod settings;
pub mod solvers;
pub mod taylor;
/// The `fhn_core` crate checks the existence of periodic and homoclinic
/// travelling waves of the FitzHugh-Nagumo system for small `eps` with
/// interval arithmetic.
///
/// Key components:
/// - **Interval**: outward-rounded intervals, `IVector`/`IMatrix` and the small linear algebra on them.
/// - **Equation Engine**: the bytecode VM that evaluates the vector field over `f64`, duals, intervals and Taylor jets.
/// - **Flow**: a rigorous Taylor integrator and the first-hit Poincare operator on affine sections.
/// - **Segments**: isolating segments, blocks and chains of segments along the slow manifold.
/// - **Poincare / Covering**: direct and mid-section maps with the covering checks on h-sets.
/// - **Cone**: cone conditions on a block around the equilibrium.
/// - **Proof**: the periodic and homoclinic orchestration on top of floating point corner corrections.
pub mod traits;
pub mod vector_field;

pub use error::{ProofError, ProofResult};
pub use interval::Interval;
pub use proof::{verify_homoclinic_orbit, verify_periodic_orbit, HomoclinicReport, PeriodicReport};
pub use settings::{HomoclinicSettings, PeriodicSettings};
pub use vector_field::{FhnParameters, VectorField};
