//! Tunable constants of the proofs. Every struct deserializes with
//! `#[serde(default)]`, so a configuration file only needs the fields it
//! changes; the defaults are the published values.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Newton iteration controls for the non-rigorous slow-manifold correction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

/// Taylor integrator controls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub order: usize,
    pub step: f64,
    pub min_step: f64,
    pub max_time: f64,
    /// Number of sub-times a step is split into when it may cross a section.
    pub crossing_pieces: usize,
    /// Bisection depth applied to a sub-time whose enclosure straddles the section.
    pub refinement_depth: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            order: 12,
            step: 0.05,
            min_step: 1e-4,
            max_time: 200.0,
            crossing_pieces: 8,
            refinement_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyFactors {
    /// Margin added to strict inequalities of the covering checks.
    pub covering_eps: f64,
    /// Factor of `shrink_and_expand` between consecutive chain links.
    pub link_safety: f64,
}

impl Default for SafetyFactors {
    fn default() -> Self {
        Self {
            covering_eps: 1e-15,
            link_safety: 1.1,
        }
    }
}

/// Non-rigorous shooting used to place corner points and mid-sections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ShootingSettings {
    /// Offset from an equilibrium along an eigenvector.
    pub displacement: f64,
    /// RK4 step.
    pub step: f64,
    pub max_time: f64,
    /// `u` coordinate of the section where the fast connections are matched.
    pub section_u: f64,
    /// First secant step in `v` (or `theta`).
    pub secant_offset: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ShootingSettings {
    fn default() -> Self {
        Self {
            displacement: 1e-12,
            step: 1e-2,
            max_time: 400.0,
            section_u: 0.2,
            secant_offset: 1e-4,
            tolerance: 1e-12,
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MidSectionSettings {
    /// Fraction of the way from the source to the target representative point
    /// (in `u`) at which the mid-section is placed.
    pub fraction: f64,
    /// Orthogonalise the section coordinates against the flow direction.
    pub orthogonalize: bool,
}

impl Default for MidSectionSettings {
    fn default() -> Self {
        Self {
            fraction: 0.07,
            orthogonalize: true,
        }
    }
}

/// Representative points of the four corners where fast and slow motion meet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerGuesses {
    pub upper_left: [f64; 3],
    pub lower_left: [f64; 3],
    pub upper_right: [f64; 3],
    pub lower_right: [f64; 3],
}

impl CornerGuesses {
    pub fn periodic() -> Self {
        Self {
            upper_left: [0.970345591417269, 0.0, 0.0250442158334208],
            lower_left: [-0.108412947498862, 0.0, 0.0250442158334208],
            upper_right: [0.841746280832201, 0.0, 0.0988076360184288],
            lower_right: [-0.237012258083933, 0.0, 0.0988076360184288],
        }
    }

    pub fn homoclinic() -> Self {
        Self {
            upper_left: [0.970345591417269, 0.0, 0.0],
            lower_left: [0.0, 0.0, 0.0],
            upper_right: [1.0, 0.0, 0.12],
            lower_right: [-0.3, 0.0, 0.12],
        }
    }

    pub fn vector(corner: &[f64; 3]) -> Vector3<f64> {
        Vector3::new(corner[0], corner[1], corner[2])
    }
}

impl Default for CornerGuesses {
    fn default() -> Self {
        Self::periodic()
    }
}

/// Sizes of the optional cone-condition block at the lower-left equilibrium.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConeSettings {
    pub delta_u: f64,
    pub delta_s: f64,
    pub delta_mu: f64,
    pub u_proportion: f64,
    pub a: f64,
}

impl Default for ConeSettings {
    fn default() -> Self {
        Self {
            delta_u: 1e-4,
            delta_s: 1e-4,
            delta_mu: 1e-4,
            u_proportion: 0.3,
            a: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicSettings {
    pub poincare_subdivisions: usize,
    pub long_links: usize,
    pub long_link_subdivisions: usize,
    pub corner_subdivisions: usize,
    pub ru_dl: f64,
    pub rs_ul: f64,
    pub ru_ur: f64,
    pub rs_dr: f64,
    /// `(stable radius, v radius)` of the set integrated from the lower-left corner.
    pub set_dl: [f64; 2],
    /// `(stable radius, v radius)` of the set integrated from the upper-right corner.
    pub set_ur: [f64; 2],
    pub corners: CornerGuesses,
    pub integrator: IntegratorSettings,
    pub safety: SafetyFactors,
    pub newton: NewtonSettings,
    pub shooting: ShootingSettings,
}

impl Default for PeriodicSettings {
    fn default() -> Self {
        Self {
            poincare_subdivisions: 20,
            long_links: 100,
            long_link_subdivisions: 80,
            corner_subdivisions: 200,
            ru_dl: 0.011,
            rs_ul: 0.01,
            ru_ur: 0.0015,
            rs_dr: 0.028,
            set_dl: [1e-3, 1e-3],
            set_ur: [1e-3, 1e-4],
            corners: CornerGuesses::periodic(),
            integrator: IntegratorSettings::default(),
            safety: SafetyFactors::default(),
            newton: NewtonSettings::default(),
            shooting: ShootingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomoclinicSettings {
    /// Offsets added to the corrected `theta` to form the parameter interval.
    pub theta_spread: [f64; 2],
    pub poincare_subdivisions: usize,
    pub upper_links: usize,
    pub lower_links: usize,
    pub link_subdivisions: usize,
    pub corner_subdivisions: usize,
    /// `(unstable, stable, v)` radii of the stable-manifold block at the equilibrium.
    pub stable_manifold_box: [f64; 3],
    pub ru_dl: f64,
    pub set_dl: [f64; 2],
    pub ru_ur: f64,
    pub set_ur: [f64; 2],
    pub rs_ul: f64,
    /// `(v radius, unstable radius)` of the set integrated backward from the upper-left corner.
    pub back_set_ul: [f64; 2],
    pub rs_dr: f64,
    pub back_set_dr: [f64; 2],
    pub corners: CornerGuesses,
    pub cone: Option<ConeSettings>,
    pub mid_section: MidSectionSettings,
    pub integrator: IntegratorSettings,
    pub safety: SafetyFactors,
    pub newton: NewtonSettings,
    pub shooting: ShootingSettings,
}

impl Default for HomoclinicSettings {
    fn default() -> Self {
        Self {
            theta_spread: [-2.5e-3, 2.5e-3],
            poincare_subdivisions: 20,
            upper_links: 200,
            lower_links: 400,
            link_subdivisions: 110,
            corner_subdivisions: 150,
            stable_manifold_box: [5e-4, 5e-4, 6e-4],
            ru_dl: 8e-5,
            set_dl: [2e-5, 1e-5],
            ru_ur: 5e-3,
            set_ur: [2e-3, 7e-4],
            rs_ul: 1.5e-3,
            back_set_ul: [7e-4, 5e-4],
            rs_dr: 1e-2,
            back_set_dr: [2e-3, 2e-3],
            corners: CornerGuesses::homoclinic(),
            cone: None,
            mid_section: MidSectionSettings::default(),
            integrator: IntegratorSettings::default(),
            safety: SafetyFactors::default(),
            newton: NewtonSettings::default(),
            shooting: ShootingSettings::default(),
        }
    }
}
