use crate::interval::Interval;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The four faces of an isolating segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceKind {
    StableLeft,
    StableRight,
    UnstableLeft,
    UnstableRight,
}

impl fmt::Display for FaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaceKind::StableLeft => "stable-left",
            FaceKind::StableRight => "stable-right",
            FaceKind::UnstableLeft => "unstable-left",
            FaceKind::UnstableRight => "unstable-right",
        };
        f.write_str(name)
    }
}

/// The individual inequalities of the cone condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConeCheck {
    FirstMinor,
    SecondMinor,
    Determinant,
    UnstableFlow,
}

impl fmt::Display for ConeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConeCheck::FirstMinor => "first leading minor",
            ConeCheck::SecondMinor => "second leading minor",
            ConeCheck::Determinant => "determinant",
            ConeCheck::UnstableFlow => "unstable flow direction",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("syntax error in vector field definition: {0}")]
    Syntax(String),
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    #[error("expected 3 variables and 3 component functions, got {variables} and {functions}")]
    Dimension { variables: usize, functions: usize },
}

#[derive(Debug, Clone, Error)]
pub enum ProofError {
    #[error("geometry precondition failed: {0}")]
    GeometryPrecondition(String),
    #[error("no isolation in the slow direction: {0}")]
    SlowDirection(String),
    #[error("isolation failure in {segment}{}: {face} face hull {hull}", link_suffix(.link))]
    IsolationFailure {
        segment: String,
        face: FaceKind,
        link: Option<usize>,
        hull: Interval,
    },
    #[error("covering relation failed in {stage}{}", link_suffix(.link))]
    CoveringFailure { stage: String, link: Option<usize> },
    #[error("integration inconsistency: {0}")]
    IntegrationInconsistency(String),
    #[error("cone condition failed ({check}): {value}")]
    ConeConditionFailure { check: ConeCheck, value: Interval },
    #[error("rigorous integration failed: {0}")]
    Integration(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}

fn link_suffix(link: &Option<usize>) -> String {
    link.map(|i| format!(" (link {i})")).unwrap_or_default()
}

pub type ProofResult<T> = Result<T, ProofError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_part() {
        let err = ProofError::IsolationFailure {
            segment: "upper long segment".to_string(),
            face: FaceKind::UnstableRight,
            link: Some(4),
            hull: Interval::new(-1.0, 2.0),
        };
        let message = err.to_string();
        assert!(message.contains("upper long segment (link 4)"));
        assert!(message.contains("unstable-right"));

        let err = ProofError::CoveringFailure {
            stage: "left Poincare map".to_string(),
            link: None,
        };
        assert_eq!(err.to_string(), "covering relation failed in left Poincare map");
    }

    #[test]
    fn field_errors_convert() {
        let err: ProofError = FieldError::UnknownParameter("mu".to_string()).into();
        assert!(err.to_string().contains("unknown parameter `mu`"));
    }
}
