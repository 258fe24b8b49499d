use thiserror::Error;

/// Coarse classification of a [`ProbError`], used by callers that map failures
/// onto their own reporting (HTTP status codes, exit codes, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The model or query is malformed: cycles, missing tables, unknown names.
    Structural,
    /// Probabilities do not sum to one, or the evidence has zero probability.
    Normalization,
    /// A value or symbol lies outside the declared domain.
    Domain,
}

/// Every failure the engine can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbError {
    #[error("cycle detected in network: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("node '{0}' has no conditional probability table")]
    MissingCpt(String),

    #[error("node '{node}' has no CPT row for parent assignment {assignment}")]
    MissingCptRow { node: String, assignment: String },

    #[error("node '{node}' has more than one CPT row for parent assignment {assignment}")]
    DuplicateCptRow { node: String, assignment: String },

    #[error("malformed CPT key '{key}' for node '{node}': {reason}")]
    MalformedCptKey {
        node: String,
        key: String,
        reason: String,
    },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("unknown observation symbol '{0}'")]
    UnknownSymbol(String),

    #[error("variable '{0}' cannot be both queried and observed")]
    QueryInEvidence(String),

    #[error("{what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{0} must not be empty")]
    Empty(String),

    #[error("{what} sums to {sum}, expected 1 (tolerance {tolerance})")]
    RowSum {
        what: String,
        sum: f64,
        tolerance: f64,
    },

    #[error("{what} contains invalid probability {value}")]
    InvalidProbability { what: String, value: f64 },

    #[error("evidence has zero probability under the model: no valid assignment")]
    InconsistentEvidence,

    #[error("value '{value}' is outside the domain of '{variable}'")]
    ValueOutOfDomain { variable: String, value: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ProbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbError::RowSum { .. }
            | ProbError::InvalidProbability { .. }
            | ProbError::InconsistentEvidence => ErrorKind::Normalization,
            ProbError::ValueOutOfDomain { .. } | ProbError::UnknownSymbol(_) => ErrorKind::Domain,
            _ => ErrorKind::Structural,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbError>;

/// Checks that `values` are finite, non-negative, and sum to one within `tolerance`.
pub fn check_distribution(what: &str, values: &[f64], tolerance: f64) -> Result<()> {
    for &value in values {
        if !value.is_finite() || value < 0.0 {
            return Err(ProbError::InvalidProbability {
                what: what.to_string(),
                value,
            });
        }
    }
    let sum: f64 = values.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(ProbError::RowSum {
            what: what.to_string(),
            sum,
            tolerance,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProbError::MissingCpt("A".into()).kind(), ErrorKind::Structural);
        assert_eq!(ProbError::QueryInEvidence("A".into()).kind(), ErrorKind::Structural);
        assert_eq!(ProbError::InconsistentEvidence.kind(), ErrorKind::Normalization);
        assert_eq!(ProbError::UnknownSymbol("x".into()).kind(), ErrorKind::Domain);
        assert_eq!(
            ProbError::ValueOutOfDomain {
                variable: "A".into(),
                value: "maybe".into()
            }
            .kind(),
            ErrorKind::Domain
        );
    }

    #[test]
    fn test_check_distribution() {
        assert!(check_distribution("row", &[0.2, 0.8], 1e-3).is_ok());
        assert!(check_distribution("row", &[0.2, 0.7995], 1e-3).is_ok());
        assert!(matches!(
            check_distribution("row", &[0.2, 0.7], 1e-3),
            Err(ProbError::RowSum { .. })
        ));
        assert!(matches!(
            check_distribution("row", &[-0.2, 1.2], 1e-3),
            Err(ProbError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn test_cycle_message() {
        let err = ProbError::CycleDetected {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "cycle detected in network: A -> B -> A");
    }
}
