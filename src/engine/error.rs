use thiserror::Error;

use super::metric::NullReason;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient data for {metric}: need {required} samples, have {actual}")]
    InsufficientData {
        metric: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("zero or near-zero denominator while computing {metric}")]
    ZeroDenominator { metric: &'static str },

    #[error("no reference share for entity {entity}")]
    MissingReference { entity: String },

    #[error("malformed market-share reference for category {category}: {reason}")]
    MalformedReference { category: String, reason: String },

    #[error("empty candidate set for {category}/{subcategory}")]
    EmptyCandidateSet {
        category: String,
        subcategory: String,
    },

    #[error("duplicate entity {entity} in run {run_index} of {category}/{subcategory}")]
    DuplicateEntity {
        category: String,
        subcategory: String,
        run_index: usize,
        entity: String,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl EngineError {
    pub fn insufficient(metric: &'static str, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            metric,
            required,
            actual,
        }
    }

    pub fn malformed_reference(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReference {
            category: category.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn null_reason(&self) -> Option<NullReason> {
        match self {
            Self::InsufficientData { .. } => Some(NullReason::InsufficientSamples),
            Self::ZeroDenominator { .. } => Some(NullReason::ZeroDenominator),
            Self::MissingReference { .. } => Some(NullReason::MissingReference),
            _ => None,
        }
    }
}

pub fn require_samples(metric: &'static str, required: usize, actual: usize) -> EngineResult<()> {
    if actual < required {
        return Err(EngineError::insufficient(metric, required, actual));
    }
    Ok(())
}
