use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::EngineResult;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullReason {
    InsufficientSamples,
    ZeroDenominator,
    MissingReference,
}

impl NullReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientSamples => "insufficient_samples",
            Self::ZeroDenominator => "zero_denominator",
            Self::MissingReference => "missing_reference",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metric<T> {
    pub value: Option<T>,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<NullReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl<T> Metric<T> {
    pub fn available(value: T) -> Self {
        Self {
            value: Some(value),
            available: true,
            reason: None,
            detail: None,
        }
    }

    pub fn unavailable(reason: NullReason) -> Self {
        Self {
            value: None,
            available: false,
            reason: Some(reason),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn recover(result: EngineResult<T>) -> EngineResult<Self> {
        match result {
            Ok(value) => Ok(Self::available(value)),
            Err(err) => match err.null_reason() {
                Some(reason) => {
                    debug!(reason = reason.as_str(), error = %err, "metric not computable");
                    Ok(Self::unavailable(reason).with_detail(err.to_string()))
                }
                None => Err(err),
            },
        }
    }

    pub fn null_of<U>(&self) -> Metric<U> {
        Metric {
            value: None,
            available: false,
            reason: self.reason.or(Some(NullReason::InsufficientSamples)),
            detail: self.detail.clone(),
        }
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T: Copy> Metric<T> {
    pub fn get(&self) -> Option<T> {
        self.value
    }
}
