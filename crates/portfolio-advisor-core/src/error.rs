use thiserror::Error;

/// Failure taxonomy for the optimization engine.
///
/// Every variant carries the instrument identifiers it concerns so a caller
/// can report the failure without re-deriving context. `code()` gives a stable
/// machine-readable discriminator.
#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid request: {field}: {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("Price data unavailable for [{}] over {period}: {reason}", instruments.join(", "))]
    DataUnavailable {
        instruments: Vec<String>,
        period: String,
        reason: String,
    },

    #[error("Insufficient data for [{}]: {reason}", instruments.join(", "))]
    InsufficientData {
        instruments: Vec<String>,
        reason: String,
    },

    #[error("Optimization failed for [{}]: {diagnostic}", instruments.join(", "))]
    Optimization {
        instruments: Vec<String>,
        diagnostic: String,
    },

    #[error(
        "No expected return above the risk-free rate ({risk_free_rate}) for [{}]",
        instruments.join(", ")
    )]
    NoPositiveExpectedReturn {
        instruments: Vec<String>,
        risk_free_rate: f64,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PortfolioError {
    /// Stable code a caller can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            PortfolioError::InvalidRequest { .. } => "INVALID_REQUEST",
            PortfolioError::DataUnavailable { .. } => "DATA_UNAVAILABLE",
            PortfolioError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            PortfolioError::Optimization { .. } => "OPTIMIZATION_FAILED",
            PortfolioError::NoPositiveExpectedReturn { .. } => "NO_POSITIVE_EXPECTED_RETURN",
            PortfolioError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Only provider failures are worth a single retry with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortfolioError::DataUnavailable { .. })
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PortfolioError::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn insufficient(instruments: &[String], reason: impl Into<String>) -> Self {
        PortfolioError::InsufficientData {
            instruments: instruments.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn optimization(instruments: &[String], diagnostic: impl Into<String>) -> Self {
        PortfolioError::Optimization {
            instruments: instruments.to_vec(),
            diagnostic: diagnostic.into(),
        }
    }
}

impl From<serde_json::Error> for PortfolioError {
    fn from(e: serde_json::Error) -> Self {
        PortfolioError::SerializationError(e.to_string())
    }
}
