//! Error types for Routewise

use thiserror::Error;

/// Result type alias using Routewise's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Routewise error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors (E1100-E1199)
    #[error("No arm matches the requested capabilities: {0}")]
    NoCandidates(String),

    #[error("No arm satisfies the budget constraints: {0}")]
    NoFeasibleCandidate(String),

    #[error("Arm '{0}' is not registered.")]
    UnknownArm(String),

    #[error("Arm '{0}' is already registered.")]
    DuplicateArm(String),

    #[error("Invalid arm definition: {0}")]
    InvalidArm(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "E400",
            Self::Serialization(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::NoCandidates(_) => "E1100",
            Self::NoFeasibleCandidate(_) => "E1101",
            Self::UnknownArm(_) => "E1102",
            Self::DuplicateArm(_) => "E1103",
            Self::InvalidArm(_) => "E1104",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoCandidates(_) => {
                Some("Relax the capability filter or register an arm that provides it".to_string())
            }
            Self::NoFeasibleCandidate(_) => Some(
                "Raise max_cost_per_request or lower min_quality_threshold".to_string(),
            ),
            Self::UnknownArm(id) => Some(format!("Register '{}' before reporting outcomes", id)),
            Self::DuplicateArm(id) => Some(format!("Deregister '{}' first to replace it", id)),
            Self::ConfigError(_) => Some("routewise doctor".to_string()),
            _ => None,
        }
    }

    /// Whether this error is a routing outcome the caller is expected to handle
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Self::NoCandidates(_) | Self::NoFeasibleCandidate(_) | Self::UnknownArm(_)
        )
    }
}
