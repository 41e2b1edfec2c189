use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VigilError {
    #[error("Invalid parameter `{parameter}`: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Non-finite value in series `{series}` at index {index}")]
    NonFiniteValue { series: String, index: usize },

    #[error("Malformed record {reference}: {reason}")]
    MalformedRecord { reference: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl VigilError {
    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        VigilError::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
