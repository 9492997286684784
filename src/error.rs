use tch::TchError;

/// Errors raised while building or loading an InfoBiGAN.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("{network}: parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ParameterMismatch {
        network: &'static str,
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },

    #[error("{network}: parameter `{name}` is missing from the parameter set")]
    MissingParameter { network: &'static str, name: String },

    #[error("{network}: parameter set contains unknown parameter `{name}`")]
    UnexpectedParameter { network: &'static str, name: String },

    #[error(transparent)]
    Torch(#[from] TchError),
}

impl ModelError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
