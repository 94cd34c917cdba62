use thiserror::Error;

/// Errors raised when a configuration section is internally inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{field}` {constraint}")]
    InvalidFieldValue { field: String, constraint: String },

    #[error("table `{0}` appears more than once in {1}")]
    DuplicateTable(String, &'static str),

    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}

impl ValidationError {
    pub(crate) fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}
