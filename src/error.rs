use thiserror::Error;

#[derive(Error, Debug)]
pub enum RippleError {
    #[error("Insert violation: document '{0}' already exists in collection '{1}'")]
    DuplicateDocument(String, String),

    #[error("Update violation: no document matched criteria {0}")]
    DocumentNotFound(String),

    #[error("Update violation: '{0}' does not hold an array value")]
    NotArray(String),

    #[error("Update violation: '{0}' does not hold a numeric value")]
    NotNumeric(String),

    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid update operators: {0}")]
    InvalidOperators(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage engine closed")]
    EngineClosed,
}

pub type Result<T> = std::result::Result<T, RippleError>;
