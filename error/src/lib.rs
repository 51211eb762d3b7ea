//! Error types shared by the snap plugin crates.

use thiserror::Error;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

#[derive(Error, Debug)]
pub enum PluginError {
    /// A namespace element was rejected while building a namespace
    #[error("invalid namespace element: {0}")]
    InvalidElement(String),

    /// A metric received from the wire does not describe a valid metric
    #[error("malformed metric: {0}")]
    MalformedMetric(String),

    /// A metric value was read through the accessor of another kind
    #[error("metric holds a {actual} value, not {expected}")]
    WrongValueKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("config key not found: {0}")]
    KeyNotFound(String),

    /// A config value has a different kind than the one requested or declared
    #[error("config key {key} holds a {actual} value, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A numeric config value violates the bounds of its rule
    #[error("config key {key} value {value} is outside [{}, {}]", bound(.minimum), bound(.maximum))]
    OutOfRange {
        key: String,
        value: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },

    #[error("required config key is missing: {0}")]
    MissingRequiredKey(String),

    /// A rule for the same key is already registered on the same namespace prefix
    #[error("a rule for key {key} already exists under prefix '{prefix}'")]
    DuplicateRule { prefix: String, key: String },

    /// A rule declaration contradicts itself
    #[error("invalid rule for key {key}: {reason}")]
    InvalidRule { key: String, reason: String },

    /// Something was requested before the plugin registered it
    #[error("{0} has not been initialized")]
    NotInitialized(&'static str),

    /// Every violation found while validating a config
    #[error("config validation failed: {}", join_violations(.0))]
    Validation(Vec<PluginError>),

    /// Startup options could not be assembled
    #[error("invalid options: {0}")]
    Options(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),
}

impl PluginError {
    /// Flattens an aggregated validation failure into its individual violations.
    pub fn violations(&self) -> Vec<&PluginError> {
        match self {
            PluginError::Validation(errors) => errors.iter().flat_map(|e| e.violations()).collect(),
            other => vec![other],
        }
    }

    /// True for failures caused by the caller's input rather than by the plugin.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            PluginError::InvalidElement(_)
                | PluginError::MalformedMetric(_)
                | PluginError::WrongValueKind { .. }
                | PluginError::KeyNotFound(_)
                | PluginError::TypeMismatch { .. }
                | PluginError::OutOfRange { .. }
                | PluginError::MissingRequiredKey(_)
                | PluginError::Validation(_)
        )
    }
}

impl From<PluginError> for tonic::Status {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Rpc(status) => status,
            PluginError::NotInitialized(_) => tonic::Status::failed_precondition(err.to_string()),
            e if e.is_invalid_argument() => tonic::Status::invalid_argument(e.to_string()),
            e => tonic::Status::internal(e.to_string()),
        }
    }
}

fn bound(value: &Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::from("-"),
    }
}

fn join_violations(errors: &[PluginError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
