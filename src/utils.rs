use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpSimError {
    #[error("missing or empty key value: {key}")]
    MissingValue { key: String },

    #[error("'{name}' not found")]
    NotFound { name: String },

    #[error("'{name}' rejected: {reason}")]
    ConstraintViolation { name: String, reason: String },

    #[error("regex '{pattern}' cannot be compiled: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("didn't replace anything in request, but should have")]
    NoOpSubstitution,

    #[error("extracted value has no name (value: '{value}')")]
    UnnamedExtraction { value: String },

    #[error("request appears to not contain enough replacements")]
    NotEnoughReplacements,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response body: {0}")]
    Decode(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Step {index}.'{name}' failed: {source}")]
    Step {
        index: usize,
        name: String,
        #[source]
        source: Box<HttpSimError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    IOError(#[from] io::Error),

    #[error(transparent)]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl HttpSimError {
    /// Attaches step context, leaving already wrapped errors untouched.
    pub fn in_step(self, index: usize, name: &str) -> Self {
        if let HttpSimError::Step { .. } = self {
            return self;
        }

        HttpSimError::Step {
            index,
            name: name.to_string(),
            source: Box::new(self),
        }
    }

    /// Index of the step that failed, if the error carries step context.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            HttpSimError::Step { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The innermost error, without step context.
    pub fn root(&self) -> &HttpSimError {
        match self {
            HttpSimError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for HttpSimError {
    fn from(e: reqwest::Error) -> Self { Self::Transport(e.to_string()) }
}

impl From<http::method::InvalidMethod> for HttpSimError {
    fn from(e: http::method::InvalidMethod) -> Self { Self::InvalidRequest(e.to_string()) }
}

impl From<http::header::InvalidHeaderName> for HttpSimError {
    fn from(e: http::header::InvalidHeaderName) -> Self { Self::InvalidRequest(e.to_string()) }
}

impl From<http::header::InvalidHeaderValue> for HttpSimError {
    fn from(e: http::header::InvalidHeaderValue) -> Self { Self::InvalidRequest(e.to_string()) }
}

impl From<http::header::ToStrError> for HttpSimError {
    fn from(e: http::header::ToStrError) -> Self { Self::InvalidRequest(e.to_string()) }
}

impl From<url::ParseError> for HttpSimError {
    fn from(e: url::ParseError) -> Self { Self::InvalidRequest(e.to_string()) }
}

impl From<base64::DecodeError> for HttpSimError {
    fn from(e: base64::DecodeError) -> Self { Self::Config(e.to_string()) }
}

impl From<log::SetLoggerError> for HttpSimError {
    fn from(e: log::SetLoggerError) -> Self { Self::Config(e.to_string()) }
}
