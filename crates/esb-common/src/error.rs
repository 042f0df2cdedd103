//! Error types shared by the mediation, cache and store layers

use thiserror::Error;

/// Failure of a mediator while processing one message
///
/// Returned from `mediate` and checked by the pipeline runner, which routes it
/// to the innermost fault handler in scope.
#[derive(Error, Debug)]
pub enum MediationError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Mediation failed in {mediator}: {message}")]
    Mediation { mediator: String, message: String },

    #[error("Delivery to {endpoint} failed: {message}")]
    Delivery { endpoint: String, message: String },

    #[error("Caching error: {0}")]
    Caching(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl MediationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn mediation(mediator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mediation {
            mediator: mediator.into(),
            message: message.into(),
        }
    }

    pub fn delivery(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Short classification recorded on the context as `ERROR_KIND`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION",
            Self::Mediation { .. } => "MEDIATION",
            Self::Delivery { .. } => "DELIVERY",
            Self::Caching(_) => "CACHING",
            Self::Store(_) => "STORE",
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Error in calculating the hash value of the request: {0}")]
    Digest(String),

    #[error("Envelope codec error: {0}")]
    Codec(String),
}

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("No cluster peers reachable")]
    NoPeers,

    #[error("Replication failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message store unavailable: {0}")]
    Unavailable(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message store {store} is full (capacity {capacity})")]
    Full { store: String, capacity: usize },

    #[error("Envelope cannot be serialized: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup-time configuration failures, never raised per message
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown mediator referenced by configuration: {0}")]
    UnknownMediator(String),

    #[error("Mediator '{mediator}' requires parameter '{param}'")]
    MissingParameter { mediator: String, param: String },

    #[error("Mediator '{mediator}' has invalid parameter '{param}': {reason}")]
    InvalidParameter {
        mediator: String,
        param: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn missing(mediator: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParameter {
            mediator: mediator.into(),
            param: param.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MediationError>;
