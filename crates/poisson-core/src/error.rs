//! Error types for Poisson

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("data error: {0}")]
    Data(String),

    #[error("auth failed: {reason}")]
    AuthFailed { reason: String },

    #[error("engine error: {name} - {message}")]
    Engine { name: String, message: String },

    #[error("driver error: {0}")]
    Driver(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    pub fn engine(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Process exit code for startup failures: 2 for bad configuration,
    /// 3 for unrecoverable data-file problems, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Data(_) | Error::Yaml(_) => 3,
            _ => 1,
        }
    }
}
