//! Runtime error type shared by configuration and logging setup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value failed validation.
    #[error("Invalid player configuration: {0}")]
    Config(String),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    /// Whether the error came from validating a [`PlayerConfig`](crate::PlayerConfig).
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
