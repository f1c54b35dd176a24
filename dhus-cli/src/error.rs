//! CLI error type.

use std::error::Error;
use std::fmt;

use dhus::ClientError;

/// Errors surfaced to the terminal user.
#[derive(Debug)]
pub enum CliError {
    /// Bad command-line input or missing configuration.
    Config(String),
    /// Failure reported by the catalog client.
    Client(ClientError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::Client(e) => write!(f, "{}", e),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::Client(e) => Some(e),
        }
    }
}

impl From<ClientError> for CliError {
    fn from(e: ClientError) -> Self {
        CliError::Client(e)
    }
}
