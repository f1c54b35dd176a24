//! Shared argument types for catalog commands.

use std::env;
use std::time::Duration;

use clap::Args;
use dhus::{CatalogClient, ClientConfig};

use crate::error::CliError;

/// Connection settings shared by every subcommand.
#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Service base URL
    #[arg(long, default_value = dhus::DEFAULT_API_URL)]
    pub url: String,

    /// Account name (falls back to DHUS_USER)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Account password (falls back to DHUS_PASSWORD)
    #[arg(short, long)]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

impl ConnectionArgs {
    /// Build a client from CLI flags and environment fallbacks.
    pub fn connect(&self) -> Result<CatalogClient, CliError> {
        let user = self.user.clone().or_else(|| env::var("DHUS_USER").ok());
        let password = self
            .password
            .clone()
            .or_else(|| env::var("DHUS_PASSWORD").ok());

        let mut config = ClientConfig::new()
            .with_api_url(&self.url)
            .with_timeout(Duration::from_secs(self.timeout));
        if let (Some(user), Some(password)) = (user, password) {
            config = config.with_credentials(&user, &password);
        }

        CatalogClient::new(config).map_err(CliError::from)
    }
}

/// Split a `name:value` search term.
pub fn parse_term(term: &str) -> Result<(&str, &str), CliError> {
    term.split_once(':').ok_or_else(|| {
        CliError::Config(format!(
            "Invalid search term '{}'. Expected name:value, e.g. producttype:GRD.",
            term
        ))
    })
}
