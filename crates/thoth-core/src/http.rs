//! Shared HTTP client construction with polite-pool identification
//!
//! Every outbound request identifies itself as `Thoth/<version>`, with a
//! `mailto:` suffix when a contact email is configured (CrossRef and
//! OpenAlex grant higher rate tiers in exchange).

use std::time::Duration;

use crate::error::DiscoveryError;

/// Connect timeout for all adapter HTTP calls.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total per-request timeout for adapter HTTP calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Polite-pool User-Agent string.
pub fn user_agent(contact_email: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match contact_email {
        Some(email) => format!("Thoth/{version} (mailto:{email})"),
        None => format!("Thoth/{version}"),
    }
}

/// Build the shared HTTP client with connection pooling and timeouts.
pub fn build_client(contact_email: Option<&str>) -> Result<reqwest::Client, DiscoveryError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(user_agent(contact_email))
        .build()
        .map_err(|e| DiscoveryError::Config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_with_contact() {
        let ua = user_agent(Some("lab@example.org"));
        assert!(ua.starts_with("Thoth/"));
        assert!(ua.ends_with("(mailto:lab@example.org)"));
    }

    #[test]
    fn user_agent_without_contact() {
        let ua = user_agent(None);
        assert!(ua.starts_with("Thoth/"));
        assert!(!ua.contains("mailto"));
    }

    #[test]
    fn build_client_ok() {
        assert!(build_client(Some("lab@example.org")).is_ok());
        assert!(build_client(None).is_ok());
    }
}
