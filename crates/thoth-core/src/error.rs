//! Common error taxonomy for discovery pipelines

/// Error from any stage of a discovery run.
///
/// The variants mirror how errors propagate: item-level parse failures are
/// absorbed by adapters, adapter-level remote failures are recorded in the
/// run result, and cancellation unwinds the whole run.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Validation failure on a source config, query or workflow.
    /// Surfaced to the caller of the store; never reaches the scheduler.
    Config(String),
    /// Remote returned 429; always retried with backoff.
    RateLimited {
        endpoint: String,
        message: String,
    },
    /// 5xx or network I/O failure; retried up to the adapter retry budget.
    TransientRemote {
        status: Option<u16>,
        message: String,
    },
    /// 4xx other than 429, or unparseable pagination; the adapter terminates.
    PermanentRemote {
        status: Option<u16>,
        message: String,
    },
    /// A single item failed to parse; logged, skipped and counted.
    Parse(String),
    /// Cancellation signal fired; propagated upward unchanged.
    Cancelled,
    /// A pool handed out nothing when acquisition should have blocked.
    /// Observing this externally is a bug; the run is marked failed.
    PoolExhausted(String),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid config: {msg}"),
            Self::RateLimited { endpoint, message } => {
                write!(f, "rate limited on {endpoint}: {message}")
            }
            Self::TransientRemote {
                status: Some(s),
                message,
            } => write!(f, "transient remote error (HTTP {s}): {message}"),
            Self::TransientRemote {
                status: None,
                message,
            } => write!(f, "transient remote error: {message}"),
            Self::PermanentRemote {
                status: Some(s),
                message,
            } => write!(f, "permanent remote error (HTTP {s}): {message}"),
            Self::PermanentRemote {
                status: None,
                message,
            } => write!(f, "permanent remote error: {message}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::PoolExhausted(msg) => write!(f, "pool exhausted: {msg}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl DiscoveryError {
    /// Whether the retry machinery should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::TransientRemote { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classify an HTTP status code per the error taxonomy.
    pub fn from_status(status: u16, endpoint: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                endpoint: endpoint.to_string(),
                message,
            },
            500..=599 => Self::TransientRemote {
                status: Some(status),
                message,
            },
            _ => Self::PermanentRemote {
                status: Some(status),
                message,
            },
        }
    }

    /// Classify a reqwest error: timeouts and connection failures are
    /// transient, anything carrying a status goes through [`from_status`].
    ///
    /// [`from_status`]: DiscoveryError::from_status
    pub fn from_reqwest(e: &reqwest::Error, endpoint: &str) -> Self {
        match e.status() {
            Some(s) => Self::from_status(s.as_u16(), endpoint, e.to_string()),
            None => Self::TransientRemote {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited_and_retryable() {
        let err = DiscoveryError::from_status(429, "arxiv", "slow down");
        assert!(matches!(err, DiscoveryError::RateLimited { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn status_500_is_transient() {
        let err = DiscoveryError::from_status(503, "pubmed", "maintenance");
        assert!(matches!(
            err,
            DiscoveryError::TransientRemote {
                status: Some(503),
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn status_404_is_permanent() {
        let err = DiscoveryError::from_status(404, "crossref", "gone");
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!DiscoveryError::Cancelled.is_retryable());
        assert!(DiscoveryError::Cancelled.is_cancelled());
    }

    #[test]
    fn display_includes_status() {
        let err = DiscoveryError::from_status(502, "openalex", "bad gateway");
        assert_eq!(
            format!("{err}"),
            "transient remote error (HTTP 502): bad gateway"
        );
    }

    #[test]
    fn display_config() {
        let err = DiscoveryError::Config("name must be unique".to_string());
        assert!(format!("{err}").contains("invalid config"));
    }
}
