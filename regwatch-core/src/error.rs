use thiserror::Error;

use crate::date::DateError;
use crate::engine::ExtractError;
use crate::template::CompileError;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("template compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("{domain}: extraction failed: {source}")]
    Extract {
        domain: String,
        #[source]
        source: ExtractError,
    },

    #[error("{domain}: don't know how to parse WHOIS output, no record extracted (response starts {excerpt:?})")]
    NoDataExtracted { domain: String, excerpt: String },

    #[error("{domain}: extracted record has no '{field}' value (response starts {excerpt:?})")]
    MissingExpiry {
        domain: String,
        field: String,
        excerpt: String,
    },

    #[error("{domain}: unable to parse expiry date: {source}")]
    UnparsableDate {
        domain: String,
        #[source]
        source: DateError,
    },

    #[error("template field '{field}' must be {expected}")]
    FieldShape { field: String, expected: &'static str },

    #[error("WHOIS lookup failed: {0}")]
    WhoisError(String),

    #[error("WHOIS server not found for TLD: {0}")]
    WhoisServerNotFound(String),

    #[error("WHOIS connection failed: {0}")]
    WhoisConnectionFailed(#[from] std::io::Error),

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML parsing failed: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Pushgateway rejected metrics: {0}")]
    PushRejected(String),

    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },
}

impl WatchError {
    /// Errors that come from the shared template rather than one domain's
    /// response. Every other domain would hit them too.
    pub fn is_template_fault(&self) -> bool {
        matches!(
            self,
            WatchError::Compile(_) | WatchError::Extract { .. } | WatchError::FieldShape { .. }
        )
    }

    /// Name of the domain the error is about, when it is domain-specific.
    pub fn domain(&self) -> Option<&str> {
        match self {
            WatchError::Extract { domain, .. }
            | WatchError::NoDataExtracted { domain, .. }
            | WatchError::MissingExpiry { domain, .. }
            | WatchError::UnparsableDate { domain, .. } => Some(domain),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
