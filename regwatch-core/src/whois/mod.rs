//! Raw WHOIS retrieval.

mod client;
mod servers;

use futures::future::BoxFuture;

use crate::error::Result;

pub use client::WhoisClient;
pub use servers::{get_whois_server, parse_iana_referral, parse_referral, IANA_SERVER};

/// Something that can produce the raw WHOIS text for a domain.
pub trait WhoisSource: Send + Sync {
    fn fetch<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<String>>;
}
