//! Input validation for configured domains and endpoints.

use crate::error::{Result, WatchError};

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalize and validate a monitored domain name.
///
/// This function:
/// - Removes http:// and https:// prefixes and any trailing path
/// - Removes one trailing root dot
/// - Converts to lowercase
/// - Accepts single-label names, so a bare TLD such as `com` can be watched
/// - Rejects empty labels, non-ASCII text and labels with edge hyphens
pub fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().to_lowercase();

    let domain = domain
        .strip_prefix("http://")
        .or_else(|| domain.strip_prefix("https://"))
        .unwrap_or(&domain);

    let domain = domain.split('/').next().unwrap_or(domain);
    let domain = domain.strip_suffix('.').unwrap_or(domain);

    if domain.is_empty() || domain.len() > MAX_NAME_LEN {
        return Err(WatchError::InvalidDomain(domain.to_string()));
    }

    // IDNs must be configured in their punycode form
    let valid = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(WatchError::InvalidDomain(domain.to_string()));
    }

    for label in domain.split('.') {
        if label.is_empty()
            || label.len() > MAX_LABEL_LEN
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return Err(WatchError::InvalidDomain(domain.to_string()));
        }
    }

    Ok(domain.to_string())
}

/// Top-level label of a normalized name.
pub fn tld_of(domain: &str) -> &str {
    domain.rsplit('.').next().unwrap_or(domain)
}

/// Validate an HTTP(S) endpoint URL and strip trailing slashes.
pub fn normalize_endpoint(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| WatchError::Config(format!("endpoint must be an http(s) URL: {}", url)))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(WatchError::Config(format!("endpoint has no host: {}", url)));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain("EXAMPLE.COM").unwrap(), "example.com");
        assert_eq!(
            normalize_domain("https://example.com/path").unwrap(),
            "example.com"
        );
        assert_eq!(normalize_domain("example.com.").unwrap(), "example.com");
        assert_eq!(normalize_domain("  Foo.RS  ").unwrap(), "foo.rs");
        assert_eq!(normalize_domain("www.gov.uk").unwrap(), "www.gov.uk");

        // Bare TLDs are watchable
        assert_eq!(normalize_domain("COM").unwrap(), "com");

        assert!(normalize_domain("").is_err());
        assert!(normalize_domain(".").is_err());
        assert!(normalize_domain("example..com").is_err());
        assert!(normalize_domain(".example.com").is_err());
        assert!(normalize_domain("-example.com").is_err());
        assert!(normalize_domain("example-.com").is_err());
        assert!(normalize_domain("bücher.de").is_err());
        assert!(normalize_domain(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn test_tld_of() {
        assert_eq!(tld_of("example.co.uk"), "uk");
        assert_eq!(tld_of("com"), "com");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("http://localhost:9091/").unwrap(),
            "http://localhost:9091"
        );
        assert_eq!(
            normalize_endpoint("https://push.example.net/prom").unwrap(),
            "https://push.example.net/prom"
        );
        assert!(normalize_endpoint("localhost:9091").is_err());
        assert!(normalize_endpoint("http://").is_err());
    }
}
