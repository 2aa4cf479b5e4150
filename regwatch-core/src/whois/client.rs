use std::collections::HashSet;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::servers::{get_whois_server, parse_iana_referral, parse_referral, query_for, IANA_SERVER};
use super::WhoisSource;
use crate::error::{Result, WatchError};
use crate::retry::{NetworkRetryClassifier, RetryExecutor, RetryPolicy};
use crate::validation::{normalize_domain, tld_of};

const WHOIS_PORT: u16 = 43;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB
const MAX_REFERRAL_DEPTH: u8 = 3;

/// Port-43 WHOIS client returning raw response text.
///
/// By default the registry's answer is returned as-is. Referral following
/// swaps it for the registrar's answer, whose layout the extraction template
/// must then also understand.
#[derive(Debug, Clone)]
pub struct WhoisClient {
    timeout: Duration,
    port: u16,
    server: Option<String>,
    follow_referrals: bool,
    retry: RetryExecutor<NetworkRetryClassifier>,
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoisClient {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            port: WHOIS_PORT,
            server: None,
            follow_referrals: false,
            retry: RetryExecutor::new(RetryPolicy::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the TCP port, for servers not listening on 43.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sends every query to `server` instead of the registry for the TLD.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_referrals(mut self, follow: bool) -> Self {
        self.follow_referrals = follow;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn lookup(&self, domain: &str) -> Result<String> {
        let domain = normalize_domain(domain)?;
        let server = match &self.server {
            Some(server) => server.clone(),
            None => self.resolve_server(&domain).await?,
        };

        if !self.follow_referrals {
            return self.query_with_retry(&server, &domain).await;
        }

        let mut visited = HashSet::new();
        self.lookup_with_referrals(&domain, &server, 0, &mut visited)
            .await
    }

    /// Queries a specific server, bypassing server discovery.
    pub async fn lookup_with_server(&self, domain: &str, server: &str) -> Result<String> {
        let domain = normalize_domain(domain)?;
        self.query_with_retry(server, &domain).await
    }

    /// Registry server for `domain`: the static table first, then IANA.
    /// Single-label names are TLDs and are answered by IANA itself.
    async fn resolve_server(&self, domain: &str) -> Result<String> {
        if !domain.contains('.') {
            return Ok(IANA_SERVER.to_string());
        }

        let tld = tld_of(domain);
        if let Some(server) = get_whois_server(tld) {
            return Ok(server.to_string());
        }

        debug!(tld = %tld, "TLD not in server table, asking IANA");
        let record = self.query_with_retry(IANA_SERVER, tld).await?;
        parse_iana_referral(&record).ok_or_else(|| WatchError::WhoisServerNotFound(tld.to_string()))
    }

    fn lookup_with_referrals<'a>(
        &'a self,
        domain: &'a str,
        whois_server: &'a str,
        depth: u8,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if depth >= MAX_REFERRAL_DEPTH {
                warn!(depth = depth, server = %whois_server, "Max referral depth exceeded");
                return Err(WatchError::WhoisError(
                    "Maximum WHOIS referral depth exceeded".to_string(),
                ));
            }

            let server_lower = whois_server.to_lowercase();
            if !visited.insert(server_lower) {
                warn!(server = %whois_server, "Circular WHOIS referral detected");
                return Err(WatchError::WhoisError(
                    "Circular WHOIS referral detected".to_string(),
                ));
            }

            let raw_response = self.query_with_retry(whois_server, domain).await?;

            if let Some(referral) = parse_referral(&raw_response) {
                if referral != whois_server && !visited.contains(&referral) {
                    debug!(referral = %referral, "Following referral");
                    return self
                        .lookup_with_referrals(domain, &referral, depth + 1, visited)
                        .await;
                }
            }

            Ok(raw_response)
        })
    }

    async fn query_with_retry(&self, server: &str, query: &str) -> Result<String> {
        let line = query_for(server, query);
        self.retry
            .execute(|| self.query_server(server, &line))
            .await
    }

    async fn query_server(&self, server: &str, query: &str) -> Result<String> {
        debug!(whois_server = %server, "Querying WHOIS server");
        let addr = format!("{}:{}", server, self.port);

        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| WatchError::Timeout(format!("Connection to {} timed out", server)))?
            .map_err(|e| WatchError::WhoisError(format!("Failed to connect to {}: {}", server, e)))?;

        let query_bytes = format!("{}\r\n", query);
        timeout(self.timeout, stream.write_all(query_bytes.as_bytes()))
            .await
            .map_err(|_| WatchError::Timeout("Write timed out".to_string()))??;

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match timeout(self.timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    response.extend_from_slice(&buf[..n]);
                    if response.len() > MAX_RESPONSE_SIZE {
                        return Err(WatchError::WhoisError(format!(
                            "Response from {} too large",
                            server
                        )));
                    }
                }
                Ok(Err(e)) => return Err(WatchError::WhoisConnectionFailed(e)),
                Err(_) => {
                    // Some servers never close the connection
                    if !response.is_empty() {
                        break;
                    }
                    return Err(WatchError::Timeout(format!("Read from {} timed out", server)));
                }
            }
        }

        Ok(decode(response))
    }
}

/// UTF-8, falling back to Latin-1 for legacy registries.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

impl WhoisSource for WhoisClient {
    fn fetch<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.lookup(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode("Registrar: Café".as_bytes().to_vec()), "Registrar: Café");
        assert_eq!(decode(vec![b'C', b'a', b'f', 0xE9]), "Café");
    }

    #[test]
    fn test_builder() {
        let client = WhoisClient::new()
            .with_timeout(Duration::from_secs(2))
            .with_referrals(true)
            .with_retry_policy(RetryPolicy::no_retry());
        assert_eq!(client.timeout, Duration::from_secs(2));
        assert!(client.follow_referrals);
        assert_eq!(client.retry.policy().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_domain_fails_before_network() {
        let client = WhoisClient::new();
        let err = client.lookup("bad..name").await.unwrap_err();
        assert!(matches!(err, WatchError::InvalidDomain(_)));
    }

    #[tokio::test]
    async fn test_lookup_with_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"Registry Expiry Date: 2025-01-01\r\n")
                .await
                .unwrap();
            buf[..n].to_vec()
        });

        let client = WhoisClient::new()
            .with_port(port)
            .with_retry_policy(RetryPolicy::no_retry());
        let response = client
            .lookup_with_server("Example.COM", "127.0.0.1")
            .await
            .unwrap();

        assert_eq!(response, "Registry Expiry Date: 2025-01-01\r\n");
        assert_eq!(server.await.unwrap(), b"example.com\r\n");
    }

    #[tokio::test]
    async fn test_server_override() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"expire: 01.01.2025\n").await.unwrap();
            buf[..n].to_vec()
        });

        let client = WhoisClient::new()
            .with_server("127.0.0.1")
            .with_port(port)
            .with_retry_policy(RetryPolicy::no_retry());
        let response = client.lookup("unlisted.zz").await.unwrap();

        assert_eq!(response, "expire: 01.01.2025\n");
        assert_eq!(server.await.unwrap(), b"unlisted.zz\r\n");
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = WhoisClient::new()
            .with_port(port)
            .with_retry_policy(RetryPolicy::no_retry());
        let err = client
            .lookup_with_server("example.com", "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::WhoisError(ref msg) if msg.contains("Failed to connect")));
    }
}
