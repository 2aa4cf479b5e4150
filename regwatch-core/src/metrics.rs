//! Prometheus gauges for domain expiry and desired state, and the
//! Pushgateway client that publishes them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument};

use crate::bulk::BatchReport;
use crate::error::{Result, WatchError};
use crate::monitor::DomainReport;
use crate::retry::{NetworkRetryClassifier, RetryExecutor, RetryPolicy};
use crate::validation::normalize_endpoint;

pub const DEFAULT_JOB: &str = "domain_metrics_pusher";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives evaluation results.
pub trait MetricsSink {
    fn observe(&self, report: &DomainReport);

    /// Called once per run in which every domain was evaluated.
    fn mark_parsed(&self, at: DateTime<Utc>);

    /// Feeds every successful report of `batch`. Returns whether the batch
    /// counted as a complete successful parse.
    fn observe_batch(&self, batch: &BatchReport, at: DateTime<Utc>) -> bool {
        for report in batch.reports() {
            self.observe(report);
        }
        let complete = batch.all_succeeded();
        if complete {
            self.mark_parsed(at);
        }
        complete
    }
}

/// Gauges in a private registry.
#[derive(Clone)]
pub struct DomainGauges {
    registry: Registry,
    expiration: GaugeVec,
    desired: GaugeVec,
    last_parsed: Gauge,
}

impl DomainGauges {
    pub fn new() -> Result<Self> {
        let expiration = GaugeVec::new(
            Opts::new(
                "domain_expiration_seconds",
                "UNIX timestamp when the WHOIS record states this domain will expire",
            ),
            &["domain"],
        )?;
        let desired = GaugeVec::new(
            Opts::new(
                "domain_state_desired",
                "Whether the WHOIS record matches the configured desired state (1) or not (0)",
            ),
            &["domain"],
        )?;
        let last_parsed = Gauge::with_opts(Opts::new(
            "domain_information_last_successfully_parsed",
            "UNIX timestamp of the last run in which every domain was parsed",
        ))?;

        let registry = Registry::new();
        registry.register(Box::new(expiration.clone()))?;
        registry.register(Box::new(desired.clone()))?;
        registry.register(Box::new(last_parsed.clone()))?;

        Ok(Self {
            registry,
            expiration,
            desired,
            last_parsed,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of all gauges.
    pub fn encode(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

impl MetricsSink for DomainGauges {
    fn observe(&self, report: &DomainReport) {
        let domain = report.domain.as_str();
        self.expiration
            .with_label_values(&[domain])
            .set(report.expiry_timestamp() as f64);
        self.desired
            .with_label_values(&[domain])
            .set(report.comparison.signal());
    }

    fn mark_parsed(&self, at: DateTime<Utc>) {
        self.last_parsed.set(at.timestamp() as f64);
    }
}

/// Publishes gauges to a Prometheus Pushgateway, replacing the job's group.
#[derive(Debug, Clone)]
pub struct PushGateway {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryExecutor<NetworkRetryClassifier>,
}

impl PushGateway {
    pub fn new(url: &str, job: &str) -> Result<Self> {
        let base = normalize_endpoint(url)?;
        if job.is_empty() || job.contains('/') {
            return Err(WatchError::Config(format!("invalid Pushgateway job name: {:?}", job)));
        }

        let client = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/metrics/job/{}", base, job),
            retry: RetryExecutor::new(RetryPolicy::default()),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn push(&self, gauges: &DomainGauges) -> Result<()> {
        let body = gauges.encode()?;
        debug!(bytes = body.len(), "Pushing metrics");
        self.retry.execute(|| self.put(body.clone())).await?;
        info!("Pushed metrics");
        Ok(())
    }

    async fn put(&self, body: String) -> Result<()> {
        let response = self
            .client
            .put(&self.endpoint)
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(WatchError::PushRejected(format!(
            "status {}: {}",
            status.as_u16(),
            detail.trim()
        )))
    }
}
