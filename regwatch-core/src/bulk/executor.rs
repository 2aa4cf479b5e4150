use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::ConfigDomain;
use crate::error::{Result, WatchError};
use crate::monitor::{DomainReport, Monitor};
use crate::whois::WhoisSource;

pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

const DEFAULT_CONCURRENCY: usize = 4;

/// What a failed domain does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and keep evaluating the other domains.
    #[default]
    Isolate,
    /// Stop at the first failed domain.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Retrieval,
    NoData,
    MissingExpiry,
    UnparsableDate,
    /// The shared template itself is broken; every domain would fail.
    Template,
}

impl FailureKind {
    fn of(err: &WatchError) -> Self {
        match err {
            e if e.is_template_fault() => FailureKind::Template,
            WatchError::NoDataExtracted { .. } => FailureKind::NoData,
            WatchError::MissingExpiry { .. } => FailureKind::MissingExpiry,
            WatchError::UnparsableDate { .. } => FailureKind::UnparsableDate,
            _ => FailureKind::Retrieval,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainOutcome {
    pub domain: String,
    pub success: bool,
    pub report: Option<DomainReport>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    pub duration_ms: u64,
}

/// Outcomes in configuration order. When the batch was aborted, domains
/// after the one that stopped it are absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<DomainOutcome>,
    pub aborted: Option<String>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.aborted.is_none() && self.outcomes.iter().all(|o| o.success)
    }

    pub fn reports(&self) -> impl Iterator<Item = &DomainReport> {
        self.outcomes.iter().filter_map(|o| o.report.as_ref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DomainOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Fetches and evaluates configured domains concurrently.
pub struct BatchExecutor<S: WhoisSource> {
    source: S,
    monitor: Arc<Monitor>,
    concurrency: usize,
    rate_limit_delay: Duration,
    policy: FailurePolicy,
    keep_raw: bool,
}

impl<S: WhoisSource> BatchExecutor<S> {
    pub fn new(source: S, monitor: Arc<Monitor>) -> Self {
        Self {
            source,
            monitor,
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit_delay: Duration::ZERO,
            policy: FailurePolicy::default(),
            keep_raw: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep each raw WHOIS response in its outcome.
    pub fn with_raw_responses(mut self, keep: bool) -> Self {
        self.keep_raw = keep;
        self
    }

    pub async fn execute(
        &self,
        domains: &[ConfigDomain],
        progress: Option<ProgressCallback>,
    ) -> BatchReport {
        let total = domains.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        debug!(
            total = total,
            concurrency = self.concurrency,
            policy = ?self.policy,
            "Starting batch"
        );

        let mut outcomes = pin!(stream::iter(domains)
            .map(|domain| {
                let semaphore = semaphore.clone();
                let completed = completed.clone();
                let progress = progress.as_ref();

                async move {
                    let _permit = semaphore.acquire().await;

                    if !self.rate_limit_delay.is_zero() {
                        sleep(self.rate_limit_delay).await;
                    }

                    let start = Instant::now();
                    let (result, raw) = self.evaluate(domain).await;
                    let duration_ms = start.elapsed().as_millis() as u64;

                    let count = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = progress {
                        progress(count, total, &domain.domain);
                    }

                    let raw_response = if self.keep_raw { raw } else { None };
                    match result {
                        Ok(report) => DomainOutcome {
                            domain: domain.domain.clone(),
                            success: true,
                            report: Some(report),
                            error: None,
                            failure: None,
                            raw_response,
                            duration_ms,
                        },
                        Err(e) => {
                            warn!(domain = %domain.domain, error = %e, "Domain evaluation failed");
                            DomainOutcome {
                                domain: domain.domain.clone(),
                                success: false,
                                report: None,
                                error: Some(e.to_string()),
                                failure: Some(FailureKind::of(&e)),
                                raw_response,
                                duration_ms,
                            }
                        }
                    }
                }
            })
            .buffered(self.concurrency));

        let mut report = BatchReport {
            outcomes: Vec::with_capacity(total),
            aborted: None,
        };

        while let Some(outcome) = outcomes.next().await {
            let stop = match outcome.failure {
                Some(FailureKind::Template) => true,
                Some(_) => self.policy == FailurePolicy::FailFast,
                None => false,
            };

            if stop {
                let reason = format!(
                    "{}: {}",
                    outcome.domain,
                    outcome.error.as_deref().unwrap_or("failed")
                );
                error!(reason = %reason, "Aborting batch");
                report.aborted = Some(reason);
                report.outcomes.push(outcome);
                break;
            }
            report.outcomes.push(outcome);
        }

        report
    }

    async fn evaluate(&self, domain: &ConfigDomain) -> (Result<DomainReport>, Option<String>) {
        let raw = match self.source.fetch(&domain.domain).await {
            Ok(raw) => raw,
            Err(e) => return (Err(e), None),
        };
        let result = self.monitor.evaluate(domain, &raw);
        (result, Some(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::FieldNames;
    use crate::template::RuleTemplate;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const TEMPLATE: &str = r#"Value expiryDate (\S+)
Value List nServer (\S+)

Start
  ^Expires:\s*${expiryDate}
  ^NS:\s*${nServer}
  ^BROKEN -> Error "unexpected registry banner"
"#;

    struct FixtureSource {
        responses: HashMap<String, (u64, std::result::Result<String, String>)>,
    }

    impl FixtureSource {
        fn new(entries: &[(&str, u64, std::result::Result<&str, &str>)]) -> Self {
            Self {
                responses: entries
                    .iter()
                    .map(|(domain, delay, response)| {
                        let response = response.map(str::to_string).map_err(str::to_string);
                        (domain.to_string(), (*delay, response))
                    })
                    .collect(),
            }
        }
    }

    impl WhoisSource for FixtureSource {
        fn fetch<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                let (delay, response) = self
                    .responses
                    .get(domain)
                    .ok_or_else(|| WatchError::WhoisServerNotFound(domain.to_string()))?;
                sleep(Duration::from_millis(*delay)).await;
                response.clone().map_err(WatchError::WhoisError)
            })
        }
    }

    fn monitor() -> Arc<Monitor> {
        let template: RuleTemplate = TEMPLATE.parse().unwrap();
        Arc::new(Monitor::new(Arc::new(template), FieldNames::default()).unwrap())
    }

    fn domains(names: &[&str]) -> Vec<ConfigDomain> {
        names.iter().map(|n| ConfigDomain::new(*n)).collect()
    }

    fn names(report: &BatchReport) -> Vec<&str> {
        report.outcomes.iter().map(|o| o.domain.as_str()).collect()
    }

    #[tokio::test]
    async fn test_results_follow_config_order() {
        let source = FixtureSource::new(&[
            ("a.com", 40, Ok("Expires: 2025-01-01\n")),
            ("b.com", 20, Ok("Expires: 2026-01-01\n")),
            ("c.com", 0, Ok("Expires: 2027-01-01\n")),
        ]);
        let executor = BatchExecutor::new(source, monitor()).with_concurrency(3);
        let report = executor.execute(&domains(&["a.com", "b.com", "c.com"]), None).await;

        assert_eq!(names(&report), vec!["a.com", "b.com", "c.com"]);
        assert!(report.all_succeeded());
        let years: Vec<_> = report
            .reports()
            .map(|r| r.expires_at.format("%Y").to_string())
            .collect();
        assert_eq!(years, vec!["2025", "2026", "2027"]);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_queries() {
        let source = FixtureSource::new(&[
            ("a.com", 0, Ok("Expires: 2025-01-01\n")),
            ("b.com", 0, Ok("Expires: 2026-01-01\n")),
            ("c.com", 0, Ok("Expires: 2027-01-01\n")),
        ]);
        let executor = BatchExecutor::new(source, monitor())
            .with_concurrency(1)
            .with_rate_limit(Duration::from_millis(30));

        let start = Instant::now();
        let report = executor.execute(&domains(&["a.com", "b.com", "c.com"]), None).await;
        assert!(report.all_succeeded());
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_isolate_continues_past_failures() {
        let source = FixtureSource::new(&[
            ("a.com", 0, Ok("Expires: 2025-01-01\n")),
            ("b.com", 0, Err("Failed to connect to whois.example: refused")),
            ("c.com", 0, Ok("nothing useful\n")),
            ("d.com", 0, Ok("Expires: 2027-01-01\n")),
        ]);
        let executor = BatchExecutor::new(source, monitor());
        let report = executor
            .execute(&domains(&["a.com", "b.com", "c.com", "d.com"]), None)
            .await;

        assert!(report.aborted.is_none());
        assert!(!report.all_succeeded());
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.outcomes[1].failure, Some(FailureKind::Retrieval));
        assert_eq!(report.outcomes[2].failure, Some(FailureKind::NoData));
        assert!(report.outcomes[3].success);
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let source = FixtureSource::new(&[
            ("a.com", 0, Ok("Expires: 2025-01-01\n")),
            ("b.com", 0, Ok("Expires: whenever\n")),
            ("c.com", 0, Ok("Expires: 2027-01-01\n")),
        ]);
        let executor = BatchExecutor::new(source, monitor())
            .with_concurrency(1)
            .with_policy(FailurePolicy::FailFast);
        let report = executor.execute(&domains(&["a.com", "b.com", "c.com"]), None).await;

        assert_eq!(names(&report), vec!["a.com", "b.com"]);
        assert_eq!(report.outcomes[1].failure, Some(FailureKind::UnparsableDate));
        assert!(report.aborted.as_deref().unwrap().starts_with("b.com: "));
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_template_fault_aborts_isolated_batch() {
        let source = FixtureSource::new(&[
            ("a.com", 0, Ok("BROKEN\n")),
            ("b.com", 0, Ok("Expires: 2026-01-01\n")),
        ]);
        let executor = BatchExecutor::new(source, monitor()).with_concurrency(1);
        let report = executor.execute(&domains(&["a.com", "b.com"]), None).await;

        assert_eq!(names(&report), vec!["a.com"]);
        assert_eq!(report.outcomes[0].failure, Some(FailureKind::Template));
        assert!(report
            .aborted
            .as_deref()
            .unwrap()
            .contains("unexpected registry banner"));
    }

    #[tokio::test]
    async fn test_progress_and_raw_responses() {
        let source = FixtureSource::new(&[
            ("a.com", 0, Ok("Expires: 2025-01-01\nNS: ns1.a.com\n")),
            ("b.com", 0, Ok("Expires: 2026-01-01\n")),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Box::new(move |done, total, domain| {
            sink.lock().unwrap().push((done, total, domain.to_string()));
        });

        let executor = BatchExecutor::new(source, monitor()).with_raw_responses(true);
        let report = executor
            .execute(&domains(&["a.com", "b.com"]), Some(progress))
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, total, _)| *total == 2));
        assert_eq!(
            report.outcomes[0].raw_response.as_deref(),
            Some("Expires: 2025-01-01\nNS: ns1.a.com\n")
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = BatchExecutor::new(FixtureSource::new(&[]), monitor());
        let report = executor.execute(&[], None).await;
        assert!(report.outcomes.is_empty());
        assert!(report.all_succeeded());
    }
}
