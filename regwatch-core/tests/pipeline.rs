//! End-to-end evaluation of recorded registry responses with the shipped
//! template and configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use regwatch_core::bulk::FailurePolicy;
use regwatch_core::{
    extract, BatchExecutor, CheckedField, Config, ConfigDomain, DomainGauges, FieldNames,
    FieldValue, MetricsSink, Monitor, Result, RuleTemplate, WatchError, WhoisSource,
};

fn repo_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(name)
}

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

fn template() -> Arc<RuleTemplate> {
    Arc::new(RuleTemplate::load(repo_file("whois.textfsm")).unwrap())
}

fn monitor() -> Monitor {
    Monitor::new(template(), FieldNames::default()).unwrap()
}

fn list(items: &[&str]) -> FieldValue {
    FieldValue::List(items.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_gtld_response() {
    let config = Config::load(repo_file("domains.yml")).unwrap();
    let expected = config.domain("example.com").unwrap();

    let report = monitor()
        .evaluate(expected, &fixture("example.com.txt"))
        .unwrap();

    assert_eq!(report.raw_expiry, "2028-09-14T04:00:00Z");
    assert_eq!(report.expiry_timestamp(), 1852516800);
    assert_eq!(report.records_extracted, 1);
    assert!(report.is_consistent());
    assert_eq!(report.comparison.signal(), 1.0);
    assert_eq!(
        report.record.scalar("registrar"),
        Some("RESERVED-Internet Assigned Numbers Authority")
    );
}

#[test]
fn test_rnids_response() {
    let records = extract(&fixture("foo.rs.txt"), &template()).unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.scalar("expiryDate"), Some("26.08.2024 17:01:07"));
    assert_eq!(record.get("status"), Some(&list(&["Active"])));
    assert_eq!(
        record.get("nServer"),
        Some(&list(&[
            "ns1.foodns.net - 91.185.193.152",
            "ns2.foodns.net - 91.185.193.153",
        ]))
    );
    assert_eq!(record.scalar("dnssec"), Some("no"));
    assert_eq!(record.scalar("registrar"), Some("Loopia d.o.o."));

    let report = monitor()
        .evaluate(&ConfigDomain::new("foo.rs"), &fixture("foo.rs.txt"))
        .unwrap();
    assert_eq!(
        report.expires_at,
        Utc.with_ymd_and_hms(2024, 8, 26, 17, 1, 7).unwrap()
    );
}

#[test]
fn test_cctld_dotted_layouts() {
    let monitor = monitor();

    let fi = monitor
        .evaluate(&ConfigDomain::new("example.fi"), &fixture("example.fi.txt"))
        .unwrap();
    assert_eq!(fi.expiry_timestamp(), 1882828800);
    assert_eq!(
        fi.record.get("nServer"),
        Some(&list(&["ns1.example.fi [Technical Error]", "ns2.example.fi [OK]"]))
    );
    assert_eq!(fi.record.scalar("registrar"), Some("Example Registrar Oy"));

    let config = Config::load(repo_file("domains.yml")).unwrap();
    let cz = monitor
        .evaluate(config.domain("nic.cz").unwrap(), &fixture("nic.cz.txt"))
        .unwrap();
    assert_eq!(cz.expiry_timestamp(), 1805068800);
    assert_eq!(cz.record.scalar("dnssec"), Some("KEYID-NIC"));
    assert_eq!(
        cz.record.values("nServer"),
        vec![
            "a.ns.nic.cz (194.0.12.1, 2001:678:f::1)",
            "b.ns.nic.cz (194.0.13.1, 2001:678:10::1)",
        ]
    );
    assert!(cz.is_consistent());
}

#[test]
fn test_nameserver_drift() {
    let expected = ConfigDomain {
        nameservers: vec!["ns1.foodns.net".to_string()],
        dnssec: "no".to_string(),
        ..ConfigDomain::new("foo.rs")
    };
    let report = monitor().evaluate(&expected, &fixture("foo.rs.txt")).unwrap();

    assert_eq!(report.comparison.signal(), 0.0);
    let fields: Vec<CheckedField> = report.comparison.diffs().iter().map(|d| d.field).collect();
    assert_eq!(fields, vec![CheckedField::Nameservers]);
}

#[test]
fn test_no_match_response() {
    let err = monitor()
        .evaluate(
            &ConfigDomain::new("nope-example.com"),
            &fixture("no-match.com.txt"),
        )
        .unwrap_err();
    match err {
        WatchError::NoDataExtracted { domain, excerpt } => {
            assert_eq!(domain, "nope-example.com");
            assert!(excerpt.starts_with("No match for \"NOPE-EXAMPLE.COM\"."));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unparsable_expiry() {
    let err = monitor()
        .evaluate(&ConfigDomain::new("bad-date.com"), &fixture("bad-date.com.txt"))
        .unwrap_err();
    assert!(matches!(err, WatchError::UnparsableDate { .. }));
    let message = err.to_string();
    assert!(message.contains("bad-date.com"));
    assert!(message.contains("sometime next year"));
}

#[test]
fn test_minimal_record_exports_expiry() {
    let template: RuleTemplate = "Value Required expiryDate (\\S+)\n\nStart\n  ^expire:\\s+${expiryDate}\n"
        .parse()
        .unwrap();
    let monitor = Monitor::new(Arc::new(template), FieldNames::default()).unwrap();
    let report = monitor
        .evaluate(&ConfigDomain::new("example.cz"), "expire:       01.01.2025\n")
        .unwrap();

    let gauges = DomainGauges::new().unwrap();
    gauges.observe(&report);
    let text = gauges.encode().unwrap();
    assert!(text.contains("domain_expiration_seconds{domain=\"example.cz\"} 1735689600"));
    assert!(text.contains("domain_state_desired{domain=\"example.cz\"} 1"));
}

struct RecordedResponses {
    responses: HashMap<&'static str, &'static str>,
}

impl WhoisSource for RecordedResponses {
    fn fetch<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let file = self
                .responses
                .get(domain)
                .ok_or_else(|| WatchError::WhoisServerNotFound(domain.to_string()))?;
            Ok(fixture(file))
        })
    }
}

fn recorded() -> RecordedResponses {
    RecordedResponses {
        responses: HashMap::from([
            ("example.com", "example.com.txt"),
            ("foo.rs", "foo.rs.txt"),
            ("example.fi", "example.fi.txt"),
            ("nic.cz", "nic.cz.txt"),
            ("nope-example.com", "no-match.com.txt"),
        ]),
    }
}

#[tokio::test]
async fn test_batch_over_recorded_responses() {
    let domains: Vec<ConfigDomain> = ["example.com", "foo.rs", "example.fi", "nic.cz"]
        .into_iter()
        .map(ConfigDomain::new)
        .collect();

    let executor = BatchExecutor::new(recorded(), Arc::new(monitor())).with_concurrency(2);
    let batch = executor.execute(&domains, None).await;
    assert!(batch.all_succeeded());
    let order: Vec<&str> = batch.outcomes.iter().map(|o| o.domain.as_str()).collect();
    assert_eq!(order, vec!["example.com", "foo.rs", "example.fi", "nic.cz"]);

    let gauges = DomainGauges::new().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 10, 19, 12, 0, 0).unwrap();
    assert!(gauges.observe_batch(&batch, at));
    let text = gauges.encode().unwrap();
    assert!(text.contains("domain_expiration_seconds{domain=\"example.com\"} 1852516800"));
    assert!(text.contains("domain_expiration_seconds{domain=\"foo.rs\"} 1724691667"));
    assert!(text.contains(&format!(
        "domain_information_last_successfully_parsed {}",
        at.timestamp()
    )));
}

#[tokio::test]
async fn test_batch_isolates_unregistered_domain() {
    let domains = vec![
        ConfigDomain::new("nope-example.com"),
        ConfigDomain::new("example.com"),
    ];

    let batch = BatchExecutor::new(recorded(), Arc::new(monitor()))
        .with_policy(FailurePolicy::Isolate)
        .execute(&domains, None)
        .await;
    assert!(!batch.all_succeeded());
    assert!(batch.aborted.is_none());
    assert_eq!(batch.reports().count(), 1);

    let failed: Vec<&str> = batch.failures().map(|o| o.domain.as_str()).collect();
    assert_eq!(failed, vec!["nope-example.com"]);

    let gauges = DomainGauges::new().unwrap();
    assert!(!gauges.observe_batch(&batch, Utc::now()));
    let text = gauges.encode().unwrap();
    assert!(text.contains("domain_expiration_seconds{domain=\"example.com\"}"));
    assert!(text.contains("domain_information_last_successfully_parsed 0"));
}
