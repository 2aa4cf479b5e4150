//! Per-domain evaluation: extract, normalize the expiry date, compare.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::compare::{Comparator, ComparisonResult, FieldNames};
use crate::config::ConfigDomain;
use crate::date::parse_date;
use crate::engine::extract;
use crate::error::{Result, WatchError};
use crate::record::ExtractedRecord;
use crate::template::RuleTemplate;

const EXCERPT_LEN: usize = 120;

/// Everything learned about one domain from one WHOIS response.
#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    /// Expiry text exactly as the registry printed it.
    pub raw_expiry: String,
    pub comparison: ComparisonResult,
    pub record: ExtractedRecord,
    /// Records the template produced; only the first one is evaluated.
    pub records_extracted: usize,
}

impl DomainReport {
    /// Seconds since the Unix epoch, as exported to the expiration gauge.
    pub fn expiry_timestamp(&self) -> i64 {
        self.expires_at.timestamp()
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    pub fn is_consistent(&self) -> bool {
        self.comparison.is_consistent()
    }
}

/// Applies one shared template and comparator to WHOIS responses.
#[derive(Debug, Clone)]
pub struct Monitor {
    template: Arc<RuleTemplate>,
    comparator: Comparator,
}

#[derive(Clone, Copy)]
enum Shape {
    Scalar,
    List,
}

impl Monitor {
    /// Fails with [`WatchError::FieldShape`] when the template cannot yield
    /// the record shape the comparator expects.
    pub fn new(template: Arc<RuleTemplate>, fields: FieldNames) -> Result<Self> {
        check_field(&template, &fields.expiry, Shape::Scalar, true)?;
        check_field(&template, &fields.status, Shape::List, false)?;
        check_field(&template, &fields.nameservers, Shape::List, false)?;
        check_field(&template, &fields.dnssec, Shape::Scalar, false)?;
        check_field(&template, &fields.registrar, Shape::Scalar, false)?;

        Ok(Self {
            template,
            comparator: Comparator::new(fields),
        })
    }

    pub fn template(&self) -> &RuleTemplate {
        &self.template
    }

    pub fn fields(&self) -> &FieldNames {
        self.comparator.fields()
    }

    /// Runs the template over `raw`, tagging failures with `domain`.
    pub fn extract(&self, domain: &str, raw: &str) -> Result<Vec<ExtractedRecord>> {
        extract(raw, &self.template).map_err(|source| WatchError::Extract {
            domain: domain.to_string(),
            source,
        })
    }

    #[instrument(skip(self, expected, raw), fields(domain = %expected.domain))]
    pub fn evaluate(&self, expected: &ConfigDomain, raw: &str) -> Result<DomainReport> {
        let domain = expected.domain.as_str();
        let records = self.extract(domain, raw)?;
        let records_extracted = records.len();
        if records_extracted > 1 {
            debug!(records = records_extracted, "Template produced several records, using the first");
        }

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| WatchError::NoDataExtracted {
                domain: domain.to_string(),
                excerpt: excerpt(raw),
            })?;

        let expiry_field = &self.fields().expiry;
        let raw_expiry = record.scalar(expiry_field).unwrap_or_default().trim();
        if raw_expiry.is_empty() {
            return Err(WatchError::MissingExpiry {
                domain: domain.to_string(),
                field: expiry_field.clone(),
                excerpt: excerpt(raw),
            });
        }

        let expires_at = parse_date(raw_expiry).map_err(|source| WatchError::UnparsableDate {
            domain: domain.to_string(),
            source,
        })?;

        let comparison = self.comparator.compare(expected, &record);
        for diff in comparison.diffs() {
            info!(
                field = %diff.field,
                expected = %diff.expected,
                actual = %diff.actual,
                "WHOIS value is not the configured one"
            );
        }
        debug!(%expires_at, consistent = comparison.is_consistent(), "Evaluated domain");

        Ok(DomainReport {
            domain: domain.to_string(),
            expires_at,
            raw_expiry: raw_expiry.to_string(),
            comparison,
            record,
            records_extracted,
        })
    }
}

fn check_field(template: &RuleTemplate, name: &str, shape: Shape, required: bool) -> Result<()> {
    let Some(spec) = template.field(name) else {
        if required {
            return Err(WatchError::FieldShape {
                field: name.to_string(),
                expected: "declared by the template",
            });
        }
        return Ok(());
    };

    match shape {
        Shape::Scalar if spec.is_list() => Err(WatchError::FieldShape {
            field: name.to_string(),
            expected: "a single-valued field",
        }),
        Shape::List if !spec.is_list() => Err(WatchError::FieldShape {
            field: name.to_string(),
            expected: "a List field",
        }),
        _ => Ok(()),
    }
}

/// Leading non-blank text of a response, for error messages.
fn excerpt(raw: &str) -> String {
    let joined = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    match joined.char_indices().nth(EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &joined[..cut]),
        None => joined,
    }
}
