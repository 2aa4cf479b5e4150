use chrono::{DateTime, Utc};

use super::OutputFormatter;
use crate::bulk::{BatchReport, DomainOutcome};
use crate::monitor::DomainReport;
use crate::record::{ExtractedRecord, FieldValue};
use crate::style::Palette;

const EXPIRY_WARNING_DAYS: i64 = 30;
const EXPIRY_NOTICE_DAYS: i64 = 90;

pub struct HumanFormatter {
    use_colors: bool,
    now: Option<DateTime<Utc>>,
}

impl Default for HumanFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: true,
            now: None,
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    /// Pins the clock used for "days left", instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn paint(&self, text: &str, style: fn(&str) -> colored::ColoredString) -> String {
        if self.use_colors {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: &str) -> String {
        if self.use_colors {
            format!("\n{}\n{}", text.heading(), "─".repeat(text.chars().count()).muted())
        } else {
            format!("\n{}\n{}", text, "-".repeat(text.chars().count()))
        }
    }

    fn field(&self, output: &mut Vec<String>, name: &str, value: &FieldValue) {
        match value {
            FieldValue::Scalar(s) => {
                let shown = if s.is_empty() { "-" } else { s.as_str() };
                output.push(format!("  {}: {}", self.paint(name, |t| t.label()), shown));
            }
            FieldValue::List(items) if items.is_empty() => {
                output.push(format!("  {}: -", self.paint(name, |t| t.label())));
            }
            FieldValue::List(items) => {
                output.push(format!("  {}:", self.paint(name, |t| t.label())));
                for item in items {
                    output.push(format!("    - {}", item));
                }
            }
        }
    }

    fn expiry_line(&self, report: &DomainReport) -> String {
        let now = self.now.unwrap_or_else(Utc::now);
        let days = report.days_until_expiry(now);
        let date = report.expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();

        if days < 0 {
            self.paint(&format!("{} (expired {} days ago)", date, -days), |t| t.bad())
        } else if days < EXPIRY_WARNING_DAYS {
            self.paint(&format!("{} (expires in {} days!)", date, days), |t| t.bad())
        } else if days < EXPIRY_NOTICE_DAYS {
            self.paint(&format!("{} ({} days)", date, days), |t| t.caution())
        } else {
            format!("{} ({} days)", date, days)
        }
    }

    fn outcome_line(&self, outcome: &DomainOutcome) -> String {
        match (&outcome.report, &outcome.error) {
            (Some(report), _) => {
                let state = if report.is_consistent() {
                    self.paint("✓ desired state", |t| t.good())
                } else {
                    self.paint(&format!("✗ {} difference(s)", report.comparison.diffs().len()), |t| {
                        t.caution()
                    })
                };
                format!(
                    "  {}  expires {}  {}",
                    self.paint(&outcome.domain, |t| t.label()),
                    self.expiry_line(report),
                    state
                )
            }
            (None, error) => format!(
                "  {}  {}",
                self.paint(&outcome.domain, |t| t.label()),
                self.paint(error.as_deref().unwrap_or("failed"), |t| t.bad())
            ),
        }
    }
}

impl OutputFormatter for HumanFormatter {
    fn format_report(&self, report: &DomainReport) -> String {
        let mut output = Vec::new();

        output.push(self.header(&format!("Domain: {}", report.domain)));
        output.push(format!(
            "  {}: {}",
            self.paint("Expires", |t| t.label()),
            self.expiry_line(report)
        ));
        output.push(format!(
            "  {}: {}",
            self.paint("Registry text", |t| t.label()),
            report.raw_expiry
        ));

        if report.is_consistent() {
            output.push(format!(
                "  {}: {}",
                self.paint("Desired state", |t| t.label()),
                self.paint("✓ matches", |t| t.good())
            ));
        } else {
            output.push(format!(
                "  {}: {}",
                self.paint("Desired state", |t| t.label()),
                self.paint("✗ differs", |t| t.bad())
            ));
            for diff in report.comparison.diffs() {
                output.push(format!(
                    "    - {}: expected {}, found {}",
                    diff.field, diff.expected, diff.actual
                ));
            }
        }

        if report.records_extracted > 1 {
            output.push(format!(
                "  {}",
                self.paint(
                    &format!("{} records extracted, first one used", report.records_extracted),
                    |t| t.muted()
                )
            ));
        }

        output.push(self.header("Extracted fields"));
        for (name, value) in report.record.iter() {
            self.field(&mut output, name, value);
        }

        output.join("\n")
    }

    fn format_batch(&self, batch: &BatchReport) -> String {
        let mut output = Vec::new();
        let failed = batch.failures().count();

        output.push(self.header(&format!("Domains: {}", batch.outcomes.len())));
        for outcome in &batch.outcomes {
            output.push(self.outcome_line(outcome));
        }

        output.push(String::new());
        if let Some(reason) = &batch.aborted {
            output.push(self.paint(&format!("Aborted: {}", reason), |t| t.bad()));
        } else if failed == 0 {
            output.push(self.paint("All domains evaluated", |t| t.good()));
        } else {
            output.push(self.paint(
                &format!("{} of {} domains failed", failed, batch.outcomes.len()),
                |t| t.caution(),
            ));
        }

        output.join("\n")
    }

    fn format_records(&self, records: &[ExtractedRecord]) -> String {
        if records.is_empty() {
            return self.paint("No records extracted", |t| t.caution());
        }

        let mut output = Vec::new();
        for (i, record) in records.iter().enumerate() {
            output.push(self.header(&format!("Record {}", i + 1)));
            for (name, value) in record.iter() {
                self.field(&mut output, name, value);
            }
        }
        output.join("\n")
    }
}
