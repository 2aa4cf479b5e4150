//! Desired-state comparison between a configured domain and its WHOIS record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDomain;
use crate::record::{ExtractedRecord, FieldValue};

/// Template field names the comparator and monitor read from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FieldNames {
    pub expiry: String,
    pub status: String,
    pub nameservers: String,
    pub dnssec: String,
    pub registrar: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            expiry: "expiryDate".to_string(),
            status: "status".to_string(),
            nameservers: "nServer".to_string(),
            dnssec: "dnssec".to_string(),
            registrar: "registrar".to_string(),
        }
    }
}

/// The expectation a [`FieldDiff`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckedField {
    Status,
    Dnssec,
    Registrar,
    Nameservers,
}

impl fmt::Display for CheckedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckedField::Status => "status",
            CheckedField::Dnssec => "dnssec",
            CheckedField::Registrar => "registrar",
            CheckedField::Nameservers => "nameservers",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: CheckedField,
    pub expected: FieldValue,
    pub actual: FieldValue,
}

/// Outcome of one comparison. Consistent when no expectation differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    signal: f64,
    diffs: Vec<FieldDiff>,
}

impl ComparisonResult {
    fn from_diffs(diffs: Vec<FieldDiff>) -> Self {
        Self {
            signal: if diffs.is_empty() { 1.0 } else { 0.0 },
            diffs,
        }
    }

    /// `1.0` when consistent, `0.0` otherwise.
    pub fn signal(&self) -> f64 {
        self.signal
    }

    pub fn is_consistent(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn diffs(&self) -> &[FieldDiff] {
        &self.diffs
    }
}

/// Compares configured expectations against records using a fixed set of
/// template field names.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    fields: FieldNames,
}

impl Comparator {
    pub fn new(fields: FieldNames) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldNames {
        &self.fields
    }

    /// Checks each non-empty expectation of `expected` against `actual`.
    ///
    /// Status and nameserver lists are compared as multisets. An expectation
    /// left empty in the configuration is not checked at all.
    pub fn compare(&self, expected: &ConfigDomain, actual: &ExtractedRecord) -> ComparisonResult {
        let mut diffs = Vec::new();

        if !expected.status.is_empty() {
            check_list(
                &mut diffs,
                CheckedField::Status,
                &expected.status,
                actual.values(&self.fields.status),
            );
        }
        if !expected.dnssec.is_empty() {
            check_scalar(
                &mut diffs,
                CheckedField::Dnssec,
                &expected.dnssec,
                actual.get(&self.fields.dnssec),
            );
        }
        if !expected.registrar.is_empty() {
            check_scalar(
                &mut diffs,
                CheckedField::Registrar,
                &expected.registrar,
                actual.get(&self.fields.registrar),
            );
        }
        if !expected.nameservers.is_empty() {
            check_list(
                &mut diffs,
                CheckedField::Nameservers,
                &expected.nameservers,
                actual.values(&self.fields.nameservers),
            );
        }

        ComparisonResult::from_diffs(diffs)
    }
}

/// Compares with the default field names.
pub fn compare(expected: &ConfigDomain, actual: &ExtractedRecord) -> ComparisonResult {
    Comparator::default().compare(expected, actual)
}

fn check_list(diffs: &mut Vec<FieldDiff>, field: CheckedField, expected: &[String], actual: Vec<String>) {
    if !same_multiset(expected, &actual) {
        diffs.push(FieldDiff {
            field,
            expected: FieldValue::List(expected.to_vec()),
            actual: FieldValue::List(actual),
        });
    }
}

fn check_scalar(
    diffs: &mut Vec<FieldDiff>,
    field: CheckedField,
    expected: &str,
    actual: Option<&FieldValue>,
) {
    let actual = actual
        .cloned()
        .unwrap_or_else(|| FieldValue::Scalar(String::new()));
    if actual.as_scalar() != Some(expected) {
        diffs.push(FieldDiff {
            field,
            expected: FieldValue::Scalar(expected.to_string()),
            actual,
        });
    }
}

fn same_multiset(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}
