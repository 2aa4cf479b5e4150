use super::OutputFormatter;
use crate::bulk::BatchReport;
use crate::monitor::DomainReport;
use crate::record::ExtractedRecord;

pub struct JsonFormatter {
    pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    fn to_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        result.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_report(&self, report: &DomainReport) -> String {
        self.to_json(report)
    }

    fn format_batch(&self, batch: &BatchReport) -> String {
        self.to_json(batch)
    }

    fn format_records(&self, records: &[ExtractedRecord]) -> String {
        self.to_json(records)
    }
}
