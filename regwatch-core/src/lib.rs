pub mod bulk;
pub mod compare;
pub mod config;
pub mod date;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod output;
pub mod record;
pub mod retry;
pub mod style;
pub mod template;
pub mod validation;
pub mod whois;

pub use error::{Result, WatchError};
pub use validation::normalize_domain;

pub use compare::{compare, CheckedField, Comparator, ComparisonResult, FieldDiff, FieldNames};
pub use config::{Config, ConfigDomain};
pub use date::{parse_date, DateError};
pub use engine::{extract, ExtractError};
pub use monitor::{DomainReport, Monitor};
pub use record::{ExtractedRecord, FieldValue};
pub use template::{compile, CompileError, RuleTemplate};
pub use whois::{WhoisClient, WhoisSource};

pub use bulk::{BatchExecutor, BatchReport, DomainOutcome, FailurePolicy};
pub use metrics::{DomainGauges, MetricsSink, PushGateway};
pub use output::{OutputFormat, OutputFormatter};
