mod executor;

pub use executor::{
    BatchExecutor, BatchReport, DomainOutcome, FailureKind, FailurePolicy, ProgressCallback,
};
