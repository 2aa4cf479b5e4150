//! Declarative extraction templates.
//!
//! A template lists the fields a WHOIS response may yield (`Value` lines)
//! followed by named states, each holding an ordered list of line rules.
//! The layout follows the TextFSM convention used by many registry
//! tooling projects:
//!
//! ```text
//! Value Required expiryDate (\S.*?)
//! Value List nServer (\S+)
//!
//! Start
//!   ^Registry Expiry Date:\s*${expiryDate}\s*$$
//!   ^Name Server:\s*${nServer} -> Continue
//! ```
//!
//! Templates are compiled once with [`compile`] and then shared read-only
//! between every extraction.

mod compiler;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;

use crate::error::{Result, WatchError};

pub use compiler::{compile, CompileError, CompileErrorKind};

/// Per-field options from a `Value` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldOption {
    /// A record missing this field is dropped instead of emitted.
    Required,
    /// Matches accumulate into an ordered list.
    List,
    /// The value survives a record emission and carries into the next one.
    Filldown,
    /// Assigning the value back-fills earlier records where it was empty.
    Fillup,
    /// Marks the field as identifying a record. Informational only.
    Key,
}

impl FieldOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOption::Required => "Required",
            FieldOption::List => "List",
            FieldOption::Filldown => "Filldown",
            FieldOption::Fillup => "Fillup",
            FieldOption::Key => "Key",
        }
    }
}

impl FromStr for FieldOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Required" => Ok(FieldOption::Required),
            "List" => Ok(FieldOption::List),
            "Filldown" => Ok(FieldOption::Filldown),
            "Fillup" => Ok(FieldOption::Fillup),
            "Key" => Ok(FieldOption::Key),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for FieldOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared capture field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub options: Vec<FieldOption>,
    /// Value regex as written in the template, including its outer parentheses.
    pub pattern: String,
}

impl FieldSpec {
    pub fn has(&self, option: FieldOption) -> bool {
        self.options.contains(&option)
    }

    /// Whether this field builds a list rather than holding a single value.
    pub fn is_list(&self) -> bool {
        self.has(FieldOption::List)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineOp {
    /// Stop evaluating rules and read the next line.
    #[default]
    Next,
    /// Keep evaluating the remaining rules of the state on the same line.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOp {
    #[default]
    NoRecord,
    /// Emit the working record and reset it.
    Record,
    /// Reset every field except `Filldown` ones.
    Clear,
    /// Reset every field.
    Clearall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stay,
    /// Move to the state at this index of [`RuleTemplate::states`].
    State(usize),
    /// Stop reading input. No implicit final record is emitted.
    End,
    /// Stop reading input as if it had been exhausted.
    Eof,
    /// Abort extraction with an optional message.
    Error(Option<String>),
}

/// One compiled `^pattern -> action` line.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) regex: Regex,
    /// Indices into [`RuleTemplate::fields`] of the fields this rule captures.
    pub(crate) captures: Vec<usize>,
    pub(crate) line_op: LineOp,
    pub(crate) record_op: RecordOp,
    pub(crate) transition: Transition,
    pub(crate) source: String,
    pub(crate) line: usize,
}

impl Rule {
    /// The rule exactly as written in the template.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expanded regex the rule matches with.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn line_op(&self) -> LineOp {
        self.line_op
    }

    pub fn record_op(&self) -> RecordOp {
        self.record_op
    }

    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    /// Template line the rule was declared on.
    pub fn line(&self) -> usize {
        self.line
    }
}

/// A named state and its rules in declaration order.
#[derive(Debug, Clone)]
pub struct StateRule {
    pub name: String,
    pub rules: Vec<Rule>,
}

/// A compiled template, ready to drive [`crate::engine::extract`].
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) states: Vec<StateRule>,
    pub(crate) start: usize,
    pub(crate) explicit_eof: bool,
}

impl RuleTemplate {
    /// Reads and compiles a template file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("cannot read template {}: {}", path.display(), e))
        })?;
        Ok(compile(&text)?)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn states(&self) -> &[StateRule] {
        &self.states
    }

    pub fn state(&self, index: usize) -> Option<&StateRule> {
        self.states.get(index)
    }

    pub fn state_named(&self, name: &str) -> Option<&StateRule> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// True when the template declares an `EOF` state, which suppresses the
    /// record otherwise emitted when input runs out.
    pub fn suppresses_final_record(&self) -> bool {
        self.explicit_eof
    }
}

impl FromStr for RuleTemplate {
    type Err = CompileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        compile(s)
    }
}
