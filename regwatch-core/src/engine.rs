//! Line-oriented record extraction.
//!
//! [`extract`] replays a compiled [`RuleTemplate`] over a WHOIS response one
//! line at a time. Every call owns a fresh parse state, so a template can be
//! shared between any number of concurrent extractions.

use thiserror::Error;
use tracing::trace;

use crate::record::{ExtractedRecord, FieldValue};
use crate::template::{FieldOption, LineOp, RecordOp, Rule, RuleTemplate, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("rule table references unknown state #{index}")]
    UnknownState { index: usize },

    #[error("template rejected line {line_number} in state '{state}': {message} ({line:?})")]
    Rejected {
        state: String,
        line_number: usize,
        line: String,
        message: String,
    },
}

/// Runs `template` over `input` and returns the completed records in order.
///
/// An empty vector means nothing matched; it is not an error.
pub fn extract(input: &str, template: &RuleTemplate) -> Result<Vec<ExtractedRecord>, ExtractError> {
    let mut state = ParseState::new(template);
    state.run(input)?;
    Ok(state.finish())
}

/// Splits on `\n`, `\r\n` and lone `\r`. A trailing terminator adds no line.
fn split_lines(input: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        match rest.find(|c: char| c == '\n' || c == '\r') {
            Some(pos) => {
                lines.push(&rest[..pos]);
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[pos + skip..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

struct ParseState<'t> {
    template: &'t RuleTemplate,
    state: usize,
    values: Vec<FieldValue>,
    records: Vec<Vec<FieldValue>>,
    stopped: Option<Stop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    End,
    Eof,
}

impl<'t> ParseState<'t> {
    fn new(template: &'t RuleTemplate) -> Self {
        Self {
            template,
            state: template.start(),
            values: template.fields().iter().map(FieldValue::empty_for).collect(),
            records: Vec::new(),
            stopped: None,
        }
    }

    fn run(&mut self, input: &str) -> Result<(), ExtractError> {
        for (i, line) in split_lines(input).into_iter().enumerate() {
            self.process_line(i + 1, line)?;
            if self.stopped.is_some() {
                break;
            }
        }

        if self.stopped != Some(Stop::End) && !self.template.suppresses_final_record() {
            self.append_record();
        }
        Ok(())
    }

    fn process_line(&mut self, line_number: usize, line: &str) -> Result<(), ExtractError> {
        let template = self.template;
        let state = template
            .state(self.state)
            .ok_or(ExtractError::UnknownState { index: self.state })?;

        for rule in &state.rules {
            let Some(caps) = rule.regex.captures(line) else {
                continue;
            };
            trace!(state = %state.name, rule = rule.line, line_number, "Rule matched");

            self.assign(rule, &caps);

            if let Transition::Error(message) = &rule.transition {
                return Err(ExtractError::Rejected {
                    state: state.name.clone(),
                    line_number,
                    line: line.to_string(),
                    message: message
                        .clone()
                        .unwrap_or_else(|| format!("rule '{}' matched", rule.source)),
                });
            }

            match rule.record_op {
                RecordOp::NoRecord => {}
                RecordOp::Record => self.append_record(),
                RecordOp::Clear => self.clear(false),
                RecordOp::Clearall => self.clear(true),
            }

            match rule.transition {
                Transition::Stay | Transition::Error(_) => {}
                Transition::State(next) => {
                    if template.state(next).is_none() {
                        return Err(ExtractError::UnknownState { index: next });
                    }
                    self.state = next;
                }
                Transition::End => self.stopped = Some(Stop::End),
                Transition::Eof => self.stopped = Some(Stop::Eof),
            }

            if rule.line_op == LineOp::Next {
                break;
            }
        }
        Ok(())
    }

    fn assign(&mut self, rule: &Rule, caps: &regex::Captures<'_>) {
        let fields = self.template.fields();
        for &index in &rule.captures {
            let spec = &fields[index];
            let Some(m) = caps.name(&spec.name) else {
                continue;
            };
            self.values[index].assign(m.as_str());

            if spec.has(FieldOption::Fillup) {
                for record in self.records.iter_mut().rev() {
                    if !record[index].is_empty() {
                        break;
                    }
                    record[index].assign(m.as_str());
                }
            }
        }
    }

    fn append_record(&mut self) {
        if self.values.iter().all(FieldValue::is_empty) {
            return;
        }

        let fields = self.template.fields();
        let missing_required = fields
            .iter()
            .zip(&self.values)
            .any(|(spec, value)| spec.has(FieldOption::Required) && value.is_empty());

        if missing_required {
            trace!("Dropping record without a required value");
        } else {
            self.records.push(self.values.clone());
        }
        self.clear(false);
    }

    fn clear(&mut self, all: bool) {
        let fields = self.template.fields();
        for (spec, value) in fields.iter().zip(self.values.iter_mut()) {
            if all || !spec.has(FieldOption::Filldown) {
                value.clear();
            }
        }
    }

    fn finish(self) -> Vec<ExtractedRecord> {
        let fields = self.template.fields();
        self.records
            .into_iter()
            .map(|values| {
                fields
                    .iter()
                    .map(|spec| spec.name.clone())
                    .zip(values)
                    .collect()
            })
            .collect()
    }
}
