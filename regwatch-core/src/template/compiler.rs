use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::{FieldOption, FieldSpec, LineOp, RecordOp, Rule, RuleTemplate, StateRule, Transition};

const START_STATE: &str = "Start";
const END_STATE: &str = "End";
const EOF_STATE: &str = "EOF";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

static RULE_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<pattern>.*)\s->(?P<action>.*)$").expect("Invalid action regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{kind}", location(.line))]
pub struct CompileError {
    /// 1-based template line, `None` for whole-template problems.
    pub line: Option<usize>,
    pub kind: CompileErrorKind,
}

fn location(line: &Option<usize>) -> String {
    match line {
        Some(n) => format!("template line {}: ", n),
        None => String::new(),
    }
}

impl CompileError {
    fn at(line: usize, kind: CompileErrorKind) -> Self {
        Self {
            line: Some(line),
            kind,
        }
    }

    fn template(kind: CompileErrorKind) -> Self {
        Self { line: None, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("malformed Value line: {0}")]
    MalformedValue(String),

    #[error("unknown Value option '{0}'")]
    UnknownOption(String),

    #[error("duplicate Value option '{0}'")]
    DuplicateOption(String),

    #[error("duplicate Value '{0}'")]
    DuplicateField(String),

    #[error("regex of Value '{name}' must be wrapped in a single '()' pair: {pattern}")]
    UnwrappedValueRegex { name: String, pattern: String },

    #[error("expected a blank line after the last Value, found: {0}")]
    ExpectedBlankLine(String),

    #[error("template declares no Values")]
    NoFields,

    #[error("invalid state name: {0}")]
    MalformedState(String),

    #[error("duplicate state '{0}'")]
    DuplicateState(String),

    #[error("rule appears before any state: {0}")]
    RuleOutsideState(String),

    #[error("rule must start with '^': {0}")]
    MalformedRule(String),

    #[error("malformed action '{0}'")]
    MalformedAction(String),

    #[error("'Continue' cannot be combined with a state change: {0}")]
    ContinueWithTransition(String),

    #[error("undefined state '{0}'")]
    UndefinedState(String),

    #[error("undefined Value '{0}'")]
    UndefinedField(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("missing 'Start' state")]
    MissingStart,

    #[error("reserved state '{0}' must not contain rules")]
    NonEmptyReservedState(String),
}

type KindResult<T> = std::result::Result<T, CompileErrorKind>;

#[derive(Debug, Default)]
enum Target {
    #[default]
    Stay,
    Named(String),
    Error(Option<String>),
}

#[derive(Debug, Default)]
struct RawAction {
    line_op: LineOp,
    record_op: RecordOp,
    target: Target,
}

#[derive(Debug)]
struct RawRule {
    line: usize,
    source: String,
    pattern: String,
    action: RawAction,
}

#[derive(Debug)]
struct RawState {
    name: String,
    line: usize,
    rules: Vec<RawRule>,
}

/// Compiles template text into an executable rule table.
pub fn compile(text: &str) -> Result<RuleTemplate, CompileError> {
    let mut lines = text.lines().enumerate().map(|(i, line)| (i + 1, line));
    let fields = parse_values(&mut lines)?;
    let states = parse_states(&mut lines)?;
    let template = build(fields, states)?;

    debug!(
        fields = template.fields.len(),
        states = template.states.len(),
        "Compiled extraction template"
    );
    Ok(template)
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Splits off the first whitespace-delimited token.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn parse_values<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<Vec<FieldSpec>, CompileError> {
    let mut fields: Vec<FieldSpec> = Vec::new();

    for (number, line) in lines.by_ref() {
        if is_comment(line) {
            continue;
        }
        if line.trim().is_empty() {
            if fields.is_empty() {
                continue;
            }
            break;
        }

        let (keyword, _) = split_token(line);
        if keyword != "Value" {
            let kind = if fields.is_empty() {
                CompileErrorKind::NoFields
            } else {
                CompileErrorKind::ExpectedBlankLine(line.trim().to_string())
            };
            return Err(CompileError::at(number, kind));
        }

        let field = parse_value_line(line).map_err(|kind| CompileError::at(number, kind))?;
        if fields.iter().any(|f| f.name == field.name) {
            return Err(CompileError::at(
                number,
                CompileErrorKind::DuplicateField(field.name),
            ));
        }
        fields.push(field);
    }

    if fields.is_empty() {
        return Err(CompileError::template(CompileErrorKind::NoFields));
    }
    Ok(fields)
}

fn parse_value_line(line: &str) -> KindResult<FieldSpec> {
    let malformed = || CompileErrorKind::MalformedValue(line.trim().to_string());

    let (_, rest) = split_token(line);
    let (first, after_first) = split_token(rest);
    let (second, after_second) = split_token(after_first);
    if first.is_empty() || second.is_empty() {
        return Err(malformed());
    }

    // `Value name (re)` or `Value Opt,Opt name (re)`
    let (options, name, pattern) = if second.starts_with('(') {
        (Vec::new(), first, after_first.trim_end())
    } else {
        (parse_options(first)?, second, after_second.trim_end())
    };

    if !IDENTIFIER.is_match(name) || pattern.is_empty() {
        return Err(malformed());
    }
    if !is_single_group(pattern) {
        return Err(CompileErrorKind::UnwrappedValueRegex {
            name: name.to_string(),
            pattern: pattern.to_string(),
        });
    }
    Regex::new(pattern).map_err(|e| CompileErrorKind::InvalidRegex(e.to_string()))?;

    Ok(FieldSpec {
        name: name.to_string(),
        options,
        pattern: pattern.to_string(),
    })
}

fn parse_options(raw: &str) -> KindResult<Vec<FieldOption>> {
    let mut options = Vec::new();
    for token in raw.split(',') {
        let option: FieldOption = token
            .parse()
            .map_err(CompileErrorKind::UnknownOption)?;
        if options.contains(&option) {
            return Err(CompileErrorKind::DuplicateOption(token.to_string()));
        }
        options.push(option);
    }
    Ok(options)
}

/// True when `pattern` is one parenthesised group spanning the whole string.
fn is_single_group(pattern: &str) -> bool {
    if !pattern.starts_with('(') || !pattern.ends_with(')') {
        return false;
    }

    let mut depth = 0usize;
    let mut escaped = false;
    let mut in_class = false;
    for (i, c) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth = match depth.checked_sub(1) {
                    Some(d) => d,
                    None => return false,
                };
                if depth == 0 {
                    return i == pattern.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn parse_states<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<Vec<RawState>, CompileError> {
    let mut states: Vec<RawState> = Vec::new();
    let mut current: Option<RawState> = None;

    for (number, line) in lines {
        if is_comment(line) {
            continue;
        }
        if line.trim().is_empty() {
            if let Some(state) = current.take() {
                states.push(state);
            }
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            let text = line.trim();
            let state = current.as_mut().ok_or_else(|| {
                CompileError::at(number, CompileErrorKind::RuleOutsideState(text.to_string()))
            })?;
            let rule = parse_rule(text).map_err(|kind| CompileError::at(number, kind))?;
            state.rules.push(RawRule {
                line: number,
                source: text.to_string(),
                pattern: rule.0,
                action: rule.1,
            });
            continue;
        }

        let name = line.trim_end();
        if !IDENTIFIER.is_match(name) {
            return Err(CompileError::at(
                number,
                CompileErrorKind::MalformedState(name.to_string()),
            ));
        }
        if let Some(state) = current.take() {
            states.push(state);
        }
        if states.iter().any(|s| s.name == name) {
            return Err(CompileError::at(
                number,
                CompileErrorKind::DuplicateState(name.to_string()),
            ));
        }
        current = Some(RawState {
            name: name.to_string(),
            line: number,
            rules: Vec::new(),
        });
    }

    if let Some(state) = current.take() {
        states.push(state);
    }
    Ok(states)
}

fn parse_rule(text: &str) -> KindResult<(String, RawAction)> {
    if !text.starts_with('^') {
        return Err(CompileErrorKind::MalformedRule(text.to_string()));
    }

    match RULE_ACTION.captures(text) {
        Some(caps) => {
            let pattern = caps["pattern"].trim_end().to_string();
            let action = parse_action(caps["action"].trim())?;
            Ok((pattern, action))
        }
        None => Ok((text.to_string(), RawAction::default())),
    }
}

fn parse_line_op(s: &str) -> Option<LineOp> {
    match s {
        "Next" => Some(LineOp::Next),
        "Continue" => Some(LineOp::Continue),
        _ => None,
    }
}

fn parse_record_op(s: &str) -> Option<RecordOp> {
    match s {
        "NoRecord" => Some(RecordOp::NoRecord),
        "Record" => Some(RecordOp::Record),
        "Clear" => Some(RecordOp::Clear),
        "Clearall" => Some(RecordOp::Clearall),
        _ => None,
    }
}

fn parse_action(action: &str) -> KindResult<RawAction> {
    let malformed = || CompileErrorKind::MalformedAction(action.to_string());
    if action.is_empty() {
        return Err(malformed());
    }

    let (first, rest) = split_token(action);
    if first == "Error" {
        let message = rest.trim().trim_matches('"');
        return Ok(RawAction {
            target: Target::Error((!message.is_empty()).then(|| message.to_string())),
            ..RawAction::default()
        });
    }

    let mut out = RawAction::default();
    if let Some((line_op, record_op)) = first.split_once('.') {
        out.line_op = parse_line_op(line_op).ok_or_else(malformed)?;
        out.record_op = parse_record_op(record_op).ok_or_else(malformed)?;
    } else if let Some(op) = parse_line_op(first) {
        out.line_op = op;
    } else if let Some(op) = parse_record_op(first) {
        out.record_op = op;
    } else {
        // Bare state name
        if !rest.is_empty() || !IDENTIFIER.is_match(first) {
            return Err(malformed());
        }
        out.target = Target::Named(first.to_string());
        return Ok(out);
    }

    if !rest.is_empty() {
        let (state, extra) = split_token(rest);
        if !extra.is_empty() || !IDENTIFIER.is_match(state) {
            return Err(malformed());
        }
        if out.line_op == LineOp::Continue {
            return Err(CompileErrorKind::ContinueWithTransition(action.to_string()));
        }
        out.target = Target::Named(state.to_string());
    }
    Ok(out)
}

/// Substitutes `${Name}` with the field's named group, `$$` with `$`.
fn expand_pattern(pattern: &str, fields: &[FieldSpec]) -> KindResult<String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.char_indices().peekable();
    let mut escaped = false;

    while let Some((i, c)) = chars.next() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '$' => match chars.peek().map(|&(_, next)| next) {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some('{') => {
                    let start = i + 2;
                    let len = pattern[start..]
                        .find('}')
                        .ok_or_else(|| CompileErrorKind::MalformedRule(pattern.to_string()))?;
                    let name = &pattern[start..start + len];
                    let field = fields
                        .iter()
                        .find(|f| f.name == name)
                        .ok_or_else(|| CompileErrorKind::UndefinedField(name.to_string()))?;
                    out.push_str("(?P<");
                    out.push_str(name);
                    out.push('>');
                    out.push_str(&field.pattern[1..]);
                    let close = start + len;
                    for (j, _) in chars.by_ref() {
                        if j == close {
                            break;
                        }
                    }
                }
                _ => out.push('$'),
            },
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn build(fields: Vec<FieldSpec>, raw_states: Vec<RawState>) -> Result<RuleTemplate, CompileError> {
    let mut explicit_eof = false;
    let mut kept: Vec<RawState> = Vec::with_capacity(raw_states.len());

    for state in raw_states {
        if state.name == END_STATE || state.name == EOF_STATE {
            if !state.rules.is_empty() {
                return Err(CompileError::at(
                    state.line,
                    CompileErrorKind::NonEmptyReservedState(state.name),
                ));
            }
            explicit_eof |= state.name == EOF_STATE;
            continue;
        }
        kept.push(state);
    }

    let index: HashMap<&str, usize> = kept
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let start = *index
        .get(START_STATE)
        .ok_or_else(|| CompileError::template(CompileErrorKind::MissingStart))?;

    let mut states = Vec::with_capacity(kept.len());
    for state in &kept {
        let mut rules = Vec::with_capacity(state.rules.len());
        for raw in &state.rules {
            let rule = compile_rule(raw, &fields, &index)
                .map_err(|kind| CompileError::at(raw.line, kind))?;
            rules.push(rule);
        }
        states.push(StateRule {
            name: state.name.clone(),
            rules,
        });
    }

    Ok(RuleTemplate {
        fields,
        states,
        start,
        explicit_eof,
    })
}

fn compile_rule(
    raw: &RawRule,
    fields: &[FieldSpec],
    index: &HashMap<&str, usize>,
) -> KindResult<Rule> {
    let expanded = expand_pattern(&raw.pattern, fields)?;
    let regex = Regex::new(&expanded).map_err(|e| CompileErrorKind::InvalidRegex(e.to_string()))?;

    let mut captures = Vec::new();
    for name in regex.capture_names().flatten() {
        let position = fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| CompileErrorKind::UndefinedField(name.to_string()))?;
        captures.push(position);
    }
    captures.sort_unstable();
    captures.dedup();

    let transition = match &raw.action.target {
        Target::Stay => Transition::Stay,
        Target::Error(message) => Transition::Error(message.clone()),
        Target::Named(name) if name == END_STATE => Transition::End,
        Target::Named(name) if name == EOF_STATE => Transition::Eof,
        Target::Named(name) => index
            .get(name.as_str())
            .map(|&i| Transition::State(i))
            .ok_or_else(|| CompileErrorKind::UndefinedState(name.clone()))?,
    };

    Ok(Rule {
        regex,
        captures,
        line_op: raw.action.line_op,
        record_op: raw.action.record_op,
        transition,
        source: raw.source.clone(),
        line: raw.line,
    })
}
