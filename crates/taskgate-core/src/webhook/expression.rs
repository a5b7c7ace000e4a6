//! JEXL filter expressions over webhook payloads.
//!
//! A filter sees exactly two variables: `body` (the parsed JSON payload) and
//! `headers` (lower-cased header names, first value only). Filters are
//! checked once per distinct source text and cached for the life of the
//! process; the cache is never evicted.
//!
//! Evaluation has no time limit. Payload size is bounded by the HTTP layer.
//!
//! **Security note:** payloads are always passed as context objects, never
//! interpolated into expression strings.

use std::sync::Arc;

use dashmap::DashMap;
use jexl_parser::ast::{Expression, OpCode};
use jexl_parser::{ParseError, Parser};
use serde_json::{json, Value};

/// Variables a filter may reference.
pub const FILTER_VARIABLES: [&str; 2] = ["body", "headers"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("filter syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("filter references unknown variable '{0}' (only body and headers are available)")]
    UnknownVariable(String),

    #[error("filter can never produce a boolean")]
    NotBooleanProgram,

    #[error("filter evaluation failed: {0}")]
    EvalFailed(String),

    #[error("filter did not evaluate to a boolean: got {result}")]
    NotBoolean { result: Value },
}

// ---------------------------------------------------------------------------
// CompiledFilter
// ---------------------------------------------------------------------------

/// A filter whose syntax and variable use have been checked.
#[derive(Debug)]
pub struct CompiledFilter {
    source: String,
}

impl CompiledFilter {
    pub fn compile(source: &str) -> Result<Self, FilterError> {
        let expr = parse(source)?;
        check_variables(&expr)?;
        if never_boolean(&expr) {
            return Err(FilterError::NotBooleanProgram);
        }
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a payload. Anything but a boolean result is an error.
    pub fn evaluate(&self, body: &Value, headers: &Value) -> Result<bool, FilterError> {
        let context = json!({ "body": body, "headers": headers });
        let result = evaluator()
            .eval_in_context(&self.source, &context)
            .map_err(|e| FilterError::EvalFailed(e.to_string()))?;
        match result {
            Value::Bool(b) => Ok(b),
            other => Err(FilterError::NotBoolean { result: other }),
        }
    }
}

// ---------------------------------------------------------------------------
// FilterEngine
// ---------------------------------------------------------------------------

/// Compile cache shared by all webhook requests.
///
/// Two requests compiling the same new filter at once may both do the work;
/// the last insert wins and both results are equivalent.
#[derive(Default)]
pub struct FilterEngine {
    cache: DashMap<String, Arc<CompiledFilter>>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> Result<Arc<CompiledFilter>, FilterError> {
        if let Some(hit) = self.cache.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let compiled = Arc::new(CompiledFilter::compile(source)?);
        self.cache.insert(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Evaluate `source`; an empty (or blank) filter accepts everything.
    pub fn evaluate(&self, source: &str, body: &Value, headers: &Value) -> Result<bool, FilterError> {
        if source.trim().is_empty() {
            return Ok(true);
        }
        self.compile(source)?.evaluate(body, headers)
    }

    /// Number of distinct filters compiled so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

fn str_arg(args: &[Value], i: usize) -> &str {
    args.get(i).and_then(|v| v.as_str()).unwrap_or("")
}

/// JEXL evaluator with the standard transforms registered.
///
/// Built per evaluation: the evaluator holds boxed closures and is not shared
/// across threads.
fn evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| Ok(json!(str_arg(args, 0).to_lowercase())))
        .with_transform("upper", |args: &[Value]| Ok(json!(str_arg(args, 0).to_uppercase())))
        .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
        .with_transform("split", |args: &[Value]| {
            let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
            let parts: Vec<&str> = str_arg(args, 0).split(delimiter).collect();
            Ok(json!(parts))
        })
        .with_transform("not", |args: &[Value]| {
            Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
        })
        .with_transform("contains", |args: &[Value]| {
            let found = match args.first() {
                Some(Value::Array(items)) => items.contains(args.get(1).unwrap_or(&Value::Null)),
                _ => str_arg(args, 0).contains(str_arg(args, 1)),
            };
            Ok(json!(found))
        })
        .with_transform("startsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
        })
        .with_transform("endsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Static checks
// ---------------------------------------------------------------------------

fn parse(source: &str) -> Result<Expression, FilterError> {
    Parser::parse(source).map_err(|e| {
        let offset = match &e {
            ParseError::InvalidToken { location } | ParseError::UnrecognizedEOF { location, .. } => {
                *location
            }
            ParseError::UnrecognizedToken { token, .. } | ParseError::ExtraToken { token } => token.0,
            ParseError::User { error } => line_column_offset(source, error.line, error.column),
        };
        FilterError::Syntax {
            offset,
            message: e.to_string(),
        }
    })
}

/// Byte offset of a 1-based line/column position.
fn line_column_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

/// Every free identifier must be `body` or `headers`. Property names after
/// `.`, transform names, object-literal keys and the element field of a
/// `[.field == x]` filter are not variables.
fn check_variables(expr: &Expression) -> Result<(), FilterError> {
    match expr {
        Expression::Identifier(name) => {
            if FILTER_VARIABLES.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(FilterError::UnknownVariable(name.clone()))
            }
        }
        Expression::Number(_) | Expression::String(_) | Expression::Boolean(_) | Expression::Null => {
            Ok(())
        }
        Expression::Array(items) => items.iter().try_for_each(|item| check_variables(item)),
        Expression::Object(fields) => fields.iter().try_for_each(|(_, value)| check_variables(value)),
        Expression::BinaryOperation { left, right, .. } => {
            check_variables(left)?;
            check_variables(right)
        }
        Expression::Transform { subject, args, .. } => {
            check_variables(subject)?;
            args.iter()
                .flatten()
                .try_for_each(|arg| check_variables(arg))
        }
        Expression::DotOperation { subject, .. } => check_variables(subject),
        Expression::IndexOperation { subject, index } => {
            check_variables(subject)?;
            check_variables(index)
        }
        Expression::Conditional { left, truthy, falsy } => {
            check_variables(left)?;
            check_variables(truthy)?;
            check_variables(falsy)
        }
        Expression::Filter { right, .. } => check_variables(right),
    }
}

/// Whether `expr` is statically known to produce something other than a
/// boolean: a non-boolean literal, arithmetic, or a conditional whose
/// branches both are.
fn never_boolean(expr: &Expression) -> bool {
    match expr {
        Expression::Number(_)
        | Expression::String(_)
        | Expression::Null
        | Expression::Array(_)
        | Expression::Object(_) => true,
        Expression::BinaryOperation { operation, .. } => matches!(
            operation,
            OpCode::Add
                | OpCode::Subtract
                | OpCode::Multiply
                | OpCode::Divide
                | OpCode::FloorDivide
                | OpCode::Modulus
                | OpCode::Exponent
        ),
        Expression::Conditional { truthy, falsy, .. } => never_boolean(truthy) && never_boolean(falsy),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
