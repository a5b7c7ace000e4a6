//! Text templates rendered against a webhook payload.
//!
//! Supports a small Go-template subset, enough for Task descriptions:
//!
//! - `{{ . }}` renders the whole payload, `{{ .a.b }}` a nested field and
//!   `{{ .items.0 }}` an array element.
//! - Pipelines and prefix calls: `{{ .user | toJson }}`,
//!   `{{ toPrettyJson .user }}`, `{{ .title | quote }}`,
//!   `{{ .branch | default "main" }}`.
//! - Trim markers: `{{- ` drops whitespace before the action, ` -}}` after.
//!
//! Missing fields render as the empty string.

use serde_json::Value;
use taskgate_types::task::TaskSpec;
use taskgate_types::trigger::TaskBlueprint;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("unclosed action starting at offset {0}")]
    Unclosed(usize),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("malformed field path '{0}'")]
    MalformedPath(String),

    #[error("bad action '{action}': {message}")]
    Syntax { action: String, message: String },

    #[error("{function}: {message}")]
    Function {
        function: &'static str,
        message: String,
    },
}

/// Render the description and context values of a trigger's task template.
pub fn render_blueprint(blueprint: &TaskBlueprint, payload: &Value) -> Result<TaskSpec, RenderError> {
    let mut contexts = blueprint.contexts.clone();
    for item in &mut contexts {
        item.value = render(&item.value, payload)?;
    }
    Ok(TaskSpec {
        description: render(&blueprint.description, payload)?,
        agent_ref: blueprint.agent_ref.clone(),
        contexts,
        outputs: blueprint.outputs.clone(),
        template_ref: blueprint.template_ref.clone(),
        retry_policy: None,
    })
}

/// Expand `template` with `data` as the root (`.`) value.
pub fn render(template: &str, data: &Value) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    let mut trim_next = false;

    while let Some(start) = rest.find(OPEN) {
        let text = &rest[..start];
        push_text(&mut out, text, trim_next);

        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            return Err(RenderError::Unclosed(offset + start));
        };
        let mut action = &after_open[..end];

        if let Some(stripped) = strip_trim_left(action) {
            let kept = out.trim_end().len();
            out.truncate(kept);
            action = stripped;
        }
        trim_next = false;
        if let Some(stripped) = strip_trim_right(action) {
            trim_next = true;
            action = stripped;
        }

        let value = eval_action(action.trim(), data)?;
        out.push_str(&to_text(&value));

        let consumed = start + OPEN.len() + end + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }
    push_text(&mut out, rest, trim_next);
    Ok(out)
}

fn push_text(out: &mut String, text: &str, trim_leading: bool) {
    if trim_leading {
        out.push_str(text.trim_start());
    } else {
        out.push_str(text);
    }
}

/// `{{- x` trims only when the dash is followed by whitespace.
fn strip_trim_left(action: &str) -> Option<&str> {
    let rest = action.strip_prefix('-')?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn strip_trim_right(action: &str) -> Option<&str> {
    let rest = action.strip_suffix('-')?;
    rest.ends_with(char::is_whitespace).then_some(rest)
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Path(String),
    Literal(Value),
    Ident(String),
}

fn eval_action(action: &str, data: &Value) -> Result<Value, RenderError> {
    if action.is_empty() {
        return Err(syntax(action, "empty action"));
    }
    let mut piped: Option<Value> = None;
    for stage in split_pipeline(action)? {
        let terms = tokenize(stage.trim(), action)?;
        piped = Some(eval_stage(&terms, piped, data, action)?);
    }
    piped.ok_or_else(|| syntax(action, "empty pipeline"))
}

fn eval_stage(
    terms: &[Term],
    piped: Option<Value>,
    data: &Value,
    action: &str,
) -> Result<Value, RenderError> {
    match terms {
        [] => Err(syntax(action, "empty pipeline stage")),
        [Term::Ident(name), args @ ..] => {
            let mut values = args
                .iter()
                .map(|arg| eval_term(arg, data, action))
                .collect::<Result<Vec<_>, _>>()?;
            values.extend(piped);
            call(name, values)
        }
        [single] if piped.is_none() => eval_term(single, data, action),
        _ => Err(syntax(action, "expected a function name")),
    }
}

fn eval_term(term: &Term, data: &Value, action: &str) -> Result<Value, RenderError> {
    match term {
        Term::Path(path) => lookup(data, path),
        Term::Literal(value) => Ok(value.clone()),
        Term::Ident(name) => Err(syntax(action, format!("function '{name}' used as an argument"))),
    }
}

fn call(name: &str, mut args: Vec<Value>) -> Result<Value, RenderError> {
    match name {
        "toJson" => {
            let value = single_arg("toJson", args)?;
            serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|e| function_error("toJson", e.to_string()))
        }
        "toPrettyJson" => {
            let value = single_arg("toPrettyJson", args)?;
            serde_json::to_string_pretty(&value)
                .map(Value::String)
                .map_err(|e| function_error("toPrettyJson", e.to_string()))
        }
        "quote" => {
            let value = single_arg("quote", args)?;
            serde_json::to_string(&Value::String(to_text(&value)))
                .map(Value::String)
                .map_err(|e| function_error("quote", e.to_string()))
        }
        "default" => {
            if args.len() != 2 {
                return Err(function_error(
                    "default",
                    format!("expected a fallback and a value, got {} arguments", args.len()),
                ));
            }
            let value = args.pop().unwrap_or(Value::Null);
            let fallback = args.pop().unwrap_or(Value::Null);
            Ok(if is_empty(&value) { fallback } else { value })
        }
        other => Err(RenderError::UnknownFunction(other.to_string())),
    }
}

fn single_arg(function: &'static str, mut args: Vec<Value>) -> Result<Value, RenderError> {
    if args.len() != 1 {
        return Err(function_error(
            function,
            format!("expected 1 argument, got {}", args.len()),
        ));
    }
    Ok(args.pop().unwrap_or(Value::Null))
}

/// Empty in the sense of the `default` helper.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Resolve `.a.b.0` against `data`. Missing keys resolve to null.
fn lookup(data: &Value, path: &str) -> Result<Value, RenderError> {
    if path == "." {
        return Ok(data.clone());
    }
    let Some(rest) = path.strip_prefix('.') else {
        return Err(RenderError::MalformedPath(path.to_string()));
    };

    let segments: Vec<&str> = rest.split('.').collect();
    let valid = segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return Err(RenderError::MalformedPath(path.to_string()));
    }

    let mut current = data;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

/// Text form of a value: strings verbatim, null empty, everything else JSON.
fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

/// Split on `|` outside string literals.
fn split_pipeline(action: &str) -> Result<Vec<&str>, RenderError> {
    let mut stages = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in action.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q == '"' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '`' => quote = Some(c),
                '|' => {
                    stages.push(&action[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    if quote.is_some() {
        return Err(syntax(action, "unterminated string"));
    }
    stages.push(&action[start..]);
    Ok(stages)
}

fn tokenize(stage: &str, action: &str) -> Result<Vec<Term>, RenderError> {
    let mut terms = Vec::new();
    let mut chars = stage.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' || c == '`' {
            let literal = read_string(stage, start, c, action)?;
            let consumed = literal.1;
            terms.push(Term::Literal(Value::String(literal.0)));
            while chars.peek().is_some_and(|&(i, _)| i < start + consumed) {
                chars.next();
            }
            continue;
        }

        let mut end = stage.len();
        while let Some(&(i, ch)) = chars.peek() {
            if ch.is_whitespace() {
                end = i;
                break;
            }
            chars.next();
        }
        let word = &stage[start..end];
        terms.push(classify_word(word, action)?);
    }
    Ok(terms)
}

/// Returns the unescaped string and the number of bytes consumed.
fn read_string(stage: &str, start: usize, delim: char, action: &str) -> Result<(String, usize), RenderError> {
    let body = &stage[start + 1..];
    if delim == '`' {
        let Some(end) = body.find('`') else {
            return Err(syntax(action, "unterminated string"));
        };
        return Ok((body[..end].to_string(), end + 2));
    }

    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            let raw = &stage[start..start + i + 2];
            let value: String = serde_json::from_str(raw)
                .map_err(|e| syntax(action, format!("bad string literal: {e}")))?;
            return Ok((value, i + 2));
        }
    }
    Err(syntax(action, "unterminated string"))
}

fn classify_word(word: &str, action: &str) -> Result<Term, RenderError> {
    if word.starts_with('.') {
        return Ok(Term::Path(word.to_string()));
    }
    match word {
        "true" => return Ok(Term::Literal(Value::Bool(true))),
        "false" => return Ok(Term::Literal(Value::Bool(false))),
        "nil" => return Ok(Term::Literal(Value::Null)),
        _ => {}
    }
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        return serde_json::from_str::<serde_json::Number>(word)
            .map(|n| Term::Literal(Value::Number(n)))
            .map_err(|_| syntax(action, format!("bad number '{word}'")));
    }
    if word.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Ok(Term::Ident(word.to_string()));
    }
    Err(syntax(action, format!("unexpected '{word}'")))
}

fn syntax(action: &str, message: impl Into<String>) -> RenderError {
    RenderError::Syntax {
        action: action.to_string(),
        message: message.into(),
    }
}

fn function_error(function: &'static str, message: impl Into<String>) -> RenderError {
    RenderError::Function {
        function,
        message: message.into(),
    }
}
