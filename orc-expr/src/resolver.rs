use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::context::Context;
use crate::error::{ExprError, Result};
use crate::path::{parse_path, walk};

/// Matches a reference that fills the entire string, nothing else —
/// eligible for type-preserving substitution (spec §4.2 step 4).
static WHOLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\{([^}]*)\}$").unwrap());
/// Matches every `${...}` occurrence, for embedded (string-producing)
/// substitution and for scanning task references.
static PART_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

/// Recursively resolves every `${scope.path}` reference in `value` against
/// `ctx`, returning a new `Value` with all references substituted.
pub fn resolve_parameters(value: &Value, ctx: &Context) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_parameters(item, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_parameters(item, ctx)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, ctx: &Context) -> Result<Value> {
    if let Some(caps) = WHOLE_RE.captures(s) {
        return resolve_reference(&caps[1], ctx);
    }

    if !s.contains("${") {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last_end = 0;
    for caps in PART_RE.captures_iter(s) {
        let whole_match = caps.get(0).unwrap();
        out.push_str(&s[last_end..whole_match.start()]);
        let resolved = resolve_reference(&caps[1], ctx)?;
        out.push_str(&scalar_to_string(&resolved));
        last_end = whole_match.end();
    }
    out.push_str(&s[last_end..]);
    Ok(Value::String(out))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Resolves one `${...}` body, already stripped of its braces: a path,
/// optionally followed by `?? default`.
fn resolve_reference(raw: &str, ctx: &Context) -> Result<Value> {
    let (path_expr, default) = match raw.split_once("??") {
        Some((path, default)) => (path.trim(), Some(default.trim())),
        None => (raw.trim(), None),
    };

    match evaluate_path(path_expr, ctx)? {
        Some(value) if !value.is_null() => Ok(value),
        _ => match default {
            Some(literal) => Ok(parse_default_literal(literal)),
            None => Err(ExprError::MissingRef(path_expr.to_string())),
        },
    }
}

fn parse_default_literal(literal: &str) -> Value {
    match literal {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = literal.parse::<f64>() {
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(literal.to_string()))
            } else {
                let unquoted = literal.trim_matches('"').trim_matches('\'');
                Value::String(unquoted.to_string())
            }
        }
    }
}

/// Dispatches on the leading scope keyword and walks the remaining path
/// against the matching part of `ctx` (spec §4.2 scopes). Returns an owned
/// `Value`: task/input lookups clone out of the context, and the scalar
/// scopes (`env`, `workflow`) have no `Value` to borrow from in the first
/// place.
fn evaluate_path(path: &str, ctx: &Context) -> Result<Option<Value>> {
    let (scope, rest) = path
        .split_once('.')
        .ok_or_else(|| ExprError::MalformedPath(path.to_string()))?;

    match scope {
        "tasks" => {
            let (task_name, task_path) = rest
                .split_once('.')
                .ok_or_else(|| ExprError::MalformedPath(path.to_string()))?;
            let output = match ctx.tasks.get(task_name) {
                Some(output) => output,
                None => return Ok(None),
            };
            let segments = parse_path(task_path)?;
            Ok(walk(output, &segments).cloned())
        }
        "env" => Ok(ctx.env.get(rest).map(|v| Value::String(v.clone()))),
        "workflow" => Ok(match rest {
            "id" => Some(Value::String(ctx.workflow_id.to_string())),
            "version" => Some(Value::Number(ctx.workflow_version.into())),
            "startedAt" => Some(Value::String(ctx.workflow_started_at.to_rfc3339())),
            _ => None,
        }),
        "input" => {
            let segments = parse_path(rest)?;
            Ok(walk(ctx.input, &segments).cloned())
        }
        other => Err(ExprError::UnknownScope(other.to_string())),
    }
}

/// Collects the set of task names referenced via `${tasks.X...}` anywhere
/// inside `value`, for the planner's implicit-dependency inference (spec
/// §4.4 step 3). Non-string values and malformed references are ignored —
/// the planner only cares about well-formed task references here; a
/// genuinely malformed expression still surfaces as a `ResolveError` at
/// dispatch time.
pub fn scan_task_references(value: &Value) -> std::collections::BTreeSet<String> {
    let mut found = std::collections::BTreeSet::new();
    collect_task_references(value, &mut found);
    found
}

fn collect_task_references(value: &Value, found: &mut std::collections::BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in PART_RE.captures_iter(s) {
                let raw = caps[1].trim();
                let path_expr = raw.split_once("??").map(|(p, _)| p.trim()).unwrap_or(raw);
                if let Some(rest) = path_expr.strip_prefix("tasks.") {
                    if let Some((task_name, _)) = rest.split_once('.') {
                        found.insert(task_name.to_string());
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_task_references(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_task_references(v, found)),
        _ => {}
    }
}
