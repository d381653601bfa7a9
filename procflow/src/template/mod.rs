//! Template rendering for scripts and output declarations.
//!
//! Rendering is consumed through [`TemplateEngine`]. The built-in
//! [`SimpleTemplate`] supports `{{ path.to.value | filter | filter(arg) }}`
//! placeholders against a JSON data tree; anything richer can be plugged in
//! by implementing the trait.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::errors::TemplateRenderError;
use crate::utils::shell_quote;

/// A template engine: `render(source, data) -> string`.
pub trait TemplateEngine: Send + Sync + std::fmt::Debug {
    /// Returns the engine name used in configuration.
    fn name(&self) -> &str;

    /// Renders `source` against `data`.
    fn render(&self, source: &str, data: &Value) -> Result<String, TemplateRenderError>;
}

/// Returns the built-in engine registered under `name`.
#[must_use]
pub fn builtin_engine(name: &str) -> Option<Arc<dyn TemplateEngine>> {
    match name {
        "simple" => Some(Arc::new(SimpleTemplate)),
        _ => None,
    }
}

/// A minimal placeholder engine.
///
/// Supported filters: `basename`, `stem`, `ext`, `dirname`, `upper`,
/// `lower`, `quote`, `json`, `join(sep)`. Path filters map over lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTemplate;

impl TemplateEngine for SimpleTemplate {
    fn name(&self) -> &str {
        "simple"
    }

    fn render(&self, source: &str, data: &Value) -> Result<String, TemplateRenderError> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                TemplateRenderError::new("template", format!("unclosed placeholder near '{}'", preview(&rest[start..])))
            })?;
            let value = evaluate(after[..end].trim(), data)?;
            out.push_str(&to_text(&value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(20).collect()
}

fn evaluate(expr: &str, data: &Value) -> Result<Value, TemplateRenderError> {
    let mut parts = split_pipes(expr).into_iter();
    let path = parts.next().unwrap_or_default();
    let mut value = lookup(path.trim(), data)?;
    for filter in parts {
        value = apply_filter(filter.trim(), value)?;
    }
    Ok(value)
}

/// Splits on `|` outside of quotes.
fn split_pipes(expr: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in expr.chars() {
        match (quote, c) {
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '|') => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn lookup(path: &str, data: &Value) -> Result<Value, TemplateRenderError> {
    if path.is_empty() {
        return Err(TemplateRenderError::new("template", "empty placeholder"));
    }
    let mut current = data;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next
            .ok_or_else(|| TemplateRenderError::new("template", format!("'{path}' is undefined")))?;
    }
    Ok(current.clone())
}

fn apply_filter(filter: &str, value: Value) -> Result<Value, TemplateRenderError> {
    let (name, arg) = match filter.find('(') {
        Some(open) if filter.ends_with(')') => {
            let raw = filter[open + 1..filter.len() - 1].trim();
            (filter[..open].trim(), Some(unquote(raw)))
        }
        _ => (filter, None),
    };

    let mapped = |f: fn(&str) -> String, value: Value| match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| Value::String(f(&to_text(v))))
                .collect(),
        ),
        other => Value::String(f(&to_text(&other))),
    };

    match name {
        "basename" => Ok(mapped(basename, value)),
        "stem" => Ok(mapped(stem, value)),
        "ext" => Ok(mapped(ext, value)),
        "dirname" => Ok(mapped(dirname, value)),
        "upper" => Ok(mapped(|s| s.to_uppercase(), value)),
        "lower" => Ok(mapped(|s| s.to_lowercase(), value)),
        "quote" => Ok(mapped(shell_quote, value)),
        "json" => serde_json::to_string(&value)
            .map(Value::String)
            .map_err(|e| TemplateRenderError::new("template", e.to_string())),
        "join" => {
            let sep = arg.unwrap_or_else(|| " ".to_string());
            match value {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(&sep),
                )),
                other => Ok(Value::String(to_text(&other))),
            }
        }
        other => Err(TemplateRenderError::new(
            "template",
            format!("unknown filter '{other}'"),
        )),
    }
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for q in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(q) && trimmed.ends_with(q) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn basename(s: &str) -> String {
    Path::new(s)
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

fn stem(s: &str) -> String {
    Path::new(s)
        .file_stem()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

fn ext(s: &str) -> String {
    Path::new(s)
        .extension()
        .map_or_else(String::new, |e| format!(".{}", e.to_string_lossy()))
}

fn dirname(s: &str) -> String {
    Path::new(s)
        .parent()
        .map_or_else(String::new, |p| p.to_string_lossy().into_owned())
}

/// Renders a JSON value as template text; null renders empty.
#[must_use]
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
