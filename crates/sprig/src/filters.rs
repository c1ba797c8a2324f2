/*
 * filters.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Filter table and built-in filters.
//!
//! A filter is a function of its input value plus any parenthesized
//! arguments, returning a new value. The table starts populated with the
//! built-ins; registering a filter under an existing name replaces it.
//!
//! Filter names are checked at compile time, so a render can only ever
//! see names present in the table it was compiled against.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{TemplateError, TemplateResult};
use crate::value::Value;

/// A filter function. `args[0]` is the input value; any further elements
/// are the filter's own arguments in source order.
pub type FilterFn = Arc<dyn Fn(&[Value]) -> TemplateResult<Value> + Send + Sync>;

/// The filter table handed to compiled artifacts at render time.
#[derive(Clone)]
pub struct FilterTable {
    filters: HashMap<String, FilterFn>,
}

impl Default for FilterTable {
    fn default() -> Self {
        let mut table = FilterTable {
            filters: HashMap::new(),
        };
        table.register("safe", Arc::new(filter_safe));
        table.register("raw", Arc::new(filter_safe));
        table.register("escape", Arc::new(filter_escape));
        table.register("e", Arc::new(filter_escape));
        table.register("default", Arc::new(filter_default));
        table.register("upper", Arc::new(filter_upper));
        table.register("lower", Arc::new(filter_lower));
        table.register("capitalize", Arc::new(filter_capitalize));
        table.register("length", Arc::new(filter_length));
        table.register("join", Arc::new(filter_join));
        table.register("first", Arc::new(filter_first));
        table.register("last", Arc::new(filter_last));
        table.register("reverse", Arc::new(filter_reverse));
        table
    }
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter. Overwrites any existing filter of the same name.
    pub fn register(&mut self, name: impl Into<String>, filter: FilterFn) {
        self.filters.insert(name.into(), filter);
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

impl std::fmt::Debug for FilterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterTable")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn input<'a>(args: &'a [Value], name: &str) -> TemplateResult<&'a Value> {
    args.first()
        .ok_or_else(|| TemplateError::render(format!("filter \"{name}\" received no input")))
}

/// Mark the input as safe: it will bypass output escaping.
fn filter_safe(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "safe")?;
    Ok(Value::Safe(v.render()))
}

/// Escape the input now and mark the result safe, so it is not escaped
/// a second time on output. An optional `"js"` argument selects
/// JavaScript string escaping.
fn filter_escape(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "escape")?;
    if v.is_safe() {
        return Ok(v.clone());
    }
    let text = v.render();
    let escaped = match args.get(1) {
        Some(Value::Str(mode)) if mode == "js" => escape_js(&text),
        Some(Value::Str(mode)) if mode == "html" => escape_html(&text),
        None => escape_html(&text),
        Some(other) => {
            return Err(TemplateError::render(format!(
                "unknown escape mode \"{}\"",
                other.render()
            )));
        }
    };
    Ok(Value::Safe(escaped))
}

/// Substitute the first argument when the input is null.
fn filter_default(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "default")?;
    let fallback = args.get(1).cloned().unwrap_or(Value::Null);
    match v {
        Value::Null => Ok(fallback),
        other => Ok(other.clone()),
    }
}

fn filter_upper(args: &[Value]) -> TemplateResult<Value> {
    Ok(Value::Str(input(args, "upper")?.render().to_uppercase()))
}

fn filter_lower(args: &[Value]) -> TemplateResult<Value> {
    Ok(Value::Str(input(args, "lower")?.render().to_lowercase()))
}

fn filter_capitalize(args: &[Value]) -> TemplateResult<Value> {
    let text = input(args, "capitalize")?.render();
    let mut chars = text.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    Ok(Value::Str(out))
}

/// Element count of a list or map, character count of a string.
fn filter_length(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "length")?;
    let n = match v {
        Value::Str(s) => s.chars().count(),
        Value::Safe(s) => s.chars().count(),
        other => other.len(),
    };
    Ok(Value::Int(n as i64))
}

/// Join list elements with a separator (empty by default).
fn filter_join(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "join")?;
    let sep = match args.get(1) {
        Some(s) => s.render(),
        None => String::new(),
    };
    match v {
        Value::List(items) => {
            let joined = items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Value::Str(joined))
        }
        other => Ok(Value::Str(other.render())),
    }
}

fn filter_first(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "first")?;
    match v {
        Value::List(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        Value::Str(s) => Ok(s.chars().next().map(|c| Value::Str(c.to_string())).unwrap_or(Value::Null)),
        other => Ok(other.clone()),
    }
}

fn filter_last(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "last")?;
    match v {
        Value::List(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        Value::Str(s) => Ok(s.chars().last().map(|c| Value::Str(c.to_string())).unwrap_or(Value::Null)),
        other => Ok(other.clone()),
    }
}

fn filter_reverse(args: &[Value]) -> TemplateResult<Value> {
    let v = input(args, "reverse")?;
    match v {
        Value::List(items) => {
            let mut items = items.clone();
            items.reverse();
            Ok(Value::List(items))
        }
        Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
        other => Ok(other.clone()),
    }
}

/// HTML entity escaping for output text.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// JavaScript string escaping for output text.
pub(crate) fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\u003C"),
            '>' => out.push_str("\\u003E"),
            '&' => out.push_str("\\u0026"),
            '=' => out.push_str("\\u003D"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn apply(table: &FilterTable, name: &str, args: &[Value]) -> Value {
        (table.get(name).unwrap())(args).unwrap()
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_escape_js() {
        assert_eq!(escape_js("a\"b\n<"), "a\\\"b\\n\\u003C");
    }

    #[test]
    fn test_safe_marks_value() {
        let table = FilterTable::default();
        let out = apply(&table, "safe", &[Value::Str("<b>".to_string())]);
        assert!(out.is_safe());
        assert_eq!(out.render(), "<b>");
    }

    #[test]
    fn test_escape_filter_is_idempotent() {
        let table = FilterTable::default();
        let once = apply(&table, "escape", &[Value::Str("<b>".to_string())]);
        assert_eq!(once.render(), "&lt;b&gt;");
        // Already-safe input passes through untouched.
        let twice = apply(&table, "escape", &[once]);
        assert_eq!(twice.render(), "&lt;b&gt;");
    }

    #[test]
    fn test_default_substitutes_null() {
        let table = FilterTable::default();
        let out = apply(
            &table,
            "default",
            &[Value::Null, Value::Str("fallback".to_string())],
        );
        assert_eq!(out.render(), "fallback");

        let kept = apply(
            &table,
            "default",
            &[Value::Int(0), Value::Str("fallback".to_string())],
        );
        assert_eq!(kept, Value::Int(0));
    }

    #[test]
    fn test_case_filters() {
        let table = FilterTable::default();
        assert_eq!(
            apply(&table, "upper", &[Value::from("tacos")]).render(),
            "TACOS"
        );
        assert_eq!(
            apply(&table, "lower", &[Value::from("TACOS")]).render(),
            "tacos"
        );
        assert_eq!(
            apply(&table, "capitalize", &[Value::from("tacos")]).render(),
            "Tacos"
        );
    }

    #[test]
    fn test_length_and_join() {
        let table = FilterTable::default();
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(apply(&table, "length", &[list.clone()]), Value::Int(3));
        assert_eq!(
            apply(&table, "join", &[list, Value::from(", ")]).render(),
            "1, 2, 3"
        );
    }

    #[test]
    fn test_registration_overwrites() {
        let mut table = FilterTable::default();
        table.register(
            "upper",
            Arc::new(|_args: &[Value]| Ok(Value::Str("overridden".to_string()))),
        );
        assert_eq!(apply(&table, "upper", &[Value::from("x")]).render(), "overridden");
    }
}
