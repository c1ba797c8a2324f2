/*
 * exec.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Program execution.
//!
//! The executor interprets a compiled [`Program`] against a scope chain,
//! a filter table and the custom-tag extensions table. Escaping is
//! applied exactly once, at the emit instruction: values carrying the
//! safe marker bypass it, and the `autoescape` instruction swaps the
//! active mode for the duration of its body.
//!
//! Scoping rules: one frame per template, macro invocation or `only`
//! include. Control constructs never push frames, so a `set` inside a
//! loop or conditional survives it. Loop variables are shadows on the
//! current frame, restored when the loop exits.

use std::collections::{BTreeMap, HashMap};

use crate::ast::EscapeSetting;
use crate::codegen::{Instr, MacroDef, Program};
use crate::context::ScopeChain;
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{BinOp, Expr, PathSeg, UnaryOp};
use crate::filters::{FilterTable, escape_html, escape_js};
use crate::registry::{TagCall, TagTable};
use crate::value::Value;

/// Render-time environment shared by every instruction of a render.
pub(crate) struct RenderEnv<'a> {
    pub filters: &'a FilterTable,
    pub tags: &'a TagTable,
    pub autoescape: EscapeSetting,
}

/// Execute a program against a root variable frame.
pub(crate) fn execute(
    program: &Program,
    root: BTreeMap<String, Value>,
    env: &RenderEnv<'_>,
) -> TemplateResult<String> {
    let mut executor = Executor {
        env,
        scopes: ScopeChain::new(root),
        macros: vec![index_macros(&program.macros)],
        imports: HashMap::new(),
        escape: vec![env.autoescape],
    };
    let mut out = String::new();
    executor.run(&program.body, &mut out)?;
    Ok(out)
}

fn index_macros(macros: &[MacroDef]) -> HashMap<String, MacroDef> {
    macros
        .iter()
        .map(|m| (m.name.clone(), m.clone()))
        .collect()
}

struct Executor<'a> {
    env: &'a RenderEnv<'a>,
    scopes: ScopeChain,
    /// Macro tables, one per template nesting level (`include` pushes).
    /// Lookup uses only the innermost table: a template sees its own
    /// macros, never those of the template that included it.
    macros: Vec<HashMap<String, MacroDef>>,
    /// Namespaced macro sets bound by `import`, for the current template.
    imports: HashMap<String, HashMap<String, MacroDef>>,
    /// Active escaping modes; `autoescape` pushes, last entry wins.
    escape: Vec<EscapeSetting>,
}

impl Executor<'_> {
    fn run(&mut self, body: &[Instr], out: &mut String) -> TemplateResult<()> {
        for instr in body {
            self.exec(instr, out)?;
        }
        Ok(())
    }

    fn exec(&mut self, instr: &Instr, out: &mut String) -> TemplateResult<()> {
        match instr {
            Instr::Append(text) => out.push_str(text),

            Instr::Emit { expr, line } => {
                let value = self.eval(expr, *line)?;
                self.write_value(&value, out);
            }

            Instr::Set { name, expr, line } => {
                let value = self.eval(expr, *line)?;
                self.scopes.set(name.clone(), value);
            }

            Instr::If {
                branches,
                otherwise,
                line,
            } => {
                for (cond, children) in branches {
                    if self.eval(cond, *line)?.is_truthy() {
                        return self.run(children, out);
                    }
                }
                if let Some(children) = otherwise {
                    self.run(children, out)?;
                }
            }

            Instr::For {
                key,
                var,
                iter,
                body,
                otherwise,
                line,
            } => self.exec_for(key.as_deref(), var, iter, body, otherwise.as_deref(), *line, out)?,

            Instr::Include {
                target,
                program,
                with,
                only,
            } => {
                let Some(program) = program else {
                    return Ok(());
                };
                let with_frame = match with {
                    Some(expr) => match self.eval(expr, 0)? {
                        Value::Map(m) => m,
                        other => {
                            return Err(TemplateError::render(format!(
                                "\"include\" of \"{target}\" expects a map after \"with\", got {}",
                                kind_name(&other)
                            )));
                        }
                    },
                    None => BTreeMap::new(),
                };
                self.run_nested_template(program, with_frame, *only, out)?;
            }

            Instr::Import { namespace, macros } => {
                self.imports
                    .insert(namespace.clone(), index_macros(macros));
            }

            Instr::Autoescape { mode, body } => {
                self.escape.push(*mode);
                let result = self.run(body, out);
                self.escape.pop();
                result?;
            }

            Instr::ApplyFilter {
                name,
                args,
                body,
                line,
            } => {
                let mut text = String::new();
                self.run(body, &mut text)?;
                let mut call_args = vec![Value::Safe(text)];
                for arg in args {
                    call_args.push(self.eval(arg, *line)?);
                }
                let filter = self.env.filters.get(name).ok_or_else(|| {
                    TemplateError::UnknownFilter {
                        name: name.clone(),
                        line: *line,
                    }
                })?;
                out.push_str(&filter(&call_args)?.render());
            }

            Instr::Spaceless { body } => {
                let mut text = String::new();
                self.run(body, &mut text)?;
                out.push_str(&strip_between_tags(&text));
            }

            Instr::CallTag {
                name,
                args,
                body,
                line,
            } => {
                let render = self.env.tags.get(name).cloned().ok_or_else(|| {
                    TemplateError::render(format!(
                        "no render function registered for tag \"{name}\" (line {line})"
                    ))
                })?;
                let mut call_args = Vec::with_capacity(args.len());
                for arg in args {
                    call_args.push(self.eval(arg, *line)?);
                }
                let call_body = match body {
                    Some(body) => {
                        let mut text = String::new();
                        self.run(body, &mut text)?;
                        Some(text)
                    }
                    None => None,
                };
                out.push_str(&render(&TagCall {
                    args: call_args,
                    body: call_body,
                })?);
            }
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        key: Option<&str>,
        var: &str,
        iter: &Expr,
        body: &[Instr],
        otherwise: Option<&[Instr]>,
        line: usize,
        out: &mut String,
    ) -> TemplateResult<()> {
        let iterable = self.eval(iter, line)?;
        let entries: Vec<(Option<String>, Value)> = match iterable {
            Value::List(items) => items.into_iter().map(|v| (None, v)).collect(),
            Value::Map(m) => m.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            Value::Str(s) | Value::Safe(s) => s
                .chars()
                .map(|c| (None, Value::Str(c.to_string())))
                .collect(),
            _ => Vec::new(),
        };

        if entries.is_empty() {
            if let Some(otherwise) = otherwise {
                self.run(otherwise, out)?;
            }
            return Ok(());
        }

        let saved_var = self.scopes.shadow(var, Value::Null);
        let saved_key = key.map(|k| (k, self.scopes.shadow(k, Value::Null)));
        let saved_loop = self.scopes.shadow("loop", Value::Null);

        let length = entries.len();
        let mut result = Ok(());
        for (i, (entry_key, value)) in entries.into_iter().enumerate() {
            let mut loop_map = BTreeMap::new();
            loop_map.insert("index".to_string(), Value::Int(i as i64 + 1));
            loop_map.insert("index0".to_string(), Value::Int(i as i64));
            loop_map.insert("first".to_string(), Value::Bool(i == 0));
            loop_map.insert("last".to_string(), Value::Bool(i + 1 == length));
            loop_map.insert("length".to_string(), Value::Int(length as i64));
            loop_map.insert(
                "key".to_string(),
                entry_key
                    .clone()
                    .map(Value::Str)
                    .unwrap_or(Value::Int(i as i64)),
            );
            self.scopes.set("loop", Value::Map(loop_map));
            if let Some(k) = key {
                self.scopes
                    .set(k, entry_key.map(Value::Str).unwrap_or(Value::Int(i as i64)));
            }
            self.scopes.set(var, value);

            result = self.run(body, out);
            if result.is_err() {
                break;
            }
        }

        self.scopes.unshadow("loop", saved_loop);
        if let Some((k, saved)) = saved_key {
            self.scopes.unshadow(k, saved);
        }
        self.scopes.unshadow(var, saved_var);
        result
    }

    /// Run an embedded template program. A plain include sees the caller's
    /// variables through a pushed frame; `only` swaps in an isolated chain
    /// holding nothing but the `with` bindings.
    fn run_nested_template(
        &mut self,
        program: &Program,
        with_frame: BTreeMap<String, Value>,
        only: bool,
        out: &mut String,
    ) -> TemplateResult<()> {
        self.macros.push(index_macros(&program.macros));
        let saved_imports = std::mem::take(&mut self.imports);

        let result = if only {
            let saved_scopes =
                std::mem::replace(&mut self.scopes, ScopeChain::new(with_frame));
            let result = self.run(&program.body, out);
            self.scopes = saved_scopes;
            result
        } else {
            self.scopes.push_frame(with_frame);
            let result = self.run(&program.body, out);
            self.scopes.pop_frame();
            result
        };

        self.imports = saved_imports;
        self.macros.pop();
        result
    }

    /// Invoke a macro: a fresh scope holding only the bound parameters.
    /// Missing arguments bind null; extras are ignored. The output is
    /// marked safe so emitting it does not escape a second time.
    fn call_macro(&mut self, def: MacroDef, args: Vec<Value>) -> TemplateResult<Value> {
        let mut frame = BTreeMap::new();
        for (i, param) in def.params.iter().enumerate() {
            frame.insert(
                param.clone(),
                args.get(i).cloned().unwrap_or(Value::Null),
            );
        }

        let saved_scopes = std::mem::replace(&mut self.scopes, ScopeChain::new(frame));
        let mut out = String::new();
        let result = self.run(&def.body, &mut out);
        self.scopes = saved_scopes;
        result?;
        Ok(Value::Safe(out))
    }

    fn write_value(&self, value: &Value, out: &mut String) {
        if value.is_safe() {
            out.push_str(&value.render());
            return;
        }
        let text = value.render();
        match self.escape.last().copied().unwrap_or(self.env.autoescape) {
            EscapeSetting::Html => out.push_str(&escape_html(&text)),
            EscapeSetting::Js => out.push_str(&escape_js(&text)),
            EscapeSetting::Off => out.push_str(&text),
        }
    }

    fn eval(&mut self, expr: &Expr, line: usize) -> TemplateResult<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),

            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, line)?);
                }
                Ok(Value::List(out))
            }

            Expr::Map(entries) => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    out.insert(k.clone(), self.eval(v, line)?);
                }
                Ok(Value::Map(out))
            }

            Expr::Var(path) => self.eval_path(path, line),

            Expr::Unary { op, expr } => {
                let value = self.eval(expr, line)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(TemplateError::render(format!(
                            "cannot negate {} on line {line}",
                            kind_name(&other)
                        ))),
                    },
                }
            }

            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, line),

            Expr::Filter { name, input, args } => {
                let mut call_args = vec![self.eval(input, line)?];
                for arg in args {
                    call_args.push(self.eval(arg, line)?);
                }
                let filter = self.env.filters.get(name).ok_or_else(|| {
                    TemplateError::UnknownFilter {
                        name: name.clone(),
                        line,
                    }
                })?;
                filter(&call_args)
            }

            Expr::Call { path, args } => {
                let def = self.lookup_macro(path).ok_or_else(|| {
                    TemplateError::render(format!(
                        "unknown macro \"{}\" on line {line}",
                        path.join(".")
                    ))
                })?;
                let mut call_args = Vec::with_capacity(args.len());
                for arg in args {
                    call_args.push(self.eval(arg, line)?);
                }
                self.call_macro(def, call_args)
            }
        }
    }

    fn lookup_macro(&self, path: &[String]) -> Option<MacroDef> {
        match path {
            [name] => self.macros.last()?.get(name).cloned(),
            [namespace, name] => self.imports.get(namespace)?.get(name).cloned(),
            _ => None,
        }
    }

    fn eval_path(&mut self, path: &[PathSeg], line: usize) -> TemplateResult<Value> {
        let mut segs = path.iter();
        let mut current = match segs.next() {
            Some(PathSeg::Key(name)) => self.scopes.get(name).cloned().unwrap_or(Value::Null),
            Some(other) => {
                return Err(TemplateError::render(format!(
                    "variable path cannot start with {other:?} on line {line}"
                )));
            }
            None => return Ok(Value::Null),
        };

        for seg in segs {
            current = match seg {
                PathSeg::Key(key) => current.get_key(key).cloned().unwrap_or(Value::Null),
                PathSeg::Index(i) => current.get_index(*i).cloned().unwrap_or(Value::Null),
                PathSeg::Dynamic(inner) => {
                    let key = self.eval(inner, line)?;
                    match key {
                        Value::Int(i) => current.get_index(i).cloned().unwrap_or(Value::Null),
                        Value::Str(s) | Value::Safe(s) => {
                            current.get_key(&s).cloned().unwrap_or(Value::Null)
                        }
                        _ => Value::Null,
                    }
                }
            };
        }
        Ok(current)
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
    ) -> TemplateResult<Value> {
        // Short-circuit operators yield the deciding operand, not a bool.
        match op {
            BinOp::Or => {
                let left = self.eval(lhs, line)?;
                return if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(rhs, line)
                };
            }
            BinOp::And => {
                let left = self.eval(lhs, line)?;
                return if left.is_truthy() {
                    self.eval(rhs, line)
                } else {
                    Ok(left)
                };
            }
            _ => {}
        }

        let left = self.eval(lhs, line)?;
        let right = self.eval(rhs, line)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
            BinOp::Ne => Ok(Value::Bool(!left.loose_eq(&right))),
            BinOp::Lt => Ok(Value::Bool(
                left.compare(&right) == Some(std::cmp::Ordering::Less),
            )),
            BinOp::Le => Ok(Value::Bool(matches!(
                left.compare(&right),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ))),
            BinOp::Gt => Ok(Value::Bool(
                left.compare(&right) == Some(std::cmp::Ordering::Greater),
            )),
            BinOp::Ge => Ok(Value::Bool(matches!(
                left.compare(&right),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ))),
            BinOp::In => Ok(Value::Bool(right.contains(&left))),
            BinOp::Add => {
                if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
                    return Ok(Value::Int(a + b));
                }
                if matches!(left, Value::Str(_) | Value::Safe(_))
                    || matches!(right, Value::Str(_) | Value::Safe(_))
                {
                    return Ok(Value::Str(format!("{}{}", left.render(), right.render())));
                }
                self.numeric_op(op, &left, &right, line)
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => {
                self.numeric_op(op, &left, &right, line)
            }
            BinOp::Or | BinOp::And => unreachable!("short-circuited above"),
        }
    }

    fn numeric_op(
        &self,
        op: BinOp,
        left: &Value,
        right: &Value,
        line: usize,
    ) -> TemplateResult<Value> {
        let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
            return Err(TemplateError::render(format!(
                "cannot apply arithmetic to {} and {} on line {line}",
                kind_name(left),
                kind_name(right)
            )));
        };
        if matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) && b == 0.0 {
            return Err(TemplateError::render(format!(
                "division by zero on line {line}"
            )));
        }

        let both_int = matches!(left, Value::Int(_)) && matches!(right, Value::Int(_));
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::FloorDiv => (a / b).floor(),
            BinOp::Mod => a % b,
            _ => unreachable!("non-arithmetic operator"),
        };

        // Integer inputs keep integer results, except true division.
        if both_int && op != BinOp::Div && result.fract() == 0.0 {
            Ok(Value::Int(result as i64))
        } else {
            Ok(Value::Float(result))
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Int(_) | Value::Float(_) => "a number",
        Value::Str(_) | Value::Safe(_) => "a string",
        Value::List(_) => "a list",
        Value::Map(_) => "a map",
    }
}

/// Remove whitespace runs between a closing `>` and the next opening `<`.
fn strip_between_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending = String::new();
    let mut after_tag = false;
    for c in text.chars() {
        if after_tag && c.is_whitespace() {
            pending.push(c);
            continue;
        }
        if after_tag && c == '<' {
            pending.clear();
        }
        if !pending.is_empty() {
            out.push_str(&pending);
            pending.clear();
        }
        out.push(c);
        after_tag = c == '>';
    }
    out.push_str(&pending);
    out
}
