/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Variable contexts and render-time scope chains.
//!
//! [`Context`] is the caller-facing bag of variables handed to a render
//! call. [`ScopeChain`] is the runtime structure the executor threads
//! through a render: a stack of frames where `set` writes into the current
//! frame ("block scope") while loop variables are save-and-restore shadows
//! that never corrupt outer bindings.

use std::collections::BTreeMap;

use crate::value::Value;

/// A set of variable bindings for template rendering.
#[derive(Debug, Clone, Default)]
pub struct Context {
    variables: BTreeMap<String, Value>,
}

impl Context {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable into the context.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a variable from the context.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Build a context from a JSON object. Non-object values produce an
    /// empty context.
    pub fn from_json(json: serde_json::Value) -> Self {
        match Value::from(json) {
            Value::Map(m) => Context { variables: m },
            _ => Context::new(),
        }
    }

    /// Merge another context on top of this one; `other`'s bindings win.
    pub fn merged_with(&self, other: &Context) -> Context {
        let mut variables = self.variables.clone();
        for (k, v) in &other.variables {
            variables.insert(k.clone(), v.clone());
        }
        Context { variables }
    }

    pub(crate) fn into_frame(self) -> BTreeMap<String, Value> {
        self.variables
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

/// A stack of variable frames used during execution.
///
/// One frame is pushed per template or macro invocation, never per control
/// construct: a `set` inside a loop or conditional body therefore remains
/// visible after the construct exits, within the same enclosing frame.
#[derive(Debug, Default)]
pub(crate) struct ScopeChain {
    frames: Vec<BTreeMap<String, Value>>,
}

impl ScopeChain {
    pub fn new(root: BTreeMap<String, Value>) -> Self {
        ScopeChain { frames: vec![root] }
    }

    /// Push a fresh frame (template body, macro invocation, `only` include).
    pub fn push_frame(&mut self, frame: BTreeMap<String, Value>) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the root frame");
        self.frames.pop();
    }

    /// Look a name up through the chain, innermost frame first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Bind a name in the current frame.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// Bind a loop-local name, returning the binding it shadowed in the
    /// current frame (if any) so it can be restored afterwards.
    pub fn shadow(&mut self, name: &str, value: Value) -> Option<Value> {
        self.frames.last_mut()?.insert(name.to_string(), value)
    }

    /// Undo a [`ScopeChain::shadow`]: restore the previous binding or
    /// remove the name entirely.
    pub fn unshadow(&mut self, name: &str, previous: Option<Value>) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match previous {
            Some(v) => {
                frame.insert(name.to_string(), v);
            }
            None => {
                frame.remove(name);
            }
        }
    }
}
