/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template tree types.
//!
//! The parser produces an ordered sequence of [`Node`]s. Tag blocks carry
//! their parsed arguments and zero or more child branches (e.g. the
//! `if`/`elif`/`else` arms of a conditional). Every node records the line
//! it started on for error reporting.

use crate::expr::Expr;

/// A node in the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Verbatim output text.
    Literal { text: String, line: usize },

    /// An output expression: `{{ expression | filters }}`
    Output { expr: Expr, line: usize },

    /// A structural or custom tag with its parsed arguments and children.
    Tag(TagNode),
}

impl Node {
    pub fn line(&self) -> usize {
        match self {
            Node::Literal { line, .. } | Node::Output { line, .. } => *line,
            Node::Tag(tag) => tag.line,
        }
    }
}

/// A parsed tag and its nested child branches.
#[derive(Debug, Clone, PartialEq)]
pub struct TagNode {
    /// The tag name as written (`if`, `for`, `block`, custom names...).
    pub name: String,
    /// Parsed arguments of the opening tag.
    pub args: TagArgs,
    /// Line of the opening tag.
    pub line: usize,
    /// Child branches. Leaf tags have none; block tags have at least the
    /// main branch, plus one per intermediate (`else`, `elif`...).
    pub branches: Vec<Branch>,
}

impl TagNode {
    /// The main (first) branch's children, if the tag has any.
    pub fn children(&self) -> &[Node] {
        self.branches.first().map(|b| b.children.as_slice()).unwrap_or(&[])
    }
}

/// One child sequence of a tag block.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `None` for the main branch, otherwise the intermediate tag name
    /// that introduced it (`else`, `elif`, `elseif`).
    pub label: Option<String>,
    /// The branch condition, for `elif`/`elseif` arms.
    pub cond: Option<Expr>,
    pub children: Vec<Node>,
}

impl Branch {
    pub fn main(children: Vec<Node>) -> Self {
        Branch {
            label: None,
            cond: None,
            children,
        }
    }
}

/// Parsed arguments of a tag, shaped by the tag's grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum TagArgs {
    /// Tag takes no arguments (`parent`, `raw`, `spaceless`, `else`).
    None,
    /// Free-form comma-separated expressions (custom tags).
    Exprs(Vec<Expr>),
    /// `extends "base.html"`
    Extends { target: String },
    /// `block content`
    Block { name: String },
    /// `include "partial.html" [ignore missing] [with expr] [only]`
    Include {
        target: String,
        ignore_missing: bool,
        with: Option<Expr>,
        only: bool,
    },
    /// `import "forms.html" as forms`
    Import { target: String, namespace: String },
    /// `set name = expression`
    Set { name: String, expr: Expr },
    /// `if expression` (also used for `elif`/`elseif` arms)
    If { cond: Expr },
    /// `for x in expr` / `for k, v in expr`
    For {
        key: Option<String>,
        var: String,
        iter: Expr,
    },
    /// `macro input(name, size)`
    Macro { name: String, params: Vec<String> },
    /// `autoescape on|off|"js"`
    Autoescape { mode: EscapeSetting },
    /// `filter upper` / `filter pad(10)`
    Filter { name: String, args: Vec<Expr> },
}

/// Escaping behavior selected by options or the `autoescape` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EscapeSetting {
    /// HTML entity escaping (the default).
    Html,
    /// JavaScript string escaping.
    Js,
    /// No escaping.
    Off,
}
