/*
 * registry.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag registry.
//!
//! Maps tag names to their definitions: whether the tag opens a nested
//! scope, which intermediate tags may appear inside it, how its arguments
//! are parsed, and (for custom tags) how it compiles and renders.
//!
//! Registering a tag under an existing name replaces the previous
//! definition; later registration wins, no merge.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::codegen::Instr;
use crate::error::TemplateResult;
use crate::expr::Expr;
use crate::value::Value;

/// How a tag's arguments are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagGrammar {
    /// No arguments allowed.
    Empty,
    /// Free-form comma-separated expression list (custom tags).
    ExprList,
    /// A built-in structural tag with a fixed grammar.
    Extends,
    Block,
    Parent,
    Include,
    Import,
    Set,
    If,
    For,
    Macro,
    Autoescape,
    Raw,
    Filter,
    Spaceless,
}

/// Compile hook for custom tags: receives the parsed argument expressions
/// and the compiled child branch bodies, returns emitted instructions.
pub type TagCompileFn =
    Arc<dyn Fn(&[Expr], &[Vec<Instr>]) -> TemplateResult<Vec<Instr>> + Send + Sync>;

/// Render hook for custom tags without a compile hook: receives evaluated
/// arguments and the pre-rendered body, returns output text.
pub type TagRenderFn = Arc<dyn Fn(&TagCall) -> TemplateResult<String> + Send + Sync>;

/// The runtime invocation of a custom tag.
pub struct TagCall {
    /// Evaluated argument values, in source order.
    pub args: Vec<Value>,
    /// The rendered main body, for block tags.
    pub body: Option<String>,
}

/// A tag definition: parse rules plus optional compile hook.
#[derive(Clone)]
pub struct TagDef {
    /// Whether the tag requires a matching `end<name>` closing tag.
    pub block: bool,
    /// Sibling tags that start a new branch inside this tag's scope.
    pub intermediates: Vec<String>,
    /// Argument grammar.
    pub grammar: TagGrammar,
    /// Custom compile hook; built-in tags compile via the code generator.
    pub compile: Option<TagCompileFn>,
}

impl std::fmt::Debug for TagDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagDef")
            .field("block", &self.block)
            .field("intermediates", &self.intermediates)
            .field("grammar", &self.grammar)
            .field("compile", &self.compile.as_ref().map(|_| "..."))
            .finish()
    }
}

impl TagDef {
    fn builtin(block: bool, grammar: TagGrammar) -> Self {
        TagDef {
            block,
            intermediates: Vec::new(),
            grammar,
            compile: None,
        }
    }

    fn with_intermediates(mut self, intermediates: &[&str]) -> Self {
        self.intermediates = intermediates.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A user-supplied custom tag, registered through the engine.
#[derive(Clone)]
pub struct CustomTag {
    /// Whether the tag wraps a body (`{% name %}...{% endname %}`).
    pub block: bool,
    /// Argument grammar; defaults to a free-form expression list.
    pub grammar: TagGrammar,
    /// Render function invoked at runtime.
    pub render: TagRenderFn,
    /// Optional compile hook replacing the default dispatch instruction.
    pub compile: Option<TagCompileFn>,
}

impl CustomTag {
    /// A custom tag rendered by a function of its evaluated arguments.
    pub fn new(block: bool, render: TagRenderFn) -> Self {
        CustomTag {
            block,
            grammar: TagGrammar::ExprList,
            render,
            compile: None,
        }
    }
}

static BUILTINS: Lazy<HashMap<String, TagDef>> = Lazy::new(|| {
    let mut tags = HashMap::new();
    let mut add = |name: &str, def: TagDef| {
        tags.insert(name.to_string(), def);
    };

    add("extends", TagDef::builtin(false, TagGrammar::Extends));
    add("block", TagDef::builtin(true, TagGrammar::Block));
    add("parent", TagDef::builtin(false, TagGrammar::Parent));
    add("include", TagDef::builtin(false, TagGrammar::Include));
    add("import", TagDef::builtin(false, TagGrammar::Import));
    add("set", TagDef::builtin(false, TagGrammar::Set));
    add(
        "if",
        TagDef::builtin(true, TagGrammar::If).with_intermediates(&["elif", "elseif", "else"]),
    );
    add(
        "for",
        TagDef::builtin(true, TagGrammar::For).with_intermediates(&["else"]),
    );
    add("macro", TagDef::builtin(true, TagGrammar::Macro));
    add("autoescape", TagDef::builtin(true, TagGrammar::Autoescape));
    add("raw", TagDef::builtin(true, TagGrammar::Raw));
    add("filter", TagDef::builtin(true, TagGrammar::Filter));
    add("spaceless", TagDef::builtin(true, TagGrammar::Spaceless));

    tags
});

/// The in-scope mapping from tag name to definition.
#[derive(Debug, Clone)]
pub struct TagRegistry {
    tags: HashMap<String, TagDef>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        TagRegistry {
            tags: BUILTINS.clone(),
        }
    }
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag definition. Overwrites any existing definition of
    /// the same name.
    pub fn register(&mut self, name: impl Into<String>, def: TagDef) {
        self.tags.insert(name.into(), def);
    }

    /// Register a custom tag's parse definition.
    pub fn register_custom(&mut self, name: impl Into<String>, tag: &CustomTag) {
        self.register(
            name,
            TagDef {
                block: tag.block,
                intermediates: Vec::new(),
                grammar: tag.grammar,
                compile: tag.compile.clone(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&TagDef> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }
}

/// Runtime table of custom tag render functions, keyed by tag name. This
/// is the "extensions table" handed to a compiled artifact.
#[derive(Clone, Default)]
pub struct TagTable {
    tags: HashMap<String, TagRenderFn>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, render: TagRenderFn) {
        self.tags.insert(name.into(), render);
    }

    pub fn get(&self, name: &str) -> Option<&TagRenderFn> {
        self.tags.get(name)
    }
}

impl std::fmt::Debug for TagTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagTable")
            .field("tags", &self.tags.keys().collect::<Vec<_>>())
            .finish()
    }
}
