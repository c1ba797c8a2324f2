/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Swig-style template engine with inheritance and custom tags.
//!
//! Templates mix literal text with three kinds of delimited spans
//! (delimiters are configurable):
//!
//! - Variable output: `{{ expression | filters }}`
//! - Tags: `{% if %}`, `{% for %}`, `{% block %}`, `{% include %}`...
//! - Comments: `{# never rendered #}`
//!
//! Supported features:
//!
//! - Template inheritance: `{% extends %}`, `{% block %}`, `{% parent %}`
//! - Partials: `{% include "x.html" [ignore missing] [with expr] [only] %}`
//! - Macros: `{% macro input(name) %}...{% endmacro %}`, imported across
//!   templates with `{% import "forms.html" as forms %}`
//! - Expressions with conventional precedence, filter chains binding
//!   loosest
//! - Automatic HTML (or JavaScript) escaping, applied exactly once
//! - Custom tags and filters registered on the engine
//! - Persisted compilation artifacts via `precompile`/`load_precompiled`
//!
//! # Architecture
//!
//! Compilation is a pipeline: the [lexer](lexer) splits source into
//! spans, the [parser](parser) builds a tree through the tag registry,
//! the [inheritance resolver](inherit) folds `extends` chains into one
//! effective tree, and the [code generator](codegen) lowers it to a
//! self-contained, serializable [`Program`](codegen::Program) that the
//! executor interprets against a [`Context`]. Loading is abstracted
//! behind the [`Loader`] trait; compiled templates are cached by
//! canonical identity.
//!
//! Every engine entry point comes in a synchronous and an asynchronous
//! form with byte-identical output.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sprig::{Context, Engine, MemoryLoader};
//!
//! let loader = MemoryLoader::new()
//!     .with_template("page.html", "Hello, {{ name }}!");
//! let engine = Engine::with_loader(Arc::new(loader))?;
//!
//! let mut ctx = Context::new();
//! ctx.insert("name", "World");
//! assert_eq!(engine.render("page.html", &ctx)?, "Hello, World!");
//! ```

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod filters;
pub mod inherit;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod value;

mod exec;

// Re-export main types at crate root
pub use ast::EscapeSetting;
pub use cache::CacheMode;
pub use codegen::CompiledTemplate;
pub use context::Context;
pub use engine::{Engine, Options};
pub use error::{TemplateError, TemplateResult};
pub use filters::{FilterFn, FilterTable};
pub use lexer::Delimiters;
pub use loader::{FsLoader, Loader, MemoryLoader};
pub use registry::{CustomTag, TagCall, TagRegistry};
pub use value::Value;
