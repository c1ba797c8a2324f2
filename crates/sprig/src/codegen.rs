/*
 * codegen.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Code generation: template tree to render program.
//!
//! The generator lowers a resolved template tree into a [`Program`], a
//! flat serializable instruction structure that the executor interprets.
//! A program is self-contained: included templates are embedded as nested
//! programs and imported macro sets are copied in, so rendering never
//! touches a loader.
//!
//! Macro definitions are hoisted out of the body into the program header
//! wherever they appear; a macro invocation sees only its own arguments,
//! so position carries no meaning.
//!
//! Filter names are checked here against the filter table. A template
//! naming an unregistered filter fails to compile rather than failing
//! mid-render.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::{EscapeSetting, Node, TagArgs, TagNode};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{Expr, PathSeg};
use crate::filters::FilterTable;
use crate::registry::TagRegistry;

/// A hoisted macro definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Instr>,
}

/// A compiled render program: hoisted macros plus the body instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub macros: Vec<MacroDef>,
    pub body: Vec<Instr>,
}

/// One instruction of a render program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    /// Append literal text to the output.
    Append(String),
    /// Evaluate an expression and emit it, escaping per the active mode.
    Emit { expr: Expr, line: usize },
    /// Bind a variable in the current scope frame.
    Set {
        name: String,
        expr: Expr,
        line: usize,
    },
    /// Conditional: the first branch whose condition is truthy runs;
    /// `otherwise` runs when none is.
    If {
        branches: Vec<(Expr, Vec<Instr>)>,
        otherwise: Option<Vec<Instr>>,
        line: usize,
    },
    /// Loop over a list, map or string. `otherwise` runs for an empty
    /// iterable.
    For {
        key: Option<String>,
        var: String,
        iter: Expr,
        body: Vec<Instr>,
        otherwise: Option<Vec<Instr>>,
        line: usize,
    },
    /// Render an embedded template program. `program` is `None` when the
    /// reference was declared `ignore missing` and did not resolve.
    Include {
        target: String,
        program: Option<Box<Program>>,
        with: Option<Expr>,
        only: bool,
    },
    /// Bind another template's macro set under a namespace.
    Import {
        namespace: String,
        macros: Vec<MacroDef>,
    },
    /// Run the body under a different escaping mode.
    Autoescape {
        mode: EscapeSetting,
        body: Vec<Instr>,
    },
    /// Render the body, then pass the text through a filter.
    ApplyFilter {
        name: String,
        args: Vec<Expr>,
        body: Vec<Instr>,
        line: usize,
    },
    /// Render the body, then strip whitespace between adjacent HTML tags.
    Spaceless { body: Vec<Instr> },
    /// Dispatch to a custom tag's render function from the extensions
    /// table.
    CallTag {
        name: String,
        args: Vec<Expr>,
        body: Option<Vec<Instr>>,
        line: usize,
    },
}

/// A compiled template: its identity plus the render program. This is the
/// reusable artifact the cache stores and `precompile` persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    pub identity: String,
    pub program: Program,
}

/// Compiled dependencies keyed by the raw reference text of the
/// `include`/`import` that requested them. `None` marks an
/// `ignore missing` reference that did not resolve.
pub type DepMap = HashMap<String, Option<Arc<CompiledTemplate>>>;

/// A template reference discovered in a tree, for the engine to resolve
/// and compile ahead of code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRef {
    pub target: String,
    pub ignore_missing: bool,
    pub line: usize,
}

/// Rewrite every `include` and `import` target in a tree to its canonical
/// identity. Inheritance merges trees owned by different identities, so
/// relative references must be anchored to the template that wrote them
/// before the merge.
pub fn canonicalize_refs(tree: &mut [Node], resolve: &mut dyn FnMut(&str) -> String) {
    for node in tree {
        if let Node::Tag(tag) = node {
            match &mut tag.args {
                TagArgs::Include { target, .. } | TagArgs::Import { target, .. } => {
                    *target = resolve(target);
                }
                _ => {}
            }
            for branch in &mut tag.branches {
                canonicalize_refs(&mut branch.children, resolve);
            }
        }
    }
}

/// Collect every `include` and `import` reference in a tree, at any depth.
pub fn collect_refs(tree: &[Node]) -> Vec<TemplateRef> {
    let mut refs = Vec::new();
    collect_refs_into(tree, &mut refs);
    refs
}

fn collect_refs_into(tree: &[Node], refs: &mut Vec<TemplateRef>) {
    for node in tree {
        if let Node::Tag(tag) = node {
            match &tag.args {
                TagArgs::Include {
                    target,
                    ignore_missing,
                    ..
                } => refs.push(TemplateRef {
                    target: target.clone(),
                    ignore_missing: *ignore_missing,
                    line: tag.line,
                }),
                TagArgs::Import { target, .. } => refs.push(TemplateRef {
                    target: target.clone(),
                    ignore_missing: false,
                    line: tag.line,
                }),
                _ => {}
            }
            for branch in &tag.branches {
                collect_refs_into(&branch.children, refs);
            }
        }
    }
}

/// Lower a resolved template tree into a render program.
pub fn compile_tree(
    tree: &[Node],
    registry: &TagRegistry,
    filters: &FilterTable,
    deps: &DepMap,
) -> TemplateResult<Program> {
    let mut generator = Generator {
        registry,
        filters,
        deps,
        macros: Vec::new(),
    };
    let body = generator.compile_nodes(tree)?;
    Ok(Program {
        macros: generator.macros,
        body,
    })
}

struct Generator<'a> {
    registry: &'a TagRegistry,
    filters: &'a FilterTable,
    deps: &'a DepMap,
    macros: Vec<MacroDef>,
}

impl Generator<'_> {
    fn compile_nodes(&mut self, nodes: &[Node]) -> TemplateResult<Vec<Instr>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.compile_node(node, &mut out)?;
        }
        Ok(out)
    }

    fn compile_node(&mut self, node: &Node, out: &mut Vec<Instr>) -> TemplateResult<()> {
        match node {
            Node::Literal { text, .. } => out.push(Instr::Append(text.clone())),
            Node::Output { expr, line } => {
                self.check_filters(expr, *line)?;
                out.push(Instr::Emit {
                    expr: expr.clone(),
                    line: *line,
                });
            }
            Node::Tag(tag) => self.compile_tag(tag, out)?,
        }
        Ok(())
    }

    fn compile_tag(&mut self, tag: &TagNode, out: &mut Vec<Instr>) -> TemplateResult<()> {
        match tag.name.as_str() {
            // Handled before code generation by the inheritance resolver;
            // a leftover occurrence renders nothing.
            "extends" | "parent" => {}

            // Blocks are transparent wrappers once inheritance has been
            // resolved.
            "block" => {
                let children = self.compile_nodes(tag.children())?;
                out.extend(children);
            }

            "raw" => {
                for child in tag.children() {
                    if let Node::Literal { text, .. } = child {
                        out.push(Instr::Append(text.clone()));
                    }
                }
            }

            "set" => {
                let TagArgs::Set { name, expr } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"set\"", tag.line));
                };
                self.check_filters(expr, tag.line)?;
                out.push(Instr::Set {
                    name: name.clone(),
                    expr: expr.clone(),
                    line: tag.line,
                });
            }

            "if" => out.push(self.compile_if(tag)?),

            "for" => {
                let TagArgs::For { key, var, iter } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"for\"", tag.line));
                };
                self.check_filters(iter, tag.line)?;
                let body = self.compile_nodes(tag.children())?;
                let otherwise = tag
                    .branches
                    .iter()
                    .find(|b| b.label.as_deref() == Some("else"))
                    .map(|b| self.compile_nodes(&b.children))
                    .transpose()?;
                out.push(Instr::For {
                    key: key.clone(),
                    var: var.clone(),
                    iter: iter.clone(),
                    body,
                    otherwise,
                    line: tag.line,
                });
            }

            "macro" => {
                let TagArgs::Macro { name, params } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"macro\"", tag.line));
                };
                let body = self.compile_nodes(tag.children())?;
                self.macros.push(MacroDef {
                    name: name.clone(),
                    params: params.clone(),
                    body,
                });
            }

            "include" => {
                let TagArgs::Include {
                    target,
                    ignore_missing,
                    with,
                    only,
                } = &tag.args
                else {
                    return Err(TemplateError::parse("malformed \"include\"", tag.line));
                };
                if let Some(with) = with {
                    self.check_filters(with, tag.line)?;
                }
                let program = match self.deps.get(target) {
                    Some(Some(compiled)) => Some(Box::new(compiled.program.clone())),
                    Some(None) | None if *ignore_missing => None,
                    _ => {
                        return Err(TemplateError::TemplateNotFound {
                            identity: target.clone(),
                        });
                    }
                };
                out.push(Instr::Include {
                    target: target.clone(),
                    program,
                    with: with.clone(),
                    only: *only,
                });
            }

            "import" => {
                let TagArgs::Import { target, namespace } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"import\"", tag.line));
                };
                let Some(Some(compiled)) = self.deps.get(target) else {
                    return Err(TemplateError::TemplateNotFound {
                        identity: target.clone(),
                    });
                };
                out.push(Instr::Import {
                    namespace: namespace.clone(),
                    macros: compiled.program.macros.clone(),
                });
            }

            "autoescape" => {
                let TagArgs::Autoescape { mode } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"autoescape\"", tag.line));
                };
                let body = self.compile_nodes(tag.children())?;
                out.push(Instr::Autoescape { mode: *mode, body });
            }

            "filter" => {
                let TagArgs::Filter { name, args } = &tag.args else {
                    return Err(TemplateError::parse("malformed \"filter\"", tag.line));
                };
                if !self.filters.contains(name) {
                    return Err(TemplateError::UnknownFilter {
                        name: name.clone(),
                        line: tag.line,
                    });
                }
                for arg in args {
                    self.check_filters(arg, tag.line)?;
                }
                let body = self.compile_nodes(tag.children())?;
                out.push(Instr::ApplyFilter {
                    name: name.clone(),
                    args: args.clone(),
                    body,
                    line: tag.line,
                });
            }

            "spaceless" => {
                let body = self.compile_nodes(tag.children())?;
                out.push(Instr::Spaceless { body });
            }

            name => self.compile_custom(name, tag, out)?,
        }
        Ok(())
    }

    fn compile_if(&mut self, tag: &TagNode) -> TemplateResult<Instr> {
        let TagArgs::If { cond } = &tag.args else {
            return Err(TemplateError::parse("malformed \"if\"", tag.line));
        };
        self.check_filters(cond, tag.line)?;

        let mut branches = Vec::new();
        let mut otherwise = None;
        for (i, branch) in tag.branches.iter().enumerate() {
            let children = self.compile_nodes(&branch.children)?;
            if i == 0 {
                branches.push((cond.clone(), children));
            } else if let Some(branch_cond) = &branch.cond {
                self.check_filters(branch_cond, tag.line)?;
                branches.push((branch_cond.clone(), children));
            } else {
                otherwise = Some(children);
            }
        }
        Ok(Instr::If {
            branches,
            otherwise,
            line: tag.line,
        })
    }

    fn compile_custom(
        &mut self,
        name: &str,
        tag: &TagNode,
        out: &mut Vec<Instr>,
    ) -> TemplateResult<()> {
        let args = match &tag.args {
            TagArgs::Exprs(exprs) => exprs.clone(),
            TagArgs::None => Vec::new(),
            _ => {
                return Err(TemplateError::parse(
                    format!("malformed arguments to \"{name}\""),
                    tag.line,
                ));
            }
        };
        for arg in &args {
            self.check_filters(arg, tag.line)?;
        }

        let def = self
            .registry
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTag {
                name: name.to_string(),
                line: tag.line,
            })?;

        if let Some(compile) = def.compile.clone() {
            let mut bodies = Vec::with_capacity(tag.branches.len());
            for branch in &tag.branches {
                bodies.push(self.compile_nodes(&branch.children)?);
            }
            out.extend(compile(&args, &bodies)?);
            return Ok(());
        }

        let body = if def.block {
            Some(self.compile_nodes(tag.children())?)
        } else {
            None
        };
        out.push(Instr::CallTag {
            name: name.to_string(),
            args,
            body,
            line: tag.line,
        });
        Ok(())
    }

    /// Reject any filter name an expression references that is not in the
    /// table, recursing through sub-expressions.
    fn check_filters(&self, expr: &Expr, line: usize) -> TemplateResult<()> {
        match expr {
            Expr::Filter { name, input, args } => {
                if !self.filters.contains(name) {
                    return Err(TemplateError::UnknownFilter {
                        name: name.clone(),
                        line,
                    });
                }
                self.check_filters(input, line)?;
                for arg in args {
                    self.check_filters(arg, line)?;
                }
            }
            Expr::List(items) => {
                for item in items {
                    self.check_filters(item, line)?;
                }
            }
            Expr::Map(entries) => {
                for (_, value) in entries {
                    self.check_filters(value, line)?;
                }
            }
            Expr::Var(path) => {
                for seg in path {
                    if let PathSeg::Dynamic(inner) = seg {
                        self.check_filters(inner, line)?;
                    }
                }
            }
            Expr::Unary { expr, .. } => self.check_filters(expr, line)?,
            Expr::Binary { lhs, rhs, .. } => {
                self.check_filters(lhs, line)?;
                self.check_filters(rhs, line)?;
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.check_filters(arg, line)?;
                }
            }
            Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
        }
        Ok(())
    }
}

/// Render a compiled template as a persisted source artifact.
///
/// The artifact is a self-describing text wrapper around the serialized
/// program. `prefix` and `suffix` are emitted verbatim around the
/// declaration, so callers can wrap the artifact in module boilerplate.
pub fn to_source(
    template: &CompiledTemplate,
    method_name: &str,
    prefix: &str,
    suffix: &str,
    minified: bool,
) -> TemplateResult<String> {
    let json = if minified {
        serde_json::to_string(&template.program)
    } else {
        serde_json::to_string_pretty(&template.program)
    }
    .map_err(|e| TemplateError::config(format!("cannot serialize program: {e}")))?;

    Ok(format!(
        "{prefix}template {method_name}(extensions, context, filters, utils, imports) {{\n{json}\n}}{suffix}"
    ))
}

/// Reload a persisted artifact produced by [`to_source`].
pub fn from_source(source: &str, identity: impl Into<String>) -> TemplateResult<CompiledTemplate> {
    let start = source
        .find(") {")
        .ok_or_else(|| TemplateError::config("not a precompiled template artifact"))?
        + 3;
    let end = source
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| TemplateError::config("truncated template artifact"))?;

    let program: Program = serde_json::from_str(&source[start..end])
        .map_err(|e| TemplateError::config(format!("invalid template artifact: {e}")))?;
    Ok(CompiledTemplate {
        identity: identity.into(),
        program,
    })
}
