/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag-aware template parser.
//!
//! Consumes the lexer's token sequence and builds the template tree,
//! resolving each tag name through the [`TagRegistry`]. Nesting is
//! tracked with an explicit stack of open tag frames owned by the parse
//! context; a close tag with no matching frame, or end of input with a
//! non-empty stack, is a parse-time failure naming the offending tag and
//! its opening line.

use std::collections::HashSet;

use crate::ast::{Branch, EscapeSetting, Node, TagArgs, TagNode};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::ArgParser;
use crate::lexer::{Token, TokenKind};
use crate::registry::{TagGrammar, TagRegistry};

/// Ephemeral state for one parse: the open-frame stack and the set of
/// variable names bound by enclosing loop/macro constructs.
struct ParseContext<'r> {
    registry: &'r TagRegistry,
    stack: Vec<Frame>,
    scoped_vars: HashSet<String>,
}

/// One open tag frame. `branches` holds completed branches; `current`
/// accumulates children of the branch being parsed.
struct Frame {
    name: String,
    args: TagArgs,
    line: usize,
    intermediates: Vec<String>,
    branches: Vec<Branch>,
    current: Vec<Node>,
    current_label: Option<String>,
    current_cond: Option<crate::expr::Expr>,
    /// Variable names this frame introduced (restored on close).
    bound_vars: Vec<String>,
    /// Verbatim mode: children are collected as literal text.
    raw: bool,
}

impl Frame {
    fn close(mut self) -> TagNode {
        self.branches.push(Branch {
            label: self.current_label,
            cond: self.current_cond,
            children: self.current,
        });
        TagNode {
            name: self.name,
            args: self.args,
            line: self.line,
            branches: self.branches,
        }
    }
}

/// Parse a token sequence into a template tree.
pub fn parse(tokens: Vec<Token>, registry: &TagRegistry) -> TemplateResult<Vec<Node>> {
    let mut ctx = ParseContext {
        registry,
        stack: Vec::new(),
        scoped_vars: HashSet::new(),
    };
    let mut top_level: Vec<Node> = Vec::new();

    for token in tokens {
        if let Some(node) = ctx.consume(token)? {
            match ctx.stack.last_mut() {
                Some(frame) => frame.current.push(node),
                None => top_level.push(node),
            }
        }
    }

    if let Some(frame) = ctx.stack.last() {
        return Err(TemplateError::UnterminatedTag {
            name: frame.name.clone(),
            line: frame.line,
        });
    }

    Ok(top_level)
}

impl ParseContext<'_> {
    /// Process one token. Returns a node to append to the innermost open
    /// scope, or `None` when the token only mutated parser state.
    fn consume(&mut self, token: Token) -> TemplateResult<Option<Node>> {
        // Inside `{% raw %}` everything except the closing tag is text.
        if self.stack.last().is_some_and(|f| f.raw) {
            if token.kind == TokenKind::Tag && tag_name(&token.text) == "endraw" {
                return self.close_frame("endraw", &token);
            }
            let frame = self.stack.last_mut().expect("raw frame is open");
            frame.current.push(Node::Literal {
                text: token.raw,
                line: token.line,
            });
            return Ok(None);
        }

        match token.kind {
            TokenKind::Comment => Ok(None),
            TokenKind::Literal => {
                if token.text.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Node::Literal {
                    text: token.text,
                    line: token.line,
                }))
            }
            TokenKind::Var => {
                let expr = crate::expr::parse_expr(&token.text, token.line)?;
                Ok(Some(Node::Output {
                    expr,
                    line: token.line,
                }))
            }
            TokenKind::Tag => self.consume_tag(token),
        }
    }

    fn consume_tag(&mut self, token: Token) -> TemplateResult<Option<Node>> {
        let name = tag_name(&token.text);
        if name.is_empty() {
            return Err(TemplateError::parse(
                format!("empty tag \"{}\"", token.raw.trim()),
                token.line,
            ));
        }
        let rest = token.text.trim_start()[name.len()..].to_string();

        // A closer for the innermost open frame?
        if let Some(frame) = self.stack.last() {
            if name == format!("end{}", frame.name) {
                return self.close_frame(&name, &token);
            }
        }
        // A stray or mismatched closer? Registered tags that merely start
        // with "end" are not closers.
        if !self.registry.contains(&name) && name.starts_with("end") {
            return self.close_frame(&name, &token);
        }

        // Intermediate tag of the innermost open frame (`else`, `elif`...)?
        if let Some(frame) = self.stack.last() {
            if frame.intermediates.iter().any(|i| i == &name) {
                return self.start_branch(&name, &rest, &token);
            }
        }
        if matches!(name.as_str(), "else" | "elif" | "elseif") {
            return Err(TemplateError::parse(
                format!("\"{name}\" is not valid here"),
                token.line,
            ));
        }

        let Some(def) = self.registry.get(&name) else {
            return Err(TemplateError::UnknownTag {
                name: name.to_string(),
                line: token.line,
            });
        };
        let def = def.clone();

        let args = self.parse_args(&name, def.grammar, &rest, token.line)?;

        if !def.block {
            // `parent` is only meaningful inside a block override.
            if name == "parent" && !self.stack.iter().any(|f| f.name == "block") {
                return Err(TemplateError::parse(
                    "\"parent\" is only allowed inside a block",
                    token.line,
                ));
            }
            return Ok(Some(Node::Tag(TagNode {
                name,
                args,
                line: token.line,
                branches: Vec::new(),
            })));
        }

        let mut bound_vars = Vec::new();
        match &args {
            TagArgs::For { key, var, .. } => {
                if let Some(key) = key {
                    if key == var {
                        return Err(TemplateError::parse(
                            format!("duplicate loop variable \"{key}\""),
                            token.line,
                        ));
                    }
                    bound_vars.push(key.clone());
                }
                bound_vars.push(var.clone());
            }
            TagArgs::Macro { params, .. } => {
                bound_vars.extend(params.iter().cloned());
            }
            _ => {}
        }
        for var in &bound_vars {
            self.scoped_vars.insert(var.clone());
        }

        self.stack.push(Frame {
            raw: def.grammar == TagGrammar::Raw,
            name,
            args,
            line: token.line,
            intermediates: def.intermediates.clone(),
            branches: Vec::new(),
            current: Vec::new(),
            current_label: None,
            current_cond: None,
            bound_vars,
        });
        Ok(None)
    }

    /// Close the innermost frame against an `end<name>` tag.
    fn close_frame(&mut self, end_name: &str, token: &Token) -> TemplateResult<Option<Node>> {
        let Some(frame) = self.stack.pop() else {
            return Err(TemplateError::UnexpectedEndTag {
                name: end_name.to_string(),
                line: token.line,
            });
        };

        let expected = format!("end{}", frame.name);
        if end_name != expected {
            return Err(TemplateError::parse(
                format!(
                    "unexpected \"{end_name}\" on line {}; \"{}\" opened on line {} expects \"{expected}\"",
                    token.line, frame.name, frame.line
                ),
                token.line,
            ));
        }

        for var in &frame.bound_vars {
            self.scoped_vars.remove(var);
        }
        Ok(Some(Node::Tag(frame.close())))
    }

    /// Start a new branch on the innermost frame (`else`, `elif`, ...).
    fn start_branch(&mut self, name: &str, rest: &str, token: &Token) -> TemplateResult<Option<Node>> {
        let cond = match name {
            "elif" | "elseif" => {
                let mut args = ArgParser::new(rest, token.line)?;
                let cond = args.parse_expression()?;
                args.expect_end()?;
                Some(cond)
            }
            _ => {
                let mut args = ArgParser::new(rest, token.line)?;
                args.expect_end()?;
                None
            }
        };

        let Some(frame) = self.stack.last_mut() else {
            return Err(TemplateError::UnexpectedEndTag {
                name: name.to_string(),
                line: token.line,
            });
        };
        if frame.current_label.as_deref() == Some("else") {
            return Err(TemplateError::parse(
                format!("\"{name}\" cannot follow \"else\""),
                token.line,
            ));
        }

        let finished = Branch {
            label: frame.current_label.take(),
            cond: frame.current_cond.take(),
            children: std::mem::take(&mut frame.current),
        };
        frame.branches.push(finished);
        frame.current_label = Some(name.to_string());
        frame.current_cond = cond;
        Ok(None)
    }

    /// Parse tag arguments according to the tag's grammar.
    fn parse_args(
        &mut self,
        name: &str,
        grammar: TagGrammar,
        rest: &str,
        line: usize,
    ) -> TemplateResult<TagArgs> {
        let mut args = ArgParser::new(rest, line)?;
        let parsed = match grammar {
            TagGrammar::Empty | TagGrammar::Parent | TagGrammar::Raw | TagGrammar::Spaceless => {
                TagArgs::None
            }
            TagGrammar::ExprList => {
                let mut exprs = Vec::new();
                if !args.at_end() {
                    loop {
                        exprs.push(args.parse_expression()?);
                        if args.at_end() {
                            break;
                        }
                        args.expect_op(",")?;
                    }
                }
                TagArgs::Exprs(exprs)
            }
            TagGrammar::Extends => TagArgs::Extends {
                target: args.expect_str_literal()?,
            },
            TagGrammar::Block => {
                let name = match args.expect_ident() {
                    Ok(name) => name,
                    Err(_) => args.expect_str_literal().map_err(|_| {
                        TemplateError::parse("\"block\" expects a name", line)
                    })?,
                };
                TagArgs::Block { name }
            }
            TagGrammar::Include => {
                let target = args.expect_str_literal()?;
                let mut ignore_missing = false;
                let mut with = None;
                let mut only = false;
                if args.eat_keyword("ignore") {
                    args.expect_keyword("missing")?;
                    ignore_missing = true;
                }
                if args.eat_keyword("with") {
                    with = Some(args.parse_expression()?);
                }
                if args.eat_keyword("only") {
                    only = true;
                }
                TagArgs::Include {
                    target,
                    ignore_missing,
                    with,
                    only,
                }
            }
            TagGrammar::Import => {
                let target = args.expect_str_literal()?;
                args.expect_keyword("as")?;
                let namespace = args.expect_ident()?;
                TagArgs::Import { target, namespace }
            }
            TagGrammar::Set => {
                let name = args.expect_ident()?;
                args.expect_op("=")?;
                let expr = args.parse_expression()?;
                TagArgs::Set { name, expr }
            }
            TagGrammar::If => TagArgs::If {
                cond: args.parse_expression()?,
            },
            TagGrammar::For => {
                let first = args.expect_ident()?;
                let (key, var) = if args.eat_op(",") {
                    (Some(first), args.expect_ident()?)
                } else {
                    (None, first)
                };
                args.expect_keyword("in")?;
                let iter = args.parse_expression()?;
                TagArgs::For { key, var, iter }
            }
            TagGrammar::Macro => {
                let name = args.expect_ident()?;
                args.expect_op("(")?;
                let mut params = Vec::new();
                if !args.eat_op(")") {
                    loop {
                        params.push(args.expect_ident()?);
                        if args.eat_op(",") {
                            continue;
                        }
                        args.expect_op(")")?;
                        break;
                    }
                }
                TagArgs::Macro { name, params }
            }
            TagGrammar::Autoescape => {
                let mode = if args.eat_keyword("on") || args.eat_keyword("true") {
                    EscapeSetting::Html
                } else if args.eat_keyword("off") || args.eat_keyword("false") {
                    EscapeSetting::Off
                } else {
                    match args.expect_str_literal()?.as_str() {
                        "js" => EscapeSetting::Js,
                        "html" => EscapeSetting::Html,
                        other => {
                            return Err(TemplateError::parse(
                                format!("unknown autoescape mode \"{other}\""),
                                line,
                            ));
                        }
                    }
                };
                TagArgs::Autoescape { mode }
            }
            TagGrammar::Filter => {
                let filter_name = args.expect_ident()?;
                let mut filter_args = Vec::new();
                if args.eat_op("(") && !args.eat_op(")") {
                    loop {
                        filter_args.push(args.parse_expression()?);
                        if args.eat_op(",") {
                            continue;
                        }
                        args.expect_op(")")?;
                        break;
                    }
                }
                TagArgs::Filter {
                    name: filter_name,
                    args: filter_args,
                }
            }
        };

        // `endblock content` style trailing names are tolerated nowhere
        // else: every grammar must consume its whole argument text.
        args.expect_end().map_err(|_| {
            TemplateError::parse(
                format!("unexpected arguments to \"{name}\": \"{}\"", rest.trim()),
                line,
            )
        })?;

        Ok(parsed)
    }
}

/// Extract the leading identifier of a tag span interior.
fn tag_name(interior: &str) -> String {
    interior
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TagArgs;
    use crate::expr::{Expr, PathSeg};
    use crate::lexer::{Delimiters, tokenize};
    use pretty_assertions::assert_eq;

    fn parse_source(source: &str) -> TemplateResult<Vec<Node>> {
        let registry = TagRegistry::default();
        let tokens = tokenize(source, &Delimiters::default())?;
        parse(tokens, &registry)
    }

    fn parsed(source: &str) -> Vec<Node> {
        parse_source(source).unwrap_or_else(|e| panic!("{source:?} should parse: {e}"))
    }

    #[test]
    fn test_literal_only() {
        let nodes = parsed("just text");
        assert_eq!(nodes.len(), 1);
        assert!(matches!(&nodes[0], Node::Literal { text, .. } if text == "just text"));
    }

    #[test]
    fn test_output_expression() {
        let nodes = parsed("{{ user.name }}");
        match &nodes[0] {
            Node::Output { expr, .. } => {
                assert_eq!(
                    expr,
                    &Expr::Var(vec![
                        PathSeg::Key("user".to_string()),
                        PathSeg::Key("name".to_string()),
                    ])
                );
            }
            other => panic!("expected output node, got {other:?}"),
        }
    }

    #[test]
    fn test_if_with_branches() {
        let nodes = parsed("{% if a %}A{% elseif b %}B{% else %}C{% endif %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected tag node");
        };
        assert_eq!(tag.name, "if");
        assert_eq!(tag.branches.len(), 3);
        assert_eq!(tag.branches[0].label, None);
        assert_eq!(tag.branches[1].label.as_deref(), Some("elseif"));
        assert!(tag.branches[1].cond.is_some());
        assert_eq!(tag.branches[2].label.as_deref(), Some("else"));
        assert!(tag.branches[2].cond.is_none());
    }

    #[test]
    fn test_nested_tags() {
        let nodes = parsed("{% for x in items %}{% if x %}{{ x }}{% endif %}{% endfor %}");
        let Node::Tag(for_tag) = &nodes[0] else {
            panic!("expected for tag");
        };
        assert_eq!(for_tag.name, "for");
        let Node::Tag(if_tag) = &for_tag.children()[0] else {
            panic!("expected nested if tag");
        };
        assert_eq!(if_tag.name, "if");
    }

    #[test]
    fn test_for_key_value() {
        let nodes = parsed("{% for k, v in data %}{% endfor %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected tag");
        };
        assert_eq!(
            tag.args,
            TagArgs::For {
                key: Some("k".to_string()),
                var: "v".to_string(),
                iter: Expr::Var(vec![PathSeg::Key("data".to_string())]),
            }
        );
    }

    #[test]
    fn test_unterminated_tag_names_opener() {
        let err = parse_source("line1\n{% if x %}\nnever closed").unwrap_err();
        match err {
            TemplateError::UnterminatedTag { name, line } => {
                assert_eq!(name, "if");
                assert_eq!(line, 2);
            }
            other => panic!("expected UnterminatedTag, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_end_tag() {
        let err = parse_source("{% endif %}").unwrap_err();
        assert!(matches!(err, TemplateError::UnexpectedEndTag { .. }));
    }

    #[test]
    fn test_mismatched_close() {
        let err = parse_source("{% if x %}{% endfor %}").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
        let message = err.to_string();
        assert!(message.contains("endfor"), "message was: {message}");
        assert!(message.contains("endif"), "message was: {message}");
    }

    #[test]
    fn test_unknown_tag() {
        let err = parse_source("{% widget %}").unwrap_err();
        match err {
            TemplateError::UnknownTag { name, line } => {
                assert_eq!(name, "widget");
                assert_eq!(line, 1);
            }
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }

    #[test]
    fn test_else_outside_scope() {
        assert!(parse_source("{% else %}").is_err());
        // `else` not valid directly inside a block tag either.
        assert!(parse_source("{% block b %}{% else %}{% endblock %}").is_err());
    }

    #[test]
    fn test_branch_after_else_rejected() {
        let err = parse_source("{% if a %}x{% else %}y{% elseif b %}z{% endif %}").unwrap_err();
        assert!(err.to_string().contains("else"));
    }

    #[test]
    fn test_raw_preserves_directives() {
        let nodes = parsed("{% raw %}{{ x }} and {% if y %}{% endraw %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected raw tag");
        };
        assert_eq!(tag.name, "raw");
        let text: String = tag
            .children()
            .iter()
            .map(|n| match n {
                Node::Literal { text, .. } => text.as_str(),
                other => panic!("raw child should be literal, got {other:?}"),
            })
            .collect();
        assert_eq!(text, "{{ x }} and {% if y %}");
    }

    #[test]
    fn test_include_arguments() {
        let nodes = parsed("{% include \"partial.html\" ignore missing only %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected include tag");
        };
        assert_eq!(
            tag.args,
            TagArgs::Include {
                target: "partial.html".to_string(),
                ignore_missing: true,
                with: None,
                only: true,
            }
        );
    }

    #[test]
    fn test_import_arguments() {
        let nodes = parsed("{% import \"forms.html\" as forms %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected import tag");
        };
        assert_eq!(
            tag.args,
            TagArgs::Import {
                target: "forms.html".to_string(),
                namespace: "forms".to_string(),
            }
        );
    }

    #[test]
    fn test_import_wrong_shape() {
        // A bare identifier where a quoted string is required.
        assert!(parse_source("{% import forms as f %}").is_err());
        // A string where the namespace identifier is required.
        assert!(parse_source("{% import \"forms.html\" as \"f\" %}").is_err());
    }

    #[test]
    fn test_set_arguments() {
        let nodes = parsed("{% set x = 1 + 2 %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected set tag");
        };
        assert!(matches!(&tag.args, TagArgs::Set { name, .. } if name == "x"));
    }

    #[test]
    fn test_macro_params() {
        let nodes = parsed("{% macro input(name, size) %}x{% endmacro %}");
        let Node::Tag(tag) = &nodes[0] else {
            panic!("expected macro tag");
        };
        assert_eq!(
            tag.args,
            TagArgs::Macro {
                name: "input".to_string(),
                params: vec!["name".to_string(), "size".to_string()],
            }
        );
    }

    #[test]
    fn test_parent_outside_block_rejected() {
        assert!(parse_source("{% parent %}").is_err());
        assert!(parse_source("{% block b %}{% parent %}{% endblock %}").is_ok());
    }

    #[test]
    fn test_duplicate_loop_variable() {
        assert!(parse_source("{% for x, x in items %}{% endfor %}").is_err());
    }

    #[test]
    fn test_comments_are_dropped() {
        let nodes = parsed("a{# note #}b");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], Node::Literal { text, .. } if text == "a"));
        assert!(matches!(&nodes[1], Node::Literal { text, .. } if text == "b"));
    }
}
