/*
 * inherit.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template inheritance resolution.
//!
//! When a parsed tree starts with `{% extends %}`, the engine loads and
//! parses the referenced ancestors (cycle-checked) and hands the ordered
//! chain to [`resolve_chain`], which folds block overrides into one
//! effective tree: the base template's structure with every `block`
//! position replaced by its most-derived override. An override may embed
//! `{% parent %}` to splice in the content it replaced; the substitution
//! happens here, at compile time, never by dynamic lookup during a
//! render.
//!
//! Non-block top-level content of a derived template is discarded, except
//! `set`, `import` and `macro` tags, which are hoisted ahead of the base
//! structure. The drop is specified behavior, not an error.

use std::collections::HashMap;

use crate::ast::{Node, TagArgs, TagNode};
use crate::error::{TemplateError, TemplateResult};

/// One layer of an ancestor chain: a template identity plus its parsed
/// tree, ordered base-first by the caller.
pub struct ChainLayer {
    pub identity: String,
    pub tree: Vec<Node>,
}

/// A block override together with the entry it replaced.
struct BlockEntry {
    children: Vec<Node>,
    parent: Option<Box<BlockEntry>>,
}

/// Find the `extends` reference of a tree, if any.
///
/// At most one top-level `extends` is allowed per template.
pub fn find_extends(tree: &[Node]) -> TemplateResult<Option<(String, usize)>> {
    let mut found: Option<(String, usize)> = None;
    for node in tree {
        if let Node::Tag(TagNode {
            name,
            args: TagArgs::Extends { target },
            line,
            ..
        }) = node
        {
            if name == "extends" {
                if found.is_some() {
                    return Err(TemplateError::parse(
                        "only one \"extends\" is allowed per template",
                        *line,
                    ));
                }
                found = Some((target.clone(), *line));
            }
        }
    }
    Ok(found)
}

/// Fold an ancestor chain (base first, most-derived last) into one
/// effective tree.
pub fn resolve_chain(mut chain: Vec<ChainLayer>) -> Vec<Node> {
    debug_assert!(!chain.is_empty(), "chain has at least the base layer");
    if chain.len() == 1 {
        return chain.remove(0).tree;
    }

    let base = chain.remove(0);
    tracing::debug!(
        base = %base.identity,
        layers = chain.len(),
        "Resolving template inheritance"
    );

    // Seed the block table with the base template's blocks (any depth).
    let mut table: HashMap<String, BlockEntry> = HashMap::new();
    collect_blocks_deep(&base.tree, &mut table);

    // Each more-derived layer overwrites same-named entries; the
    // overwritten entry is retained so `{% parent %}` can reference it.
    let mut hoisted: Vec<Node> = Vec::new();
    for layer in chain {
        for node in layer.tree {
            match node {
                Node::Tag(tag) if tag.name == "block" => {
                    let TagArgs::Block { name } = &tag.args else {
                        continue;
                    };
                    let name = name.clone();
                    let replaced = table.remove(&name).map(Box::new);
                    table.insert(
                        name,
                        BlockEntry {
                            children: tag.branches.into_iter().next().map(|b| b.children).unwrap_or_default(),
                            parent: replaced,
                        },
                    );
                }
                // Top-level metadata-style tags propagate; anything else
                // outside a block is dead content and is dropped.
                Node::Tag(tag)
                    if matches!(tag.name.as_str(), "set" | "import" | "macro") =>
                {
                    hoisted.push(Node::Tag(tag));
                }
                _ => {}
            }
        }
    }

    // Rebuild the base structure with every block position substituted.
    let mut effective = hoisted;
    effective.extend(substitute_blocks(base.tree, &table));
    effective
}

/// Collect blocks at any depth of a tree into the table.
fn collect_blocks_deep(tree: &[Node], table: &mut HashMap<String, BlockEntry>) {
    for node in tree {
        if let Node::Tag(tag) = node {
            if tag.name == "block" {
                if let TagArgs::Block { name } = &tag.args {
                    table.insert(
                        name.clone(),
                        BlockEntry {
                            children: tag.children().to_vec(),
                            parent: None,
                        },
                    );
                }
            }
            for branch in &tag.branches {
                collect_blocks_deep(&branch.children, table);
            }
        }
    }
}

/// Replace every block position in the base structure with its table
/// entry, recursing into nested tags.
fn substitute_blocks(tree: Vec<Node>, table: &HashMap<String, BlockEntry>) -> Vec<Node> {
    tree.into_iter()
        .map(|node| match node {
            Node::Tag(mut tag) => {
                if tag.name == "block" {
                    if let TagArgs::Block { name } = &tag.args {
                        if let Some(entry) = table.get(name) {
                            let resolved = resolve_entry(entry);
                            if let Some(branch) = tag.branches.first_mut() {
                                branch.children = resolved;
                            }
                            return Node::Tag(tag);
                        }
                    }
                }
                for branch in &mut tag.branches {
                    branch.children =
                        substitute_blocks(std::mem::take(&mut branch.children), table);
                }
                Node::Tag(tag)
            }
            other => other,
        })
        .collect()
}

/// Materialize a block entry: its children with every `{% parent %}`
/// spliced to the content this entry replaced.
fn resolve_entry(entry: &BlockEntry) -> Vec<Node> {
    let parent_content: Vec<Node> = match &entry.parent {
        Some(parent) => resolve_entry(parent),
        None => Vec::new(),
    };
    splice_parent(&entry.children, &parent_content)
}

fn splice_parent(children: &[Node], parent_content: &[Node]) -> Vec<Node> {
    let mut out = Vec::with_capacity(children.len());
    for node in children {
        match node {
            Node::Tag(tag) if tag.name == "parent" => {
                out.extend(parent_content.iter().cloned());
            }
            Node::Tag(tag) => {
                let mut tag = tag.clone();
                for branch in &mut tag.branches {
                    branch.children = splice_parent(&branch.children, parent_content);
                }
                out.push(Node::Tag(tag));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Delimiters, tokenize};
    use crate::parser::parse;
    use crate::registry::TagRegistry;
    use pretty_assertions::assert_eq;

    fn tree(source: &str) -> Vec<Node> {
        let registry = TagRegistry::default();
        let tokens = tokenize(source, &Delimiters::default()).expect("should lex");
        parse(tokens, &registry).expect("should parse")
    }

    fn layer(identity: &str, source: &str) -> ChainLayer {
        ChainLayer {
            identity: identity.to_string(),
            tree: tree(source),
        }
    }

    /// Flatten the literal content of an effective tree, entering block
    /// wrappers, for easy assertions.
    fn flatten(nodes: &[Node]) -> String {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Literal { text, .. } => out.push_str(text),
                Node::Tag(tag) if tag.name == "block" => {
                    out.push_str(&flatten(tag.children()));
                }
                Node::Output { .. } => out.push_str("{expr}"),
                Node::Tag(tag) => {
                    for branch in &tag.branches {
                        out.push_str(&flatten(&branch.children));
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_find_extends() {
        let t = tree("{% extends \"base.html\" %}rest");
        let found = find_extends(&t).unwrap();
        assert_eq!(found, Some(("base.html".to_string(), 1)));

        assert_eq!(find_extends(&tree("no extends here")).unwrap(), None);
    }

    #[test]
    fn test_double_extends_rejected() {
        let t = tree("{% extends \"a.html\" %}{% extends \"b.html\" %}");
        assert!(find_extends(&t).is_err());
    }

    #[test]
    fn test_single_layer_passthrough() {
        let resolved = resolve_chain(vec![layer("/a.html", "hello {% block b %}x{% endblock %}")]);
        assert_eq!(flatten(&resolved), "hello x");
    }

    #[test]
    fn test_child_overrides_block() {
        let resolved = resolve_chain(vec![
            layer("/layout.html", "<html>{% block content %}X{% endblock %}</html>"),
            layer(
                "/page.html",
                "{% extends \"layout.html\" %}{% block content %}Y{% endblock %}",
            ),
        ]);
        assert_eq!(flatten(&resolved), "<html>Y</html>");
    }

    #[test]
    fn test_unoverridden_block_keeps_base_content() {
        let resolved = resolve_chain(vec![
            layer(
                "/layout.html",
                "{% block a %}A{% endblock %}|{% block b %}B{% endblock %}",
            ),
            layer(
                "/page.html",
                "{% extends \"layout.html\" %}{% block b %}B2{% endblock %}",
            ),
        ]);
        assert_eq!(flatten(&resolved), "A|B2");
    }

    #[test]
    fn test_grandchild_override_wins() {
        let resolved = resolve_chain(vec![
            layer("/base.html", "[{% block c %}base{% endblock %}]"),
            layer(
                "/mid.html",
                "{% extends \"base.html\" %}{% block c %}mid{% endblock %}",
            ),
            layer(
                "/leaf.html",
                "{% extends \"mid.html\" %}{% block c %}leaf{% endblock %}",
            ),
        ]);
        assert_eq!(flatten(&resolved), "[leaf]");
    }

    #[test]
    fn test_parent_splices_replaced_content() {
        let resolved = resolve_chain(vec![
            layer("/base.html", "{% block c %}base{% endblock %}"),
            layer(
                "/page.html",
                "{% extends \"base.html\" %}{% block c %}before {% parent %} after{% endblock %}",
            ),
        ]);
        assert_eq!(flatten(&resolved), "before base after");
    }

    #[test]
    fn test_parent_chain_two_levels() {
        let resolved = resolve_chain(vec![
            layer("/base.html", "{% block c %}A{% endblock %}"),
            layer(
                "/mid.html",
                "{% extends \"base.html\" %}{% block c %}B{% parent %}{% endblock %}",
            ),
            layer(
                "/leaf.html",
                "{% extends \"mid.html\" %}{% block c %}C{% parent %}{% endblock %}",
            ),
        ]);
        // leaf's parent is mid's block, whose own parent is base's block.
        assert_eq!(flatten(&resolved), "CBA");
    }

    #[test]
    fn test_non_block_child_content_dropped() {
        let resolved = resolve_chain(vec![
            layer("/base.html", "({% block c %}X{% endblock %})"),
            layer(
                "/page.html",
                "{% extends \"base.html\" %}DEAD{% block c %}Y{% endblock %}ALSO DEAD",
            ),
        ]);
        assert_eq!(flatten(&resolved), "(Y)");
    }

    #[test]
    fn test_top_level_set_propagates() {
        let resolved = resolve_chain(vec![
            layer("/base.html", "{% block c %}{% endblock %}"),
            layer(
                "/page.html",
                "{% extends \"base.html\" %}{% set x = 1 %}{% block c %}Y{% endblock %}",
            ),
        ]);
        // The hoisted set tag comes first in the effective tree.
        let Node::Tag(tag) = &resolved[0] else {
            panic!("expected hoisted set tag");
        };
        assert_eq!(tag.name, "set");
        assert_eq!(flatten(&resolved), "Y");
    }

    #[test]
    fn test_nested_block_in_base_substituted() {
        let resolved = resolve_chain(vec![
            layer(
                "/base.html",
                "{% if ok %}{% block inner %}old{% endblock %}{% endif %}",
            ),
            layer(
                "/page.html",
                "{% extends \"base.html\" %}{% block inner %}new{% endblock %}",
            ),
        ]);
        assert_eq!(flatten(&resolved), "new");
    }
}
