/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template lexer.
//!
//! Splits raw template text into a single-pass sequence of tokens: literal
//! text runs, variable-interpolation spans, tag spans and comment spans.
//! Delimiters are configurable. The lexer preserves literal text exactly
//! (including whitespace) and tracks 1-based line numbers for error
//! messages.
//!
//! A backslash immediately before an opening delimiter escapes it: the
//! delimiter text is emitted literally and the backslash is dropped. A
//! span that is opened but never closed is an error carrying the line the
//! span started on.

use crate::error::{TemplateError, TemplateResult};

/// The delimiter configuration for variable, tag and comment spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub var_open: String,
    pub var_close: String,
    pub tag_open: String,
    pub tag_close: String,
    pub comment_open: String,
    pub comment_close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            var_open: "{{".to_string(),
            var_close: "}}".to_string(),
            tag_open: "{%".to_string(),
            tag_close: "%}".to_string(),
            comment_open: "{#".to_string(),
            comment_close: "#}".to_string(),
        }
    }
}

impl Delimiters {
    /// Validate the configuration: every delimiter must be non-empty and
    /// the three opening delimiters must be distinct.
    pub fn validate(&self) -> TemplateResult<()> {
        let pairs = [
            ("variable", &self.var_open, &self.var_close),
            ("tag", &self.tag_open, &self.tag_close),
            ("comment", &self.comment_open, &self.comment_close),
        ];
        for (what, open, close) in pairs {
            if open.is_empty() || close.is_empty() {
                return Err(TemplateError::config(format!(
                    "{what} delimiters must not be empty"
                )));
            }
        }
        if self.var_open == self.tag_open
            || self.var_open == self.comment_open
            || self.tag_open == self.comment_open
        {
            return Err(TemplateError::config(
                "variable, tag and comment spans must use distinct opening delimiters",
            ));
        }
        Ok(())
    }
}

/// The kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Verbatim output text.
    Literal,
    /// The interior of a variable-interpolation span.
    Var,
    /// The interior of a tag span.
    Tag,
    /// The interior of a comment span (never rendered).
    Comment,
}

/// A single lexed token. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Literal content, or the exact span interior for var/tag/comment.
    pub text: String,
    /// The exact source slice, delimiters included. Used to reconstruct
    /// verbatim text inside `{% raw %}` bodies.
    pub raw: String,
    /// 1-based line number where the token starts.
    pub line: usize,
}

/// A lazy, single-pass lexer over template source text.
pub struct Lexer<'s> {
    source: &'s str,
    delims: &'s Delimiters,
    pos: usize,
    line: usize,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str, delims: &'s Delimiters) -> Self {
        Lexer {
            source,
            delims,
            pos: 0,
            line: 1,
        }
    }

    /// Opening delimiters ordered longest-first so that a delimiter that
    /// is a prefix of another never wins the match.
    fn openers(&self) -> [(TokenKind, &'s str, &'s str); 3] {
        let mut openers = [
            (
                TokenKind::Comment,
                self.delims.comment_open.as_str(),
                self.delims.comment_close.as_str(),
            ),
            (
                TokenKind::Tag,
                self.delims.tag_open.as_str(),
                self.delims.tag_close.as_str(),
            ),
            (
                TokenKind::Var,
                self.delims.var_open.as_str(),
                self.delims.var_close.as_str(),
            ),
        ];
        openers.sort_by_key(|(_, open, _)| std::cmp::Reverse(open.len()));
        openers
    }

    fn rest(&self) -> &'s str {
        &self.source[self.pos..]
    }

    /// Advance past `text`, updating the line counter.
    fn advance(&mut self, len: usize) {
        let consumed = &self.source[self.pos..self.pos + len];
        self.line += consumed.matches('\n').count();
        self.pos += len;
    }

    /// Produce the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> TemplateResult<Option<Token>> {
        if self.pos >= self.source.len() {
            return Ok(None);
        }

        let openers = self.openers();
        let start_line = self.line;

        // A span starts right here.
        for (kind, open, close) in openers {
            if self.rest().starts_with(open) {
                return self.lex_span(kind, open, close).map(Some);
            }
        }

        // Otherwise accumulate a literal run up to the next span start or
        // escaped delimiter.
        let mut literal = String::new();
        let start_pos = self.pos;
        while self.pos < self.source.len() {
            let rest = self.rest();
            if let Some(stripped) = rest.strip_prefix('\\') {
                if let Some((_, open, _)) =
                    openers.iter().find(|(_, open, _)| stripped.starts_with(*open))
                {
                    // Escaped delimiter: drop the backslash, keep the
                    // delimiter as literal text.
                    literal.push_str(open);
                    self.advance(1 + open.len());
                    continue;
                }
            }
            if openers.iter().any(|(_, open, _)| rest.starts_with(*open)) {
                break;
            }
            let ch = rest.chars().next().expect("non-empty rest");
            literal.push(ch);
            self.advance(ch.len_utf8());
        }

        Ok(Some(Token {
            kind: TokenKind::Literal,
            raw: self.source[start_pos..self.pos].to_string(),
            text: literal,
            line: start_line,
        }))
    }

    /// Lex one delimited span. Variable and tag interiors are scanned with
    /// awareness of string literals and brace/bracket/paren nesting so
    /// that e.g. a map literal containing the close-delimiter characters
    /// does not terminate the span early.
    fn lex_span(&mut self, kind: TokenKind, open: &str, close: &str) -> TemplateResult<Token> {
        let start_line = self.line;
        let start_pos = self.pos;
        self.advance(open.len());

        let interior_start = self.pos;
        let interior_len = match kind {
            TokenKind::Comment => find_plain(self.rest(), close),
            _ => find_span_end(self.rest(), close),
        };

        let Some(interior_len) = interior_len else {
            let what = match kind {
                TokenKind::Var => "variable span",
                TokenKind::Tag => "tag span",
                TokenKind::Comment => "comment span",
                TokenKind::Literal => unreachable!("literals are not delimited"),
            };
            return Err(TemplateError::UnterminatedSpan {
                what,
                line: start_line,
            });
        };

        self.advance(interior_len);
        self.advance(close.len());

        Ok(Token {
            kind,
            text: self.source[interior_start..interior_start + interior_len].to_string(),
            raw: self.source[start_pos..self.pos].to_string(),
            line: start_line,
        })
    }
}

impl Iterator for Lexer<'_> {
    type Item = TemplateResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

/// Tokenize an entire source string eagerly.
pub fn tokenize(source: &str, delims: &Delimiters) -> TemplateResult<Vec<Token>> {
    Lexer::new(source, delims).collect()
}

/// Find `close` with no structural awareness (comments).
fn find_plain(haystack: &str, close: &str) -> Option<usize> {
    haystack.find(close)
}

/// Find the end of a var/tag span interior: the first occurrence of
/// `close` that is outside any string literal and at zero nesting depth.
fn find_span_end(haystack: &str, close: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut i = 0;
    let mut depth: i32 = 0;
    let mut in_str: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_str {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_str = None;
            }
            i += 1;
            continue;
        }
        if depth == 0 && haystack[i..].starts_with(close) {
            return Some(i);
        }
        match b {
            b'"' | b'\'' => in_str = Some(b),
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}
