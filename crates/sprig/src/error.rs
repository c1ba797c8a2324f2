/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.
//!
//! The taxonomy follows the compilation pipeline: lexing errors
//! (unterminated spans), parse errors (unknown tags, mismatched closers,
//! malformed expressions), resolution errors (loader failures, circular
//! inheritance), configuration errors (raised synchronously when an engine
//! is constructed, never deferred into a render call), and render errors.
//!
//! Lex, parse and resolution errors abort compilation of the template
//! entirely; partial artifacts are never cached or returned.

use thiserror::Error;

/// Errors that can occur during template compilation or rendering.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A variable, tag or comment span was opened but never closed.
    #[error("Unterminated {what} starting on line {line}")]
    UnterminatedSpan { what: &'static str, line: usize },

    /// General parse failure with the offending text and line.
    #[error("Parse error on line {line}: {message}")]
    Parse { message: String, line: usize },

    /// A tag name that is not present in the tag registry.
    #[error("Unknown tag \"{name}\" on line {line}")]
    UnknownTag { name: String, line: usize },

    /// A closing tag with no matching open frame.
    #[error("Unexpected end tag \"{name}\" on line {line}")]
    UnexpectedEndTag { name: String, line: usize },

    /// End of input was reached with a tag still open.
    #[error("Unterminated tag \"{name}\" opened on line {line}")]
    UnterminatedTag { name: String, line: usize },

    /// A filter name that is not registered, detected at compile time.
    #[error("Unknown filter \"{name}\" on line {line}")]
    UnknownFilter { name: String, line: usize },

    /// The loader could not resolve or load a template reference.
    #[error("Unable to find template \"{identity}\"")]
    TemplateNotFound { identity: String },

    /// An `extends` chain revisited a template already in the chain.
    #[error("Circular extends detected at \"{identity}\"")]
    CircularExtends { identity: String },

    /// An `include`/`import` chain revisited a template being compiled.
    #[error("Circular include detected at \"{identity}\"")]
    CircularInclude { identity: String },

    /// Invalid engine configuration (bad option value, unusable loader).
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// A failure while executing a compiled artifact.
    #[error("Render error: {message}")]
    Render { message: String },

    /// I/O error (e.g., reading a template file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    /// Construct a parse error with a message and line number.
    pub fn parse(message: impl Into<String>, line: usize) -> Self {
        TemplateError::Parse {
            message: message.into(),
            line,
        }
    }

    /// Construct a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        TemplateError::Configuration {
            message: message.into(),
        }
    }

    /// Construct a render error.
    pub fn render(message: impl Into<String>) -> Self {
        TemplateError::Render {
            message: message.into(),
        }
    }

    /// True for errors raised by the lexer or parser (compile-time syntax).
    pub fn is_syntax_error(&self) -> bool {
        matches!(
            self,
            TemplateError::UnterminatedSpan { .. }
                | TemplateError::Parse { .. }
                | TemplateError::UnknownTag { .. }
                | TemplateError::UnexpectedEndTag { .. }
                | TemplateError::UnterminatedTag { .. }
                | TemplateError::UnknownFilter { .. }
        )
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_line_numbers() {
        let err = TemplateError::parse("unexpected token \"%\"", 3);
        assert_eq!(err.to_string(), "Parse error on line 3: unexpected token \"%\"");

        let err = TemplateError::UnterminatedTag {
            name: "if".to_string(),
            line: 7,
        };
        assert_eq!(err.to_string(), "Unterminated tag \"if\" opened on line 7");
    }

    #[test]
    fn test_syntax_error_classification() {
        assert!(TemplateError::parse("x", 1).is_syntax_error());
        assert!(
            TemplateError::UnterminatedSpan {
                what: "variable",
                line: 1
            }
            .is_syntax_error()
        );
        assert!(!TemplateError::render("x").is_syntax_error());
        assert!(!TemplateError::config("x").is_syntax_error());
    }
}
