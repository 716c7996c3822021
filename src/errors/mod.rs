//! Error types, diagnostics, and result aliases for the rill engine.
//!
//! All user-facing errors are variants of [`RillError`], rendered via
//! `miette` diagnostics. Every variant that points at the filter source
//! carries the source text and a labeled byte span.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::lexer::token::Span;

/// The four caller-visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed source at the character level
    Lex,
    /// Syntactically ill-formed filter
    Parse,
    /// Unknown or forbidden function, arity mismatch
    Validate,
    /// Fault raised while evaluating
    Runtime,
}

/// Classification of a runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Bad index or key into a container
    Index,
    /// Operand type mismatch
    Type,
    /// Function called with the wrong number of arguments
    Arity,
    /// Division/modulo by zero and friends
    Arith,
    /// Unbound variable, undefined function, or unmatched break
    Unbound,
    /// Raised by `error(...)` in the filter
    User,
    /// A resource cap was exceeded; never catchable
    Resource,
}

/// Main error type for the rill engine
#[derive(Error, Debug, Diagnostic)]
pub enum RillError {
    #[error("unterminated string")]
    #[diagnostic(help("add a closing quote"))]
    UnterminatedString {
        #[source_code]
        src: String,
        #[label("string started here but never closed")]
        span: SourceSpan,
    },

    #[error("invalid escape sequence")]
    #[diagnostic(help("{help}"))]
    InvalidEscape {
        #[source_code]
        src: String,
        #[label("invalid escape: {sequence}")]
        span: SourceSpan,
        sequence: String,
        help: String,
    },

    #[error("unexpected character")]
    #[diagnostic(help("'{ch}' is not valid filter syntax"))]
    UnexpectedCharacter {
        #[source_code]
        src: String,
        #[label("unexpected: '{ch}'")]
        span: SourceSpan,
        ch: char,
    },

    #[error("malformed number")]
    #[diagnostic(help("numbers follow JSON syntax: digits, optional fraction, optional exponent"))]
    InvalidNumber {
        #[source_code]
        src: String,
        #[label("cannot parse '{text}' as a number")]
        span: SourceSpan,
        text: String,
    },

    #[error("unexpected token")]
    #[diagnostic(help("expected {expected}"))]
    UnexpectedToken {
        #[source_code]
        src: String,
        #[label("unexpected: {found}")]
        span: SourceSpan,
        expected: String,
        found: String,
    },

    #[error("filter is nested too deeply")]
    #[diagnostic(help("expression nesting exceeds the parser limit of {limit}"))]
    ParseDepthExceeded {
        #[source_code]
        src: String,
        #[label("nesting too deep here")]
        span: SourceSpan,
        limit: usize,
    },

    #[error("unknown function")]
    #[diagnostic(help("{name}/{arity} is neither a builtin nor defined in this filter"))]
    UnknownFunction {
        #[source_code]
        src: String,
        #[label("'{name}' is not defined")]
        span: SourceSpan,
        name: String,
        arity: usize,
    },

    #[error("wrong number of arguments")]
    #[diagnostic(help("{name} accepts {expected} argument(s)"))]
    ArityMismatch {
        #[source_code]
        src: String,
        #[label("'{name}' called with {found} argument(s)")]
        span: SourceSpan,
        name: String,
        found: usize,
        expected: String,
    },

    #[error("forbidden in this sandbox")]
    #[diagnostic(help(
        "'{name}' reaches outside the sandbox (time, environment, or input streams) and is disabled"
    ))]
    Forbidden {
        #[source_code]
        src: String,
        #[label("'{name}' is not allowed here")]
        span: SourceSpan,
        name: String,
    },

    #[error("{message}")]
    Fault {
        #[source_code]
        src: String,
        #[label("while evaluating this")]
        span: SourceSpan,
        kind: FaultKind,
        message: String,
    },
}

impl RillError {
    /// Create an UnterminatedString error
    pub fn unterminated_string(src: impl Into<String>, span: Span) -> Self {
        RillError::UnterminatedString {
            src: src.into(),
            span: span.into(),
        }
    }

    /// Create an InvalidEscape error
    pub fn invalid_escape(
        src: impl Into<String>,
        span: Span,
        sequence: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        RillError::InvalidEscape {
            src: src.into(),
            span: span.into(),
            sequence: sequence.into(),
            help: help.into(),
        }
    }

    /// Create an UnexpectedCharacter error
    pub fn unexpected_character(src: impl Into<String>, span: Span, ch: char) -> Self {
        RillError::UnexpectedCharacter {
            src: src.into(),
            span: span.into(),
            ch,
        }
    }

    /// Create an InvalidNumber error
    pub fn invalid_number(src: impl Into<String>, span: Span, text: impl Into<String>) -> Self {
        RillError::InvalidNumber {
            src: src.into(),
            span: span.into(),
            text: text.into(),
        }
    }

    /// Create an UnexpectedToken error
    pub fn unexpected_token(
        src: impl Into<String>,
        span: Span,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        RillError::UnexpectedToken {
            src: src.into(),
            span: span.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a runtime fault of the given kind
    pub fn fault(
        src: impl Into<String>,
        span: Span,
        kind: FaultKind,
        message: impl Into<String>,
    ) -> Self {
        RillError::Fault {
            src: src.into(),
            span: span.into(),
            kind,
            message: message.into(),
        }
    }

    /// Which of the four caller-visible classes this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            RillError::UnterminatedString { .. }
            | RillError::InvalidEscape { .. }
            | RillError::UnexpectedCharacter { .. }
            | RillError::InvalidNumber { .. } => ErrorCategory::Lex,
            RillError::UnexpectedToken { .. } | RillError::ParseDepthExceeded { .. } => {
                ErrorCategory::Parse
            }
            RillError::UnknownFunction { .. }
            | RillError::ArityMismatch { .. }
            | RillError::Forbidden { .. } => ErrorCategory::Validate,
            RillError::Fault { .. } => ErrorCategory::Runtime,
        }
    }

    /// The fault kind, for runtime errors
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            RillError::Fault { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether a `try` expression may catch this error.
    ///
    /// Only runtime faults are catchable, and resource exhaustion is
    /// excluded: a filter must not be able to outlive its caps by
    /// wrapping itself in `try`.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            RillError::Fault { kind, .. } if *kind != FaultKind::Resource
        )
    }

    /// Get the span for this error
    pub fn span(&self) -> Option<Span> {
        let source_span = match self {
            RillError::UnterminatedString { span, .. } => span,
            RillError::InvalidEscape { span, .. } => span,
            RillError::UnexpectedCharacter { span, .. } => span,
            RillError::InvalidNumber { span, .. } => span,
            RillError::UnexpectedToken { span, .. } => span,
            RillError::ParseDepthExceeded { span, .. } => span,
            RillError::UnknownFunction { span, .. } => span,
            RillError::ArityMismatch { span, .. } => span,
            RillError::Forbidden { span, .. } => span,
            RillError::Fault { span, .. } => span,
        };
        Some(Span::new(
            source_span.offset(),
            source_span.offset() + source_span.len(),
        ))
    }

    /// Get a simple error message (without source context).
    ///
    /// This is the string a `catch` handler receives as its input.
    pub fn message(&self) -> String {
        match self {
            RillError::UnterminatedString { .. } => "unterminated string".to_string(),
            RillError::InvalidEscape { sequence, .. } => {
                format!("invalid escape sequence: {}", sequence)
            }
            RillError::UnexpectedCharacter { ch, .. } => {
                format!("unexpected character: '{}'", ch)
            }
            RillError::InvalidNumber { text, .. } => {
                format!("malformed number: '{}'", text)
            }
            RillError::UnexpectedToken {
                expected, found, ..
            } => {
                format!("unexpected token: expected {}, found {}", expected, found)
            }
            RillError::ParseDepthExceeded { limit, .. } => {
                format!("filter nesting exceeds the parser limit of {}", limit)
            }
            RillError::UnknownFunction { name, arity, .. } => {
                format!("{}/{} is not defined", name, arity)
            }
            RillError::ArityMismatch {
                name,
                found,
                expected,
                ..
            } => {
                format!(
                    "{} called with {} argument(s), accepts {}",
                    name, found, expected
                )
            }
            RillError::Forbidden { name, .. } => {
                format!("'{}' is forbidden in this sandbox", name)
            }
            RillError::Fault { message, .. } => message.clone(),
        }
    }
}

/// Result type for rill operations
pub type RillResult<T> = Result<T, RillError>;
