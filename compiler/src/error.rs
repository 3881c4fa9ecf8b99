use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use rocket::document::SourceSpan;
use rocket::parser::{ParseError, ParseErrorKind};

use crate::directive::Arity;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{0}")]
    Structure(String),
    #[error("`{directive}` expects {expected} argument(s), got {actual}")]
    Arity {
        directive: String,
        expected: Arity,
        actual: usize,
    },
    #[error("unresolved name `{0}`")]
    UnresolvedName(String),
    #[error("cyclic expansion: {}", .0.join(" -> "))]
    CyclicExpansion(Vec<String>),
    #[error("expansion exceeded the maximum depth of {0}")]
    ExpansionTooDeep(usize),
    #[error("`{0}` is already defined in this scope")]
    DuplicateDefinition(String),
    #[error("`{0}` is a built-in directive and cannot be redefined")]
    ReservedName(String),
    #[error("argument {index} of `{directive}` is `{value}`, which does not match `{pattern}`")]
    PatternMismatch {
        directive: String,
        index: usize,
        pattern: String,
        value: String,
    },
    #[error("invalid pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("duplicate reference id `{0}`")]
    DuplicateReference(String),
    #[error("unresolved reference `{0}`")]
    UnresolvedReference(String),
    #[error("unresolved directive `{0}` reached the renderer")]
    UnresolvedDirective(String),
    #[error("invalid arguments to `{directive}`: {message}")]
    InvalidArgument { directive: String, message: String },
    #[error("cannot read `{path}`: {message}")]
    Io { path: String, message: String },
}

impl CompileError {
    /// Short machine-readable code shown next to the diagnostic.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::Syntax(_) => "syntax",
            CompileError::Structure(_) => "structure",
            CompileError::Arity { .. } => "arity",
            CompileError::UnresolvedName(_) => "unresolved-name",
            CompileError::CyclicExpansion(_) => "cyclic-expansion",
            CompileError::ExpansionTooDeep(_) => "expansion-too-deep",
            CompileError::DuplicateDefinition(_) => "duplicate-definition",
            CompileError::ReservedName(_) => "reserved-name",
            CompileError::PatternMismatch { .. } => "pattern-mismatch",
            CompileError::InvalidPattern { .. } => "invalid-pattern",
            CompileError::DuplicateReference(_) => "duplicate-reference",
            CompileError::UnresolvedReference(_) => "unresolved-reference",
            CompileError::UnresolvedDirective(_) => "unresolved-directive",
            CompileError::InvalidArgument { .. } => "invalid-argument",
            CompileError::Io { .. } => "io",
        }
    }
}

/// A compile error or warning enriched with source location information.
#[derive(Debug, Clone)]
pub struct DiagnosticError {
    pub error: CompileError,
    pub span: Option<Range<usize>>,
    pub source_id: usize,
    pub is_warning: bool,
    /// A second location, e.g. where a duplicate was first defined.
    pub related: Option<(SourceSpan, String)>,
    pub notes: Vec<String>,
}

impl DiagnosticError {
    pub fn new(error: CompileError, span: &SourceSpan) -> Self {
        DiagnosticError {
            error,
            span: Some(span.range.clone()),
            source_id: span.file_id,
            is_warning: false,
            related: None,
            notes: Vec::new(),
        }
    }

    /// An error attached to a whole file rather than a span inside it.
    pub fn in_file(error: CompileError, source_id: usize) -> Self {
        DiagnosticError {
            error,
            span: None,
            source_id,
            is_warning: false,
            related: None,
            notes: Vec::new(),
        }
    }

    pub fn with_related(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.related = Some((span, message.into()));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let diagnostic = if self.is_warning {
            Diagnostic::warning()
        } else {
            Diagnostic::error()
        };

        let mut labels = Vec::new();
        if let Some(span) = &self.span {
            labels.push(Label::primary(self.source_id, span.clone()));
        }
        if let Some((span, message)) = &self.related {
            labels.push(Label::secondary(span.file_id, span.range.clone()).with_message(message));
        }

        diagnostic
            .with_code(self.error.code())
            .with_message(self.error.to_string())
            .with_labels(labels)
            .with_notes(self.notes.clone())
    }
}

impl From<ParseError> for DiagnosticError {
    fn from(error: ParseError) -> Self {
        let compile_error = match error.kind {
            ParseErrorKind::Syntax => CompileError::Syntax(error.message),
            ParseErrorKind::Structure => CompileError::Structure(error.message),
        };
        DiagnosticError {
            error: compile_error,
            span: Some(error.span),
            source_id: error.file_id,
            is_warning: false,
            related: None,
            notes: error.notes,
        }
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for DiagnosticError {}
