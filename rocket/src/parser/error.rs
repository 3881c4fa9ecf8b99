use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Malformed source text: unbalanced parentheses, unterminated strings
    /// or spans, bad directive names.
    Syntax,
    /// Well-formed text with an invalid shape: misplaced `step`, `item` or
    /// `term`, duplicate glossary terms, bad heading arguments.
    Structure,
}

/// Parse errors with source location information.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub span: Range<usize>,
    pub file_id: usize,
    pub severity: Severity,
    pub notes: Vec<String>,
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        ParseError {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            span,
            file_id,
            severity: Severity::Error,
            notes: Vec::new(),
        }
    }

    pub fn structure(message: impl Into<String>, span: Range<usize>, file_id: usize) -> Self {
        ParseError {
            kind: ParseErrorKind::Structure,
            ..ParseError::syntax(message, span, file_id)
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let code = match self.kind {
            ParseErrorKind::Syntax => "syntax",
            ParseErrorKind::Structure => "structure",
        };
        Diagnostic::new(self.severity)
            .with_code(code)
            .with_message(&self.message)
            .with_labels(vec![Label::primary(self.file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}
