use std::ops::Range;

use crate::parser::error::ParseError;

/// Directives whose `=>` body is kept verbatim instead of being read as markup.
pub const RAW_BODY_DIRECTIVES: &[&str] = &["code-block", "md"];

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

/// A raw expression read from source text, before any structural meaning is
/// attached to directive names.
#[derive(Debug, Clone, PartialEq)]
pub enum Form {
    /// A run of prose in markup context.
    Text { text: String, span: Range<usize> },
    /// A bare atom in argument context.
    Word { text: String, span: Range<usize> },
    /// A quoted string literal.
    Str { value: String, span: Range<usize> },
    Strong { content: Vec<Form>, span: Range<usize> },
    Emphasis { content: Vec<Form>, span: Range<usize> },
    Code { text: String, span: Range<usize> },
    Call(Call),
    /// `( ... )` in argument context.
    Group { items: Vec<Form>, span: Range<usize> },
    /// One or more blank lines.
    Break { span: Range<usize> },
}

impl Form {
    pub fn span(&self) -> Range<usize> {
        match self {
            Form::Text { span, .. }
            | Form::Word { span, .. }
            | Form::Str { span, .. }
            | Form::Strong { span, .. }
            | Form::Emphasis { span, .. }
            | Form::Code { span, .. }
            | Form::Group { span, .. }
            | Form::Break { span } => span.clone(),
            Form::Call(call) => call.span.clone(),
        }
    }

    /// The literal value of a string or word.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Form::Str { value, .. } => Some(value),
            Form::Word { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Form::Break { .. } => true,
            Form::Text { text, .. } => text.trim().is_empty(),
            _ => false,
        }
    }
}

/// `(:name arg ... => body)`
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub name_span: Range<usize>,
    pub args: Vec<Form>,
    pub body: Option<Body>,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Markup(Vec<Form>),
    Raw(String),
}

/// Whether `name` is a valid directive name: ASCII alphanumerics and `-`,
/// not starting with `-`.
pub fn is_directive_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Byte offset of the first blank line in `text`, or its length.
fn paragraph_end(text: &str) -> usize {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 && line.trim().is_empty() {
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

/// For a quoted string literal as written in the source, the source offset
/// of every byte of its value, plus one past the end.
///
/// Escapes make the value shorter than the literal, so the offsets are not
/// a plain shift.
pub fn string_value_offsets(literal: &str) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(literal.len());
    let mut chars = literal.char_indices().skip(1).peekable();
    while let Some((at, c)) = chars.next() {
        match c {
            '"' => {
                offsets.push(at);
                return offsets;
            }
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    let value_len = match escaped {
                        'n' | 't' => 1,
                        other => other.len_utf8(),
                    };
                    offsets.extend(std::iter::repeat_n(at, value_len));
                }
            }
            c => offsets.extend((0..c.len_utf8()).map(|i| at + i)),
        }
    }
    offsets.push(literal.len());
    offsets
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read a whole source file.
///
/// Errors do not stop the reader: after a malformed top-level form it skips
/// to the next blank line and carries on, so every independent block gets
/// its own diagnostic.
pub fn read(source: &str, file_id: usize) -> (Vec<Form>, Vec<ParseError>) {
    let mut reader = Reader::new(source, file_id);
    let mut forms = Vec::new();
    let mut errors = Vec::new();
    let mut parens = 0usize;

    loop {
        match reader.markup_form(End::Eof, &mut parens) {
            Ok(Some(form)) => forms.push(form),
            Ok(None) => break,
            Err(error) => {
                errors.push(error);
                reader.recover();
                parens = 0;
            }
        }
    }

    (forms, errors)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// What terminates the markup sequence being read.
#[derive(Debug, Clone, Copy)]
enum End {
    Eof,
    /// The `)` closing the call that started at the given offset.
    Paren(usize),
    /// A closing `**` or `__` for the span that started at the given offset.
    Marker(&'static str, usize),
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    file_id: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str, file_id: usize) -> Self {
        Reader {
            src,
            pos: 0,
            file_id,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn error(&self, message: impl Into<String>, span: Range<usize>) -> ParseError {
        ParseError::syntax(message, span, self.file_id)
    }

    /// Skip past the next blank line (or to the end of input).
    fn recover(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
        while let Some(c) = self.peek() {
            if c == '\n' && self.blank_line_len().is_some() {
                self.pos += self.blank_line_len().unwrap_or(1);
                return;
            }
            self.pos += c.len_utf8();
        }
    }

    /// If positioned on a newline that starts a blank line, the byte length
    /// of the whole whitespace run.
    fn blank_line_len(&self) -> Option<usize> {
        let rest = self.rest();
        if !rest.starts_with('\n') {
            return None;
        }
        let after = &rest[1..];
        let line_end = after.find(|c: char| c != ' ' && c != '\t' && c != '\r')?;
        if !after[line_end..].starts_with('\n') {
            return None;
        }
        let run = rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(rest.len());
        Some(run)
    }

    fn at_markup_special(&self, end: End, parens: usize) -> bool {
        match self.peek() {
            None => true,
            Some('`') => true,
            Some(')') => parens == 0,
            Some('\n') => self.blank_line_len().is_some(),
            Some(_) => {
                self.starts_with("(:")
                    || self.starts_with("**")
                    || self.starts_with("__")
                    || matches!(end, End::Marker(marker, _) if self.starts_with(marker))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Markup context
    // -----------------------------------------------------------------------

    fn markup_seq(&mut self, end: End) -> Result<Vec<Form>, ParseError> {
        let mut forms = Vec::new();
        let mut parens = 0usize;
        while let Some(form) = self.markup_form(end, &mut parens)? {
            forms.push(form);
        }
        Ok(forms)
    }

    /// Read the next markup form, or `None` once `end` has been consumed.
    fn markup_form(&mut self, end: End, parens: &mut usize) -> Result<Option<Form>, ParseError> {
        let start = self.pos;

        let Some(c) = self.peek() else {
            return match end {
                End::Eof => Ok(None),
                End::Paren(open) => Err(self
                    .error("unclosed directive call", open..self.pos)
                    .with_note("expected `)` before the end of the file")),
                End::Marker(marker, open) => Err(self.error(
                    format!("unterminated `{}` span", marker),
                    open..open + marker.len(),
                )),
            };
        };

        if let End::Marker(marker, open) = end {
            if self.starts_with(marker) {
                self.pos += marker.len();
                return Ok(None);
            }
            if (c == ')' && *parens == 0) || self.blank_line_len().is_some() {
                return Err(self.error(
                    format!("unterminated `{}` span", marker),
                    open..open + marker.len(),
                ));
            }
        }

        if c == ')' && *parens == 0 {
            return match end {
                End::Paren(_) => {
                    self.pos += 1;
                    Ok(None)
                }
                _ => Err(self
                    .error("unbalanced `)`", start..start + 1)
                    .with_note("write `\\)` for a literal parenthesis")),
            };
        }

        if let Some(len) = self.blank_line_len() {
            self.pos += len;
            return Ok(Some(Form::Break {
                span: start..self.pos,
            }));
        }

        if self.starts_with("(:") {
            return self.call().map(Some);
        }

        if self.starts_with("**") || self.starts_with("__") {
            let marker = if self.starts_with("**") { "**" } else { "__" };
            self.pos += 2;
            let content = self.markup_seq(End::Marker(marker, start))?;
            let span = start..self.pos;
            return Ok(Some(if marker == "**" {
                Form::Strong { content, span }
            } else {
                Form::Emphasis { content, span }
            }));
        }

        if c == '`' {
            self.pos += 1;
            let rest = self.rest();
            let Some(len) = rest[..paragraph_end(rest)].find('`') else {
                return Err(self
                    .error("unterminated `` ` `` literal", start..start + 1)
                    .with_note("code literals end before the next blank line"));
            };
            let text = self.rest()[..len].to_string();
            self.pos += len + 1;
            return Ok(Some(Form::Code {
                text,
                span: start..self.pos,
            }));
        }

        let mut text = String::new();
        while !self.at_markup_special(end, *parens) {
            let Some(c) = self.peek() else { break };
            self.pos += c.len_utf8();
            match c {
                '\\' => match self.peek() {
                    Some(escaped) => {
                        text.push(escaped);
                        self.pos += escaped.len_utf8();
                    }
                    None => text.push('\\'),
                },
                '(' => {
                    *parens += 1;
                    text.push('(');
                }
                ')' => {
                    *parens -= 1;
                    text.push(')');
                }
                c => text.push(c),
            }
        }
        Ok(Some(Form::Text {
            text,
            span: start..self.pos,
        }))
    }

    // -----------------------------------------------------------------------
    // Directive calls
    // -----------------------------------------------------------------------

    fn call(&mut self) -> Result<Form, ParseError> {
        let start = self.pos;
        self.pos += 2;

        let name_start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                break;
            }
            self.pos += c.len_utf8();
        }
        let name = self.src[name_start..self.pos].to_string();
        let name_span = name_start..self.pos;
        if !is_directive_name(&name) {
            let message = if name.is_empty() {
                "missing directive name after `(:`".to_string()
            } else {
                format!("malformed directive name `{}`", name)
            };
            return Err(self
                .error(message, start..self.pos)
                .with_note("directive names consist of letters, digits and `-`"));
        }

        let mut args = Vec::new();
        let mut body = None;
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    return Err(self
                        .error(format!("unclosed directive call `{}`", name), start..self.pos)
                        .with_note("expected `)` before the end of the file"));
                }
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some('=') if self.at_arrow() => {
                    self.pos += 2;
                    body = Some(if RAW_BODY_DIRECTIVES.contains(&name.as_str()) {
                        Body::Raw(self.raw_body(start)?)
                    } else {
                        Body::Markup(self.markup_seq(End::Paren(start))?)
                    });
                    break;
                }
                Some(_) => args.push(self.argument()?),
            }
        }

        Ok(Form::Call(Call {
            name,
            name_span,
            args,
            body,
            span: start..self.pos,
        }))
    }

    fn at_arrow(&self) -> bool {
        if !self.starts_with("=>") {
            return false;
        }
        match self.rest()[2..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || c == ')',
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    // -----------------------------------------------------------------------
    // Argument context
    // -----------------------------------------------------------------------

    fn argument(&mut self) -> Result<Form, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some('"') => self.string(),
            Some('(') if self.starts_with("(:") => self.call(),
            Some('(') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek() {
                        None => {
                            return Err(self.error("unclosed argument group", start..self.pos));
                        }
                        Some(')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => items.push(self.argument()?),
                    }
                }
                Ok(Form::Group {
                    items,
                    span: start..self.pos,
                })
            }
            _ => {
                let mut text = String::new();
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        break;
                    }
                    self.pos += c.len_utf8();
                    text.push(c);
                }
                Ok(Form::Word {
                    text,
                    span: start..self.pos,
                })
            }
        }
    }

    fn string(&mut self) -> Result<Form, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal", start..self.pos));
            };
            self.pos += c.len_utf8();
            match c {
                '"' => break,
                '\\' => {
                    let Some(escaped) = self.peek() else { continue };
                    self.pos += escaped.len_utf8();
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                c => value.push(c),
            }
        }
        Ok(Form::Str {
            value,
            span: start..self.pos,
        })
    }

    /// Verbatim text up to the `)` balancing the call opened at `open`.
    fn raw_body(&mut self, open: usize) -> Result<String, ParseError> {
        if self.starts_with("\r\n") {
            self.pos += 2;
        } else if self.starts_with("\n") {
            self.pos += 1;
        }

        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek() else {
                return Err(self
                    .error("unclosed raw body", open..self.pos)
                    .with_note("parentheses inside a raw body must balance or be escaped as `\\(` and `\\)`"));
            };
            self.pos += c.len_utf8();
            match c {
                '\\' => match self.peek() {
                    Some(escaped @ ('(' | ')' | '\\')) => {
                        text.push(escaped);
                        self.pos += 1;
                    }
                    _ => text.push('\\'),
                },
                '(' => {
                    depth += 1;
                    text.push('(');
                }
                ')' if depth == 0 => break,
                ')' => {
                    depth -= 1;
                    text.push(')');
                }
                c => text.push(c),
            }
        }

        // A closing paren on its own line does not add a trailing line.
        if let Some(last_newline) = text.rfind('\n') {
            if text[last_newline + 1..].trim().is_empty() {
                text.truncate(last_newline);
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_ok(source: &str) -> Vec<Form> {
        let (forms, errors) = read(source, 0);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        forms
    }

    #[test]
    fn plain_text_is_one_form() {
        let forms = read_ok("Hello, world (with parens).");
        assert_eq!(forms.len(), 1);
        assert!(matches!(&forms[0], Form::Text { text, .. } if text == "Hello, world (with parens)."));
    }

    #[test]
    fn blank_line_breaks_paragraphs() {
        let forms = read_ok("one\n\n  \ntwo");
        assert_eq!(forms.len(), 3);
        assert!(matches!(forms[1], Form::Break { .. }));
    }

    #[test]
    fn call_with_arguments_and_body() {
        let forms = read_ok("(:link \"https://example.com\" => the **site**)");
        let Form::Call(call) = &forms[0] else {
            panic!("expected a call, got {:?}", forms[0]);
        };
        assert_eq!(call.name, "link");
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.args[0].as_literal(), Some("https://example.com"));
        let Some(Body::Markup(body)) = &call.body else {
            panic!("expected a markup body");
        };
        assert!(matches!(&body[1], Form::Strong { .. }));
    }

    #[test]
    fn groups_and_nested_calls() {
        let forms = read_ok("(:toctree intro (\"Guide\" guide/index) (:concat a b))");
        let Form::Call(call) = &forms[0] else { panic!() };
        assert!(matches!(&call.args[0], Form::Word { text, .. } if text == "intro"));
        assert!(matches!(&call.args[1], Form::Group { items, .. } if items.len() == 2));
        assert!(matches!(&call.args[2], Form::Call(inner) if inner.name == "concat"));
    }

    #[test]
    fn escapes_produce_literal_text() {
        let forms = read_ok(r"\(:not-a-call\) and \*\*stars\*\*");
        assert!(matches!(&forms[0], Form::Text { text, .. } if text == "(:not-a-call) and **stars**"));
    }

    #[test]
    fn raw_body_keeps_whitespace() {
        let forms = read_ok("(:code-block rust =>\nfn main() {\n    println!(\"hi\");\n}\n)");
        let Form::Call(call) = &forms[0] else { panic!() };
        assert_eq!(
            call.body,
            Some(Body::Raw("fn main() {\n    println!(\"hi\");\n}".to_string()))
        );
    }

    #[test]
    fn malformed_name_is_a_syntax_error() {
        let (_, errors) = read("(:bad!name x)", 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("malformed directive name"));
    }

    #[test]
    fn unterminated_string_is_reported() {
        let (_, errors) = read("(:h1 \"never closed)", 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated string"));
    }

    #[test]
    fn unbalanced_close_paren() {
        let (_, errors) = read("text )", 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unbalanced"));
    }

    #[test]
    fn recovers_after_malformed_block() {
        let source = "(:h1 \"ok\")\n\n(:bad! x)\n\n(:h2 \"still read\")\n\n)";
        let (forms, errors) = read(source, 0);
        assert_eq!(errors.len(), 2);
        let names: Vec<&str> = forms
            .iter()
            .filter_map(|f| match f {
                Form::Call(call) => Some(call.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["h1", "h2"]);
    }

    #[test]
    fn unterminated_code_literal_stops_at_paragraph() {
        let (forms, errors) = read("a `b\n\nc `d`", 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
        assert!(forms.iter().any(|f| matches!(f, Form::Code { text, .. } if text == "d")));
    }

    #[test]
    fn string_offsets_account_for_escapes() {
        assert_eq!(string_value_offsets("\"ab\""), vec![1, 2, 3]);
        assert_eq!(string_value_offsets(r#""a\"b""#), vec![1, 2, 4, 5]);
    }

    #[test]
    fn unterminated_strong() {
        let (_, errors) = read("some **bold\n\nnext", 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated `**`"));
    }
}
