//! Builds the typed document tree from reader forms.
//!
//! Structural directives (headings, steps, glossaries, lists, code blocks and
//! the inline markers) become dedicated nodes here. Every other call is kept
//! as a `Directive` placeholder with its arguments and body converted to
//! nodes, ready for the evaluator.

use std::collections::HashSet;

use crate::document::{
    DirectiveCall, Heading, HeadingId, Node, SourceSpan, text_content, trim_inline,
    unwrap_paragraph,
};
use crate::parser::error::ParseError;
use crate::parser::reader::{Body, Call, Form};

/// Calls that stand alone instead of joining the surrounding paragraph.
const BLOCK_DIRECTIVES: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "steps",
    "glossary",
    "definition-list",
    "list",
    "ordered-list",
    "code-block",
    "toctree",
    "include",
    "import",
    "md",
    "note",
    "warning",
    "figure",
    "define",
    "define-template",
    "theme-config",
];

pub(crate) fn build(forms: &[Form], file_id: usize) -> Result<Vec<Node>, Vec<ParseError>> {
    let mut builder = Builder {
        file_id,
        errors: Vec::new(),
    };
    let nodes = builder.blocks(forms);
    if builder.errors.is_empty() {
        Ok(nodes)
    } else {
        Err(builder.errors)
    }
}

struct Builder {
    file_id: usize,
    errors: Vec<ParseError>,
}

impl Builder {
    fn error(&mut self, message: impl Into<String>, span: std::ops::Range<usize>) {
        self.errors
            .push(ParseError::structure(message, span, self.file_id));
    }

    fn span(&self, call: &Call) -> SourceSpan {
        SourceSpan::new(self.file_id, call.span.clone())
    }

    // -----------------------------------------------------------------------
    // Flow
    // -----------------------------------------------------------------------

    fn blocks(&mut self, forms: &[Form]) -> Vec<Node> {
        let mut blocks = Vec::new();
        let mut paragraph = Vec::new();

        for form in forms {
            match form {
                Form::Break { .. } => flush(&mut paragraph, &mut blocks),
                Form::Call(call) if BLOCK_DIRECTIVES.contains(&call.name.as_str()) => {
                    flush(&mut paragraph, &mut blocks);
                    if let Some(node) = self.call(call) {
                        blocks.push(node);
                    }
                }
                other => {
                    if let Some(node) = self.inline(other) {
                        paragraph.push(node);
                    }
                }
            }
        }
        flush(&mut paragraph, &mut blocks);
        blocks
    }

    fn body(&mut self, call: &Call) -> Option<Vec<Node>> {
        match &call.body {
            None => None,
            Some(Body::Markup(forms)) => Some(unwrap_paragraph(self.blocks(forms))),
            Some(Body::Raw(text)) => Some(vec![Node::Text(text.clone())]),
        }
    }

    fn inline(&mut self, form: &Form) -> Option<Node> {
        match form {
            Form::Text { text, .. } | Form::Word { text, .. } => Some(Node::Text(text.clone())),
            Form::Str { value, .. } => Some(Node::Text(value.clone())),
            Form::Strong { content, span } => Some(Node::Strong(self.span_content(content, span))),
            Form::Emphasis { content, span } => {
                Some(Node::Emphasis(self.span_content(content, span)))
            }
            Form::Code { text, .. } => Some(Node::Code(text.clone())),
            Form::Call(call) => self.call(call),
            Form::Group { items, .. } => Some(Node::Group(
                items.iter().filter_map(|item| self.inline(item)).collect(),
            )),
            Form::Break { .. } => None,
        }
    }

    fn span_content(&mut self, forms: &[Form], span: &std::ops::Range<usize>) -> Vec<Node> {
        let nodes: Vec<Node> = forms.iter().filter_map(|f| self.inline(f)).collect();
        if nodes.iter().any(Node::is_block) {
            self.error("block content inside an inline span", span.clone());
        }
        nodes
    }

    /// An argument used as inline content (a title or a term).
    fn inline_arg(&mut self, form: &Form) -> Vec<Node> {
        match self.inline(form) {
            Some(Node::Text(text)) if text.is_empty() => Vec::new(),
            Some(node) => vec![node],
            None => Vec::new(),
        }
    }

    fn literal(&mut self, form: &Form, what: &str) -> Option<String> {
        match form.as_literal() {
            Some(value) => Some(value.to_string()),
            None => {
                self.error(format!("{} must be a literal", what), form.span());
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Directive calls
    // -----------------------------------------------------------------------

    fn call(&mut self, call: &Call) -> Option<Node> {
        match call.name.as_str() {
            "h1" => self.heading(call, 1),
            "h2" => self.heading(call, 2),
            "h3" => self.heading(call, 3),
            "h4" => self.heading(call, 4),
            "h5" => self.heading(call, 5),
            "h6" => self.heading(call, 6),
            "steps" => self.steps(call),
            "glossary" | "definition-list" => self.glossary(call),
            "list" => self.list(call, false),
            "ordered-list" => self.list(call, true),
            "code-block" => self.code_block(call),
            "concat" => Some(Node::Concat(self.children(call))),
            "strong" => Some(Node::Strong(self.children(call))),
            "em" => Some(Node::Emphasis(self.children(call))),
            "code" => self.code(call),
            "step" => self.misplaced(call, "steps"),
            "term" => self.misplaced(call, "glossary"),
            "item" => self.misplaced(call, "list"),
            _ => {
                let mut args = Vec::with_capacity(call.args.len());
                let mut arg_spans = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    if let Some(node) = self.inline(arg) {
                        args.push(node);
                        arg_spans.push(SourceSpan::new(self.file_id, arg.span()));
                    }
                }
                let body = self.body(call);
                Some(Node::Directive(DirectiveCall {
                    name: call.name.clone(),
                    args,
                    arg_spans,
                    body,
                    span: self.span(call),
                }))
            }
        }
    }

    /// Arguments followed by the body, as one inline sequence.
    fn children(&mut self, call: &Call) -> Vec<Node> {
        let mut children: Vec<Node> = call.args.iter().filter_map(|a| self.inline(a)).collect();
        children.extend(self.body(call).unwrap_or_default());
        children
    }

    fn misplaced(&mut self, call: &Call, container: &str) -> Option<Node> {
        self.error(
            format!("`{}` is only allowed inside `{}`", call.name, container),
            call.span.clone(),
        );
        None
    }

    fn heading(&mut self, call: &Call, level: u8) -> Option<Node> {
        let body = self.body(call);
        let (id, title) = match (call.args.as_slice(), body) {
            ([title], None) => (HeadingId::Pending, self.inline_arg(title)),
            ([id, title], None) => {
                let id = self.literal(id, "a heading id")?;
                (HeadingId::Explicit(id), self.inline_arg(title))
            }
            ([], Some(title)) => (HeadingId::Pending, title),
            ([id], Some(title)) => {
                let id = self.literal(id, "a heading id")?;
                (HeadingId::Explicit(id), title)
            }
            _ => {
                self.error(
                    format!("`{}` takes (title), (id title) or (id => title)", call.name),
                    call.span.clone(),
                );
                return None;
            }
        };
        if title.iter().any(Node::is_block) {
            self.error("a heading title must be inline content", call.span.clone());
            return None;
        }
        Some(Node::Heading(Heading {
            level,
            id,
            title,
            span: self.span(call),
        }))
    }

    fn steps(&mut self, call: &Call) -> Option<Node> {
        let mut items = Vec::new();
        for form in entries(call) {
            match form {
                Form::Call(step) if step.name == "step" => {
                    let title = match step.args.as_slice() {
                        [title] => self.inline_arg(title),
                        _ => {
                            self.error("`step` takes a title and a `=>` body", step.span.clone());
                            continue;
                        }
                    };
                    let body = self.body(step).unwrap_or_default();
                    items.push(Node::StepItem { title, body });
                }
                other => self.error("`steps` may only contain `step` entries", other.span()),
            }
        }
        Some(Node::Steps(items))
    }

    fn glossary(&mut self, call: &Call) -> Option<Node> {
        let mut entries_out = Vec::new();
        let mut seen = HashSet::new();

        for form in entries(call) {
            let (term, definition) = match form {
                Form::Call(entry) if entry.name == "term" => {
                    match (entry.args.as_slice(), self.body(entry)) {
                        ([term], Some(definition)) => (self.inline_arg(term), definition),
                        ([term, definition], None) => {
                            (self.inline_arg(term), self.inline_arg(definition))
                        }
                        _ => {
                            self.error(
                                "`term` takes a term and a `=>` definition",
                                entry.span.clone(),
                            );
                            continue;
                        }
                    }
                }
                Form::Group { items, .. } if items.len() == 2 => {
                    (self.inline_arg(&items[0]), self.inline_arg(&items[1]))
                }
                other => {
                    self.error(
                        "`glossary` may only contain `term` entries or (term definition) pairs",
                        other.span(),
                    );
                    continue;
                }
            };

            if let [Node::Text(literal)] = term.as_slice() {
                if !seen.insert(literal.clone()) {
                    self.error(format!("duplicate glossary term `{}`", literal), form.span());
                }
            }
            entries_out.push(Node::GlossaryEntry {
                term,
                definition,
                span: SourceSpan::new(self.file_id, form.span()),
            });
        }
        Some(Node::Glossary(entries_out))
    }

    fn list(&mut self, call: &Call, ordered: bool) -> Option<Node> {
        let mut items = Vec::new();
        for arg in call.args.iter().filter(|f| !f.is_blank()) {
            match arg {
                Form::Call(item) if item.name == "item" => items.push(self.item(item)),
                Form::Call(foreign) if matches!(foreign.name.as_str(), "step" | "term") => {
                    self.error(
                        format!("`{}` is not allowed inside `{}`", foreign.name, call.name),
                        foreign.span.clone(),
                    );
                }
                plain => items.extend(self.inline(plain).map(|n| Node::ListItem(vec![n]))),
            }
        }
        if let Some(Body::Markup(forms)) = &call.body {
            for form in forms.iter().filter(|f| !f.is_blank()) {
                match form {
                    Form::Call(item) if item.name == "item" => items.push(self.item(item)),
                    other => self.error(
                        format!("`{}` body may only contain `item` entries", call.name),
                        other.span(),
                    ),
                }
            }
        }
        Some(Node::List { ordered, items })
    }

    fn item(&mut self, call: &Call) -> Node {
        Node::ListItem(self.children(call))
    }

    fn code_block(&mut self, call: &Call) -> Option<Node> {
        let (language, code) = match (call.args.as_slice(), &call.body) {
            ([], Some(Body::Raw(code))) => (None, code.clone()),
            ([language], Some(Body::Raw(code))) => {
                (Some(self.literal(language, "a code block language")?), code.clone())
            }
            ([code], None) => (None, self.literal(code, "code")?),
            ([language, code], None) => (
                Some(self.literal(language, "a code block language")?),
                self.literal(code, "code")?,
            ),
            _ => {
                self.error(
                    "`code-block` takes an optional language and the code",
                    call.span.clone(),
                );
                return None;
            }
        };
        Some(Node::CodeBlock { language, code })
    }

    fn code(&mut self, call: &Call) -> Option<Node> {
        match (call.args.as_slice(), &call.body) {
            ([code], None) => self.literal(code, "code").map(Node::Code),
            ([], Some(_)) => {
                let body = self.body(call).unwrap_or_default();
                Some(Node::Code(text_content(&body)))
            }
            _ => {
                self.error("`code` takes exactly one literal", call.span.clone());
                None
            }
        }
    }
}

/// The non-blank arguments and body forms of a container directive.
fn entries(call: &Call) -> Vec<&Form> {
    let body: &[Form] = match &call.body {
        Some(Body::Markup(forms)) => forms,
        _ => &[],
    };
    call.args
        .iter()
        .chain(body)
        .filter(|form| !form.is_blank())
        .collect()
}

fn flush(paragraph: &mut Vec<Node>, blocks: &mut Vec<Node>) {
    let nodes = trim_inline(std::mem::take(paragraph));
    if !nodes.is_empty() {
        blocks.push(Node::Paragraph(nodes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseErrorKind;
    use crate::parser::reader::read;

    fn build_str(source: &str) -> Result<Vec<Node>, Vec<ParseError>> {
        let (forms, errors) = read(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        build(&forms, 0)
    }

    fn structure_error(source: &str) -> String {
        let errors = build_str(source).unwrap_err();
        assert_eq!(errors[0].kind, ParseErrorKind::Structure);
        errors[0].message.clone()
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let nodes = build_str("first line\nsecond line\n\nthird").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Paragraph(vec![Node::text("first line\nsecond line")]),
                Node::Paragraph(vec![Node::text("third")]),
            ]
        );
    }

    #[test]
    fn block_directives_stand_alone() {
        let nodes = build_str("before (:include \"a.rocket\") after").unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[1], Node::Directive(call) if call.name == "include"));
    }

    #[test]
    fn inline_directives_stay_in_paragraph() {
        let nodes = build_str("see (:link \"x\" => here) now").unwrap();
        let [Node::Paragraph(children)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn steps_with_bodies() {
        let nodes = build_str("(:steps (:step \"One\" => first) (:step \"Two\" => second))").unwrap();
        let [Node::Steps(items)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        assert_eq!(
            items[1],
            Node::StepItem {
                title: vec![Node::text("Two")],
                body: vec![Node::text("second")],
            }
        );
    }

    #[test]
    fn list_from_plain_arguments() {
        let nodes = build_str("(:ordered-list a b)").unwrap();
        assert_eq!(
            nodes,
            vec![Node::List {
                ordered: true,
                items: vec![
                    Node::ListItem(vec![Node::text("a")]),
                    Node::ListItem(vec![Node::text("b")]),
                ],
            }]
        );
    }

    #[test]
    fn code_block_forms() {
        let nodes = build_str("(:code-block rust =>\nlet x = (1);\n)\n\n(:code-block \"plain\")").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::CodeBlock {
                    language: Some("rust".to_string()),
                    code: "let x = (1);".to_string(),
                },
                Node::CodeBlock {
                    language: None,
                    code: "plain".to_string(),
                },
            ]
        );
    }

    #[test]
    fn step_outside_steps() {
        assert!(structure_error("(:step \"x\" => y)").contains("only allowed inside `steps`"));
    }

    #[test]
    fn item_outside_list() {
        assert!(structure_error("text (:item => y)").contains("only allowed inside `list`"));
    }

    #[test]
    fn foreign_child_in_steps() {
        assert!(structure_error("(:steps (:item => x))").contains("only contain `step`"));
    }

    #[test]
    fn duplicate_glossary_terms() {
        let message = structure_error("(:glossary (a \"first\") (:term a => second))");
        assert!(message.contains("duplicate glossary term `a`"));
    }

    #[test]
    fn definition_list_is_a_glossary() {
        let nodes = build_str("(:definition-list (crate \"a compilation unit\"))").unwrap();
        let [Node::Glossary(entries)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        assert!(matches!(&entries[0], Node::GlossaryEntry { term, .. } if term == &vec![Node::text("crate")]));
    }

    #[test]
    fn directive_arguments_keep_their_spans() {
        let nodes = build_str("(:link \"https://a\" b)").unwrap();
        let [Node::Paragraph(children)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        let Node::Directive(call) = &children[0] else {
            panic!("{:?}", children);
        };
        let ranges: Vec<_> = call.arg_spans.iter().map(|s| s.range.clone()).collect();
        assert_eq!(ranges, vec![7..18, 19..20]);
    }

    #[test]
    fn heading_id_must_be_literal() {
        assert!(structure_error("(:h2 (:concat a b) \"Title\")").contains("must be a literal"));
    }

    #[test]
    fn heading_with_too_many_arguments() {
        assert!(structure_error("(:h2 a b c)").contains("takes (title)"));
    }
}
