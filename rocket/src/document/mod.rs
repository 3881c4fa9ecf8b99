mod display;

use std::ops::Range;

pub use display::Markup;

/// Where a node came from, for diagnostics.
///
/// Spans are metadata: two spans always compare equal, so trees read from
/// different places (or re-read after serialization) compare structurally.
#[derive(Debug, Clone, Default)]
pub struct SourceSpan {
    pub file_id: usize,
    pub range: Range<usize>,
}

impl SourceSpan {
    pub fn new(file_id: usize, range: Range<usize>) -> Self {
        SourceSpan { file_id, range }
    }
}

impl PartialEq for SourceSpan {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// A single node of a document tree.
///
/// The builder produces the structural variants plus `Directive` and
/// `Concat` placeholders; evaluation replaces placeholders with content, and
/// reference resolution replaces `Ref` and `TocTree` with `Link` and `Toc`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // Inline
    Text(String),
    Strong(Vec<Node>),
    Emphasis(Vec<Node>),
    Code(String),
    Link {
        href: String,
        content: Vec<Node>,
    },
    Figure {
        src: String,
        alt: String,
        width: Option<String>,
    },
    /// Pre-rendered markup, emitted verbatim.
    Raw(String),

    // Block-level
    Heading(Heading),
    Paragraph(Vec<Node>),
    List {
        ordered: bool,
        items: Vec<Node>,
    },
    ListItem(Vec<Node>),
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    Steps(Vec<Node>),
    StepItem {
        title: Vec<Node>,
        body: Vec<Node>,
    },
    Glossary(Vec<Node>),
    GlossaryEntry {
        term: Vec<Node>,
        definition: Vec<Node>,
        span: SourceSpan,
    },
    Admonition {
        kind: AdmonitionKind,
        title: Vec<Node>,
        body: Vec<Node>,
    },

    // Cross references
    Anchor {
        id: String,
        title: String,
        span: SourceSpan,
    },
    Ref {
        id: String,
        title: Option<Vec<Node>>,
        span: SourceSpan,
    },
    TocTree {
        entries: Vec<TocEntry>,
        span: SourceSpan,
    },
    Toc(Vec<TocItem>),

    // Unevaluated
    /// A parenthesised argument list without a directive name.
    Group(Vec<Node>),
    Directive(DirectiveCall),
    Concat(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    /// 1 through 6.
    pub level: u8,
    pub id: HeadingId,
    pub title: Vec<Node>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadingId {
    /// Given in the source; registered as a global reference id.
    Explicit(String),
    /// Slug of the evaluated title, unique within its document.
    Derived(String),
    /// Not derived yet (before evaluation).
    Pending,
}

impl HeadingId {
    pub fn anchor(&self) -> Option<&str> {
        match self {
            HeadingId::Explicit(id) | HeadingId::Derived(id) => Some(id),
            HeadingId::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmonitionKind {
    Note,
    Warning,
}

impl AdmonitionKind {
    pub fn directive_name(self) -> &'static str {
        match self {
            AdmonitionKind::Note => "note",
            AdmonitionKind::Warning => "warning",
        }
    }

    pub fn default_title(self) -> &'static str {
        match self {
            AdmonitionKind::Note => "Note",
            AdmonitionKind::Warning => "Warning",
        }
    }
}

/// An unevaluated `toctree` entry: a document slug or reference id, with
/// an optional title overriding the target's own.
#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub target: String,
    pub title: Option<Vec<Node>>,
}

/// A resolved navigation entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TocItem {
    pub title: String,
    pub href: String,
    pub children: Vec<TocItem>,
}

/// A directive invocation awaiting evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveCall {
    pub name: String,
    /// Unevaluated positional arguments, in source order.
    pub args: Vec<Node>,
    /// Location of each argument; parallel to `args` when read from source.
    pub arg_spans: Vec<SourceSpan>,
    /// Content following `=>`, grouped into blocks.
    pub body: Option<Vec<Node>>,
    pub span: SourceSpan,
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    /// Whether the node must stand on its own rather than inside a paragraph.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Node::Heading(_)
                | Node::Paragraph(_)
                | Node::List { .. }
                | Node::CodeBlock { .. }
                | Node::Steps(_)
                | Node::Glossary(_)
                | Node::Admonition { .. }
                | Node::TocTree { .. }
                | Node::Toc(_)
                | Node::Raw(_)
                | Node::Figure { .. }
        )
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(s) if s.trim().is_empty())
    }

    /// Apply `f` to every literal string in this subtree, including the
    /// strings inside unevaluated directive arguments.
    pub fn for_each_text_mut(&mut self, f: &mut dyn FnMut(&mut String)) {
        match self {
            Node::Text(s) | Node::Code(s) | Node::Raw(s) => f(s),
            Node::CodeBlock { code, .. } => f(code),
            Node::Link { href, content } => {
                f(href);
                for_each_text_mut(content, f);
            }
            Node::Figure { src, alt, width } => {
                f(src);
                f(alt);
                if let Some(width) = width {
                    f(width);
                }
            }
            Node::Heading(heading) => {
                if let HeadingId::Explicit(id) = &mut heading.id {
                    f(id);
                }
                for_each_text_mut(&mut heading.title, f);
            }
            Node::Strong(children)
            | Node::Emphasis(children)
            | Node::Paragraph(children)
            | Node::ListItem(children)
            | Node::Steps(children)
            | Node::Glossary(children)
            | Node::Group(children)
            | Node::Concat(children) => for_each_text_mut(children, f),
            Node::List { items, .. } => for_each_text_mut(items, f),
            Node::StepItem { title, body } => {
                for_each_text_mut(title, f);
                for_each_text_mut(body, f);
            }
            Node::GlossaryEntry {
                term, definition, ..
            } => {
                for_each_text_mut(term, f);
                for_each_text_mut(definition, f);
            }
            Node::Admonition { title, body, .. } => {
                for_each_text_mut(title, f);
                for_each_text_mut(body, f);
            }
            Node::Anchor { id, title, .. } => {
                f(id);
                f(title);
            }
            Node::Ref { id, title, .. } => {
                f(id);
                if let Some(title) = title {
                    for_each_text_mut(title, f);
                }
            }
            Node::TocTree { entries, .. } => {
                for entry in entries {
                    f(&mut entry.target);
                    if let Some(title) = &mut entry.title {
                        for_each_text_mut(title, f);
                    }
                }
            }
            Node::Toc(_) => {}
            Node::Directive(call) => {
                for_each_text_mut(&mut call.args, f);
                if let Some(body) = &mut call.body {
                    for_each_text_mut(body, f);
                }
            }
        }
    }

    /// Apply `f` to this node and every descendant, parents first.
    pub fn walk(&self, f: &mut dyn FnMut(&Node)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Child nodes in document order. Directive arguments are not children.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Strong(c)
            | Node::Emphasis(c)
            | Node::Paragraph(c)
            | Node::ListItem(c)
            | Node::Steps(c)
            | Node::Glossary(c)
            | Node::Group(c)
            | Node::Concat(c) => c.iter().collect(),
            Node::Link { content, .. } => content.iter().collect(),
            Node::Heading(heading) => heading.title.iter().collect(),
            Node::List { items, .. } => items.iter().collect(),
            Node::StepItem { title, body } => title.iter().chain(body).collect(),
            Node::GlossaryEntry {
                term, definition, ..
            } => term.iter().chain(definition).collect(),
            Node::Admonition { title, body, .. } => title.iter().chain(body).collect(),
            Node::Ref { title, .. } => title.iter().flatten().collect(),
            _ => Vec::new(),
        }
    }

    /// Mutable access to every child list, in document order.
    pub fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        match self {
            Node::Strong(c)
            | Node::Emphasis(c)
            | Node::Paragraph(c)
            | Node::ListItem(c)
            | Node::Steps(c)
            | Node::Glossary(c)
            | Node::Group(c)
            | Node::Concat(c) => vec![c],
            Node::Link { content, .. } => vec![content],
            Node::Heading(heading) => vec![&mut heading.title],
            Node::List { items, .. } => vec![items],
            Node::StepItem { title, body } => vec![title, body],
            Node::GlossaryEntry {
                term, definition, ..
            } => vec![term, definition],
            Node::Admonition { title, body, .. } => vec![title, body],
            Node::Ref {
                title: Some(title), ..
            } => vec![title],
            _ => Vec::new(),
        }
    }
}

impl Node {
    /// Apply `f` to every source span in this subtree, including spans of
    /// unevaluated directive calls and their arguments.
    pub fn for_each_span_mut(&mut self, f: &mut dyn FnMut(&mut SourceSpan)) {
        match self {
            Node::Heading(heading) => f(&mut heading.span),
            Node::GlossaryEntry { span, .. }
            | Node::Anchor { span, .. }
            | Node::Ref { span, .. }
            | Node::TocTree { span, .. } => f(span),
            Node::Directive(call) => {
                f(&mut call.span);
                call.arg_spans.iter_mut().for_each(|span| f(span));
                for arg in &mut call.args {
                    arg.for_each_span_mut(f);
                }
                for node in call.body.iter_mut().flatten() {
                    node.for_each_span_mut(f);
                }
            }
            _ => {}
        }
        for children in self.child_lists_mut() {
            for child in children {
                child.for_each_span_mut(f);
            }
        }
    }
}

pub fn for_each_text_mut(nodes: &mut [Node], f: &mut dyn FnMut(&mut String)) {
    for node in nodes {
        node.for_each_text_mut(f);
    }
}

/// The plain text of a node sequence, with all markup dropped.
pub fn text_content(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        push_text(node, &mut out);
    }
    out
}

fn push_text(node: &Node, out: &mut String) {
    match node {
        Node::Text(s) | Node::Code(s) => out.push_str(s),
        Node::CodeBlock { code, .. } => out.push_str(code),
        Node::Figure { alt, .. } => out.push_str(alt),
        Node::Anchor { .. } | Node::Raw(_) | Node::Directive(_) => {}
        Node::Group(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                push_text(item, out);
            }
        }
        Node::Toc(items) => {
            for item in items {
                out.push_str(&item.title);
            }
        }
        other => {
            for child in other.children() {
                push_text(child, out);
            }
        }
    }
}

/// A body consisting of a single paragraph used in inline position is the
/// paragraph's content.
pub fn unwrap_paragraph(mut nodes: Vec<Node>) -> Vec<Node> {
    if let [Node::Paragraph(_)] = nodes.as_slice() {
        if let Some(Node::Paragraph(children)) = nodes.pop() {
            return children;
        }
    }
    nodes
}

/// Trim leading whitespace of the first text node and trailing whitespace of
/// the last, dropping text nodes left empty.
pub fn trim_inline(mut nodes: Vec<Node>) -> Vec<Node> {
    if let Some(Node::Text(first)) = nodes.first_mut() {
        *first = first.trim_start().to_string();
    }
    if let Some(Node::Text(last)) = nodes.last_mut() {
        *last = last.trim_end().to_string();
    }
    nodes.retain(|n| !matches!(n, Node::Text(s) if s.is_empty()));
    nodes
}
