//! Serialization of node trees back to directive markup.
//!
//! Reading the output of an unevaluated tree yields an equal tree.

use std::fmt;

use super::{HeadingId, Node, TocEntry, TocItem};
use crate::parser::reader::RAW_BODY_DIRECTIVES;

/// A node sequence displayed as markup: blocks separated by blank lines,
/// inline content written as a single run.
pub struct Markup<'a>(pub &'a [Node]);

impl fmt::Display for Markup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flow(f, self.0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(s) => write_markup_text(f, s),
            Node::Strong(children) => {
                write!(f, "**")?;
                write_inline(f, children)?;
                write!(f, "**")
            }
            Node::Emphasis(children) => {
                write!(f, "__")?;
                write_inline(f, children)?;
                write!(f, "__")
            }
            Node::Code(code) if code.contains('`') || code.contains('\n') => {
                write!(f, "(:code ")?;
                write_string(f, code)?;
                write!(f, ")")
            }
            Node::Code(code) => write!(f, "`{}`", code),
            Node::Link { href, content } => {
                write!(f, "(:link ")?;
                write_string(f, href)?;
                write!(f, " => ")?;
                write_inline(f, content)?;
                write!(f, ")")
            }
            Node::Figure { src, alt, width } => {
                write!(f, "(:figure ")?;
                write_string(f, src)?;
                write!(f, " ")?;
                write_string(f, alt)?;
                if let Some(width) = width {
                    write!(f, " ")?;
                    write_string(f, width)?;
                }
                write!(f, ")")
            }
            Node::Raw(raw) => {
                write!(f, "(:md =>\n")?;
                write_raw(f, raw)?;
                write!(f, "\n)")
            }
            Node::Heading(heading) => {
                write!(f, "(:h{}", heading.level)?;
                if let HeadingId::Explicit(id) = &heading.id {
                    write!(f, " ")?;
                    write_string(f, id)?;
                }
                match heading.title.as_slice() {
                    [Node::Text(title)] => {
                        write!(f, " ")?;
                        write_string(f, title)?;
                    }
                    title => {
                        write!(f, " => ")?;
                        write_inline(f, title)?;
                    }
                }
                write!(f, ")")
            }
            Node::Paragraph(children) => write_inline(f, children),
            Node::List { ordered, items } => {
                write!(f, "(:{}", if *ordered { "ordered-list" } else { "list" })?;
                for item in items {
                    write!(f, "\n")?;
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Node::ListItem(children) => {
                write!(f, "(:item =>")?;
                write_body(f, children)?;
                write!(f, ")")
            }
            Node::CodeBlock { language, code } => {
                write!(f, "(:code-block")?;
                if let Some(language) = language {
                    write!(f, " ")?;
                    write_string(f, language)?;
                }
                write!(f, " =>\n")?;
                write_raw(f, code)?;
                write!(f, "\n)")
            }
            Node::Steps(items) => {
                write!(f, "(:steps")?;
                for item in items {
                    write!(f, "\n{}", item)?;
                }
                write!(f, ")")
            }
            Node::StepItem { title, body } => {
                write!(f, "(:step ")?;
                write_inline_arg(f, title)?;
                write!(f, " =>")?;
                write_body(f, body)?;
                write!(f, ")")
            }
            Node::Glossary(entries) => {
                write!(f, "(:glossary")?;
                for entry in entries {
                    write!(f, "\n{}", entry)?;
                }
                write!(f, ")")
            }
            Node::GlossaryEntry {
                term, definition, ..
            } => {
                write!(f, "(:term ")?;
                write_inline_arg(f, term)?;
                write!(f, " =>")?;
                write_body(f, definition)?;
                write!(f, ")")
            }
            Node::Admonition { kind, title, body } => {
                write!(f, "(:{} ", kind.directive_name())?;
                write_inline_arg(f, title)?;
                write!(f, " =>")?;
                write_body(f, body)?;
                write!(f, ")")
            }
            Node::Anchor { id, title, .. } => {
                write!(f, "(:define-ref ")?;
                write_string(f, id)?;
                write!(f, " ")?;
                write_string(f, title)?;
                write!(f, ")")
            }
            Node::Ref { id, title, .. } => {
                write!(f, "(:ref ")?;
                write_string(f, id)?;
                if let Some(title) = title {
                    write!(f, " => ")?;
                    write_inline(f, title)?;
                }
                write!(f, ")")
            }
            Node::TocTree { entries, .. } => {
                write!(f, "(:toctree")?;
                for entry in entries {
                    write!(f, " ")?;
                    write_toc_entry(f, entry)?;
                }
                write!(f, ")")
            }
            Node::Toc(items) => write_toc(f, items),
            Node::Group(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write_arg(f, item)?;
                }
                write!(f, ")")
            }
            Node::Directive(call) => {
                write!(f, "(:{}", call.name)?;
                for arg in &call.args {
                    write!(f, " ")?;
                    write_arg(f, arg)?;
                }
                match &call.body {
                    Some(body) if RAW_BODY_DIRECTIVES.contains(&call.name.as_str()) => {
                        write!(f, " =>\n")?;
                        write_raw(f, &super::text_content(body))?;
                        write!(f, "\n")?;
                    }
                    Some(body) => {
                        write!(f, " =>")?;
                        write_body(f, body)?;
                    }
                    None => {}
                }
                write!(f, ")")
            }
            Node::Concat(args) => {
                write!(f, "(:concat")?;
                for arg in args {
                    write!(f, " ")?;
                    write_arg(f, arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn all_inline(nodes: &[Node]) -> bool {
    nodes.iter().all(|n| !n.is_block())
}

/// Inline content as one run, block content separated by blank lines.
fn write_flow(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    if all_inline(nodes) {
        return write_inline(f, nodes);
    }
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, "\n\n")?;
        }
        write!(f, "{}", node)?;
    }
    Ok(())
}

fn write_body(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    if nodes.is_empty() {
        return Ok(());
    }
    if all_inline(nodes) {
        write!(f, " ")?;
    } else {
        write!(f, "\n")?;
    }
    write_flow(f, nodes)
}

fn write_inline(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for node in nodes {
        write!(f, "{}", node)?;
    }
    Ok(())
}

/// Write a node in argument position.
fn write_arg(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
    match node {
        Node::Text(s) => write_string(f, s),
        Node::Strong(children) => write_marker_call(f, "strong", children),
        Node::Emphasis(children) => write_marker_call(f, "em", children),
        Node::Code(code) => {
            write!(f, "(:code ")?;
            write_string(f, code)?;
            write!(f, ")")
        }
        Node::Paragraph(children) => write_inline_arg(f, children),
        other => write!(f, "{}", other),
    }
}

fn write_marker_call(f: &mut fmt::Formatter<'_>, name: &str, children: &[Node]) -> fmt::Result {
    write!(f, "(:{}", name)?;
    for child in children {
        write!(f, " ")?;
        write_arg(f, child)?;
    }
    write!(f, ")")
}

/// Write an inline sequence as a single argument.
fn write_inline_arg(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    match nodes {
        [] => write!(f, "\"\""),
        [single] => write_arg(f, single),
        many => {
            write!(f, "(:concat")?;
            for node in many {
                write!(f, " ")?;
                write_arg(f, node)?;
            }
            write!(f, ")")
        }
    }
}

fn write_toc_entry(f: &mut fmt::Formatter<'_>, entry: &TocEntry) -> fmt::Result {
    match &entry.title {
        Some(title) => {
            write!(f, "(")?;
            write_inline_arg(f, title)?;
            write!(f, " ")?;
            write_string(f, &entry.target)?;
            write!(f, ")")
        }
        None => write_string(f, &entry.target),
    }
}

fn write_toc(f: &mut fmt::Formatter<'_>, items: &[TocItem]) -> fmt::Result {
    write!(f, "(:list")?;
    for item in items {
        write!(f, "\n(:item => (:link ")?;
        write_string(f, &item.href)?;
        write!(f, " ")?;
        write_string(f, &item.title)?;
        write!(f, ")")?;
        if !item.children.is_empty() {
            write!(f, " ")?;
            write_toc(f, &item.children)?;
        }
        write!(f, ")")?;
    }
    write!(f, ")")
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

fn write_markup_text(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        if matches!(c, '\\' | '(' | ')' | '*' | '_' | '`') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

fn write_raw(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        if matches!(c, '\\' | '(' | ')') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}
