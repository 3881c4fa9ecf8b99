//! HTML serialization of resolved documents.

use rocket::document::{AdmonitionKind, HeadingId, Node, TocItem};

use crate::error::{CompileError, DiagnosticError};

/// Syntax highlighting for code blocks.
pub trait Highlighter: Send + Sync {
    /// Highlighted, already escaped HTML for `code`, or `None` to emit the
    /// code as escaped plain text.
    fn highlight(&self, code: &str, language: Option<&str>) -> Option<String>;
}

/// Leaves code blocks as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHighlight;

impl Highlighter for NoHighlight {
    fn highlight(&self, _code: &str, _language: Option<&str>) -> Option<String> {
        None
    }
}

/// Escape HTML special characters.
pub fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

pub struct HtmlRenderer<'a> {
    highlighter: &'a dyn Highlighter,
    source_id: usize,
}

impl<'a> HtmlRenderer<'a> {
    pub fn new(highlighter: &'a dyn Highlighter, source_id: usize) -> Self {
        HtmlRenderer {
            highlighter,
            source_id,
        }
    }

    /// Render a document's top-level nodes.
    pub fn render(&self, nodes: &[Node]) -> Result<String, DiagnosticError> {
        let mut out = String::new();
        self.blocks(nodes, &mut out)?;
        Ok(out)
    }

    fn unresolved(&self, what: &str) -> DiagnosticError {
        DiagnosticError::in_file(
            CompileError::UnresolvedDirective(what.to_string()),
            self.source_id,
        )
    }

    fn blocks(&self, nodes: &[Node], out: &mut String) -> Result<(), DiagnosticError> {
        for node in nodes {
            self.node(node, out)?;
        }
        Ok(())
    }

    /// Content that may be inline or blocks; inline content is wrapped in a
    /// paragraph.
    fn flow(&self, nodes: &[Node], out: &mut String) -> Result<(), DiagnosticError> {
        if nodes.is_empty() {
            return Ok(());
        }
        if nodes.iter().any(Node::is_block) {
            self.blocks(nodes, out)
        } else {
            out.push_str("<p>");
            self.blocks(nodes, out)?;
            out.push_str("</p>");
            Ok(())
        }
    }

    fn node(&self, node: &Node, out: &mut String) -> Result<(), DiagnosticError> {
        match node {
            Node::Text(text) => out.push_str(&escape_html(text)),
            Node::Strong(children) => {
                out.push_str("<strong>");
                self.blocks(children, out)?;
                out.push_str("</strong>");
            }
            Node::Emphasis(children) => {
                out.push_str("<em>");
                self.blocks(children, out)?;
                out.push_str("</em>");
            }
            Node::Code(code) => {
                out.push_str("<code>");
                out.push_str(&escape_html(code));
                out.push_str("</code>");
            }
            Node::Link { href, content } => {
                out.push_str(&format!("<a href=\"{}\">", escape_html(href)));
                self.blocks(content, out)?;
                out.push_str("</a>");
            }
            Node::Figure { src, alt, width } => {
                out.push_str(&format!(
                    "<figure><img src=\"{}\" alt=\"{}\"",
                    escape_html(src),
                    escape_html(alt)
                ));
                if let Some(width) = width {
                    out.push_str(&format!(" style=\"width: {}\"", escape_html(width)));
                }
                out.push_str("></figure>\n");
            }
            Node::Raw(html) => out.push_str(html),
            Node::Heading(heading) => {
                out.push_str(&format!("<h{}", heading.level));
                if let Some(anchor) = heading.id.anchor() {
                    out.push_str(&format!(" id=\"{}\"", escape_html(anchor)));
                }
                out.push('>');
                self.blocks(&heading.title, out)?;
                out.push_str(&format!("</h{}>\n", heading.level));
                if heading.id == HeadingId::Pending {
                    return Err(self.unresolved("heading id"));
                }
            }
            Node::Paragraph(children) => {
                out.push_str("<p>");
                self.blocks(children, out)?;
                out.push_str("</p>\n");
            }
            Node::List { ordered, items } => {
                let tag = if *ordered { "ol" } else { "ul" };
                out.push_str(&format!("<{}>\n", tag));
                self.blocks(items, out)?;
                out.push_str(&format!("</{}>\n", tag));
            }
            Node::ListItem(children) => {
                out.push_str("<li>");
                self.blocks(children, out)?;
                out.push_str("</li>\n");
            }
            Node::CodeBlock { language, code } => {
                match language {
                    Some(language) => out.push_str(&format!(
                        "<pre><code class=\"language-{}\">",
                        escape_html(language)
                    )),
                    None => out.push_str("<pre><code>"),
                }
                match self.highlighter.highlight(code, language.as_deref()) {
                    Some(highlighted) => out.push_str(&highlighted),
                    None => out.push_str(&escape_html(code)),
                }
                out.push_str("</code></pre>\n");
            }
            Node::Steps(items) => {
                out.push_str("<div class=\"steps\">");
                let mut number = 0;
                for item in items {
                    let Node::StepItem { title, body } = item else {
                        return Err(self.unresolved("step outside steps"));
                    };
                    number += 1;
                    out.push_str(&format!(
                        "<div class=\"steps__step\"><div class=\"steps__bullet\"><div class=\"steps__stepnumber\">{}</div></div><h4>",
                        number
                    ));
                    self.blocks(title, out)?;
                    out.push_str("</h4><div>");
                    self.flow(body, out)?;
                    out.push_str("</div></div>");
                }
                out.push_str("</div>\n");
            }
            Node::StepItem { .. } => return Err(self.unresolved("step outside steps")),
            Node::Glossary(entries) => {
                out.push_str("<dl class=\"glossary\">\n");
                self.blocks(entries, out)?;
                out.push_str("</dl>\n");
            }
            Node::GlossaryEntry {
                term, definition, ..
            } => {
                out.push_str("<dt>");
                self.blocks(term, out)?;
                out.push_str("</dt><dd>");
                self.flow(definition, out)?;
                out.push_str("</dd>\n");
            }
            Node::Admonition { kind, title, body } => {
                let class = match kind {
                    AdmonitionKind::Note => "note",
                    AdmonitionKind::Warning => "warning",
                };
                out.push_str(&format!(
                    "<div class=\"admonition admonition-{0}\"><span class=\"admonition-title admonition-title-{0}\">",
                    class
                ));
                self.blocks(title, out)?;
                out.push_str("</span>");
                self.flow(body, out)?;
                out.push_str("</div>\n");
            }
            Node::Anchor { id, .. } => {
                out.push_str(&format!("<span id=\"{}\"></span>", escape_html(id)));
            }
            Node::Toc(items) => {
                out.push_str("<nav class=\"toctree\">");
                toc_list(items, out);
                out.push_str("</nav>\n");
            }
            Node::Ref { id, .. } => return Err(self.unresolved(&format!("ref {}", id))),
            Node::TocTree { .. } => return Err(self.unresolved("toctree")),
            Node::Group(_) => return Err(self.unresolved("argument group")),
            Node::Concat(_) => return Err(self.unresolved("concat")),
            Node::Directive(call) => return Err(self.unresolved(&call.name)),
        }
        Ok(())
    }
}

fn toc_list(items: &[TocItem], out: &mut String) {
    out.push_str("<ul>\n");
    for item in items {
        out.push_str(&format!(
            "<li><a href=\"{}\">{}</a>",
            escape_html(&item.href),
            escape_html(&item.title)
        ));
        if !item.children.is_empty() {
            toc_list(&item.children, out);
        }
        out.push_str("</li>\n");
    }
    out.push_str("</ul>\n");
}
