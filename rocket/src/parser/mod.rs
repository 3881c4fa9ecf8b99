mod builder;
pub mod error;
pub mod reader;

pub use error::{ParseError, ParseErrorKind};

use std::ops::Range;

use crate::SourceFile;
use crate::document::Node;

/// Directive names the tree builder turns into dedicated nodes. Everything
/// else becomes a `Directive` placeholder for the evaluator.
pub const STRUCTURAL_DIRECTIVES: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "steps",
    "step",
    "glossary",
    "definition-list",
    "term",
    "list",
    "ordered-list",
    "item",
    "code-block",
    "concat",
    "strong",
    "em",
    "code",
];

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the whole source into a document tree.
    ///
    /// Syntax errors from every malformed block are returned together; the
    /// tree is only built when reading succeeded.
    pub fn parse(&self) -> Result<SourceFile, Vec<ParseError>> {
        let nodes = parse_fragment(&self.source, self.file_id)?;
        Ok(SourceFile {
            nodes,
            source_id: self.file_id,
        })
    }
}

/// Parse a piece of markup (a file, or a template given as a string) into
/// block-level nodes.
pub fn parse_fragment(source: &str, file_id: usize) -> Result<Vec<Node>, Vec<ParseError>> {
    let (forms, errors) = reader::read(source, file_id);
    if !errors.is_empty() {
        return Err(errors);
    }
    builder::build(&forms, file_id)
}

/// Parse a fragment that was taken from inside another file, such as the
/// value of a string literal. `locate` maps a byte offset in `source` to
/// the corresponding offset in the enclosing file, and every span in the
/// result (or in the errors) is translated through it.
pub fn parse_fragment_at(
    source: &str,
    file_id: usize,
    locate: &dyn Fn(usize) -> usize,
) -> Result<Vec<Node>, Vec<ParseError>> {
    let translate = |range: &Range<usize>| locate(range.start)..locate(range.end);
    match parse_fragment(source, file_id) {
        Ok(mut nodes) => {
            for node in &mut nodes {
                node.for_each_span_mut(&mut |span| span.range = translate(&span.range));
            }
            Ok(nodes)
        }
        Err(mut errors) => {
            for error in &mut errors {
                error.span = translate(&error.span);
            }
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{HeadingId, Markup, Node};
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<Node> {
        match parse_fragment(source, 0) {
            Ok(nodes) => nodes,
            Err(errors) => panic!("parse failed: {:?}", errors),
        }
    }

    fn round_trip(source: &str) {
        let first = parse(source);
        let printed = Markup(&first).to_string();
        let second = parse(&printed);
        assert_eq!(first, second, "re-parsed tree differs; printed:\n{}", printed);
        assert_eq!(printed, Markup(&second).to_string());
    }

    #[test]
    fn parse_returns_source_id() {
        let file = Parser::new("hello".to_string(), 7).parse().unwrap();
        assert_eq!(file.source_id, 7);
        assert_eq!(file.nodes, vec![Node::Paragraph(vec![Node::text("hello")])]);
    }

    #[test]
    fn syntax_errors_from_all_blocks() {
        let errors = parse_fragment("(:bad! a)\n\nfine\n\n\"(:h1 \"x)", 0).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ParseErrorKind::Syntax));
    }

    #[test]
    fn fragment_spans_are_translated() {
        let errors = parse_fragment_at("ok (:bad! x)", 3, &|offset| offset + 100).unwrap_err();
        assert_eq!(errors[0].span.start, 103);
        assert_eq!(errors[0].file_id, 3);

        let nodes = parse_fragment_at("(:h2 \"T\")", 0, &|offset| offset + 10).unwrap();
        let [Node::Heading(heading)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        assert_eq!(heading.span.range, 10..19);
    }

    #[test]
    fn heading_forms() {
        let nodes = parse("(:h1 \"Intro\")\n\n(:h2 setup \"Setup\")\n\n(:h3 => The **end**)");
        let [Node::Heading(a), Node::Heading(b), Node::Heading(c)] = nodes.as_slice() else {
            panic!("expected three headings, got {:?}", nodes);
        };
        assert_eq!(a.id, HeadingId::Pending);
        assert_eq!(b.id, HeadingId::Explicit("setup".to_string()));
        assert_eq!(b.level, 2);
        assert_eq!(c.title.len(), 2);
    }

    #[test]
    fn round_trip_mixed_document() {
        round_trip(
            "(:h1 intro \"Getting started\")\n\n\
             Some **bold** and __emphasised__ text with `code` (and parens).\n\n\
             (:steps\n(:step \"Install\" => Run the installer.)\n(:step \"Run\" =>\n(:code-block sh =>\nrocket build\n)))\n\n\
             (:glossary (\"crate\" \"a compilation unit\") (:term \"trait\" => shared behaviour))\n\n\
             (:note \"Heads up\" => Read (:ref setup) first.)\n\n\
             (:define-template greet \"[a-z]+\" => Hello ${0}!)\n\n\
             (:list one two (:item => three))",
        );
    }

    #[test]
    fn round_trip_escapes_and_raw() {
        round_trip("Literal \\(:h1\\) and \\*\\* stars\n\n(:md =>\n# Title\n\nwith (parens) and \\\\ slash\n)");
    }
}
