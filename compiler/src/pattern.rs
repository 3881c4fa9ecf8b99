//! Template placeholders and argument patterns.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rocket::document::{HeadingId, Node, for_each_text_mut, text_content};

use crate::error::CompileError;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\d+)\}").unwrap());

/// Compile an argument pattern. A pattern accepts an argument when it
/// matches anywhere in the argument's text; write `^...$` to require a
/// whole match.
pub fn compile_pattern(pattern: &str) -> Result<Regex, CompileError> {
    Regex::new(pattern).map_err(|e| CompileError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Number of arguments a template skeleton consumes: one past the highest
/// `${n}` placeholder, or zero when it has none.
pub fn placeholder_count(skeleton: &[Node]) -> usize {
    let mut count = 0;
    let mut scratch = skeleton.to_vec();
    for_each_text_mut(&mut scratch, &mut |text| {
        for caps in PLACEHOLDER.captures_iter(text) {
            if let Ok(index) = caps[1].parse::<usize>() {
                count = count.max(index + 1);
            }
        }
    });
    count
}

/// Replace every `${n}` in the skeleton with the n-th evaluated argument.
///
/// In content position the argument's nodes are spliced in, so links,
/// references and anchors survive substitution. Inside attributes (ids,
/// hrefs, code) only the argument's text is used.
pub fn substitute(skeleton: &mut Vec<Node>, args: &[Vec<Node>]) {
    substitute_seq(skeleton, args);
}

fn substitute_seq(nodes: &mut Vec<Node>, args: &[Vec<Node>]) {
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in std::mem::take(nodes) {
        if let Node::Text(text) = &node {
            for piece in splice(text, args) {
                push_merged(&mut out, piece);
            }
            continue;
        }
        substitute_in(&mut node, args);
        out.push(node);
    }
    *nodes = out;
}

/// Directive arguments keep their count: an argument that expands to
/// several nodes becomes a `concat` of them.
fn substitute_args(nodes: &mut [Node], args: &[Vec<Node>]) {
    for node in nodes {
        match node {
            Node::Text(text) => {
                let mut pieces = Vec::new();
                for piece in splice(text, args) {
                    push_merged(&mut pieces, piece);
                }
                *node = match <[Node; 1]>::try_from(pieces) {
                    Ok([single]) => single,
                    Err(pieces) if pieces.is_empty() => Node::text(""),
                    Err(pieces) => Node::Concat(pieces),
                };
            }
            other => substitute_in(other, args),
        }
    }
}

fn substitute_in(node: &mut Node, args: &[Vec<Node>]) {
    match node {
        Node::Text(_) => {}
        Node::Code(text) | Node::Raw(text) => replace_text(text, args),
        Node::CodeBlock { code, .. } => replace_text(code, args),
        Node::Link { href, content } => {
            replace_text(href, args);
            substitute_seq(content, args);
        }
        Node::Figure { src, alt, width } => {
            replace_text(src, args);
            replace_text(alt, args);
            if let Some(width) = width {
                replace_text(width, args);
            }
        }
        Node::Heading(heading) => {
            if let HeadingId::Explicit(id) = &mut heading.id {
                replace_text(id, args);
            }
            substitute_seq(&mut heading.title, args);
        }
        Node::Anchor { id, title, .. } => {
            replace_text(id, args);
            replace_text(title, args);
        }
        Node::Ref { id, title, .. } => {
            replace_text(id, args);
            if let Some(title) = title {
                substitute_seq(title, args);
            }
        }
        Node::TocTree { entries, .. } => {
            for entry in entries {
                replace_text(&mut entry.target, args);
                if let Some(title) = &mut entry.title {
                    substitute_seq(title, args);
                }
            }
        }
        Node::Group(items) => substitute_args(items, args),
        Node::Directive(call) => {
            substitute_args(&mut call.args, args);
            if let Some(body) = &mut call.body {
                substitute_seq(body, args);
            }
        }
        _ => {
            for children in node.child_lists_mut() {
                substitute_seq(children, args);
            }
        }
    }
}

/// Split a text around its placeholders, putting the arguments' nodes in
/// their place. Unknown placeholders are kept literally.
fn splice(text: &str, args: &[Vec<Node>]) -> Vec<Node> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(arg) = caps[1].parse::<usize>().ok().and_then(|i| args.get(i)) else {
            continue;
        };
        if whole.start() > last {
            out.push(Node::text(&text[last..whole.start()]));
        }
        out.extend(arg.iter().cloned());
        last = whole.end();
    }
    if last < text.len() {
        out.push(Node::text(&text[last..]));
    }
    out
}

fn push_merged(out: &mut Vec<Node>, node: Node) {
    if let (Some(Node::Text(prev)), Node::Text(next)) = (out.last_mut(), &node) {
        prev.push_str(next);
        return;
    }
    out.push(node);
}

fn replace_text(text: &mut String, args: &[Vec<Node>]) {
    if !text.contains("${") {
        return;
    }
    let replaced = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| args.get(index))
            .map(|arg| text_content(arg))
            .unwrap_or_else(|| caps[0].to_string())
    });
    *text = replaced.into_owned();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rocket::document::{DirectiveCall, SourceSpan};

    fn texts(values: &[&str]) -> Vec<Vec<Node>> {
        values.iter().map(|v| vec![Node::text(*v)]).collect()
    }

    #[test]
    fn counts_highest_placeholder() {
        let skeleton = vec![Node::Paragraph(vec![
            Node::text("Hello ${0}, meet "),
            Node::Strong(vec![Node::text("${2}")]),
        ])];
        assert_eq!(placeholder_count(&skeleton), 3);
        assert_eq!(placeholder_count(&[Node::text("none")]), 0);
    }

    #[test]
    fn substitutes_inside_directive_arguments() {
        let mut skeleton = vec![Node::Directive(DirectiveCall {
            name: "link".to_string(),
            args: vec![Node::text("https://${0}/")],
            arg_spans: Vec::new(),
            body: Some(vec![Node::text("${1}")]),
            span: SourceSpan::default(),
        })];
        substitute(&mut skeleton, &texts(&["example.com", "site"]));
        let Node::Directive(call) = &skeleton[0] else {
            panic!()
        };
        assert_eq!(call.args, vec![Node::text("https://example.com/")]);
        assert_eq!(call.body, Some(vec![Node::text("site")]));
    }

    #[test]
    fn reference_arguments_are_spliced_as_nodes() {
        let reference = Node::Ref {
            id: "setup".to_string(),
            title: None,
            span: SourceSpan::default(),
        };
        let mut skeleton = vec![Node::text("See ${0}.")];
        substitute(&mut skeleton, &[vec![reference.clone()]]);
        assert_eq!(
            skeleton,
            vec![Node::text("See "), reference.clone(), Node::text(".")]
        );

        let mut call = vec![Node::Directive(DirectiveCall {
            name: "wrap".to_string(),
            args: vec![Node::text("(${0})")],
            arg_spans: Vec::new(),
            body: None,
            span: SourceSpan::default(),
        })];
        substitute(&mut call, &[vec![reference.clone()]]);
        let Node::Directive(call) = &call[0] else {
            panic!()
        };
        assert_eq!(
            call.args,
            vec![Node::Concat(vec![Node::text("("), reference, Node::text(")")])]
        );
    }

    #[test]
    fn text_arguments_merge_with_surrounding_text() {
        let mut skeleton = vec![Node::Strong(vec![Node::text("${0} and ${1}")])];
        substitute(&mut skeleton, &texts(&["a", "b"]));
        assert_eq!(skeleton, vec![Node::Strong(vec![Node::text("a and b")])]);
    }

    #[test]
    fn patterns_search_the_argument() {
        let pattern = compile_pattern("[0-9]+").unwrap();
        assert!(pattern.is_match("v12"));
        assert!(!pattern.is_match("vx"));
        let anchored = compile_pattern("^[a-z]+$").unwrap();
        assert!(!anchored.is_match("abc1"));
        assert_eq!(anchored.as_str(), "^[a-z]+$");
    }

    #[test]
    fn invalid_pattern() {
        let err = compile_pattern("(unclosed").unwrap_err();
        assert!(matches!(err, CompileError::InvalidPattern { .. }));
    }
}
