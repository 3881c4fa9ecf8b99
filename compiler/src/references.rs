//! Cross-document references.
//!
//! Collection runs per document and is merged into one table in document
//! order; resolution runs only after every document has been collected, so
//! a `ref` may point at an id declared later or in another file.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use rocket::document::{HeadingId, Node, SourceSpan, TocEntry, TocItem, text_content};

use crate::error::{CompileError, DiagnosticError};
use crate::page::page_url;

/// A registered reference target.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub anchor: Option<String>,
    pub span: SourceSpan,
}

impl Reference {
    pub fn href(&self) -> String {
        match &self.anchor {
            Some(anchor) => format!("{}#{}", page_url(&self.slug), anchor),
            None => page_url(&self.slug),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineHeading {
    pub level: u8,
    pub title: String,
    pub anchor: String,
}

/// A document's title, headings and own `toctree` entries, for `toctree`
/// entries naming it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub slug: String,
    pub title: String,
    pub headings: Vec<OutlineHeading>,
    pub toctree: Vec<TocEntry>,
}

/// Gather the reference targets and heading outline of one evaluated
/// document.
pub fn collect(slug: &str, title: &str, nodes: &[Node]) -> (Vec<Reference>, Outline) {
    let mut references = Vec::new();
    let mut headings = Vec::new();
    let mut toctree = Vec::new();

    for node in nodes {
        node.walk(&mut |node| match node {
            Node::Heading(heading) => {
                let text = text_content(&heading.title);
                let (id, anchor) = match &heading.id {
                    HeadingId::Explicit(id) => (id.clone(), id.clone()),
                    HeadingId::Derived(anchor) => (format!("{}#{}", slug, anchor), anchor.clone()),
                    HeadingId::Pending => return,
                };
                references.push(Reference {
                    id,
                    title: text.clone(),
                    slug: slug.to_string(),
                    anchor: Some(anchor.clone()),
                    span: heading.span.clone(),
                });
                headings.push(OutlineHeading {
                    level: heading.level,
                    title: text,
                    anchor,
                });
            }
            Node::Anchor { id, title, span } => references.push(Reference {
                id: id.clone(),
                title: title.clone(),
                slug: slug.to_string(),
                anchor: Some(id.clone()),
                span: span.clone(),
            }),
            Node::TocTree { entries, .. } => toctree.extend(entries.iter().cloned()),
            _ => {}
        });
    }

    let outline = Outline {
        slug: slug.to_string(),
        title: title.to_string(),
        headings,
        toctree,
    };
    (references, outline)
}

/// Every reference id of a compilation unit, plus document outlines.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    references: HashMap<String, Reference>,
    outlines: HashMap<String, Outline>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference. Ids are unique across the whole unit.
    pub fn insert(&mut self, reference: Reference) -> Result<(), DiagnosticError> {
        match self.references.entry(reference.id.clone()) {
            Entry::Occupied(existing) => Err(DiagnosticError::new(
                CompileError::DuplicateReference(reference.id),
                &reference.span,
            )
            .with_related(existing.get().span.clone(), "first defined here")),
            Entry::Vacant(slot) => {
                slot.insert(reference);
                Ok(())
            }
        }
    }

    pub fn add_outline(&mut self, outline: Outline) {
        self.outlines.insert(outline.slug.clone(), outline);
    }

    pub fn get(&self, id: &str) -> Option<&Reference> {
        self.references.get(id)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Replace every `ref` with a link and every `toctree` with navigation
    /// in the document `slug`. Returns one error per reference that could
    /// not be resolved.
    pub fn resolve(&self, slug: &str, nodes: &mut [Node], toc_depth: usize) -> Vec<DiagnosticError> {
        let mut errors = Vec::new();
        let mut resolver = Resolver {
            table: self,
            slug,
            toc_depth,
            errors: &mut errors,
        };
        resolver.resolve_in(nodes);
        errors
    }

    /// A document slug wins over a reference id of the same name.
    ///
    /// A document entry lists the document's headings, then the entries of
    /// the document's own `toctree`s. `trail` holds the documents being
    /// expanded; nesting stops at `toc_depth` documents or on a cycle.
    fn toc_item(
        &self,
        entry: &TocEntry,
        toc_depth: usize,
        trail: &mut Vec<String>,
    ) -> Option<TocItem> {
        let override_title = entry.title.as_deref().map(text_content);

        if let Some(outline) = self.outlines.get(&entry.target) {
            let mut children = outline_tree(outline, toc_depth);
            if trail.len() < toc_depth && !trail.contains(&outline.slug) {
                trail.push(outline.slug.clone());
                for nested in &outline.toctree {
                    if trail.contains(&nested.target) {
                        continue;
                    }
                    children.extend(self.toc_item(nested, toc_depth, trail));
                }
                trail.pop();
            }
            return Some(TocItem {
                title: override_title.unwrap_or_else(|| outline.title.clone()),
                href: page_url(&outline.slug),
                children,
            });
        }

        self.references.get(&entry.target).map(|reference| TocItem {
            title: override_title.unwrap_or_else(|| reference.title.clone()),
            href: reference.href(),
            children: Vec::new(),
        })
    }
}

struct Resolver<'a> {
    table: &'a ReferenceTable,
    slug: &'a str,
    toc_depth: usize,
    errors: &'a mut Vec<DiagnosticError>,
}

impl Resolver<'_> {
    fn resolve_in(&mut self, nodes: &mut [Node]) {
        let table = self.table;
        for node in nodes.iter_mut() {
            let replacement = match &mut *node {
                Node::Ref { id, title, span } => match table.references.get(id.as_str()) {
                    Some(reference) => {
                        let mut content = title
                            .take()
                            .unwrap_or_else(|| vec![Node::Text(reference.title.clone())]);
                        self.resolve_in(&mut content);
                        Some(Node::Link {
                            href: reference.href(),
                            content,
                        })
                    }
                    None => {
                        self.errors.push(DiagnosticError::new(
                            CompileError::UnresolvedReference(id.clone()),
                            span,
                        ));
                        None
                    }
                },
                Node::TocTree { entries, span } => {
                    let mut items = Vec::new();
                    for entry in entries.iter() {
                        let mut trail = vec![self.slug.to_string()];
                        match table.toc_item(entry, self.toc_depth, &mut trail) {
                            Some(item) => items.push(item),
                            None => self.errors.push(DiagnosticError::new(
                                CompileError::UnresolvedReference(entry.target.clone()),
                                span,
                            )),
                        }
                    }
                    Some(Node::Toc(items))
                }
                other => {
                    for children in other.child_lists_mut() {
                        self.resolve_in(children);
                    }
                    None
                }
            };
            if let Some(replacement) = replacement {
                *node = replacement;
            }
        }
    }
}

/// Nest a document's headings of level 2 through `depth` under each other.
fn outline_tree(outline: &Outline, depth: usize) -> Vec<TocItem> {
    let mut roots = Vec::new();
    let mut open: Vec<u8> = Vec::new();
    let url = page_url(&outline.slug);

    for heading in &outline.headings {
        if heading.level < 2 || usize::from(heading.level) > depth {
            continue;
        }
        while open.last().is_some_and(|&level| level >= heading.level) {
            open.pop();
        }
        let item = TocItem {
            title: heading.title.clone(),
            href: format!("{}#{}", url, heading.anchor),
            children: Vec::new(),
        };
        insert_at(&mut roots, open.len(), item);
        open.push(heading.level);
    }
    roots
}

fn insert_at(list: &mut Vec<TocItem>, depth: usize, item: TocItem) {
    if depth > 0 {
        if let Some(last) = list.last_mut() {
            insert_at(&mut last.children, depth - 1, item);
            return;
        }
    }
    list.push(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rocket::document::Heading;

    fn heading(level: u8, id: HeadingId, title: &str) -> Node {
        Node::Heading(Heading {
            level,
            id,
            title: vec![Node::text(title)],
            span: SourceSpan::default(),
        })
    }

    fn table_for(slug: &str, title: &str, nodes: &[Node]) -> ReferenceTable {
        let mut table = ReferenceTable::new();
        add_document(&mut table, slug, title, nodes);
        table
    }

    fn add_document(table: &mut ReferenceTable, slug: &str, title: &str, nodes: &[Node]) {
        let (references, outline) = collect(slug, title, nodes);
        for reference in references {
            table.insert(reference).unwrap();
        }
        table.add_outline(outline);
    }

    fn toctree(targets: &[&str]) -> Node {
        Node::TocTree {
            entries: targets
                .iter()
                .map(|target| TocEntry {
                    target: target.to_string(),
                    title: None,
                })
                .collect(),
            span: SourceSpan::default(),
        }
    }

    #[test]
    fn collects_explicit_derived_and_anchor_ids() {
        let nodes = vec![
            heading(1, HeadingId::Derived("intro".into()), "Intro"),
            heading(2, HeadingId::Explicit("install".into()), "Install"),
            Node::Paragraph(vec![Node::Anchor {
                id: "faq".into(),
                title: "FAQ".into(),
                span: SourceSpan::default(),
            }]),
        ];
        let (references, outline) = collect("guide/setup", "Setup", &nodes);
        let ids: Vec<_> = references.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["guide/setup#intro", "install", "faq"]);
        assert_eq!(references[1].href(), "/guide/setup/#install");
        assert_eq!(outline.headings.len(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut table = ReferenceTable::new();
        let reference = Reference {
            id: "x".into(),
            title: "X".into(),
            slug: "a".into(),
            anchor: None,
            span: SourceSpan::default(),
        };
        table.insert(reference.clone()).unwrap();
        let err = table.insert(reference).unwrap_err();
        assert_eq!(err.error, CompileError::DuplicateReference("x".into()));
    }

    #[test]
    fn resolves_refs_with_and_without_titles() {
        let table = table_for(
            "index",
            "Home",
            &[heading(2, HeadingId::Explicit("setup".into()), "Set up")],
        );
        let mut nodes = vec![Node::Paragraph(vec![
            Node::Ref {
                id: "setup".into(),
                title: None,
                span: SourceSpan::default(),
            },
            Node::Ref {
                id: "setup".into(),
                title: Some(vec![Node::text("here")]),
                span: SourceSpan::default(),
            },
        ])];
        assert!(table.resolve("index", &mut nodes, 2).is_empty());
        assert_eq!(
            nodes,
            vec![Node::Paragraph(vec![
                Node::Link {
                    href: "/#setup".into(),
                    content: vec![Node::text("Set up")],
                },
                Node::Link {
                    href: "/#setup".into(),
                    content: vec![Node::text("here")],
                },
            ])]
        );
    }

    #[test]
    fn every_unresolved_reference_is_reported() {
        let table = ReferenceTable::new();
        let mut nodes = vec![Node::Paragraph(vec![
            Node::Ref {
                id: "a".into(),
                title: None,
                span: SourceSpan::default(),
            },
            Node::Ref {
                id: "b".into(),
                title: None,
                span: SourceSpan::default(),
            },
        ])];
        assert_eq!(table.resolve("index", &mut nodes, 2).len(), 2);
    }

    #[test]
    fn toctree_nests_outline_to_depth() {
        let table = table_for(
            "guide/index",
            "Guide",
            &[
                heading(1, HeadingId::Derived("guide".into()), "Guide"),
                heading(2, HeadingId::Derived("a".into()), "A"),
                heading(3, HeadingId::Derived("a1".into()), "A1"),
                heading(2, HeadingId::Derived("b".into()), "B"),
            ],
        );
        let toctree = || Node::TocTree {
            entries: vec![TocEntry {
                target: "guide/index".into(),
                title: None,
            }],
            span: SourceSpan::default(),
        };

        let mut shallow = vec![toctree()];
        assert!(table.resolve("index", &mut shallow, 2).is_empty());
        let Node::Toc(items) = &shallow[0] else { panic!() };
        assert_eq!(items[0].title, "Guide");
        assert_eq!(items[0].href, "/guide/");
        let titles: Vec<_> = items[0].children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert!(items[0].children[0].children.is_empty());

        let mut deep = vec![toctree()];
        table.resolve("index", &mut deep, 3);
        let Node::Toc(items) = &deep[0] else { panic!() };
        assert_eq!(items[0].children[0].children[0].href, "/guide/#a1");
    }

    #[test]
    fn toctree_nests_documents_listed_by_targets() {
        let mut table = ReferenceTable::new();
        add_document(&mut table, "index", "Home", &[toctree(&["guide"])]);
        add_document(&mut table, "guide", "Guide", &[toctree(&["guide-a", "guide-b"])]);
        add_document(&mut table, "guide-a", "Part A", &[toctree(&["deeper"])]);
        add_document(&mut table, "guide-b", "Part B", &[]);
        add_document(&mut table, "deeper", "Deeper", &[]);

        let mut nodes = vec![toctree(&["guide"])];
        assert!(table.resolve("index", &mut nodes, 2).is_empty());
        let Node::Toc(items) = &nodes[0] else { panic!() };
        let nested: Vec<_> = items[0].children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(nested, vec!["Part A", "Part B"]);
        assert!(items[0].children[0].children.is_empty());

        let mut deep = vec![toctree(&["guide"])];
        table.resolve("index", &mut deep, 3);
        let Node::Toc(items) = &deep[0] else { panic!() };
        assert_eq!(items[0].children[0].children[0].href, "/deeper/");
    }

    #[test]
    fn toctree_cycles_stop() {
        let mut table = ReferenceTable::new();
        add_document(&mut table, "a", "A", &[toctree(&["b"])]);
        add_document(&mut table, "b", "B", &[toctree(&["a"])]);

        let mut nodes = vec![toctree(&["b"])];
        assert!(table.resolve("a", &mut nodes, 6).is_empty());
        let Node::Toc(items) = &nodes[0] else { panic!() };
        assert_eq!(items[0].title, "B");
        assert!(items[0].children.is_empty());
    }
}
