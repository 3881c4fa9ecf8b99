//! The compilation unit: every content file of a project compiled together.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;
use rocket::document::{Node, text_content};
use rocket::parser::Parser;

use crate::error::{CompileError, DiagnosticError};
use crate::evaluator::Evaluator;
use crate::page::{Entry, Page};
use crate::references::{self, ReferenceTable};
use crate::render::{Highlighter, HtmlRenderer, NoHighlight};
use crate::source::{SourceLoader, SourceMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Project version, returned by the `version` directive.
    pub version: String,
    /// Deepest heading level a `toctree` lists for a document target.
    pub toc_depth: usize,
    /// Maximum nesting of directive expansion.
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            version: String::new(),
            toc_depth: 2,
            max_depth: 256,
        }
    }
}

/// One document as it moves through the phases.
struct Document {
    entry: Entry,
    file_id: usize,
    title: String,
    metadata: BTreeMap<String, String>,
    nodes: Vec<Node>,
}

pub struct Compiler<L: SourceLoader> {
    loader: L,
    options: CompileOptions,
    highlighter: Box<dyn Highlighter>,
    sources: SourceMap,
}

impl<L: SourceLoader> Compiler<L> {
    pub fn new(loader: L, options: CompileOptions) -> Self {
        Compiler {
            loader,
            options,
            highlighter: Box::new(NoHighlight),
            sources: SourceMap::new(),
        }
    }

    pub fn with_highlighter(mut self, highlighter: impl Highlighter + 'static) -> Self {
        self.highlighter = Box::new(highlighter);
        self
    }

    /// Every file read by the last compilation. Diagnostics refer to these
    /// by id.
    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Compile `entries` into pages, in entry order.
    ///
    /// Parse errors of all files are reported together. Any later error
    /// stops the compilation without producing pages, except that
    /// reference resolution reports every unresolved reference at once.
    pub fn compile(&mut self, entries: &[Entry]) -> Result<Vec<Page>, Vec<DiagnosticError>> {
        self.sources = SourceMap::new();

        let loaded = self.load(entries)?;
        tracing::debug!(files = loaded.len(), "loaded sources");

        let parsed = parse_all(loaded)?;
        let mut documents = self.evaluate(parsed)?;
        let table = collect_references(&documents)?;
        tracing::debug!(references = table.len(), "collected references");

        let toc_depth = self.options.toc_depth;
        let errors: Vec<DiagnosticError> = documents
            .par_iter_mut()
            .flat_map(|document| table.resolve(&document.entry.slug, &mut document.nodes, toc_depth))
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        let highlighter: &dyn Highlighter = self.highlighter.as_ref();
        let pages = documents
            .into_par_iter()
            .map(|document| -> Result<Page, DiagnosticError> {
                let html = HtmlRenderer::new(highlighter, document.file_id).render(&document.nodes)?;
                Ok(Page {
                    slug: document.entry.slug,
                    source_path: document.entry.path,
                    title: document.title,
                    metadata: document.metadata,
                    html,
                })
            })
            .collect::<Result<Vec<_>, DiagnosticError>>()
            .map_err(|error| vec![error])?;

        tracing::info!(pages = pages.len(), "compiled");
        Ok(pages)
    }

    fn load(&mut self, entries: &[Entry]) -> Result<Vec<Loaded>, Vec<DiagnosticError>> {
        let mut loaded = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        for entry in entries {
            let result = self
                .loader
                .canonicalize(&entry.path)
                .and_then(|canonical| Ok((self.loader.load(&canonical)?, canonical)));
            match result {
                Ok((source, canonical)) => {
                    let file_id = self.sources.add(canonical.clone(), source.clone());
                    loaded.push(Loaded {
                        entry: entry.clone(),
                        canonical,
                        file_id,
                        source,
                    });
                }
                Err(error) => errors.push(io_error(entry, &error)),
            }
        }
        if errors.is_empty() {
            Ok(loaded)
        } else {
            Err(errors)
        }
    }

    /// Evaluation is sequential: documents share the definition table and
    /// the cache of imported files.
    fn evaluate(&mut self, parsed: Vec<Parsed>) -> Result<Vec<Document>, Vec<DiagnosticError>> {
        let mut evaluator = Evaluator::new(&self.loader, &self.options, &mut self.sources);
        for document in &parsed {
            evaluator.register_parsed(
                document.loaded.canonical.clone(),
                document.loaded.file_id,
                document.nodes.clone(),
            );
        }

        let mut documents = Vec::with_capacity(parsed.len());
        for Parsed { loaded, nodes } in parsed {
            let evaluated = evaluator
                .evaluate_document(nodes, loaded.file_id)
                .map_err(|error| vec![error])?;
            let title = document_title(&loaded.entry.slug, &evaluated.metadata, &evaluated.nodes);
            documents.push(Document {
                entry: loaded.entry,
                file_id: loaded.file_id,
                title,
                metadata: evaluated.metadata,
                nodes: evaluated.nodes,
            });
        }
        tracing::debug!(
            documents = documents.len(),
            definitions = evaluator.definitions().len(),
            "evaluated"
        );
        Ok(documents)
    }
}

struct Loaded {
    entry: Entry,
    canonical: PathBuf,
    file_id: usize,
    source: String,
}

struct Parsed {
    loaded: Loaded,
    nodes: Vec<Node>,
}

fn io_error(entry: &Entry, error: &std::io::Error) -> DiagnosticError {
    DiagnosticError::in_file(
        CompileError::Io {
            path: entry.path.display().to_string(),
            message: error.to_string(),
        },
        0,
    )
}

/// Parse every file in parallel. All parse errors are returned, in entry
/// order.
fn parse_all(loaded: Vec<Loaded>) -> Result<Vec<Parsed>, Vec<DiagnosticError>> {
    let results: Vec<Result<Parsed, Vec<DiagnosticError>>> = loaded
        .into_par_iter()
        .map(|loaded| {
            match Parser::new(loaded.source.clone(), loaded.file_id).parse() {
                Ok(file) => Ok(Parsed {
                    loaded,
                    nodes: file.nodes,
                }),
                Err(errors) => {
                    tracing::debug!(
                        path = %loaded.canonical.display(),
                        errors = errors.len(),
                        "parse failed"
                    );
                    Err(errors.into_iter().map(DiagnosticError::from).collect())
                }
            }
        })
        .collect();

    let mut parsed = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(document) => parsed.push(document),
            Err(mut file_errors) => errors.append(&mut file_errors),
        }
    }
    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}

/// Collect every document's references in parallel and merge them in
/// document order, so the first of two duplicates is always the earlier one.
fn collect_references(documents: &[Document]) -> Result<ReferenceTable, Vec<DiagnosticError>> {
    let collected: Vec<_> = documents
        .par_iter()
        .map(|document| references::collect(&document.entry.slug, &document.title, &document.nodes))
        .collect();

    let mut table = ReferenceTable::new();
    let mut errors = Vec::new();
    for (references, outline) in collected {
        for reference in references {
            if let Err(error) = table.insert(reference) {
                errors.push(error);
            }
        }
        table.add_outline(outline);
    }
    if errors.is_empty() {
        Ok(table)
    } else {
        Err(errors)
    }
}

/// `theme-config title`, else the first level-1 heading, else the slug.
fn document_title(slug: &str, metadata: &BTreeMap<String, String>, nodes: &[Node]) -> String {
    if let Some(title) = metadata.get("title") {
        return title.clone();
    }
    nodes
        .iter()
        .find_map(|node| match node {
            Node::Heading(heading) if heading.level == 1 => Some(text_content(&heading.title)),
            _ => None,
        })
        .unwrap_or_else(|| slug.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryLoader;
    use pretty_assertions::assert_eq;

    fn compile(files: &[(&str, &str)]) -> Result<Vec<Page>, Vec<DiagnosticError>> {
        let mut loader = MemoryLoader::new();
        let mut entries = Vec::new();
        for (path, source) in files {
            loader.insert(path, *source);
            let slug = path.trim_end_matches(".rocket");
            entries.push(Entry::new(*path, slug));
        }
        Compiler::new(loader, CompileOptions::default()).compile(&entries)
    }

    #[test]
    fn titles_come_from_config_then_heading_then_slug() {
        let pages = compile(&[
            ("a.rocket", "(:theme-config title \"Configured\")\n\n(:h1 \"Heading\")"),
            ("b.rocket", "(:h1 \"Heading\")"),
            ("c.rocket", "Just text."),
        ])
        .unwrap();
        let titles: Vec<_> = pages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Configured", "Heading", "c"]);
    }

    #[test]
    fn pages_keep_entry_order() {
        let pages = compile(&[("z.rocket", "z"), ("a.rocket", "a"), ("m.rocket", "m")]).unwrap();
        let slugs: Vec<_> = pages.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["z", "a", "m"]);
        assert_eq!(pages[1].html, "<p>a</p>\n");
    }

    #[test]
    fn parse_errors_of_all_files_are_reported() {
        let errors = compile(&[
            ("a.rocket", "(:h1 \"unterminated"),
            ("b.rocket", "fine"),
            ("c.rocket", "(:step \"misplaced\" => body)"),
        ])
        .unwrap_err();
        let files: Vec<_> = errors.iter().map(|e| e.source_id).collect();
        assert!(files.contains(&0));
        assert!(files.contains(&2));
        assert!(!files.contains(&1));
    }

    #[test]
    fn missing_entry_is_an_io_error() {
        let mut compiler = Compiler::new(MemoryLoader::new(), CompileOptions::default());
        let errors = compiler.compile(&[Entry::new("nope.rocket", "nope")]).unwrap_err();
        assert!(matches!(errors[0].error, CompileError::Io { .. }));
    }

    #[test]
    fn toctree_lists_other_documents() {
        let pages = compile(&[
            ("index.rocket", "(:toctree guide)"),
            ("guide.rocket", "(:h1 \"Guide\")\n\n(:h2 \"First\")\n\n(:h3 \"Deep\")"),
        ])
        .unwrap();
        assert_eq!(
            pages[0].html,
            "<nav class=\"toctree\"><ul>\n<li><a href=\"/guide/\">Guide</a><ul>\n<li><a href=\"/guide/#first\">First</a></li>\n</ul>\n</li>\n</ul>\n</nav>\n"
        );
    }
}
