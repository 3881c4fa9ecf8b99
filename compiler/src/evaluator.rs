use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use pulldown_cmark::{Options, Parser as CmarkParser};
use rocket::document::{
    AdmonitionKind, DirectiveCall, HeadingId, Node, SourceSpan, TocEntry, text_content,
    trim_inline, unwrap_paragraph,
};
use rocket::parser::reader::{is_directive_name, string_value_offsets};
use rocket::parser::{Parser, parse_fragment_at};
use rocket::slug::slugify;

use crate::definitions::{Definition, DefinitionId, DefinitionKind, DefinitionTable, ScopeId};
use crate::directive::{Arity, Builtin, is_reserved};
use crate::error::{CompileError, DiagnosticError};
use crate::pattern::{compile_pattern, placeholder_count, substitute};
use crate::source::{SourceLoader, SourceMap, resolve_relative};
use crate::unit::CompileOptions;

type Result<T> = std::result::Result<T, DiagnosticError>;

/// Where evaluation currently happens.
#[derive(Debug, Clone, Copy)]
struct Frame {
    scope: ScopeId,
    file_id: usize,
    depth: usize,
}

/// A document after evaluation: no directive calls left except `ref` and
/// `toctree` placeholders.
#[derive(Debug)]
pub struct EvaluatedDocument {
    pub nodes: Vec<Node>,
    pub metadata: BTreeMap<String, String>,
    pub scope: ScopeId,
}

/// Expands directive calls in place.
///
/// One evaluator serves every document of a compilation unit, so parsed
/// files and import scopes are shared between documents.
pub struct Evaluator<'a> {
    loader: &'a dyn SourceLoader,
    options: &'a CompileOptions,
    sources: &'a mut SourceMap,
    definitions: DefinitionTable,
    /// Parsed trees by canonical path.
    parsed: HashMap<PathBuf, (usize, Vec<Node>)>,
    /// Definition scopes of imported files by canonical path.
    import_scopes: HashMap<PathBuf, ScopeId>,
    import_stack: Vec<PathBuf>,

    // Per-document state.
    include_stack: Vec<PathBuf>,
    expansion_stack: Vec<String>,
    metadata: BTreeMap<String, String>,
    /// Derived heading anchors handed out so far.
    anchors: HashSet<String>,
    /// Explicit heading ids of the document; derived anchors avoid them.
    reserved: HashSet<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        loader: &'a dyn SourceLoader,
        options: &'a CompileOptions,
        sources: &'a mut SourceMap,
    ) -> Self {
        Evaluator {
            loader,
            options,
            sources,
            definitions: DefinitionTable::new(),
            parsed: HashMap::new(),
            import_scopes: HashMap::new(),
            import_stack: Vec::new(),
            include_stack: Vec::new(),
            expansion_stack: Vec::new(),
            metadata: BTreeMap::new(),
            anchors: HashSet::new(),
            reserved: HashSet::new(),
        }
    }

    /// Make an already parsed file available to `include` and `import`.
    pub fn register_parsed(&mut self, canonical: PathBuf, file_id: usize, nodes: Vec<Node>) {
        self.parsed.insert(canonical, (file_id, nodes));
    }

    pub fn definitions(&self) -> &DefinitionTable {
        &self.definitions
    }

    /// Evaluate one document in a fresh file scope.
    pub fn evaluate_document(
        &mut self,
        nodes: Vec<Node>,
        file_id: usize,
    ) -> Result<EvaluatedDocument> {
        self.include_stack.clear();
        self.expansion_stack.clear();
        self.metadata.clear();
        self.anchors.clear();
        self.reserved.clear();
        for node in &nodes {
            reserve_explicit_ids(node, &mut self.reserved);
        }
        if let Some(path) = self.sources.path(file_id) {
            self.include_stack.push(path.to_path_buf());
        }

        let scope = self.definitions.root_scope();
        let frame = Frame {
            scope,
            file_id,
            depth: 0,
        };
        let nodes = self.expand_blocks(nodes, frame)?;
        tracing::debug!(
            file_id,
            definitions = self.definitions.len(),
            "evaluated document"
        );
        Ok(EvaluatedDocument {
            nodes,
            metadata: std::mem::take(&mut self.metadata),
            scope,
        })
    }

    // -----------------------------------------------------------------------
    // Tree walking
    // -----------------------------------------------------------------------

    fn expand_nodes(&mut self, nodes: Vec<Node>, frame: Frame) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.extend(self.expand_node(node, frame)?);
        }
        Ok(out)
    }

    /// Expand block-level content: inline runs end up in paragraphs.
    fn expand_blocks(&mut self, nodes: Vec<Node>, frame: Frame) -> Result<Vec<Node>> {
        Ok(regroup(self.expand_nodes(nodes, frame)?))
    }

    /// Expand a body that may be inline or block content, keeping inline
    /// content inline unless block nodes appear.
    fn expand_flow(&mut self, nodes: Vec<Node>, frame: Frame) -> Result<Vec<Node>> {
        let expanded = self.expand_nodes(nodes, frame)?;
        if expanded.iter().any(Node::is_block) {
            Ok(regroup(expanded))
        } else {
            Ok(expanded)
        }
    }

    fn expand_node(&mut self, node: Node, frame: Frame) -> Result<Vec<Node>> {
        let node = match node {
            Node::Directive(call) => return self.directive(call, frame),
            Node::Concat(args) => return self.concat(args, frame),
            Node::Paragraph(children) => {
                let children = self.expand_nodes(children, frame)?;
                return Ok(regroup(children));
            }
            Node::Group(items) => {
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(Node::text(" "));
                    }
                    out.extend(self.expand_node(item, frame)?);
                }
                return Ok(out);
            }
            Node::Strong(children) => Node::Strong(self.expand_nodes(children, frame)?),
            Node::Emphasis(children) => Node::Emphasis(self.expand_nodes(children, frame)?),
            Node::Link { href, content } => Node::Link {
                href,
                content: self.expand_nodes(content, frame)?,
            },
            Node::Heading(mut heading) => {
                heading.title = self.expand_nodes(heading.title, frame)?;
                heading.id = match heading.id {
                    HeadingId::Pending => {
                        HeadingId::Derived(self.unique_anchor(slugify(&text_content(&heading.title))))
                    }
                    HeadingId::Explicit(id) => {
                        if self.anchors.contains(&id) {
                            return Err(DiagnosticError::new(
                                CompileError::DuplicateReference(id),
                                &heading.span,
                            )
                            .with_note("an earlier heading in this document derived the same anchor"));
                        }
                        self.reserved.insert(id.clone());
                        HeadingId::Explicit(id)
                    }
                    derived => derived,
                };
                Node::Heading(heading)
            }
            Node::List { ordered, items } => Node::List {
                ordered,
                items: self.expand_nodes(items, frame)?,
            },
            Node::ListItem(children) => Node::ListItem(self.expand_flow(children, frame)?),
            Node::Steps(items) => Node::Steps(self.expand_nodes(items, frame)?),
            Node::StepItem { title, body } => Node::StepItem {
                title: self.expand_nodes(title, frame)?,
                body: self.expand_flow(body, frame)?,
            },
            Node::Glossary(entries) => {
                let entries = self.expand_nodes(entries, frame)?;
                check_glossary_terms(&entries)?;
                Node::Glossary(entries)
            }
            Node::GlossaryEntry {
                term,
                definition,
                span,
            } => Node::GlossaryEntry {
                term: self.expand_nodes(term, frame)?,
                definition: self.expand_flow(definition, frame)?,
                span,
            },
            Node::Admonition { kind, title, body } => Node::Admonition {
                kind,
                title: self.expand_nodes(title, frame)?,
                body: self.expand_flow(body, frame)?,
            },
            Node::Ref {
                id,
                title: Some(title),
                span,
            } => Node::Ref {
                id,
                title: Some(self.expand_nodes(title, frame)?),
                span,
            },
            other => other,
        };
        Ok(vec![node])
    }

    fn unique_anchor(&mut self, base: String) -> String {
        let mut candidate = base.clone();
        let mut n = 0;
        while self.reserved.contains(&candidate) || self.anchors.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", base, n);
        }
        self.anchors.insert(candidate.clone());
        candidate
    }

    /// Evaluate an argument to its plain text.
    fn text(&mut self, operand: Vec<Node>, frame: Frame) -> Result<String> {
        let expanded = self.expand_nodes(operand, frame)?;
        Ok(text_content(&expanded))
    }

    /// Evaluate each argument in turn and join the results. Text runs are
    /// merged; references and anchors are kept as nodes.
    fn concat(&mut self, args: Vec<Node>, frame: Frame) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for arg in args {
            out.extend(unwrap_paragraph(self.expand_nodes(vec![arg], frame)?));
        }
        Ok(merge_text(out))
    }

    // -----------------------------------------------------------------------
    // Directive dispatch
    // -----------------------------------------------------------------------

    fn directive(&mut self, call: DirectiveCall, frame: Frame) -> Result<Vec<Node>> {
        let frame = Frame {
            depth: frame.depth + 1,
            ..frame
        };
        if frame.depth > self.options.max_depth {
            return Err(DiagnosticError::new(
                CompileError::ExpansionTooDeep(self.options.max_depth),
                &call.span,
            ));
        }

        let actual = call.args.len() + usize::from(call.body.is_some());

        if let Some(builtin) = Builtin::from_name(&call.name) {
            let arity = builtin.arity();
            if !arity.accepts(actual) {
                return Err(DiagnosticError::new(
                    CompileError::Arity {
                        directive: call.name.clone(),
                        expected: arity,
                        actual,
                    },
                    &call.span,
                ));
            }
            return self.builtin(builtin, call, frame);
        }

        match self.definitions.lookup(frame.scope, &call.name) {
            Some(id) => self.expand_definition(id, call, frame),
            None => Err(DiagnosticError::new(
                CompileError::UnresolvedName(call.name.clone()),
                &call.span,
            )),
        }
    }

    fn builtin(&mut self, builtin: Builtin, call: DirectiveCall, frame: Frame) -> Result<Vec<Node>> {
        match builtin {
            Builtin::Concat => {
                let mut args = call.args;
                args.extend(call.body.unwrap_or_default());
                self.concat(args, frame)
            }
            Builtin::Include => self.include(call, frame),
            Builtin::Import => {
                self.import(call, frame)?;
                Ok(Vec::new())
            }
            Builtin::Link => {
                let span = call.span.clone();
                let mut operands = operands(call).into_iter();
                let href_operand = operands.next().unwrap_or_default();
                let href = self.text(href_operand, frame)?;
                let content = match operands.next() {
                    Some(title) => unwrap_paragraph(self.expand_flow(title, frame)?),
                    None => vec![Node::Text(href.clone())],
                };
                if content.iter().any(Node::is_block) {
                    return Err(invalid(&span, "link", "the title must be inline content"));
                }
                Ok(vec![Node::Link { href, content }])
            }
            Builtin::Figure => {
                let mut texts = Vec::new();
                for operand in operands(call) {
                    texts.push(self.text(operand, frame)?);
                }
                let mut texts = texts.into_iter();
                let src = texts.next().unwrap_or_default();
                let alt = texts.next().unwrap_or_default();
                let width = texts.next().unwrap_or_else(|| "100%".to_string());
                Ok(vec![Node::Figure {
                    src,
                    alt,
                    width: Some(width),
                }])
            }
            Builtin::Define => {
                self.define(call, frame)?;
                Ok(Vec::new())
            }
            Builtin::DefineTemplate => {
                self.define_template(call, frame)?;
                Ok(Vec::new())
            }
            Builtin::Let => self.let_binding(call, frame),
            Builtin::DefineRef => {
                let span = call.span.clone();
                let mut operands = operands(call).into_iter();
                let id = self.text(operands.next().unwrap_or_default(), frame)?;
                let title = self.text(operands.next().unwrap_or_default(), frame)?;
                Ok(vec![Node::Anchor { id, title, span }])
            }
            Builtin::Ref => {
                let span = call.span.clone();
                let mut operands = operands(call).into_iter();
                let id = self.text(operands.next().unwrap_or_default(), frame)?;
                let title = match operands.next() {
                    Some(title) => Some(unwrap_paragraph(self.expand_flow(title, frame)?)),
                    None => None,
                };
                Ok(vec![Node::Ref { id, title, span }])
            }
            Builtin::TocTree => self.toctree(call, frame),
            Builtin::Note => self.admonition(AdmonitionKind::Note, call, frame),
            Builtin::Warning => self.admonition(AdmonitionKind::Warning, call, frame),
            Builtin::Markdown => {
                let source = match call.body {
                    Some(body) => text_content(&body),
                    None => self.text(call.args, frame)?,
                };
                Ok(vec![Node::Raw(render_markdown(&source))])
            }
            Builtin::ThemeConfig => {
                if call.args.len() % 2 != 0 || call.body.is_some() {
                    return Err(invalid(
                        &call.span,
                        "theme-config",
                        "expected `key value` pairs",
                    ));
                }
                let mut args = call.args.into_iter();
                while let (Some(key), Some(value)) = (args.next(), args.next()) {
                    let key = self.text(vec![key], frame)?;
                    let value = self.text(vec![value], frame)?;
                    self.metadata.insert(key, value);
                }
                Ok(Vec::new())
            }
            Builtin::Version => {
                let pattern = match operands(call).into_iter().next() {
                    Some(operand) => Some(self.text(operand, frame)?),
                    None => None,
                };
                Ok(vec![Node::Text(version(&self.options.version, pattern.as_deref()))])
            }
            Builtin::Null => Ok(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    fn expand_definition(
        &mut self,
        id: DefinitionId,
        call: DirectiveCall,
        frame: Frame,
    ) -> Result<Vec<Node>> {
        let definition = self.definitions.get(id).clone();
        let actual = call.args.len() + usize::from(call.body.is_some());
        if actual != definition.arity() {
            return Err(DiagnosticError::new(
                CompileError::Arity {
                    directive: call.name.clone(),
                    expected: Arity::exactly(definition.arity()),
                    actual,
                },
                &call.span,
            )
            .with_related(definition.span.clone(), "defined here"));
        }

        if let Some(start) = self.expansion_stack.iter().position(|n| *n == call.name) {
            let mut chain = self.expansion_stack[start..].to_vec();
            chain.push(call.name.clone());
            return Err(DiagnosticError::new(
                CompileError::CyclicExpansion(chain),
                &call.span,
            ));
        }

        let span = call.span.clone();
        let name = call.name.clone();
        let mut values = Vec::new();
        for operand in operands(call) {
            values.push(unwrap_paragraph(self.expand_flow(operand, frame)?));
        }

        let defining = Frame {
            scope: definition.scope,
            file_id: definition.file_id,
            depth: frame.depth,
        };
        let body = match definition.kind {
            DefinitionKind::Value {
                nodes,
                evaluated: true,
            } => return Ok(nodes),
            DefinitionKind::Value { nodes, .. } => nodes,
            DefinitionKind::Template {
                mut skeleton,
                patterns,
                ..
            } => {
                for (index, (value, pattern)) in values.iter().zip(&patterns).enumerate() {
                    let value = text_content(value);
                    if !pattern.is_match(&value) {
                        return Err(DiagnosticError::new(
                            CompileError::PatternMismatch {
                                directive: name,
                                index,
                                pattern: pattern.as_str().to_string(),
                                value,
                            },
                            &span,
                        ));
                    }
                }
                substitute(&mut skeleton, &values);
                skeleton
            }
        };

        self.expansion_stack.push(name);
        let result = self.expand_flow(body, defining);
        self.expansion_stack.pop();
        Ok(unwrap_paragraph(result?))
    }

    fn check_name(&self, name: &str, span: &SourceSpan) -> Result<()> {
        if is_reserved(name) {
            return Err(DiagnosticError::new(
                CompileError::ReservedName(name.to_string()),
                span,
            ));
        }
        if !is_directive_name(name) {
            return Err(invalid(
                span,
                "define",
                &format!("`{}` is not a valid directive name", name),
            ));
        }
        Ok(())
    }

    fn bind(&mut self, scope: ScopeId, definition: Definition) -> Result<DefinitionId> {
        let span = definition.span.clone();
        let name = definition.name.clone();
        self.definitions.define(scope, definition).map_err(|existing| {
            DiagnosticError::new(CompileError::DuplicateDefinition(name), &span)
                .with_related(self.definitions.get(existing).span.clone(), "first defined here")
        })
    }

    /// `(:define name expr)`, `(:define name => expr)` or the eager
    /// `(:define evaluate name expr)`.
    fn define(&mut self, call: DirectiveCall, frame: Frame) -> Result<()> {
        let span = call.span.clone();
        let mut operands = operands(call);
        let eager = operands.len() == 3;
        if eager {
            let marker = self.text(operands.remove(0), frame)?;
            if marker != "evaluate" {
                return Err(invalid(
                    &span,
                    "define",
                    "the three-argument form is `(:define evaluate name expr)`",
                ));
            }
        }
        let mut operands = operands.into_iter();
        let name = self.text(operands.next().unwrap_or_default(), frame)?;
        self.check_name(&name, &span)?;
        let expression = operands.next().unwrap_or_default();

        let nodes = if eager {
            unwrap_paragraph(self.expand_flow(expression, frame)?)
        } else {
            expression
        };
        self.bind(
            frame.scope,
            Definition {
                name,
                kind: DefinitionKind::Value {
                    nodes,
                    evaluated: eager,
                },
                scope: frame.scope,
                file_id: frame.file_id,
                span,
            },
        )?;
        Ok(())
    }

    /// `(:define-template name template patterns...)` or
    /// `(:define-template name patterns... => template)`.
    fn define_template(&mut self, call: DirectiveCall, frame: Frame) -> Result<()> {
        let span = call.span.clone();
        let mut arg_spans = call.arg_spans.into_iter();
        let mut args = call.args.into_iter();
        let name = self.text(args.next().into_iter().collect(), frame)?;
        arg_spans.next();
        self.check_name(&name, &span)?;

        let skeleton = match call.body {
            Some(body) => body,
            None => match (args.next(), arg_spans.next()) {
                (Some(Node::Text(source)), literal) => {
                    self.parse_template(&source, literal.as_ref(), &span, &name)?
                }
                (Some(node), _) => vec![node],
                (None, _) => {
                    return Err(invalid(&span, "define-template", "missing the template"));
                }
            },
        };

        let mut patterns = Vec::new();
        for arg in args {
            let source = self.text(vec![arg], frame)?;
            let regex =
                compile_pattern(&source).map_err(|error| DiagnosticError::new(error, &span))?;
            patterns.push(regex);
        }

        let arity = patterns.len().max(placeholder_count(&skeleton));
        tracing::debug!(name = %name, arity, "defined template");
        self.bind(
            frame.scope,
            Definition {
                name,
                kind: DefinitionKind::Template {
                    skeleton,
                    patterns,
                    arity,
                },
                scope: frame.scope,
                file_id: frame.file_id,
                span,
            },
        )?;
        Ok(())
    }

    /// Parse a template given as a string argument. Spans inside the
    /// template point into the literal it was written in.
    fn parse_template(
        &self,
        source: &str,
        literal: Option<&SourceSpan>,
        call_span: &SourceSpan,
        name: &str,
    ) -> Result<Vec<Node>> {
        let file_id = call_span.file_id;
        let written = literal.and_then(|literal| {
            let text = self.sources.source(literal.file_id)?;
            text.get(literal.range.clone())
                .map(|written| (literal.range.start, written))
        });
        let offsets: Vec<usize> = match written {
            Some((start, written)) if written.starts_with('"') => string_value_offsets(written)
                .into_iter()
                .map(|offset| start + offset)
                .collect(),
            Some((start, written)) if written.len() == source.len() => {
                (start..=start + written.len()).collect()
            }
            _ => Vec::new(),
        };
        let locate = |offset: usize| match offsets.get(offset) {
            Some(located) => *located,
            None => call_span.range.start,
        };

        parse_fragment_at(source, file_id, &locate)
            .map(unwrap_paragraph)
            .map_err(|errors| {
                let diagnostic = match errors.into_iter().next() {
                    Some(error) => DiagnosticError::from(error),
                    None => invalid(call_span, "define-template", "the template does not parse"),
                };
                diagnostic
                    .with_note(format!("in the template of `{}`", name))
                    .with_related(call_span.clone(), "template defined here")
            })
    }

    /// `(:let ((name value) ...) content...)`; a flat `(name value ...)`
    /// list is accepted too.
    fn let_binding(&mut self, call: DirectiveCall, frame: Frame) -> Result<Vec<Node>> {
        let span = call.span.clone();
        let mut operands = operands(call).into_iter();
        let bindings = match operands.next() {
            Some(operand) => match <[Node; 1]>::try_from(operand) {
                Ok([Node::Group(items)]) => items,
                _ => return Err(invalid(&span, "let", "expected a binding list")),
            },
            None => Vec::new(),
        };

        let flat = if bindings.iter().all(|b| matches!(b, Node::Group(_))) {
            let mut flat = Vec::new();
            for binding in bindings {
                if let Node::Group(items) = binding {
                    if items.len() != 2 {
                        return Err(invalid(&span, "let", "each binding is `(name value)`"));
                    }
                    flat.extend(items);
                }
            }
            flat
        } else {
            bindings
        };
        if flat.len() % 2 != 0 {
            return Err(invalid(&span, "let", "bindings come in `name value` pairs"));
        }
        let mut pairs = Vec::new();
        let mut items = flat.into_iter();
        while let (Some(name), Some(value)) = (items.next(), items.next()) {
            pairs.push((name, value));
        }

        let scope = self.definitions.child_scope(frame.scope);
        let inner = Frame { scope, ..frame };
        for (name, value) in pairs {
            let name = self.text(vec![name], inner)?;
            self.check_name(&name, &span)?;
            let nodes = unwrap_paragraph(self.expand_flow(vec![value], inner)?);
            self.bind(
                scope,
                Definition {
                    name,
                    kind: DefinitionKind::Value {
                        nodes,
                        evaluated: true,
                    },
                    scope,
                    file_id: frame.file_id,
                    span: span.clone(),
                },
            )?;
        }

        let content: Vec<Node> = operands.flatten().collect();
        self.expand_flow(content, inner)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Load and parse a file named relative to the current one.
    fn load(
        &mut self,
        target: &str,
        frame: Frame,
        span: &SourceSpan,
    ) -> Result<(PathBuf, usize, Vec<Node>)> {
        let from = self
            .sources
            .path(frame.file_id)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let path = resolve_relative(&from, target);
        let io_error = |error: std::io::Error| {
            DiagnosticError::new(
                CompileError::Io {
                    path: path.display().to_string(),
                    message: error.to_string(),
                },
                span,
            )
        };

        let canonical = self.loader.canonicalize(&path).map_err(io_error)?;
        if let Some((file_id, nodes)) = self.parsed.get(&canonical) {
            return Ok((canonical, *file_id, nodes.clone()));
        }

        let source = self.loader.load(&canonical).map_err(io_error)?;
        let file_id = self.sources.add(canonical.clone(), source.clone());
        tracing::debug!(path = %canonical.display(), file_id, "loaded dependency");

        let parsed = Parser::new(source, file_id).parse().map_err(|errors| {
            let count = errors.len();
            let mut iter = errors.into_iter();
            let mut diagnostic = match iter.next() {
                Some(first) => DiagnosticError::from(first),
                None => DiagnosticError::in_file(
                    CompileError::Syntax("unparseable file".to_string()),
                    file_id,
                ),
            };
            if count > 1 {
                diagnostic = diagnostic.with_note(format!("{} more errors in this file", count - 1));
            }
            diagnostic
        })?;

        self.parsed
            .insert(canonical.clone(), (file_id, parsed.nodes.clone()));
        Ok((canonical, file_id, parsed.nodes))
    }

    fn include(&mut self, call: DirectiveCall, frame: Frame) -> Result<Vec<Node>> {
        let span = call.span.clone();
        let operand = operands(call).into_iter().next().unwrap_or_default();
        let target = self.text(operand, frame)?;
        let (canonical, file_id, nodes) = self.load(&target, frame, &span)?;

        if let Some(start) = self.include_stack.iter().position(|p| *p == canonical) {
            let mut chain: Vec<String> = self.include_stack[start..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            return Err(DiagnosticError::new(
                CompileError::CyclicExpansion(chain),
                &span,
            ));
        }

        let scope = self.definitions.child_scope(frame.scope);
        self.include_stack.push(canonical);
        let result = self.expand_blocks(
            nodes,
            Frame {
                scope,
                file_id,
                depth: frame.depth,
            },
        );
        self.include_stack.pop();
        result
    }

    fn import(&mut self, call: DirectiveCall, frame: Frame) -> Result<()> {
        let span = call.span.clone();
        let operand = operands(call).into_iter().next().unwrap_or_default();
        let target = self.text(operand, frame)?;
        let (canonical, file_id, nodes) = self.load(&target, frame, &span)?;

        let scope = match self.import_scopes.get(&canonical) {
            Some(scope) => *scope,
            None => {
                if let Some(start) = self.import_stack.iter().position(|p| *p == canonical) {
                    let mut chain: Vec<String> = self.import_stack[start..]
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect();
                    chain.push(canonical.display().to_string());
                    return Err(DiagnosticError::new(
                        CompileError::CyclicExpansion(chain),
                        &span,
                    ));
                }

                let scope = self.definitions.root_scope();
                self.import_stack.push(canonical.clone());
                let result = self.evaluate_definitions(
                    nodes,
                    Frame {
                        scope,
                        file_id,
                        depth: frame.depth,
                    },
                );
                self.import_stack.pop();
                result?;
                self.import_scopes.insert(canonical, scope);
                scope
            }
        };

        self.definitions
            .merge(frame.scope, scope)
            .map_err(|(existing, incoming)| {
                let incoming = self.definitions.get(incoming);
                DiagnosticError::new(
                    CompileError::DuplicateDefinition(incoming.name.clone()),
                    &span,
                )
                .with_related(self.definitions.get(existing).span.clone(), "already bound here")
            })
    }

    /// Evaluate only the definition directives of an imported file.
    fn evaluate_definitions(&mut self, nodes: Vec<Node>, frame: Frame) -> Result<()> {
        for node in nodes {
            if let Node::Directive(call) = node {
                if matches!(call.name.as_str(), "define" | "define-template" | "import") {
                    self.directive(call, frame)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Navigation and blocks
    // -----------------------------------------------------------------------

    fn toctree(&mut self, call: DirectiveCall, frame: Frame) -> Result<Vec<Node>> {
        if call.body.is_some() {
            return Err(invalid(&call.span, "toctree", "entries go in arguments, not a body"));
        }
        let mut entries = Vec::new();
        for arg in call.args {
            let entry = match arg {
                Node::Group(items) => match <[Node; 2]>::try_from(items) {
                    Ok([title, target]) => TocEntry {
                        title: Some(self.expand_nodes(vec![title], frame)?),
                        target: self.text(vec![target], frame)?,
                    },
                    Err(_) => {
                        return Err(invalid(
                            &call.span,
                            "toctree",
                            "a titled entry is `(title target)`",
                        ));
                    }
                },
                other => TocEntry {
                    title: None,
                    target: self.text(vec![other], frame)?,
                },
            };
            entries.push(entry);
        }
        Ok(vec![Node::TocTree {
            entries,
            span: call.span,
        }])
    }

    fn admonition(
        &mut self,
        kind: AdmonitionKind,
        call: DirectiveCall,
        frame: Frame,
    ) -> Result<Vec<Node>> {
        let mut operands = operands(call);
        let body = operands.pop().unwrap_or_default();
        let title = match operands.pop() {
            Some(title) => unwrap_paragraph(self.expand_flow(title, frame)?),
            None => vec![Node::text(kind.default_title())],
        };
        let body = self.expand_flow(body, frame)?;
        Ok(vec![Node::Admonition { kind, title, body }])
    }
}

/// Arguments followed by the body, each as its own operand.
fn operands(call: DirectiveCall) -> Vec<Vec<Node>> {
    let mut operands: Vec<Vec<Node>> = call.args.into_iter().map(|arg| vec![arg]).collect();
    if let Some(body) = call.body {
        operands.push(body);
    }
    operands
}

fn invalid(span: &SourceSpan, directive: &str, message: &str) -> DiagnosticError {
    DiagnosticError::new(
        CompileError::InvalidArgument {
            directive: directive.to_string(),
            message: message.to_string(),
        },
        span,
    )
}

/// Group a flat node sequence into blocks: runs of inline nodes become
/// paragraphs, blank runs are dropped.
fn regroup(nodes: Vec<Node>) -> Vec<Node> {
    let mut blocks = Vec::new();
    let mut run = Vec::new();
    for node in nodes {
        if node.is_block() {
            flush_run(&mut run, &mut blocks);
            blocks.push(node);
        } else {
            run.push(node);
        }
    }
    flush_run(&mut run, &mut blocks);
    blocks
}

fn flush_run(run: &mut Vec<Node>, blocks: &mut Vec<Node>) {
    let nodes = trim_inline(merge_text(std::mem::take(run)));
    if !nodes.is_empty() {
        blocks.push(Node::Paragraph(nodes));
    }
}

/// Join adjacent text nodes left behind by expansion.
fn merge_text(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let (Some(Node::Text(prev)), Node::Text(next)) = (out.last_mut(), &node) {
            prev.push_str(next);
            continue;
        }
        out.push(node);
    }
    out
}

fn check_glossary_terms(entries: &[Node]) -> Result<()> {
    let mut seen: HashMap<String, &SourceSpan> = HashMap::new();
    for entry in entries {
        if let Node::GlossaryEntry { term, span, .. } = entry {
            let text = text_content(term);
            if let Some(first) = seen.get(&text) {
                return Err(DiagnosticError::new(
                    CompileError::Structure(format!("duplicate glossary term `{}`", text)),
                    span,
                )
                .with_related((*first).clone(), "first defined here"));
            }
            seen.insert(text, span);
        }
    }
    Ok(())
}

/// Record every explicit heading id of a parsed tree, including headings
/// inside unevaluated directive arguments.
fn reserve_explicit_ids(node: &Node, ids: &mut HashSet<String>) {
    match node {
        Node::Heading(heading) => {
            if let HeadingId::Explicit(id) = &heading.id {
                ids.insert(id.clone());
            }
        }
        Node::Directive(call) => {
            for arg in call.args.iter().chain(call.body.iter().flatten()) {
                reserve_explicit_ids(arg, ids);
            }
        }
        _ => {}
    }
    for child in node.children() {
        reserve_explicit_ids(child, ids);
    }
}

fn render_markdown(source: &str) -> String {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES;
    let parser = CmarkParser::new_ext(source, options);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// The project version truncated to as many components as `pattern` has.
fn version(version: &str, pattern: Option<&str>) -> String {
    match pattern {
        None => version.to_string(),
        Some("") => String::new(),
        Some(pattern) => {
            let wanted = pattern.matches('.').count() + 1;
            version.split('.').take(wanted).collect::<Vec<_>>().join(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryLoader;
    use pretty_assertions::assert_eq;

    fn evaluate(source: &str) -> Result<Vec<Node>> {
        evaluate_with(MemoryLoader::new(), source)
    }

    fn evaluate_with(loader: MemoryLoader, source: &str) -> Result<Vec<Node>> {
        let options = CompileOptions {
            version: "3.4.1".to_string(),
            ..CompileOptions::default()
        };
        evaluate_document(loader, &options, source).map(|doc| doc.nodes)
    }

    fn evaluate_document(
        mut loader: MemoryLoader,
        options: &CompileOptions,
        source: &str,
    ) -> Result<EvaluatedDocument> {
        loader.insert("main.rocket", source);
        let mut sources = SourceMap::new();
        let file_id = sources.add(PathBuf::from("main.rocket"), source.to_string());
        let nodes = Parser::new(source.to_string(), file_id)
            .parse()
            .map_err(|mut errors| DiagnosticError::from(errors.remove(0)))?
            .nodes;
        let mut evaluator = Evaluator::new(&loader, options, &mut sources);
        evaluator.evaluate_document(nodes, file_id)
    }

    fn paragraph(text: &str) -> Vec<Node> {
        vec![Node::Paragraph(vec![Node::text(text)])]
    }

    #[test]
    fn concat_joins_without_separator() {
        assert_eq!(evaluate("(:concat \"a\" \"b\" \"c\")").unwrap(), paragraph("abc"));
    }

    #[test]
    fn version_truncation() {
        assert_eq!(evaluate("(:version)").unwrap(), paragraph("3.4.1"));
        assert_eq!(evaluate("(:version \"x.y\")").unwrap(), paragraph("3.4"));
        assert_eq!(evaluate("v(:version \"\")").unwrap(), paragraph("v"));
        assert_eq!(version("3.4", Some("a.b.c.d")), "3.4");
    }

    #[test]
    fn lazy_define_expands_at_use() {
        let nodes = evaluate("(:define who \"world\")\n\nHello (:who)!").unwrap();
        assert_eq!(nodes, paragraph("Hello world!"));
    }

    #[test]
    fn eager_define() {
        let nodes = evaluate("(:define evaluate v (:concat 1 2))\n\n(:v)").unwrap();
        assert_eq!(nodes, paragraph("12"));
    }

    #[test]
    fn template_with_patterns() {
        let source = "(:define-template greet \"[A-Z][a-z]+\" => Hello **${0}**)\n\n(:greet Ada)";
        let nodes = evaluate(source).unwrap();
        assert_eq!(
            nodes,
            vec![Node::Paragraph(vec![
                Node::text("Hello "),
                Node::Strong(vec![Node::text("Ada")]),
            ])]
        );

        let err = evaluate("(:define-template greet \"[A-Z][a-z]+\" => Hi ${0})\n\n(:greet ada)")
            .unwrap_err();
        assert!(matches!(err.error, CompileError::PatternMismatch { index: 0, .. }));
    }

    #[test]
    fn template_from_string() {
        let nodes =
            evaluate("(:define-template pair \"${0} and ${1}\")\n\n(:pair a b)").unwrap();
        assert_eq!(nodes, paragraph("a and b"));
    }

    #[test]
    fn template_arity_mismatch() {
        let err = evaluate("(:define-template two \"${0}${1}\")\n\n(:two only)").unwrap_err();
        assert_eq!(
            err.error,
            CompileError::Arity {
                directive: "two".to_string(),
                expected: Arity::exactly(2),
                actual: 1,
            }
        );
    }

    #[test]
    fn builtin_arity_mismatch() {
        let err = evaluate("(:define-ref only-id)").unwrap_err();
        assert!(matches!(err.error, CompileError::Arity { actual: 1, .. }));
    }

    #[test]
    fn invalid_pattern_reported_at_definition() {
        let err = evaluate("(:define-template t \"(\" => x)").unwrap_err();
        assert!(matches!(err.error, CompileError::InvalidPattern { .. }));
    }

    #[test]
    fn let_shadows_in_child_scope() {
        let source = "(:define x \"outer\")\n\n(:let ((x \"inner\")) => (:x)) (:x)";
        let nodes = evaluate(source).unwrap();
        assert_eq!(nodes, paragraph("inner outer"));
    }

    #[test]
    fn redefinition_in_same_scope_fails() {
        let err = evaluate("(:define x 1)\n\n(:define x 2)").unwrap_err();
        assert_eq!(err.error, CompileError::DuplicateDefinition("x".to_string()));
        assert!(err.related.is_some());
    }

    #[test]
    fn builtin_names_are_reserved() {
        let err = evaluate("(:define include 1)").unwrap_err();
        assert_eq!(err.error, CompileError::ReservedName("include".to_string()));
    }

    #[test]
    fn undefined_name() {
        let err = evaluate("(:nope)").unwrap_err();
        assert_eq!(err.error, CompileError::UnresolvedName("nope".to_string()));
    }

    #[test]
    fn self_referential_macro() {
        let err = evaluate("(:define loop (:loop))\n\n(:loop)").unwrap_err();
        assert_eq!(
            err.error,
            CompileError::CyclicExpansion(vec!["loop".to_string(), "loop".to_string()])
        );
    }

    #[test]
    fn mutual_recursion_names_the_chain() {
        let err = evaluate("(:define a (:b))\n\n(:define b (:a))\n\n(:a)").unwrap_err();
        assert_eq!(
            err.error,
            CompileError::CyclicExpansion(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn derived_heading_ids_are_unique() {
        let nodes = evaluate("(:h2 \"Setup\")\n\n(:h2 \"Setup\")\n\n(:h2 custom \"Other\")").unwrap();
        let ids: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Heading(h) => h.id.anchor().map(str::to_string),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["setup", "setup-1", "custom"]);
    }

    #[test]
    fn derived_anchor_avoids_later_explicit_id() {
        let nodes = evaluate("(:h2 \"Setup\")\n\n(:h2 setup \"Other\")").unwrap();
        let ids: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Heading(h) => h.id.anchor().map(str::to_string),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["setup-1", "setup"]);
    }

    #[test]
    fn included_explicit_id_colliding_with_derived_anchor() {
        let loader = MemoryLoader::new().with_file("part.rocket", "(:h2 setup \"Other\")");
        let err = evaluate_with(loader, "(:h2 \"Setup\")\n\n(:include \"part\")").unwrap_err();
        assert_eq!(err.error, CompileError::DuplicateReference("setup".to_string()));
    }

    #[test]
    fn concat_keeps_reference_nodes() {
        let nodes = evaluate("(:concat \"See \" (:ref setup))").unwrap();
        let [Node::Paragraph(children)] = nodes.as_slice() else {
            panic!("{:?}", nodes);
        };
        assert_eq!(children[0], Node::text("See "));
        assert!(matches!(&children[1], Node::Ref { id, title: None, .. } if id == "setup"));
    }

    #[test]
    fn macro_arguments_keep_anchor_nodes() {
        let nodes =
            evaluate("(:define-template w \"${0}\")\n\n(:w (:define-ref a \"A\"))").unwrap();
        let mut anchors = 0;
        for node in &nodes {
            node.walk(&mut |n| {
                if matches!(n, Node::Anchor { id, .. } if id == "a") {
                    anchors += 1;
                }
            });
        }
        assert_eq!(anchors, 1);
    }

    #[test]
    fn patterns_accept_a_match_anywhere() {
        let nodes = evaluate("(:define-template t \"[0-9]+\" => v${0})\n\n(:t v12)").unwrap();
        assert_eq!(nodes, paragraph("vv12"));
    }

    #[test]
    fn duplicate_glossary_term_after_evaluation() {
        let source = "(:define t \"a\")\n\n(:glossary ((:t) \"first\") (a \"second\"))";
        let err = evaluate(source).unwrap_err();
        assert_eq!(
            err.error,
            CompileError::Structure("duplicate glossary term `a`".to_string())
        );
        let start = source.find("(a \"second\")").unwrap();
        assert_eq!(err.span.map(|s| s.start), Some(start));
        assert!(err.related.is_some());
    }

    #[test]
    fn template_errors_point_into_the_literal() {
        let source = "(:define-template t \"ok (:bad! x)\")";
        let err = evaluate(source).unwrap_err();
        assert!(matches!(err.error, CompileError::Syntax(_)));
        assert_eq!(err.span.map(|s| s.start), source.find("(:bad!"));

        let escaped = r#"(:define-template t "say \"hi\" (:bad!)")"#;
        let err = evaluate(escaped).unwrap_err();
        assert_eq!(err.span.map(|s| s.start), escaped.find("(:bad!"));
    }

    #[test]
    fn theme_config_sets_metadata() {
        let source = "(:theme-config title \"My page\" layout wide)";
        let doc = evaluate_document(MemoryLoader::new(), &CompileOptions::default(), source).unwrap();
        assert!(doc.nodes.is_empty());
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("My page"));
        assert_eq!(doc.metadata.get("layout").map(String::as_str), Some("wide"));
    }

    #[test]
    fn null_discards_content() {
        assert_eq!(
            evaluate("keep (:null (:undefined-thing)) this").unwrap(),
            paragraph("keep  this")
        );
    }

    #[test]
    fn markdown_renders_to_raw_html() {
        let nodes = evaluate("(:md =>\n*hi*\n)").unwrap();
        assert_eq!(nodes, vec![Node::Raw("<p><em>hi</em></p>\n".to_string())]);
    }

    #[test]
    fn include_splices_target_tree() {
        let loader = MemoryLoader::new().with_file("part.rocket", "(:h2 \"Part\")\n\nBody text.");
        let nodes = evaluate_with(loader, "Intro.\n\n(:include \"part\")").unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[1], Node::Heading(h) if h.level == 2));
    }

    #[test]
    fn include_cycle_is_detected() {
        let loader = MemoryLoader::new().with_file("b.rocket", "(:include \"main\")");
        let err = evaluate_with(loader, "(:include \"b\")").unwrap_err();
        assert!(matches!(err.error, CompileError::CyclicExpansion(ref chain) if chain.len() == 3));
    }

    #[test]
    fn import_binds_definitions_only() {
        let loader = MemoryLoader::new().with_file(
            "macros.rocket",
            "(:h1 \"Ignored\")\n\nignored text\n\n(:define-template shout => **${0}**)",
        );
        let nodes = evaluate_with(loader, "(:import \"macros\")\n\n(:shout hey)").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Paragraph(vec![Node::Strong(vec![Node::text("hey")])])]
        );
    }

    #[test]
    fn import_collision_with_local_definition() {
        let loader = MemoryLoader::new().with_file("defs.rocket", "(:define x 1)");
        let err = evaluate_with(loader, "(:define x 2)\n\n(:import \"defs\")").unwrap_err();
        assert_eq!(err.error, CompileError::DuplicateDefinition("x".to_string()));
    }

    #[test]
    fn same_definition_through_two_imports() {
        let loader = MemoryLoader::new()
            .with_file("base.rocket", "(:define x \"shared\")")
            .with_file("a.rocket", "(:import \"base\")")
            .with_file("b.rocket", "(:import \"base\")");
        let nodes =
            evaluate_with(loader, "(:import \"a\")\n\n(:import \"b\")\n\n(:x)").unwrap();
        assert_eq!(nodes, paragraph("shared"));
    }

    #[test]
    fn depth_limit() {
        let options = CompileOptions {
            max_depth: 3,
            ..CompileOptions::default()
        };
        let source = "(:define a (:b))\n\n(:define b (:c))\n\n(:define c (:d))\n\n(:define d x)\n\n(:a)";
        let err = evaluate_document(MemoryLoader::new(), &options, source).unwrap_err();
        assert_eq!(err.error, CompileError::ExpansionTooDeep(3));
    }
}
