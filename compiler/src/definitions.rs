use std::collections::BTreeMap;

use regex::Regex;
use rocket::document::{Node, SourceSpan};

/// Handle to a definition in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId(usize);

/// Handle to a scope in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone)]
pub enum DefinitionKind {
    /// A named value. When `evaluated` is false the nodes are an expression
    /// re-evaluated in the defining scope at each use.
    Value { nodes: Vec<Node>, evaluated: bool },
    /// A macro: a node skeleton with `${n}` placeholders.
    Template {
        skeleton: Vec<Node>,
        patterns: Vec<Regex>,
        arity: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
    /// The scope the definition body is evaluated in.
    pub scope: ScopeId,
    /// Source file of the definition body.
    pub file_id: usize,
    pub span: SourceSpan,
}

impl Definition {
    /// Number of arguments a call must pass.
    pub fn arity(&self) -> usize {
        match &self.kind {
            DefinitionKind::Value { .. } => 0,
            DefinitionKind::Template { arity, .. } => *arity,
        }
    }
}

/// A single scope level: a file, an import, or a `let` body.
#[derive(Debug, Clone, Default)]
struct Scope {
    parent: Option<ScopeId>,
    bindings: BTreeMap<String, DefinitionId>,
}

/// All definitions and scopes of a compilation unit.
#[derive(Debug, Default)]
pub struct DefinitionTable {
    definitions: Vec<Definition>,
    scopes: Vec<Scope>,
}

impl DefinitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scope with no parent, e.g. for a file.
    pub fn root_scope(&mut self) -> ScopeId {
        self.new_scope(None)
    }

    pub fn child_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.new_scope(Some(parent))
    }

    fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            bindings: BTreeMap::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn get(&self, id: DefinitionId) -> &Definition {
        &self.definitions[id.0]
    }

    /// Bind `definition.name` in `scope`. Fails with the existing binding
    /// when the name is already bound in that same scope.
    pub fn define(
        &mut self,
        scope: ScopeId,
        definition: Definition,
    ) -> Result<DefinitionId, DefinitionId> {
        if let Some(existing) = self.scopes[scope.0].bindings.get(&definition.name) {
            return Err(*existing);
        }
        let id = DefinitionId(self.definitions.len());
        self.scopes[scope.0]
            .bindings
            .insert(definition.name.clone(), id);
        self.definitions.push(definition);
        Ok(id)
    }

    /// Copy the bindings of `source` into `target`. Binding the same
    /// definition twice is allowed; a different definition under an
    /// existing name is returned as `(existing, incoming)`.
    pub fn merge(
        &mut self,
        target: ScopeId,
        source: ScopeId,
    ) -> Result<(), (DefinitionId, DefinitionId)> {
        let incoming = self.scopes[source.0].bindings.clone();
        for (name, id) in incoming {
            match self.scopes[target.0].bindings.get(&name) {
                Some(existing) if *existing == id => {}
                Some(existing) => return Err((*existing, id)),
                None => {
                    self.scopes[target.0].bindings.insert(name, id);
                }
            }
        }
        Ok(())
    }

    /// Look up a name, searching from the innermost scope outward.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<DefinitionId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(definition) = scope.bindings.get(name) {
                return Some(*definition);
            }
            current = scope.parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
