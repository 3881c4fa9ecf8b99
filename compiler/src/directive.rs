use std::fmt;

use rocket::parser::STRUCTURAL_DIRECTIVES;

/// Accepted number of positional arguments. A `=>` body counts as one
/// trailing argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Arity {
            min: n,
            max: Some(n),
        }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Arity {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Arity { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.is_none_or(|max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

/// The closed set of directives the evaluator implements itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Concat,
    Include,
    Import,
    Link,
    Figure,
    Define,
    DefineTemplate,
    Let,
    DefineRef,
    Ref,
    TocTree,
    Note,
    Warning,
    Markdown,
    ThemeConfig,
    Version,
    Null,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "concat" => Builtin::Concat,
            "include" => Builtin::Include,
            "import" => Builtin::Import,
            "link" => Builtin::Link,
            "figure" => Builtin::Figure,
            "define" => Builtin::Define,
            "define-template" => Builtin::DefineTemplate,
            "let" => Builtin::Let,
            "define-ref" => Builtin::DefineRef,
            "ref" => Builtin::Ref,
            "toctree" => Builtin::TocTree,
            "note" => Builtin::Note,
            "warning" => Builtin::Warning,
            "md" => Builtin::Markdown,
            "theme-config" => Builtin::ThemeConfig,
            "version" => Builtin::Version,
            // Tables are not rendered yet; their content is dropped.
            "null" | "table" => Builtin::Null,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Concat => "concat",
            Builtin::Include => "include",
            Builtin::Import => "import",
            Builtin::Link => "link",
            Builtin::Figure => "figure",
            Builtin::Define => "define",
            Builtin::DefineTemplate => "define-template",
            Builtin::Let => "let",
            Builtin::DefineRef => "define-ref",
            Builtin::Ref => "ref",
            Builtin::TocTree => "toctree",
            Builtin::Note => "note",
            Builtin::Warning => "warning",
            Builtin::Markdown => "md",
            Builtin::ThemeConfig => "theme-config",
            Builtin::Version => "version",
            Builtin::Null => "null",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Builtin::Concat | Builtin::TocTree | Builtin::ThemeConfig | Builtin::Null => {
                Arity::at_least(0)
            }
            Builtin::Include | Builtin::Import | Builtin::Markdown => Arity::exactly(1),
            Builtin::Link | Builtin::Ref | Builtin::Note | Builtin::Warning => {
                Arity::between(1, 2)
            }
            Builtin::Figure => Arity::between(2, 3),
            Builtin::Define => Arity::between(2, 3),
            Builtin::DefineTemplate => Arity::at_least(2),
            Builtin::Let => Arity::at_least(1),
            Builtin::DefineRef => Arity::exactly(2),
            Builtin::Version => Arity::between(0, 1),
        }
    }
}

/// Names user definitions may not take.
pub fn is_reserved(name: &str) -> bool {
    Builtin::from_name(name).is_some() || STRUCTURAL_DIRECTIVES.contains(&name)
}
