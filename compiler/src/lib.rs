pub mod definitions;
pub mod directive;
pub mod error;
pub mod evaluator;
pub mod page;
pub mod pattern;
pub mod references;
pub mod render;
pub mod source;
pub mod unit;

pub use error::{CompileError, DiagnosticError};
pub use page::{Entry, Page};
pub use render::{Highlighter, NoHighlight};
pub use source::{FsLoader, MemoryLoader, SourceLoader, SourceMap};
pub use unit::{CompileOptions, Compiler};
