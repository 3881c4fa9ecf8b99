pub mod document;
pub mod parser;
pub mod slug;

use crate::document::Node;

/// A parsed `.rocket` source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Top-level nodes in document order.
    pub nodes: Vec<Node>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}
