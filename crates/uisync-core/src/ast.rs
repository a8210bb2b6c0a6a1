use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PropValue, Side};

/// Source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// Parser output for one source file.
///
/// The sync core never inspects the tree; it only caches it and hands it back to the side's
/// [`crate::AstToIr`] converter. The node shape is deliberately generic so parsers for either
/// framework can fill it in without a shared grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub side: Side,
    pub root: AstNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, PropValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AstNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl AstNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            span: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: PropValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: AstNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_span(mut self, line: u32, column: u32) -> Self {
        self.span = Some(Span { line, column });
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&PropValue> {
        self.attributes.get(key)
    }
}

impl Ast {
    /// Rough in-memory footprint, estimated from the serialized payload size.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}
