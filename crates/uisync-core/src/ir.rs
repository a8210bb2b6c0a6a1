//! Framework-agnostic intermediate representation.
//!
//! Both sides convert into and generate from [`ComponentIr`]. Nodes are a closed, tagged set of
//! kinds; anything framework-specific rides along in a [`Props`] map restricted to
//! [`PropValue`]'s primitive variants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the IR schema written into every [`ComponentIr`].
///
/// Bump this when the serialized shape of the IR changes; stored versions with a different
/// schema are still readable as history but fail validation.
pub const IR_SCHEMA_VERSION: u32 = 1;

pub type Props = BTreeMap<String, PropValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropValue>),
    Object(BTreeMap<String, PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Column,
    Row,
    Stack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IrNode {
    Container {
        layout: Layout,
        #[serde(default)]
        props: Props,
        #[serde(default)]
        children: Vec<IrNode>,
    },
    Text {
        content: String,
        #[serde(default)]
        props: Props,
    },
    Button {
        label: String,
        #[serde(default)]
        on_press: Option<String>,
        #[serde(default)]
        props: Props,
    },
    Image {
        source: String,
        #[serde(default)]
        props: Props,
    },
    Input {
        #[serde(default)]
        binding: Option<String>,
        #[serde(default)]
        props: Props,
    },
    List {
        item_binding: String,
        template: Box<IrNode>,
        #[serde(default)]
        props: Props,
    },
    /// Reference to another component (possibly another artifact).
    Component {
        name: String,
        #[serde(default)]
        props: Props,
        #[serde(default)]
        children: Vec<IrNode>,
    },
}

impl IrNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            IrNode::Container { .. } => "container",
            IrNode::Text { .. } => "text",
            IrNode::Button { .. } => "button",
            IrNode::Image { .. } => "image",
            IrNode::Input { .. } => "input",
            IrNode::List { .. } => "list",
            IrNode::Component { .. } => "component",
        }
    }

    pub fn props(&self) -> &Props {
        match self {
            IrNode::Container { props, .. }
            | IrNode::Text { props, .. }
            | IrNode::Button { props, .. }
            | IrNode::Image { props, .. }
            | IrNode::Input { props, .. }
            | IrNode::List { props, .. }
            | IrNode::Component { props, .. } => props,
        }
    }

    /// Direct children, with a list's template treated as its only child.
    pub fn children(&self) -> Vec<&IrNode> {
        match self {
            IrNode::Container { children, .. } | IrNode::Component { children, .. } => {
                children.iter().collect()
            }
            IrNode::List { template, .. } => vec![template.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Pre-order traversal of this node and all descendants.
    pub fn walk(&self, visit: &mut dyn FnMut(&IrNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    pub initial: PropValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandler {
    pub name: String,
    /// Opaque action description carried verbatim between sides.
    pub action: String,
}

/// One component, in IR form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentIr {
    pub schema_version: u32,
    pub name: String,
    pub root: IrNode,
    #[serde(default)]
    pub state: Vec<StateField>,
    #[serde(default)]
    pub events: Vec<EventHandler>,
}

impl ComponentIr {
    pub fn new(name: impl Into<String>, root: IrNode) -> Self {
        Self {
            schema_version: IR_SCHEMA_VERSION,
            name: name.into(),
            root,
            state: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Canonical serialized form. Maps are `BTreeMap`s, so equal IRs always serialize to equal
    /// bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// SHA-256 over [`Self::canonical_bytes`], lowercase hex.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn estimated_size(&self) -> usize {
        self.canonical_bytes().len()
    }
}
