//! Seeding from a platform device tree.
//!
//! Some platforms hand over a tree of named nodes, each carrying properties,
//! before the backing file is reachable. [`import_tree`] flattens it into
//! flat keys: properties of the root node are global, properties of a child
//! are namespaced by the path of node names leading to it.
//!
//! ```text
//! options
//! ├── boot-args = "-v"                    -> boot-args
//! └── 7C436110-AB2A-4BBB-A880-FE41995C9F82
//!     └── csr-active-config = <67000000>  -> 7C436110-...:csr-active-config
//! ```
//!
//! The `name` property every node carries describes the node itself and is
//! skipped.

use serde::{Deserialize, Serialize};

use crate::namespace::{encode, join_segment};
use crate::value::{Dictionary, Value};

/// Property holding a node's own name.
pub const NAME_PROPERTY: &str = "name";

/// Read access to a host's property tree.
pub trait TreeSource {
    type Node;

    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    fn properties(&self, node: &Self::Node) -> Vec<(String, Value)>;

    fn node_name(&self, node: &Self::Node) -> String;
}

/// Flatten the tree below `root` into `(flat key, value)` pairs.
///
/// Children are visited before the node's own properties.
pub fn import_tree<T: TreeSource>(tree: &T, root: &T::Node) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    import_node(tree, root, None, &mut out);
    out
}

fn import_node<T: TreeSource>(
    tree: &T,
    node: &T::Node,
    prefix: Option<&str>,
    out: &mut Vec<(String, Value)>,
) {
    for child in tree.children(node) {
        let child_prefix = join_segment(prefix, &tree.node_name(&child));
        import_node(tree, &child, Some(&child_prefix), out);
    }

    for (key, value) in tree.properties(node) {
        if key == NAME_PROPERTY {
            continue;
        }
        push_property(prefix, key, value, out);
    }
}

/// A dictionary-valued property is treated like a child node.
fn push_property(prefix: Option<&str>, key: String, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Dictionary(dict) => {
            let nested = join_segment(prefix, &key);
            for (inner_key, inner_value) in dict {
                push_property(Some(&nested), inner_key, inner_value, out);
            }
        }
        other => out.push((encode(prefix, &key), other)),
    }
}

/// Owned tree node, e.g. deserialized from JSON.
///
/// ```json
/// {
///   "name": "options",
///   "properties": [["boot-args", {"type": "string", "value": "-v"}]],
///   "children": []
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(default)]
    pub properties: Dictionary,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value.into());
        self
    }

    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }
}

/// [`TreeSource`] over owned [`TreeNode`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnedTree;

impl TreeSource for OwnedTree {
    type Node = TreeNode;

    fn children(&self, node: &TreeNode) -> Vec<TreeNode> {
        node.children.clone()
    }

    fn properties(&self, node: &TreeNode) -> Vec<(String, Value)> {
        node.properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn node_name(&self, node: &TreeNode) -> String {
        node.name.clone()
    }
}
