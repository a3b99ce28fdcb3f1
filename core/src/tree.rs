use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Read-only view of one element of a configuration tree.
///
/// The binder only borrows nodes for the duration of a bind, so any storage
/// (a parsed document, a message, an owned [`Node`]) can implement this.
pub trait TreeNode {
    fn element_name(&self) -> &str;

    /// Raw value of an attribute.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// All attributes in document order.
    fn attributes(&self) -> impl Iterator<Item = (&str, &str)>;

    /// Child elements in document order.
    fn children(&self) -> impl Iterator<Item = &Self>;
}

/// Owned tree node, serializable as
/// `{"name": "...", "attributes": {...}, "children": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }
}

impl TreeNode for Node {
    fn element_name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn children(&self) -> impl Iterator<Item = &Self> {
        self.children.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_keeps_document_order() {
        let json = r#"{
            "name": "server",
            "attributes": {"name": "web", "port": "8080", "address": "0.0.0.0"},
            "children": [{"name": "listener"}, {"name": "property"}]
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let attributes: Vec<_> = node.attributes().map(|(k, _)| k).collect();
        assert_eq!(attributes, ["name", "port", "address"]);
        let children: Vec<_> = node.children().map(TreeNode::element_name).collect();
        assert_eq!(children, ["listener", "property"]);
        assert_eq!(node.attribute("port"), Some("8080"));
    }
}
