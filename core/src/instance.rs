use indexmap::IndexMap;
use serde::Serialize;

use crate::datatype::Value;

/// Where an attribute value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Present on the tree node.
    Explicit,
    /// The attribute's declared default.
    Default,
    /// The datatype's zero value; the attribute was absent and has no default.
    Implicit,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttributeValue {
    pub value: Value,
    pub origin: Origin,
}

impl AttributeValue {
    pub fn is_implicit(&self) -> bool {
        self.origin == Origin::Implicit
    }
}

/// Bound children sharing one element name.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Children {
    Single(Box<BoundInstance>),
    List(Vec<BoundInstance>),
    /// Identity key (canonical string form) -> instance, in document order.
    Keyed(IndexMap<String, BoundInstance>),
}

impl Children {
    pub fn len(&self) -> usize {
        match self {
            Children::Single(_) => 1,
            Children::List(items) => items.len(),
            Children::Keyed(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instances in document order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &BoundInstance> + '_> {
        match self {
            Children::Single(instance) => Box::new(std::iter::once(instance.as_ref())),
            Children::List(items) => Box::new(items.iter()),
            Children::Keyed(items) => Box::new(items.values()),
        }
    }

    /// Lookup by identity key; only keyed children have keys.
    pub fn get(&self, key: &str) -> Option<&BoundInstance> {
        match self {
            Children::Keyed(items) => items.get(key),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&IndexMap<String, BoundInstance>> {
        match self {
            Children::Keyed(items) => Some(items),
            _ => None,
        }
    }
}

/// Result of a bind: coerced attributes plus recursively bound children.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundInstance {
    element: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    attributes: IndexMap<String, AttributeValue>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    children: IndexMap<String, Children>,
}

impl BoundInstance {
    pub(crate) fn new(
        element: String,
        target: String,
        key: Option<String>,
        attributes: IndexMap<String, AttributeValue>,
        children: IndexMap<String, Children>,
    ) -> Self {
        BoundInstance {
            element,
            target,
            key,
            attributes,
            children,
        }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Identity key in canonical form, when the descriptor is keyed.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).map(|attribute| &attribute.value)
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Mutable access for post-bind hooks.
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeValue> {
        self.attributes.get_mut(name)
    }

    pub fn children(&self, element: &str) -> Option<&Children> {
        self.children.get(element)
    }

    /// Child groups in order of first appearance.
    pub fn child_groups(&self) -> impl Iterator<Item = (&str, &Children)> {
        self.children.iter().map(|(element, children)| (element.as_str(), children))
    }

    pub fn keyed(&self, element: &str) -> Option<&IndexMap<String, BoundInstance>> {
        self.children.get(element).and_then(Children::as_keyed)
    }
}
