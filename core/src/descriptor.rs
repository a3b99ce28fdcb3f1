use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::datatype::Datatype;

/// How one attribute is read from a tree node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRule {
    pub name: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub leaf: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    /// At most one occurrence, unless the child type is keyed.
    Single,
    /// Zero or more occurrences, in document order.
    Collection,
}

/// Child element name -> type binding.
///
/// Holds the type *name*; the descriptor is looked up in the registry when
/// binding, which is what lets a type contain itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRule {
    pub target: String,
    pub multiplicity: Multiplicity,
}

/// What the binder does with child elements the descriptor does not map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownChildren {
    #[default]
    Reject,
    Ignore,
}

/// Compiled, immutable schema for one configuration type.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataDescriptor {
    target: String,
    element: String,
    attributes: IndexMap<String, AttributeRule>,
    key: Option<String>,
    keyed_as: Option<String>,
    children: IndexMap<String, ChildRule>,
    unknown_children: UnknownChildren,
}

impl MetadataDescriptor {
    pub(crate) fn new(
        target: String,
        element: String,
        attributes: IndexMap<String, AttributeRule>,
        key: Option<String>,
        keyed_as: Option<String>,
        children: IndexMap<String, ChildRule>,
        unknown_children: UnknownChildren,
    ) -> Self {
        MetadataDescriptor {
            target,
            element,
            attributes,
            key,
            keyed_as,
            children,
            unknown_children,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    /// Attribute rules in declaration order.
    pub fn attributes(&self) -> impl ExactSizeIterator<Item = &AttributeRule> {
        self.attributes.values()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeRule> {
        self.attributes.get(name)
    }

    /// The identity-key attribute, if this type is keyed.
    pub fn key(&self) -> Option<&AttributeRule> {
        self.key.as_deref().and_then(|key| self.attributes.get(key))
    }

    pub fn keyed_as(&self) -> Option<&str> {
        self.keyed_as.as_deref()
    }

    pub fn children(&self) -> impl ExactSizeIterator<Item = (&str, &ChildRule)> {
        self.children.iter().map(|(element, rule)| (element.as_str(), rule))
    }

    pub fn child(&self, element: &str) -> Option<&ChildRule> {
        self.children.get(element)
    }

    pub fn unknown_children(&self) -> UnknownChildren {
        self.unknown_children
    }

    /// Type names this descriptor needs resolved in its registry.
    pub(crate) fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.children
            .values()
            .map(|rule| rule.target.as_str())
            .chain(self.keyed_as.as_deref())
    }
}
