//! Serializable form of a compiled registry.
//!
//! A snapshot stores every descriptor in its compiled shape so tooling can
//! inspect it. Restoring does not trust that shape: each record is turned
//! back into declaration rules and compiled again.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::datatype::EnumDeclaration;
use crate::declaration::Declaration;
use crate::descriptor::{AttributeRule, ChildRule, Multiplicity, UnknownChildren};
use crate::error::DeclarationErrors;
use crate::registry::Registry;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Element name -> descriptor, in registration order.
    pub descriptors: IndexMap<String, DescriptorRecord>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub enums: IndexMap<String, Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub target: String,
    #[serde(default)]
    pub attributes: Vec<AttributeRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyed_as: Option<String>,
    #[serde(default)]
    pub children: IndexMap<String, ChildRule>,
    #[serde(default)]
    pub unknown_children: UnknownChildren,
}

impl RegistrySnapshot {
    pub fn capture(registry: &Registry) -> Self {
        let descriptors = registry
            .descriptors()
            .map(|descriptor| {
                let record = DescriptorRecord {
                    target: descriptor.target().to_string(),
                    attributes: descriptor.attributes().cloned().collect(),
                    key: descriptor.key().map(|key| key.name.clone()),
                    keyed_as: descriptor.keyed_as().map(String::from),
                    children: descriptor
                        .children()
                        .map(|(element, rule)| (element.to_string(), rule.clone()))
                        .collect(),
                    unknown_children: descriptor.unknown_children(),
                };
                (descriptor.element().to_string(), record)
            })
            .collect();

        let enums = registry
            .enums()
            .iter()
            .map(|(name, variants)| (name.to_string(), variants.to_vec()))
            .collect();

        RegistrySnapshot { descriptors, enums }
    }

    /// Declarations equivalent to the recorded descriptors.
    pub fn declarations(&self) -> Vec<Declaration> {
        self.descriptors
            .iter()
            .map(|(element, record)| Declaration::new(element.as_str(), record.rules()))
            .collect()
    }

    /// Recompile the snapshot. Enums are declared before any descriptor and
    /// the build is strict.
    pub fn restore(self) -> Result<Registry, DeclarationErrors> {
        let declarations = self.declarations();
        let mut builder = Registry::builder();
        let mut errors = Vec::new();

        for (name, variants) in self.enums {
            if let Err(err) = builder.declare_enum(EnumDeclaration { name, variants }) {
                errors.push(err);
            }
        }
        for declaration in &declarations {
            if let Err(err) = builder.declare(declaration) {
                errors.push(err);
            }
        }
        if !errors.is_empty() {
            return Err(DeclarationErrors::new(errors));
        }
        builder.build()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl DescriptorRecord {
    fn rules(&self) -> Vec<String> {
        let mut rules = vec![format!("target={}", self.target)];

        for attribute in &self.attributes {
            let name = &attribute.name;
            rules.push(format!("@{name}=datatype:{}", attribute.datatype));
            rules.push(match (&attribute.default, attribute.required) {
                (Some(default), _) => format!("@{name}=default:{default}"),
                (None, true) => format!("@{name}=required"),
                (None, false) => format!("@{name}=optional"),
            });
            if attribute.leaf {
                rules.push(format!("@{name}=leaf"));
            }
        }

        if let Some(key) = &self.key {
            rules.push(format!("key=@{key}"));
        }
        if let Some(keyed_as) = &self.keyed_as {
            rules.push(format!("keyed-as={keyed_as}"));
        }
        for (element, child) in &self.children {
            rules.push(match child.multiplicity {
                Multiplicity::Single => format!("<{element}>={}", child.target),
                Multiplicity::Collection => format!("<{element}>=collection:{}", child.target),
            });
        }
        if self.unknown_children == UnknownChildren::Ignore {
            rules.push("<*>=ignore".to_string());
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .declare_enum(EnumDeclaration::new("Level", ["info", "debug"]))
            .unwrap();
        for declaration in [
            Declaration::new(
                "domain",
                [
                    "target=Domain",
                    "@level=datatype:enum:Level",
                    "@level=default:info",
                    "<server>=collection:Server",
                    "<*>=ignore",
                ],
            ),
            Declaration::new(
                "server",
                [
                    "target=Server",
                    "@name=datatype:String",
                    "key=@name",
                    "@port=datatype:Integer",
                    "@port=optional",
                    "@config-ref=leaf",
                ],
            ),
        ] {
            builder.declare(&declaration).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn restore_reproduces_descriptors() {
        let original = registry();
        let snapshot = RegistrySnapshot::capture(&original);
        let restored = snapshot.clone().restore().unwrap();

        for descriptor in original.descriptors() {
            assert_eq!(restored.get(descriptor.element()), Some(descriptor));
        }
        assert_eq!(RegistrySnapshot::capture(&restored), snapshot);
    }

    #[test]
    fn restore_revalidates() {
        let mut snapshot = RegistrySnapshot::capture(&registry());
        snapshot.enums.clear();
        let errors = snapshot.restore().unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn json_is_readable() {
        let json = RegistrySnapshot::capture(&registry()).to_json().unwrap();
        assert!(json.contains("\"datatype\": \"enum:Level\""));
        assert!(json.contains("\"unknown_children\": \"ignore\""));
        let parsed = RegistrySnapshot::from_json(&json).unwrap();
        assert_eq!(parsed.descriptors.len(), 2);
    }
}
