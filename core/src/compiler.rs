//! Descriptor Compiler: declaration -> validated [`MetadataDescriptor`].
//!
//! Checks here only need the declaration itself. Anything that needs other
//! types (child targets, `keyed-as`, enums) is resolved lazily when the
//! registry is built, so forward references and cycles are fine.

use indexmap::IndexMap;

use crate::datatype::{Datatype, EnumTable};
use crate::declaration::{AttributeModifier, Declaration, Rule, RuleError};
use crate::descriptor::{AttributeRule, ChildRule, MetadataDescriptor, UnknownChildren};
use crate::error::DeclarationError;
use crate::registry::{CompilePass, RegistryBuilder};

#[derive(Default)]
struct PendingAttribute {
    required: Option<bool>,
    datatype: Option<Datatype>,
    default: Option<(String, String)>,
    leaf: bool,
}

impl PendingAttribute {
    fn apply(&mut self, modifier: AttributeModifier, rule: &str) {
        match modifier {
            AttributeModifier::Optional => self.required = Some(false),
            AttributeModifier::Required => self.required = Some(true),
            AttributeModifier::Leaf => self.leaf = true,
            AttributeModifier::Datatype(datatype) => self.datatype = Some(datatype),
            AttributeModifier::Default(value) => self.default = Some((value, rule.to_string())),
        }
    }
}

/// Compile one declaration.
///
/// Rules are applied in order. Rules for the same attribute merge field by
/// field, the last write winning per field, so `@name=optional` followed by
/// `@name=datatype:String` is one optional String attribute.
pub fn compile(declaration: &Declaration) -> Result<MetadataDescriptor, DeclarationError> {
    let element = declaration.element.trim();
    if element.is_empty() {
        return Err(DeclarationError::MalformedRule {
            element: declaration.element.clone(),
            rule: String::new(),
            reason: "declaration has no element name".into(),
        });
    }

    let mut target: Option<String> = None;
    let mut pending: IndexMap<String, PendingAttribute> = IndexMap::new();
    let mut key: Option<String> = None;
    let mut keyed_as: Option<String> = None;
    let mut children: IndexMap<String, ChildRule> = IndexMap::new();
    let mut unknown_children = UnknownChildren::Reject;

    for raw in &declaration.rules {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        let rule = Rule::parse(raw).map_err(|err| match err {
            RuleError::Malformed(reason) => DeclarationError::MalformedRule {
                element: element.to_string(),
                rule: text.to_string(),
                reason: reason.to_string(),
            },
            RuleError::UnknownDatatype(datatype) => DeclarationError::UnknownDatatype {
                element: element.to_string(),
                rule: text.to_string(),
                datatype,
            },
        })?;

        match rule {
            Rule::Target(name) => {
                if target.replace(name).is_some() {
                    return Err(DeclarationError::DuplicateTarget {
                        element: element.to_string(),
                        rule: text.to_string(),
                    });
                }
            }
            Rule::Attribute { name, modifier } => {
                pending.entry(name).or_default().apply(modifier, text);
            }
            Rule::Key(attribute) => {
                if key.replace(attribute).is_some() {
                    return Err(duplicate_rule(element, text));
                }
            }
            Rule::KeyedAs(name) => {
                if keyed_as.replace(name).is_some() {
                    return Err(duplicate_rule(element, text));
                }
            }
            Rule::Child {
                element: child,
                target,
                multiplicity,
            } => {
                if children.contains_key(&child) {
                    return Err(DeclarationError::DuplicateChildElement {
                        element: element.to_string(),
                        child,
                    });
                }
                children.insert(child, ChildRule { target, multiplicity });
            }
            Rule::IgnoreUnknown => unknown_children = UnknownChildren::Ignore,
        }
    }

    let target = target.ok_or_else(|| DeclarationError::MissingTarget {
        element: element.to_string(),
    })?;

    if let Some(key) = &key {
        let Some(attribute) = pending.get(key) else {
            return Err(DeclarationError::UndeclaredKey {
                element: element.to_string(),
                attribute: key.clone(),
            });
        };
        let datatype = attribute.datatype.clone().unwrap_or(Datatype::String);
        if !datatype.is_comparable() {
            return Err(DeclarationError::IncomparableKey {
                element: element.to_string(),
                attribute: key.clone(),
                datatype,
            });
        }
        if attribute.default.is_some() {
            return Err(DeclarationError::KeyWithDefault {
                element: element.to_string(),
                attribute: key.clone(),
            });
        }
    }

    if keyed_as.as_deref() == Some(target.as_str()) && key.is_none() {
        return Err(DeclarationError::KeyedAsWithoutKey {
            element: element.to_string(),
            target,
        });
    }

    let empty_enums = EnumTable::default();
    let mut attributes = IndexMap::with_capacity(pending.len());
    for (name, attribute) in pending {
        let datatype = attribute.datatype.unwrap_or(Datatype::String);
        // The identity key always needs a value, whatever the presence marker says.
        let is_key = key.as_deref() == Some(name.as_str());
        let default = match attribute.default {
            Some((value, rule)) => {
                if attribute.required == Some(true) {
                    return Err(DeclarationError::MalformedRule {
                        element: element.to_string(),
                        rule,
                        reason: format!("`@{name}` is required and cannot declare a default"),
                    });
                }
                // Enum defaults are checked once the registry knows the enum.
                if !matches!(datatype, Datatype::Enum(_)) {
                    if let Err(err) = datatype.coerce(&value, &empty_enums) {
                        return Err(DeclarationError::InvalidDefault {
                            element: element.to_string(),
                            attribute: name,
                            value,
                            datatype,
                            reason: err.to_string(),
                        });
                    }
                }
                Some(value)
            }
            None => None,
        };
        let required = is_key || attribute.required.unwrap_or(default.is_none());

        attributes.insert(
            name.clone(),
            AttributeRule {
                name,
                required,
                default,
                datatype,
                leaf: attribute.leaf,
            },
        );
    }

    Ok(MetadataDescriptor::new(
        target,
        element.to_string(),
        attributes,
        key,
        keyed_as,
        children,
        unknown_children,
    ))
}

/// Declare every declaration, then resolve cross-references leniently.
///
/// A declaration that fails, or depends on one that failed, is left out of
/// the registry and reported; the rest are registered.
pub fn compile_pass(declarations: impl IntoIterator<Item = Declaration>) -> CompilePass {
    let mut builder = RegistryBuilder::default();
    let mut errors = Vec::new();
    for declaration in declarations {
        if let Err(err) = builder.declare(&declaration) {
            errors.push(err);
        }
    }
    let mut pass = builder.build_partial();
    errors.append(&mut pass.errors);
    pass.errors = errors;
    pass
}

fn duplicate_rule(element: &str, rule: &str) -> DeclarationError {
    DeclarationError::DuplicateRule {
        element: element.to_string(),
        rule: rule.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Multiplicity;

    fn widget() -> Declaration {
        Declaration::new(
            "widget",
            [
                "target=Widget",
                "@name=optional",
                "@name=datatype:String",
                "@name=leaf",
                "key=@name",
                "keyed-as=Widget",
                "<widget>=Widget",
            ],
        )
    }

    #[test]
    fn merges_attribute_rules() {
        let descriptor = compile(&widget()).unwrap();
        assert_eq!(descriptor.target(), "Widget");
        assert_eq!(descriptor.element(), "widget");
        assert_eq!(descriptor.attributes().len(), 1);

        let name = descriptor.attribute("name").unwrap();
        assert_eq!(name.datatype, Datatype::String);
        assert!(name.leaf);
        // promoted by `key=@name`
        assert!(name.required);
        assert_eq!(descriptor.key().map(|k| k.name.as_str()), Some("name"));
        assert_eq!(descriptor.keyed_as(), Some("Widget"));
        assert_eq!(
            descriptor.child("widget"),
            Some(&ChildRule {
                target: "Widget".into(),
                multiplicity: Multiplicity::Single,
            })
        );
    }

    #[test]
    fn keeps_declaration_order() {
        let decl = Declaration::new(
            "listener",
            [
                "target=Listener",
                "@port=datatype:Integer",
                "@address=optional",
                "@port=leaf",
                "@secure=default:false",
                "@secure=datatype:Boolean",
            ],
        );
        let descriptor = compile(&decl).unwrap();
        let names: Vec<_> = descriptor.attributes().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["port", "address", "secure"]);

        let port = descriptor.attribute("port").unwrap();
        assert!(port.required);
        let address = descriptor.attribute("address").unwrap();
        assert!(!address.required);
        assert_eq!(address.datatype, Datatype::String);
        let secure = descriptor.attribute("secure").unwrap();
        assert!(!secure.required);
        assert_eq!(secure.default.as_deref(), Some("false"));
    }

    #[test]
    fn string_defaults_are_kept_verbatim() {
        let decl = Declaration::new("banner", ["target=Banner", "@text=default:  two words  "]);
        let descriptor = compile(&decl).unwrap();
        assert_eq!(
            descriptor.attribute("text").unwrap().default.as_deref(),
            Some("  two words  ")
        );
    }

    #[test]
    fn target_must_appear_once() {
        let missing = Declaration::new("x", ["@a=optional"]);
        assert_eq!(
            compile(&missing),
            Err(DeclarationError::MissingTarget { element: "x".into() })
        );

        let twice = Declaration::new("x", ["target=A", "target=B"]);
        assert_eq!(
            compile(&twice),
            Err(DeclarationError::DuplicateTarget {
                element: "x".into(),
                rule: "target=B".into(),
            })
        );
    }

    #[test]
    fn validates_keys() {
        let undeclared = Declaration::new("x", ["target=X", "key=@id"]);
        assert!(matches!(
            compile(&undeclared),
            Err(DeclarationError::UndeclaredKey { attribute, .. }) if attribute == "id"
        ));

        let incomparable = Declaration::new("x", ["target=X", "@ratio=datatype:Double", "key=@ratio"]);
        assert!(matches!(
            compile(&incomparable),
            Err(DeclarationError::IncomparableKey { datatype: Datatype::Double, .. })
        ));

        let defaulted = Declaration::new("x", ["target=X", "@id=default:a", "key=@id"]);
        assert!(matches!(compile(&defaulted), Err(DeclarationError::KeyWithDefault { .. })));

        let self_keyed = Declaration::new("x", ["target=X", "keyed-as=X"]);
        assert!(matches!(compile(&self_keyed), Err(DeclarationError::KeyedAsWithoutKey { .. })));

        let twice = Declaration::new("x", ["target=X", "@id=required", "key=@id", "key=@id"]);
        assert!(matches!(compile(&twice), Err(DeclarationError::DuplicateRule { .. })));
    }

    #[test]
    fn rejects_bad_defaults() {
        let decl = Declaration::new("x", ["target=X", "@port=datatype:Integer", "@port=default:eighty"]);
        assert!(matches!(
            compile(&decl),
            Err(DeclarationError::InvalidDefault { attribute, value, .. })
                if attribute == "port" && value == "eighty"
        ));

        let required = Declaration::new("x", ["target=X", "@port=required", "@port=default:80"]);
        assert!(matches!(
            compile(&required),
            Err(DeclarationError::MalformedRule { rule, .. }) if rule == "@port=default:80"
        ));
    }

    #[test]
    fn reports_offending_rule() {
        let decl = Declaration::new("x", ["target=X", "@a=datatype:Decimal"]);
        assert_eq!(
            compile(&decl),
            Err(DeclarationError::UnknownDatatype {
                element: "x".into(),
                rule: "@a=datatype:Decimal".into(),
                datatype: "Decimal".into(),
            })
        );

        let duplicate_child = Declaration::new("x", ["target=X", "<a>=A", "<a>=collection:A"]);
        assert!(matches!(
            compile(&duplicate_child),
            Err(DeclarationError::DuplicateChildElement { child, .. }) if child == "a"
        ));
    }

    #[test]
    fn wildcard_ignore_is_recorded() {
        let decl = Declaration::new("x", ["target=X", "<*>=ignore"]);
        assert_eq!(compile(&decl).unwrap().unknown_children(), UnknownChildren::Ignore);
    }
}
