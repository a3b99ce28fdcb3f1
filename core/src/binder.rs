//! Runtime Binder: descriptor + tree node -> [`BoundInstance`].
//!
//! Binding is a pure traversal. It reads the registry and the borrowed tree,
//! performs no I/O and keeps nothing once it returns, so one [`Registry`] can
//! serve any number of concurrent binds.

use std::collections::HashMap;

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::config::Configured;
use crate::descriptor::{MetadataDescriptor, Multiplicity, UnknownChildren};
use crate::error::{BindingError, BindingErrorKind, ElementPath};
use crate::extract::FromBound;
use crate::instance::{AttributeValue, BoundInstance, Children, Origin};
use crate::registry::Registry;
use crate::tree::TreeNode;

/// Optional user logic run on an instance after it is structurally bound.
pub trait BindHook: Send + Sync {
    fn after_bind(&self, instance: &mut BoundInstance) -> anyhow::Result<()>;
}

impl<F> BindHook for F
where
    F: Fn(&mut BoundInstance) -> anyhow::Result<()> + Send + Sync,
{
    fn after_bind(&self, instance: &mut BoundInstance) -> anyhow::Result<()> {
        self(instance)
    }
}

pub struct Binder<'r> {
    registry: &'r Registry,
    hooks: HashMap<String, Box<dyn BindHook + 'r>>,
}

/// Where a bound child goes within its element group.
enum Slot {
    Single,
    List,
    Keyed(String),
}

impl<'r> Binder<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Binder {
            registry,
            hooks: HashMap::new(),
        }
    }

    /// Run `hook` after every instance of `element` is bound.
    pub fn with_hook(mut self, element: impl Into<String>, hook: impl BindHook + 'r) -> Self {
        self.hooks.insert(element.into(), Box::new(hook));
        self
    }

    /// Bind a tree using the descriptor registered for its root element.
    pub fn bind_root<N: TreeNode>(&self, node: &N) -> Result<BoundInstance, BindingError> {
        let Some(descriptor) = self.registry.get(node.element_name()) else {
            let mut path = ElementPath::default();
            path.push(node.element_name());
            return Err(BindingError::new(
                path,
                BindingErrorKind::UnresolvedElement {
                    element: node.element_name().to_string(),
                },
            ));
        };
        self.bind(descriptor, node)
    }

    pub fn bind<N: TreeNode>(
        &self,
        descriptor: &MetadataDescriptor,
        node: &N,
    ) -> Result<BoundInstance, BindingError> {
        let mut path = ElementPath::default();
        self.bind_at(descriptor, node, &mut path)
    }

    /// Bind through a type's stub and convert the result.
    pub fn bind_as<T: Configured + FromBound, N: TreeNode>(&self, node: &N) -> Result<T, BindingError> {
        let descriptor = T::descriptor(self.registry).ok_or_else(|| {
            let mut path = ElementPath::default();
            path.push(node.element_name());
            BindingError::new(
                path,
                BindingErrorKind::UnresolvedDescriptor {
                    target: T::TARGET.to_string(),
                },
            )
        })?;
        let instance = self.bind(descriptor, node)?;
        T::from_bound(&instance)
    }

    fn bind_at<N: TreeNode>(
        &self,
        descriptor: &MetadataDescriptor,
        node: &N,
        path: &mut ElementPath,
    ) -> Result<BoundInstance, BindingError> {
        path.push(node.element_name());
        if node.element_name() != descriptor.element() {
            return Err(fail(
                path,
                BindingErrorKind::ElementMismatch {
                    expected: descriptor.element().to_string(),
                    found: node.element_name().to_string(),
                },
            ));
        }
        let identity = self.registry.identity_key(descriptor);
        if let Some(raw) = identity.and_then(|key| node.attribute(&key.name)) {
            path.set_key(raw.to_string());
        }
        tracing::trace!(path = %path, target = %descriptor.target(), "binding element");

        let attributes = self.bind_attributes(descriptor, node, path)?;
        let children = self.bind_children(descriptor, node, path)?;

        let key = identity
            .and_then(|key| attributes.get(&key.name))
            .map(|value| value.value.to_canonical());
        let mut instance = BoundInstance::new(
            descriptor.element().to_string(),
            descriptor.target().to_string(),
            key,
            attributes,
            children,
        );
        if let Some(hook) = self.hooks.get(descriptor.element()) {
            hook.after_bind(&mut instance).map_err(|err| {
                fail(
                    path,
                    BindingErrorKind::Hook {
                        element: descriptor.element().to_string(),
                        message: format!("{err:#}"),
                    },
                )
            })?;
        }

        path.pop();
        Ok(instance)
    }

    fn bind_attributes<N: TreeNode>(
        &self,
        descriptor: &MetadataDescriptor,
        node: &N,
        path: &ElementPath,
    ) -> Result<IndexMap<String, AttributeValue>, BindingError> {
        let enums = self.registry.enums();
        let mut attributes = IndexMap::with_capacity(descriptor.attributes().len());

        for rule in descriptor.attributes() {
            let (raw, origin) = match (node.attribute(&rule.name), &rule.default) {
                (Some(raw), _) => (Some(raw), Origin::Explicit),
                (None, _) if rule.required => {
                    return Err(fail(
                        path,
                        BindingErrorKind::MissingAttribute {
                            attribute: rule.name.clone(),
                            element: descriptor.element().to_string(),
                        },
                    ));
                }
                (None, Some(default)) => (Some(default.as_str()), Origin::Default),
                (None, None) => (None, Origin::Implicit),
            };

            let coerced = match raw {
                Some(raw) => {
                    if rule.leaf && origin == Origin::Explicit && !is_reference(raw) {
                        return Err(fail(
                            path,
                            BindingErrorKind::InvalidLeaf {
                                attribute: rule.name.clone(),
                                value: raw.to_string(),
                            },
                        ));
                    }
                    rule.datatype.coerce(raw, enums).map_err(|err| (raw, err))
                }
                None => rule.datatype.zero(enums).map_err(|err| ("", err)),
            };
            let value = coerced.map_err(|(raw, err)| {
                fail(
                    path,
                    BindingErrorKind::Coercion {
                        attribute: rule.name.clone(),
                        value: raw.to_string(),
                        expected: rule.datatype.clone(),
                        reason: err.to_string(),
                    },
                )
            })?;

            attributes.insert(rule.name.clone(), AttributeValue { value, origin });
        }

        for (name, _) in node.attributes() {
            if descriptor.attribute(name).is_none() {
                tracing::debug!(path = %path, attribute = name, "ignoring undeclared attribute");
            }
        }

        Ok(attributes)
    }

    fn bind_children<N: TreeNode>(
        &self,
        descriptor: &MetadataDescriptor,
        node: &N,
        path: &mut ElementPath,
    ) -> Result<IndexMap<String, Children>, BindingError> {
        let mut groups: IndexMap<String, Children> = IndexMap::new();

        for child in node.children() {
            let name = child.element_name();
            let Some(rule) = descriptor.child(name) else {
                match descriptor.unknown_children() {
                    UnknownChildren::Ignore => {
                        tracing::debug!(path = %path, child = name, "skipping unregistered child");
                        continue;
                    }
                    UnknownChildren::Reject => {
                        return Err(fail(
                            path,
                            BindingErrorKind::UnknownChild {
                                child: name.to_string(),
                                parent: descriptor.element().to_string(),
                            },
                        ));
                    }
                }
            };

            let child_descriptor = self.registry.by_target(&rule.target).ok_or_else(|| {
                fail(
                    path,
                    BindingErrorKind::UnresolvedDescriptor {
                        target: rule.target.clone(),
                    },
                )
            })?;
            let bound = self.bind_at(child_descriptor, child, path)?;

            let slot = match (bound.key(), rule.multiplicity) {
                (Some(key), _) => Slot::Keyed(key.to_string()),
                (None, Multiplicity::Single) => Slot::Single,
                (None, Multiplicity::Collection) => Slot::List,
            };

            match groups.entry(name.to_string()) {
                Entry::Vacant(entry) => {
                    entry.insert(match slot {
                        Slot::Single => Children::Single(Box::new(bound)),
                        Slot::List => Children::List(vec![bound]),
                        Slot::Keyed(key) => Children::Keyed(IndexMap::from([(key, bound)])),
                    });
                }
                Entry::Occupied(mut entry) => match (entry.get_mut(), slot) {
                    (Children::Keyed(items), Slot::Keyed(key)) => {
                        if items.contains_key(&key) {
                            return Err(fail(
                                path,
                                BindingErrorKind::DuplicateKey {
                                    element: name.to_string(),
                                    key,
                                },
                            ));
                        }
                        items.insert(key, bound);
                    }
                    (Children::List(items), Slot::List) => items.push(bound),
                    _ => {
                        return Err(fail(
                            path,
                            BindingErrorKind::DuplicateChild {
                                element: name.to_string(),
                            },
                        ));
                    }
                },
            }
        }

        Ok(groups)
    }
}

fn fail(path: &ElementPath, kind: BindingErrorKind) -> BindingError {
    BindingError::new(path.clone(), kind)
}

/// Leaf values name something else, so they must be a non-empty token.
fn is_reference(raw: &str) -> bool {
    !raw.is_empty() && raw.trim() == raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{EnumDeclaration, Value};
    use crate::declaration::Declaration;
    use crate::tree::Node;

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
                    "@log-level=datatype:enum:Level",
                    "@log-level=optional",
                    "<server>=Server",
                    "<property>=collection:Property",
                    "<note>=Note",
                ],
            ),
            Declaration::new(
                "server",
                [
                    "target=Server",
                    "@name=leaf",
                    "key=@name",
                    "@port=datatype:Integer",
                    "@timeout=datatype:Duration",
                    "@timeout=default:30s",
                    "@enabled=datatype:Boolean",
                    "@enabled=optional",
                    "<*>=ignore",
                ],
            ),
            Declaration::new("property", ["target=Property", "@name=required", "@value=optional"]),
            Declaration::new("note", ["target=Note", "@text=optional"]),
        ] {
            builder.declare(&declaration).unwrap();
        }
        builder.build().unwrap()
    }

    fn server(name: &str, port: &str) -> Node {
        Node::new("server")
            .with_attribute("name", name)
            .with_attribute("port", port)
    }

    #[test]
    fn binds_attributes_with_defaults() {
        let registry = registry();
        let tree = Node::new("domain").with_child(server("web", "8080"));
        let domain = registry.bind(&tree).unwrap();

        let level = domain.attribute("log-level").unwrap();
        assert_eq!(level.value, Value::Enum("info".into()));
        assert!(level.is_implicit());

        let web = domain.children("server").unwrap().get("web").unwrap();
        assert_eq!(web.value("port"), Some(&Value::Integer(8080)));
        let timeout = web.attribute("timeout").unwrap();
        assert_eq!(timeout.origin, Origin::Default);
        assert_eq!(timeout.value.as_duration(), Some(std::time::Duration::from_secs(30)));
        assert_eq!(web.value("enabled"), Some(&Value::Boolean(false)));
    }

    #[test]
    fn missing_required_attribute_names_it() {
        let registry = registry();
        let tree = Node::new("domain").with_child(Node::new("server").with_attribute("name", "web"));
        let err = registry.bind(&tree).unwrap_err();
        assert_eq!(
            err.kind,
            BindingErrorKind::MissingAttribute {
                attribute: "port".into(),
                element: "server".into(),
            }
        );
        assert_eq!(err.path.to_string(), "domain/server[web]");
    }

    #[test]
    fn coercion_failure_names_value_and_type() {
        let registry = registry();
        let tree = Node::new("domain").with_child(server("web", "80.5"));
        let err = registry.bind(&tree).unwrap_err();
        let BindingErrorKind::Coercion {
            attribute,
            value,
            expected,
            ..
        } = err.kind
        else {
            panic!("expected a coercion error, got {err}");
        };
        assert_eq!(attribute, "port");
        assert_eq!(value, "80.5");
        assert_eq!(expected, crate::Datatype::Integer);
    }

    #[test]
    fn leaf_values_must_be_tokens() {
        let registry = registry();
        let tree = Node::new("domain").with_child(server(" web", "80"));
        let err = registry.bind(&tree).unwrap_err();
        assert!(matches!(err.kind, BindingErrorKind::InvalidLeaf { .. }));
    }

    #[test]
    fn unknown_children_are_rejected_unless_ignored() {
        let registry = registry();
        let tree = Node::new("domain").with_child(Node::new("cluster"));
        let err = registry.bind(&tree).unwrap_err();
        assert_eq!(
            err.kind,
            BindingErrorKind::UnknownChild {
                child: "cluster".into(),
                parent: "domain".into(),
            }
        );

        let permissive = Node::new("domain").with_child(server("web", "80").with_child(Node::new("anything")));
        assert!(registry.bind(&permissive).is_ok());
    }

    #[test]
    fn single_child_may_not_repeat() {
        let registry = registry();
        let tree = Node::new("domain").with_children([Node::new("note"), Node::new("note")]);
        let err = registry.bind(&tree).unwrap_err();
        assert_eq!(err.kind, BindingErrorKind::DuplicateChild { element: "note".into() });
    }

    #[test]
    fn collections_keep_document_order() {
        let registry = registry();
        let tree = Node::new("domain").with_children([
            Node::new("property").with_attribute("name", "b"),
            server("web", "80"),
            Node::new("property").with_attribute("name", "a"),
        ]);
        let domain = registry.bind(&tree).unwrap();
        let names: Vec<_> = domain
            .children("property")
            .unwrap()
            .iter()
            .map(|p| p.value("name").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(names, ["b", "a"]);
        let groups: Vec<_> = domain.child_groups().map(|(element, _)| element).collect();
        assert_eq!(groups, ["property", "server"]);
    }

    #[test]
    fn element_mismatch_is_an_error() {
        let registry = registry();
        let descriptor = registry.get("server").unwrap();
        let err = registry.binder().bind(descriptor, &Node::new("domain")).unwrap_err();
        assert_eq!(
            err.kind,
            BindingErrorKind::ElementMismatch {
                expected: "server".into(),
                found: "domain".into(),
            }
        );
    }

    #[test]
    fn hooks_run_after_bind_and_can_fail() {
        let registry = registry();
        let tree = Node::new("domain").with_child(server("web", "80"));

        let binder = registry
            .binder()
            .with_hook("server", |instance: &mut BoundInstance| -> anyhow::Result<()> {
                if let Some(port) = instance.attribute_mut("port") {
                    port.value = Value::Integer(8080);
                }
                Ok(())
            });
        let domain = binder.bind_root(&tree).unwrap();
        let web = domain.keyed("server").unwrap().get("web").unwrap();
        assert_eq!(web.value("port"), Some(&Value::Integer(8080)));

        let strict = registry
            .binder()
            .with_hook("server", |_: &mut BoundInstance| -> anyhow::Result<()> {
                anyhow::bail!("port 80 is privileged")
            });
        let err = strict.bind_root(&tree).unwrap_err();
        assert!(matches!(err.kind, BindingErrorKind::Hook { ref message, .. } if message.contains("privileged")));
        assert_eq!(err.path.to_string(), "domain/server[web]");
    }

    #[test]
    fn unregistered_root_is_an_error() {
        let registry = registry();
        let err = registry.bind(&Node::new("cluster")).unwrap_err();
        assert_eq!(
            err.kind,
            BindingErrorKind::UnresolvedElement {
                element: "cluster".into(),
            }
        );
    }

    #[test]
    fn keyed_as_groups_by_the_borrowed_key() {
        let mut builder = Registry::builder();
        for declaration in [
            Declaration::new("base", ["target=Base", "@name=required", "key=@name"]),
            Declaration::new("x", ["target=X", "@name=required", "keyed-as=Base"]),
            Declaration::new("parent", ["target=Parent", "<x>=collection:X"]),
        ] {
            builder.declare(&declaration).unwrap();
        }
        let registry = builder.build().unwrap();

        let tree = Node::new("parent").with_children([
            Node::new("x").with_attribute("name", "a"),
            Node::new("x").with_attribute("name", "b"),
        ]);
        let parent = registry.bind(&tree).unwrap();
        let xs = parent.keyed("x").unwrap();
        assert_eq!(xs.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(xs["a"].key(), Some("a"));

        let repeated = Node::new("parent").with_children([
            Node::new("x").with_attribute("name", "a"),
            Node::new("x").with_attribute("name", "a"),
        ]);
        let err = registry.bind(&repeated).unwrap_err();
        assert_eq!(
            err.kind,
            BindingErrorKind::DuplicateKey {
                element: "x".into(),
                key: "a".into(),
            }
        );

        let unnamed = Node::new("parent").with_child(Node::new("x"));
        let err = registry.bind(&unnamed).unwrap_err();
        assert!(matches!(err.kind, BindingErrorKind::MissingAttribute { .. }), "{err}");
    }
}
