//! The descriptor registry.
//!
//! A [`RegistryBuilder`] accumulates descriptors append-only during a single
//! compilation pass. Building it resolves every cross-reference and freezes
//! the result into a [`Registry`], which is read-only from then on and can be
//! shared by any number of concurrent binds.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::binder::Binder;
use crate::compiler;
use crate::config::{ConfigEnum, Configured};
use crate::datatype::{Datatype, EnumDeclaration, EnumTable};
use crate::declaration::Declaration;
use crate::descriptor::{AttributeRule, MetadataDescriptor};
use crate::error::{BindingError, DeclarationError, DeclarationErrors};
use crate::extract::FromBound;
use crate::instance::BoundInstance;
use crate::snapshot::RegistrySnapshot;
use crate::tree::TreeNode;

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// Publish a registry process-wide. Only the first call succeeds; later
/// calls hand the rejected registry back.
pub fn install(registry: Registry) -> Result<&'static Registry, Registry> {
    GLOBAL.try_insert(registry).map_err(|(_, rejected)| rejected)
}

/// The registry published with [`install`], if any.
pub fn global() -> Option<&'static Registry> {
    GLOBAL.get()
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: IndexMap<String, MetadataDescriptor>,
    targets: HashMap<String, String>,
    enums: EnumTable,
    /// Declarations that failed to compile, by target type when known.
    rejected: Vec<(Option<String>, String, DeclarationError)>,
}

impl RegistryBuilder {
    /// Compile a declaration and append its descriptor.
    ///
    /// Registering an element name or a target type twice is an error, the
    /// first registration stays in place.
    pub fn declare(&mut self, declaration: &Declaration) -> Result<&MetadataDescriptor, DeclarationError> {
        let descriptor = match self.check_unique(declaration).and_then(|()| compiler::compile(declaration)) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.rejected
                    .push((declared_target(declaration), declaration.element.clone(), err.clone()));
                return Err(err);
            }
        };

        if let Some(existing) = self.targets.get(descriptor.target()) {
            let err = DeclarationError::DuplicateTargetType {
                element: descriptor.element().to_string(),
                target: descriptor.target().to_string(),
                existing: existing.clone(),
            };
            // The type itself compiled fine elsewhere, so this is not recorded
            // as a rejected dependency.
            return Err(err);
        }

        tracing::debug!(
            element = %descriptor.element(),
            target = %descriptor.target(),
            attributes = descriptor.attributes().len(),
            children = descriptor.children().len(),
            "declared descriptor"
        );

        let element = descriptor.element().to_string();
        self.targets
            .insert(descriptor.target().to_string(), element.clone());
        Ok(self.descriptors.entry(element).or_insert(descriptor))
    }

    /// Declare the variants of an enum usable as `enum:<name>`.
    pub fn declare_enum(&mut self, declaration: EnumDeclaration) -> Result<(), DeclarationError> {
        let EnumDeclaration { name, variants } = declaration;
        let invalid = |reason: &str| DeclarationError::InvalidEnum {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if let Some(existing) = self.enums.variants(&name) {
            if existing == variants.as_slice() {
                return Ok(());
            }
            return Err(invalid("already declared with different variants"));
        }
        if variants.is_empty() {
            return Err(invalid("an enum needs at least one variant"));
        }
        if variants.iter().any(|v| v.is_empty()) {
            return Err(invalid("variants cannot be empty"));
        }
        for (i, variant) in variants.iter().enumerate() {
            if variants[..i].contains(variant) {
                return Err(invalid(&format!("variant `{variant}` is declared twice")));
            }
        }

        self.enums.insert(name, variants);
        Ok(())
    }

    /// Declare an enum through its generated stub.
    pub fn register_enum<E: ConfigEnum>(&mut self) -> Result<(), DeclarationError> {
        self.declare_enum(E::declaration())
    }

    /// Declare a type through its binder stub, along with the enums it uses.
    pub fn register<T: Configured>(&mut self) -> Result<(), DeclarationError> {
        for declaration in T::enums() {
            self.declare_enum(declaration)?;
        }
        self.declare(&T::declaration())?;
        Ok(())
    }

    /// Register a type and, transitively, every type it maps children to.
    /// Types already registered from the same stub are skipped, so recursive
    /// types terminate.
    pub fn register_tree<T: Configured>(&mut self) -> Result<(), DeclarationError> {
        if self
            .descriptors
            .get(T::ELEMENT)
            .is_some_and(|descriptor| descriptor.target() == T::TARGET)
        {
            return Ok(());
        }
        self.register::<T>()?;
        T::register_dependencies(self)
    }

    pub fn contains(&self, element: &str) -> bool {
        self.descriptors.contains_key(element)
    }

    /// Resolve all references and freeze. Any problem fails the whole build.
    pub fn build(self) -> Result<Registry, DeclarationErrors> {
        let errors: Vec<_> = self
            .descriptors
            .values()
            .flat_map(|descriptor| self.check(descriptor))
            .collect();
        if !errors.is_empty() {
            return Err(DeclarationErrors::new(errors));
        }
        Ok(self.freeze())
    }

    /// Resolve all references, dropping descriptors that fail or depend on
    /// one that does. Dropped descriptors are reported, never silently lost.
    pub fn build_partial(mut self) -> CompilePass {
        let mut errors = Vec::new();
        // element -> (path to the failing element, root error)
        let mut failed: IndexMap<String, (Vec<String>, DeclarationError)> = IndexMap::new();

        for descriptor in self.descriptors.values() {
            let mut direct = self.check(descriptor);
            if let Some(first) = direct.first() {
                let chain = match first {
                    DeclarationError::Dependency { path, source, .. } => {
                        (path.clone(), source.root_cause().clone())
                    }
                    other => (vec![descriptor.element().to_string()], other.clone()),
                };
                failed.insert(descriptor.element().to_string(), chain);
            }
            errors.append(&mut direct);
        }

        loop {
            let mut newly_failed = Vec::new();
            for descriptor in self.descriptors.values() {
                if failed.contains_key(descriptor.element()) {
                    continue;
                }
                let broken = descriptor
                    .dependencies()
                    .filter_map(|target| self.targets.get(target))
                    .find_map(|element| failed.get(element));
                if let Some((path, root)) = broken {
                    let mut path = path.clone();
                    path.insert(0, descriptor.element().to_string());
                    newly_failed.push((descriptor.element().to_string(), (path, root.clone())));
                }
            }
            if newly_failed.is_empty() {
                break;
            }
            for (element, (path, root)) in newly_failed {
                errors.push(DeclarationError::Dependency {
                    element: element.clone(),
                    path: path.clone(),
                    source: Box::new(root.clone()),
                });
                failed.insert(element, (path, root));
            }
        }

        for element in failed.keys() {
            tracing::warn!(element = %element, "excluding descriptor from registry");
            if let Some(descriptor) = self.descriptors.shift_remove(element) {
                self.targets.remove(descriptor.target());
            }
        }

        CompilePass {
            registry: self.freeze(),
            errors,
        }
    }

    /// Cross-reference problems of one descriptor.
    fn check(&self, descriptor: &MetadataDescriptor) -> Vec<DeclarationError> {
        let element = descriptor.element();
        let mut errors = Vec::new();

        for (child, rule) in descriptor.children() {
            if let Some(registered) = self.targets.get(&rule.target) {
                // The binder checks child nodes against the target's element name.
                if registered != child {
                    errors.push(DeclarationError::ChildElementMismatch {
                        element: element.to_string(),
                        child: child.to_string(),
                        target: rule.target.clone(),
                        registered: registered.clone(),
                    });
                }
                continue;
            }
            errors.push(match self.rejection(&rule.target) {
                Some((rejected_element, source)) => DeclarationError::Dependency {
                    element: element.to_string(),
                    path: vec![element.to_string(), rejected_element.to_string()],
                    source: Box::new(source.clone()),
                },
                None => DeclarationError::UnresolvedType {
                    element: element.to_string(),
                    child: child.to_string(),
                    target: rule.target.clone(),
                },
            });
        }

        if let Some(keyed_as) = descriptor.keyed_as() {
            match self.targets.get(keyed_as).and_then(|e| self.descriptors.get(e)) {
                None => errors.push(DeclarationError::UnresolvedKeyedAs {
                    element: element.to_string(),
                    target: keyed_as.to_string(),
                }),
                Some(keyed) => match keyed.key() {
                    None => errors.push(DeclarationError::UnkeyedKeyedAs {
                        element: element.to_string(),
                        target: keyed_as.to_string(),
                    }),
                    Some(key) if descriptor.attribute(&key.name).is_none() => {
                        errors.push(DeclarationError::KeyedAsMissingAttribute {
                            element: element.to_string(),
                            target: keyed_as.to_string(),
                            attribute: key.name.clone(),
                        })
                    }
                    Some(_) => {}
                },
            }
        }

        for attribute in descriptor.attributes() {
            let Datatype::Enum(name) = &attribute.datatype else {
                continue;
            };
            if !self.enums.contains(name) {
                errors.push(DeclarationError::UnknownEnum {
                    element: element.to_string(),
                    attribute: attribute.name.clone(),
                    name: name.clone(),
                });
                continue;
            }
            if let Some(default) = &attribute.default {
                if let Err(err) = attribute.datatype.coerce(default, &self.enums) {
                    errors.push(DeclarationError::InvalidDefault {
                        element: element.to_string(),
                        attribute: attribute.name.clone(),
                        value: default.clone(),
                        datatype: attribute.datatype.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        errors
    }

    fn rejection(&self, target: &str) -> Option<(&str, &DeclarationError)> {
        self.rejected
            .iter()
            .find(|(rejected_target, _, _)| rejected_target.as_deref() == Some(target))
            .map(|(_, element, err)| (element.as_str(), err))
    }

    fn check_unique(&self, declaration: &Declaration) -> Result<(), DeclarationError> {
        if self.descriptors.contains_key(declaration.element.trim()) {
            return Err(DeclarationError::DuplicateElement {
                element: declaration.element.clone(),
            });
        }
        Ok(())
    }

    fn freeze(self) -> Registry {
        Registry {
            descriptors: self.descriptors,
            targets: self.targets,
            enums: self.enums,
        }
    }
}

/// Best effort target of a declaration that may not compile.
fn declared_target(declaration: &Declaration) -> Option<String> {
    declaration.rules.iter().find_map(|rule| {
        let (lhs, rhs) = rule.split_once('=')?;
        (lhs.trim() == "target" && !rhs.trim().is_empty()).then(|| rhs.trim().to_string())
    })
}

/// Outcome of a lenient compilation pass.
#[derive(Debug)]
pub struct CompilePass {
    pub registry: Registry,
    pub errors: Vec<DeclarationError>,
}

impl CompilePass {
    /// The registry, or every error if anything failed.
    pub fn into_result(self) -> Result<Registry, DeclarationErrors> {
        if self.errors.is_empty() {
            Ok(self.registry)
        } else {
            Err(DeclarationErrors::new(self.errors))
        }
    }
}

/// Immutable element name -> descriptor table.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: IndexMap<String, MetadataDescriptor>,
    targets: HashMap<String, String>,
    enums: EnumTable,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Strictly compile a set of declarations.
    pub fn compile(declarations: impl IntoIterator<Item = Declaration>) -> Result<Registry, DeclarationErrors> {
        compiler::compile_pass(declarations).into_result()
    }

    pub fn get(&self, element: &str) -> Option<&MetadataDescriptor> {
        self.descriptors.get(element)
    }

    pub fn by_target(&self, target: &str) -> Option<&MetadataDescriptor> {
        self.targets.get(target).and_then(|element| self.descriptors.get(element))
    }

    /// The attribute identifying instances of `descriptor` among their
    /// siblings: its own `key=`, else the key of its `keyed-as` type.
    pub fn identity_key<'a>(&'a self, descriptor: &'a MetadataDescriptor) -> Option<&'a AttributeRule> {
        descriptor.key().or_else(|| {
            let keyed = self.by_target(descriptor.keyed_as()?)?;
            descriptor.attribute(&keyed.key()?.name)
        })
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl ExactSizeIterator<Item = &MetadataDescriptor> {
        self.descriptors.values()
    }

    pub fn enums(&self) -> &EnumTable {
        &self.enums
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn binder(&self) -> Binder<'_> {
        Binder::new(self)
    }

    /// Bind a tree using the descriptor registered for its root element.
    pub fn bind<N: TreeNode>(&self, node: &N) -> Result<BoundInstance, BindingError> {
        self.binder().bind_root(node)
    }

    /// Bind a tree and convert it into `T`.
    pub fn bind_as<T: Configured + FromBound, N: TreeNode>(&self, node: &N) -> Result<T, BindingError> {
        self.binder().bind_as::<T, N>(node)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::capture(self)
    }

    /// Rebuild a registry from a snapshot, re-running every check.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Registry, DeclarationErrors> {
        snapshot.restore()
    }
}
