//! Declarative binding of configuration trees to typed descriptors.
//!
//! Types declare how they map onto tree elements with small rule strings.
//! The [`compiler`] validates each declaration into a [`MetadataDescriptor`],
//! the [`Registry`] resolves references between them, and the [`Binder`]
//! walks a tree, coercing attributes and recursing into children.

pub mod binder;
pub mod compiler;
pub mod config;
pub mod datatype;
pub mod declaration;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod instance;
pub mod registry;
pub mod snapshot;
pub mod tree;

pub use binder::{BindHook, Binder};
pub use compiler::{compile, compile_pass};
pub use config::{ConfigEnum, Configured};
pub use datatype::{CoercionError, Datatype, EnumDeclaration, EnumTable, Value};
pub use declaration::Declaration;
pub use descriptor::{AttributeRule, ChildRule, MetadataDescriptor, Multiplicity, UnknownChildren};
pub use error::{
    BindingError, BindingErrorKind, DeclarationError, DeclarationErrors, ElementPath, PathSegment,
};
pub use extract::{FromBound, FromChildren, FromValue};
pub use instance::{AttributeValue, BoundInstance, Children, Origin};
pub use registry::{CompilePass, Registry, RegistryBuilder};
pub use snapshot::{DescriptorRecord, RegistrySnapshot};
pub use tree::{Node, TreeNode};
