use crate::datatype::EnumDeclaration;
use crate::declaration::Declaration;
use crate::descriptor::MetadataDescriptor;
use crate::error::DeclarationError;
use crate::registry::{Registry, RegistryBuilder};

/// Binder stub for a configuration type.
///
/// `#[derive(Configured)]` implements this: the declaration rules are
/// generated at compile time from the type's attributes, and
/// [`Configured::descriptor`] hands the binder the compiled descriptor
/// without looking at the type again.
pub trait Configured: Sized + 'static {
    /// Element name the type is registered under.
    const ELEMENT: &'static str;
    /// Type name used by `target=` and child rules.
    const TARGET: &'static str;

    fn declaration() -> Declaration;

    /// Enums used by the type's attributes.
    fn enums() -> Vec<EnumDeclaration> {
        Vec::new()
    }

    /// Register the types this one maps child elements to.
    fn register_dependencies(_builder: &mut RegistryBuilder) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn descriptor(registry: &Registry) -> Option<&MetadataDescriptor> {
        registry
            .get(Self::ELEMENT)
            .filter(|descriptor| descriptor.target() == Self::TARGET)
    }
}

/// Stub for a fieldless enum used as `enum:<NAME>` datatype.
pub trait ConfigEnum: Sized + 'static {
    const NAME: &'static str;
    /// Spelling of each variant in configuration text, in declaration order.
    const VARIANTS: &'static [&'static str];

    fn from_variant(variant: &str) -> Option<Self>;

    fn variant(&self) -> &'static str;

    fn declaration() -> EnumDeclaration {
        EnumDeclaration::new(Self::NAME, Self::VARIANTS.iter().copied())
    }
}
