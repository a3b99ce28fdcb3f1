//! Conversion of bound instances into Rust types.
//!
//! The derive macros generate [`FromBound`] impls that pull each field out
//! with [`attribute`] or [`children`]; hand-written impls can do the same.

use std::time::Duration;

use indexmap::IndexMap;

use crate::config::Configured;
use crate::datatype::{Datatype, EnumDeclaration, Value};
use crate::descriptor::Multiplicity;
use crate::error::{BindingError, BindingErrorKind, ElementPath};
use crate::instance::{AttributeValue, BoundInstance, Children};

pub trait FromBound: Sized {
    /// Convert `instance`. `path` ends with the instance's own segment and
    /// is what extraction errors report.
    fn from_bound_at(instance: &BoundInstance, path: &mut ElementPath) -> Result<Self, BindingError>;

    fn from_bound(instance: &BoundInstance) -> Result<Self, BindingError> {
        let mut path = ElementPath::default();
        descend(instance, &mut path, Self::from_bound_at)
    }
}

/// A Rust type an attribute can be read into.
pub trait FromValue: Sized {
    /// Absent attributes are acceptable (`Option<T>`).
    const OPTIONAL: bool = false;

    fn datatype() -> Datatype;

    fn enum_declaration() -> Option<EnumDeclaration> {
        None
    }

    fn from_value(value: &AttributeValue) -> Result<Self, String>;
}

/// A Rust type a group of child elements can be read into.
pub trait FromChildren: Sized {
    type Item: Configured + FromBound;
    const MULTIPLICITY: Multiplicity;

    /// `path` ends with the parent's segment.
    fn from_children(
        parent: &BoundInstance,
        path: &mut ElementPath,
        element: &str,
    ) -> Result<Self, BindingError>;
}

/// Read attribute `name` of `instance`.
pub fn attribute<T: FromValue>(
    instance: &BoundInstance,
    path: &ElementPath,
    name: &str,
) -> Result<T, BindingError> {
    let value = instance
        .attribute(name)
        .ok_or_else(|| extract_error(path, name, "attribute is not declared".into()))?;
    T::from_value(value).map_err(|reason| extract_error(path, name, reason))
}

/// Read the children bound under element `element` of `instance`.
pub fn children<T: FromChildren>(
    instance: &BoundInstance,
    path: &mut ElementPath,
    element: &str,
) -> Result<T, BindingError> {
    T::from_children(instance, path, element)
}

/// Error for field `field` of the instance at `path`.
pub fn extract_error(path: &ElementPath, field: &str, reason: String) -> BindingError {
    BindingError::new(
        path.clone(),
        BindingErrorKind::Extract {
            field: field.to_string(),
            reason,
        },
    )
}

/// Run `f` with `instance`'s segment, keyed when it has a key, on `path`.
fn descend<T>(
    instance: &BoundInstance,
    path: &mut ElementPath,
    f: impl FnOnce(&BoundInstance, &mut ElementPath) -> Result<T, BindingError>,
) -> Result<T, BindingError> {
    path.push(instance.element());
    if let Some(key) = instance.key() {
        path.set_key(key.to_string());
    }
    let result = f(instance, path);
    path.pop();
    result
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, found `{value}`")
}

macro_rules! from_value {
    ($ty:ty, $datatype:ident, $variant:ident) => {
        impl FromValue for $ty {
            fn datatype() -> Datatype {
                Datatype::$datatype
            }

            fn from_value(value: &AttributeValue) -> Result<Self, String> {
                match &value.value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(mismatch(stringify!($datatype), other)),
                }
            }
        }
    };
}

from_value!(String, String, String);
from_value!(bool, Boolean, Boolean);
from_value!(i32, Integer, Integer);
from_value!(i64, Long, Long);
from_value!(f32, Float, Float);
from_value!(f64, Double, Double);
from_value!(Duration, Duration, Duration);

impl<T: FromValue> FromValue for Option<T> {
    const OPTIONAL: bool = true;

    fn datatype() -> Datatype {
        T::datatype()
    }

    fn enum_declaration() -> Option<EnumDeclaration> {
        T::enum_declaration()
    }

    fn from_value(value: &AttributeValue) -> Result<Self, String> {
        if value.is_implicit() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

fn group<'a>(parent: &'a BoundInstance, element: &str) -> impl Iterator<Item = &'a BoundInstance> {
    parent.children(element).into_iter().flat_map(Children::iter)
}

impl<T: Configured + FromBound> FromChildren for Option<T> {
    type Item = T;
    const MULTIPLICITY: Multiplicity = Multiplicity::Single;

    fn from_children(
        parent: &BoundInstance,
        path: &mut ElementPath,
        element: &str,
    ) -> Result<Self, BindingError> {
        let mut instances = group(parent, element);
        let first = instances.next();
        if instances.next().is_some() {
            return Err(extract_error(
                path,
                element,
                format!("expected at most one <{element}>"),
            ));
        }
        first
            .map(|instance| descend(instance, path, T::from_bound_at))
            .transpose()
    }
}

impl<T: Configured + FromBound> FromChildren for Vec<T> {
    type Item = T;
    const MULTIPLICITY: Multiplicity = Multiplicity::Collection;

    fn from_children(
        parent: &BoundInstance,
        path: &mut ElementPath,
        element: &str,
    ) -> Result<Self, BindingError> {
        group(parent, element)
            .map(|instance| descend(instance, path, T::from_bound_at))
            .collect()
    }
}

impl<T: Configured + FromBound> FromChildren for IndexMap<String, T> {
    type Item = T;
    const MULTIPLICITY: Multiplicity = Multiplicity::Collection;

    fn from_children(
        parent: &BoundInstance,
        path: &mut ElementPath,
        element: &str,
    ) -> Result<Self, BindingError> {
        match parent.children(element) {
            None => Ok(IndexMap::new()),
            Some(Children::Keyed(items)) => items
                .iter()
                .map(|(key, instance)| Ok((key.clone(), descend(instance, path, T::from_bound_at)?)))
                .collect(),
            Some(_) => Err(extract_error(
                path,
                element,
                format!("<{element}> children are not keyed"),
            )),
        }
    }
}

/// Exactly one child; used by the derive for plain `T` fields.
pub fn required_child<T: FromBound>(
    parent: &BoundInstance,
    path: &mut ElementPath,
    element: &str,
) -> Result<T, BindingError> {
    let mut instances = group(parent, element);
    match (instances.next(), instances.next()) {
        (Some(instance), None) => descend(instance, path, T::from_bound_at),
        (None, _) => Err(extract_error(
            path,
            element,
            format!("missing required child <{element}>"),
        )),
        (Some(_), Some(_)) => Err(extract_error(
            path,
            element,
            format!("expected exactly one <{element}>"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Origin;

    fn explicit(value: Value) -> AttributeValue {
        AttributeValue {
            value,
            origin: Origin::Explicit,
        }
    }

    #[test]
    fn scalars_match_their_datatype() {
        assert_eq!(i32::from_value(&explicit(Value::Integer(7))), Ok(7));
        assert_eq!(
            String::from_value(&explicit(Value::String("a".into()))),
            Ok("a".to_string())
        );
        assert!(i64::from_value(&explicit(Value::Integer(7))).is_err());
        assert_eq!(<Option<bool>>::datatype(), Datatype::Boolean);
        assert!(<Option<bool> as FromValue>::OPTIONAL);
    }

    #[test]
    fn implicit_values_read_as_none() {
        let implicit = AttributeValue {
            value: Value::String(String::new()),
            origin: Origin::Implicit,
        };
        assert_eq!(<Option<String>>::from_value(&implicit), Ok(None));

        let defaulted = AttributeValue {
            value: Value::String("x".into()),
            origin: Origin::Default,
        };
        assert_eq!(<Option<String>>::from_value(&defaulted), Ok(Some("x".into())));
    }
}
