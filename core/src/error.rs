use std::fmt::{self, Display};

use crate::datatype::Datatype;

/// Malformed or contradictory declarations, raised while compiling
/// descriptors or building a registry.
///
/// Every variant names the declaring element so that a report over many
/// declarations stays readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("<{element}>: no `target=` rule")]
    MissingTarget { element: String },

    #[error("<{element}>: `target=` declared more than once (rule `{rule}`)")]
    DuplicateTarget { element: String, rule: String },

    #[error("<{element}>: malformed rule `{rule}`: {reason}")]
    MalformedRule {
        element: String,
        rule: String,
        reason: String,
    },

    #[error("<{element}>: unknown datatype `{datatype}` in rule `{rule}`")]
    UnknownDatatype {
        element: String,
        rule: String,
        datatype: String,
    },

    #[error("<{element}>: rule `{rule}` may appear only once")]
    DuplicateRule { element: String, rule: String },

    #[error("<{element}>: key `@{attribute}` is not a declared attribute")]
    UndeclaredKey { element: String, attribute: String },

    #[error("<{element}>: key `@{attribute}` has non-comparable datatype {datatype}")]
    IncomparableKey {
        element: String,
        attribute: String,
        datatype: Datatype,
    },

    #[error("<{element}>: key `@{attribute}` cannot declare a default value")]
    KeyWithDefault { element: String, attribute: String },

    #[error("<{element}>: `keyed-as={target}` names this type but no `key=` rule is declared")]
    KeyedAsWithoutKey { element: String, target: String },

    #[error("<{element}>: `keyed-as={target}` names a type without an identity key")]
    UnkeyedKeyedAs { element: String, target: String },

    #[error("<{element}>: `keyed-as={target}` names a type with no descriptor")]
    UnresolvedKeyedAs { element: String, target: String },

    #[error("<{element}>: `keyed-as={target}` keys siblings by `@{attribute}`, which is not declared here")]
    KeyedAsMissingAttribute {
        element: String,
        target: String,
        attribute: String,
    },

    #[error("<{element}>: default `{value}` of `@{attribute}` is not a valid {datatype}: {reason}")]
    InvalidDefault {
        element: String,
        attribute: String,
        value: String,
        datatype: Datatype,
        reason: String,
    },

    #[error("<{element}>: child element <{child}> is mapped more than once")]
    DuplicateChildElement { element: String, child: String },

    #[error("element <{element}> is already registered")]
    DuplicateElement { element: String },

    #[error("<{element}>: type {target} is already bound to element <{existing}>")]
    DuplicateTargetType {
        element: String,
        target: String,
        existing: String,
    },

    #[error("<{element}>: child <{child}> references type {target} which has no descriptor")]
    UnresolvedType {
        element: String,
        child: String,
        target: String,
    },

    #[error("<{element}>: child <{child}> maps to type {target}, which is registered as <{registered}>")]
    ChildElementMismatch {
        element: String,
        child: String,
        target: String,
        registered: String,
    },

    #[error("<{element}>: attribute `@{attribute}` uses undeclared enum {name}")]
    UnknownEnum {
        element: String,
        attribute: String,
        name: String,
    },

    #[error("enum {name}: {reason}")]
    InvalidEnum { name: String, reason: String },

    #[error("<{element}>: depends on a failed declaration ({}): {source}", .path.join(" -> "))]
    Dependency {
        element: String,
        path: Vec<String>,
        source: Box<DeclarationError>,
    },
}

impl DeclarationError {
    /// The element whose declaration is at fault, if the error has one.
    pub fn element(&self) -> Option<&str> {
        match self {
            Self::MissingTarget { element }
            | Self::DuplicateTarget { element, .. }
            | Self::MalformedRule { element, .. }
            | Self::UnknownDatatype { element, .. }
            | Self::DuplicateRule { element, .. }
            | Self::UndeclaredKey { element, .. }
            | Self::IncomparableKey { element, .. }
            | Self::KeyWithDefault { element, .. }
            | Self::KeyedAsWithoutKey { element, .. }
            | Self::UnkeyedKeyedAs { element, .. }
            | Self::UnresolvedKeyedAs { element, .. }
            | Self::KeyedAsMissingAttribute { element, .. }
            | Self::InvalidDefault { element, .. }
            | Self::DuplicateChildElement { element, .. }
            | Self::DuplicateElement { element }
            | Self::DuplicateTargetType { element, .. }
            | Self::UnresolvedType { element, .. }
            | Self::ChildElementMismatch { element, .. }
            | Self::UnknownEnum { element, .. }
            | Self::Dependency { element, .. } => Some(element),
            Self::InvalidEnum { .. } => None,
        }
    }

    /// The innermost cause of a dependency chain.
    pub fn root_cause(&self) -> &DeclarationError {
        match self {
            Self::Dependency { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Every problem found by a strict registry build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationErrors(Vec<DeclarationError>);

impl DeclarationErrors {
    pub(crate) fn new(errors: Vec<DeclarationError>) -> Self {
        DeclarationErrors(errors)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeclarationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<DeclarationError> {
        self.0
    }
}

impl Display for DeclarationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} declaration error(s):", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeclarationErrors {}

impl From<DeclarationError> for DeclarationErrors {
    fn from(error: DeclarationError) -> Self {
        DeclarationErrors(vec![error])
    }
}

/// One step of an [`ElementPath`]: an element name, plus the identity key
/// when the element is a keyed child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub element: String,
    pub key: Option<String>,
}

/// Element names from the bound root down to the point of failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementPath(Vec<PathSegment>);

impl ElementPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Element names only, root first.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|segment| segment.element.as_str())
    }

    pub(crate) fn push(&mut self, element: &str) {
        self.0.push(PathSegment {
            element: element.to_string(),
            key: None,
        });
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }

    pub(crate) fn set_key(&mut self, key: String) {
        if let Some(last) = self.0.last_mut() {
            last.key = Some(key);
        }
    }
}

impl Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&segment.element)?;
            if let Some(key) = &segment.key {
                write!(f, "[{key}]")?;
            }
        }
        Ok(())
    }
}

/// A failed bind. Binding is all-or-nothing, so this is all the caller gets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("at {path}: {kind}")]
pub struct BindingError {
    pub path: ElementPath,
    pub kind: BindingErrorKind,
}

impl BindingError {
    pub fn new(path: ElementPath, kind: BindingErrorKind) -> Self {
        BindingError { path, kind }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingErrorKind {
    #[error("expected element <{expected}>, found <{found}>")]
    ElementMismatch { expected: String, found: String },

    #[error("missing required attribute `{attribute}` on <{element}>")]
    MissingAttribute { attribute: String, element: String },

    #[error("attribute `{attribute}`: cannot coerce `{value}` to {expected}: {reason}")]
    Coercion {
        attribute: String,
        value: String,
        expected: Datatype,
        reason: String,
    },

    #[error("attribute `{attribute}`: `{value}` is not a valid reference")]
    InvalidLeaf { attribute: String, value: String },

    #[error("unregistered child element <{child}> under <{parent}>")]
    UnknownChild { child: String, parent: String },

    #[error("duplicate key \"{key}\" among <{element}> siblings")]
    DuplicateKey { element: String, key: String },

    #[error("element <{element}> may appear only once")]
    DuplicateChild { element: String },

    #[error("no descriptor registered for type {target}")]
    UnresolvedDescriptor { target: String },

    #[error("no descriptor registered for element <{element}>")]
    UnresolvedElement { element: String },

    #[error("post-bind hook for <{element}> failed: {message}")]
    Hook { element: String, message: String },

    #[error("field `{field}`: {reason}")]
    Extract { field: String, reason: String },
}
