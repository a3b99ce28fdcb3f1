//! Raw declarations and the rule grammar.
//!
//! A declaration is the element name a type registers under plus an ordered
//! list of `key=value` rules:
//!
//! | rule | meaning |
//! |---|---|
//! | `target=<Type>` | type the descriptor binds to |
//! | `@<attr>=optional` / `@<attr>=required` | attribute presence |
//! | `@<attr>=datatype:<Type>` | coercion target, implies required unless optional |
//! | `@<attr>=default:<value>` | declared default, implies optional |
//! | `@<attr>=leaf` | value is a reference/marker |
//! | `key=@<attr>` | identity key |
//! | `keyed-as=<Type>` | siblings are organized by that type's key |
//! | `<element>=<Type>` | child element, single occurrence |
//! | `<element>=collection:<Type>` | child element, zero or more |
//! | `<*>=ignore` | skip unregistered child elements |

use serde::{Deserialize, Serialize};

use crate::datatype::Datatype;
use crate::descriptor::Multiplicity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub element: String,
    pub rules: Vec<String>,
}

impl Declaration {
    pub fn new(element: impl Into<String>, rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Declaration {
            element: element.into(),
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a compact comma separated metadata string into rules.
    ///
    /// ```
    /// use treebind_core::Declaration;
    ///
    /// let decl = Declaration::from_metadata("widget", "target=Widget, @name=optional,key=@name");
    /// assert_eq!(decl.rules, ["target=Widget", "@name=optional", "key=@name"]);
    /// ```
    pub fn from_metadata(element: impl Into<String>, metadata: &str) -> Self {
        Declaration {
            element: element.into(),
            rules: metadata
                .split(',')
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// The inverse of [`Declaration::from_metadata`], as long as no rule
    /// contains `,` or edge whitespace. Defaults with either need the rule
    /// list form.
    pub fn metadata(&self) -> String {
        self.rules.join(",")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Rule {
    Target(String),
    Attribute {
        name: String,
        modifier: AttributeModifier,
    },
    Key(String),
    KeyedAs(String),
    Child {
        element: String,
        target: String,
        multiplicity: Multiplicity,
    },
    IgnoreUnknown,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AttributeModifier {
    Optional,
    Required,
    Leaf,
    Datatype(Datatype),
    Default(String),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RuleError {
    Malformed(&'static str),
    UnknownDatatype(String),
}

impl Rule {
    pub(crate) fn parse(raw: &str) -> Result<Self, RuleError> {
        let (lhs, rhs) = raw
            .split_once('=')
            .ok_or(RuleError::Malformed("expected `name=value`"))?;
        let lhs = lhs.trim();
        // Only the start is trimmed for attributes: a default keeps its text.
        let value = rhs.trim_start();
        let rhs = rhs.trim();

        match lhs {
            "target" => Ok(Rule::Target(non_empty(rhs, "missing type name")?)),
            "keyed-as" => Ok(Rule::KeyedAs(non_empty(rhs, "missing type name")?)),
            "key" => {
                let attribute = rhs
                    .strip_prefix('@')
                    .ok_or(RuleError::Malformed("key must name an attribute as `@name`"))?;
                Ok(Rule::Key(non_empty(attribute, "missing attribute name")?))
            }
            "<*>" => match rhs {
                "ignore" => Ok(Rule::IgnoreUnknown),
                _ => Err(RuleError::Malformed("`<*>` only accepts `ignore`")),
            },
            _ => {
                if let Some(name) = lhs.strip_prefix('@') {
                    let name = non_empty(name, "missing attribute name")?;
                    let modifier = AttributeModifier::parse(value)?;
                    Ok(Rule::Attribute { name, modifier })
                } else if let Some(element) = lhs.strip_prefix('<').and_then(|l| l.strip_suffix('>')) {
                    let element = non_empty(element, "missing child element name")?;
                    let (multiplicity, target) = match rhs.strip_prefix("collection:") {
                        Some(target) => (Multiplicity::Collection, target),
                        None => (Multiplicity::Single, rhs),
                    };
                    Ok(Rule::Child {
                        element,
                        target: non_empty(target, "missing type name")?,
                        multiplicity,
                    })
                } else {
                    Err(RuleError::Malformed("unrecognized rule"))
                }
            }
        }
    }
}

impl AttributeModifier {
    fn parse(raw: &str) -> Result<Self, RuleError> {
        if let Some(value) = raw.strip_prefix("default:") {
            return Ok(Self::Default(value.to_string()));
        }
        let raw = raw.trim_end();
        match raw {
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            "leaf" => Ok(Self::Leaf),
            _ => {
                if let Some(name) = raw.strip_prefix("datatype:") {
                    Datatype::parse(name)
                        .map(Self::Datatype)
                        .ok_or_else(|| RuleError::UnknownDatatype(name.trim().to_string()))
                } else {
                    Err(RuleError::Malformed("unknown attribute modifier"))
                }
            }
        }
    }
}

fn non_empty(value: &str, reason: &'static str) -> Result<String, RuleError> {
    let value = value.trim();
    if value.is_empty() {
        Err(RuleError::Malformed(reason))
    } else {
        Ok(value.to_string())
    }
}
