use std::fmt::{self, Display};
use std::num::{ParseFloatError, ParseIntError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

/// Coercion target of an attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Datatype {
    String,
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    Float,
    Double,
    /// Human readable duration (`30s`, `1h 5m`).
    Duration,
    /// One of the variants of a registered enum.
    Enum(String),
}

impl Datatype {
    /// Resolve a datatype name as written in a `datatype:` rule.
    ///
    /// Qualified names resolve by their last path segment, so
    /// `std::time::Duration` and `Duration` are the same type.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(enum_name) = name.strip_prefix("enum:") {
            let enum_name = enum_name.trim();
            return (!enum_name.is_empty()).then(|| Self::Enum(enum_name.to_string()));
        }

        let last = name.rsplit(['.', ':']).next().unwrap_or(name);
        match last {
            "String" | "string" | "str" => Some(Self::String),
            "Boolean" | "boolean" | "bool" => Some(Self::Boolean),
            "Integer" | "integer" | "int" | "i32" => Some(Self::Integer),
            "Long" | "long" | "i64" => Some(Self::Long),
            "Float" | "float" | "f32" => Some(Self::Float),
            "Double" | "double" | "f64" => Some(Self::Double),
            "Duration" | "duration" => Some(Self::Duration),
            _ => None,
        }
    }

    /// Whether values of this type may serve as an identity key.
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Boolean | Self::Integer | Self::Long | Self::Enum(_)
        )
    }

    /// Coerce a raw attribute string into a typed value.
    ///
    /// No trimming, rounding or truncation is applied: text that does not
    /// spell a value of this type exactly is rejected.
    pub fn coerce(&self, raw: &str, enums: &EnumTable) -> Result<Value, CoercionError> {
        let value = match self {
            Self::String => Value::String(raw.to_string()),
            Self::Boolean => Value::Boolean(parse_bool(raw)?),
            Self::Integer => Value::Integer(raw.parse()?),
            Self::Long => Value::Long(raw.parse()?),
            Self::Float => {
                let v: f32 = raw.parse().map_err(CoercionError::Float)?;
                if !v.is_finite() {
                    return Err(CoercionError::NonFinite);
                }
                Value::Float(v)
            }
            Self::Double => {
                let v: f64 = raw.parse().map_err(CoercionError::Float)?;
                if !v.is_finite() {
                    return Err(CoercionError::NonFinite);
                }
                Value::Double(v)
            }
            Self::Duration => Value::Duration(humantime::parse_duration(raw)?),
            Self::Enum(name) => {
                let variants = enums
                    .variants(name)
                    .ok_or_else(|| CoercionError::UnknownEnum(name.clone()))?;
                if !variants.iter().any(|v| v == raw) {
                    return Err(CoercionError::UnknownVariant {
                        name: name.clone(),
                        expected: variants.join(", "),
                    });
                }
                Value::Enum(raw.to_string())
            }
        };
        Ok(value)
    }

    /// The value an optional attribute takes when it is absent and declares
    /// no default.
    ///
    /// | datatype | zero value |
    /// |---|---|
    /// | String | `""` |
    /// | Boolean | `false` |
    /// | Integer, Long | `0` |
    /// | Float, Double | `0.0` |
    /// | Duration | `0s` |
    /// | EnumOf | first declared variant |
    pub fn zero(&self, enums: &EnumTable) -> Result<Value, CoercionError> {
        let value = match self {
            Self::String => Value::String(String::new()),
            Self::Boolean => Value::Boolean(false),
            Self::Integer => Value::Integer(0),
            Self::Long => Value::Long(0),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::Duration => Value::Duration(Duration::ZERO),
            Self::Enum(name) => {
                let first = enums
                    .variants(name)
                    .and_then(|variants| variants.first())
                    .ok_or_else(|| CoercionError::UnknownEnum(name.clone()))?;
                Value::Enum(first.clone())
            }
        };
        Ok(value)
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("String"),
            Self::Boolean => f.write_str("Boolean"),
            Self::Integer => f.write_str("Integer"),
            Self::Long => f.write_str("Long"),
            Self::Float => f.write_str("Float"),
            Self::Double => f.write_str("Double"),
            Self::Duration => f.write_str("Duration"),
            Self::Enum(name) => write!(f, "enum:{name}"),
        }
    }
}

impl From<Datatype> for String {
    fn from(datatype: Datatype) -> Self {
        datatype.to_string()
    }
}

impl TryFrom<String> for Datatype {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Datatype::parse(&name).ok_or_else(|| format!("unknown datatype `{name}`"))
    }
}

fn parse_bool(raw: &str) -> Result<bool, CoercionError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(CoercionError::NotBoolean),
    }
}

/// Why a raw string could not be coerced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoercionError {
    #[error("expected one of true, false, yes, no, on, off, 1, 0")]
    NotBoolean,

    #[error("{0}")]
    Integer(#[from] ParseIntError),

    #[error("{0}")]
    Float(ParseFloatError),

    #[error("non-finite numbers are not accepted")]
    NonFinite,

    #[error("{0}")]
    Duration(#[from] humantime::DurationError),

    #[error("not a variant of enum {name} (expected one of {expected})")]
    UnknownVariant { name: String, expected: String },

    #[error("enum {0} is not declared")]
    UnknownEnum(String),
}

/// A typed attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Duration(Duration),
    Enum(String),
}

impl Value {
    /// The string form that coerces back to this exact value.
    pub fn to_canonical(&self) -> String {
        match self {
            Self::String(s) | Self::Enum(s) => s.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Long(l) => l.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Duration(d) => humantime::format_duration(*d).to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(i64::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) | Self::Enum(s) => serializer.serialize_str(s),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i32(*i),
            Self::Long(l) => serializer.serialize_i64(*l),
            Self::Float(v) => serializer.serialize_f32(*v),
            Self::Double(v) => serializer.serialize_f64(*v),
            Self::Duration(_) => serializer.serialize_str(&self.to_canonical()),
        }
    }
}

/// Variants of an enum usable as `enum:<name>` datatype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDeclaration {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDeclaration {
    pub fn new(name: impl Into<String>, variants: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EnumDeclaration {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }
}

/// Enum name -> ordered variant spellings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnumTable(IndexMap<String, Vec<String>>);

impl EnumTable {
    pub fn variants(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(name, variants)| (name.as_str(), variants.as_slice()))
    }

    pub(crate) fn insert(&mut self, name: String, variants: Vec<String>) {
        self.0.insert(name, variants);
    }
}
