//! Property Values
//!
//! Properties of different types share one registry per node. The registry
//! stores [`PropertyValue`], a tagged union over the supported kinds, and the
//! [`PropertyType`] trait converts between a concrete Rust type and the union
//! at every typed access site.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// The kind of value a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Int,
    Int64,
    UInt,
    UInt64,
    Size,
    Double,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "i32",
            ValueKind::Int64 => "i64",
            ValueKind::UInt => "u32",
            ValueKind::UInt64 => "u64",
            ValueKind::Size => "usize",
            ValueKind::Double => "f64",
            ValueKind::Text => "string",
        };
        f.write_str(name)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Int64(i64),
    UInt(u32),
    UInt64(u64),
    Size(usize),
    Double(f64),
    Text(String),
}

impl PropertyValue {
    /// The variant tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Bool(_) => ValueKind::Bool,
            PropertyValue::Int(_) => ValueKind::Int,
            PropertyValue::Int64(_) => ValueKind::Int64,
            PropertyValue::UInt(_) => ValueKind::UInt,
            PropertyValue::UInt64(_) => ValueKind::UInt64,
            PropertyValue::Size(_) => ValueKind::Size,
            PropertyValue::Double(_) => ValueKind::Double,
            PropertyValue::Text(_) => ValueKind::Text,
        }
    }

    /// Parse a string as a value of the given kind.
    ///
    /// Booleans accept `true`/`false`, `1`/`0`, `yes`/`no` (case-insensitive).
    pub fn parse(kind: ValueKind, text: &str) -> Result<Self> {
        let text = text.trim();
        let malformed =
            || GraphError::Config(format!("cannot parse `{text}' as a value of type {kind}"));
        let value = match kind {
            ValueKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => PropertyValue::Bool(true),
                "false" | "0" | "no" => PropertyValue::Bool(false),
                _ => return Err(malformed()),
            },
            ValueKind::Int => PropertyValue::Int(text.parse().map_err(|_| malformed())?),
            ValueKind::Int64 => PropertyValue::Int64(text.parse().map_err(|_| malformed())?),
            ValueKind::UInt => PropertyValue::UInt(text.parse().map_err(|_| malformed())?),
            ValueKind::UInt64 => PropertyValue::UInt64(text.parse().map_err(|_| malformed())?),
            ValueKind::Size => PropertyValue::Size(text.parse().map_err(|_| malformed())?),
            ValueKind::Double => PropertyValue::Double(text.parse().map_err(|_| malformed())?),
            ValueKind::Text => PropertyValue::Text(text.to_string()),
        };
        Ok(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Int64(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::UInt64(v) => write!(f, "{v}"),
            PropertyValue::Size(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
        }
    }
}

/// A Rust type that can be stored in a property.
pub trait PropertyType: Clone + PartialEq + Send + 'static {
    /// The union variant this type maps to.
    const KIND: ValueKind;

    fn into_value(self) -> PropertyValue;

    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_property_type {
    ($ty:ty, $variant:ident) => {
        impl PropertyType for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for PropertyValue {
            fn from(value: $ty) -> Self {
                PropertyValue::$variant(value)
            }
        }
    };
}

impl_property_type!(bool, Bool);
impl_property_type!(i32, Int);
impl_property_type!(i64, Int64);
impl_property_type!(u32, UInt);
impl_property_type!(u64, UInt64);
impl_property_type!(usize, Size);
impl_property_type!(f64, Double);
impl_property_type!(String, Text);

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_conversion_checks_variant() {
        let value = 4.0_f64.into_value();
        assert_eq!(value.kind(), ValueKind::Double);
        assert_eq!(f64::from_value(&value), Some(4.0));
        assert_eq!(i32::from_value(&value), None);
    }

    #[test]
    fn parse_by_kind() {
        assert_eq!(
            PropertyValue::parse(ValueKind::Int, " 42 ").unwrap(),
            PropertyValue::Int(42)
        );
        assert_eq!(
            PropertyValue::parse(ValueKind::Bool, "Yes").unwrap(),
            PropertyValue::Bool(true)
        );
        assert_eq!(
            PropertyValue::parse(ValueKind::Double, "1e6").unwrap(),
            PropertyValue::Double(1e6)
        );

        let err = PropertyValue::parse(ValueKind::Size, "-1").unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }

    #[test]
    fn value_equality_is_per_variant() {
        assert_ne!(PropertyValue::Int(1), PropertyValue::Int64(1));
        assert_eq!(PropertyValue::from("x"), PropertyValue::Text("x".into()));
    }
}
