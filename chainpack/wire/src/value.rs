//! The ChainPack value model.
//!
//! [`Value`] is a closed tagged union over every type the wire format
//! can carry; [`RpcValue`] pairs a `Value` with optional [`MetaData`].
//! Containers hold `RpcValue` so nested values keep their own metadata,
//! except [`Array`], whose elements are plain homogeneous `Value`s.

use crate::datetime::DateTime;
use crate::meta::MetaData;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Type discriminant for a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Absence of a value
    Null,
    /// Boolean
    Bool,
    /// Signed integer
    Int,
    /// Unsigned integer
    UInt,
    /// IEEE-754 double
    Double,
    /// Millisecond timestamp
    DateTime,
    /// Raw bytes
    Blob,
    /// UTF-8 text
    String,
    /// Ordered sequence
    List,
    /// Homogeneous sequence
    Array,
    /// String-keyed mapping
    Map,
    /// Unsigned-integer-keyed mapping
    IMap,
}

/// Type-consistency violation while building an [`Array`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMismatch {
    /// Arrays cannot nest as their own element type
    #[error("array element type cannot be array")]
    NestedArray,
    /// Element type differs from the array's declared element type
    #[error("array element type mismatch: expected {expected:?}, found {found:?}")]
    Element {
        /// Declared element type of the array
        expected: ValueType,
        /// Type of the rejected element
        found: ValueType,
    },
}

/// A `List` constrained to one element type for a denser wire encoding.
///
/// Elements are plain [`Value`]s; per-element metadata is not
/// representable. The element type is fixed at construction and every
/// push is checked against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    elem_type: ValueType,
    elems: Vec<Value>,
}

impl Array {
    /// Empty array of `elem_type` elements.
    pub fn new(elem_type: ValueType) -> Result<Self, TypeMismatch> {
        if elem_type == ValueType::Array {
            return Err(TypeMismatch::NestedArray);
        }
        Ok(Self {
            elem_type,
            elems: Vec::new(),
        })
    }

    /// Declared element type.
    pub fn elem_type(&self) -> ValueType {
        self.elem_type
    }

    /// Append `elem`, rejecting a type that differs from the declared one.
    pub fn push(&mut self, elem: Value) -> Result<(), TypeMismatch> {
        let found = elem.value_type();
        if found != self.elem_type {
            return Err(TypeMismatch::Element {
                expected: self.elem_type,
                found,
            });
        }
        self.elems.push(elem);
        Ok(())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// True when no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elems.get(index)
    }

    /// Elements in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elems.iter()
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elems.iter()
    }
}

/// One ChainPack value.
///
/// The payload always matches the variant, so a type/payload mismatch is
/// unrepresentable; the only construction-time check left is the
/// homogeneity of [`Array`] elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// IEEE-754 double
    Double(f64),
    /// Millisecond timestamp
    DateTime(DateTime),
    /// Raw bytes
    Blob(Vec<u8>),
    /// UTF-8 text
    String(String),
    /// Ordered sequence of values
    List(Vec<RpcValue>),
    /// Homogeneous sequence of values
    Array(Array),
    /// String-keyed mapping, keys unique
    Map(BTreeMap<String, RpcValue>),
    /// Unsigned-integer-keyed mapping, keys unique
    IMap(BTreeMap<u64, RpcValue>),
}

impl Value {
    /// Type discriminant of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Double(_) => ValueType::Double,
            Value::DateTime(_) => ValueType::DateTime,
            Value::Blob(_) => ValueType::Blob,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Array(_) => ValueType::Array,
            Value::Map(_) => ValueType::Map,
            Value::IMap(_) => ValueType::IMap,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<RpcValue>> for Value {
    fn from(v: Vec<RpcValue>) -> Self {
        Value::List(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, RpcValue>> for Value {
    fn from(v: BTreeMap<String, RpcValue>) -> Self {
        Value::Map(v)
    }
}

impl From<BTreeMap<u64, RpcValue>> for Value {
    fn from(v: BTreeMap<u64, RpcValue>) -> Self {
        Value::IMap(v)
    }
}

/// A [`Value`] with optional [`MetaData`] attached.
///
/// This is the unit the codec packs and unpacks; empty metadata is not
/// written to the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RpcValue {
    meta: MetaData,
    value: Value,
}

impl RpcValue {
    /// Wrap `value` with no metadata.
    pub fn new(value: Value) -> Self {
        Self {
            meta: MetaData::new(),
            value,
        }
    }

    /// Replace the metadata, builder style.
    pub fn with_meta(mut self, meta: MetaData) -> Self {
        self.meta = meta;
        self
    }

    /// Attached metadata.
    pub fn meta(&self) -> &MetaData {
        &self.meta
    }

    /// Mutable access to the metadata.
    pub fn meta_mut(&mut self) -> &mut MetaData {
        &mut self.meta
    }

    /// True when at least one meta tag is set.
    pub fn has_meta(&self) -> bool {
        !self.meta.is_empty()
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the wrapped value.
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// Discard the metadata and take the value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Type discriminant of the wrapped value.
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    /// Boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Signed payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Unsigned payload, if this is a `UInt`.
    pub fn as_uint(&self) -> Option<u64> {
        match self.value {
            Value::UInt(v) => Some(v),
            _ => None,
        }
    }

    /// Double payload, if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self.value {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Timestamp payload, if this is a `DateTime`.
    pub fn as_datetime(&self) -> Option<DateTime> {
        match self.value {
            Value::DateTime(v) => Some(v),
            _ => None,
        }
    }

    /// Byte payload, if this is a `Blob`.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Text payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Elements, if this is a `List`.
    pub fn as_list(&self) -> Option<&[RpcValue]> {
        match &self.value {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Homogeneous elements, if this is an `Array`.
    pub fn as_array(&self) -> Option<&Array> {
        match &self.value {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Entries, if this is a `Map`.
    pub fn as_map(&self) -> Option<&BTreeMap<String, RpcValue>> {
        match &self.value {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Entries, if this is an `IMap`.
    pub fn as_imap(&self) -> Option<&BTreeMap<u64, RpcValue>> {
        match &self.value {
            Value::IMap(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Into<Value>> From<T> for RpcValue {
    fn from(value: T) -> Self {
        RpcValue::new(value.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}u", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "d\"{}\"", v),
            Value::Blob(v) => {
                write!(f, "x\"")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "\"")
            }
            Value::String(v) => write!(f, "{:?}", v),
            Value::List(elems) => {
                write!(f, "[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, e) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{:?}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::IMap(entries) => {
                write!(f, "i{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.meta.is_empty() {
            write!(f, "{}", self.meta)?;
        }
        write!(f, "{}", self.value)
    }
}
