//! Property values returned by lockdown queries.
//!
//! [`PropertyValue`] is the typed tree every query result is decoded into. It
//! mirrors the subset of property-list types lockdown actually returns and
//! converts losslessly to and from [`plist::Value`], which owns the on-wire
//! encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

use crate::error::Result;

/// Integer wide enough for both signed and unsigned 64-bit plist integers.
///
/// Only constructible from 64-bit (or narrower) integers, so every value is
/// representable in a property list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Integer(i128);

impl Integer {
	/// Returns the value if it fits in an `i64`.
	pub fn as_i64(self) -> Option<i64> {
		i64::try_from(self.0).ok()
	}

	/// Returns the value if it fits in a `u64`.
	pub fn as_u64(self) -> Option<u64> {
		u64::try_from(self.0).ok()
	}
}

macro_rules! integer_from {
	($($t:ty),*) => {
		$(impl From<$t> for Integer {
			fn from(v: $t) -> Self {
				Integer(i128::from(v))
			}
		})*
	};
}

integer_from!(i8, i16, i32, i64, u8, u16, u32, u64);

impl fmt::Display for Integer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<plist::Integer> for Integer {
	fn from(v: plist::Integer) -> Self {
		match v.as_signed() {
			Some(signed) => Integer::from(signed),
			// as_unsigned always succeeds when as_signed does not
			None => Integer::from(v.as_unsigned().unwrap_or(u64::MAX)),
		}
	}
}

impl From<Integer> for plist::Integer {
	fn from(v: Integer) -> Self {
		match v.as_i64() {
			Some(signed) => plist::Integer::from(signed),
			None => plist::Integer::from(v.as_u64().unwrap_or(u64::MAX)),
		}
	}
}

/// A recursively structured property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
	String(String),
	Integer(Integer),
	Real(f64),
	Boolean(bool),
	/// Opaque binary blob.
	Data(Vec<u8>),
	Array(Vec<PropertyValue>),
	/// Mapping with unique keys, iterated in key order.
	Dictionary(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
	/// Returns the string slice if this is a [`PropertyValue::String`].
	pub fn as_str(&self) -> Option<&str> {
		match self {
			PropertyValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			PropertyValue::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_integer(&self) -> Option<Integer> {
		match self {
			PropertyValue::Integer(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_dictionary(&self) -> Option<&BTreeMap<String, PropertyValue>> {
		match self {
			PropertyValue::Dictionary(d) => Some(d),
			_ => None,
		}
	}

	/// Looks up `key` when this value is a dictionary.
	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.as_dictionary().and_then(|d| d.get(key))
	}

	/// Whether this value is an array or dictionary.
	pub fn is_container(&self) -> bool {
		matches!(self, PropertyValue::Array(_) | PropertyValue::Dictionary(_))
	}

	/// Serializes the value as an XML property-list document.
	pub fn to_xml(&self) -> Result<Vec<u8>> {
		let mut buf = Vec::new();
		plist::Value::from(self.clone()).to_writer_xml(&mut buf)?;
		Ok(buf)
	}

	/// Parses an XML or binary property-list document.
	pub fn from_plist_bytes(bytes: &[u8]) -> Result<Self> {
		let value = plist::Value::from_reader(Cursor::new(bytes))?;
		Ok(PropertyValue::from(value))
	}
}

impl From<plist::Value> for PropertyValue {
	fn from(value: plist::Value) -> Self {
		match value {
			plist::Value::String(s) => PropertyValue::String(s),
			plist::Value::Integer(i) => PropertyValue::Integer(i.into()),
			plist::Value::Real(r) => PropertyValue::Real(r),
			plist::Value::Boolean(b) => PropertyValue::Boolean(b),
			plist::Value::Data(d) => PropertyValue::Data(d),
			plist::Value::Date(d) => PropertyValue::String(d.to_xml_format()),
			plist::Value::Uid(u) => PropertyValue::Integer(u.get().into()),
			plist::Value::Array(items) => {
				PropertyValue::Array(items.into_iter().map(PropertyValue::from).collect())
			}
			plist::Value::Dictionary(dict) => PropertyValue::Dictionary(
				dict.into_iter()
					.map(|(k, v)| (k, PropertyValue::from(v)))
					.collect(),
			),
			// plist::Value is non-exhaustive; nothing else appears on the wire today
			other => PropertyValue::String(format!("{other:?}")),
		}
	}
}

impl From<PropertyValue> for plist::Value {
	fn from(value: PropertyValue) -> Self {
		match value {
			PropertyValue::String(s) => plist::Value::String(s),
			PropertyValue::Integer(i) => plist::Value::Integer(i.into()),
			PropertyValue::Real(r) => plist::Value::Real(r),
			PropertyValue::Boolean(b) => plist::Value::Boolean(b),
			PropertyValue::Data(d) => plist::Value::Data(d),
			PropertyValue::Array(items) => {
				plist::Value::Array(items.into_iter().map(plist::Value::from).collect())
			}
			PropertyValue::Dictionary(dict) => plist::Value::Dictionary(
				dict.into_iter()
					.map(|(k, v)| (k, plist::Value::from(v)))
					.collect(),
			),
		}
	}
}

impl From<&str> for PropertyValue {
	fn from(s: &str) -> Self {
		PropertyValue::String(s.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(s: String) -> Self {
		PropertyValue::String(s)
	}
}

impl From<bool> for PropertyValue {
	fn from(b: bool) -> Self {
		PropertyValue::Boolean(b)
	}
}

impl From<i64> for PropertyValue {
	fn from(i: i64) -> Self {
		PropertyValue::Integer(i.into())
	}
}

impl From<u64> for PropertyValue {
	fn from(i: u64) -> Self {
		PropertyValue::Integer(i.into())
	}
}
