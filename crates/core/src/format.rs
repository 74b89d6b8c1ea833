//! Rendering of property values for display.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use imd_protocol::PropertyValue;
use imd_runtime::Result;

/// Output representation chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputStyle {
	/// Indented `key: value` lines.
	#[default]
	KeyValueText,
	/// XML property-list document.
	StructuredMarkup,
}

/// Renders `value` in `style`.
///
/// Text output carries no trailing newline.
pub fn format(value: &PropertyValue, style: OutputStyle) -> Result<Vec<u8>> {
	match style {
		OutputStyle::KeyValueText => Ok(format_text(value).into_bytes()),
		OutputStyle::StructuredMarkup => Ok(value.to_xml()?),
	}
}

/// Parses output produced with [`OutputStyle::StructuredMarkup`].
pub fn decode_markup(bytes: &[u8]) -> Result<PropertyValue> {
	Ok(PropertyValue::from_plist_bytes(bytes)?)
}

/// Key/value text rendering.
///
/// A top-level scalar renders as its bare text. Containers render one line
/// per member, nested members indented two spaces per level.
pub fn format_text(value: &PropertyValue) -> String {
	let mut lines = Vec::new();
	match value {
		PropertyValue::Dictionary(entries) => write_dictionary(&mut lines, entries, 0),
		PropertyValue::Array(items) => write_array(&mut lines, items, 0),
		scalar => lines.push(scalar_text(scalar)),
	}
	lines.join("\n")
}

fn write_dictionary(lines: &mut Vec<String>, entries: &BTreeMap<String, PropertyValue>, depth: usize) {
	for (key, value) in entries {
		write_member(lines, key, value, depth);
	}
}

fn write_array(lines: &mut Vec<String>, items: &[PropertyValue], depth: usize) {
	for (index, value) in items.iter().enumerate() {
		write_member(lines, &index.to_string(), value, depth);
	}
}

fn write_member(lines: &mut Vec<String>, label: &str, value: &PropertyValue, depth: usize) {
	let indent = "  ".repeat(depth);
	match value {
		PropertyValue::Dictionary(entries) => {
			lines.push(format!("{indent}{label}:"));
			write_dictionary(lines, entries, depth + 1);
		}
		PropertyValue::Array(items) => {
			lines.push(format!("{indent}{label}:"));
			write_array(lines, items, depth + 1);
		}
		scalar => lines.push(format!("{indent}{label}: {}", scalar_text(scalar))),
	}
}

fn scalar_text(value: &PropertyValue) -> String {
	match value {
		PropertyValue::String(s) => s.clone(),
		PropertyValue::Integer(i) => i.to_string(),
		PropertyValue::Real(r) => format!("{r:.6}"),
		PropertyValue::Boolean(b) => b.to_string(),
		PropertyValue::Data(bytes) => STANDARD.encode(bytes),
		PropertyValue::Array(_) | PropertyValue::Dictionary(_) => String::new(),
	}
}
