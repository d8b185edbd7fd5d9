//! XML to nested-mapping decoding for the XML carriers (UPS, USPS, FedEx).
//!
//! Element names lose their namespace prefix, attributes become `@name` keys, text that
//! sits next to child elements or attributes becomes `#text`, and repeated siblings fold
//! into an array. A sibling that appears once stays a plain mapping, which is exactly the
//! singleton-vs-list ambiguity the normalizers flatten with [`super::normalize::as_list`].

use super::types::{CarrierError, RawCarrierResponse};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

struct Frame {
	name: String,
	children: Map<String, Value>,
	text: String,
}

impl Frame {
	fn open(start: &BytesStart<'_>) -> Result<Self, CarrierError> {
		let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
		let mut children = Map::new();
		for attr in start.attributes() {
			let attr = attr.map_err(|e| {
				CarrierError::bad_response(format!("Invalid XML attribute in <{}>: {}", name, e))
			})?;
			let key = format!("@{}", String::from_utf8_lossy(attr.key.local_name().as_ref()));
			let value = attr.unescape_value()?.into_owned();
			children.insert(key, Value::String(value));
		}
		Ok(Self {
			name,
			children,
			text: String::new(),
		})
	}

	fn close(self) -> (String, Value) {
		let text = self.text.trim().to_string();
		let value = if self.children.is_empty() {
			if text.is_empty() {
				Value::Null
			} else {
				Value::String(text)
			}
		} else {
			let mut children = self.children;
			if !text.is_empty() {
				children.insert("#text".to_string(), Value::String(text));
			}
			Value::Object(children)
		};
		(self.name, value)
	}
}

fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
	match parent.get_mut(&name) {
		Some(Value::Array(items)) => items.push(value),
		Some(existing) => {
			let first = existing.take();
			*existing = Value::Array(vec![first, value]);
		}
		None => {
			parent.insert(name, value);
		}
	}
}

/// Decode an XML document into a nested mapping keyed by the root element's name.
///
/// # Errors
/// Returns `CarrierError::BadResponse` for malformed or truncated XML.
pub fn decode(xml: &str) -> Result<RawCarrierResponse, CarrierError> {
	let mut reader = Reader::from_str(xml);
	reader.config_mut().trim_text(true);

	let mut root = Map::new();
	let mut stack: Vec<Frame> = Vec::new();

	loop {
		match reader.read_event()? {
			Event::Start(start) => stack.push(Frame::open(&start)?),
			Event::Empty(start) => {
				let (name, value) = Frame::open(&start)?.close();
				match stack.last_mut() {
					Some(parent) => insert_child(&mut parent.children, name, value),
					None => insert_child(&mut root, name, value),
				}
			}
			Event::End(_) => {
				let frame = stack
					.pop()
					.ok_or_else(|| CarrierError::bad_response("Unbalanced XML end tag"))?;
				let (name, value) = frame.close();
				match stack.last_mut() {
					Some(parent) => insert_child(&mut parent.children, name, value),
					None => insert_child(&mut root, name, value),
				}
			}
			Event::Text(text) => {
				if let Some(frame) = stack.last_mut() {
					frame.text.push_str(&text.unescape()?);
				}
			}
			Event::CData(data) => {
				if let Some(frame) = stack.last_mut() {
					frame.text.push_str(&String::from_utf8_lossy(&data));
				}
			}
			Event::Eof => break,
			_ => {}
		}
	}

	if let Some(frame) = stack.last() {
		return Err(CarrierError::bad_response(format!(
			"Truncated XML: <{}> never closed",
			frame.name
		)));
	}
	if root.is_empty() {
		return Err(CarrierError::bad_response("Empty XML document"));
	}

	Ok(Value::Object(root))
}
