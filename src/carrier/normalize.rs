//! Shape and text helpers shared by the per-carrier normalizers.

use itertools::Itertools;
use serde_json::Value;
use std::borrow::Cow;

/// Coerce a field that is sometimes a mapping and sometimes a list into a list.
///
/// `null` and a missing field both become an empty list.
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Walk a path of mapping keys.
pub fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
}

/// Read a scalar field as text. Numbers are rendered, `#text` of a mixed element is used.
pub fn text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Object(map) => map.get("#text").and_then(text),
        _ => None,
    }
}

/// Read the scalar at `path` as text.
pub fn text_at<'a>(value: &'a Value, path: &[&str]) -> Option<Cow<'a, str>> {
    at(value, path).and_then(text)
}

/// Replace every character at or above code point 128 with `replacement`.
///
/// Clean input is returned borrowed, so sanitizing twice is free and yields the same text.
pub fn sanitize_ascii<'a>(input: &'a str, replacement: &str) -> Cow<'a, str> {
    if input.is_ascii() {
        return Cow::Borrowed(input);
    }
    let mut cleaned = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii() {
            cleaned.push(ch);
        } else {
            cleaned.push_str(replacement);
        }
    }
    Cow::Owned(cleaned)
}

/// Sanitize with the default substitute (removal).
pub fn clean(input: &str) -> String {
    sanitize_ascii(input.trim(), "").into_owned()
}

/// Join the present address fields in the given priority order.
pub fn join_location(address: Option<&Value>, keys: &[&str]) -> Option<String> {
    let address = address?;
    let joined = keys
        .iter()
        .filter_map(|key| address.get(*key).and_then(text))
        .map(|part| clean(&part))
        .filter(|part| !part.is_empty())
        .join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Exact-prefix membership test against a carrier's delivered phrase table.
pub fn is_delivered(message: &str, phrases: &[&str]) -> bool {
    let delivered = phrases.iter().any(|phrase| message.starts_with(phrase));
    if !delivered {
        tracing::trace!("Message not in delivered table: {}", message);
    }
    delivered
}
