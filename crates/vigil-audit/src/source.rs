//! Conversion of request payloads to text.
//!
//! Bodies are decoded as JSON first and re-emitted in compact canonical
//! form. Payloads that are not JSON fall back to plain UTF-8. If neither
//! works the error description stands in for the payload, so a record
//! always carries something.

/// Converts `bytes` to the text stored in a record.
#[must_use]
pub fn source_to_text(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => value.to_string(),
        Err(json_err) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(utf8_err) => {
                tracing::debug!(
                    target: "vigil_audit",
                    error = %json_err,
                    "payload is neither JSON nor UTF-8"
                );
                format!("unable to decode request body: {utf8_err}")
            }
        },
    }
}

/// Combines several named JSON payloads into one object.
///
/// Each part goes through [`source_to_text`]; parts that are JSON are
/// embedded as JSON, anything else as a string.
#[must_use]
pub fn combine_sources(parts: &[(&str, Option<&[u8]>)]) -> Option<String> {
    let mut object = serde_json::Map::new();
    for (name, bytes) in parts {
        if let Some(bytes) = bytes {
            let value = serde_json::from_slice(bytes)
                .unwrap_or_else(|_| serde_json::Value::String(source_to_text(bytes)));
            object.insert((*name).to_string(), value);
        }
    }
    (!object.is_empty()).then(|| serde_json::Value::Object(object).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_canonicalized() {
        let text = source_to_text(b"{ \"title\" :  \"Dune\",\n \"year\": 1965 }");
        assert_eq!(text, r#"{"title":"Dune","year":1965}"#);
    }

    #[test]
    fn non_json_falls_back_to_utf8() {
        assert_eq!(source_to_text(b"title=Dune&year=1965"), "title=Dune&year=1965");
    }

    #[test]
    fn undecodable_bytes_yield_error_text() {
        let text = source_to_text(&[0xff, 0xfe, 0x00, 0x80]);
        assert!(text.starts_with("unable to decode request body"));
    }

    #[test]
    fn combines_named_parts() {
        let combined = combine_sources(&[
            ("persistent", Some(br#"{"a":1}"#.as_slice())),
            ("transient", None),
        ]);
        assert_eq!(combined.as_deref(), Some(r#"{"persistent":{"a":1}}"#));
        assert_eq!(combine_sources(&[("x", None)]), None);
    }
}
