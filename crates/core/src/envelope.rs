//! The `Headers:` / `Body-Base64:` textual wrapping an agent uses inside a
//! Response body to carry HTTP headers and binary bytes over the
//! string-typed wire field.

use base64::{engine::general_purpose::STANDARD, Engine};

const HEADER_PREFIX: &str = "Headers:\n";
const BODY_MARKER: &str = "\nBody-Base64:\n";

/// Encode `headers` and raw `body` bytes into the envelope text. Header
/// values are assumed 7-bit clean and free of `\n` (the wire contract).
pub fn encode(headers: &[(String, String)], body: &[u8]) -> String {
    let mut out = String::from(HEADER_PREFIX);
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.push_str("Body-Base64:\n");
    out.push_str(&STANDARD.encode(body));
    out
}

/// Parse an envelope body. Returns `None` if `body` does not start with the
/// `Headers:\n` marker; callers fall back to treating the body as a raw,
/// verbatim string in that case.
pub fn parse(body: &str) -> Option<(Vec<(String, String)>, Vec<u8>)> {
    let rest = body.strip_prefix(HEADER_PREFIX)?;
    let marker_at = rest.find(BODY_MARKER)?;
    let header_block = &rest[..marker_at];
    let b64 = &rest[marker_at + BODY_MARKER.len()..];
    let b64 = b64.trim_end_matches('\n');

    let bytes = STANDARD.decode(b64).ok()?;

    let mut headers = Vec::new();
    for line in header_block.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(": ") {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    Some((headers, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_headers_and_binary_body() {
        let headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("X-Request-Id".to_string(), "abc-123".to_string()),
        ];
        let body = vec![0u8, 1, 2, 255, 254, 10, 13];

        let encoded = encode(&headers, &body);
        let (parsed_headers, parsed_body) = parse(&encoded).expect("envelope should parse");

        assert_eq!(parsed_headers, headers);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn round_trips_empty_headers() {
        let encoded = encode(&[], b"hi");
        let (headers, body) = parse(&encoded).unwrap();
        assert!(headers.is_empty());
        assert_eq!(body, b"hi");
    }

    #[test]
    fn non_envelope_body_fails_to_parse() {
        assert!(parse("plain text body, not an envelope").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn splitter_uses_first_colon_space_only() {
        let headers = vec![("X-Note".to_string(), "a: b: c".to_string())];
        let encoded = encode(&headers, b"x");
        let (parsed, _) = parse(&encoded).unwrap();
        assert_eq!(parsed, vec![("X-Note".to_string(), "a: b: c".to_string())]);
    }
}
