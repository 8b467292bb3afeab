//! Admin `Authorization` header handling: accepts `Bearer <key>`,
//! `ApiKey <key>`, or the raw key, compared byte-exact against the
//! configured admin key.

use axum::http::HeaderMap;

const SCHEMES: &[&str] = &["Bearer", "ApiKey"];

/// Extract the key portion of an `Authorization` header value, stripping a
/// recognized scheme prefix (case-insensitive) and trimming surrounding
/// whitespace. A header with no recognized prefix is treated as a raw key.
pub fn extract_key(raw: &str) -> String {
    let trimmed = raw.trim();
    for scheme in SCHEMES {
        if trimmed.len() > scheme.len() && trimmed.is_char_boundary(scheme.len()) {
            let (prefix, rest) = trimmed.split_at(scheme.len());
            if prefix.eq_ignore_ascii_case(scheme) {
                return rest.trim_start().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// `true` iff `headers` carries an `Authorization` value whose extracted key
/// matches `admin_key` byte-for-byte.
pub fn is_authorized(headers: &HeaderMap, admin_key: &str) -> bool {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };
    extract_key(raw) == admin_key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bearer_prefix() {
        assert_eq!(extract_key("Bearer abc123"), "abc123");
    }

    #[test]
    fn double_space_collapses_to_single_trim() {
        assert_eq!(extract_key("Bearer  k"), "k");
    }

    #[test]
    fn strips_apikey_prefix_case_insensitively() {
        assert_eq!(extract_key("apikey xyz"), "xyz");
    }

    #[test]
    fn raw_key_with_no_scheme_passes_through() {
        assert_eq!(extract_key("rawkey"), "rawkey");
    }
}
