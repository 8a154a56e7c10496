//! Pure encoding helpers shared by the credential, flow and storage modules.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use url::form_urlencoded;

use crate::error::{Error, Result};

/// Join scopes with single spaces, in iteration order.
///
/// A single pre-joined scope string passes through unchanged, so
/// `scopes_to_string(["a b"])` and `scopes_to_string(["a", "b"])` agree.
pub fn scopes_to_string<I, S>(scopes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (i, scope) in scopes.into_iter().enumerate() {
        if i > 0 {
            joined.push(' ');
        }
        joined.push_str(scope.as_ref());
    }
    joined
}

/// Split a space-delimited scope string into individual scopes.
///
/// Lists are taken as already split and come back unchanged.
pub fn string_to_scopes(scopes: impl IntoScopes) -> Vec<String> {
    scopes.into_scopes()
}

/// Input accepted by [`string_to_scopes`].
pub trait IntoScopes {
    fn into_scopes(self) -> Vec<String>;
}

impl IntoScopes for &str {
    fn into_scopes(self) -> Vec<String> {
        self.split_whitespace().map(str::to_owned).collect()
    }
}

impl IntoScopes for &String {
    fn into_scopes(self) -> Vec<String> {
        self.as_str().into_scopes()
    }
}

impl IntoScopes for String {
    fn into_scopes(self) -> Vec<String> {
        self.as_str().into_scopes()
    }
}

impl<S: AsRef<str>> IntoScopes for Vec<S> {
    fn into_scopes(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_owned()).collect()
    }
}

impl<S: AsRef<str>> IntoScopes for &[S] {
    fn into_scopes(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_owned()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoScopes for [S; N] {
    fn into_scopes(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_owned()).collect()
    }
}

/// Add or replace a query parameter on a (possibly relative) URL.
///
/// A `None` value leaves the URL untouched. An existing parameter with the
/// same name has its value replaced; otherwise the parameter is appended.
/// Values are form-encoded (`' '` becomes `+`).
pub fn add_query_parameter(url: &str, name: &str, value: Option<&str>) -> String {
    let Some(value) = value else {
        return url.to_owned();
    };

    let (without_fragment, fragment) = match url.split_once('#') {
        Some((u, f)) => (u, Some(f)),
        None => (url, None),
    };
    let (base, query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));

    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()).into_owned() {
        if k == name {
            if !replaced {
                pairs.push((k, value.to_owned()));
                replaced = true;
            }
        } else {
            pairs.push((k, v));
        }
    }
    if !replaced {
        pairs.push((name.to_owned(), value.to_owned()));
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let mut out = format!("{base}?{query}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Return the slice of `key` starting at its first PEM `-----BEGIN` marker.
pub fn parse_pem_key(key: &[u8]) -> Option<&[u8]> {
    const MARKER: &[u8] = b"-----BEGIN";
    key.windows(MARKER.len())
        .position(|w| w == MARKER)
        .map(|start| &key[start..])
}

/// Encode a value as compact JSON with no insignificant whitespace.
///
/// Object keys of `serde_json::Value` maps are emitted in sorted order, so the
/// output is stable for anything that will be signed.
pub fn json_encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Decode(format!("JSON encoding failed: {e}")))
}

/// Validate bytes as UTF-8.
pub fn from_bytes(value: &[u8]) -> Result<&str> {
    std::str::from_utf8(value).map_err(|e| Error::Decode(format!("value is not UTF-8: {e}")))
}

/// URL-safe base64 without padding.
pub fn urlsafe_b64encode(raw: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode URL-safe base64, with or without trailing `=` padding.
pub fn urlsafe_b64decode(encoded: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    let encoded = encoded.as_ref();
    let end = encoded
        .iter()
        .rposition(|b| *b != b'=')
        .map_or(0, |i| i + 1);
    URL_SAFE_NO_PAD
        .decode(&encoded[..end])
        .map_err(|e| Error::Decode(format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_to_string_joins_iterables() {
        let empty: [&str; 0] = [];
        assert_eq!(scopes_to_string(empty), "");
        assert_eq!(scopes_to_string(Vec::<String>::new()), "");
        assert_eq!(scopes_to_string([""]), "");
        assert_eq!(scopes_to_string(["a"]), "a");
        assert_eq!(scopes_to_string(vec!["a", "b"]), "a b");
        assert_eq!(scopes_to_string(["a b"]), "a b");
        assert_eq!(scopes_to_string(["a", "b"].iter().map(|s| s.to_string())), "a b");
    }

    #[test]
    fn string_to_scopes_splits_on_whitespace() {
        assert_eq!(string_to_scopes(""), Vec::<String>::new());
        assert_eq!(string_to_scopes("a"), vec!["a"]);
        assert_eq!(
            string_to_scopes("a b c d e f"),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert_eq!(string_to_scopes("  a \t b\n"), vec!["a", "b"]);
    }

    #[test]
    fn string_to_scopes_passes_lists_through() {
        assert_eq!(string_to_scopes(["a", "b"]), vec!["a", "b"]);
        assert_eq!(string_to_scopes(vec!["a".to_string()]), vec!["a"]);
        assert_eq!(string_to_scopes(&["a b"][..]), vec!["a b"]);
        assert_eq!(string_to_scopes(String::from("a b")), vec!["a", "b"]);
    }

    #[test]
    fn scope_conversion_composes_to_identity() {
        let scopes = vec!["a".to_string(), "b".to_string()];
        assert_eq!(string_to_scopes(&scopes_to_string(&scopes)), scopes);
        assert_eq!(scopes_to_string(string_to_scopes("a b")), "a b");
    }

    #[test]
    fn add_query_parameter_cases() {
        assert_eq!(add_query_parameter("/action", "a", None), "/action");
        assert_eq!(add_query_parameter("/action", "a", Some("b")), "/action?a=b");
        assert_eq!(add_query_parameter("/action?a=b", "a", Some("c")), "/action?a=c");
        let added = add_query_parameter("/action?a=b", "c", Some("d"));
        assert!(
            added == "/action?a=b&c=d" || added == "/action?c=d&a=b",
            "got {added}"
        );
        assert_eq!(add_query_parameter("/action", "a", Some(" =")), "/action?a=+%3D");
    }

    #[test]
    fn add_query_parameter_keeps_fragment() {
        assert_eq!(
            add_query_parameter("https://example.com/cb#frag", "state", Some("xyz")),
            "https://example.com/cb?state=xyz#frag"
        );
    }

    #[test]
    fn parse_pem_key_finds_marker() {
        let key = b"1234-----BEGIN FOO BAR BAZ";
        assert_eq!(parse_pem_key(key), Some(&key[4..]));
        assert_eq!(parse_pem_key(b"DOES NOT HAVE DASHES"), None);
    }

    #[test]
    fn json_encode_is_compact() {
        assert_eq!(json_encode(&serde_json::json!({"foo": 10})).unwrap(), r#"{"foo":10}"#);
        assert_eq!(json_encode(&[42, 1337]).unwrap(), "[42,1337]");
        assert_eq!(
            json_encode(&serde_json::json!({"b": 1, "a": 2})).unwrap(),
            r#"{"a":2,"b":1}"#
        );
    }

    #[test]
    fn from_bytes_rejects_invalid_utf8() {
        assert_eq!(from_bytes(b"string-val").unwrap(), "string-val");
        assert!(from_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn urlsafe_b64_encode_strips_padding() {
        assert_eq!(urlsafe_b64encode(b"deadbeef"), "ZGVhZGJlZWY");
        assert_eq!(urlsafe_b64encode("deadbeef"), "ZGVhZGJlZWY");
    }

    #[test]
    fn urlsafe_b64_decode_tolerates_padding() {
        assert_eq!(urlsafe_b64decode("ZGVhZGJlZWY").unwrap(), b"deadbeef");
        assert_eq!(urlsafe_b64decode("ZGVhZGJlZWY=").unwrap(), b"deadbeef");
        assert!(urlsafe_b64decode("+").is_err());
    }
}
