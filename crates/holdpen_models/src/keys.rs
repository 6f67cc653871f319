//! Object key encoding as it travels between the store, the index and the report.

use crate::error::{ModelError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;

/// Decode a form-encoded key: `%XX` escapes, and `+` stands for a space.
///
/// A `%` that is not followed by two hex digits is an error.
pub fn query_unescape(encoded: &str) -> Result<String> {
    check_escapes(encoded)?;
    let spaced = encoded.replace('+', " ");
    decode(&spaced, encoded)
}

/// Decode `%XX` escapes only, leaving `+` alone (URI path semantics).
pub fn path_unescape(encoded: &str) -> Result<String> {
    check_escapes(encoded)?;
    decode(encoded, encoded)
}

/// Form-encode a raw key segment by segment, keeping `/` separators readable.
///
/// [`query_unescape`] restores the original key exactly.
pub fn encode_key(raw: &str) -> String {
    raw.split('/')
        .map(|segment| form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}

/// Characters escaped in a URI path segment. `%` is included so [`path_unescape`]
/// restores the key exactly, and `|` because reports join locations with it.
const URI_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode a raw key for use as a URI path, segment by segment.
pub fn encode_uri_path(raw: &str) -> String {
    raw.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a path as recorded in a report into the key to request from the store.
///
/// One leading `/` is dropped. Keys still carrying an encoded separator (`%2F`) are
/// decoded; everything else is used verbatim.
pub fn normalize_object_key(path: &str) -> Result<String> {
    let key = path.strip_prefix('/').unwrap_or(path);
    if key.contains("%2F") {
        query_unescape(key)
    } else {
        Ok(key.to_string())
    }
}

fn check_escapes(encoded: &str) -> Result<()> {
    let bytes = encoded.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(ModelError::Escape(encoded.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn decode(input: &str, original: &str) -> Result<String> {
    percent_decode_str(input)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ModelError::Utf8(original.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_unescape_handles_plus_and_escapes() {
        assert_eq!(query_unescape("a+b%2Fc.mxf").unwrap(), "a b/c.mxf");
        assert_eq!(query_unescape("100%25").unwrap(), "100%");
        assert_eq!(query_unescape("plain/key.mov").unwrap(), "plain/key.mov");
    }

    #[test]
    fn malformed_escapes_are_errors() {
        assert!(query_unescape("bad%zzkey").is_err());
        assert!(query_unescape("trailing%2").is_err());
        assert!(query_unescape("trailing%").is_err());
        assert!(query_unescape("%ff%fe").is_err());
    }

    #[test]
    fn path_unescape_keeps_plus() {
        assert_eq!(path_unescape("/a+b%20c").unwrap(), "/a+b c");
    }

    #[test]
    fn encode_key_round_trips() {
        for raw in ["dir/file name+1.mxf", "100% done/ünïcode.mov", "plain"] {
            let encoded = encode_key(raw);
            assert!(!encoded.contains(' '));
            assert_eq!(query_unescape(&encoded).unwrap(), raw);
        }
        assert_eq!(encode_key("a b/c"), "a+b/c");
    }

    #[test]
    fn uri_path_round_trips_through_path_unescape() {
        for raw in ["media/50%off.mp4", "media/clip%20v2.mp4", "a|b/c [1] #2?.mov", "x+y"] {
            let encoded = encode_uri_path(raw);
            assert!(!encoded.contains('|'));
            assert_eq!(path_unescape(&encoded).unwrap(), raw);
        }
        assert_eq!(encode_uri_path("media/50%off.mp4"), "media/50%25off.mp4");
    }

    #[test]
    fn normalize_strips_one_leading_slash() {
        assert_eq!(normalize_object_key("/media/clip.mxf").unwrap(), "media/clip.mxf");
        assert_eq!(normalize_object_key("//double").unwrap(), "/double");
        assert_eq!(normalize_object_key("media/clip.mxf").unwrap(), "media/clip.mxf");
    }

    #[test]
    fn normalize_decodes_encoded_separator() {
        assert_eq!(
            normalize_object_key("media%2Fsome+clip.mxf").unwrap(),
            "media/some clip.mxf"
        );
        // without an encoded separator the key is left alone
        assert_eq!(normalize_object_key("some+clip.mxf").unwrap(), "some+clip.mxf");
    }
}
