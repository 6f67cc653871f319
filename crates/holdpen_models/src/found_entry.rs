use crate::error::{ModelError, Result};
use crate::keys::{encode_uri_path, path_unescape};
use serde::{Deserialize, Serialize};
use url::Url;

const URI_SCHEME: &str = "s3";

/// One object in one bucket.
///
/// `path` is kept as it arrived; decoding it is up to the stage that uses it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundEntry {
    pub bucket: String,
    pub path: String,
    pub size: i64,
    pub is_proxy: bool,
}

impl FoundEntry {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>, size: i64) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
            size,
            is_proxy: false,
        }
    }

    pub fn proxy(bucket: impl Into<String>, path: impl Into<String>, size: i64) -> Self {
        Self {
            is_proxy: true,
            ..Self::new(bucket, path, size)
        }
    }

    /// Parse an `s3://bucket/path` location.
    ///
    /// The path is percent-decoded and keeps its leading `/`. Size is unknown (0).
    pub fn from_uri(uri: &str, is_proxy: bool) -> Result<Self> {
        let parsed = Url::parse(uri).map_err(|source| ModelError::Uri {
            uri: uri.to_string(),
            source,
        })?;
        let bucket = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ModelError::MissingBucket(uri.to_string()))?;
        let path = path_unescape(parsed.path())?;

        Ok(Self {
            bucket: bucket.to_string(),
            path,
            size: 0,
            is_proxy,
        })
    }

    /// Build the `s3://bucket/path` URI for this entry.
    ///
    /// The key is escaped so that [`FoundEntry::from_uri`] gives back the same path.
    pub fn to_uri(&self) -> Result<Url> {
        let base = format!("{}://{}/", URI_SCHEME, self.bucket);
        let mut url = Url::parse(&base).map_err(|source| ModelError::Uri { uri: base, source })?;
        url.set_path(&format!("/{}", encode_uri_path(self.key())));
        Ok(url)
    }

    /// The URI as plain text, without validation.
    pub fn raw_uri(&self) -> String {
        format!("{}://{}/{}", URI_SCHEME, self.bucket, self.key())
    }

    /// URI for reports: the validated form when possible, the raw text otherwise.
    pub fn display_uri(&self) -> String {
        match self.to_uri() {
            Ok(url) => url.to_string(),
            Err(err) => {
                tracing::warn!(
                    bucket = %self.bucket,
                    path = %self.path,
                    error = %err,
                    "entry does not form a valid URI, reporting raw location"
                );
                self.raw_uri()
            }
        }
    }

    /// Both a bucket and a path are present.
    pub fn is_addressable(&self) -> bool {
        !self.bucket.is_empty() && !self.path.is_empty()
    }

    fn key(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uri_decodes_path_and_keeps_leading_slash() {
        let entry = FoundEntry::from_uri("s3://proxies/path/to/clip%20one.mp4", true).unwrap();
        assert_eq!(entry.bucket, "proxies");
        assert_eq!(entry.path, "/path/to/clip one.mp4");
        assert_eq!(entry.size, 0);
        assert!(entry.is_proxy);
    }

    #[test]
    fn to_uri_escapes_reserved_characters() {
        let entry = FoundEntry::proxy("proxies", "odd/name #1?.mp4", 10);
        let uri = entry.to_uri().unwrap();
        assert_eq!(uri.host_str(), Some("proxies"));

        let back = FoundEntry::from_uri(uri.as_str(), true).unwrap();
        assert_eq!(back.path, "/odd/name #1?.mp4");
    }

    #[test]
    fn percent_in_key_survives_round_trip() {
        for key in ["media/50%off.mp4", "media/clip%20v2.mp4", "media/a|b.mp4"] {
            let entry = FoundEntry::proxy("proxies", key, 1);
            let uri = entry.to_uri().unwrap();
            let back = FoundEntry::from_uri(uri.as_str(), true).unwrap();
            assert_eq!(back.path, format!("/{}", key));
        }
        assert_eq!(
            FoundEntry::new("proxies", "media/50%off.mp4", 1).display_uri(),
            "s3://proxies/media/50%25off.mp4"
        );
    }

    #[test]
    fn leading_slash_is_not_doubled() {
        let entry = FoundEntry::new("archive", "/media/clip.mxf", 1);
        assert_eq!(entry.to_uri().unwrap().as_str(), "s3://archive/media/clip.mxf");
        assert_eq!(entry.raw_uri(), "s3://archive/media/clip.mxf");
    }

    #[test]
    fn invalid_bucket_falls_back_to_raw_text() {
        let entry = FoundEntry::new("bad bucket", "clip.mxf", 1);
        assert!(entry.to_uri().is_err());
        assert_eq!(entry.display_uri(), "s3://bad bucket/clip.mxf");
    }

    #[test]
    fn from_uri_rejects_missing_bucket() {
        assert!(FoundEntry::from_uri("s3:///clip.mxf", false).is_err());
        assert!(FoundEntry::from_uri("not a uri", false).is_err());
    }

    #[test]
    fn addressable_needs_bucket_and_path() {
        assert!(FoundEntry::new("b", "p", 0).is_addressable());
        assert!(!FoundEntry::new("", "p", 0).is_addressable());
        assert!(!FoundEntry::new("b", "", 0).is_addressable());
    }
}
