//! Archive index search.

use crate::error::IndexError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

/// Look a path up in every bucket except the excluded ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermQuery {
    pub path: String,
    pub exclude_buckets: Vec<String>,
}

impl TermQuery {
    pub fn new(path: impl Into<String>, exclude_buckets: Vec<String>) -> Self {
        Self {
            path: path.into(),
            exclude_buckets,
        }
    }

    /// Elasticsearch query DSL for this lookup.
    pub fn to_query_dsl(&self) -> Value {
        let must_not = self
            .exclude_buckets
            .iter()
            .map(|bucket| json!({ "term": { "bucket.keyword": bucket } }))
            .collect::<Vec<_>>();
        json!({
            "query": {
                "bool": {
                    "must": [ { "term": { "path.keyword": self.path } } ],
                    "must_not": must_not
                }
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// All matches in the index, not only the returned page.
    pub total_hits: i64,
    /// `_source` of each returned hit.
    pub hits: Vec<Value>,
}

pub trait ArchiveIndex: Send + Sync {
    fn search(
        &self,
        index: &str,
        query: &TermQuery,
        timeout: Duration,
    ) -> Result<SearchResponse, IndexError>;
}

/// [`ArchiveIndex`] over the Elasticsearch `_search` HTTP API.
pub struct ElasticsearchIndex {
    base_url: Url,
    client: Client,
    handle: Handle,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, handle: Handle) -> Result<Self, IndexError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            client: Client::new(),
            handle,
        })
    }

    fn search_url(&self, index: &str) -> Result<Url, IndexError> {
        Ok(self.base_url.join(&format!("{}/_search", index))?)
    }
}

impl ArchiveIndex for ElasticsearchIndex {
    fn search(
        &self,
        index: &str,
        query: &TermQuery,
        timeout: Duration,
    ) -> Result<SearchResponse, IndexError> {
        let url = self.search_url(index)?;
        let body = query.to_query_dsl();
        debug!(%url, path = %query.path, "searching archive index");

        let request = self.client.post(url).json(&body);
        let raw: RawSearchResponse = self
            .handle
            .block_on(async move {
                tokio::time::timeout(timeout, async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(IndexError::Status {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    Ok::<_, IndexError>(response.json::<RawSearchResponse>().await?)
                })
                .await
            })
            .map_err(|_| IndexError::Timeout(timeout))??;

        Ok(raw.into())
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Debug, Deserialize)]
struct RawHits {
    total: RawTotal,
    #[serde(default)]
    hits: Vec<RawHit>,
}

/// Older servers report a bare count, newer ones `{ "value": n, "relation": .. }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Count(i64),
    Object { value: i64 },
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_source", default)]
    source: Value,
}

impl From<RawSearchResponse> for SearchResponse {
    fn from(raw: RawSearchResponse) -> Self {
        let total_hits = match raw.hits.total {
            RawTotal::Count(n) | RawTotal::Object { value: n } => n,
        };
        Self {
            total_hits,
            hits: raw.hits.hits.into_iter().map(|hit| hit.source).collect(),
        }
    }
}

/// Parse a raw `_search` response body.
pub fn parse_search_response(body: &str) -> Result<SearchResponse, IndexError> {
    serde_json::from_str::<RawSearchResponse>(body)
        .map(SearchResponse::from)
        .map_err(|err| IndexError::Response(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_excludes_each_bucket() {
        let query = TermQuery::new(
            "media/clip.mxf",
            vec!["holding-pen".to_string(), "scratch".to_string()],
        );
        let dsl = query.to_query_dsl();
        assert_eq!(
            dsl["query"]["bool"]["must"][0]["term"]["path.keyword"],
            "media/clip.mxf"
        );
        let must_not = dsl["query"]["bool"]["must_not"].as_array().unwrap();
        assert_eq!(must_not.len(), 2);
        assert_eq!(must_not[1]["term"]["bucket.keyword"], "scratch");
    }

    #[test]
    fn parses_both_total_forms() {
        let old = parse_search_response(
            r#"{"hits":{"total":2,"hits":[{"_source":{"bucket":"a"}},{"_source":{"bucket":"b"}}]}}"#,
        )
        .unwrap();
        assert_eq!(old.total_hits, 2);
        assert_eq!(old.hits[1]["bucket"], "b");

        let new = parse_search_response(
            r#"{"hits":{"total":{"value":15,"relation":"eq"},"hits":[]}}"#,
        )
        .unwrap();
        assert_eq!(new.total_hits, 15);
        assert!(new.hits.is_empty());
    }

    #[test]
    fn rejects_response_without_hits() {
        assert!(matches!(
            parse_search_response(r#"{"error":"boom"}"#),
            Err(IndexError::Response(_))
        ));
    }

    #[test]
    fn search_url_joins_index() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let index = ElasticsearchIndex::new("http://127.0.0.1:9200", rt.handle().clone()).unwrap();
        assert_eq!(
            index.search_url("archivehunter").unwrap().as_str(),
            "http://127.0.0.1:9200/archivehunter/_search"
        );

        let prefixed = ElasticsearchIndex::new("http://es.local/proxy", rt.handle().clone()).unwrap();
        assert_eq!(
            prefixed.search_url("idx").unwrap().as_str(),
            "http://es.local/proxy/idx/_search"
        );
    }
}
