//! S3-compatible HTTP object store.

use super::object_store::{key_in_prefix, BackendKind, ObjectStore};
use crate::errors::StorageError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::trace;

/// Object store speaking the S3 path-style REST protocol.
///
/// Objects live at `{endpoint}/{bucket}/{key}`, with every key segment
/// percent-encoded. Listing uses `list-type=2` and follows continuation
/// tokens.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    endpoint: Url,
    bucket: String,
    http: reqwest::Client,
    key_pattern: Regex,
    token_pattern: Regex,
}

impl HttpObjectStore {
    /// Creates a store for `bucket` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if `endpoint` is not a base URL or
    /// the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Result<Self, StorageError> {
        let endpoint = endpoint.into();
        let bucket = bucket.into();
        let parsed = Url::parse(&endpoint).map_err(|e| StorageError::backend("http", &endpoint, e))?;
        if parsed.cannot_be_a_base() {
            return Err(StorageError::backend("http", &endpoint, "endpoint is not a base URL"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StorageError::backend("http", &endpoint, e))?;
        let key_pattern =
            Regex::new(r"<Key>([^<]*)</Key>").map_err(|e| StorageError::backend("http", &endpoint, e))?;
        let token_pattern = Regex::new(r"<NextContinuationToken>([^<]*)</NextContinuationToken>")
            .map_err(|e| StorageError::backend("http", &endpoint, e))?;

        Ok(Self {
            endpoint: parsed,
            bucket,
            http,
            key_pattern,
            token_pattern,
        })
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| self.error(key, "endpoint is not a base URL"))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// The encoded `/{bucket}/{key}` path, as `x-amz-copy-source` expects.
    fn copy_source(&self, key: &str) -> Result<String, StorageError> {
        let url = self.object_url(key)?;
        let base = self.endpoint.path().trim_end_matches('/');
        Ok(url.path().strip_prefix(base).unwrap_or(url.path()).to_string())
    }

    fn error(&self, key: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::backend(self.kind().as_str(), key, err)
    }

    async fn check(&self, key: &str, res: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(self.kind().as_str(), key));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(self.error(key, format!("{status} - {body}")));
        }
        Ok(res)
    }

    fn parse_keys(&self, body: &str) -> Vec<String> {
        self.key_pattern
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .map(|m| unescape_xml(m.as_str()))
            .collect()
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let res = self
            .http
            .put(self.object_url(key)?)
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.error(key, e))?;
        self.check(key, res).await?;
        trace!(key, bucket = %self.bucket, "Uploaded object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let res = self
            .http
            .get(self.object_url(key)?)
            .send()
            .await
            .map_err(|e| self.error(key, e))?;
        let res = self.check(key, res).await?;
        let bytes = res.bytes().await.map_err(|e| self.error(key, e))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let res = self
            .http
            .head(self.object_url(key)?)
            .send()
            .await
            .map_err(|e| self.error(key, e))?;
        match self.check(key, res).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(!self.list(key).await?.is_empty()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        for child in self.list(key).await? {
            let res = self
                .http
                .delete(self.object_url(&child)?)
                .send()
                .await
                .map_err(|e| self.error(&child, e))?;
            match self.check(&child, res).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let url = self.object_url("")?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
            if let Some(token) = &token {
                query.push(("continuation-token", token.clone()));
            }
            let res = self
                .http
                .get(url.clone())
                .query(&query)
                .send()
                .await
                .map_err(|e| self.error(prefix, e))?;
            let body = match self.check(prefix, res).await {
                Ok(res) => res.text().await.map_err(|e| self.error(prefix, e))?,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };

            keys.extend(
                self.parse_keys(&body)
                    .into_iter()
                    .filter(|k| key_in_prefix(k, prefix)),
            );

            token = self
                .token_pattern
                .captures(&body)
                .and_then(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()));
            if token.is_none() {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let res = self
            .http
            .put(self.object_url(to)?)
            .header("x-amz-copy-source", self.copy_source(from)?)
            .send()
            .await
            .map_err(|e| self.error(to, e))?;
        match self.check(to, res).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(StorageError::not_found(self.kind().as_str(), from)),
            Err(e) => Err(e),
        }
    }

    fn uri_for_key(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_object_urls() {
        let store = HttpObjectStore::new("http://localhost:9000/", "runs").unwrap();
        assert_eq!(
            store.object_url("dagster/storage/r/x").unwrap().as_str(),
            "http://localhost:9000/runs/dagster/storage/r/x"
        );
        assert_eq!(store.uri_for_key("dagster/storage/r/x"), "s3://runs/dagster/storage/r/x");
        assert_eq!(store.object_url("").unwrap().as_str(), "http://localhost:9000/runs");
    }

    #[test]
    fn test_object_urls_encode_key_segments() {
        let store = HttpObjectStore::new("http://localhost:9000/minio", "runs").unwrap();
        let url = store.object_url("dagster/storage/r/a b?c#d%e").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/minio/runs/dagster/storage/r/a%20b%3Fc%23d%25e"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(
            store.copy_source("dagster/storage/r/a b?c").unwrap(),
            "/runs/dagster/storage/r/a%20b%3Fc"
        );
    }

    #[test]
    fn test_rejects_non_base_endpoint() {
        let err = HttpObjectStore::new("mailto:ops@example.com", "runs").unwrap_err();
        assert!(err.to_string().contains("not a base URL"));
    }

    #[test]
    fn test_parse_list_response() {
        let store = HttpObjectStore::new("http://localhost:9000", "runs").unwrap();
        let body = "<ListBucketResult><Contents><Key>a/b</Key></Contents>\
                    <Contents><Key>a/b/c&amp;d</Key></Contents></ListBucketResult>";
        assert_eq!(store.parse_keys(body), vec!["a/b".to_string(), "a/b/c&d".to_string()]);
    }
}
