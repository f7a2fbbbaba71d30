//! Raw S3 REST client.
//!
//! Issues signed object calls against AWS or any S3-compatible endpoint.
//! Virtual-hosted addressing is used against AWS; a custom endpoint switches
//! to path-style, which is what MinIO and friends expect.

use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::s3::signer::{sha256_hex, Signer, EMPTY_PAYLOAD_HASH};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    endpoint: Option<String>,
}

impl Client {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            bucket: bucket.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    /// Host header value for requests.
    pub fn host(&self) -> String {
        match &self.endpoint {
            Some(ep) => ep
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn scheme(&self) -> &'static str {
        match &self.endpoint {
            Some(ep) if ep.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Absolute request path for an object key; bucket-qualified when
    /// addressing a custom endpoint path-style.
    pub fn object_path(&self, key: &str) -> String {
        match &self.endpoint {
            Some(_) => format!("/{}/{}", self.bucket, key),
            None => format!("/{}", key),
        }
    }

    fn bucket_path(&self) -> String {
        match &self.endpoint {
            Some(_) => format!("/{}", self.bucket),
            None => "/".to_string(),
        }
    }

    /// Unsigned public URL for an object (bucket must allow public reads or
    /// sit behind a CDN for this to resolve).
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}://{}{}",
            self.scheme(),
            self.host(),
            Signer::canonical_uri(&self.object_path(key))
        )
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<Bytes>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let payload_hash = match &body {
            Some(data) => sha256_hex(data),
            None => EMPTY_PAYLOAD_HASH.to_string(),
        };
        let now = Utc::now();

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), self.host()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            (
                "x-amz-date".to_string(),
                now.format("%Y%m%dT%H%M%SZ").to_string(),
            ),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }

        let authorization = Signer::new(method, path, query, &headers, &payload_hash)
            .authorization(&self.access_key, &self.secret_key, &self.region, now);

        // The URL is assembled from the exact canonical forms that were
        // signed, so encoding cannot drift between signature and wire.
        let mut url = format!(
            "{}://{}{}",
            self.scheme(),
            self.host(),
            Signer::canonical_uri(path)
        );
        let query_string = Signer::canonical_query(query);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }

        let mut req = match method {
            "GET" => self.http.get(&url),
            "PUT" => self.http.put(&url),
            "HEAD" => self.http.head(&url),
            "DELETE" => self.http.delete(&url),
            other => {
                return Err(Error::BackendUnavailable(format!(
                    "unsupported method: {}",
                    other
                )))
            }
        };
        for (name, value) in &headers {
            if name != "host" {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        req = req.header("authorization", authorization);
        if let Some(data) = body {
            req = req.body(data);
        }

        Ok(req.send().await?)
    }

    /// Map a non-success status onto the crate error taxonomy.
    fn classify(status: reqwest::StatusCode, action: &str, key: &str) -> Error {
        match status.as_u16() {
            401 | 403 => Error::BackendDenied(format!("{} {}: HTTP {}", action, key, status)),
            404 => Error::NotFound(format!("object not found: {}", key)),
            _ => Error::BackendUnavailable(format!("{} {}: HTTP {}", action, key, status)),
        }
    }

    pub async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let path = self.object_path(key);
        let resp = self
            .send("PUT", &path, &[], Some(data), Some(content_type))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify(resp.status(), "put object", key));
        }
        tracing::debug!("Uploaded object to {}", key);
        Ok(())
    }

    pub async fn get_object(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key);
        let resp = self.send("GET", &path, &[], None, None).await?;
        if !resp.status().is_success() {
            return Err(Self::classify(resp.status(), "get object", key));
        }
        Ok(resp.bytes().await?)
    }

    pub async fn head_object(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key);
        let resp = self.send("HEAD", &path, &[], None, None).await?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::classify(resp.status(), "head object", key)),
        }
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        let resp = self.send("DELETE", &path, &[], None, None).await?;
        // Absence is success: delete is idempotent.
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(Self::classify(resp.status(), "delete object", key));
        }
        tracing::debug!("Deleted object {}", key);
        Ok(())
    }

    /// All object keys under `prefix`, walking ListObjectsV2 pages.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let path = self.bucket_path();
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send("GET", &path, &query, None, None).await?;
            if !resp.status().is_success() {
                return Err(Self::classify(resp.status(), "list prefix", prefix));
            }
            let body = resp.text().await?;

            keys.extend(extract_tags(&body, "Key").into_iter().map(xml_unescape));

            let truncated = extract_tags(&body, "IsTruncated")
                .first()
                .map(|v| v == "true")
                .unwrap_or(false);
            if !truncated {
                break;
            }
            continuation = extract_tags(&body, "NextContinuationToken")
                .into_iter()
                .next()
                .map(xml_unescape);
            if continuation.is_none() {
                break;
            }
        }

        Ok(keys)
    }
}

/// Collect the text content of every `<tag>` element. The ListObjectsV2
/// response is flat enough that a full XML parser buys nothing here.
fn extract_tags(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut values = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                values.push(after[..end].to_string());
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    values
}

fn xml_unescape(s: String) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
