//! `RemoteStore` over the backend's auto-generated REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use tracing::debug;

use super::{Query, RemoteStore, Row, StoreError, Table};

/// REST client for the table API (`<origin>/rest/v1/<table>`).
pub struct RestStore {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("rest_url", &self.rest_url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RestStore {
    pub fn new(rest_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
        }
    }

    /// Use a user JWT instead of the anon key for `Authorization`.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.rest_url, table.name())
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", v);
        }
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {bearer}")) {
            headers.insert(AUTHORIZATION, v);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        self.http
            .request(method, self.table_url(table))
            .headers(self.headers())
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let response = req
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = text.chars().take(200).collect::<String>();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json_rows(response: Response) -> Result<Vec<Row>, StoreError> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

/// Parse the total out of a `Content-Range` header (`0-24/3573` or `*/0`).
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        debug!(table = %query.table, "select");
        let req = self
            .request(Method::GET, query.table)
            .query(&query.to_params(true));
        let response = self.send(req).await?;
        Self::json_rows(response).await
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        debug!(table = %query.table, "count");
        let mut params = query.to_params(false);
        params.retain(|(k, _)| k != "limit" && k != "order");
        params.push(("select".to_string(), "*".to_string()));
        let req = self
            .request(Method::HEAD, query.table)
            .header("Prefer", "count=exact")
            .query(&params);
        let response = self.send(req).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StoreError::Decode("missing or malformed Content-Range".into()))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        debug!(table = %table, "insert");
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(req).await?;
        Self::json_rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no rows".into()))
    }

    async fn upsert(&self, table: Table, row: Row, on_conflict: &str) -> Result<(), StoreError> {
        debug!(table = %table, on_conflict, "upsert");
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(&row);
        self.send(req).await?;
        Ok(())
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError> {
        debug!(table = %query.table, "update");
        let req = self
            .request(Method::PATCH, query.table)
            .header("Prefer", "return=representation")
            .query(&query.to_params(false))
            .json(&patch);
        let response = self.send(req).await?;
        Self::json_rows(response).await
    }

    async fn delete(&self, query: &Query) -> Result<(), StoreError> {
        debug!(table = %query.table, "delete");
        let req = self
            .request(Method::DELETE, query.table)
            .header("Prefer", "return=minimal")
            .query(&query.to_params(false));
        self.send(req).await?;
        Ok(())
    }
}
