// src/services/gerrit.rs

//! Gerrit REST API client.
//!
//! Issues plain GETs, strips the `)]}'` prefix and decodes JSON. Retrying is
//! left to the caller so rate-limit failures stay visible to the crawl loop.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::error::{AppError, Result};
use crate::models::{ChangeRecord, GerritConfig};
use crate::utils::http::{create_async_client, decode_json};

/// One change search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeQuery {
    /// Search predicate (`q`)
    pub query: String,
    /// Page size (`n`)
    pub limit: usize,
    /// Number of changes to skip (`S`)
    pub start: usize,
    /// Output options (`o`)
    pub options: Vec<String>,
}

/// Operations the crawler needs from a Gerrit server.
#[async_trait]
pub trait GerritApi: Send + Sync {
    /// Fetch one page of changes.
    async fn query_changes(&self, query: &ChangeQuery) -> Result<Vec<ChangeRecord>>;

    /// Fetch the `DiffInfo` of one file of a patch set.
    async fn fetch_file_diff(&self, change: u64, revision: u32, path: &str) -> Result<Value>;
}

/// `GerritApi` implementation over HTTP.
#[derive(Clone)]
pub struct GerritClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl GerritClient {
    /// Create a client for the configured server.
    pub fn new(config: &GerritConfig) -> Result<Self> {
        let client = create_async_client(config)?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(client: Client, config: &GerritConfig) -> Self {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Build the absolute URL for a REST path.
    ///
    /// Authenticated requests live under the `/a` namespace.
    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let prefix = if self.credentials.is_some() { "/a" } else { "" };
        let mut url = Url::parse(&format!("{}{}{}", self.base_url, prefix, path))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// GET a REST path and decode the JSON body.
    pub async fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path, params)?;
        log::debug!("GET {}", url);

        let mut request = self.client.get(url.clone());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::transport(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::transport(url.as_str(), status));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AppError::transport(url.as_str(), e))?;
        decode_json(url.as_str(), &body)
    }

    /// Query parameters of a change search.
    pub fn change_params(query: &ChangeQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.query.clone()),
            ("n", query.limit.to_string()),
            ("S", query.start.to_string()),
        ];
        params.extend(query.options.iter().map(|o| ("o", o.clone())));
        params
    }

    /// REST path of a file diff; the file path is one encoded segment.
    pub fn diff_path(change: u64, revision: u32, path: &str) -> String {
        let encoded: String = byte_serialize(path.as_bytes()).collect();
        format!("/changes/{change}/revisions/{revision}/files/{encoded}/diff")
    }
}

#[async_trait]
impl GerritApi for GerritClient {
    async fn query_changes(&self, query: &ChangeQuery) -> Result<Vec<ChangeRecord>> {
        let params = Self::change_params(query);
        let value = self.fetch("/changes/", &params).await?;
        serde_json::from_value(value).map_err(|e| AppError::parse("/changes/", e))
    }

    async fn fetch_file_diff(&self, change: u64, revision: u32, path: &str) -> Result<Value> {
        self.fetch(&Self::diff_path(change, revision, path), &[])
            .await
    }
}
