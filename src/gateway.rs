//! Clients for the external search service.
//!
//! The compiler only ever sees [`SearchGateway`]: a free-text query goes in,
//! the primary keys of matching documents come out, best match first. An
//! empty result is a valid answer and filters every row out.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SearchlinkError};
use crate::model::NameHasher;

/// Executes free-text queries against a named search index.
pub trait SearchGateway: Send + Sync {
    /// Returns the keys of the documents in `index` matching `query`.
    fn search(&self, index: &str, query: &str) -> Result<Vec<String>>;
}

impl<F> SearchGateway for F
where
    F: Fn(&str, &str) -> Result<Vec<String>> + Send + Sync,
{
    fn search(&self, index: &str, query: &str) -> Result<Vec<String>> {
        self(index, query)
    }
}

// ------------- In-memory -------------
#[derive(Debug, Clone)]
struct Document {
    key: String,
    words: Vec<String>,
}

/// An in-process search index, handy for tests and offline runs.
///
/// Query syntax follows the simple search syntax of hosted services: terms
/// separated by whitespace, a trailing `*` makes a term a prefix, a lone `*`
/// matches everything, and a document matches when any term matches any of
/// its words (case-insensitive). Keys come back in insertion order.
#[derive(Debug, Default)]
pub struct MemorySearchGateway {
    indexes: RwLock<HashMap<String, Vec<Document>, NameHasher>>,
}

impl MemorySearchGateway {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a document with the given key and searchable text to `index`.
    pub fn add_document(&self, index: &str, key: &str, text: &str) -> Result<()> {
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        self.indexes
            .write()
            .map_err(|e| SearchlinkError::Lock(e.to_string()))?
            .entry(index.to_string())
            .or_default()
            .push(Document { key: key.to_string(), words });
        Ok(())
    }
    pub fn with_document(self, index: &str, key: &str, text: &str) -> Result<Self> {
        self.add_document(index, key, text)?;
        Ok(self)
    }
}

fn term_pattern(term: &str) -> Result<Regex> {
    let lowered = term.to_lowercase();
    let pattern = match lowered.strip_suffix('*') {
        Some(prefix) => format!("^{}", regex::escape(prefix)),
        None => format!("^{}$", regex::escape(&lowered)),
    };
    Regex::new(&pattern).map_err(|e| SearchlinkError::Search(e.to_string()))
}

impl SearchGateway for MemorySearchGateway {
    fn search(&self, index: &str, query: &str) -> Result<Vec<String>> {
        let indexes = self.indexes.read().map_err(|e| SearchlinkError::Lock(e.to_string()))?;
        let documents = indexes
            .get(index)
            .ok_or_else(|| SearchlinkError::Search(format!("index '{index}' not found")))?;
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.iter().any(|t| *t == "*") {
            return Ok(documents.iter().map(|d| d.key.clone()).collect());
        }
        let patterns = terms.iter().map(|t| term_pattern(t)).collect::<Result<Vec<_>>>()?;
        let keys: Vec<String> = documents
            .iter()
            .filter(|d| d.words.iter().any(|w| patterns.iter().any(|p| p.is_match(w))))
            .map(|d| d.key.clone())
            .collect();
        debug!(index, query, hits = keys.len(), "memory search");
        Ok(keys)
    }
}

// ------------- HTTP -------------
/// Connection settings for a hosted search service. Supplied from
/// configuration, never compiled in.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Base URL of the service, e.g. `https://example.search.windows.net`.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Document field holding the entity's primary key.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    /// Maximum number of keys requested per query.
    #[serde(default = "default_top")]
    pub top: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2020-06-30".to_string()
}
fn default_key_field() -> String {
    "id".to_string()
}
fn default_top() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl GatewayConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: None,
            api_version: default_api_version(),
            key_field: default_key_field(),
            top: default_top(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Blocking client for a hosted search service's document search endpoint.
///
/// Request: `POST {endpoint}/indexes/{index}/docs/search?api-version=..`
/// with `{ "search": query, "select": key_field, "top": n }` and an
/// `api-key` header. Response: `{ "value": [ { key_field: "..." }, ... ] }`.
#[derive(Debug, Clone)]
pub struct HttpSearchGateway {
    config: GatewayConfig,
    client: reqwest::blocking::Client,
}

impl HttpSearchGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(SearchlinkError::Config("search endpoint must not be empty".to_string()));
        }
        if config.timeout_secs == 0 {
            return Err(SearchlinkError::Config("search timeout must be > 0 seconds".to_string()));
        }
        reqwest::Url::parse(config.endpoint.trim())
            .map_err(|e| SearchlinkError::Config(format!("invalid search endpoint: {e}")))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchlinkError::Config(format!("http client build failed: {e}")))?;
        Ok(Self { config, client })
    }
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// `{endpoint}/indexes/{index}/docs/search`, with `index` encoded as a
    /// single path segment.
    pub fn search_url(&self, index: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(self.config.endpoint.trim())
            .map_err(|e| SearchlinkError::Config(format!("invalid search endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SearchlinkError::Config(format!("search endpoint {} cannot take a path", self.config.endpoint)))?
            .pop_if_empty()
            .extend(["indexes", index, "docs", "search"]);
        Ok(url)
    }
}

#[derive(serde::Serialize)]
struct SearchRequest<'a> {
    search: &'a str,
    select: &'a str,
    top: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    value: Vec<serde_json::Map<String, serde_json::Value>>,
}

fn extract_keys(response: SearchResponse, key_field: &str) -> Result<Vec<String>> {
    response
        .value
        .into_iter()
        .map(|mut document| match document.remove(key_field) {
            Some(serde_json::Value::String(s)) => Ok(s),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(SearchlinkError::Search(format!(
                "key field '{key_field}' has unsupported value {other}"
            ))),
            None => Err(SearchlinkError::Search(format!("document without key field '{key_field}'"))),
        })
        .collect()
}

impl SearchGateway for HttpSearchGateway {
    fn search(&self, index: &str, query: &str) -> Result<Vec<String>> {
        let url = self.search_url(index)?;
        let body = SearchRequest { search: query, select: &self.config.key_field, top: self.config.top };
        let mut request = self
            .client
            .post(url)
            .query(&[("api-version", self.config.api_version.as_str())])
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .map_err(|e| SearchlinkError::Search(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SearchlinkError::Search(format!(
                "search request failed: status {}",
                response.status()
            )));
        }
        let raw: serde_json::Value = response.json()?;
        let parsed: SearchResponse = serde_json::from_value(raw)?;
        extract_keys(parsed, &self.config.key_field)
    }
}
